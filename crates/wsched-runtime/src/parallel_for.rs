//! Fork-join loops over an index range
//!
//! The range is cut into `logical_divisor(group)` contiguous chunks. All but
//! one are submitted to `group`; the caller runs the last chunk itself and
//! then helps with other work until every chunk has finished.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use wsched_core::WorkgroupId;

use crate::context::TaskContext;

/// Decrements the outstanding-chunk count when a chunk finishes (or unwinds).
struct ChunkDone(Arc<AtomicUsize>);

impl Drop for ChunkDone {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Release);
    }
}

/// Split `range` into at most `parts` contiguous, non-empty chunks.
pub fn split_range(range: Range<usize>, parts: usize) -> impl Iterator<Item = Range<usize>> {
    let len = range.len();
    let parts = parts.clamp(1, len.max(1));
    let chunk = len.div_ceil(parts).max(1);
    let end = range.end;
    (range.start..end)
        .step_by(chunk)
        .map(move |start| start..(start + chunk).min(end))
}

/// Run `body` on chunks of `range` across `group`'s workers.
///
/// Returns once every chunk has run. If the scheduler stops first, chunks
/// that were still queued are dropped and this returns early.
pub fn parallel_for_range<F>(ctx: &TaskContext, group: WorkgroupId, range: Range<usize>, body: F)
where
    F: Fn(Range<usize>) + Send + Sync + 'static,
{
    if range.is_empty() {
        return;
    }
    let parts = ctx.logical_divisor(group) as usize;
    let mut chunks = split_range(range, parts);
    let Some(inline) = chunks.next() else {
        return;
    };

    let body = Arc::new(body);
    let remaining = Arc::new(AtomicUsize::new(0));
    for chunk in chunks {
        remaining.fetch_add(1, Ordering::Relaxed);
        let (b, r, c) = (body.clone(), remaining.clone(), chunk.clone());
        let submitted = ctx.submit(group, move |_| {
            let _done = ChunkDone(r);
            b(c);
        });
        if submitted.is_err() {
            // Mailbox full: the chunk was dropped unrun. Do it here.
            remaining.fetch_sub(1, Ordering::Relaxed);
            body(chunk);
        }
    }

    body(inline);
    ctx.busy_wait(|| remaining.load(Ordering::Acquire) == 0);
}

/// Run `body(i)` for every `i` in `range` across `group`'s workers.
pub fn parallel_for<F>(ctx: &TaskContext, group: WorkgroupId, range: Range<usize>, body: F)
where
    F: Fn(usize) + Send + Sync + 'static,
{
    parallel_for_range(ctx, group, range, move |chunk| chunk.for_each(&body));
}
