//! Workgroup: per-worker owner queues plus a cross-group mailbox
//!
//! A workgroup is bound to the contiguous worker range
//! `[worker_start, worker_start + worker_count)`. Worker `w` in that range
//! owns queue `w - worker_start` (its local offset) for the group's lifetime.
//!
//! ```text
//!             Workgroup (priority p)
//! ┌──────────────────────────────────────────────┐
//! │ queues: [ q0 ][ q1 ][ q2 ] ...  (owner LIFO,  │
//! │                                  thief FIFO)  │
//! │ mailbox: MpmcRing   <- any thread posts       │
//! │ pending: items queued or running (hint)      │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! `pending` goes up before an item becomes visible and down after it has
//! run, so `pending == 0` means the group is drained. Workers only use it
//! as a hint: it can read non-zero while every queue looks empty.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use wsched_core::{CachePadded, MpmcRing, OwnerQueue, QueueKind, WorkgroupId};

/// Creation parameters for a workgroup, recorded by `create_group`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupDesc {
    pub worker_start: u32,
    pub worker_count: u32,
    pub priority: u32,
}

impl GroupDesc {
    /// One past the last worker index
    pub fn worker_end(&self) -> u32 {
        self.worker_start + self.worker_count
    }
}

pub struct Workgroup<T> {
    id: WorkgroupId,
    desc: GroupDesc,
    queues: Box<[Box<dyn OwnerQueue<T>>]>,
    mailbox: MpmcRing<T>,
    pending: CachePadded<AtomicI64>,
    /// Member workers currently parked (or about to park)
    sleepers: CachePadded<AtomicUsize>,
    steal_cursor: CachePadded<AtomicUsize>,
}

impl<T: Send + 'static> Workgroup<T> {
    pub fn new(
        id: WorkgroupId,
        desc: GroupDesc,
        queue_kind: QueueKind,
        queue_capacity: usize,
        mailbox_capacity: usize,
    ) -> Self {
        let queues = (0..desc.worker_count)
            .map(|_| queue_kind.build(queue_capacity))
            .collect();
        Workgroup {
            id,
            desc,
            queues,
            mailbox: MpmcRing::new(mailbox_capacity),
            pending: CachePadded::new(AtomicI64::new(0)),
            sleepers: CachePadded::new(AtomicUsize::new(0)),
            steal_cursor: CachePadded::new(AtomicUsize::new(0)),
        }
    }
}

impl<T> Workgroup<T> {
    #[inline]
    pub fn id(&self) -> WorkgroupId {
        self.id
    }

    #[inline]
    pub fn desc(&self) -> GroupDesc {
        self.desc
    }

    #[inline]
    pub fn priority(&self) -> u32 {
        self.desc.priority
    }

    #[inline]
    pub fn worker_start(&self) -> u32 {
        self.desc.worker_start
    }

    #[inline]
    pub fn worker_count(&self) -> u32 {
        self.desc.worker_count
    }

    /// Local queue offset of `worker`, if it belongs to this group
    #[inline]
    pub fn local_offset(&self, worker: usize) -> Option<usize> {
        let start = self.desc.worker_start as usize;
        let end = self.desc.worker_end() as usize;
        (start..end).contains(&worker).then(|| worker - start)
    }

    /// Push to the owner queue at `offset` and advertise it.
    ///
    /// Hands the item back when the queue refuses it (full SPMC ring).
    ///
    /// # Safety
    ///
    /// Must be called from the worker that owns `offset`.
    pub unsafe fn push_work_to_worker(&self, offset: usize, item: T) -> Result<(), T> {
        self.advertise();
        let result = self.queues[offset].push(item);
        if result.is_err() {
            self.retract();
        }
        result
    }

    /// Owner-side pop from the queue at `offset` (most recent first).
    ///
    /// # Safety
    ///
    /// Must be called from the worker that owns `offset`.
    #[inline]
    pub unsafe fn pop_work_from_worker(&self, offset: usize) -> Option<T> {
        self.queues[offset].pop()
    }

    /// Steal from the member queues, starting at a rotating index.
    ///
    /// Skips `avoid` (typically the caller's own offset). `None` when every
    /// queue was empty or the race was lost.
    pub fn steal_work(&self, avoid: Option<usize>) -> Option<T> {
        let n = self.queues.len();
        if n == 0 {
            return None;
        }
        let start = self.next_cursor();
        (0..n)
            .map(|i| (start + i) % n)
            .filter(|&idx| Some(idx) != avoid)
            .find_map(|idx| self.queues[idx].steal())
    }

    /// Post to the mailbox and advertise it. Hands the item back when full.
    pub fn submit_to_mailbox(&self, item: T) -> Result<(), T> {
        self.advertise();
        let result = self.mailbox.push(item);
        if result.is_err() {
            self.retract();
        }
        result
    }

    #[inline]
    pub fn receive_from_mailbox(&self) -> Option<T> {
        self.mailbox.pop()
    }

    /// Relaxed work-available hint
    #[inline]
    pub fn has_work(&self) -> bool {
        self.pending.load(Ordering::Relaxed) > 0
    }

    /// Items queued or running; SeqCst so it can pair with parking
    #[inline]
    pub fn pending(&self) -> i64 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Record that one item taken from this group has finished running.
    #[inline]
    pub fn sink_one_work(&self) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
    }

    /// Approximate number of queued items (owner queues plus mailbox)
    pub fn queued(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum::<usize>() + self.mailbox.len()
    }

    pub fn mailbox_len(&self) -> usize {
        self.mailbox.len()
    }

    /// A member worker is about to park.
    #[inline]
    pub fn enter_sleep(&self) {
        self.sleepers.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    pub fn exit_sleep(&self) {
        self.sleepers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Parked member workers (hint)
    #[inline]
    pub fn sleepers(&self) -> usize {
        self.sleepers.load(Ordering::Relaxed)
    }

    /// Rotating starting point for scans over member workers
    #[inline]
    pub fn next_cursor(&self) -> usize {
        self.steal_cursor.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    fn advertise(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    #[inline]
    fn retract(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<T> std::fmt::Debug for Workgroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workgroup")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_queue::SegQueue;
    use std::sync::Arc;
    use std::thread;

    fn group(kind: QueueKind, start: u32, count: u32) -> Workgroup<u32> {
        Workgroup::new(
            WorkgroupId::new(0),
            GroupDesc { worker_start: start, worker_count: count, priority: 0 },
            kind,
            8,
            4,
        )
    }

    #[test]
    fn test_local_offset() {
        let wg = group(QueueKind::ChaseLev, 2, 3);
        assert_eq!(wg.local_offset(1), None);
        assert_eq!(wg.local_offset(2), Some(0));
        assert_eq!(wg.local_offset(4), Some(2));
        assert_eq!(wg.local_offset(5), None);
    }

    #[test]
    fn test_push_pop_and_pending() {
        let wg = group(QueueKind::ChaseLev, 0, 2);
        assert!(!wg.has_work());
        unsafe {
            wg.push_work_to_worker(0, 1).unwrap();
            wg.push_work_to_worker(0, 2).unwrap();
        }
        assert!(wg.has_work());
        assert_eq!(wg.pending(), 2);

        assert_eq!(unsafe { wg.pop_work_from_worker(0) }, Some(2));
        wg.sink_one_work();
        // Worker 1 steals the remaining item from worker 0.
        assert_eq!(wg.steal_work(Some(1)), Some(1));
        wg.sink_one_work();
        assert_eq!(wg.pending(), 0);
        assert!(!wg.has_work());
    }

    #[test]
    fn test_steal_skips_avoided_queue() {
        let wg = group(QueueKind::ChaseLev, 0, 3);
        unsafe { wg.push_work_to_worker(1, 7).unwrap() };
        for _ in 0..5 {
            assert_eq!(wg.steal_work(Some(1)), None);
        }
        assert_eq!(wg.steal_work(Some(0)), Some(7));
    }

    #[test]
    fn test_mailbox_full_retracts_pending() {
        let wg = group(QueueKind::SpmcRing, 0, 1);
        for i in 0..4 {
            wg.submit_to_mailbox(i).unwrap();
        }
        assert_eq!(wg.submit_to_mailbox(9), Err(9));
        assert_eq!(wg.pending(), 4);
        assert_eq!(wg.receive_from_mailbox(), Some(0));
    }

    #[test]
    fn test_full_ring_retracts_pending() {
        let wg = group(QueueKind::SpmcRing, 0, 1);
        unsafe {
            for i in 0..8 {
                wg.push_work_to_worker(0, i).unwrap();
            }
            assert_eq!(wg.push_work_to_worker(0, 8), Err(8));
        }
        assert_eq!(wg.pending(), 8);
        assert_eq!(wg.queued(), 8);
    }

    #[test]
    fn test_concurrent_stealers_see_each_item_once() {
        const ITEMS: u32 = 5_000;
        let wg = Arc::new(Workgroup::<u32>::new(
            WorkgroupId::new(1),
            GroupDesc { worker_start: 0, worker_count: 4, priority: 0 },
            QueueKind::ChaseLev,
            16,
            64,
        ));
        unsafe {
            for i in 0..ITEMS {
                wg.push_work_to_worker(0, i).unwrap();
            }
        }

        let got = Arc::new(SegQueue::new());
        let handles: Vec<_> = (1..4)
            .map(|me| {
                let wg = wg.clone();
                let got = got.clone();
                thread::spawn(move || {
                    while wg.pending() > 0 {
                        if let Some(v) = wg.steal_work(Some(me)) {
                            got.push(v);
                            wg.sink_one_work();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut seen: Vec<_> = std::iter::from_fn(|| got.pop()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..ITEMS).collect::<Vec<_>>());
    }
}
