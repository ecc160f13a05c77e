//! Futures as work items
//!
//! A spawned future is polled inside an ordinary work item. When it returns
//! `Pending`, whatever it is waiting on holds a `Waker`; waking re-posts a
//! poll item to the future's workgroup mailbox. A wake that lands during the
//! poll is re-queued by the polling worker itself, on its own queue, so a
//! full mailbox cannot stall it.
//!
//! ```text
//!            wake                 poll starts
//!   IDLE ───────────► SCHEDULED ─────────────► RUNNING ──── Ready ───► DONE
//!    ▲                    ▲                      │  │
//!    │                    │ re-post              │  │ wake during poll
//!    └──── Pending ───────┼──────────────────────┘  ▼
//!                         └─────────────────── NOTIFIED
//! ```
//!
//! At most one poll item per future is queued at any time.

use std::cell::UnsafeCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};
use std::thread;

use wsched_core::{kdebug, SchedResult, SmallFn, WorkgroupId};

use crate::context::{TaskContext, WorkItem};
use crate::scheduler::Shared;

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;
const NOTIFIED: u8 = 3;
const DONE: u8 = 4;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

struct FutureTask {
    state: AtomicU8,
    future: UnsafeCell<Option<BoxFuture>>,
    /// Weak so a future parked forever does not keep the scheduler alive
    shared: Weak<Shared>,
    group: WorkgroupId,
}

// Safety: `future` is only touched by the thread that moved the state to
// RUNNING, and the state machine admits one such thread at a time.
unsafe impl Sync for FutureTask {}

impl FutureTask {
    /// Post a poll item from a waker, retrying while the mailbox is full.
    fn schedule(self: &Arc<Self>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let wg = shared.group(self.group);
        let mut item = poll_item(self.clone());
        while let Err(back) = shared.try_post(wg, item) {
            if shared.is_stopping() {
                kdebug!("scheduler stopping, dropping woken future");
                return;
            }
            item = back;
            thread::yield_now();
        }
    }

    /// Re-post from the worker that just polled. Prefers the own queue and
    /// runs other work while every queue is full.
    fn reschedule(self: &Arc<Self>, ctx: &TaskContext) {
        let shared = ctx.shared();
        let wg = shared.group(self.group);
        let mut item = poll_item(self.clone());
        while let Err(back) = shared.try_submit(ctx, wg, item) {
            if shared.is_stopping() {
                kdebug!("scheduler stopping, dropping woken future");
                return;
            }
            item = back;
            if !ctx.busy_work() {
                thread::yield_now();
            }
        }
    }

    fn poll(self: &Arc<Self>, ctx: &TaskContext) {
        self.state.store(RUNNING, Ordering::Release);

        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);
        // Safety: we are the RUNNING thread.
        let slot = unsafe { &mut *self.future.get() };
        let polled = panic::catch_unwind(AssertUnwindSafe(|| match slot.as_mut() {
            Some(f) => f.as_mut().poll(&mut cx),
            None => Poll::Ready(()),
        }));

        match polled {
            Ok(Poll::Pending) => {}
            Ok(Poll::Ready(())) => {
                *slot = None;
                self.state.store(DONE, Ordering::Release);
                return;
            }
            Err(payload) => {
                *slot = None;
                self.state.store(DONE, Ordering::Release);
                panic::resume_unwind(payload);
            }
        }

        if self
            .state
            .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Woken while polling
            self.state.store(SCHEDULED, Ordering::Release);
            self.reschedule(ctx);
        }
    }
}

impl Wake for FutureTask {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            let next = match state {
                IDLE => SCHEDULED,
                RUNNING => NOTIFIED,
                _ => return,
            };
            match self
                .state
                .compare_exchange_weak(state, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    if next == SCHEDULED {
                        self.schedule();
                    }
                    return;
                }
                Err(actual) => state = actual,
            }
        }
    }
}

fn poll_item(task: Arc<FutureTask>) -> WorkItem {
    SmallFn::new(move |ctx: &TaskContext| task.poll(ctx))
}

/// Completion handle for a spawned future
#[derive(Clone)]
pub struct FutureHandle {
    task: Arc<FutureTask>,
}

impl FutureHandle {
    /// `true` once the future returned `Ready` (or panicked)
    pub fn is_finished(&self) -> bool {
        self.task.state.load(Ordering::Acquire) == DONE
    }
}

impl std::fmt::Debug for FutureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FutureHandle")
            .field("group", &self.task.group)
            .field("finished", &self.is_finished())
            .finish()
    }
}

pub(crate) fn spawn<F>(shared: &Arc<Shared>, group: WorkgroupId, future: F) -> SchedResult<FutureHandle>
where
    F: Future<Output = ()> + Send + 'static,
{
    let task = Arc::new(FutureTask {
        state: AtomicU8::new(SCHEDULED),
        future: UnsafeCell::new(Some(Box::pin(future))),
        shared: Arc::downgrade(shared),
        group,
    });
    shared.post(group, poll_item(task.clone()))?;
    Ok(FutureHandle { task })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::scheduler::Scheduler;
    use std::sync::atomic::{AtomicBool, AtomicU64};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Returns `Pending` `n` times, waking itself each time.
    struct YieldN(u32);

    impl Future for YieldN {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.0 == 0 {
                return Poll::Ready(());
            }
            self.0 -= 1;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }

    /// Single-shot signal completed from another task
    #[derive(Default)]
    struct Signal {
        set: AtomicBool,
        waker: Mutex<Option<Waker>>,
    }

    impl Signal {
        fn fire(&self) {
            self.set.store(true, Ordering::Release);
            if let Some(w) = self.waker.lock().unwrap().take() {
                w.wake();
            }
        }
    }

    struct WaitSignal(Arc<Signal>);

    impl Future for WaitSignal {
        type Output = ();

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            *self.0.waker.lock().unwrap() = Some(cx.waker().clone());
            if self.0.set.load(Ordering::Acquire) {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        }
    }

    fn scheduler() -> (Scheduler, WorkgroupId) {
        let mut s =
            Scheduler::new(SchedulerConfig::new().park_timeout(Duration::from_millis(10))).unwrap();
        let g = s.create_group_auto(0, 2, 0).unwrap();
        s.begin_execution().unwrap();
        (s, g)
    }

    #[test]
    fn test_self_waking_future_completes() {
        let (mut s, g) = scheduler();
        let polls = Arc::new(AtomicU64::new(0));
        let p = polls.clone();
        let handle = s
            .spawn_future(g, async move {
                YieldN(5).await;
                p.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();

        s.wait_for_tasks().unwrap();
        assert!(handle.is_finished());
        assert_eq!(polls.load(Ordering::Relaxed), 1);
        s.end_execution().unwrap();
    }

    #[test]
    fn test_future_woken_by_other_task() {
        let (mut s, g) = scheduler();
        let signal = Arc::new(Signal::default());
        let handle = s.spawn_future(g, WaitSignal(signal.clone())).unwrap();

        // Nothing can complete it yet.
        s.wait_for_tasks().unwrap();
        assert!(!handle.is_finished());

        s.post(g, move |_| signal.fire()).unwrap();
        s.wait_for_tasks().unwrap();
        assert!(handle.is_finished());
        s.end_execution().unwrap();
    }

    #[test]
    fn test_many_futures_from_tasks() {
        let (mut s, g) = scheduler();
        let done = Arc::new(AtomicU64::new(0));
        let handles = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..50 {
            let done = done.clone();
            let handles = handles.clone();
            s.post(g, move |ctx| {
                let h = ctx
                    .spawn_future(ctx.workgroup_id(), async move {
                        YieldN(3).await;
                        done.fetch_add(1, Ordering::Relaxed);
                    })
                    .unwrap();
                handles.lock().unwrap().push(h);
            })
            .unwrap();
        }
        s.wait_for_tasks().unwrap();
        s.end_execution().unwrap();

        assert_eq!(done.load(Ordering::Relaxed), 50);
        assert!(handles.lock().unwrap().iter().all(FutureHandle::is_finished));
    }

    #[test]
    fn test_panicking_future_finishes() {
        let (mut s, g) = scheduler();
        let handle = s
            .spawn_future(g, async {
                YieldN(1).await;
                panic!("future failure");
            })
            .unwrap();
        s.wait_for_tasks().unwrap();
        assert!(handle.is_finished());
        s.end_execution().unwrap();
        assert_eq!(s.stats().total().panics, 1);
    }

    /// Blocks its first poll until released, then wakes itself.
    struct Gate {
        entered: Arc<AtomicBool>,
        release: Arc<AtomicBool>,
        polls: u32,
    }

    impl Future for Gate {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            self.polls += 1;
            if self.polls > 1 {
                return Poll::Ready(());
            }
            self.entered.store(true, Ordering::Release);
            while !self.release.load(Ordering::Acquire) {
                thread::yield_now();
            }
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }

    #[test]
    fn test_self_wake_with_full_mailbox_single_worker() {
        let config = SchedulerConfig::new()
            .mailbox_capacity(2)
            .park_timeout(Duration::from_millis(10));
        let mut s = Scheduler::new(config).unwrap();
        let g = s.create_group_auto(0, 1, 0).unwrap();
        s.begin_execution().unwrap();

        let entered = Arc::new(AtomicBool::new(false));
        let release = Arc::new(AtomicBool::new(false));
        let handle = s
            .spawn_future(
                g,
                Gate { entered: entered.clone(), release: release.clone(), polls: 0 },
            )
            .unwrap();
        while !entered.load(Ordering::Acquire) {
            thread::yield_now();
        }

        // The only worker is inside the poll: these fill the mailbox.
        let ran = Arc::new(AtomicU64::new(0));
        for _ in 0..2 {
            let r = ran.clone();
            s.post(g, move |_| {
                r.fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        }
        release.store(true, Ordering::Release);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !(handle.is_finished() && ran.load(Ordering::Relaxed) == 2) {
            assert!(
                std::time::Instant::now() < deadline,
                "woken future stuck: finished={} ran={}",
                handle.is_finished(),
                ran.load(Ordering::Relaxed)
            );
            thread::sleep(Duration::from_millis(1));
        }

        s.wait_for_tasks().unwrap();
        s.end_execution().unwrap();
    }

    #[test]
    fn test_pending_future_dropped_at_shutdown() {
        let (mut s, g) = scheduler();
        let signal = Arc::new(Signal::default());
        let handle = s.spawn_future(g, WaitSignal(signal.clone())).unwrap();
        s.wait_for_tasks().unwrap();
        s.end_execution().unwrap();

        // Waking after shutdown is a no-op.
        signal.fire();
        assert!(!handle.is_finished());
    }
}
