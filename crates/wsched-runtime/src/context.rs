//! Task context
//!
//! Every work item runs with a `&TaskContext` naming the worker executing
//! it and the workgroup the item was taken from. The context is created on
//! the worker thread and is neither `Send` nor `Sync`, so holding one proves
//! the caller is that worker; this is what makes the owner-queue fast path
//! of `submit` sound.

use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use wsched_core::{SchedResult, SmallFn, WorkerId, WorkgroupId};

use crate::future::FutureHandle;
use crate::scheduler::Shared;

/// Unit of schedulable work
pub type WorkItem = SmallFn<TaskContext>;

/// Opaque value handed to every context by `begin_execution_with`
pub type UserContext = Arc<dyn Any + Send + Sync>;

pub struct TaskContext {
    shared: Arc<Shared>,
    worker: WorkerId,
    group: Cell<WorkgroupId>,
    offset: Cell<Option<usize>>,
    tick: Cell<u32>,
    user: Option<UserContext>,
    _not_send: PhantomData<*const ()>,
}

impl TaskContext {
    pub(crate) fn new(shared: Arc<Shared>, worker: WorkerId, user: Option<UserContext>) -> Self {
        // Start in the worker's highest-priority group.
        let first = shared.worker(worker).memberships().first().copied();
        TaskContext {
            shared,
            worker,
            group: Cell::new(first.map_or(WorkgroupId::NONE, |m| m.group)),
            offset: Cell::new(first.map(|m| m.offset)),
            tick: Cell::new(0),
            user,
            _not_send: PhantomData,
        }
    }

    /// Worker executing the current item
    #[inline]
    pub fn worker_id(&self) -> WorkerId {
        self.worker
    }

    /// Workgroup the current item was taken from
    #[inline]
    pub fn workgroup_id(&self) -> WorkgroupId {
        self.group.get()
    }

    /// This worker's queue offset inside the current workgroup
    #[inline]
    pub fn group_offset(&self) -> Option<usize> {
        self.offset.get()
    }

    /// Downcast the user context given to `begin_execution_with`.
    pub fn user_context<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.user.as_deref().and_then(|u| u.downcast_ref::<T>())
    }

    /// Submit `work` to `group`.
    ///
    /// Goes to this worker's own queue when it is a member of `group`,
    /// otherwise (or when the own queue is full) to the group's mailbox.
    pub fn submit<F>(&self, group: WorkgroupId, work: F) -> SchedResult<()>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.shared.submit(self, group, SmallFn::new(work))
    }

    /// Submit to the current workgroup.
    pub fn submit_local<F>(&self, work: F) -> SchedResult<()>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.submit(self.workgroup_id(), work)
    }

    /// Submit a function pointer with its argument pack.
    pub fn submit_fn<A>(&self, group: WorkgroupId, func: fn(&TaskContext, A), args: A) -> SchedResult<()>
    where
        A: Send + 'static,
    {
        self.shared.submit(self, group, SmallFn::from_fn(func, args))
    }

    /// Submit a prebuilt work item (e.g. `SmallFn::from_waker`).
    pub fn submit_item(&self, group: WorkgroupId, item: WorkItem) -> SchedResult<()> {
        self.shared.submit(self, group, item)
    }

    /// Drive `future` to completion on `group`.
    pub fn spawn_future<F>(&self, group: WorkgroupId, future: F) -> SchedResult<FutureHandle>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        crate::future::spawn(&self.shared, group, future)
    }

    /// Run one iteration of the find-work loop. `true` if an item ran.
    pub fn busy_work(&self) -> bool {
        self.shared.find_work(self)
    }

    /// Run other work until `done()` holds.
    ///
    /// Returns `false` if the scheduler began shutting down first.
    pub fn busy_wait<C>(&self, mut done: C) -> bool
    where
        C: FnMut() -> bool,
    {
        while !done() {
            if self.shared.is_stopping() {
                return done();
            }
            if !self.busy_work() {
                std::hint::spin_loop();
                std::thread::yield_now();
            }
        }
        true
    }

    /// Workers in `group` (for splitting work)
    pub fn logical_divisor(&self, group: WorkgroupId) -> u32 {
        self.shared.group(group).worker_count().max(1)
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Switch to `group`/`offset`, returning the previous pair.
    #[inline]
    pub(crate) fn enter(&self, group: WorkgroupId, offset: usize) -> (WorkgroupId, Option<usize>) {
        (self.group.replace(group), self.offset.replace(Some(offset)))
    }

    #[inline]
    pub(crate) fn restore(&self, prev: (WorkgroupId, Option<usize>)) {
        self.group.set(prev.0);
        self.offset.set(prev.1);
    }

    /// Find-work iteration counter
    #[inline]
    pub(crate) fn next_tick(&self) -> u32 {
        let t = self.tick.get().wrapping_add(1);
        self.tick.set(t);
        t
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("worker", &self.worker)
            .field("group", &self.group.get())
            .field("offset", &self.offset.get())
            .finish()
    }
}
