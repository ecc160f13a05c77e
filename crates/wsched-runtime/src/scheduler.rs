//! Scheduler: workgroup registry, worker threads and the find-work loop
//!
//! # Lifecycle
//!
//! ```text
//! new ──► create_group* ──► begin_execution ──► running ──► end_execution ─┐
//!  ▲                                                                        │
//!  └──────────────────────────── (groups may be edited again) ◄─────────────┘
//! ```
//!
//! Group topology is frozen while running: `create_group` and `clear_group`
//! return `SchedError::Running`. `end_execution` does not drain; items
//! still queued are dropped. Call `wait_for_tasks` first if delivery
//! matters.
//!
//! # Find-work loop (per worker)
//!
//! Over the worker's memberships in priority order:
//!
//! 1. pop own queue (LIFO)
//! 2. receive from the group mailbox
//! 3. steal from sibling queues (FIFO)
//! 4. spin `idle_spins` times, then park until signalled or `park_timeout`
//!
//! Every `MAILBOX_CHECK_INTERVAL`-th iteration step 2 runs first, so a
//! worker that keeps refilling its own queue cannot starve cross-group
//! hand-offs.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use wsched_core::constants::MAX_WORKERS;
use wsched_core::kprint::{self, LogLevel};
use wsched_core::{kdebug, kerror, kinfo, ktrace, kwarn};
use wsched_core::{SchedError, SchedResult, SmallFn, WorkerId, WorkgroupId};

use crate::affinity;
use crate::config::SchedulerConfig;
use crate::context::{TaskContext, UserContext, WorkItem};
use crate::future::{self, FutureHandle};
use crate::worker::{spawn_worker, Membership, Worker, WorkerStatsSnapshot};
use crate::workgroup::{GroupDesc, Workgroup};

/// Check mailboxes first every N find-work iterations (Go uses 61)
const MAILBOX_CHECK_INTERVAL: u32 = 61;

/// Per-thread hook run once before a worker enters its loop
pub type EntryHook = Arc<dyn Fn(&TaskContext) + Send + Sync>;

/// State shared by the worker threads of one `begin_execution` run
pub(crate) struct Shared {
    config: SchedulerConfig,
    groups: Box<[Option<Workgroup<WorkItem>>]>,
    workers: Box<[Worker]>,
    stop: AtomicBool,
    started: AtomicUsize,
}

impl Shared {
    #[inline]
    pub(crate) fn group(&self, id: WorkgroupId) -> &Workgroup<WorkItem> {
        match self.groups.get(id.index()).and_then(Option::as_ref) {
            Some(g) => g,
            None => panic!("invalid workgroup {}", id),
        }
    }

    #[inline]
    pub(crate) fn worker(&self, id: WorkerId) -> &Worker {
        match self.workers.get(id.index()) {
            Some(w) => w,
            None => panic!("invalid worker {}", id),
        }
    }

    #[inline]
    pub(crate) fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Route an item from a worker: own queue when a member, else mailbox.
    pub(crate) fn submit(
        &self,
        ctx: &TaskContext,
        group: WorkgroupId,
        item: WorkItem,
    ) -> SchedResult<()> {
        if self.is_stopping() {
            return Err(SchedError::NotRunning);
        }
        let wg = self.group(group);
        match self.try_submit(ctx, wg, item) {
            Ok(()) => Ok(()),
            Err(_dropped) => {
                kwarn!("mailbox of workgroup {} full, dropping work item", wg.id());
                Err(SchedError::MailboxFull)
            }
        }
    }

    /// `submit` that hands the item back when both the own queue and the
    /// mailbox refuse it.
    pub(crate) fn try_submit(
        &self,
        ctx: &TaskContext,
        wg: &Workgroup<WorkItem>,
        item: WorkItem,
    ) -> Result<(), WorkItem> {
        let item = match self.worker(ctx.worker_id()).offset_in(wg.id()) {
            // Safety: TaskContext is !Send, so we are on the thread that
            // owns queue `offset`.
            Some(offset) => match unsafe { wg.push_work_to_worker(offset, item) } {
                Ok(()) => {
                    self.notify(wg);
                    return Ok(());
                }
                Err(item) => item,
            },
            None => item,
        };
        self.try_post(wg, item)
    }

    /// Post an item to `group`'s mailbox.
    pub(crate) fn post(&self, group: WorkgroupId, item: WorkItem) -> SchedResult<()> {
        if self.is_stopping() {
            return Err(SchedError::NotRunning);
        }
        self.post_to(self.group(group), item)
    }

    fn post_to(&self, wg: &Workgroup<WorkItem>, item: WorkItem) -> SchedResult<()> {
        match self.try_post(wg, item) {
            Ok(()) => Ok(()),
            Err(_dropped) => {
                kwarn!("mailbox of workgroup {} full, dropping work item", wg.id());
                Err(SchedError::MailboxFull)
            }
        }
    }

    /// Mailbox post that hands the item back when full.
    pub(crate) fn try_post(&self, wg: &Workgroup<WorkItem>, item: WorkItem) -> Result<(), WorkItem> {
        wg.submit_to_mailbox(item)?;
        self.notify(wg);
        Ok(())
    }

    /// Wake one parked member of `wg`, if any.
    fn notify(&self, wg: &Workgroup<WorkItem>) {
        // Pairs with the fence in `park_worker`: either we see the sleeper
        // or it sees our item.
        fence(Ordering::SeqCst);
        if wg.sleepers() == 0 {
            return;
        }
        let n = wg.worker_count() as usize;
        let start = wg.next_cursor();
        for i in 0..n {
            let w = wg.worker_start() as usize + (start + i) % n;
            let parking = self.workers[w].parking();
            if parking.parked_count() > 0 {
                parking.wake_one();
                return;
            }
        }
    }

    fn wake_all(&self) {
        for w in self.workers.iter() {
            w.parking().wake_all();
        }
    }

    /// One find-work iteration for the worker owning `ctx`.
    pub(crate) fn find_work(&self, ctx: &TaskContext) -> bool {
        let worker = self.worker(ctx.worker_id());
        let memberships = worker.memberships();
        if memberships.is_empty() {
            return false;
        }

        if ctx.next_tick() % MAILBOX_CHECK_INTERVAL == 0 && self.receive_mailbox(ctx, worker) {
            return true;
        }

        for m in memberships {
            // Safety: `ctx` proves we are the owner of `m.offset`.
            if let Some(item) = unsafe { self.group(m.group).pop_work_from_worker(m.offset) } {
                self.execute(ctx, m, item);
                return true;
            }
        }

        if self.receive_mailbox(ctx, worker) {
            return true;
        }

        for m in memberships {
            let wg = self.group(m.group);
            if !wg.has_work() {
                continue;
            }
            if let Some(item) = wg.steal_work(Some(m.offset)) {
                worker.stats().record_stolen();
                self.execute(ctx, m, item);
                return true;
            }
        }

        false
    }

    fn receive_mailbox(&self, ctx: &TaskContext, worker: &Worker) -> bool {
        for m in worker.memberships() {
            if let Some(item) = self.group(m.group).receive_from_mailbox() {
                worker.stats().record_mailbox();
                self.execute(ctx, m, item);
                return true;
            }
        }
        false
    }

    fn execute(&self, ctx: &TaskContext, m: &Membership, item: WorkItem) {
        let prev = ctx.enter(m.group, m.offset);
        let result = panic::catch_unwind(AssertUnwindSafe(|| item.call(ctx)));
        ctx.restore(prev);
        self.group(m.group).sink_one_work();

        let stats = self.worker(ctx.worker_id()).stats();
        stats.record_executed();
        if let Err(payload) = result {
            stats.record_panic();
            kerror!(
                "work item in workgroup {} panicked: {}",
                m.group,
                panic_message(payload.as_ref())
            );
        }
    }

    fn has_queued_work(&self, worker: &Worker) -> bool {
        worker
            .memberships()
            .iter()
            .any(|m| self.group(m.group).queued() > 0)
    }

    /// Park `worker` unless work or shutdown shows up on the re-check.
    /// Returns `true` if woken by a signal.
    fn park_worker(&self, worker: &Worker) -> bool {
        for m in worker.memberships() {
            self.group(m.group).enter_sleep();
        }
        let parking = worker.parking();
        let token = parking.prepare_park();
        fence(Ordering::SeqCst);

        let woken = if self.is_stopping() || self.has_queued_work(worker) {
            parking.cancel_park(token);
            false
        } else {
            worker.stats().record_park();
            ktrace!("parking");
            parking.park(token, Some(self.config.park_timeout))
        };

        for m in worker.memberships() {
            self.group(m.group).exit_sleep();
        }
        woken
    }

    /// After a wake-up found work, pass the baton if more is queued.
    fn chain_wake(&self, worker: &Worker) {
        for m in worker.memberships() {
            let wg = self.group(m.group);
            if wg.queued() > 0 {
                self.notify(wg);
                return;
            }
        }
    }

    fn pending_total(&self) -> i64 {
        self.groups.iter().flatten().map(|g| g.pending().max(0)).sum()
    }

    fn queued_total(&self) -> usize {
        self.groups.iter().flatten().map(|g| g.queued()).sum()
    }

    fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            workers: self.workers.iter().map(|w| w.stats().snapshot()).collect(),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

fn worker_main_loop(
    shared: Arc<Shared>,
    index: usize,
    cpu: Option<usize>,
    entry: EntryHook,
    user: Option<UserContext>,
) {
    if let Some(cpu) = cpu {
        match affinity::pin_current_thread(cpu) {
            Ok(()) => kdebug!("pinned to cpu {}", cpu),
            Err(e) => kwarn!("cannot pin to cpu {}: {}", cpu, e),
        }
    }

    let ctx = TaskContext::new(shared.clone(), WorkerId::new(index as u32), user);
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| entry(&ctx))) {
        kerror!("entry hook panicked: {}", panic_message(payload.as_ref()));
    }
    shared.started.fetch_add(1, Ordering::Release);

    let worker = shared.worker(ctx.worker_id());
    let idle_spins = shared.config.idle_spins;
    kdebug!("started ({} memberships)", worker.memberships().len());

    let mut idle: u32 = 0;
    let mut just_woke = false;
    while !shared.is_stopping() {
        if shared.find_work(&ctx) {
            idle = 0;
            if just_woke {
                just_woke = false;
                shared.chain_wake(worker);
            }
            continue;
        }

        if idle < idle_spins {
            // Quick spin first (catch fast submit -> run cycles)
            idle += 1;
            for _ in 0..32 {
                std::hint::spin_loop();
            }
            thread::yield_now();
            continue;
        }

        idle = 0;
        just_woke = shared.park_worker(worker);
    }

    kdebug!("shutdown signaled, exiting");
}

/// Aggregated per-worker counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Indexed by worker id
    pub workers: Vec<WorkerStatsSnapshot>,
}

impl SchedulerStats {
    pub fn total(&self) -> WorkerStatsSnapshot {
        self.workers
            .iter()
            .copied()
            .fold(WorkerStatsSnapshot::default(), |acc, s| acc + s)
    }
}

struct Runtime {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

/// Work-stealing scheduler
pub struct Scheduler {
    config: SchedulerConfig,
    /// Indexed by workgroup id
    descs: Vec<Option<GroupDesc>>,
    runtime: Option<Runtime>,
    last_stats: SchedulerStats,
}

impl Scheduler {
    /// Create a stopped scheduler with no workgroups.
    pub fn new(config: SchedulerConfig) -> SchedResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            descs: Vec::new(),
            runtime: None,
            last_stats: SchedulerStats::default(),
        })
    }

    /// Create with `SchedulerConfig::from_env()`.
    pub fn from_env() -> SchedResult<Self> {
        Self::new(SchedulerConfig::from_env())
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    // ------------------------------------------------------------------
    // Topology
    // ------------------------------------------------------------------

    /// Register or replace workgroup `id` bound to workers
    /// `[worker_start, worker_start + worker_count)`.
    pub fn create_group(
        &mut self,
        id: WorkgroupId,
        worker_start: u32,
        worker_count: u32,
        priority: u32,
    ) -> SchedResult<()> {
        if self.is_running() {
            return Err(SchedError::Running);
        }
        if id.is_none() || id.index() >= self.config.max_workgroups {
            return Err(SchedError::TooManyGroups);
        }
        if worker_count == 0 {
            return Err(SchedError::InvalidConfig("worker_count must be > 0"));
        }
        if worker_start as usize + worker_count as usize > MAX_WORKERS {
            return Err(SchedError::InvalidConfig("worker range exceeds MAX_WORKERS"));
        }

        if self.descs.len() <= id.index() {
            self.descs.resize(id.index() + 1, None);
        }
        let desc = GroupDesc { worker_start, worker_count, priority };
        if self.descs[id.index()].replace(desc).is_some() {
            kdebug!("workgroup {} replaced: {:?}", id, desc);
        }
        Ok(())
    }

    /// Register a workgroup under the lowest free id.
    pub fn create_group_auto(
        &mut self,
        worker_start: u32,
        worker_count: u32,
        priority: u32,
    ) -> SchedResult<WorkgroupId> {
        let free = (0..self.config.max_workgroups)
            .find(|&i| self.descs.get(i).map_or(true, Option::is_none))
            .ok_or(SchedError::TooManyGroups)?;
        let id = WorkgroupId::new(free as u32);
        self.create_group(id, worker_start, worker_count, priority)?;
        Ok(id)
    }

    /// Remove workgroup `id`; the id becomes free again.
    pub fn clear_group(&mut self, id: WorkgroupId) -> SchedResult<()> {
        if self.is_running() {
            return Err(SchedError::Running);
        }
        match self.descs.get_mut(id.index()).and_then(Option::take) {
            Some(_) => Ok(()),
            None => Err(SchedError::InvalidGroup),
        }
    }

    fn desc(&self, id: WorkgroupId) -> GroupDesc {
        match self.descs.get(id.index()).copied().flatten() {
            Some(d) => d,
            None => panic!("invalid workgroup {}", id),
        }
    }

    /// Total worker threads: one past the highest worker index of any group
    pub fn worker_count(&self) -> u32 {
        self.descs.iter().flatten().map(GroupDesc::worker_end).max().unwrap_or(0)
    }

    /// Workers bound to `group`
    pub fn group_worker_count(&self, group: WorkgroupId) -> u32 {
        self.desc(group).worker_count
    }

    /// First worker index of `group`
    pub fn worker_start_idx(&self, group: WorkgroupId) -> u32 {
        self.desc(group).worker_start
    }

    /// Number of parts to split `group`'s work into (never 0)
    pub fn logical_divisor(&self, group: WorkgroupId) -> u32 {
        self.group_worker_count(group).max(1)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start one thread per worker index.
    pub fn begin_execution(&mut self) -> SchedResult<()> {
        self.begin_execution_with(|_: &TaskContext| {}, None)
    }

    /// Start workers, running `entry` once on each before its loop.
    ///
    /// `user_context` is reachable from every task via
    /// `TaskContext::user_context`. Returns after every entry hook ran.
    pub fn begin_execution_with<E>(
        &mut self,
        entry: E,
        user_context: Option<UserContext>,
    ) -> SchedResult<()>
    where
        E: Fn(&TaskContext) + Send + Sync + 'static,
    {
        if self.is_running() {
            return Err(SchedError::Running);
        }
        let worker_count = self.worker_count() as usize;
        if worker_count == 0 {
            return Err(SchedError::InvalidGroup);
        }

        kprint::init();
        if self.config.debug_logging || cfg!(feature = "debug-logging") {
            kprint::set_log_level(LogLevel::Debug);
        }

        let config = &self.config;
        let groups: Box<[Option<Workgroup<WorkItem>>]> = self
            .descs
            .iter()
            .enumerate()
            .map(|(i, d)| {
                d.map(|d| {
                    Workgroup::new(
                        WorkgroupId::new(i as u32),
                        d,
                        config.queue_kind,
                        config.queue_capacity,
                        config.mailbox_capacity,
                    )
                })
            })
            .collect();
        let workers: Box<[Worker]> = (0..worker_count).map(|i| Worker::new(i, &groups)).collect();
        for w in workers.iter().filter(|w| w.memberships().is_empty()) {
            kwarn!("worker {} belongs to no workgroup and will stay idle", w.id());
        }

        let shared = Arc::new(Shared {
            config: config.clone(),
            groups,
            workers,
            stop: AtomicBool::new(false),
            started: AtomicUsize::new(0),
        });

        let cpus = if config.pin_workers {
            affinity::allowed_cpus()
        } else {
            Vec::new()
        };
        let entry: EntryHook = Arc::new(entry);

        let mut threads = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let shared_i = shared.clone();
            let entry = entry.clone();
            let user = user_context.clone();
            let cpu = affinity::cpu_for_worker(i, &cpus);
            let spawned = spawn_worker(&config.thread_name_prefix, i, move || {
                worker_main_loop(shared_i, i, cpu, entry, user)
            });
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    kerror!("failed to spawn worker {}", i);
                    shutdown(&shared, threads);
                    return Err(e);
                }
            }
        }

        while shared.started.load(Ordering::Acquire) < worker_count {
            thread::yield_now();
        }

        kinfo!(
            "begin_execution: {} workers, {} workgroups, {} queues",
            worker_count,
            self.descs.iter().flatten().count(),
            config.queue_kind
        );
        self.runtime = Some(Runtime { shared, threads });
        Ok(())
    }

    /// Stop and join all workers. Queued items are dropped unexecuted.
    pub fn end_execution(&mut self) -> SchedResult<()> {
        let rt = self.runtime.take().ok_or(SchedError::NotRunning)?;
        let abandoned = rt.shared.queued_total();
        shutdown(&rt.shared, rt.threads);
        self.last_stats = rt.shared.stats();
        if abandoned > 0 {
            kwarn!("end_execution: abandoning {} queued work items", abandoned);
        }
        kinfo!("end_execution: {:?}", self.last_stats.total());
        Ok(())
    }

    /// Block the calling (non-worker) thread until every submitted item has
    /// run. Calling this from inside a task never returns.
    pub fn wait_for_tasks(&self) -> SchedResult<()> {
        let shared = self.shared()?;
        let mut spins = 0u32;
        while shared.pending_total() > 0 && !shared.is_stopping() {
            for wg in shared.groups.iter().flatten() {
                if wg.queued() > 0 {
                    shared.notify(wg);
                }
            }
            spins += 1;
            if spins < 64 {
                thread::yield_now();
            } else {
                thread::sleep(Duration::from_micros(100));
            }
        }
        Ok(())
    }

    fn shared(&self) -> SchedResult<&Arc<Shared>> {
        self.runtime
            .as_ref()
            .map(|rt| &rt.shared)
            .ok_or(SchedError::NotRunning)
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Submit from inside a task; see `TaskContext::submit`.
    pub fn submit<F>(&self, ctx: &TaskContext, group: WorkgroupId, work: F) -> SchedResult<()>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.submit_item(ctx, group, SmallFn::new(work))
    }

    pub fn submit_item(&self, ctx: &TaskContext, group: WorkgroupId, item: WorkItem) -> SchedResult<()> {
        let shared = self.shared()?;
        assert!(
            Arc::ptr_eq(shared, ctx.shared()),
            "task context belongs to another scheduler"
        );
        shared.submit(ctx, group, item)
    }

    /// Submit from a thread that is not a worker; always uses the mailbox.
    pub fn post<F>(&self, group: WorkgroupId, work: F) -> SchedResult<()>
    where
        F: FnOnce(&TaskContext) + Send + 'static,
    {
        self.post_item(group, SmallFn::new(work))
    }

    /// Post a function pointer with its argument pack.
    pub fn post_fn<A>(&self, group: WorkgroupId, func: fn(&TaskContext, A), args: A) -> SchedResult<()>
    where
        A: Send + 'static,
    {
        self.post_item(group, SmallFn::from_fn(func, args))
    }

    pub fn post_item(&self, group: WorkgroupId, item: WorkItem) -> SchedResult<()> {
        self.shared()?.post(group, item)
    }

    /// Drive `future` on `group`'s workers; wake-ups re-post it.
    pub fn spawn_future<F>(&self, group: WorkgroupId, future: F) -> SchedResult<FutureHandle>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        future::spawn(self.shared()?, group, future)
    }

    /// Run one find-work iteration on the worker owning `ctx`.
    pub fn busy_work(&self, ctx: &TaskContext) -> bool {
        ctx.busy_work()
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Live counters while running, otherwise those of the last run.
    pub fn stats(&self) -> SchedulerStats {
        match &self.runtime {
            Some(rt) => rt.shared.stats(),
            None => self.last_stats.clone(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.end_execution();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("groups", &self.descs)
            .field("running", &self.is_running())
            .finish()
    }
}

fn shutdown(shared: &Shared, threads: Vec<JoinHandle<()>>) {
    shared.stop.store(true, Ordering::SeqCst);
    shared.wake_all();
    for handle in threads {
        if handle.join().is_err() {
            kerror!("worker thread panicked");
        }
    }
}
