//! # wsched - Workgroup Work-Stealing Scheduler
//!
//! Runs short, non-blocking work items on a fixed pool of OS threads.
//!
//! ## Features
//!
//! - **Workgroups**: contiguous worker ranges with a priority; a worker may
//!   belong to several groups and serves the highest priority first
//! - **Work stealing**: per-worker Chase-Lev deque (or bounded SPMC ring),
//!   owner LIFO, thieves FIFO
//! - **Mailboxes**: bounded MPMC ring per group for cross-group and
//!   external submissions
//! - **Small work items**: 56-byte type-erased closures, no allocation for
//!   small captures
//! - **Idle parking**: futex sleep with lost-wakeup-free re-check
//! - **Futures and fork-join**: `spawn_future`, `parallel_for`
//!
//! ## Quick Start
//!
//! ```ignore
//! use wsched::{Scheduler, SchedulerConfig, WorkgroupId};
//!
//! let mut sched = Scheduler::new(SchedulerConfig::default())?;
//! let io = sched.create_group_auto(0, 2, 1)?;   // workers 0-1, priority 1
//! let cpu = sched.create_group_auto(2, 6, 0)?;  // workers 2-7
//! sched.begin_execution()?;
//!
//! sched.post(cpu, move |ctx| {
//!     // Runs on worker 2..8; children go to this worker's own queue.
//!     ctx.submit_local(|_| heavy_step())?;
//!     // Cross-group hand-off goes through `io`'s mailbox.
//!     ctx.submit(io, |_| flush())?;
//! })?;
//!
//! sched.wait_for_tasks()?;
//! sched.end_execution()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      User Code                              │
//! │        post(), ctx.submit(), parallel_for, spawn_future     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Scheduler                              │
//! │     group registry, lifecycle, find-work loop, parking      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │ Workgroup │      │ Workgroup │      │ Workgroup │
//!    │ queues[]  │      │ queues[]  │      │ queues[]  │
//!    │ mailbox   │      │ mailbox   │      │ mailbox   │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │                 Worker threads 0..N                     │
//!    │        own pop -> mailbox -> steal -> spin -> park      │
//!    └─────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use wsched_core::{
    BlockAllocator,
    ChaseLevQueue,
    MpmcRing,
    OwnerQueue,
    QueueKind,
    SchedError,
    SchedResult,
    SmallFn,
    SpmcRing,
    SystemAllocator,
    WorkerId,
    WorkgroupId,
};

// Re-export kprint macros for debug logging
pub use wsched_core::{kprint, kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use wsched_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use wsched_core::{env_get, env_get_bool, env_get_opt, env_get_str};

// Re-export runtime types
pub use wsched_runtime::{
    parallel_for,
    parallel_for_range,
    ConfigError,
    FutureHandle,
    Scheduler,
    SchedulerConfig,
    SchedulerStats,
    TaskContext,
    UserContext,
    WorkItem,
    WorkerStatsSnapshot,
};

/// Common imports for task code
pub mod prelude {
    pub use crate::{
        parallel_for, parallel_for_range, Scheduler, SchedulerConfig, SchedError, SchedResult,
        TaskContext, WorkgroupId,
    };
}

/// Run `f` on a scheduler with a single workgroup spanning `workers`
/// threads, then drain and stop it.
///
/// `f` runs on the calling thread and may `post` work to the returned
/// group. Returns what `f` returns.
pub fn run_with<F, T>(config: SchedulerConfig, workers: u32, f: F) -> SchedResult<T>
where
    F: FnOnce(&Scheduler, WorkgroupId) -> T,
{
    let mut sched = Scheduler::new(config)?;
    let group = sched.create_group_auto(0, workers, 0)?;
    sched.begin_execution()?;
    let result = f(&sched, group);
    sched.wait_for_tasks()?;
    sched.end_execution()?;
    Ok(result)
}
