//! # wsched-runtime
//!
//! Thread-level runtime for the wsched scheduler.
//!
//! This crate provides:
//! - Scheduler configuration (defaults + `WSCHED_*` environment overrides)
//! - Workgroups: per-worker owner queues, a mailbox, a pending counter
//! - Worker threads, CPU pinning and futex-based parking
//! - The find-work loop (own queue, mailbox, steal, park)
//! - Task contexts, future tasks and `parallel_for`

pub mod config;
pub mod parking;
pub mod affinity;
pub mod workgroup;
pub mod worker;
pub mod context;
pub mod scheduler;
pub mod future;
pub mod parallel_for;

// Re-exports
pub use config::{ConfigError, SchedulerConfig};
pub use context::{TaskContext, UserContext, WorkItem};
pub use future::FutureHandle;
pub use parallel_for::{parallel_for, parallel_for_range, split_range};
pub use parking::{new_parking, WorkerParking};
pub use scheduler::{EntryHook, Scheduler, SchedulerStats};
pub use worker::{Membership, Worker, WorkerStatsSnapshot};
pub use workgroup::{GroupDesc, Workgroup};
