//! # wsched-core
//!
//! Core types and lock-free queue primitives for the wsched scheduler.
//!
//! This crate is platform-agnostic and spawns no threads.
//! Worker threads, parking and the scheduling policy live in `wsched-runtime`.
//!
//! ## Modules
//!
//! - `id` - Worker and workgroup handles
//! - `error` - Error types
//! - `kprint` - Kernel-style leveled logging macros
//! - `env` - Environment variable utilities
//! - `cache_padded` - Cache-line padding wrapper for contended atomics
//! - `alloc` - Block allocator capability used for queue buffers
//! - `small_fn` - Type-erased fixed-size work item
//! - `queue` - Owner-queue trait shared by the deque and the SPMC ring
//! - `chase_lev` - Chase-Lev work-stealing deque (growable)
//! - `mpmc_ring` - Bounded MPMC ring (Vyukov), used as a workgroup mailbox
//! - `spmc_ring` - Bounded SPMC ring, fixed-capacity owner queue

pub mod id;
pub mod error;
pub mod kprint;
pub mod env;
pub mod cache_padded;
pub mod alloc;
pub mod small_fn;
pub mod queue;
pub mod chase_lev;
pub mod mpmc_ring;
pub mod spmc_ring;

// Re-exports for convenience
pub use id::{WorkerId, WorkgroupId};
pub use error::{SchedError, SchedResult};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str};
pub use cache_padded::CachePadded;
pub use alloc::{BlockAllocator, SystemAllocator};
pub use small_fn::SmallFn;
pub use queue::{OwnerQueue, QueueKind};
pub use chase_lev::ChaseLevQueue;
pub use mpmc_ring::MpmcRing;
pub use spmc_ring::SpmcRing;

/// Scheduler-wide constants
pub mod constants {
    /// Default initial capacity of a per-worker owner queue
    pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

    /// Default capacity of a workgroup mailbox
    pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

    /// Default upper bound on registered workgroups
    pub const DEFAULT_MAX_WORKGROUPS: usize = 32;

    /// Hard upper bound on worker threads
    pub const MAX_WORKERS: usize = 256;

    /// Inline payload bytes available to a `SmallFn` before spilling to the heap
    pub const INLINE_TASK_BYTES: usize = 48;
}

/// Round `n` up to the next power of two (minimum 1).
#[inline]
pub const fn next_pow2(n: usize) -> usize {
    if n <= 1 {
        1
    } else {
        n.next_power_of_two()
    }
}
