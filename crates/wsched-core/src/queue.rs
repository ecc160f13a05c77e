//! Owner queue abstraction
//!
//! A workgroup keeps one owner queue per member worker. Two implementations
//! share the same contract:
//!
//! - `ChaseLevQueue` - growable circular array, push only fails on allocation failure
//! - `SpmcRing` - fixed capacity, push fails when full (backpressure)
//!
//! The owning worker pushes and pops at one end (LIFO); any thread may
//! steal from the other end (FIFO).

use core::fmt;

use crate::chase_lev::ChaseLevQueue;
use crate::spmc_ring::SpmcRing;

/// Single-owner, multi-thief queue.
///
/// All implementations must be thread-safe (Send + Sync).
pub trait OwnerQueue<T>: Send + Sync {
    /// Push at the owner's end. Hands the item back when it cannot be stored.
    ///
    /// # Safety
    ///
    /// Only the owning thread may call `push` and `pop`, and never
    /// concurrently with each other.
    unsafe fn push(&self, item: T) -> Result<(), T>;

    /// Pop the most recently pushed item.
    ///
    /// # Safety
    ///
    /// Owner thread only; see `push`.
    unsafe fn pop(&self) -> Option<T>;

    /// Take the least recently pushed item. Callable from any thread.
    ///
    /// `None` covers both "empty" and "lost a race"; callers move on to
    /// another victim either way.
    fn steal(&self) -> Option<T>;

    /// Approximate number of queued items (racy under concurrent use)
    fn len(&self) -> usize;

    /// Check if empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current capacity
    fn capacity(&self) -> usize;
}

/// Which owner queue a workgroup builds for its workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueKind {
    /// Growable Chase-Lev deque
    #[default]
    ChaseLev,
    /// Fixed-capacity SPMC ring
    SpmcRing,
}

impl QueueKind {
    /// Parse "chase-lev" / "chaselev" / "spmc" style names (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', '_'], "").as_str() {
            "chaselev" | "deque" => Some(QueueKind::ChaseLev),
            "spmc" | "spmcring" | "ring" => Some(QueueKind::SpmcRing),
            _ => None,
        }
    }

    /// Build an empty queue of this kind.
    ///
    /// `capacity` is the initial capacity for the deque and the fixed
    /// capacity for the ring; both round up to a power of two.
    pub fn build<T: Send + 'static>(self, capacity: usize) -> Box<dyn OwnerQueue<T>> {
        match self {
            QueueKind::ChaseLev => Box::new(ChaseLevQueue::with_capacity(capacity)),
            QueueKind::SpmcRing => Box::new(SpmcRing::new(capacity)),
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueKind::ChaseLev => write!(f, "chase-lev"),
            QueueKind::SpmcRing => write!(f, "spmc-ring"),
        }
    }
}
