//! Worker bookkeeping
//!
//! One `Worker` per OS thread index. Its memberships (one queue cursor per
//! workgroup it belongs to) are computed once at `begin_execution` and
//! sorted by priority, highest first, ties by group id. That order is the
//! scan order of the find-work loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use wsched_core::{CachePadded, SchedError, SchedResult, WorkerId, WorkgroupId};

use crate::parking::{new_parking, WorkerParking};
use crate::workgroup::Workgroup;

/// A worker's place in one workgroup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub group: WorkgroupId,
    /// Index of this worker's owner queue inside the group
    pub offset: usize,
    pub priority: u32,
}

/// Per-worker counters
#[derive(Default)]
pub struct WorkerStats {
    executed: AtomicU64,
    stolen: AtomicU64,
    from_mailbox: AtomicU64,
    parks: AtomicU64,
    panics: AtomicU64,
}

impl WorkerStats {
    #[inline]
    pub(crate) fn record_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_stolen(&self) {
        self.stolen.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_mailbox(&self) {
        self.from_mailbox.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_park(&self) {
        self.parks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            executed: self.executed.load(Ordering::Relaxed),
            stolen: self.stolen.load(Ordering::Relaxed),
            from_mailbox: self.from_mailbox.load(Ordering::Relaxed),
            parks: self.parks.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `WorkerStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    /// Work items run to completion (or panicked)
    pub executed: u64,
    /// Items taken from a sibling's queue
    pub stolen: u64,
    /// Items received from a mailbox
    pub from_mailbox: u64,
    /// Times the worker went to sleep
    pub parks: u64,
    /// Work items that panicked
    pub panics: u64,
}

impl std::ops::Add for WorkerStatsSnapshot {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        WorkerStatsSnapshot {
            executed: self.executed + rhs.executed,
            stolen: self.stolen + rhs.stolen,
            from_mailbox: self.from_mailbox + rhs.from_mailbox,
            parks: self.parks + rhs.parks,
            panics: self.panics + rhs.panics,
        }
    }
}

pub struct Worker {
    id: WorkerId,
    memberships: Box<[Membership]>,
    parking: Box<dyn WorkerParking>,
    stats: CachePadded<WorkerStats>,
}

impl Worker {
    /// Build worker `index`, deriving its memberships from `groups`.
    pub fn new<T>(index: usize, groups: &[Option<Workgroup<T>>]) -> Self {
        Worker {
            id: WorkerId::new(index as u32),
            memberships: memberships_for(index, groups),
            parking: new_parking(),
            stats: CachePadded::new(WorkerStats::default()),
        }
    }

    #[inline]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Memberships in scan order (priority descending)
    #[inline]
    pub fn memberships(&self) -> &[Membership] {
        &self.memberships
    }

    /// Queue offset of this worker inside `group`
    #[inline]
    pub fn offset_in(&self, group: WorkgroupId) -> Option<usize> {
        self.memberships
            .iter()
            .find(|m| m.group == group)
            .map(|m| m.offset)
    }

    #[inline]
    pub fn parking(&self) -> &dyn WorkerParking {
        &*self.parking
    }

    #[inline]
    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("memberships", &self.memberships)
            .finish()
    }
}

/// Groups containing worker `index`, highest priority first, ties by id.
pub fn memberships_for<T>(index: usize, groups: &[Option<Workgroup<T>>]) -> Box<[Membership]> {
    let mut memberships: Vec<Membership> = groups
        .iter()
        .flatten()
        .filter_map(|g| {
            g.local_offset(index).map(|offset| Membership {
                group: g.id(),
                offset,
                priority: g.priority(),
            })
        })
        .collect();
    memberships.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.group.cmp(&b.group)));
    memberships.into_boxed_slice()
}

/// Spawn the OS thread for worker `index`, named `{prefix}-{index}`.
pub fn spawn_worker<F>(prefix: &str, index: usize, worker_fn: F) -> SchedResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{}-{}", prefix, index))
        .spawn(worker_fn)
        .map_err(|_| SchedError::SpawnFailed)
}
