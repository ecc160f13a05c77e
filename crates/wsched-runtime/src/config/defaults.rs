//! Library defaults for `SchedulerConfig`

use wsched_core::constants;
use wsched_core::QueueKind;

pub const QUEUE_KIND: QueueKind = QueueKind::ChaseLev;
pub const QUEUE_CAPACITY: usize = constants::DEFAULT_QUEUE_CAPACITY;
pub const MAILBOX_CAPACITY: usize = constants::DEFAULT_MAILBOX_CAPACITY;
pub const MAX_WORKGROUPS: usize = constants::DEFAULT_MAX_WORKGROUPS;
pub const IDLE_SPINS: u32 = 8;
pub const PARK_TIMEOUT_MS: u64 = 100;
pub const PIN_WORKERS: bool = false;
pub const THREAD_NAME_PREFIX: &str = "wsched-worker";
pub const DEBUG_LOGGING: bool = false;
