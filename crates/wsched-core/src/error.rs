//! Error types for the wsched scheduler
//!
//! Queue primitives never produce these: a full queue or a lost steal race
//! is ordinary control flow reported through `bool`/`Option`. `SchedError`
//! covers scheduler lifecycle misuse, submission backpressure and thread
//! setup failures.

use core::fmt;

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Errors that can occur in scheduler operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedError {
    /// Operation requires a stopped scheduler (e.g. `create_group` while running)
    Running,

    /// Operation requires a running scheduler
    NotRunning,

    /// Target workgroup mailbox is full; the caller decides whether to retry
    MailboxFull,

    /// Workgroup handle does not name a registered group
    InvalidGroup,

    /// Workgroup id exceeds the configured maximum
    TooManyGroups,

    /// Configuration rejected by `SchedulerConfig::validate`
    InvalidConfig(&'static str),

    /// Failed to spawn a worker thread
    SpawnFailed,

    /// Failed to pin a worker thread to a CPU
    AffinityFailed,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedError::Running => write!(f, "scheduler is running"),
            SchedError::NotRunning => write!(f, "scheduler is not running"),
            SchedError::MailboxFull => write!(f, "workgroup mailbox full"),
            SchedError::InvalidGroup => write!(f, "invalid workgroup"),
            SchedError::TooManyGroups => write!(f, "too many workgroups"),
            SchedError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            SchedError::SpawnFailed => write!(f, "failed to spawn worker thread"),
            SchedError::AffinityFailed => write!(f, "failed to set thread affinity"),
        }
    }
}

impl std::error::Error for SchedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", SchedError::MailboxFull), "workgroup mailbox full");
        assert_eq!(
            format!("{}", SchedError::InvalidConfig("mailbox_capacity must be > 0")),
            "invalid config: mailbox_capacity must be > 0"
        );
    }

    #[test]
    fn test_error_is_std_error() {
        let e: Box<dyn std::error::Error> = Box::new(SchedError::Running);
        assert_eq!(e.to_string(), "scheduler is running");
    }
}
