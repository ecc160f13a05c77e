//! Scheduler configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (`from_env` only)
//! 3. Library defaults (`defaults.rs`)
//!
//! # Example
//!
//! ```rust,ignore
//! use wsched_runtime::config::SchedulerConfig;
//! use wsched_core::QueueKind;
//!
//! let config = SchedulerConfig::from_env()
//!     .queue_kind(QueueKind::SpmcRing)
//!     .mailbox_capacity(4096);
//! ```

pub mod defaults;

use std::time::Duration;
use wsched_core::constants::MAX_WORKERS;
use wsched_core::env::{env_get, env_get_bool, env_get_opt, env_get_str};
use wsched_core::{QueueKind, SchedError};

/// Scheduler configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Owner queue implementation used by every workgroup
    pub queue_kind: QueueKind,
    /// Initial deque capacity, or fixed ring capacity
    pub queue_capacity: usize,
    /// Per-workgroup mailbox capacity
    pub mailbox_capacity: usize,
    /// Upper bound on workgroup ids
    pub max_workgroups: usize,
    /// Find-work attempts before a worker parks
    pub idle_spins: u32,
    /// Upper bound on one park; bounds the cost of a missed wake
    pub park_timeout: Duration,
    /// Pin worker `i` to CPU `i % ncpus`
    pub pin_workers: bool,
    /// Worker threads are named `{prefix}-{index}`
    pub thread_name_prefix: String,
    /// Raise the log level to debug on `begin_execution`
    pub debug_logging: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl SchedulerConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `WSCHED_QUEUE_KIND` - `chase-lev` or `spmc`
    /// - `WSCHED_QUEUE_CAPACITY` - Owner queue capacity
    /// - `WSCHED_MAILBOX_CAPACITY` - Mailbox capacity
    /// - `WSCHED_MAX_WORKGROUPS` - Maximum number of workgroups
    /// - `WSCHED_IDLE_SPINS` - Find-work attempts before parking
    /// - `WSCHED_PARK_TIMEOUT_MS` - Park timeout in milliseconds
    /// - `WSCHED_PIN_WORKERS` - Pin workers to CPUs (0/1)
    /// - `WSCHED_THREAD_NAME` - Worker thread name prefix
    /// - `WSCHED_DEBUG` - Enable debug logging (0/1)
    pub fn from_env() -> Self {
        Self {
            queue_kind: env_get_opt::<String>("WSCHED_QUEUE_KIND")
                .and_then(|s| QueueKind::parse(&s))
                .unwrap_or(defaults::QUEUE_KIND),
            queue_capacity: env_get("WSCHED_QUEUE_CAPACITY", defaults::QUEUE_CAPACITY),
            mailbox_capacity: env_get("WSCHED_MAILBOX_CAPACITY", defaults::MAILBOX_CAPACITY),
            max_workgroups: env_get("WSCHED_MAX_WORKGROUPS", defaults::MAX_WORKGROUPS),
            idle_spins: env_get("WSCHED_IDLE_SPINS", defaults::IDLE_SPINS),
            park_timeout: Duration::from_millis(env_get(
                "WSCHED_PARK_TIMEOUT_MS",
                defaults::PARK_TIMEOUT_MS,
            )),
            pin_workers: env_get_bool("WSCHED_PIN_WORKERS", defaults::PIN_WORKERS),
            thread_name_prefix: env_get_str("WSCHED_THREAD_NAME", defaults::THREAD_NAME_PREFIX),
            debug_logging: env_get_bool("WSCHED_DEBUG", defaults::DEBUG_LOGGING),
        }
    }

    /// Create config with library defaults (no env override).
    /// Useful for testing or when you want full control.
    pub fn new() -> Self {
        Self {
            queue_kind: defaults::QUEUE_KIND,
            queue_capacity: defaults::QUEUE_CAPACITY,
            mailbox_capacity: defaults::MAILBOX_CAPACITY,
            max_workgroups: defaults::MAX_WORKGROUPS,
            idle_spins: defaults::IDLE_SPINS,
            park_timeout: Duration::from_millis(defaults::PARK_TIMEOUT_MS),
            pin_workers: defaults::PIN_WORKERS,
            thread_name_prefix: defaults::THREAD_NAME_PREFIX.to_string(),
            debug_logging: defaults::DEBUG_LOGGING,
        }
    }

    // Builder methods

    pub fn queue_kind(mut self, kind: QueueKind) -> Self {
        self.queue_kind = kind;
        self
    }

    pub fn queue_capacity(mut self, cap: usize) -> Self {
        self.queue_capacity = cap;
        self
    }

    pub fn mailbox_capacity(mut self, cap: usize) -> Self {
        self.mailbox_capacity = cap;
        self
    }

    pub fn max_workgroups(mut self, n: usize) -> Self {
        self.max_workgroups = n;
        self
    }

    pub fn idle_spins(mut self, spins: u32) -> Self {
        self.idle_spins = spins;
        self
    }

    pub fn park_timeout(mut self, d: Duration) -> Self {
        self.park_timeout = d;
        self
    }

    pub fn pin_workers(mut self, enable: bool) -> Self {
        self.pin_workers = enable;
        self
    }

    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn debug_logging(mut self, enable: bool) -> Self {
        self.debug_logging = enable;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue("queue_capacity must be > 0"));
        }
        if self.queue_capacity > 1 << 24 {
            return Err(ConfigError::InvalidValue("queue_capacity must be <= 16M"));
        }
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::InvalidValue("mailbox_capacity must be > 0"));
        }
        if self.mailbox_capacity > 1 << 24 {
            return Err(ConfigError::InvalidValue("mailbox_capacity must be <= 16M"));
        }
        if self.max_workgroups == 0 {
            return Err(ConfigError::InvalidValue("max_workgroups must be > 0"));
        }
        if self.max_workgroups > MAX_WORKERS {
            return Err(ConfigError::InvalidValue("max_workgroups must be <= 256"));
        }
        if self.park_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("park_timeout must be > 0"));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(ConfigError::InvalidValue("thread_name_prefix must not be empty"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("wsched Configuration:");
        eprintln!("  queue_kind:          {}", self.queue_kind);
        eprintln!("  queue_capacity:      {}", self.queue_capacity);
        eprintln!("  mailbox_capacity:    {}", self.mailbox_capacity);
        eprintln!("  max_workgroups:      {}", self.max_workgroups);
        eprintln!("  idle_spins:          {}", self.idle_spins);
        eprintln!("  park_timeout:        {:?}", self.park_timeout);
        eprintln!("  pin_workers:         {}", self.pin_workers);
        eprintln!("  thread_name_prefix:  {}", self.thread_name_prefix);
        eprintln!("  debug_logging:       {}", self.debug_logging);
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for SchedError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::InvalidValue(msg) => SchedError::InvalidConfig(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = SchedulerConfig::new();
        assert_eq!(config.queue_kind, QueueKind::ChaseLev);
        assert_eq!(config.mailbox_capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SchedulerConfig::new()
            .queue_kind(QueueKind::SpmcRing)
            .queue_capacity(64)
            .park_timeout(Duration::from_millis(5))
            .thread_name_prefix("pool");

        assert_eq!(config.queue_kind, QueueKind::SpmcRing);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.park_timeout, Duration::from_millis(5));
        assert_eq!(config.thread_name_prefix, "pool");
    }

    #[test]
    fn test_validation() {
        assert!(SchedulerConfig::new().mailbox_capacity(0).validate().is_err());
        assert!(SchedulerConfig::new().max_workgroups(1000).validate().is_err());
        assert!(SchedulerConfig::new()
            .park_timeout(Duration::ZERO)
            .validate()
            .is_err());

        let err: SchedError = SchedulerConfig::new()
            .queue_capacity(0)
            .validate()
            .unwrap_err()
            .into();
        assert_eq!(err, SchedError::InvalidConfig("queue_capacity must be > 0"));
    }

    #[test]
    fn test_from_env_overrides() {
        std::env::set_var("WSCHED_MAILBOX_CAPACITY", "77");
        std::env::set_var("WSCHED_QUEUE_KIND", "spmc");
        let config = SchedulerConfig::from_env();
        std::env::remove_var("WSCHED_MAILBOX_CAPACITY");
        std::env::remove_var("WSCHED_QUEUE_KIND");

        assert_eq!(config.mailbox_capacity, 77);
        assert_eq!(config.queue_kind, QueueKind::SpmcRing);
    }
}
