//! Environment variable utilities
//!
//! Typed lookups with defaults, used by `SchedulerConfig::from_env`.
//!
//! ```ignore
//! use wsched_core::env::{env_get, env_get_bool};
//!
//! let mailbox: usize = env_get("WSCHED_MAILBOX_CAPACITY", 1024);
//! let pin = env_get_bool("WSCHED_PIN_WORKERS", false);
//! ```

use std::str::FromStr;

/// Parse `key` as `T`, falling back to `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// `Some(T)` only when `key` is set and parses.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean lookup: "1", "true", "yes", "on" (any case) are true,
/// "0", "false", "no", "off" are false, anything else yields `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test owns a distinct variable name; tests run in parallel.

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__WSCHED_TEST_UNSET__", 42);
        assert_eq!(val, 42);
        let val: Option<u64> = env_get_opt("__WSCHED_TEST_UNSET__");
        assert!(val.is_none());
        assert_eq!(env_get_str("__WSCHED_TEST_UNSET__", "dflt"), "dflt");
    }

    #[test]
    fn test_env_get_parses() {
        std::env::set_var("__WSCHED_TEST_NUM__", " 123 ");
        let val: usize = env_get("__WSCHED_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__WSCHED_TEST_NUM__");
    }

    #[test]
    fn test_env_get_invalid_falls_back() {
        std::env::set_var("__WSCHED_TEST_BAD__", "lots");
        let val: usize = env_get("__WSCHED_TEST_BAD__", 9);
        assert_eq!(val, 9);
        std::env::remove_var("__WSCHED_TEST_BAD__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        std::env::set_var("__WSCHED_TEST_BOOL__", "On");
        assert!(env_get_bool("__WSCHED_TEST_BOOL__", false));
        std::env::set_var("__WSCHED_TEST_BOOL__", "no");
        assert!(!env_get_bool("__WSCHED_TEST_BOOL__", true));
        std::env::set_var("__WSCHED_TEST_BOOL__", "maybe");
        assert!(env_get_bool("__WSCHED_TEST_BOOL__", true));
        std::env::remove_var("__WSCHED_TEST_BOOL__");
        assert!(!env_get_bool("__WSCHED_TEST_BOOL__", false));
    }
}
