//! Environment variable utilities
//!
//! Generic `env_get<T>` parsing with defaults, used for the log level
//! (`SELIO_LOG_LEVEL`) and runtime tuning knobs such as
//! `SELIO_SELECT_TICK_MS`.
//!
//! # Usage
//!
//! ```ignore
//! use selio_core::env::{env_get, env_get_bool};
//!
//! let tick_ms: u64 = env_get("SELIO_SELECT_TICK_MS", 50);
//! let flush: bool = env_get_bool("SELIO_FLUSH_LOG", false);
//! ```

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default
///
/// Works with any type that implements `FromStr`. Unset variables and
/// parse failures both fall back to the default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as boolean
///
/// Accepts: "1", "true", "yes", "on" (case-insensitive) as true.
/// Everything else (including unset) returns the default for unset,
/// false for a set-but-unrecognized value.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get environment variable as optional value
///
/// Returns `Some(T)` if the variable is set and parses successfully,
/// `None` otherwise.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_returns_default() {
        let val: u64 = env_get("__SELIO_TEST_UNSET__", 50);
        assert_eq!(val, 50);

        assert!(env_get_bool("__SELIO_TEST_UNSET__", true));
        assert!(!env_get_bool("__SELIO_TEST_UNSET__", false));

        let opt: Option<usize> = env_get_opt("__SELIO_TEST_UNSET__");
        assert!(opt.is_none());
    }

    #[test]
    fn test_set_and_parse() {
        std::env::set_var("__SELIO_TEST_TICK__", "125");
        let val: u64 = env_get("__SELIO_TEST_TICK__", 50);
        assert_eq!(val, 125);
        std::env::remove_var("__SELIO_TEST_TICK__");
    }

    #[test]
    fn test_parse_failure_falls_back() {
        std::env::set_var("__SELIO_TEST_BAD__", "not_a_number");
        let val: u64 = env_get("__SELIO_TEST_BAD__", 7);
        assert_eq!(val, 7);
        std::env::remove_var("__SELIO_TEST_BAD__");
    }

    #[test]
    fn test_bool_variants() {
        for truthy in ["1", "true", "YES", "on"] {
            std::env::set_var("__SELIO_TEST_BOOL__", truthy);
            assert!(env_get_bool("__SELIO_TEST_BOOL__", false));
        }
        std::env::set_var("__SELIO_TEST_BOOL__", "0");
        assert!(!env_get_bool("__SELIO_TEST_BOOL__", true));
        std::env::remove_var("__SELIO_TEST_BOOL__");
    }
}
