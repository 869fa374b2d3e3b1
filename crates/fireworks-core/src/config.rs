// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.
//!
//! A [`Config`] is built once and handed to [`crate::launchpad::LaunchPad::new`]; every
//! operation reads its timeouts and policies from that value.

use std::str::FromStr;
use std::time::Duration;

/// Tie-break applied after `_priority` when picking the next firework to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Oldest `created_on` first.
    Fifo,
    /// Newest `created_on` first.
    Filo,
    /// No ordering beyond priority.
    #[default]
    Unspecified,
}

impl FromStr for SortOrder {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIFO" => Ok(Self::Fifo),
            "FILO" => Ok(Self::Filo),
            "" => Ok(Self::Unspecified),
            _ => Err(ConfigError::Invalid(
                "FIREWORKS_SORT_FWS",
                "must be FIFO, FILO or empty",
            )),
        }
    }
}

/// FireWorks LaunchPad configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,
    /// A RESERVED launch without heartbeat for this long is considered stale.
    pub reservation_expiration_secs: u64,
    /// A RUNNING launch without heartbeat for this long is considered lost.
    pub run_expiration_secs: u64,
    /// Recommended heartbeat interval for workers.
    pub ping_time_secs: u64,
    /// Period of the maintenance loop.
    pub maintain_interval_secs: u64,
    /// How long to wait for a workflow lock before giving up (or forcing it).
    pub wflock_expiration_secs: u64,
    /// Force the workflow lock once the wait budget is exhausted.
    pub wflock_expiration_kill: bool,
    /// Tie-break after priority.
    pub sort_fws: SortOrder,
    /// Name of the oversize action store; `None` disables the fallback.
    pub action_fallback: Option<String>,
    /// Serialized actions above this size go to the fallback store.
    pub store_size_limit_bytes: usize,
    /// Default number of lines kept by a tracker.
    pub tracker_lines: usize,
    /// Copy `_exception._details` of a fizzled launch into `spec` on rerun.
    pub except_details_on_rerun: bool,
    /// Remove the empty original launch dir when `_launch_dir` redirects a run.
    pub remove_useless_dirs: bool,
    /// Max workflow count for a reset without password.
    pub pw_check_num: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:fireworks.db?mode=rwc".to_string(),
            reservation_expiration_secs: 60 * 60 * 24 * 14,
            run_expiration_secs: 3600 * 4,
            ping_time_secs: 3600,
            maintain_interval_secs: 120,
            wflock_expiration_secs: 300,
            wflock_expiration_kill: false,
            sort_fws: SortOrder::Unspecified,
            action_fallback: None,
            store_size_limit_bytes: 16 * 1024 * 1024,
            tracker_lines: 25,
            except_details_on_rerun: true,
            remove_useless_dirs: true,
            pw_check_num: 25,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `FIREWORKS_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `FIREWORKS_RESERVATION_EXPIRATION_SECS` (1209600)
    /// - `FIREWORKS_RUN_EXPIRATION_SECS` (14400)
    /// - `FIREWORKS_PING_TIME_SECS` (3600)
    /// - `FIREWORKS_MAINTAIN_INTERVAL` (120)
    /// - `FIREWORKS_WFLOCK_EXPIRATION_SECS` (300)
    /// - `FIREWORKS_WFLOCK_EXPIRATION_KILL` (false)
    /// - `FIREWORKS_SORT_FWS` (empty; `FIFO` or `FILO`)
    /// - `FIREWORKS_ACTION_FALLBACK` (unset)
    /// - `FIREWORKS_STORE_SIZE_LIMIT_BYTES` (16 MiB)
    /// - `FIREWORKS_TRACKER_LINES` (25)
    /// - `FIREWORKS_EXCEPT_DETAILS_ON_RERUN` (true)
    /// - `FIREWORKS_REMOVE_USELESS_DIRS` (true)
    /// - `FIREWORKS_PW_CHECK_NUM` (25)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let database_url = std::env::var("FIREWORKS_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("FIREWORKS_DATABASE_URL"))?;

        let sort_fws = match std::env::var("FIREWORKS_SORT_FWS") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.sort_fws,
        };

        let action_fallback = std::env::var("FIREWORKS_ACTION_FALLBACK")
            .ok()
            .filter(|v| !v.trim().is_empty() && !v.eq_ignore_ascii_case("none"));

        let tracker_lines: usize = parse_var(
            "FIREWORKS_TRACKER_LINES",
            defaults.tracker_lines,
            "must be a positive integer",
        )?;
        if tracker_lines > crate::model::tracker::MAX_TRACKER_LINES {
            return Err(ConfigError::Invalid(
                "FIREWORKS_TRACKER_LINES",
                "must not exceed 1000",
            ));
        }

        Ok(Self {
            database_url,
            reservation_expiration_secs: parse_var(
                "FIREWORKS_RESERVATION_EXPIRATION_SECS",
                defaults.reservation_expiration_secs,
                "must be a number of seconds",
            )?,
            run_expiration_secs: parse_var(
                "FIREWORKS_RUN_EXPIRATION_SECS",
                defaults.run_expiration_secs,
                "must be a number of seconds",
            )?,
            ping_time_secs: parse_var(
                "FIREWORKS_PING_TIME_SECS",
                defaults.ping_time_secs,
                "must be a number of seconds",
            )?,
            maintain_interval_secs: parse_var(
                "FIREWORKS_MAINTAIN_INTERVAL",
                defaults.maintain_interval_secs,
                "must be a number of seconds",
            )?,
            wflock_expiration_secs: parse_var(
                "FIREWORKS_WFLOCK_EXPIRATION_SECS",
                defaults.wflock_expiration_secs,
                "must be a number of seconds",
            )?,
            wflock_expiration_kill: parse_bool(
                "FIREWORKS_WFLOCK_EXPIRATION_KILL",
                defaults.wflock_expiration_kill,
            )?,
            sort_fws,
            action_fallback,
            store_size_limit_bytes: parse_var(
                "FIREWORKS_STORE_SIZE_LIMIT_BYTES",
                defaults.store_size_limit_bytes,
                "must be a number of bytes",
            )?,
            tracker_lines,
            except_details_on_rerun: parse_bool(
                "FIREWORKS_EXCEPT_DETAILS_ON_RERUN",
                defaults.except_details_on_rerun,
            )?,
            remove_useless_dirs: parse_bool(
                "FIREWORKS_REMOVE_USELESS_DIRS",
                defaults.remove_useless_dirs,
            )?,
            pw_check_num: parse_var(
                "FIREWORKS_PW_CHECK_NUM",
                defaults.pw_check_num,
                "must be a positive integer",
            )?,
        })
    }

    /// Set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Set the workflow lock wait budget and kill policy.
    pub fn with_wflock(mut self, expiration_secs: u64, kill: bool) -> Self {
        self.wflock_expiration_secs = expiration_secs;
        self.wflock_expiration_kill = kill;
        self
    }

    /// Set the tie-break used after priority.
    pub fn with_sort_fws(mut self, sort: SortOrder) -> Self {
        self.sort_fws = sort;
        self
    }

    /// Enable the oversize action store with the given size threshold.
    pub fn with_action_fallback(mut self, name: impl Into<String>, limit_bytes: usize) -> Self {
        self.action_fallback = Some(name.into());
        self.store_size_limit_bytes = limit_bytes;
        self
    }

    /// Set the store size limit without enabling the fallback.
    pub fn with_store_size_limit(mut self, limit_bytes: usize) -> Self {
        self.store_size_limit_bytes = limit_bytes;
        self
    }

    /// Maintenance loop period.
    pub fn maintain_interval(&self) -> Duration {
        Duration::from_secs(self.maintain_interval_secs)
    }

    /// Recommended worker heartbeat period.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_time_secs)
    }
}

fn parse_var<T: FromStr>(
    key: &'static str,
    default: T,
    message: &'static str,
) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(key, message)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(key) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid(key, "must be a boolean")),
        },
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const OPTIONAL_VARS: &[&str] = &[
        "FIREWORKS_RESERVATION_EXPIRATION_SECS",
        "FIREWORKS_RUN_EXPIRATION_SECS",
        "FIREWORKS_PING_TIME_SECS",
        "FIREWORKS_MAINTAIN_INTERVAL",
        "FIREWORKS_WFLOCK_EXPIRATION_SECS",
        "FIREWORKS_WFLOCK_EXPIRATION_KILL",
        "FIREWORKS_SORT_FWS",
        "FIREWORKS_ACTION_FALLBACK",
        "FIREWORKS_STORE_SIZE_LIMIT_BYTES",
        "FIREWORKS_TRACKER_LINES",
        "FIREWORKS_EXCEPT_DETAILS_ON_RERUN",
        "FIREWORKS_REMOVE_USELESS_DIRS",
        "FIREWORKS_PW_CHECK_NUM",
    ];

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }

        fn clear_optional(&mut self) {
            for key in OPTIONAL_VARS {
                self.remove(key);
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("FIREWORKS_DATABASE_URL", "sqlite::memory:");
        guard.clear_optional();

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.reservation_expiration_secs, 1_209_600);
        assert_eq!(config.run_expiration_secs, 14_400);
        assert_eq!(config.ping_time_secs, 3600);
        assert_eq!(config.maintain_interval_secs, 120);
        assert_eq!(config.wflock_expiration_secs, 300);
        assert!(!config.wflock_expiration_kill);
        assert_eq!(config.sort_fws, SortOrder::Unspecified);
        assert!(config.action_fallback.is_none());
        assert_eq!(config.store_size_limit_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("FIREWORKS_DATABASE_URL", "sqlite:/data/fw.db");
        guard.clear_optional();
        guard.set("FIREWORKS_RUN_EXPIRATION_SECS", "60");
        guard.set("FIREWORKS_WFLOCK_EXPIRATION_KILL", "true");
        guard.set("FIREWORKS_SORT_FWS", "filo");
        guard.set("FIREWORKS_ACTION_FALLBACK", "fw_gridfs");
        guard.set("FIREWORKS_STORE_SIZE_LIMIT_BYTES", "1024");

        let config = Config::from_env().unwrap();

        assert_eq!(config.run_expiration_secs, 60);
        assert!(config.wflock_expiration_kill);
        assert_eq!(config.sort_fws, SortOrder::Filo);
        assert_eq!(config.action_fallback.as_deref(), Some("fw_gridfs"));
        assert_eq!(config.store_size_limit_bytes, 1024);
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("FIREWORKS_DATABASE_URL");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("FIREWORKS_DATABASE_URL")));
        assert!(err.to_string().contains("FIREWORKS_DATABASE_URL"));
    }

    #[test]
    fn test_config_invalid_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("FIREWORKS_DATABASE_URL", "sqlite::memory:");
        guard.clear_optional();
        guard.set("FIREWORKS_PING_TIME_SECS", "-5");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("FIREWORKS_PING_TIME_SECS", _))
        ));

        guard.set("FIREWORKS_PING_TIME_SECS", "10");
        guard.set("FIREWORKS_SORT_FWS", "random");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("FIREWORKS_SORT_FWS", _))
        ));

        guard.set("FIREWORKS_SORT_FWS", "FIFO");
        guard.set("FIREWORKS_TRACKER_LINES", "5000");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid("FIREWORKS_TRACKER_LINES", _))
        ));
    }

    #[test]
    fn test_action_fallback_none_disables() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("FIREWORKS_DATABASE_URL", "sqlite::memory:");
        guard.clear_optional();
        guard.set("FIREWORKS_ACTION_FALLBACK", "None");

        let config = Config::from_env().unwrap();
        assert!(config.action_fallback.is_none());
    }

    #[test]
    fn test_builder_helpers() {
        let config = Config::default()
            .with_wflock(2, true)
            .with_sort_fws(SortOrder::Fifo)
            .with_action_fallback("blobs", 64);

        assert_eq!(config.wflock_expiration_secs, 2);
        assert!(config.wflock_expiration_kill);
        assert_eq!(config.sort_fws, SortOrder::Fifo);
        assert_eq!(config.store_size_limit_bytes, 64);
        assert_eq!(config.maintain_interval(), Duration::from_secs(120));
    }
}
