//! Environment variable names used by this crate, plus an env-backed
//! [`ConfigSource`].
//!
//! These are helpers; the settings types stay decoupled from environment
//! access and read through [`ConfigSource`].

use crate::settings::ConfigSource;

/// Presence of this variable marks a test harness run: memoization and
/// logger caching are disabled.
pub const TASK_LOG_TEST_HARNESS_ENV: &str = "TASK_LOG_TEST_HARNESS";

/// Prefix of configuration variables, e.g. `TASK_LOG__LOGGING__BASE_LOG_FOLDER`.
pub const TASK_LOG_CONFIG_PREFIX: &str = "TASK_LOG";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Variable name holding `[section] key`.
pub fn config_var_name(section: &str, key: &str) -> String {
    format!(
        "{}__{}__{}",
        TASK_LOG_CONFIG_PREFIX,
        section.to_ascii_uppercase(),
        key.to_ascii_uppercase()
    )
}

/// Reads `[section] key` from `TASK_LOG__<SECTION>__<KEY>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn get(&self, section: &str, key: &str) -> Option<String> {
        std::env::var(config_var_name(section, key)).ok()
    }
}
