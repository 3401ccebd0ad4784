//! Log levels with numeric severities.
//!
//! Level names are parsed case-insensitively. Aliases follow the usual
//! stdlib-logging conventions: `warn` is `warning`, `fatal` is `critical`,
//! `exception` is `error`, and `notset` lets everything through.

use crate::error::ConfigurationError;
use std::fmt;
use std::str::FromStr;
use tracing::level_filters::LevelFilter;
use tracing::Level;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Numeric severity; higher is more severe.
    pub fn severity(self) -> u8 {
        match self {
            LogLevel::Trace => 5,
            LogLevel::Debug => 10,
            LogLevel::Info => 20,
            LogLevel::Warning => 30,
            LogLevel::Error => 40,
            LogLevel::Critical => 50,
        }
    }

    /// Lowercase name used for the `level` field.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    /// Closest `tracing` level. `Critical` has no counterpart and maps to `ERROR`.
    pub fn as_tracing(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warning => Level::WARN,
            LogLevel::Error | LogLevel::Critical => Level::ERROR,
        }
    }

    pub fn as_level_filter(self) -> LevelFilter {
        LevelFilter::from_level(self.as_tracing())
    }

    pub fn from_tracing(level: &Level) -> Self {
        match *level {
            Level::TRACE => LogLevel::Trace,
            Level::DEBUG => LogLevel::Debug,
            Level::INFO => LogLevel::Info,
            Level::WARN => LogLevel::Warning,
            _ => LogLevel::Error,
        }
    }

    /// Whether a record at `level` passes a filter set to `self`.
    pub fn allows(self, level: LogLevel) -> bool {
        level >= self
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" | "fatal" => Ok(LogLevel::Critical),
            "error" | "exception" => Ok(LogLevel::Error),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" | "notset" => Ok(LogLevel::Trace),
            _ => Err(ConfigurationError::UnknownLevel(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("Warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("exception".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!("notset".parse::<LogLevel>().unwrap(), LogLevel::Trace);
    }

    #[test]
    fn unknown_name_is_configuration_error() {
        let err = "loud".parse::<LogLevel>().unwrap_err();
        assert!(matches!(err, ConfigurationError::UnknownLevel(ref name) if name == "loud"));
    }

    #[test]
    fn severity_ordering() {
        assert!(LogLevel::Info.allows(LogLevel::Critical));
        assert!(!LogLevel::Warning.allows(LogLevel::Info));
        assert_eq!(LogLevel::Warning.severity(), 30);
    }
}
