use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

pub const LOGGING_SECTION: &str = "logging";
pub const BASE_LOG_FOLDER_KEY: &str = "base_log_folder";
pub const FILE_PERMISSIONS_KEY: &str = "file_task_handler_new_file_permissions";
pub const FOLDER_PERMISSIONS_KEY: &str = "file_task_handler_new_folder_permissions";

pub const DEFAULT_FILE_PERMISSIONS: u32 = 0o664;
pub const DEFAULT_FOLDER_PERMISSIONS: u32 = 0o775;

/// Key/value reader for platform configuration.
pub trait ConfigSource {
    fn get(&self, section: &str, key: &str) -> Option<String>;
}

/// In-memory [`ConfigSource`], keyed by `(section, key)`.
#[derive(Debug, Clone, Default)]
pub struct MapConfigSource {
    values: HashMap<(String, String), String>,
}

impl MapConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, section: &str, key: &str, value: impl Into<String>) -> Self {
        self.values
            .insert((section.to_string(), key.to_string()), value.into());
        self
    }
}

impl ConfigSource for MapConfigSource {
    fn get(&self, section: &str, key: &str) -> Option<String> {
        self.values
            .get(&(section.to_string(), key.to_string()))
            .cloned()
    }
}

/// Where task log files live and which modes new files and folders get.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFileSettings {
    pub base_log_folder: PathBuf,
    #[serde(default = "default_file_permissions")]
    pub file_permissions: u32,
    #[serde(default = "default_folder_permissions")]
    pub folder_permissions: u32,
}

fn default_file_permissions() -> u32 {
    DEFAULT_FILE_PERMISSIONS
}

fn default_folder_permissions() -> u32 {
    DEFAULT_FOLDER_PERMISSIONS
}

impl LogFileSettings {
    pub fn new(base_log_folder: impl Into<PathBuf>) -> Self {
        Self {
            base_log_folder: base_log_folder.into(),
            file_permissions: DEFAULT_FILE_PERMISSIONS,
            folder_permissions: DEFAULT_FOLDER_PERMISSIONS,
        }
    }

    /// Read the `[logging]` section.
    ///
    /// **Errors**
    /// - [`ConfigurationError::MissingValue`] without a base log folder.
    /// - [`ConfigurationError::InvalidPermissions`] for a mode that is not octal.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigurationError> {
        let base = source
            .get(LOGGING_SECTION, BASE_LOG_FOLDER_KEY)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| ConfigurationError::MissingValue {
                section: LOGGING_SECTION.to_string(),
                key: BASE_LOG_FOLDER_KEY.to_string(),
            })?;

        let mode = |key: &str, default: u32| -> Result<u32, ConfigurationError> {
            match source.get(LOGGING_SECTION, key) {
                Some(value) => parse_octal(&value).ok_or(ConfigurationError::InvalidPermissions {
                    key: key.to_string(),
                    value,
                }),
                None => Ok(default),
            }
        };

        Ok(Self {
            base_log_folder: PathBuf::from(base.trim()),
            file_permissions: mode(FILE_PERMISSIONS_KEY, DEFAULT_FILE_PERMISSIONS)?,
            folder_permissions: mode(FOLDER_PERMISSIONS_KEY, DEFAULT_FOLDER_PERMISSIONS)?,
        })
    }
}

/// Parse a permission mode written as `0o664`, `0664` or `664`.
pub fn parse_octal(value: &str) -> Option<u32> {
    let value = value.trim();
    let digits = value
        .strip_prefix("0o")
        .or_else(|| value.strip_prefix("0O"))
        .unwrap_or(value);
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(digits, 8).ok().filter(|mode| *mode <= 0o7777)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octal_forms() {
        assert_eq!(parse_octal("0o664"), Some(0o664));
        assert_eq!(parse_octal("0664"), Some(0o664));
        assert_eq!(parse_octal("775"), Some(0o775));
        assert_eq!(parse_octal("0o"), None);
        assert_eq!(parse_octal("rw-r--r--"), None);
        assert_eq!(parse_octal("889"), None);
    }

    #[test]
    fn defaults_apply() {
        let source = MapConfigSource::new().with(LOGGING_SECTION, BASE_LOG_FOLDER_KEY, "/logs");
        let settings = LogFileSettings::from_source(&source).unwrap();
        assert_eq!(settings, LogFileSettings::new("/logs"));
    }

    #[test]
    fn configured_modes_are_parsed() {
        let source = MapConfigSource::new()
            .with(LOGGING_SECTION, BASE_LOG_FOLDER_KEY, "/logs")
            .with(LOGGING_SECTION, FILE_PERMISSIONS_KEY, "0o600")
            .with(LOGGING_SECTION, FOLDER_PERMISSIONS_KEY, "0700");
        let settings = LogFileSettings::from_source(&source).unwrap();
        assert_eq!(settings.file_permissions, 0o600);
        assert_eq!(settings.folder_permissions, 0o700);
    }

    #[test]
    fn missing_base_and_bad_mode_fail() {
        let err = LogFileSettings::from_source(&MapConfigSource::new()).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingValue { .. }));

        let source = MapConfigSource::new()
            .with(LOGGING_SECTION, BASE_LOG_FOLDER_KEY, "/logs")
            .with(LOGGING_SECTION, FILE_PERMISSIONS_KEY, "rw");
        let err = LogFileSettings::from_source(&source).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidPermissions { value, .. } if value == "rw"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let settings: LogFileSettings =
            serde_json::from_str(r#"{"base_log_folder":"/logs","file_permissions":384}"#).unwrap();
        assert_eq!(settings.file_permissions, 0o600);
        assert_eq!(settings.folder_permissions, DEFAULT_FOLDER_PERMISSIONS);
    }
}
