//! Handoff of a finished task log file to the remote log handler.

use crate::error::RemoteHandlerError;
use crate::init::LoggingConfigurator;
use crate::level::LogLevel;
use crate::logger::TaskLogger;
use crate::settings::LogFileSettings;
use crate::sink::LogSink;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::path::Path;

type BoxError = Box<dyn Error + Send + Sync>;

/// What kind of handler the external logging subsystem provided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerKind {
    /// A file task handler, able to upload a local file on close.
    FileTask,
    Other(String),
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerKind::FileTask => f.write_str("FileTaskHandler"),
            HandlerKind::Other(name) => f.write_str(name),
        }
    }
}

/// Everything a file task handler needs to upload one log file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadHandoff {
    /// Path relative to the base log folder, with `/` separators.
    pub relative_path: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub upload_on_close: bool,
}

/// A handler obtained from the external logging subsystem.
pub trait RemoteLogHandler: Send {
    fn kind(&self) -> HandlerKind;

    /// Attach the upload details. Called right before [`close`](Self::close).
    fn attach(&mut self, handoff: UploadHandoff);

    /// Close the handler, which performs the upload.
    fn close(self: Box<Self>) -> Result<(), BoxError>;
}

/// The platform's own logging configuration, which knows the remote handler.
pub trait ExternalLogging: Send + Sync {
    /// Apply the platform logging configuration. This replaces ours.
    fn configure(&self) -> Result<(), BoxError>;

    /// Handler used for task logs, if any.
    fn task_log_handler(&self) -> Option<Box<dyn RemoteLogHandler>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The logger does not write to a local file.
    NoLogFile,
    /// The logger writes to a standard stream; nothing to upload.
    StdoutStream,
    OutsideBaseFolder,
    HandlerUnavailable,
    NotFileHandler(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffOutcome {
    Uploaded { relative_path: String },
    Skipped(SkipReason),
    /// The handler was found but closing it failed.
    Failed(String),
}

/// Locates the remote handler and hands finished log files to it.
pub struct RemoteLogUploader<'a> {
    configurator: &'a LoggingConfigurator,
    external: &'a dyn ExternalLogging,
    settings: LogFileSettings,
}

impl<'a> RemoteLogUploader<'a> {
    pub fn new(configurator: &'a LoggingConfigurator, external: &'a dyn ExternalLogging, settings: LogFileSettings) -> Self {
        Self {
            configurator,
            external,
            settings,
        }
    }

    /// Ask the external subsystem for its task log handler.
    ///
    /// The external configuration replaces ours, so our pipeline is restored
    /// afterwards whether or not it succeeded.
    ///
    /// **Errors**
    /// - [`RemoteHandlerError::ExternalConfigure`] if the external
    ///   configuration failed (our pipeline is still restored).
    /// - [`RemoteHandlerError::Restore`] if our pipeline could not be rebuilt.
    pub fn locate_remote_handler(&self) -> Result<Option<Box<dyn RemoteLogHandler>>, RemoteHandlerError> {
        let located = self
            .external
            .configure()
            .map(|()| self.external.task_log_handler())
            .map_err(RemoteHandlerError::ExternalConfigure);
        self.configurator.restore()?;
        located
    }

    /// Hand the file `logger` writes to over to the remote handler for upload.
    ///
    /// Loggers writing to a standard stream are skipped without looking up a
    /// handler. Every other skip is logged as a warning through `logger`.
    pub fn upload_to_remote(
        &self,
        logger: &TaskLogger,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> HandoffOutcome {
        let path = match logger.resolved_sink() {
            LogSink::File(file) => file.path().to_path_buf(),
            LogSink::Stream(_) => return HandoffOutcome::Skipped(SkipReason::StdoutStream),
            LogSink::Null => {
                logger.log_with(
                    LogLevel::Warning,
                    "Unable to find log file, logger was of unexpected type",
                    [("type", "null")],
                );
                return HandoffOutcome::Skipped(SkipReason::NoLogFile);
            }
        };

        let Some(relative_path) = relative_to(&path, &self.settings.base_log_folder) else {
            logger.log_with(
                LogLevel::Warning,
                "Log file is outside the base log folder, can't upload logs to remote",
                [
                    ("path", path.display().to_string()),
                    ("base_log_folder", self.settings.base_log_folder.display().to_string()),
                ],
            );
            return HandoffOutcome::Skipped(SkipReason::OutsideBaseFolder);
        };

        let mut handler = match self.locate_remote_handler() {
            Ok(Some(handler)) => handler,
            Ok(None) => {
                logger.warning("No remote log handler is configured, can't upload logs to remote");
                return HandoffOutcome::Skipped(SkipReason::HandlerUnavailable);
            }
            Err(err) => {
                logger.log_with(
                    LogLevel::Warning,
                    "Unable to load the remote log handler, can't upload logs to remote",
                    [("error", err.to_string())],
                );
                return HandoffOutcome::Skipped(SkipReason::HandlerUnavailable);
            }
        };

        if let HandlerKind::Other(name) = handler.kind() {
            logger.log_with(
                LogLevel::Warning,
                "Core logging is not using a FileTaskHandler, can't upload logs to remote",
                [("handler", name.clone())],
            );
            return HandoffOutcome::Skipped(SkipReason::NotFileHandler(name));
        }

        handler.attach(UploadHandoff {
            relative_path: relative_path.clone(),
            metadata,
            upload_on_close: true,
        });
        match handler.close() {
            Ok(()) => HandoffOutcome::Uploaded { relative_path },
            Err(err) => {
                logger.log_with(
                    LogLevel::Warning,
                    "Remote log handler failed to upload the log file",
                    [("error", err.to_string())],
                );
                HandoffOutcome::Failed(err.to_string())
            }
        }
    }
}

/// `path` relative to `base`, with `/` separators.
fn relative_to(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
