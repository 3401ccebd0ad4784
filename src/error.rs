use std::io;

/// Error returned when the pipeline or its settings cannot be configured.
#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("unknown log level: {0:?}")]
    UnknownLevel(String),

    #[error("output needs to be a binary stream, but the text stream exposes no byte buffer")]
    OutputNotBinary,

    #[error("invalid permission value for {key}: {value:?}")]
    InvalidPermissions { key: String, value: String },

    #[error("missing configuration value [{section}] {key}")]
    MissingValue { section: String, key: String },
}

/// Failure while formatting or writing one record. Recovered inside handlers.
#[derive(thiserror::Error, Debug)]
pub enum SinkEmitError {
    #[error("failed to encode log record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to write log record: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of a failed emit that the caller must see.
#[derive(thiserror::Error, Debug)]
pub enum EmitError {
    /// Emitting re-entered itself past the recursion limit. Never swallowed.
    #[error("log emit recursion exceeded {depth} levels")]
    StackOverflow { depth: usize },

    #[error(transparent)]
    Sink(#[from] SinkEmitError),
}

/// Error creating a task log file or its folders.
#[derive(thiserror::Error, Debug)]
pub enum LogFileError {
    #[error("failed to create log folder {path}: {source}")]
    Folder {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create log file {path}: {source}")]
    File {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Error raised by the external logging subsystem while locating a handler.
#[derive(thiserror::Error, Debug)]
pub enum RemoteHandlerError {
    #[error("external logging configuration failed: {0}")]
    ExternalConfigure(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to restore pipeline configuration: {0}")]
    Restore(#[from] ConfigurationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConfigurationError::UnknownLevel("loud".into());
        assert_eq!(error.to_string(), "unknown log level: \"loud\"");

        let error = EmitError::StackOverflow { depth: 16 };
        assert_eq!(error.to_string(), "log emit recursion exceeded 16 levels");
    }

    #[test]
    fn sink_errors_convert_into_emit_errors() {
        let io = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err: EmitError = SinkEmitError::from(io).into();
        assert!(matches!(err, EmitError::Sink(SinkEmitError::Io(_))));
        assert!(err.to_string().contains("pipe closed"));
    }
}
