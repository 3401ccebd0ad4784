//! Structured logging pipeline for task workers.
//!
//! Records are built as ordered [`EventDict`]s, run through a processor
//! chain and rendered either for humans (pretty console) or for a
//! supervising process (one JSON object per line). Records from the `log`
//! facade are bridged through per-target levels to a stderr or supervisor
//! handler, runtime warnings are captured into the log, and finished task
//! log files can be handed to a remote upload handler.
//!
//! Typical worker startup:
//!
//! ```no_run
//! use task_log_pipeline::{configure_logging, PipelineConfig};
//!
//! configure_logging(PipelineConfig::default().pretty(false).level("info"))
//!     .expect("valid logging configuration");
//! tracing::info!(dag_id = "etl", "task started");
//! ```

pub mod chain;
pub mod context;
pub mod env;
pub mod error;
pub mod exception;
pub mod files;
pub mod handler;
pub mod init;
pub mod layer;
pub mod level;
pub mod logger;
pub mod output;
pub mod processors;
pub mod record;
pub mod remote;
pub mod render;
pub mod settings;
pub mod sink;
pub mod warnings;

pub use chain::{ChainCache, NamedProcessors, ProcessorChain};
pub use context::{bind_contextvars, clear_contextvars, get_contextvars, unbind_contextvars};
pub use error::{ConfigurationError, EmitError, LogFileError, RemoteHandlerError, SinkEmitError};
pub use exception::{enter_error, CapturedError, ErrorReport, ExcInfo};
pub use files::{init_log_file, prepare_log_folder};
pub use handler::{BinaryStreamHandler, Handler, ProcessorFormatter, StreamHandler};
pub use init::{configure_logging, reset_logging, LoggingConfigurator, Pipeline, PipelineConfig};
pub use layer::PipelineLayer;
pub use level::LogLevel;
pub use logger::TaskLogger;
pub use output::{OutputStream, SharedWriter};
pub use record::{EventDict, FieldValue};
pub use remote::{
    ExternalLogging, HandlerKind, HandoffOutcome, RemoteLogHandler, RemoteLogUploader, SkipReason,
    UploadHandoff,
};
pub use settings::{ConfigSource, LogFileSettings, MapConfigSource};
pub use sink::LogSink;
