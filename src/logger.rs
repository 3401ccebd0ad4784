//! Direct logging front end that does not go through a `tracing` subscriber.

use crate::error::EmitError;
use crate::exception::{CapturedError, ExcInfo};
use crate::init::{ActivePipeline, Pipeline};
use crate::level::LogLevel;
use crate::record::{EventDict, FieldValue};
use crate::sink::LogSink;
use std::sync::{Arc, OnceLock};

/// A logger bound to a set of fields and, optionally, its own sink.
///
/// When the active pipeline was configured with `cache_on_first_use`, the
/// logger keeps the pipeline it first logged through, even if logging is
/// reconfigured afterwards.
pub struct TaskLogger {
    active: ActivePipeline,
    cached: OnceLock<Arc<Pipeline>>,
    sink: Option<LogSink>,
    bound: Vec<(String, FieldValue)>,
}

impl TaskLogger {
    pub fn new(active: ActivePipeline) -> Self {
        Self {
            active,
            cached: OnceLock::new(),
            sink: None,
            bound: Vec::new(),
        }
    }

    /// Write records to `sink` instead of the pipeline output.
    pub fn with_sink(mut self, sink: LogSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// New logger carrying extra fields on every record.
    pub fn bind<K, V>(&self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let mut bound = self.bound.clone();
        for (key, value) in fields {
            let key = key.into();
            let value = value.into();
            match bound.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, slot)) => *slot = value,
                None => bound.push((key, value)),
            }
        }
        Self {
            active: self.active.clone(),
            cached: OnceLock::new(),
            sink: self.sink.clone(),
            bound,
        }
    }

    /// Sink this logger writes to: its own, or the pipeline output.
    /// [`LogSink::Null`] when logging is not configured.
    pub fn resolved_sink(&self) -> LogSink {
        if let Some(sink) = &self.sink {
            return sink.clone();
        }
        self.pipeline()
            .map(|pipeline| pipeline.output_sink().clone())
            .unwrap_or(LogSink::Null)
    }

    fn pipeline(&self) -> Option<Arc<Pipeline>> {
        if let Some(pipeline) = self.cached.get() {
            return Some(pipeline.clone());
        }
        let pipeline = self.active.get()?;
        if pipeline.cache_on_first_use() {
            let _ = self.cached.set(pipeline.clone());
        }
        Some(pipeline)
    }

    /// Emit a prepared record. Bound fields are added where the record has none.
    ///
    /// **Errors**
    /// - [`EmitError::StackOverflow`] if emitting re-entered itself too deep.
    ///   Write failures are reported on stderr and never returned.
    pub fn try_emit(&self, mut event: EventDict) -> Result<(), EmitError> {
        let Some(pipeline) = self.pipeline() else {
            return Ok(());
        };
        if !pipeline.enabled(event.method_level()) {
            return Ok(());
        }
        for (key, value) in &self.bound {
            event.set_default(key.clone(), value.clone());
        }
        match &self.sink {
            Some(sink) => pipeline.emit_to(sink, event),
            None => pipeline.emit_native(event),
        }
    }

    /// Emit a record built by the caller.
    ///
    /// # Panics
    ///
    /// Panics on [`EmitError::StackOverflow`].
    pub fn emit(&self, event: EventDict) {
        if let Err(err @ EmitError::StackOverflow { .. }) = self.try_emit(event) {
            panic!("{}", err);
        }
    }

    pub fn log(&self, level: LogLevel, event: impl Into<String>) {
        self.emit(EventDict::with_event(level, event));
    }

    /// Log with extra fields for this record only.
    pub fn log_with<K, V>(&self, level: LogLevel, event: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        let mut record = EventDict::with_event(level, event);
        for (key, value) in fields {
            record.insert(key, value);
        }
        self.emit(record);
    }

    pub fn debug(&self, event: impl Into<String>) {
        self.log(LogLevel::Debug, event);
    }

    pub fn info(&self, event: impl Into<String>) {
        self.log(LogLevel::Info, event);
    }

    pub fn warning(&self, event: impl Into<String>) {
        self.log(LogLevel::Warning, event);
    }

    pub fn error(&self, event: impl Into<String>) {
        self.log(LogLevel::Error, event);
    }

    pub fn critical(&self, event: impl Into<String>) {
        self.log(LogLevel::Critical, event);
    }

    /// Log at error level with the error currently active on this thread.
    pub fn exception(&self, event: impl Into<String>) {
        let mut record = EventDict::with_event(LogLevel::Error, event);
        record.exc_info = Some(ExcInfo::Active);
        self.emit(record);
    }

    /// Log at error level with an explicitly captured error.
    pub fn error_with(&self, event: impl Into<String>, err: CapturedError) {
        let mut record = EventDict::with_event(LogLevel::Error, event);
        record.exc_info = Some(ExcInfo::Captured(err));
        self.emit(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::{enter_error, ErrorReport};
    use crate::init::{LoggingConfigurator, PipelineConfig};
    use crate::output::{MemoryWriter, OutputStream};
    use serial_test::serial;

    fn configurator() -> LoggingConfigurator {
        LoggingConfigurator::new().with_harness_marker("TASK_LOG_UNIT_TEST_MARKER_UNSET")
    }

    fn json_config(out: &MemoryWriter) -> PipelineConfig {
        PipelineConfig::default()
            .pretty(false)
            .output(OutputStream::binary(out.clone()))
    }

    #[test]
    fn unconfigured_logger_drops_records() {
        let logger = TaskLogger::new(ActivePipeline::default());
        logger.info("nobody listens");
        assert!(matches!(logger.resolved_sink(), LogSink::Null));
    }

    #[test]
    #[serial]
    fn bound_fields_follow_event_fields() {
        let out = MemoryWriter::new();
        let configurator = configurator();
        configurator.configure(json_config(&out)).unwrap();

        let logger = configurator.logger().bind([("ti_id", "abc"), ("map_index", "-1")]);
        logger.log_with(LogLevel::Info, "running", [("map_index", "3")]);

        let record: serde_json::Value = serde_json::from_str(out.contents_lossy().trim_end()).unwrap();
        assert_eq!(record["ti_id"], "abc");
        assert_eq!(record["map_index"], "3");
        configurator.reset();
    }

    #[test]
    #[serial]
    fn cached_logger_keeps_first_pipeline() {
        let first_out = MemoryWriter::new();
        let second_out = MemoryWriter::new();
        let configurator = configurator();
        configurator.configure(json_config(&first_out)).unwrap();

        let logger = configurator.logger();
        logger.info("one");
        configurator.configure(json_config(&second_out)).unwrap();
        logger.info("two");
        configurator.logger().info("three");

        assert_eq!(first_out.contents_lossy().lines().count(), 2);
        assert_eq!(second_out.contents_lossy().lines().count(), 1);
        configurator.reset();
    }

    #[test]
    #[serial]
    fn uncached_logger_follows_reconfiguration() {
        let first_out = MemoryWriter::new();
        let second_out = MemoryWriter::new();
        let configurator = configurator();
        configurator
            .configure(json_config(&first_out).cache_on_first_use(false))
            .unwrap();

        let logger = configurator.logger();
        logger.info("one");
        configurator
            .configure(json_config(&second_out).cache_on_first_use(false))
            .unwrap();
        logger.info("two");

        assert_eq!(first_out.contents_lossy().lines().count(), 1);
        assert_eq!(second_out.contents_lossy().lines().count(), 1);
        configurator.reset();
    }

    #[test]
    #[serial]
    fn exception_uses_active_error() {
        let out = MemoryWriter::new();
        let configurator = configurator();
        configurator.configure(json_config(&out)).unwrap();
        let logger = configurator.logger();

        {
            let _active = enter_error(ErrorReport::new("KeyError", "'dag_id'").into());
            logger.exception("lookup failed");
        }
        logger.exception("nothing active");

        let records: Vec<serde_json::Value> = out
            .contents_lossy()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records[0]["exception"][0]["exc_type"], "KeyError");
        assert_eq!(records[0]["level"], "error");
        assert!(records[1].get("exception").is_none());
        configurator.reset();
    }

    #[test]
    #[serial]
    fn own_sink_overrides_output() {
        let out = MemoryWriter::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task.log");
        let configurator = configurator();
        configurator.configure(json_config(&out)).unwrap();

        let logger = configurator.logger_for(LogSink::open_file(&path).unwrap());
        logger.warning("to the file");

        assert!(out.contents().is_empty());
        assert!(std::fs::read_to_string(&path).unwrap().contains("to the file"));
        assert_eq!(logger.resolved_sink().file_path(), Some(path.as_path()));
        configurator.reset();
    }
}
