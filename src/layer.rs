use crate::error::EmitError;
use crate::exception::{CapturedError, ExcInfo};
use crate::init::ActivePipeline;
use crate::level::LogLevel;
use crate::record::{EventDict, FieldValue};
use std::error::Error;
use std::fmt;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_log::NormalizeEvent;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// `tracing_subscriber` layer that turns events into [`EventDict`]s and
/// hands them to the active [`Pipeline`](crate::init::Pipeline).
///
/// Events emitted through `tracing` macros go through the processor chain to
/// the pipeline output; targets in [`NOISY_TARGETS`](crate::init::NOISY_TARGETS)
/// are held at `WARN` there too. Records forwarded from the `log` facade by
/// `tracing_log::LogTracer` go through the pipeline's `log` bridge, which
/// applies per-target levels and writes via its handler.
///
/// Fields of enclosing spans are merged into each event; fields on the event
/// itself take precedence.
///
/// # Panics
///
/// Panics when emitting re-enters itself past the recursion limit, since a
/// layer has no other way to surface that failure.
pub struct PipelineLayer {
    active: ActivePipeline,
}

impl PipelineLayer {
    pub fn new(active: ActivePipeline) -> Self {
        Self { active }
    }
}

/// Fields recorded on a span, stored in its extensions.
struct SpanFields(EventDict);

impl<S> Layer<S> for PipelineLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = EventDict::new(LogLevel::from_tracing(attrs.metadata().level()));
        attrs.record(&mut FieldVisitor::new(&mut fields));
        span.extensions_mut().insert(SpanFields(fields));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(SpanFields(fields)) = extensions.get_mut::<SpanFields>() {
            values.record(&mut FieldVisitor::new(fields));
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(pipeline) = self.active.get() else {
            return;
        };

        let normalized = event.normalized_metadata();
        let meta = normalized.as_ref().unwrap_or_else(|| event.metadata());
        let level = LogLevel::from_tracing(meta.level());

        let mut record = EventDict::new(level);
        event.record(&mut FieldVisitor::new(&mut record));

        if let Some(scope) = ctx.event_scope(event) {
            let mut inherited = EventDict::new(level);
            for span in scope.from_root() {
                if let Some(SpanFields(fields)) = span.extensions().get::<SpanFields>() {
                    for (key, value) in fields.iter() {
                        inherited.insert(key, value.clone());
                    }
                }
            }
            if !inherited.is_empty() {
                record.prepend(inherited.iter().map(|(k, v)| (k.to_string(), v.clone())));
            }
        }

        let result = if normalized.is_some() {
            pipeline.emit_foreign(meta.target(), record)
        } else if pipeline.enabled_for(meta.target(), level) {
            pipeline.emit_native(record)
        } else {
            Ok(())
        };

        if let Err(err @ EmitError::StackOverflow { .. }) = result {
            panic!("{}", err);
        }
    }
}

/// Records `tracing` fields into an [`EventDict`].
///
/// `message` becomes `event`; `log.*` metadata fields added by `LogTracer`
/// are skipped; errors and a truthy `exc_info` fill the exception slot.
pub struct FieldVisitor<'a> {
    record: &'a mut EventDict,
}

impl<'a> FieldVisitor<'a> {
    pub fn new(record: &'a mut EventDict) -> Self {
        Self { record }
    }

    fn key(field: &Field) -> Option<&'static str> {
        match field.name() {
            "message" => Some("event"),
            name if name.starts_with("log.") => None,
            name => Some(name),
        }
    }

    fn insert(&mut self, field: &Field, value: impl Into<FieldValue>) {
        if let Some(key) = Self::key(field) {
            self.record.insert(key, value);
        }
    }
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, value);
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value);
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value);
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "exc_info" {
            if value {
                self.record.exc_info = Some(ExcInfo::Active);
            }
            return;
        }
        self.insert(field, value);
    }

    fn record_bytes(&mut self, field: &Field, value: &[u8]) {
        self.insert(field, value.to_vec());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        self.record.exc_info = Some(ExcInfo::Captured(CapturedError::from_dyn(value)));
        if field.name() != "error" && field.name() != "exc_info" {
            self.insert(field, value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.insert(field, format!("{:?}", value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::{LoggingConfigurator, PipelineConfig};
    use crate::output::{MemoryWriter, OutputStream, SharedWriter};
    use serial_test::serial;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    fn structured(out: &MemoryWriter) -> LoggingConfigurator {
        let configurator =
            LoggingConfigurator::new().with_harness_marker("TASK_LOG_UNIT_TEST_MARKER_UNSET");
        configurator
            .configure(
                PipelineConfig::default()
                    .pretty(false)
                    .output(OutputStream::binary(out.clone())),
            )
            .unwrap();
        configurator
    }

    fn lines(out: &MemoryWriter) -> Vec<serde_json::Value> {
        out.contents_lossy()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    #[serial]
    fn native_events_render_as_json_lines() {
        let out = MemoryWriter::new();
        let configurator = structured(&out);
        let subscriber = Registry::default().with(configurator.layer());

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("task", dag_id = "etl", try_number = 1);
            let _entered = span.enter();
            tracing::info!(try_number = 2, token = "eyJhbGci", "starting {}", "run");
        });

        let records = lines(&out);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record["event"], "starting run");
        assert_eq!(record["level"], "info");
        assert_eq!(record["dag_id"], "etl");
        assert_eq!(record["try_number"], 2);
        assert_eq!(record["token"], "eyJ***");

        let raw = out.contents_lossy();
        assert!(raw.starts_with("{\"timestamp\":\""), "{raw}");
        assert!(raw.contains("\",\"level\":\"info\",\"event\":\"starting run\","), "{raw}");
        configurator.reset();
    }

    #[test]
    #[serial]
    fn native_events_below_level_are_dropped() {
        let out = MemoryWriter::new();
        let configurator =
            LoggingConfigurator::new().with_harness_marker("TASK_LOG_UNIT_TEST_MARKER_UNSET");
        configurator
            .configure(
                PipelineConfig::default()
                    .pretty(false)
                    .level("warning")
                    .output(OutputStream::binary(out.clone())),
            )
            .unwrap();

        tracing::subscriber::with_default(Registry::default().with(configurator.layer()), || {
            tracing::info!("quiet");
            tracing::warn!("loud");
        });

        let records = lines(&out);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["event"], "loud");
        configurator.reset();
    }

    #[test]
    #[serial]
    fn noisy_targets_stay_at_warn_for_native_events() {
        let out = MemoryWriter::new();
        let configurator = structured(&out);

        tracing::subscriber::with_default(Registry::default().with(configurator.layer()), || {
            tracing::debug!(target: "hyper::client::pool", "reuse idle connection");
            tracing::info!(target: "sqlx::query", "SELECT 1");
            tracing::warn!(target: "h2::proto", "stream reset");
            tracing::debug!(target: "task_sdk::runner", "heartbeat");
        });

        let records = lines(&out);
        let events: Vec<_> = records.iter().map(|r| r["event"].as_str().unwrap()).collect();
        assert_eq!(events, ["stream reset", "heartbeat"]);
        configurator.reset();
    }

    #[derive(Debug)]
    struct Timeout;

    impl fmt::Display for Timeout {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("request timed out")
        }
    }

    impl Error for Timeout {}

    #[test]
    #[serial]
    fn recorded_errors_become_exception_frames() {
        let out = MemoryWriter::new();
        let configurator = structured(&out);

        tracing::subscriber::with_default(Registry::default().with(configurator.layer()), || {
            let err: &(dyn Error + 'static) = &Timeout;
            tracing::error!(error = err, "fetch failed");
        });

        let records = lines(&out);
        let exception = records[0]["exception"].as_array().unwrap();
        assert_eq!(exception[0]["exc_type"], "Timeout");
        assert_eq!(exception[0]["exc_value"], "request timed out");
        configurator.reset();
    }

    #[test]
    #[serial]
    fn supervisor_route_frames_onto_output() {
        let out = MemoryWriter::new();
        let configurator =
            LoggingConfigurator::new().with_harness_marker("TASK_LOG_UNIT_TEST_MARKER_UNSET");
        let pipeline = configurator
            .configure(
                PipelineConfig::default()
                    .pretty(false)
                    .output(OutputStream::Binary(SharedWriter::new(out.clone())))
                    .sending_to_supervisor(true),
            )
            .unwrap();

        let mut event = EventDict::with_event(LogLevel::Info, "from log facade");
        event.insert("positional_args", serde_json::json!(["x"]));
        pipeline.emit_foreign("task_sdk::bridge", event).unwrap();

        let records = lines(&out);
        assert_eq!(records[0]["event"], "from log facade");
        assert_eq!(records[0]["logger"], "task_sdk::bridge");
        assert!(records[0].get("positional_args").is_none());
        configurator.reset();
    }
}
