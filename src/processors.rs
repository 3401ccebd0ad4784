//! Record processors: small, total transforms applied in chain order.

use crate::context;
use crate::record::{EventDict, FieldValue};
use chrono::{Local, SecondsFormat, Utc};
use serde_json::Value;
use std::backtrace::Backtrace;

/// Prefix of a base64-encoded JSON web token header.
pub const JWT_PREFIX: &str = "eyJ";
pub const REDACTED_JWT: &str = "eyJ***";

/// Timestamp format used by the pretty console.
pub const PRETTY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// A transform applied to every record passing through a chain.
pub trait Processor: Send + Sync {
    fn process(&self, event: &mut EventDict);
}

/// Moves a legacy `logger_name` field into `logger`.
pub struct RenameLoggerField;

impl Processor for RenameLoggerField {
    fn process(&self, event: &mut EventDict) {
        if let Some(name) = event.remove("logger_name") {
            event.set_default("logger", name);
        }
    }
}

/// Masks string values that look like JSON web tokens.
pub struct RedactJwt;

impl Processor for RedactJwt {
    fn process(&self, event: &mut EventDict) {
        for (_, value) in event.iter_mut() {
            if value.as_str().is_some_and(|s| s.starts_with(JWT_PREFIX)) {
                *value = FieldValue::from(REDACTED_JWT);
            }
        }
    }
}

pub struct DropPositionalArgs;

impl Processor for DropPositionalArgs {
    fn process(&self, event: &mut EventDict) {
        event.remove("positional_args");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    /// ISO-8601 in UTC with microseconds, e.g. `2025-01-01T10:00:00.000000Z`.
    Iso,
    /// [`PRETTY_TIMESTAMP_FORMAT`] in local time.
    Pretty,
}

/// Adds a `timestamp` unless the record already carries one.
#[derive(Debug)]
pub struct Timestamper {
    format: TimestampFormat,
}

impl Timestamper {
    pub fn new(format: TimestampFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> TimestampFormat {
        self.format
    }

    pub fn now(&self) -> String {
        match self.format {
            TimestampFormat::Iso => Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            TimestampFormat::Pretty => Local::now().format(PRETTY_TIMESTAMP_FORMAT).to_string(),
        }
    }
}

impl Processor for Timestamper {
    fn process(&self, event: &mut EventDict) {
        if !event.contains_key("timestamp") {
            event.insert("timestamp", self.now());
        }
    }
}

/// Merges fields bound with [`context::bind_contextvars`] in front of the record.
pub struct MergeContextVars;

impl Processor for MergeContextVars {
    fn process(&self, event: &mut EventDict) {
        let bound = context::get_contextvars();
        if !bound.is_empty() {
            event.prepend(bound);
        }
    }
}

pub struct AddLogLevel;

impl Processor for AddLogLevel {
    fn process(&self, event: &mut EventDict) {
        let level = event.method_level().as_str();
        event.insert("level", level);
    }
}

/// Interpolates `positional_args` into a `%`-style `event` message.
pub struct PositionalArgumentsFormatter;

impl Processor for PositionalArgumentsFormatter {
    fn process(&self, event: &mut EventDict) {
        let args = match event.get("positional_args") {
            Some(FieldValue::Value(Value::Array(args))) if !args.is_empty() => args.clone(),
            _ => return,
        };
        if let Some(message) = event.get_str("event") {
            let formatted = percent_format(message, &args);
            event.insert("event", formatted);
        }
        event.remove("positional_args");
    }
}

fn percent_format(template: &str, args: &[Value]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some(conv @ ('s' | 'd' | 'r')) => match args.next() {
                Some(arg) => {
                    chars.next();
                    match (conv, arg) {
                        ('r', Value::String(s)) => out.push_str(&format!("'{}'", s)),
                        (_, Value::String(s)) => out.push_str(s),
                        (_, other) => out.push_str(&other.to_string()),
                    }
                }
                None => out.push('%'),
            },
            _ => out.push('%'),
        }
    }
    out
}

/// Replaces a truthy `stack_info` flag with a captured `stack`.
pub struct StackInfoRenderer;

impl Processor for StackInfoRenderer {
    fn process(&self, event: &mut EventDict) {
        if let Some(flag) = event.remove("stack_info") {
            if flag.is_truthy() {
                event.insert("stack", Backtrace::force_capture().to_string());
            }
        }
    }
}

/// Decodes byte-string fields to text so they can be JSON encoded.
pub struct UnicodeDecoder;

impl Processor for UnicodeDecoder {
    fn process(&self, event: &mut EventDict) {
        for (_, value) in event.iter_mut() {
            if let FieldValue::Bytes(bytes) = value {
                let text = String::from_utf8_lossy(bytes).into_owned();
                *value = FieldValue::from(text);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::LogLevel;
    use proptest::prelude::*;

    fn event() -> EventDict {
        EventDict::with_event(LogLevel::Info, "hello")
    }

    #[test]
    fn rename_logger_field_keeps_existing_logger() {
        let mut e = event();
        e.insert("logger_name", "legacy");
        RenameLoggerField.process(&mut e);
        assert_eq!(e.get_str("logger"), Some("legacy"));
        assert!(!e.contains_key("logger_name"));

        let mut e = event();
        e.insert("logger", "current");
        e.insert("logger_name", "legacy");
        RenameLoggerField.process(&mut e);
        assert_eq!(e.get_str("logger"), Some("current"));
        assert!(!e.contains_key("logger_name"));
    }

    #[test]
    fn rename_logger_field_without_fields_is_noop() {
        let mut e = event();
        RenameLoggerField.process(&mut e);
        assert_eq!(e.len(), 1);
    }

    #[test]
    fn redact_replaces_token_like_strings() {
        let mut e = event();
        e.insert("token", "eyJhbGciOiJIUzI1NiJ9.payload.sig");
        e.insert("lower", "eyj-not-a-token");
        e.insert("count", 3i64);
        RedactJwt.process(&mut e);
        assert_eq!(e.get_str("token"), Some("eyJ***"));
        assert_eq!(e.get_str("lower"), Some("eyj-not-a-token"));
        assert_eq!(e.get("count"), Some(&FieldValue::from(3i64)));
    }

    #[test]
    fn redact_covers_event_message() {
        let mut e = EventDict::with_event(LogLevel::Info, "eyJsecret");
        RedactJwt.process(&mut e);
        assert_eq!(e.get_str("event"), Some("eyJ***"));
    }

    #[test]
    fn drop_positional_args_removes_field() {
        let mut e = event();
        e.insert("positional_args", Value::Array(vec![Value::from(1)]));
        DropPositionalArgs.process(&mut e);
        assert!(!e.contains_key("positional_args"));
        DropPositionalArgs.process(&mut e);
    }

    #[test]
    fn timestamper_keeps_existing_value() {
        let mut e = event();
        e.insert("timestamp", "T");
        Timestamper::new(TimestampFormat::Iso).process(&mut e);
        assert_eq!(e.get_str("timestamp"), Some("T"));
    }

    #[test]
    fn timestamper_formats() {
        let iso = Timestamper::new(TimestampFormat::Iso).now();
        assert!(iso.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&iso).is_ok());

        let pretty = Timestamper::new(TimestampFormat::Pretty).now();
        assert!(chrono::NaiveDateTime::parse_from_str(&pretty, PRETTY_TIMESTAMP_FORMAT).is_ok());
        assert_eq!(pretty.len(), "2025-01-01 10:00:00.000000".len());
    }

    #[test]
    fn add_log_level_uses_call_level() {
        let mut e = EventDict::with_event(LogLevel::Warning, "careful");
        AddLogLevel.process(&mut e);
        assert_eq!(e.get_str("level"), Some("warning"));
    }

    #[test]
    fn positional_arguments_are_interpolated() {
        let mut e = EventDict::with_event(LogLevel::Info, "task %s took %d%% of %r");
        e.insert(
            "positional_args",
            Value::Array(vec![Value::from("extract"), Value::from(90), Value::from("quota")]),
        );
        PositionalArgumentsFormatter.process(&mut e);
        assert_eq!(e.get_str("event"), Some("task extract took 90% of 'quota'"));
        assert!(!e.contains_key("positional_args"));
    }

    #[test]
    fn missing_positional_argument_leaves_placeholder() {
        let mut e = EventDict::with_event(LogLevel::Info, "%s and %s");
        e.insert("positional_args", Value::Array(vec![Value::from("a")]));
        PositionalArgumentsFormatter.process(&mut e);
        assert_eq!(e.get_str("event"), Some("a and %s"));
    }

    #[test]
    fn stack_info_renders_backtrace() {
        let mut e = event();
        e.insert("stack_info", true);
        StackInfoRenderer.process(&mut e);
        assert!(!e.contains_key("stack_info"));
        assert!(e.contains_key("stack"));

        let mut e = event();
        e.insert("stack_info", false);
        StackInfoRenderer.process(&mut e);
        assert!(!e.contains_key("stack"));
    }

    #[test]
    fn unicode_decoder_decodes_bytes() {
        let mut e = event();
        e.insert("payload", FieldValue::Bytes(b"caf\xc3\xa9".to_vec()));
        UnicodeDecoder.process(&mut e);
        assert_eq!(e.get_str("payload"), Some("café"));
    }

    #[test]
    fn merge_context_vars_prepends_bound_fields() {
        context::clear_contextvars();
        context::bind_contextvars([("dag_id", "etl")]);
        let mut e = event();
        MergeContextVars.process(&mut e);
        context::clear_contextvars();
        assert_eq!(e.keys().collect::<Vec<_>>(), vec!["dag_id", "event"]);
    }

    proptest! {
        #[test]
        fn redaction_is_exact_and_idempotent(suffix in ".*", plain in "[a-df-z0-9 ]*") {
            let mut e = event();
            e.insert("jwt", format!("eyJ{}", suffix));
            e.insert("plain", plain.clone());
            RedactJwt.process(&mut e);
            let once = e.clone();
            RedactJwt.process(&mut e);

            prop_assert_eq!(e.get_str("jwt"), Some("eyJ***"));
            prop_assert_eq!(e.get_str("plain"), Some(plain.as_str()));
            prop_assert_eq!(serde_json::to_string(&once).unwrap(), serde_json::to_string(&e).unwrap());
        }
    }
}
