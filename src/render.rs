//! Terminal renderers: the last step of a processor chain.

use crate::error::SinkEmitError;
use crate::exception::{ExcInfo, TracebackFormatter, MAX_TRACEBACK_FRAMES, SUPPRESSED_MODULES};
use crate::record::{EventDict, FieldValue};
use std::fmt::Write as _;

/// Keys the JSON renderer always puts first, in this order.
pub const LEADING_KEYS: [&str; 3] = ["timestamp", "level", "event"];

const LEVEL_WIDTH: usize = 9;
const EVENT_WIDTH: usize = 30;

/// Output of a renderer, ready for a writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Text(String),
    Bytes(Vec<u8>),
}

impl Rendered {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Rendered::Text(s) => s.as_bytes(),
            Rendered::Bytes(b) => b,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Rendered::Text(s) => s.into_bytes(),
            Rendered::Bytes(b) => b,
        }
    }
}

pub trait Renderer: Send + Sync {
    fn render(&self, event: EventDict) -> Result<Rendered, SinkEmitError>;
}

/// Line-delimited JSON with `timestamp`, `level`, `event` leading.
#[derive(Debug, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, mut event: EventDict) -> Result<Rendered, SinkEmitError> {
        event.move_to_front(&LEADING_KEYS);
        Ok(Rendered::Bytes(serde_json::to_vec(&event)?))
    }
}

/// Human-oriented single-line rendering with an optional traceback below.
#[derive(Debug)]
pub struct ConsoleRenderer {
    colors: bool,
    exception_formatter: TracebackFormatter,
}

impl ConsoleRenderer {
    pub fn new(colors: bool) -> Self {
        Self {
            colors: colors && cfg!(feature = "color"),
            exception_formatter: TracebackFormatter::new(SUPPRESSED_MODULES, MAX_TRACEBACK_FRAMES),
        }
    }

    pub fn colors(&self) -> bool {
        self.colors
    }
}

impl Default for ConsoleRenderer {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Renderer for ConsoleRenderer {
    fn render(&self, mut event: EventDict) -> Result<Rendered, SinkEmitError> {
        let timestamp = take_text(&mut event, "timestamp");
        let level = take_text(&mut event, "level");
        let message = take_text(&mut event, "event");
        let logger = take_text(&mut event, "logger");
        let stack = take_text(&mut event, "stack");
        let exception = event.remove("exception");
        let exc_info = event.exc_info.take();

        let mut line = String::new();
        if let Some(ts) = timestamp {
            line.push_str(&style::dimmed(self.colors, &ts));
            line.push(' ');
        }
        if let Some(level) = level {
            let padded = format!("{:<width$}", level, width = LEVEL_WIDTH);
            let _ = write!(line, "[{}] ", style::level(self.colors, &level, &padded));
        }
        if let Some(message) = message {
            let padded = format!("{:<width$}", message, width = EVENT_WIDTH);
            line.push_str(&style::bold(self.colors, &padded));
            line.push(' ');
        }
        if let Some(logger) = logger {
            let _ = write!(line, "[{}] ", style::blue(self.colors, &logger));
        }

        let mut pairs: Vec<(&str, &FieldValue)> = event.iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in pairs {
            let _ = write!(
                line,
                "{}={} ",
                style::cyan(self.colors, key),
                style::magenta(self.colors, &value.to_display_string())
            );
        }
        let mut out = line.trim_end().to_string();

        if let Some(stack) = stack {
            out.push('\n');
            out.push_str(&stack);
        }
        match (exc_info.as_ref().and_then(ExcInfo::resolve), exception) {
            (Some(err), _) => {
                out.push('\n');
                out.push_str(self.exception_formatter.format(&err).trim_end());
            }
            (None, Some(rendered)) => {
                out.push('\n');
                match rendered.as_str() {
                    Some(text) => out.push_str(text),
                    None => out.push_str(&rendered.to_display_string()),
                }
            }
            (None, None) => {}
        }
        Ok(Rendered::Text(out))
    }
}

fn take_text(event: &mut EventDict, key: &str) -> Option<String> {
    event.remove(key).map(|v| match v.as_str() {
        Some(s) => s.to_string(),
        None => v.to_display_string(),
    })
}

#[cfg(feature = "color")]
mod style {
    use owo_colors::OwoColorize;

    pub fn level(enabled: bool, level: &str, text: &str) -> String {
        if !enabled {
            return text.to_string();
        }
        match level {
            "critical" => text.red().bold().to_string(),
            "error" | "exception" => text.red().to_string(),
            "warning" | "warn" => text.yellow().to_string(),
            "info" => text.green().to_string(),
            "debug" => text.cyan().to_string(),
            _ => text.to_string(),
        }
    }

    pub fn dimmed(enabled: bool, text: &str) -> String {
        if enabled { text.dimmed().to_string() } else { text.to_string() }
    }

    pub fn bold(enabled: bool, text: &str) -> String {
        if enabled { text.bold().to_string() } else { text.to_string() }
    }

    pub fn blue(enabled: bool, text: &str) -> String {
        if enabled { text.blue().to_string() } else { text.to_string() }
    }

    pub fn cyan(enabled: bool, text: &str) -> String {
        if enabled { text.cyan().to_string() } else { text.to_string() }
    }

    pub fn magenta(enabled: bool, text: &str) -> String {
        if enabled { text.magenta().to_string() } else { text.to_string() }
    }
}

#[cfg(not(feature = "color"))]
mod style {
    pub fn level(_enabled: bool, _level: &str, text: &str) -> String {
        text.to_string()
    }

    pub fn dimmed(_enabled: bool, text: &str) -> String {
        text.to_string()
    }

    pub fn bold(_enabled: bool, text: &str) -> String {
        text.to_string()
    }

    pub fn blue(_enabled: bool, text: &str) -> String {
        text.to_string()
    }

    pub fn cyan(_enabled: bool, text: &str) -> String {
        text.to_string()
    }

    pub fn magenta(_enabled: bool, text: &str) -> String {
        text.to_string()
    }
}
