//! Handlers for records bridged from the `log` facade.
//!
//! A handler owns a [`ProcessorFormatter`] and a destination. Emitting never
//! propagates sink failures: they are reported once on stderr and the frame is
//! dropped. Runaway re-entrant emitting is the one failure callers see.

use crate::error::{EmitError, SinkEmitError};
use crate::level::LogLevel;
use crate::output::SharedWriter;
use crate::processors::Processor;
use crate::record::EventDict;
use crate::render::{Rendered, Renderer};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Nesting depth at which a re-entrant emit is treated as a stack overflow.
pub const MAX_EMIT_DEPTH: usize = 16;

/// Runs a foreign pre-chain and the formatter processors, then renders.
pub struct ProcessorFormatter {
    name: &'static str,
    foreign_pre_chain: Vec<Arc<dyn Processor>>,
    processors: Vec<Arc<dyn Processor>>,
    renderer: Arc<dyn Renderer>,
}

impl ProcessorFormatter {
    pub fn new(
        name: &'static str,
        foreign_pre_chain: Vec<Arc<dyn Processor>>,
        processors: Vec<Arc<dyn Processor>>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            name,
            foreign_pre_chain,
            processors,
            renderer,
        }
    }

    /// `"plain"` for JSON output, `"colored"` for the console.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn format(&self, mut event: EventDict) -> Result<Rendered, SinkEmitError> {
        for processor in self.foreign_pre_chain.iter().chain(&self.processors) {
            processor.process(&mut event);
        }
        self.renderer.render(event)
    }
}

pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    /// Records below this level are not emitted.
    fn level(&self) -> LogLevel;

    fn emit(&self, event: EventDict) -> Result<(), EmitError>;
}

thread_local! {
    static EMIT_DEPTH: Cell<usize> = const { Cell::new(0) };
    static OVERFLOWED: Cell<bool> = const { Cell::new(false) };
}

/// Tracks emit nesting on the current thread.
struct EmitGuard;

impl EmitGuard {
    fn enter() -> Option<Self> {
        let depth = EMIT_DEPTH.with(Cell::get);
        if depth >= MAX_EMIT_DEPTH {
            OVERFLOWED.with(|o| o.set(true));
            return None;
        }
        EMIT_DEPTH.with(|d| d.set(depth + 1));
        Some(EmitGuard)
    }

    fn overflowed(&self) -> bool {
        OVERFLOWED.with(Cell::get)
    }
}

impl Drop for EmitGuard {
    fn drop(&mut self) {
        let depth = EMIT_DEPTH.with(|d| {
            let depth = d.get().saturating_sub(1);
            d.set(depth);
            depth
        });
        if depth == 0 {
            OVERFLOWED.with(|o| o.set(false));
        }
    }
}

/// Reports the first sink failure on stderr and counts every dropped frame.
#[derive(Debug, Default)]
pub(crate) struct ErrorReporter {
    reported: AtomicBool,
    dropped: AtomicU64,
}

impl ErrorReporter {
    pub(crate) fn handle(&self, source: &str, err: &SinkEmitError) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        if !self.reported.swap(true, Ordering::Relaxed) {
            eprintln!("--- logging error in {}: {} (further errors are not reported)", source, err);
        }
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Run one emit under the recursion guard, absorbing sink failures.
    pub(crate) fn guarded<F>(&self, source: &str, emit: F) -> Result<(), EmitError>
    where
        F: FnOnce() -> Result<(), SinkEmitError>,
    {
        let guard = EmitGuard::enter().ok_or(EmitError::StackOverflow {
            depth: MAX_EMIT_DEPTH,
        })?;
        let result = emit();
        if guard.overflowed() {
            return Err(EmitError::StackOverflow {
                depth: MAX_EMIT_DEPTH,
            });
        }
        if let Err(err) = result {
            self.handle(source, &err);
        }
        Ok(())
    }
}

/// Copy `bytes`, replacing invalid UTF-8 sequences with `\xNN` escapes.
pub fn escape_invalid_utf8(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.extend_from_slice(chunk.valid().as_bytes());
        for b in chunk.invalid() {
            out.extend_from_slice(format!("\\x{:02x}", b).as_bytes());
        }
    }
    out
}

/// Writes each record as UTF-8 bytes plus a newline to a byte stream.
///
/// Used for the supervisor channel, where stdout may carry data of its own.
pub struct BinaryStreamHandler {
    name: String,
    level: LogLevel,
    formatter: Arc<ProcessorFormatter>,
    stream: SharedWriter,
    errors: ErrorReporter,
}

impl BinaryStreamHandler {
    pub fn new(
        name: impl Into<String>,
        level: LogLevel,
        formatter: Arc<ProcessorFormatter>,
        stream: SharedWriter,
    ) -> Self {
        Self {
            name: name.into(),
            level,
            formatter,
            stream,
            errors: ErrorReporter::default(),
        }
    }

    /// Frames dropped because formatting or writing failed.
    pub fn dropped_frames(&self) -> u64 {
        self.errors.dropped()
    }
}

impl Handler for BinaryStreamHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> LogLevel {
        self.level
    }

    fn emit(&self, event: EventDict) -> Result<(), EmitError> {
        self.errors.guarded(&self.name, || {
            let rendered = self.formatter.format(event)?;
            let mut buffer = escape_invalid_utf8(rendered.as_bytes());
            buffer.push(b'\n');
            self.stream.write_frame(&buffer)?;
            Ok(())
        })
    }
}

/// Writes each record as text plus a newline, by default to stderr.
pub struct StreamHandler {
    name: String,
    level: LogLevel,
    formatter: Arc<ProcessorFormatter>,
    stream: SharedWriter,
    errors: ErrorReporter,
}

impl StreamHandler {
    pub fn new(
        name: impl Into<String>,
        level: LogLevel,
        formatter: Arc<ProcessorFormatter>,
        stream: SharedWriter,
    ) -> Self {
        Self {
            name: name.into(),
            level,
            formatter,
            stream,
            errors: ErrorReporter::default(),
        }
    }
}

impl Handler for StreamHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> LogLevel {
        self.level
    }

    fn emit(&self, event: EventDict) -> Result<(), EmitError> {
        self.errors.guarded(&self.name, || {
            let rendered = self.formatter.format(event)?;
            let mut text = String::from_utf8_lossy(rendered.as_bytes()).into_owned();
            text.push('\n');
            self.stream.write_frame(text.as_bytes())?;
            Ok(())
        })
    }
}
