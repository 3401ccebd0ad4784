//! Captured errors and their structured or textual tracebacks.
//!
//! Errors are captured at the logging call site as a [`CapturedError`]:
//! either a single error (with its `source()` chain as causes) or a group
//! aggregating several member errors. Formatting never fails.

use crate::processors::Processor;
use crate::record::EventDict;
use serde::Serialize;
use serde_json::{json, Value};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::error::Error;
use std::marker::PhantomData;
use std::sync::Arc;

/// Module prefixes whose frames are elided from tracebacks.
pub const SUPPRESSED_MODULES: &[&str] = &[
    "tracing",
    "tracing_core",
    "tracing_subscriber",
    "tracing_log",
    "log",
    "reqwest",
    "hyper",
    "h2",
];

/// Frames rendered by the pretty traceback before the middle is elided.
pub const MAX_TRACEBACK_FRAMES: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    pub filename: String,
    pub lineno: u32,
    pub name: String,
}

/// One error with its message, frames and chained cause.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    pub exc_type: String,
    pub message: String,
    pub frames: Vec<Frame>,
    pub cause: Option<Box<ErrorReport>>,
}

impl ErrorReport {
    pub fn new(exc_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exc_type: exc_type.into(),
            message: message.into(),
            frames: Vec::new(),
            cause: None,
        }
    }

    pub fn with_frames(mut self, frames: Vec<Frame>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_cause(mut self, cause: ErrorReport) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    fn from_dyn(err: &(dyn Error + 'static)) -> Self {
        Self {
            exc_type: type_label(err),
            message: err.to_string(),
            frames: Vec::new(),
            cause: err.source().map(|source| Box::new(Self::from_dyn(source))),
        }
    }

    /// Iterate this report followed by its causes, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &ErrorReport> {
        std::iter::successors(Some(self), |r| r.cause.as_deref())
    }
}

/// An error captured for logging: a single error or a group of errors.
#[derive(Debug, Clone, PartialEq)]
pub enum CapturedError {
    Single(ErrorReport),
    Group {
        report: ErrorReport,
        members: Vec<CapturedError>,
    },
}

impl CapturedError {
    /// Capture `err`, its source chain and, when enabled, the current backtrace.
    pub fn from_error<E: Error + 'static>(err: &E) -> Self {
        let mut report = ErrorReport::from_dyn(err);
        report.exc_type = short_type_name(std::any::type_name::<E>());
        report.frames = capture_frames();
        CapturedError::Single(report)
    }

    /// Capture an error only known as a trait object.
    pub fn from_dyn(err: &(dyn Error + 'static)) -> Self {
        let mut report = ErrorReport::from_dyn(err);
        report.frames = capture_frames();
        CapturedError::Single(report)
    }

    pub fn group(message: impl Into<String>, members: Vec<CapturedError>) -> Self {
        let report = ErrorReport::new("ExceptionGroup", message).with_frames(capture_frames());
        CapturedError::Group { report, members }
    }

    pub fn report(&self) -> &ErrorReport {
        match self {
            CapturedError::Single(report) => report,
            CapturedError::Group { report, .. } => report,
        }
    }

    pub fn members(&self) -> &[CapturedError] {
        match self {
            CapturedError::Single(_) => &[],
            CapturedError::Group { members, .. } => members,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, CapturedError::Group { .. })
    }
}

impl From<ErrorReport> for CapturedError {
    fn from(report: ErrorReport) -> Self {
        CapturedError::Single(report)
    }
}

/// Pending exception attached to a record.
#[derive(Debug, Clone)]
pub enum ExcInfo {
    /// Use whichever error is active on this thread when the record is processed.
    Active,
    Captured(CapturedError),
}

impl ExcInfo {
    pub fn resolve(&self) -> Option<CapturedError> {
        match self {
            ExcInfo::Active => active_error(),
            ExcInfo::Captured(err) => Some(err.clone()),
        }
    }
}

impl From<CapturedError> for ExcInfo {
    fn from(err: CapturedError) -> Self {
        ExcInfo::Captured(err)
    }
}

thread_local! {
    static ACTIVE: RefCell<Vec<CapturedError>> = const { RefCell::new(Vec::new()) };
}

/// Marks an error as being handled on this thread until dropped.
#[must_use = "the error stops being active when the guard is dropped"]
pub struct ActiveErrorGuard {
    _not_send: PhantomData<*const ()>,
}

/// Make `err` the active error for [`ExcInfo::Active`] lookups on this thread.
pub fn enter_error(err: CapturedError) -> ActiveErrorGuard {
    ACTIVE.with(|active| active.borrow_mut().push(err));
    ActiveErrorGuard { _not_send: PhantomData }
}

impl Drop for ActiveErrorGuard {
    fn drop(&mut self) {
        let _ = ACTIVE.try_with(|active| active.borrow_mut().pop());
    }
}

/// Innermost active error on this thread, if any.
pub fn active_error() -> Option<CapturedError> {
    ACTIVE
        .try_with(|active| active.try_borrow().ok().and_then(|a| a.last().cloned()))
        .ok()
        .flatten()
}

fn capture_frames() -> Vec<Frame> {
    let backtrace = Backtrace::capture();
    if backtrace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }
    parse_backtrace(&backtrace.to_string())
}

/// Parse the `Display` output of [`std::backtrace::Backtrace`] into frames.
pub fn parse_backtrace(text: &str) -> Vec<Frame> {
    let mut frames: Vec<Frame> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                let mut parts = location.rsplitn(3, ':');
                let _col = parts.next();
                let lineno = parts.next().and_then(|l| l.parse().ok());
                match (lineno, parts.next()) {
                    (Some(lineno), Some(file)) => {
                        frame.filename = file.to_string();
                        frame.lineno = lineno;
                    }
                    _ => frame.filename = location.to_string(),
                }
            }
        } else if let Some((index, name)) = line.split_once(": ") {
            if index.chars().all(|c| c.is_ascii_digit()) && !index.is_empty() {
                frames.push(Frame {
                    filename: "<unknown>".to_string(),
                    lineno: 0,
                    name: name.to_string(),
                });
            }
        }
    }
    frames
}

fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

fn type_label(err: &dyn Error) -> String {
    let debug = format!("{:?}", err);
    let ident: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if ident.is_empty() {
        "Error".to_string()
    } else {
        ident
    }
}

fn is_suppressed(suppress: &[String], frame: &Frame) -> bool {
    let name = frame.name.trim_start_matches('<');
    suppress
        .iter()
        .any(|module| name == module || name.starts_with(&format!("{}::", module)))
}

/// Turns one captured error into a list of frame-list objects.
pub trait FrameListFormatter: Send + Sync {
    fn format_exception(&self, err: &CapturedError) -> Vec<Value>;
}

/// Structured traceback: one object per error and per chained cause.
/// Locals are never included.
#[derive(Debug, Clone)]
pub struct ExceptionDictTransformer {
    suppress: Vec<String>,
}

impl ExceptionDictTransformer {
    pub fn new(suppress: &[&str]) -> Self {
        Self {
            suppress: suppress.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn stack(&self, report: &ErrorReport, is_cause: bool, members: &[CapturedError], is_group: bool) -> Value {
        let frames: Vec<&Frame> = report
            .frames
            .iter()
            .filter(|f| !is_suppressed(&self.suppress, f))
            .collect();
        let exceptions: Vec<Value> = members
            .iter()
            .map(|m| Value::Array(self.format_exception(m)))
            .collect();
        json!({
            "exc_type": report.exc_type,
            "exc_value": report.message,
            "is_cause": is_cause,
            "is_group": is_group,
            "exceptions": exceptions,
            "frames": serde_json::to_value(frames).unwrap_or(Value::Array(Vec::new())),
        })
    }
}

impl FrameListFormatter for ExceptionDictTransformer {
    fn format_exception(&self, err: &CapturedError) -> Vec<Value> {
        let report = err.report();
        let mut stacks = vec![self.stack(report, false, err.members(), err.is_group())];
        for cause in report.chain().skip(1) {
            stacks.push(self.stack(cause, true, &[], false));
        }
        stacks
    }
}

/// Compact text traceback for the pretty console.
#[derive(Debug, Clone)]
pub struct TracebackFormatter {
    suppress: Vec<String>,
    max_frames: usize,
}

impl TracebackFormatter {
    pub fn new(suppress: &[&str], max_frames: usize) -> Self {
        Self {
            suppress: suppress.iter().map(|s| s.to_string()).collect(),
            max_frames: max_frames.max(2),
        }
    }

    pub fn format(&self, err: &CapturedError) -> String {
        let mut out = String::new();
        self.write_error(&mut out, err, "");
        out
    }

    fn write_error(&self, out: &mut String, err: &CapturedError, indent: &str) {
        let report = err.report();
        for (i, r) in report.chain().enumerate() {
            if i > 0 {
                out.push_str(&format!("{}Caused by:\n", indent));
            }
            self.write_frames(out, &r.frames, indent);
            out.push_str(&format!("{}{}: {}\n", indent, r.exc_type, r.message));
        }
        let members = err.members();
        if !members.is_empty() {
            let nested = format!("{}| ", indent);
            for (i, member) in members.iter().enumerate() {
                out.push_str(&format!("{}+---------------- {} ----------------\n", indent, i + 1));
                self.write_error(out, member, &nested);
            }
            out.push_str(&format!("{}+------------------------------------\n", indent));
        }
    }

    fn write_frames(&self, out: &mut String, frames: &[Frame], indent: &str) {
        let visible: Vec<&Frame> = frames
            .iter()
            .filter(|f| !is_suppressed(&self.suppress, f))
            .collect();
        let (head, tail, hidden) = if visible.len() > self.max_frames {
            let half = self.max_frames / 2;
            (&visible[..half], &visible[visible.len() - half..], visible.len() - 2 * half)
        } else {
            (&visible[..], &visible[visible.len()..], 0)
        };
        for frame in head {
            out.push_str(&format!("{}  {}:{} in {}\n", indent, frame.filename, frame.lineno, frame.name));
        }
        if hidden > 0 {
            out.push_str(&format!("{}  ... {} frames hidden ...\n", indent, hidden));
        }
        for frame in tail {
            out.push_str(&format!("{}  {}:{} in {}\n", indent, frame.filename, frame.lineno, frame.name));
        }
    }
}

/// Flattens grouped errors into the `exception` field.
///
/// Single errors are left in `exc_info` for the renderer.
pub struct ExceptionGroupProcessor {
    formatter: Arc<dyn FrameListFormatter>,
}

impl ExceptionGroupProcessor {
    pub fn new(formatter: Arc<dyn FrameListFormatter>) -> Self {
        Self { formatter }
    }
}

impl Processor for ExceptionGroupProcessor {
    fn process(&self, event: &mut EventDict) {
        let Some(resolved) = event.exc_info.as_ref().and_then(ExcInfo::resolve) else {
            return;
        };
        if !resolved.is_group() {
            return;
        }
        let mut stacks = Vec::new();
        for member in resolved.members() {
            stacks.extend(self.formatter.format_exception(member));
        }
        stacks.extend(self.formatter.format_exception(&resolved));
        event.exc_info = None;
        event.insert("exception", Value::Array(stacks));
    }
}

/// Replaces `exc_info` with a structured `exception` field.
pub struct ExceptionRenderer {
    formatter: Arc<dyn FrameListFormatter>,
}

impl ExceptionRenderer {
    pub fn new(formatter: Arc<dyn FrameListFormatter>) -> Self {
        Self { formatter }
    }
}

impl Processor for ExceptionRenderer {
    fn process(&self, event: &mut EventDict) {
        let Some(exc_info) = event.exc_info.take() else {
            return;
        };
        if let Some(err) = exc_info.resolve() {
            event.insert("exception", Value::Array(self.formatter.format_exception(&err)));
        }
    }
}
