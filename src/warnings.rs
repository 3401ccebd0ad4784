//! Runtime warnings and the bridge that routes them into the log.
//!
//! Warnings are shown through one process-wide display handler. While the
//! pipeline is configured, [`WarningCapture`] replaces that handler with a
//! bridge that logs each warning as a `WARN` event; `reset` puts the
//! previous handler back.

use std::io::Write;
use std::panic::Location;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// A warning raised at a source location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub message: String,
    pub category: String,
    pub filename: String,
    pub lineno: u32,
}

impl Warning {
    /// `file:line: Category: message`
    pub fn formatted(&self) -> String {
        format!("{}:{}: {}: {}", self.filename, self.lineno, self.category, self.message)
    }
}

/// Display handler. The optional writer is an explicit destination chosen by
/// the caller; without one the handler picks its own.
pub type ShowWarning = Arc<dyn Fn(&Warning, Option<&mut dyn Write>) + Send + Sync>;

/// `None` means the built-in handler.
static HANDLER: RwLock<Option<ShowWarning>> = RwLock::new(None);

fn default_show(warning: &Warning, file: Option<&mut dyn Write>) {
    let line = warning.formatted();
    match file {
        Some(file) => {
            let _ = writeln!(file, "{}", line);
        }
        None => eprintln!("{}", line),
    }
}

/// Replace the display handler; `None` restores the built-in one.
pub fn set_handler(handler: Option<ShowWarning>) {
    *HANDLER.write().unwrap_or_else(PoisonError::into_inner) = handler;
}

/// The installed display handler, or `None` for the built-in one.
pub fn current_handler() -> Option<ShowWarning> {
    HANDLER.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Dispatch `warning` to the current display handler.
pub fn show_warning(warning: &Warning, file: Option<&mut dyn Write>) {
    match current_handler() {
        Some(handler) => handler(warning, file),
        None => default_show(warning, file),
    }
}

/// Raise a warning attributed to the caller's location.
#[track_caller]
pub fn warn(message: impl Into<String>, category: impl Into<String>) {
    let location = Location::caller();
    let warning = Warning {
        message: message.into(),
        category: category.into(),
        filename: location.file().to_string(),
        lineno: location.line(),
    };
    show_warning(&warning, None);
}

/// Owner of the display handler that was active before the bridge went in.
pub struct WarningCapture {
    /// `Some(previous)` while the bridge is installed.
    saved: Mutex<Option<Option<ShowWarning>>>,
}

impl WarningCapture {
    pub const fn new() -> Self {
        Self {
            saved: Mutex::new(None),
        }
    }

    pub fn global() -> &'static WarningCapture {
        static GLOBAL: WarningCapture = WarningCapture::new();
        &GLOBAL
    }

    /// Install the bridge unless it already is. Returns whether it was installed now.
    pub fn install(&self) -> bool {
        let mut saved = self.saved.lock().unwrap_or_else(PoisonError::into_inner);
        if saved.is_some() {
            return false;
        }
        let previous = current_handler();
        *saved = Some(previous.clone());
        set_handler(Some(bridge(previous)));
        true
    }

    /// Put the saved handler back. No-op when the bridge is not installed.
    pub fn uninstall(&self) {
        let mut saved = self.saved.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = saved.take() {
            set_handler(previous);
        }
    }

    pub fn is_installed(&self) -> bool {
        self.saved.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl Default for WarningCapture {
    fn default() -> Self {
        Self::new()
    }
}

fn bridge(previous: Option<ShowWarning>) -> ShowWarning {
    Arc::new(move |warning: &Warning, file: Option<&mut dyn Write>| {
        if file.is_some() {
            match &previous {
                Some(handler) => handler(warning, file),
                None => default_show(warning, file),
            }
            return;
        }
        tracing::warn!(
            logger_name = "warnings",
            category = %warning.category,
            filename = %warning.filename,
            lineno = warning.lineno,
            "{}",
            warning.message
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn recorder() -> (ShowWarning, Arc<Mutex<Vec<Warning>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: ShowWarning = Arc::new(move |w: &Warning, _file: Option<&mut dyn Write>| {
            sink.lock().unwrap().push(w.clone());
        });
        (handler, seen)
    }

    #[test]
    #[serial]
    fn install_is_once_and_uninstall_restores() {
        let (handler, _) = recorder();
        set_handler(Some(handler.clone()));
        let capture = WarningCapture::new();

        assert!(capture.install());
        assert!(!capture.install());
        assert!(capture.is_installed());
        assert!(!Arc::ptr_eq(&current_handler().unwrap(), &handler));

        capture.uninstall();
        assert!(Arc::ptr_eq(&current_handler().unwrap(), &handler));
        capture.uninstall();
        assert!(!capture.is_installed());
        set_handler(None);
    }

    #[test]
    #[serial]
    fn explicit_file_goes_to_previous_handler() {
        let (handler, seen) = recorder();
        set_handler(Some(handler));
        let capture = WarningCapture::new();
        capture.install();

        let warning = Warning {
            message: "deprecated".into(),
            category: "DeprecationWarning".into(),
            filename: "dag.py".into(),
            lineno: 3,
        };
        let mut file = Vec::new();
        show_warning(&warning, Some(&mut file as &mut dyn Write));
        assert_eq!(seen.lock().unwrap().as_slice(), &[warning]);

        capture.uninstall();
        set_handler(None);
    }

    #[test]
    #[serial]
    fn warn_reports_caller_location() {
        let (handler, seen) = recorder();
        set_handler(Some(handler));
        warn("old api", "DeprecationWarning");
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].filename, file!());
        assert_eq!(seen[0].category, "DeprecationWarning");
        set_handler(None);
    }

    #[test]
    fn default_format() {
        let warning = Warning {
            message: "m".into(),
            category: "UserWarning".into(),
            filename: "f.rs".into(),
            lineno: 7,
        };
        let mut out = Vec::new();
        default_show(&warning, Some(&mut out as &mut dyn Write));
        assert_eq!(String::from_utf8(out).unwrap(), "f.rs:7: UserWarning: m\n");
    }
}
