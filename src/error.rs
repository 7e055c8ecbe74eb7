// ── Central error type ────────────────────────────────────────────────────────
//
// All fallible operations in webhost return `error::Result<T>`.  Startup
// failures surface as a modal error dialog (see `main.rs`); faults inside
// scheduled work are reported to the waiting caller or to the fault sink
// (`scheduler::fault`).

use std::any::Any;

use thiserror::Error;

/// Every error that webhost can produce.
#[derive(Debug, Error)]
pub enum ShellError {
    /// The native window handle could not be created (null handle).
    #[error("window could not be created (error {code:#010x})")]
    WindowCreation {
        /// The raw `GetLastError()` value, or 0 if none was available.
        code: u32,
    },

    /// The window class could not be registered.
    #[error("window class could not be registered (error {code:#010x})")]
    ClassRegistration {
        /// The raw `GetLastError()` value, or 0 if none was available.
        code: u32,
    },

    /// A programming error in how the scheduler was installed or used.
    #[error("scheduler misuse: {0}")]
    SchedulerMisuse(String),

    /// A unit of work panicked while running on the loop thread.
    #[error(transparent)]
    WorkItemFault(#[from] WorkItemFault),

    /// Work was submitted after the owning window tore its scheduler down.
    #[error("scheduler is closed; the message loop is no longer draining work")]
    SchedulerClosed,

    /// A local task was aborted before it finished.
    #[error("task was aborted")]
    TaskAborted,

    /// A Win32 API call returned a failure code.
    #[error("{function} failed (error {code:#010x})")]
    Win32 {
        /// The name of the failing function, for display purposes.
        function: &'static str,
        /// The raw Win32 error code (`GetLastError()` value) or HRESULT.
        code: u32,
    },

    /// The browser control reported a failure.
    #[error("browser control: {0}")]
    Browser(String),

    /// The configuration file exists but could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A panic captured from a work item, carried back to whoever can handle it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("work item panicked: {message}")]
pub struct WorkItemFault {
    /// The panic payload rendered as text.
    pub message: String,
}

impl WorkItemFault {
    /// Build a fault from the payload returned by `std::panic::catch_unwind`.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self { message }
    }
}

// Convert a windows-crate error (HRESULT) directly into a ShellError so that
// `?` can be used on `windows::core::Result<T>` throughout the platform module.
#[cfg(windows)]
impl From<windows::core::Error> for ShellError {
    fn from(e: windows::core::Error) -> Self {
        // HRESULT.0 is i32; reinterpret bits as u32 for display purposes.
        Self::Win32 {
            function: "windows",
            code: e.code().0 as u32,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ShellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fault_from_str_payload() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(WorkItemFault::from_panic(payload).message, "boom");
    }

    #[test]
    fn fault_from_formatted_payload() {
        let n = 7;
        let payload = std::panic::catch_unwind(move || panic!("bad item {n}")).unwrap_err();
        assert_eq!(WorkItemFault::from_panic(payload).message, "bad item 7");
    }

    #[test]
    fn fault_from_opaque_payload() {
        let payload = std::panic::catch_unwind(|| std::panic::panic_any(42_u8)).unwrap_err();
        assert_eq!(
            WorkItemFault::from_panic(payload).message,
            "non-string panic payload"
        );
    }

    #[test]
    fn display_formats() {
        let e = ShellError::WindowCreation { code: 5 };
        assert_eq!(e.to_string(), "window could not be created (error 0x00000005)");
        let e = ShellError::from(WorkItemFault { message: "x".into() });
        assert_eq!(e.to_string(), "work item panicked: x");
    }
}
