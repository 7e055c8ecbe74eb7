// ── Platform abstraction layer ────────────────────────────────────────────────
//
// This module defines the interface that the rest of the codebase uses to
// talk to the OS.  No `unsafe` lives here; all Win32 FFI is confined to the
// `win32` sub-module and never leaks outward.
//
// Two backends implement it:
//   • `win32`    – the real window, message queue and WebView2 control.
//   • `headless` – an in-process message queue, window and browser with the
//                  same threading rules; used by tests and by hosts that want
//                  to drive the core without a desktop.

pub mod headless;

#[cfg(windows)]
pub mod win32;

use crate::event::RawMessage;

/// Parameters consumed once, when the native window is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowParams {
    pub title: String,
    pub width: i32,
    pub height: i32,
    /// `0x00BBGGRR`, the layout of a Win32 `COLORREF`.
    pub background_color: u32,
}

/// Thin pass-through operations on a live native window.
///
/// Implementations are thread-affine: they are created and called only on
/// the loop thread.
pub trait NativeWindow {
    /// Opaque native handle value (an `HWND` on Win32).
    fn raw_handle(&self) -> isize;

    fn show(&self);

    /// Show a modal message box.  Runs a nested message loop until dismissed.
    fn show_message_box(&self, message: &str, caption: &str);

    /// Ask the message loop to terminate with `exit_code`.
    fn request_quit(&self, exit_code: i32);

    /// The platform's default handling for a notification the window did not
    /// consume (`DefWindowProcW`).
    fn default_handling(&self, msg: RawMessage) -> isize;

    /// Destroy the handle.  Used when creation is rolled back.
    fn destroy(&self);
}
