// ── Safety policy ────────────────────────────────────────────────────────────
// Unsafe code is forbidden everywhere except:
//   • `platform::win32`  – Win32 / WebView2 FFI
//   • `scheduler::task`  – `Send` for the loop-thread task runner
// Each unsafe block in those modules MUST carry a `// SAFETY:` comment.
#![deny(unsafe_code)]

//! A native top-level window hosting an embedded browser surface, driven by
//! a thread-affine message loop.
//!
//! The UI thread owns the window, the browser control and a continuation
//! [`Scheduler`]: any thread may post work to it, and the work runs on the UI
//! thread when the loop drains the queue.  Local tasks ([`spawn_local`]) let
//! UI code `.await` browser calls and resume on the same thread.

pub mod app;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod platform;
pub mod pump;
pub mod scheduler;
pub mod subscription;
pub mod webview;
pub mod window;

pub use app::WebViewWindow;
pub use error::{Result, ShellError, WorkItemFault};
pub use event::{decode, DomainEvent, RawMessage};
pub use pump::{MessagePump, PumpState};
pub use scheduler::{spawn_local, JoinHandle, Scheduler};
pub use webview::{NavigationTarget, WebView};
pub use window::{CloseRequest, Size, Window};
