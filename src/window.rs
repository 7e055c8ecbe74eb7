// ── Window ────────────────────────────────────────────────────────────────────
//
// Owns the native handle (through a `NativeWindow` backend) and turns decoded
// notifications into typed events.  Creating a window also installs the
// continuation scheduler for the calling thread; dropping it tears the
// scheduler down again.
//
// Everything here runs on the loop thread.  Event handlers are isolated: a
// panicking handler is reported to the fault sink and the notification still
// gets its default handling, so one bad subscriber cannot take the pump down.

use std::{
    cell::{Cell, RefCell},
    panic::{self, AssertUnwindSafe},
    rc::Rc,
};

use crate::{
    error::{Result, WorkItemFault},
    event::{decode_message, DomainEvent, RawMessage},
    platform::{headless::HeadlessLoop, NativeWindow, WindowParams},
    scheduler::{self, fault, Installed, Scheduler, WakeSignal},
    subscription::{SubscriptionId, Subscribers},
};

/// New client-area size carried by the `resized` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

/// Argument of the `closing` event.
///
/// Unless a handler calls [`CloseRequest::cancel`], the window asks the loop
/// to terminate after all handlers have run.
#[derive(Debug, Default)]
pub struct CloseRequest {
    cancelled: Cell<bool>,
}

impl CloseRequest {
    /// Keep the window open and the loop running.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

/// How the window procedure should answer a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Consumed; return this value to the system.
    Handled(isize),
    /// Run the platform's default handling.
    Default,
}

/// Shared state reached from both the public `Window` and the backend's
/// window procedure.
#[derive(Default)]
pub(crate) struct WindowCore {
    native: RefCell<Option<Rc<dyn NativeWindow>>>,
    installed: RefCell<Option<Installed>>,
    resized: Subscribers<Size>,
    closing: Subscribers<CloseRequest>,
}

impl WindowCore {
    fn native(&self) -> Option<Rc<dyn NativeWindow>> {
        self.native.borrow().clone()
    }

    fn scheduler(&self) -> Option<Scheduler> {
        self.installed.borrow().as_ref().map(|i| i.scheduler().clone())
    }

    /// Route one notification.  Called by the backend's window procedure.
    pub(crate) fn dispatch(&self, msg: RawMessage) -> Dispatched {
        match decode_message(msg) {
            DomainEvent::Resized { width, height } => {
                tracing::trace!(target: "ui", width, height, "window resized");
                let size = Size { width, height };
                guarded("resized", || self.resized.raise(&size));
                Dispatched::Default
            }

            DomainEvent::ClosingRequested => {
                tracing::trace!(target: "ui", "window closing requested");
                let request = CloseRequest::default();
                guarded("closing", || self.closing.raise(&request));
                if request.is_cancelled() {
                    tracing::debug!(target: "ui", "close cancelled by a subscriber");
                    return Dispatched::Handled(0);
                }
                self.request_quit();
                // Default handling destroys the window.
                Dispatched::Default
            }

            DomainEvent::WorkAvailable => {
                if let Some(scheduler) = self.scheduler() {
                    match scheduler.drain_available() {
                        Ok(ran) => tracing::trace!(target: "wm", ran, "drained scheduled work"),
                        Err(e) => tracing::error!(target: "wm", error = %e, "drain failed"),
                    }
                }
                Dispatched::Handled(0)
            }

            DomainEvent::Unhandled(_) => Dispatched::Default,
        }
    }

    /// Dispatch and fall through to the backend's default handling.
    pub(crate) fn window_proc(&self, msg: RawMessage) -> isize {
        match self.dispatch(msg) {
            Dispatched::Handled(result) => result,
            Dispatched::Default => self
                .native()
                .map_or(0, |native| native.default_handling(msg)),
        }
    }

    fn request_quit(&self) {
        tracing::trace!(target: "ui", "window close");
        if let Some(native) = self.native() {
            native.request_quit(0);
        }
    }
}

/// Run an event handler list, reporting a panic instead of unwinding into the
/// window procedure.
fn guarded(event: &'static str, raise: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(raise)) {
        let mut fault = WorkItemFault::from_panic(payload);
        fault.message = format!("{event} handler: {}", fault.message);
        fault::report(&fault);
    }
}

/// A top-level native window bound to the calling thread's message loop.
pub struct Window {
    core: Rc<WindowCore>,
}

impl Window {
    /// Create the native Win32 window and install its scheduler.
    ///
    /// Fails with `ClassRegistration` or `WindowCreation` when the system
    /// refuses, and with `SchedulerMisuse` if this thread already has a
    /// window (and therefore a scheduler).
    #[cfg(windows)]
    pub fn create(title: &str, width: i32, height: i32, background_color: u32) -> Result<Self> {
        let params = WindowParams {
            title: title.to_owned(),
            width,
            height,
            background_color,
        };
        Self::assemble(|core| crate::platform::win32::window::create(&params, core))
    }

    /// Create a window on an in-process headless loop.
    pub fn create_headless(event_loop: &HeadlessLoop, params: &WindowParams) -> Result<Self> {
        Self::assemble(|core| event_loop.create_window(params, core))
    }

    /// Wire a freshly created handle to a new scheduler.  The scheduler is
    /// installed right after the handle exists and before this returns, so
    /// nothing asynchronous can start without it.
    fn assemble<N, W>(create: impl FnOnce(&Rc<WindowCore>) -> Result<(Rc<N>, W)>) -> Result<Self>
    where
        N: NativeWindow + 'static,
        W: WakeSignal + 'static,
    {
        let core = Rc::new(WindowCore::default());
        let (native, wake) = create(&core)?;

        let installed = match scheduler::install(Scheduler::new(wake)) {
            Ok(installed) => installed,
            Err(e) => {
                native.destroy();
                return Err(e);
            }
        };

        *core.native.borrow_mut() = Some(native);
        *core.installed.borrow_mut() = Some(installed);
        tracing::debug!(target: "ui", "window created and scheduler installed");
        Ok(Self { core })
    }

    pub fn show(&self) {
        tracing::trace!(target: "ui", "window show");
        if let Some(native) = self.core.native() {
            native.show();
        }
    }

    /// Show a modal message box owned by this window.
    pub fn show_message_box(&self, message: &str, caption: &str) {
        tracing::trace!(target: "ui", message, caption, "window message box");
        if let Some(native) = self.core.native() {
            native.show_message_box(message, caption);
        }
    }

    /// Ask the message loop to terminate.  The pump returns exit code 0 once
    /// it retrieves the request.
    pub fn close(&self) {
        self.core.request_quit();
    }

    /// Opaque native handle, or `None` once the window has been torn down.
    pub fn raw_handle(&self) -> Option<isize> {
        self.core.native().map(|n| n.raw_handle())
    }

    /// The scheduler installed for this window's thread.
    pub fn scheduler(&self) -> Option<Scheduler> {
        self.core.scheduler()
    }

    /// Route one notification as the window procedure would.
    pub fn dispatch(&self, msg: RawMessage) -> Dispatched {
        self.core.dispatch(msg)
    }

    pub fn on_resized(&self, handler: impl Fn(&Size) + 'static) -> SubscriptionId {
        self.core.resized.subscribe(handler)
    }

    pub fn unsubscribe_resized(&self, id: SubscriptionId) -> bool {
        self.core.resized.unsubscribe(id)
    }

    pub fn on_closing(&self, handler: impl Fn(&CloseRequest) + 'static) -> SubscriptionId {
        self.core.closing.subscribe(handler)
    }

    pub fn unsubscribe_closing(&self, id: SubscriptionId) -> bool {
        self.core.closing.unsubscribe(id)
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        // Uninstalls and shuts down the scheduler; the handle goes with it.
        // Taken out first so no borrow is held while the backend tears down.
        let installed = self.core.installed.borrow_mut().take();
        drop(installed);
        let native = self.core.native.borrow_mut().take();
        drop(native);
    }
}
