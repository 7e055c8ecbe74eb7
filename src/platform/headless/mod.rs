// ── Headless backend ──────────────────────────────────────────────────────────
//
// An in-process stand-in for the Win32 message queue, window and browser
// control.  It keeps the same threading contract as the real thing: the queue
// accepts posts from any thread, retrieval and dispatch happen on the thread
// that owns the loop, and the default handling of a close request destroys
// the window.  No `unsafe`, no OS calls.

mod browser;

pub use browser::HeadlessBrowser;

use std::{
    cell::{Cell, RefCell},
    collections::{HashSet, VecDeque},
    io,
    rc::{Rc, Weak},
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::{
    error::{Result, ShellError},
    event::{RawMessage, WM_CLOSE},
    pump::{MessageSource, Retrieved},
    scheduler::WakeSignal,
    window::WindowCore,
};

use super::{NativeWindow, WindowParams};

/// Win32 `ERROR_CLASS_ALREADY_EXISTS`, reported for a duplicate class name.
const ERROR_CLASS_ALREADY_EXISTS: u32 = 1410;

/// Something sitting in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Posted {
    Message(RawMessage),
    Quit(i32),
}

struct Queue {
    items: Mutex<VecDeque<Posted>>,
    ready: Condvar,
}

impl Queue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Posted>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, item: Posted) {
        self.lock().push_back(item);
        self.ready.notify_one();
    }
}

/// Posts into a headless queue.  `Send + Sync`; usable from any thread.
#[derive(Clone)]
pub struct HeadlessPoster {
    queue: Arc<Queue>,
}

impl HeadlessPoster {
    pub fn post(&self, msg: RawMessage) {
        self.queue.push(Posted::Message(msg));
    }

    pub fn post_quit(&self, exit_code: i32) {
        self.queue.push(Posted::Quit(exit_code));
    }
}

impl WakeSignal for HeadlessPoster {
    fn signal(&self, code: u32) -> Result<()> {
        self.post(RawMessage::new(code, 0, 0));
        Ok(())
    }
}

/// The native side of a headless window: records what was asked of it.
pub struct HeadlessWindow {
    handle: isize,
    params: WindowParams,
    poster: HeadlessPoster,
    visible: Cell<bool>,
    destroyed: Cell<bool>,
    message_boxes: RefCell<Vec<(String, String)>>,
    default_handled: RefCell<Vec<u32>>,
}

impl HeadlessWindow {
    pub fn params(&self) -> &WindowParams {
        &self.params
    }

    pub fn is_visible(&self) -> bool {
        self.visible.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// `(message, caption)` of every message box shown so far.
    pub fn message_boxes(&self) -> Vec<(String, String)> {
        self.message_boxes.borrow().clone()
    }

    /// Codes that fell through to default handling, in arrival order.
    pub fn default_handled(&self) -> Vec<u32> {
        self.default_handled.borrow().clone()
    }
}

impl NativeWindow for HeadlessWindow {
    fn raw_handle(&self) -> isize {
        self.handle
    }

    fn show(&self) {
        if !self.destroyed.get() {
            self.visible.set(true);
        }
    }

    fn show_message_box(&self, message: &str, caption: &str) {
        if self.destroyed.get() {
            return;
        }
        tracing::info!(target: "ui", message, caption, "message box");
        self.message_boxes
            .borrow_mut()
            .push((message.to_owned(), caption.to_owned()));
    }

    fn request_quit(&self, exit_code: i32) {
        self.poster.post_quit(exit_code);
    }

    fn default_handling(&self, msg: RawMessage) -> isize {
        self.default_handled.borrow_mut().push(msg.code);
        if msg.code == WM_CLOSE {
            self.destroy();
        }
        0
    }

    fn destroy(&self) {
        self.visible.set(false);
        self.destroyed.set(true);
    }
}

struct LoopInner {
    queue: Arc<Queue>,
    windows: RefCell<Vec<(Rc<HeadlessWindow>, Weak<WindowCore>)>>,
    classes: RefCell<HashSet<String>>,
    refuse_windows: Cell<bool>,
    next_handle: Cell<isize>,
    idle_timeout: Cell<Option<Duration>>,
}

/// A message loop living entirely in this process.
///
/// Cloning yields another handle to the same loop.  Like a Win32 queue it is
/// bound to the thread that created it; only `poster()` may leave it.
#[derive(Clone)]
pub struct HeadlessLoop {
    inner: Rc<LoopInner>,
}

impl Default for HeadlessLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessLoop {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(LoopInner {
                queue: Arc::new(Queue {
                    items: Mutex::new(VecDeque::new()),
                    ready: Condvar::new(),
                }),
                windows: RefCell::new(Vec::new()),
                classes: RefCell::new(HashSet::new()),
                refuse_windows: Cell::new(false),
                next_handle: Cell::new(0x0001_0000),
                idle_timeout: Cell::new(None),
            }),
        }
    }

    pub fn poster(&self) -> HeadlessPoster {
        HeadlessPoster {
            queue: Arc::clone(&self.inner.queue),
        }
    }

    /// Fail `retrieve` with `TimedOut` instead of blocking longer than
    /// `timeout` on an empty queue.
    pub fn set_idle_timeout(&self, timeout: Option<Duration>) {
        self.inner.idle_timeout.set(timeout);
    }

    /// Make every later window creation fail as if the system returned a null
    /// handle.
    pub fn refuse_window_creation(&self) {
        self.inner.refuse_windows.set(true);
    }

    /// The live (not destroyed) native window, if any.
    pub fn window(&self) -> Option<Rc<HeadlessWindow>> {
        self.inner
            .windows
            .borrow()
            .iter()
            .find(|(w, _)| !w.is_destroyed())
            .map(|(w, _)| Rc::clone(w))
    }

    /// Remove and return everything currently queued.
    pub fn take_posted(&self) -> Vec<Posted> {
        self.inner.queue.lock().drain(..).collect()
    }

    /// Register a class named after the title and create a window for `core`.
    pub(crate) fn create_window(
        &self,
        params: &WindowParams,
        core: &Rc<WindowCore>,
    ) -> Result<(Rc<HeadlessWindow>, HeadlessPoster)> {
        if !self.inner.classes.borrow_mut().insert(params.title.clone()) {
            return Err(ShellError::ClassRegistration {
                code: ERROR_CLASS_ALREADY_EXISTS,
            });
        }
        if self.inner.refuse_windows.get() {
            return Err(ShellError::WindowCreation { code: 0 });
        }

        let handle = self.inner.next_handle.get();
        self.inner.next_handle.set(handle + 0x10);

        let window = Rc::new(HeadlessWindow {
            handle,
            params: params.clone(),
            poster: self.poster(),
            visible: Cell::new(false),
            destroyed: Cell::new(false),
            message_boxes: RefCell::new(Vec::new()),
            default_handled: RefCell::new(Vec::new()),
        });
        self.inner
            .windows
            .borrow_mut()
            .push((Rc::clone(&window), Rc::downgrade(core)));
        tracing::debug!(target: "ui", handle = format_args!("{handle:#x}"), title = %params.title, "headless window created");
        Ok((window, self.poster()))
    }

    fn target(&self) -> Option<Rc<WindowCore>> {
        self.inner
            .windows
            .borrow()
            .iter()
            .filter(|(w, _)| !w.is_destroyed())
            .find_map(|(_, core)| core.upgrade())
    }
}

impl MessageSource for HeadlessLoop {
    type Message = RawMessage;

    fn retrieve(&mut self) -> Result<Retrieved<RawMessage>> {
        let queue = &self.inner.queue;
        let deadline = self.inner.idle_timeout.get().map(|t| Instant::now() + t);
        let mut items = queue.lock();
        loop {
            match items.pop_front() {
                Some(Posted::Message(msg)) => return Ok(Retrieved::Message(msg)),
                Some(Posted::Quit(code)) => return Ok(Retrieved::Quit(code)),
                None => {}
            }
            items = match deadline {
                None => queue.ready.wait(items).unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return Err(ShellError::Io(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "headless loop idle timeout",
                        )));
                    }
                    queue
                        .ready
                        .wait_timeout(items, left)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn dispatch(&mut self, msg: RawMessage) {
        match self.target() {
            Some(core) => {
                core.window_proc(msg);
            }
            None => tracing::trace!(target: "wm", code = msg.code, "no live window; message dropped"),
        }
    }
}
