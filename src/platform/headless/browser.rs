// In-process browser stand-in.  Records what the surface asks of it and lets
// the caller drive page events by hand.  Completions are delivered through
// local tasks so they arrive on a later loop turn, as they do with a real
// control.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use crate::{
    error::{Result, ShellError},
    scheduler::spawn_local,
    webview::{BrowserCallbacks, BrowserControl, BrowserHost, NavigationTarget, ReadyCallback, ScriptCallback},
};

type Responder = Box<dyn Fn(&str) -> Result<String>>;

enum Readiness {
    Immediate,
    Held,
    Fail(String),
}

struct BrowserState {
    readiness: RefCell<Readiness>,
    held: RefCell<Option<ReadyCallback>>,
    on_navigated: RefCell<Option<Box<dyn Fn()>>>,
    on_message: RefCell<Option<Box<dyn Fn(String)>>>,
    responder: RefCell<Responder>,
    bounds: Cell<Option<(i32, i32, i32, i32)>>,
    navigations: RefCell<Vec<NavigationTarget>>,
    scripts: RefCell<Vec<String>>,
}

/// A `BrowserHost` whose control lives in memory.
///
/// Clones share state, so a test can keep one handle while the web view holds
/// another.
#[derive(Clone)]
pub struct HeadlessBrowser {
    state: Rc<BrowserState>,
}

impl Default for HeadlessBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBrowser {
    pub fn new() -> Self {
        Self {
            state: Rc::new(BrowserState {
                readiness: RefCell::new(Readiness::Immediate),
                held: RefCell::new(None),
                on_navigated: RefCell::new(None),
                on_message: RefCell::new(None),
                responder: RefCell::new(Box::new(|_| Ok("null".to_owned()))),
                bounds: Cell::new(None),
                navigations: RefCell::new(Vec::new()),
                scripts: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Keep initialization pending until [`HeadlessBrowser::release`].
    pub fn hold_initialization(&self) {
        *self.state.readiness.borrow_mut() = Readiness::Held;
    }

    /// Complete a held initialization now.
    pub fn release(&self) {
        *self.state.readiness.borrow_mut() = Readiness::Immediate;
        if let Some(ready) = self.state.held.borrow_mut().take() {
            ready(Ok(self.control()));
        }
    }

    /// Make initialization fail with `reason`.
    pub fn fail_initialization(&self, reason: &str) {
        *self.state.readiness.borrow_mut() = Readiness::Fail(reason.to_owned());
    }

    /// Compute script results with `respond`.  The default answers `null`.
    pub fn respond_with(&self, respond: impl Fn(&str) -> Result<String> + 'static) {
        *self.state.responder.borrow_mut() = Box::new(respond);
    }

    /// Last bounds applied to the control.
    pub fn bounds(&self) -> Option<(i32, i32, i32, i32)> {
        self.state.bounds.get()
    }

    pub fn navigations(&self) -> Vec<NavigationTarget> {
        self.state.navigations.borrow().clone()
    }

    /// Every script source executed so far.
    pub fn scripts(&self) -> Vec<String> {
        self.state.scripts.borrow().clone()
    }

    /// Report that the current navigation finished.
    pub fn complete_navigation(&self) {
        if let Some(cb) = self.state.on_navigated.borrow().as_ref() {
            cb();
        }
    }

    /// Deliver a string the page posted to the host.
    pub fn deliver_message(&self, message: &str) {
        if let Some(cb) = self.state.on_message.borrow().as_ref() {
            cb(message.to_owned());
        }
    }

    fn control(&self) -> Rc<dyn BrowserControl> {
        Rc::new(HeadlessControl {
            state: Rc::clone(&self.state),
        })
    }
}

impl BrowserHost for HeadlessBrowser {
    fn initialize(&self, window_handle: isize, callbacks: BrowserCallbacks) -> Result<()> {
        tracing::debug!(target: "ui", handle = format_args!("{window_handle:#x}"), "headless browser initializing");
        let BrowserCallbacks {
            on_ready,
            on_navigated,
            on_message,
        } = callbacks;
        *self.state.on_navigated.borrow_mut() = Some(on_navigated);
        *self.state.on_message.borrow_mut() = Some(on_message);

        let outcome = match &*self.state.readiness.borrow() {
            Readiness::Held => None,
            Readiness::Immediate => Some(Ok(self.control())),
            Readiness::Fail(reason) => Some(Err(ShellError::Browser(reason.clone()))),
        };
        match outcome {
            None => *self.state.held.borrow_mut() = Some(on_ready),
            Some(outcome) => {
                spawn_local(async move { on_ready(outcome) })?;
            }
        }
        Ok(())
    }
}

struct HeadlessControl {
    state: Rc<BrowserState>,
}

impl BrowserControl for HeadlessControl {
    fn set_bounds(&self, x: i32, y: i32, width: i32, height: i32) -> Result<()> {
        self.state.bounds.set(Some((x, y, width, height)));
        Ok(())
    }

    fn navigate(&self, target: &NavigationTarget) -> Result<()> {
        self.state.navigations.borrow_mut().push(target.clone());
        Ok(())
    }

    fn execute_script(&self, javascript: &str, done: ScriptCallback) -> Result<()> {
        self.state.scripts.borrow_mut().push(javascript.to_owned());
        let result = (self.state.responder.borrow())(javascript);
        spawn_local(async move { done(result) })?;
        Ok(())
    }
}
