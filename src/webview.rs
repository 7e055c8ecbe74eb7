// ── Browser surface ───────────────────────────────────────────────────────────
//
// `WebView` drives an embedded browser control through two small capability
// traits, so the core never depends on a particular engine:
//
//   • `BrowserHost`    – creates the control for a window, asynchronously.
//   • `BrowserControl` – the live control: bounds, navigation, scripts.
//
// Every call is made on the loop thread.  Initialization is fire-and-forget:
// a detached local task awaits the control and raises `initialized`; a
// failure goes to the fault sink because nobody is awaiting it.  Until then
// the operations are safe no-ops, and `execute_script` resolves to `None`.

use std::{
    cell::{Cell, RefCell},
    future::Future,
    rc::{Rc, Weak},
};

use futures::channel::oneshot;

use crate::{
    error::{Result, ShellError, WorkItemFault},
    scheduler::{fault, spawn_local},
    subscription::{SubscriptionId, Subscribers},
    window::Window,
};

/// Where `load_page` navigates to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationTarget {
    Url(String),
    /// A complete document, loaded without a network round-trip.
    Html(String),
}

/// Receives a script's JSON-encoded result on the loop thread.
pub type ScriptCallback = Box<dyn FnOnce(Result<String>)>;

/// Receives the created control (or the reason it could not be created).
pub type ReadyCallback = Box<dyn FnOnce(Result<Rc<dyn BrowserControl>>)>;

/// A live browser control.  All methods are called on the loop thread.
pub trait BrowserControl {
    fn set_bounds(&self, x: i32, y: i32, width: i32, height: i32) -> Result<()>;

    fn navigate(&self, target: &NavigationTarget) -> Result<()>;

    /// Start running `javascript`; `done` is invoked later, on the loop
    /// thread, with the result.
    fn execute_script(&self, javascript: &str, done: ScriptCallback) -> Result<()>;
}

/// Callbacks handed to `BrowserHost::initialize`.  All run on the loop thread.
pub struct BrowserCallbacks {
    pub on_ready: ReadyCallback,
    pub on_navigated: Box<dyn Fn()>,
    pub on_message: Box<dyn Fn(String)>,
}

/// Creates a browser control inside a native window.
pub trait BrowserHost {
    /// Begin creating the control for `window_handle`.  Must return without
    /// waiting; `callbacks.on_ready` fires once creation finishes.
    fn initialize(&self, window_handle: isize, callbacks: BrowserCallbacks) -> Result<()>;
}

#[derive(Default)]
struct WebViewInner {
    control: RefCell<Option<Rc<dyn BrowserControl>>>,
    start_page: RefCell<Option<NavigationTarget>>,
    last_size: Cell<Option<(i32, i32)>>,
    initialized: Subscribers<()>,
    page_loaded: Subscribers<()>,
    message_received: Subscribers<String>,
}

/// The browser surface embedded in a [`Window`].
#[derive(Clone)]
pub struct WebView {
    inner: Rc<WebViewInner>,
}

impl WebView {
    /// Start creating the browser control for `window`.
    ///
    /// Returns immediately.  Subscribe to [`WebView::on_initialized`] to learn
    /// when the control is ready.
    pub fn init(window: &Window, host: &dyn BrowserHost, start_page: NavigationTarget) -> Result<Self> {
        let handle = window.raw_handle().ok_or_else(|| {
            ShellError::Browser("cannot attach a browser to a destroyed window".to_owned())
        })?;

        let web_view = Self {
            inner: Rc::new(WebViewInner::default()),
        };
        *web_view.inner.start_page.borrow_mut() = Some(start_page);

        let (ready_tx, ready_rx) = oneshot::channel();
        let weak = Rc::downgrade(&web_view.inner);
        let on_navigated = {
            let weak = Weak::clone(&weak);
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    tracing::trace!(target: "ui", "web view navigation completed");
                    inner.page_loaded.raise(&());
                }
            })
        };
        let on_message = {
            let weak = Weak::clone(&weak);
            Box::new(move |message: String| {
                if let Some(inner) = weak.upgrade() {
                    tracing::trace!(target: "ui", %message, "web view message received");
                    inner.message_received.raise(&message);
                }
            })
        };

        host.initialize(
            handle,
            BrowserCallbacks {
                on_ready: Box::new(move |result| {
                    let _ = ready_tx.send(result);
                }),
                on_navigated,
                on_message,
            },
        )?;

        // Fire-and-forget: nobody awaits this task, so a failure is reported
        // to the fault sink rather than returned.
        spawn_local(async move {
            let outcome = match ready_rx.await {
                Ok(outcome) => outcome,
                Err(oneshot::Canceled) => Err(ShellError::Browser(
                    "browser host dropped the initialization callback".to_owned(),
                )),
            };
            match (outcome, weak.upgrade()) {
                (Ok(control), Some(inner)) => WebView { inner }.attach(control),
                (Ok(_), None) => {}
                (Err(e), _) => fault::report(&WorkItemFault {
                    message: format!("browser initialization failed: {e}"),
                }),
            }
        })?;

        Ok(web_view)
    }

    fn attach(&self, control: Rc<dyn BrowserControl>) {
        tracing::trace!(target: "ui", "web view initialized");
        if let Some((width, height)) = self.inner.last_size.get() {
            if let Err(e) = control.set_bounds(0, 0, width, height) {
                tracing::warn!(target: "ui", error = %e, "could not apply initial bounds");
            }
        }
        *self.inner.control.borrow_mut() = Some(control);
        self.inner.initialized.raise(&());
    }

    fn control(&self) -> Option<Rc<dyn BrowserControl>> {
        self.inner.control.borrow().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.control.borrow().is_some()
    }

    /// Navigate to the start page.  No-op before initialization.
    pub fn load_page(&self) {
        let control = self.control();
        tracing::trace!(target: "ui", initialized = control.is_some(), "web view load page");
        let Some(control) = control else { return };
        let Some(target) = self.inner.start_page.borrow().clone() else { return };
        if let Err(e) = control.navigate(&target) {
            tracing::error!(target: "ui", error = %e, "navigation failed");
        }
    }

    /// Fit the control to a `width` × `height` client area.
    ///
    /// Before initialization the size is remembered and applied once the
    /// control exists.
    pub fn set_size(&self, width: i32, height: i32) {
        let control = self.control();
        tracing::trace!(target: "ui", width, height, initialized = control.is_some(), "web view set size");
        self.inner.last_size.set(Some((width, height)));
        if let Some(control) = control {
            if let Err(e) = control.set_bounds(0, 0, width, height) {
                tracing::error!(target: "ui", error = %e, "could not set web view bounds");
            }
        }
    }

    /// Run `javascript` in the page and resolve to its JSON-encoded result.
    ///
    /// Before initialization this resolves to `Ok(None)` without touching the
    /// browser.  Await it from a task on the loop thread; it resumes there.
    pub fn execute_script(&self, javascript: &str) -> impl Future<Output = Result<Option<String>>> + 'static {
        let started = self.start_script(javascript);
        async move {
            let Some(rx) = started? else { return Ok(None) };
            let value = rx.await.map_err(|_| {
                ShellError::Browser("script completion was dropped".to_owned())
            })??;
            tracing::debug!(target: "ui", returned = %value, "script returned");
            Ok(Some(value))
        }
    }

    fn start_script(&self, javascript: &str) -> Result<Option<oneshot::Receiver<Result<String>>>> {
        let control = self.control();
        tracing::trace!(target: "ui", initialized = control.is_some(), "web view execute script");
        tracing::trace!(target: "ui", javascript, "script source");
        let Some(control) = control else {
            return Ok(None);
        };

        let flat = javascript.replace(['\r', '\n'], " ");
        tracing::debug!(target: "ui", script = %truncate_to(&flat, 60, " (...)"), "executing script");

        let (tx, rx) = oneshot::channel();
        control.execute_script(
            javascript,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )?;
        Ok(Some(rx))
    }

    pub fn on_initialized(&self, handler: impl Fn(&()) + 'static) -> SubscriptionId {
        self.inner.initialized.subscribe(handler)
    }

    pub fn on_page_loaded(&self, handler: impl Fn(&()) + 'static) -> SubscriptionId {
        self.inner.page_loaded.subscribe(handler)
    }

    pub fn on_message_received(&self, handler: impl Fn(&String) + 'static) -> SubscriptionId {
        self.inner.message_received.subscribe(handler)
    }
}

/// Cut `s` to at most `count` characters, appending `suffix` if it was cut.
pub fn truncate_to(s: &str, count: usize, suffix: &str) -> String {
    match s.char_indices().nth(count) {
        Some((end, _)) => format!("{}{suffix}", &s[..end]),
        None => s.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{
        headless::{HeadlessBrowser, HeadlessLoop},
        WindowParams,
    };

    fn setup() -> (HeadlessLoop, Window, HeadlessBrowser) {
        let lp = HeadlessLoop::new();
        let window = Window::create_headless(
            &lp,
            &WindowParams {
                title: "T".into(),
                width: 800,
                height: 600,
                background_color: 0,
            },
        )
        .unwrap();
        (lp, window, HeadlessBrowser::new())
    }

    fn run_until_idle(window: &Window) {
        let s = window.scheduler().unwrap();
        while s.pending() > 0 {
            s.drain_available().unwrap();
        }
    }

    #[test]
    fn truncate_to_counts_characters() {
        assert_eq!(truncate_to("short", 60, " (...)"), "short");
        assert_eq!(truncate_to("abcdef", 3, "…"), "abc…");
        assert_eq!(truncate_to("ééé", 2, ""), "éé");
    }

    #[test]
    fn execute_script_before_ready_is_none() {
        let (_lp, window, browser) = setup();
        browser.hold_initialization();
        let web_view = WebView::init(&window, &browser, NavigationTarget::Url("about:blank".into())).unwrap();

        let out = futures::executor::block_on(web_view.execute_script("1 + 1")).unwrap();
        assert_eq!(out, None);
        assert!(browser.scripts().is_empty());

        web_view.set_size(10, 20);
        browser.release();
        run_until_idle(&window);
        assert!(web_view.is_initialized());
        assert_eq!(browser.bounds(), Some((0, 0, 10, 20)));
    }

    #[test]
    fn initialization_raises_event_and_applies_pending_size() {
        let (_lp, window, browser) = setup();
        let web_view = WebView::init(&window, &browser, NavigationTarget::Html("<p/>".into())).unwrap();
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        web_view.on_initialized(move |_| f.set(true));

        web_view.set_size(640, 480);
        assert!(browser.bounds().is_none());

        run_until_idle(&window);
        assert!(fired.get());
        assert!(web_view.is_initialized());
        assert_eq!(browser.bounds(), Some((0, 0, 640, 480)));

        web_view.load_page();
        assert_eq!(browser.navigations(), [NavigationTarget::Html("<p/>".into())]);
    }

    #[test]
    fn failed_initialization_goes_to_fault_sink() {
        let faults = fault::tests::recording_sink();
        let (_lp, window, browser) = setup();
        browser.fail_initialization("runtime missing 0c4e");
        let web_view = WebView::init(&window, &browser, NavigationTarget::Url("x".into())).unwrap();
        run_until_idle(&window);
        assert!(!web_view.is_initialized());
        assert!(faults.contains("runtime missing 0c4e"));
    }

    #[test]
    fn script_result_resumes_awaiting_task() {
        let (_lp, window, browser) = setup();
        browser.respond_with(|js| Ok(format!("\"ran {js}\"")));
        let web_view = WebView::init(&window, &browser, NavigationTarget::Url("x".into())).unwrap();
        run_until_idle(&window);

        let got = Rc::new(RefCell::new(None));
        let g = Rc::clone(&got);
        let wv = web_view.clone();
        spawn_local(async move {
            *g.borrow_mut() = Some(wv.execute_script("go()").await);
        })
        .unwrap();
        run_until_idle(&window);

        assert_eq!(browser.scripts(), ["go()"]);
        let result = got.borrow_mut().take().unwrap().unwrap();
        assert_eq!(result.as_deref(), Some("\"ran go()\""));
    }

    #[test]
    fn page_events_are_forwarded() {
        let (_lp, window, browser) = setup();
        let web_view = WebView::init(&window, &browser, NavigationTarget::Url("x".into())).unwrap();
        run_until_idle(&window);

        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        web_view.on_page_loaded(move |_| l.borrow_mut().push("loaded".to_owned()));
        let l = Rc::clone(&log);
        web_view.on_message_received(move |m| l.borrow_mut().push(m.clone()));

        browser.complete_navigation();
        browser.deliver_message("MsgBox");
        assert_eq!(*log.borrow(), ["loaded", "MsgBox"]);
    }
}
