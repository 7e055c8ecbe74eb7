// ── WebView2 browser host ─────────────────────────────────────────────────────
//
// Creates the WebView2 environment and controller for a window without
// blocking the UI thread: each step completes in a COM callback that the
// thread's own message loop delivers.  Page messages and navigation
// completion are forwarded to the callbacks the web view registered.
//
// COM must be initialised as a single-threaded apartment on the UI thread
// before any of this runs; `WebView2Host::new` does that.

#![allow(unsafe_code)]

use std::{cell::RefCell, ffi::c_void, rc::Rc};

use webview2_com::{
    take_pwstr, CreateCoreWebView2ControllerCompletedHandler,
    CreateCoreWebView2EnvironmentCompletedHandler, ExecuteScriptCompletedHandler,
    Microsoft::Web::WebView2::Win32::{
        CreateCoreWebView2Environment, ICoreWebView2, ICoreWebView2Controller,
        ICoreWebView2Environment,
    },
    NavigationCompletedEventHandler, WebMessageReceivedEventHandler,
};
use windows::{
    core::{PCWSTR, PWSTR},
    Win32::{
        Foundation::{E_FAIL, HWND, RECT},
        System::Com::{CoInitializeEx, CoUninitialize, COINIT_APARTMENTTHREADED},
        UI::WindowsAndMessaging::GetClientRect,
    },
};

use super::wide;
use crate::{
    error::{Result, ShellError},
    webview::{
        BrowserCallbacks, BrowserControl, BrowserHost, NavigationTarget, ReadyCallback,
        ScriptCallback,
    },
};

fn browser_error(step: &str, e: windows::core::Error) -> ShellError {
    ShellError::Browser(format!("{step}: {e}"))
}

// ── Host ──────────────────────────────────────────────────────────────────────

/// Creates WebView2 controls.  Owns the thread's COM apartment.
pub struct WebView2Host {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl WebView2Host {
    /// Enter a single-threaded COM apartment on the calling (UI) thread.
    pub fn new() -> Result<Self> {
        // SAFETY: a null reserved pointer is required.  Initialising an STA
        // on a thread that already has one returns S_FALSE, which `ok()`
        // accepts; the matching CoUninitialize runs in Drop.
        unsafe { CoInitializeEx(None, COINIT_APARTMENTTHREADED) }
            .ok()
            .map_err(|e| browser_error("COM initialisation failed", e))?;
        Ok(Self {
            _not_send: std::marker::PhantomData,
        })
    }
}

impl Drop for WebView2Host {
    fn drop(&mut self) {
        // SAFETY: balances the successful CoInitializeEx in `new`, on the same
        // thread (the host is `!Send`).
        unsafe { CoUninitialize() };
    }
}

/// Delivers the outcome of initialization exactly once.
#[derive(Clone)]
struct Ready(Rc<RefCell<Option<ReadyCallback>>>);

impl Ready {
    fn finish(&self, outcome: Result<Rc<dyn BrowserControl>>) {
        let callback = self.0.borrow_mut().take();
        if let Some(callback) = callback {
            callback(outcome);
        }
    }
}

impl BrowserHost for WebView2Host {
    fn initialize(&self, window_handle: isize, callbacks: BrowserCallbacks) -> Result<()> {
        let hwnd = HWND(window_handle as *mut c_void);
        let BrowserCallbacks {
            on_ready,
            on_navigated,
            on_message,
        } = callbacks;
        let ready = Ready(Rc::new(RefCell::new(Some(on_ready))));
        tracing::debug!(target: "ui", hwnd = format_args!("{window_handle:#x}"), "creating WebView2 environment");

        let env_ready = ready.clone();
        let handler = CreateCoreWebView2EnvironmentCompletedHandler::create(Box::new(
            move |error_code, environment: Option<ICoreWebView2Environment>| {
                let environment = match error_code.and_then(|()| environment.ok_or_else(|| E_FAIL.into())) {
                    Ok(environment) => environment,
                    Err(e) => {
                        env_ready.finish(Err(browser_error("WebView2 environment creation failed", e)));
                        return Ok(());
                    }
                };

                let controller_ready = env_ready.clone();
                let controller_handler = CreateCoreWebView2ControllerCompletedHandler::create(Box::new(
                    move |error_code, controller: Option<ICoreWebView2Controller>| {
                        let outcome = error_code
                            .and_then(|()| controller.ok_or_else(|| E_FAIL.into()))
                            // SAFETY: runs on the UI thread inside the COM
                            // callback; hwnd is the window the controller was
                            // created for and outlives it.
                            .and_then(|controller| unsafe { attach(hwnd, controller, on_navigated, on_message) })
                            .map(|control| Rc::new(control) as Rc<dyn BrowserControl>)
                            .map_err(|e| browser_error("WebView2 controller creation failed", e));
                        controller_ready.finish(outcome);
                        Ok(())
                    },
                ));

                // SAFETY: hwnd is a live top-level window on this thread; the
                // handler is a COM object kept alive by the environment until
                // it fires.
                if let Err(e) = unsafe { environment.CreateCoreWebView2Controller(hwnd, &controller_handler) } {
                    env_ready.finish(Err(browser_error("WebView2 controller creation failed", e)));
                }
                Ok(())
            },
        ));

        // SAFETY: called on the STA thread set up in `new`; the completion
        // handler is delivered later through this thread's message loop.
        unsafe { CreateCoreWebView2Environment(&handler) }
            .map_err(|e| browser_error("WebView2 runtime unavailable", e))
    }
}

/// Size the new controller to the window, show it and hook page events.
///
/// # Safety
/// Must run on the UI thread that owns `hwnd`.
unsafe fn attach(
    hwnd: HWND,
    controller: ICoreWebView2Controller,
    on_navigated: Box<dyn Fn()>,
    on_message: Box<dyn Fn(String)>,
) -> windows::core::Result<WebView2Control> {
    let mut rect = RECT::default();
    GetClientRect(hwnd, &mut rect)?;
    controller.SetBounds(rect)?;
    controller.SetIsVisible(true)?;
    let webview = controller.CoreWebView2()?;

    // Registration tokens are plain integers; the handlers stay registered for
    // the life of the control, so the tokens are not kept.
    let mut token = std::mem::zeroed();
    webview.add_WebMessageReceived(
        &WebMessageReceivedEventHandler::create(Box::new(move |_webview, args| {
            if let Some(args) = args {
                let mut message = PWSTR::null();
                args.TryGetWebMessageAsString(&mut message)?;
                on_message(take_pwstr(message));
            }
            Ok(())
        })),
        &mut token,
    )?;

    let mut token = std::mem::zeroed();
    webview.add_NavigationCompleted(
        &NavigationCompletedEventHandler::create(Box::new(move |_webview, _args| {
            on_navigated();
            Ok(())
        })),
        &mut token,
    )?;

    tracing::debug!(target: "ui", width = rect.right - rect.left, height = rect.bottom - rect.top, "WebView2 controller attached");
    Ok(WebView2Control {
        controller,
        webview,
    })
}

// ── Control ───────────────────────────────────────────────────────────────────

struct WebView2Control {
    controller: ICoreWebView2Controller,
    webview: ICoreWebView2,
}

impl BrowserControl for WebView2Control {
    fn set_bounds(&self, x: i32, y: i32, width: i32, height: i32) -> Result<()> {
        let rect = RECT {
            left: x,
            top: y,
            right: x + width,
            bottom: y + height,
        };
        // SAFETY: the controller is used only on the UI thread that created it.
        unsafe { self.controller.SetBounds(rect) }.map_err(|e| browser_error("SetBounds", e))
    }

    fn navigate(&self, target: &NavigationTarget) -> Result<()> {
        // SAFETY: both strings are null-terminated and outlive the call; the
        // control copies them.
        unsafe {
            match target {
                NavigationTarget::Url(url) => {
                    let url = wide(url);
                    self.webview.Navigate(PCWSTR(url.as_ptr()))
                }
                NavigationTarget::Html(html) => {
                    let html = wide(html);
                    self.webview.NavigateToString(PCWSTR(html.as_ptr()))
                }
            }
        }
        .map_err(|e| browser_error("navigation", e))
    }

    fn execute_script(&self, javascript: &str, done: ScriptCallback) -> Result<()> {
        let script = wide(javascript);
        let handler = ExecuteScriptCompletedHandler::create(Box::new(move |error_code, result: String| {
            done(error_code.map(|()| result).map_err(|e| browser_error("ExecuteScript", e)));
            Ok(())
        }));
        // SAFETY: `script` is null-terminated and outlives the call; the
        // handler fires later on this thread through the message loop.
        unsafe { self.webview.ExecuteScript(PCWSTR(script.as_ptr()), &handler) }
            .map_err(|e| browser_error("ExecuteScript", e))
    }
}
