// ── Application composition ───────────────────────────────────────────────────
//
// `WebViewWindow` pairs a window with the browser surface that fills it, and
// `wire_sample` attaches the demo behaviour: the bundled page posts a handful
// of command strings and the host answers each one on the UI thread.
//
// All of this runs on the UI thread.  Page messages are handled in local
// tasks so a handler can await a script result without blocking the pump.

use std::rc::{Rc, Weak};

use rand::Rng;

use crate::{
    config::ShellConfig,
    error::{Result, WorkItemFault},
    platform::headless::HeadlessLoop,
    scheduler::{fault, spawn_local},
    webview::{BrowserHost, NavigationTarget, WebView},
    window::Window,
};

// ── Window + web view ─────────────────────────────────────────────────────────

/// A window whose client area is filled by a web view.
pub struct WebViewWindow {
    pub window: Window,
    pub web_view: WebView,
}

impl WebViewWindow {
    /// Create the native window and start its WebView2 control.
    #[cfg(windows)]
    pub fn create(config: &ShellConfig, host: &dyn BrowserHost) -> Result<Self> {
        let window = Window::create(&config.title, config.width, config.height, config.background_color)?;
        Self::compose(window, host, config.start_page())
    }

    /// Same as `create`, on a headless loop.
    pub fn create_headless(event_loop: &HeadlessLoop, config: &ShellConfig, host: &dyn BrowserHost) -> Result<Self> {
        let window = Window::create_headless(event_loop, &config.window_params())?;
        Self::compose(window, host, config.start_page())
    }

    fn compose(window: Window, host: &dyn BrowserHost, start_page: NavigationTarget) -> Result<Self> {
        let web_view = WebView::init(&window, host, start_page)?;
        let surface = web_view.clone();
        window.on_resized(move |size| surface.set_size(size.width, size.height));
        Ok(Self { window, web_view })
    }
}

// ── Sample page commands ──────────────────────────────────────────────────────

/// A command string posted by the bundled page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCommand {
    MsgBox,
    AlertScript,
    FunctionWithArg,
    FunctionWithReturn,
    ReplaceHtml,
}

impl PageCommand {
    pub fn parse(message: &str) -> Option<Self> {
        Some(match message {
            "MsgBox" => Self::MsgBox,
            "AlertScript" => Self::AlertScript,
            "FunctionWithArg" => Self::FunctionWithArg,
            "FunctionWithReturn" => Self::FunctionWithReturn,
            "ReplaceHtml" => Self::ReplaceHtml,
            _ => return None,
        })
    }
}

/// Subscribe the demo behaviour to `app`'s events.
///
/// Handlers hold `app` weakly; they stop doing anything once it is dropped.
pub fn wire_sample(app: &Rc<WebViewWindow>) {
    app.window
        .on_closing(|_| tracing::info!(target: "app", "===[ Window is closing ]==="));

    let weak = Rc::downgrade(app);
    app.web_view.on_initialized(move |_| {
        tracing::info!(target: "app", "===[ WebView is initialized ]===");
        if let Some(app) = weak.upgrade() {
            app.web_view.load_page();
        }
    });

    app.web_view
        .on_page_loaded(|_| tracing::info!(target: "app", "===[ WebView page is loaded ]==="));

    let weak = Rc::downgrade(app);
    app.web_view.on_message_received(move |message| {
        let weak = Weak::clone(&weak);
        let message = message.clone();
        let spawned = spawn_local(async move {
            let Some(app) = weak.upgrade() else { return };
            if let Err(e) = handle_page_message(&app, &message).await {
                fault::report(&WorkItemFault {
                    message: format!("page message {message:?}: {e}"),
                });
            }
        });
        if let Err(e) = spawned {
            tracing::error!(target: "app", error = %e, "could not schedule page message handler");
        }
    });
}

/// Answer one message from the page.  Unknown messages are ignored.
pub async fn handle_page_message(app: &WebViewWindow, message: &str) -> Result<()> {
    tracing::info!(target: "app", "===[ Web message: {message} ]===");
    let Some(command) = PageCommand::parse(message) else {
        tracing::debug!(target: "app", message, "unrecognised page message");
        return Ok(());
    };

    match command {
        PageCommand::MsgBox => {
            app.window
                .show_message_box("Here is a message box.", "Here is a message box caption.");
        }
        PageCommand::AlertScript => {
            let script = format!(
                "alert('Hi from the UI thread! I got a message from the browser: {message}')"
            );
            app.web_view.execute_script(&script).await?;
        }
        PageCommand::FunctionWithArg => {
            app.web_view.execute_script("window.callMe('stuff')").await?;
        }
        PageCommand::FunctionWithReturn => {
            let returned = app.web_view.execute_script("window.iReturnSomething()").await?;
            let shown = returned.as_deref().unwrap_or("(null)");
            app.window
                .show_message_box(&format!("Script returned value:  {shown}."), "👇 Check It 👇");
        }
        PageCommand::ReplaceHtml => {
            let number = rand::thread_rng().gen_range(1..999);
            let html = format!("<h1>NEW CONTENT!</h1><h5>Your new random number is: <b>{number}</b></h5>");
            app.web_view
                .execute_script(&format!("window.replaceHtml('{html}')"))
                .await?;
        }
    }
    Ok(())
}
