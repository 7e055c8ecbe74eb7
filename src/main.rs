// Release builds run as a GUI application (no console window).
// Debug builds keep the console so that log output is visible.
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

#[cfg(windows)]
fn run() -> webhost::Result<i32> {
    use std::rc::Rc;

    use webhost::{app, config, logging, platform::win32::webview2::WebView2Host, MessagePump};

    let config = config::load()?;
    logging::init(&config.log_filter);

    // The host owns the COM apartment and must outlive the loop.
    let host = WebView2Host::new()?;
    let shell = Rc::new(webhost::WebViewWindow::create(&config, &host)?);
    app::wire_sample(&shell);
    shell.window.show();

    MessagePump::native().run()
}

#[cfg(windows)]
fn main() {
    match run() {
        Ok(exit_code) => {
            println!("Ended with exit code {exit_code}.");
            std::process::exit(exit_code);
        }
        Err(e) => {
            // Startup failed before or during the message loop.
            // Show a modal error dialog: the only safe output path in a GUI app.
            tracing::error!(target: "app", error = %e, "fatal");
            webhost::platform::win32::window::show_error_dialog(&e.to_string());
            std::process::exit(1);
        }
    }
}

#[cfg(not(windows))]
fn main() {
    webhost::logging::init("info");
    tracing::error!(target: "app", "the native window and WebView2 host require Windows");
    std::process::exit(1);
}
