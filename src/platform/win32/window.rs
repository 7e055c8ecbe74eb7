// ── Main window ───────────────────────────────────────────────────────────────
//
// Responsibilities in this file (unsafe confined here):
//   • Register a window class named after the window title.
//   • Create the top-level window and route its notifications to `WindowCore`.
//   • Retrieve and dispatch messages for the thread (`Win32MessageSource`).
//   • Post the scheduler's wake code (`Win32Wake`).
//   • Expose a safe error-dialog helper for use by main().
//
// The window procedure looks its `WindowCore` up by `HWND` in a thread-local
// map.  Messages sent during `CreateWindowExW` (WM_CREATE, the first WM_SIZE)
// arrive before the handle is known, so the core being created is parked in
// `CREATING` and claimed by the first message that reaches the procedure.

#![allow(unsafe_code)]

use std::{
    cell::RefCell,
    collections::HashMap,
    ffi::c_void,
    rc::{Rc, Weak},
};

use windows::{
    core::PCWSTR,
    Win32::{
        Foundation::{GetLastError, HINSTANCE, HWND, LPARAM, LRESULT, WPARAM},
        Graphics::Gdi::{CreateSolidBrush, UpdateWindow, COLOR_BACKGROUND, HBRUSH},
        System::LibraryLoader::GetModuleHandleW,
        UI::WindowsAndMessaging::{
            CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetMessageW,
            IsWindow, LoadCursorW, LoadIconW, MessageBoxW, PostMessageW, PostQuitMessage,
            RegisterClassW, ShowWindow, TranslateMessage, CS_HREDRAW, CS_VREDRAW, CW_USEDEFAULT,
            HMENU, IDC_ARROW, IDI_APPLICATION, MB_ICONERROR, MB_OK, MSG, SW_SHOW,
            WINDOW_EX_STYLE, WM_NCDESTROY, WNDCLASSW, WS_OVERLAPPEDWINDOW,
        },
    },
};

use super::wide;
use crate::{
    error::{Result, ShellError},
    event::RawMessage,
    platform::{NativeWindow, WindowParams},
    pump::{MessageSource, Retrieved},
    scheduler::WakeSignal,
    window::{Dispatched, WindowCore},
};

thread_local! {
    /// Live windows on this thread, keyed by `HWND` value.
    static HWND_MAP: RefCell<HashMap<isize, Weak<WindowCore>>> = RefCell::new(HashMap::new());
    /// The core whose window is inside `CreateWindowExW` right now.
    static CREATING: RefCell<Option<Weak<WindowCore>>> = const { RefCell::new(None) };
}

fn hwnd_from(raw: isize) -> HWND {
    HWND(raw as *mut c_void)
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Register the class, create the window and return it with its wake signal.
///
/// The window is created hidden; call `NativeWindow::show`.
pub(crate) fn create(params: &WindowParams, core: &Rc<WindowCore>) -> Result<(Rc<Win32Window>, Win32Wake)> {
    // SAFETY: GetModuleHandleW(None) returns the .exe's own HMODULE, which is
    // always valid for the process lifetime.
    let hmodule = unsafe { GetModuleHandleW(None) }?;
    let hinstance = HINSTANCE(hmodule.0);

    let class_name = wide(&params.title);
    register_class(hinstance, &class_name, params.background_color)?;

    let title = wide(&format!("{} {}", params.title, env!("CARGO_PKG_VERSION")));

    CREATING.with(|c| *c.borrow_mut() = Some(Rc::downgrade(core)));
    // SAFETY: the class was just registered with `wnd_proc`; both strings are
    // null-terminated and outlive the call.  Null parent and menu create a
    // top-level window.
    let created = unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE(0),
            PCWSTR(class_name.as_ptr()),
            PCWSTR(title.as_ptr()),
            WS_OVERLAPPEDWINDOW,
            CW_USEDEFAULT,
            CW_USEDEFAULT,
            params.width,
            params.height,
            HWND::default(),
            HMENU::default(),
            hinstance,
            None,
        )
    };
    CREATING.with(|c| c.borrow_mut().take());

    let hwnd = match created {
        Ok(hwnd) if !hwnd.is_invalid() => hwnd,
        _ => {
            return Err(ShellError::WindowCreation {
                code: last_error_code(),
            })
        }
    };

    // A window that received no message during creation still needs routing.
    HWND_MAP.with(|m| {
        m.borrow_mut()
            .entry(hwnd.0 as isize)
            .or_insert_with(|| Rc::downgrade(core));
    });

    let raw = hwnd.0 as isize;
    tracing::debug!(target: "ui", hwnd = format_args!("{raw:#x}"), title = %params.title, "window created");
    Ok((Rc::new(Win32Window { hwnd: raw }), Win32Wake { hwnd: raw }))
}

/// Show a modal error dialog with the given message.
///
/// Used by `main()` when startup fails; there is no console to print to.
pub fn show_error_dialog(message: &str) {
    let msg_wide = wide(message);
    let title_wide = wide(&format!("{} - Fatal Error", env!("CARGO_PKG_NAME")));

    // SAFETY: both buffers are valid null-terminated UTF-16 strings that
    // remain allocated for the duration of the call.  A null owner is allowed.
    unsafe {
        let _ = MessageBoxW(
            HWND::default(),
            PCWSTR(msg_wide.as_ptr()),
            PCWSTR(title_wide.as_ptr()),
            MB_OK | MB_ICONERROR,
        );
    }
}

// ── Window class registration ─────────────────────────────────────────────────

fn register_class(hinstance: HINSTANCE, class_name: &[u16], background_color: u32) -> Result<()> {
    // SAFETY: IDI_APPLICATION and IDC_ARROW are built-in resources that exist
    // on every Windows version.
    let icon = unsafe { LoadIconW(None, IDI_APPLICATION) }?;
    // SAFETY: as above.
    let cursor = unsafe { LoadCursorW(None, IDC_ARROW) }?;

    // SAFETY: CreateSolidBrush takes a plain COLORREF and has no other
    // preconditions.  The brush is owned by the class for the process lifetime.
    let mut brush = unsafe { CreateSolidBrush(windows::Win32::Foundation::COLORREF(background_color)) };
    if brush.is_invalid() {
        tracing::warn!(target: "ui", "solid background brush unavailable; using system colour");
        // System colour index + 1 is the documented way to name a system
        // brush in WNDCLASS.
        brush = HBRUSH((COLOR_BACKGROUND.0 + 1) as isize as *mut c_void);
    }

    let wndclass = WNDCLASSW {
        style: CS_HREDRAW | CS_VREDRAW,
        lpfnWndProc: Some(wnd_proc),
        hInstance: hinstance,
        hIcon: icon,
        hCursor: cursor,
        hbrBackground: brush,
        lpszClassName: PCWSTR(class_name.as_ptr()),
        ..Default::default()
    };

    // SAFETY: wndclass is fully initialised; class_name outlives the call and
    // the system copies it.
    if unsafe { RegisterClassW(&wndclass) } == 0 {
        return Err(ShellError::ClassRegistration {
            code: last_error_code(),
        });
    }
    Ok(())
}

// ── Native window ─────────────────────────────────────────────────────────────

/// A live top-level `HWND`.  Thread-affine: created and used on the UI thread.
pub struct Win32Window {
    hwnd: isize,
}

impl NativeWindow for Win32Window {
    fn raw_handle(&self) -> isize {
        self.hwnd
    }

    fn show(&self) {
        if !self.is_alive() {
            return;
        }
        // SAFETY: hwnd came from CreateWindowExW on this thread and still
        // names a window.  The return values report previous visibility and
        // paint success; neither matters.
        unsafe {
            let _ = ShowWindow(hwnd_from(self.hwnd), SW_SHOW);
            let _ = UpdateWindow(hwnd_from(self.hwnd));
        }
    }

    fn show_message_box(&self, message: &str, caption: &str) {
        if !self.is_alive() {
            return;
        }
        let text = wide(message);
        let caption = wide(caption);
        // SAFETY: both buffers are null-terminated and live across the call.
        // MessageBoxW runs a nested message loop; re-entrant dispatch into
        // `wnd_proc` is expected.
        unsafe {
            let _ = MessageBoxW(
                hwnd_from(self.hwnd),
                PCWSTR(text.as_ptr()),
                PCWSTR(caption.as_ptr()),
                MB_OK,
            );
        }
    }

    fn request_quit(&self, exit_code: i32) {
        // SAFETY: PostQuitMessage only posts WM_QUIT to this thread's queue.
        unsafe { PostQuitMessage(exit_code) };
    }

    fn default_handling(&self, msg: RawMessage) -> isize {
        // SAFETY: hwnd is a window of this thread; the parameters are the ones
        // the system delivered.
        unsafe {
            DefWindowProcW(
                hwnd_from(self.hwnd),
                msg.code,
                WPARAM(msg.wparam),
                LPARAM(msg.lparam),
            )
        }
        .0
    }

    fn destroy(&self) {
        if self.is_alive() {
            // SAFETY: the handle still names a window owned by this thread.
            let _ = unsafe { DestroyWindow(hwnd_from(self.hwnd)) };
        }
    }
}

impl Win32Window {
    /// `false` once default handling of WM_CLOSE (or `destroy`) has taken the
    /// handle down.
    fn is_alive(&self) -> bool {
        // SAFETY: IsWindow accepts any value, including stale handles.
        unsafe { IsWindow(hwnd_from(self.hwnd)) }.as_bool()
    }
}

impl Drop for Win32Window {
    fn drop(&mut self) {
        self.destroy();
    }
}

// ── Wake signal ───────────────────────────────────────────────────────────────

/// Posts the scheduler's wake code to a window.  Any thread may use it.
#[derive(Debug, Clone, Copy)]
pub struct Win32Wake {
    hwnd: isize,
}

impl WakeSignal for Win32Wake {
    fn signal(&self, code: u32) -> Result<()> {
        // SAFETY: PostMessageW is documented as callable from any thread.  A
        // stale handle makes it fail, which is reported rather than acted on.
        unsafe { PostMessageW(hwnd_from(self.hwnd), code, WPARAM(0), LPARAM(0)) }.map_err(|e| {
            ShellError::Win32 {
                function: "PostMessageW",
                code: e.code().0 as u32,
            }
        })
    }
}

// ── Message source ────────────────────────────────────────────────────────────

/// The calling thread's Win32 message queue.
pub struct Win32MessageSource;

impl MessageSource for Win32MessageSource {
    type Message = MSG;

    fn retrieve(&mut self) -> Result<Retrieved<MSG>> {
        let mut msg = MSG::default();
        // SAFETY: &mut msg is a valid MSG pointer; a null HWND retrieves
        // messages for every window on this thread; 0,0 accepts all codes.
        let ret = unsafe { GetMessageW(&mut msg, HWND::default(), 0, 0) };
        match ret.0 {
            -1 => Err(last_error("GetMessageW")),
            // WM_QUIT: wParam carries the exit code given to PostQuitMessage.
            0 => Ok(Retrieved::Quit(msg.wParam.0 as i32)),
            _ => Ok(Retrieved::Message(msg)),
        }
    }

    fn dispatch(&mut self, msg: MSG) {
        // SAFETY: msg was filled by a successful GetMessageW.  The return
        // values (whether WM_CHAR was generated, the LRESULT) are unused.
        unsafe {
            let _ = TranslateMessage(&msg);
            let _ = DispatchMessageW(&msg);
        }
    }
}

// ── Window procedure ──────────────────────────────────────────────────────────

fn core_for(hwnd: HWND) -> Option<Rc<WindowCore>> {
    let key = hwnd.0 as isize;
    let weak = HWND_MAP.with(|m| {
        let mut map = m.borrow_mut();
        if let Some(weak) = map.get(&key) {
            return Some(weak.clone());
        }
        let claimed = CREATING.with(|c| c.borrow().clone())?;
        map.insert(key, claimed.clone());
        Some(claimed)
    });
    weak?.upgrade()
}

// SAFETY: wnd_proc is registered as lpfnWndProc in WNDCLASSW.
// Windows guarantees that hwnd, msg, wparam, and lparam are valid for the
// lifetime of this call.  No map borrow is held while the core dispatches, so
// nested loops (message boxes) may re-enter freely.
unsafe extern "system" fn wnd_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if msg == WM_NCDESTROY {
        HWND_MAP.with(|m| m.borrow_mut().remove(&(hwnd.0 as isize)));
        return DefWindowProcW(hwnd, msg, wparam, lparam);
    }

    match core_for(hwnd) {
        Some(core) => match core.dispatch(RawMessage::new(msg, wparam.0, lparam.0)) {
            Dispatched::Handled(result) => LRESULT(result),
            // During creation the core has no native handle yet, so the
            // default handling is called here rather than through the core.
            Dispatched::Default => DefWindowProcW(hwnd, msg, wparam, lparam),
        },
        None => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}

// ── Error helpers ─────────────────────────────────────────────────────────────

fn last_error_code() -> u32 {
    // SAFETY: GetLastError reads thread-local state set by the last Win32 call.
    unsafe { GetLastError() }.0
}

/// Capture the current Win32 last-error code as a `ShellError::Win32`.
///
/// Call immediately after the failing function; any later API call may
/// overwrite the thread's last-error value.
fn last_error(function: &'static str) -> ShellError {
    ShellError::Win32 {
        function,
        code: last_error_code(),
    }
}
