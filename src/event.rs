// ── Notification decoding ─────────────────────────────────────────────────────
//
// Maps a raw window-system notification (code + two packed parameters) to a
// typed `DomainEvent`.  Pure and total: every input decodes to something, and
// `Unhandled` is a normal outcome, not an error.
//
// The codes are spelled out numerically so the decoder builds and is tested
// on every target; `platform::win32` asserts they match the Win32 headers.

/// `WM_SIZE`: the client area changed size; lparam packs width/height.
pub const WM_SIZE: u32 = 0x0005;

/// `WM_CLOSE`: the user (or system) asked the window to close.
pub const WM_CLOSE: u32 = 0x0010;

/// `WM_APP`: first code of the range reserved for private application use.
pub const WM_APP: u32 = 0x8000;

/// Private wake-up code posted by the scheduler when work becomes available.
///
/// Allocated from the `WM_APP` range so it can never collide with a code the
/// system defines.
pub const WM_WORK_AVAILABLE: u32 = WM_APP + 1;

/// A native notification exactly as the window procedure receives it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawMessage {
    pub code: u32,
    pub wparam: usize,
    pub lparam: isize,
}

impl RawMessage {
    pub const fn new(code: u32, wparam: usize, lparam: isize) -> Self {
        Self { code, wparam, lparam }
    }
}

/// What a notification means to the window and scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainEvent {
    /// New client size in device pixels.  Either component may be negative.
    Resized { width: i32, height: i32 },
    ClosingRequested,
    /// The scheduler's private wake code; drain pending work.
    WorkAvailable,
    /// Anything else.  The platform's default handler must still run.
    Unhandled(RawMessage),
}

/// Decode a raw notification.
pub fn decode(code: u32, wparam: usize, lparam: isize) -> DomainEvent {
    match code {
        WM_SIZE => DomainEvent::Resized {
            width: low_word(lparam),
            height: high_word(lparam),
        },
        WM_CLOSE => DomainEvent::ClosingRequested,
        WM_WORK_AVAILABLE => DomainEvent::WorkAvailable,
        _ => DomainEvent::Unhandled(RawMessage::new(code, wparam, lparam)),
    }
}

/// Decode a `RawMessage`.
pub fn decode_message(msg: RawMessage) -> DomainEvent {
    decode(msg.code, msg.wparam, msg.lparam)
}

/// Low 16 bits of the parameter, sign-extended (`GET_X_LPARAM`).
pub fn low_word(value: isize) -> i32 {
    i32::from(value as u32 as i16)
}

/// Bits 16..32 of the parameter, sign-extended (`GET_Y_LPARAM`).
pub fn high_word(value: isize) -> i32 {
    i32::from((value as u32 >> 16) as i16)
}

/// Pack two signed 16-bit coordinates the way the system does for `WM_SIZE`.
pub fn pack_words(low: i16, high: i16) -> isize {
    let packed = u32::from(low as u16) | (u32::from(high as u16) << 16);
    packed as isize
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn resize_800_by_600() {
        // width = 0x0320, height = 0x0258 packed into one lparam.
        let lparam = 0x0258_0320_isize;
        assert_eq!(
            decode(WM_SIZE, 0, lparam),
            DomainEvent::Resized { width: 800, height: 600 }
        );
    }

    #[test]
    fn resize_components_are_signed() {
        let lparam = pack_words(-1, -32768);
        assert_eq!(
            decode(WM_SIZE, 0, lparam),
            DomainEvent::Resized { width: -1, height: -32768 }
        );
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn resize_ignores_bits_above_32() {
        // On 64-bit targets the upper half of lparam carries no size data.
        let lparam = pack_words(10, 20) | (0x7F << 32);
        assert_eq!(low_word(lparam), 10);
        assert_eq!(high_word(lparam), 20);
    }

    #[test]
    fn close_and_wake_codes() {
        assert_eq!(decode(WM_CLOSE, 0, 0), DomainEvent::ClosingRequested);
        assert_eq!(decode(WM_WORK_AVAILABLE, 0, 0), DomainEvent::WorkAvailable);
    }

    #[test]
    fn wake_code_is_in_application_range() {
        assert!(WM_WORK_AVAILABLE >= WM_APP);
        assert!(WM_WORK_AVAILABLE < 0xC000);
    }

    #[test]
    fn anything_else_is_unhandled() {
        // WM_PAINT
        assert_eq!(
            decode(0x000F, 3, -4),
            DomainEvent::Unhandled(RawMessage::new(0x000F, 3, -4))
        );
        assert_eq!(
            decode_message(RawMessage::new(WM_APP + 2, 0, 0)),
            DomainEvent::Unhandled(RawMessage::new(WM_APP + 2, 0, 0))
        );
    }

    proptest! {
        #[test]
        fn packed_size_round_trips(w in any::<i16>(), h in any::<i16>()) {
            let lparam = pack_words(w, h);
            prop_assert_eq!(
                decode(WM_SIZE, 0, lparam),
                DomainEvent::Resized { width: i32::from(w), height: i32::from(h) }
            );
            let repacked = pack_words(low_word(lparam) as i16, high_word(lparam) as i16);
            prop_assert_eq!(repacked, lparam);
        }
    }
}
