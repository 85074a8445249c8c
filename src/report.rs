//! Fixed-layout report codec.
//!
//! The supported gamepads deliver one 20-byte input report and accept a 3-byte
//! feature report for rumble. This module turns the former into a
//! [`ControllerState`] and builds the latter from a [`FeedbackCommand`].
//! Everything here is pure: no state, no I/O.
//!
//! ## Input report layout
//! | byte  | meaning                                             |
//! |-------|-----------------------------------------------------|
//! | 0     | A (bit 0), B (1), X (3), Y (4), LB (6), RB (7)      |
//! | 1     | Back (bit 2), Start (3), LThumb (5), RThumb (6)     |
//! | 2     | unused                                              |
//! | 3     | hat: `0..=7` (Up = 0, clockwise), `>= 8` neutral    |
//! | 4..=7 | LX, LY, RX, RY (unsigned, centre ≈ 0x80)            |
//! | 8, 9  | unused                                              |
//! | 10,11 | left / right trigger                                |
//! | 12..17| accelerometer (ignored)                             |
//! | 18    | battery level                                       |
//! | 19    | guide / "home" button (bit 0)                       |
//!
//! ## Value conventions
//! - Sticks are widened to the full `i16` range. Y axes are inverted because
//!   the device's positive direction is the opposite of the virtual profile's.
//! - Triggers and battery are passed through untouched.
//! - The idle hat sentinel is `0x0F` (all bits set); it is a valid neutral
//!   state, not a decode error.

/// Length of the input report payload (without report ID).
pub const REPORT_LEN: usize = 20;

/// Feature report selector for rumble. Must not change.
pub const FEEDBACK_REPORT_ID: u8 = 0x20;

/// Feature report that stops both motors.
pub const FEEDBACK_RESET: [u8; 3] = [FEEDBACK_REPORT_ID, 0x00, 0x00];

const BYTE_BUTTONS_LOW: usize = 0;
const BYTE_BUTTONS_HIGH: usize = 1;
const BYTE_HAT: usize = 3;
const BYTE_LX: usize = 4;
const BYTE_LY: usize = 5;
const BYTE_RX: usize = 6;
const BYTE_RY: usize = 7;
const BYTE_LT: usize = 10;
const BYTE_RT: usize = 11;
const BYTE_BATTERY: usize = 18;
const BYTE_GUIDE: usize = 19;

/// Ten named digital buttons.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Buttons {
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,
    pub left_shoulder: bool,
    pub right_shoulder: bool,
    pub back: bool,
    pub start: bool,
    pub left_thumb: bool,
    pub right_thumb: bool,
}

/// D-pad directions. Opposite directions are never asserted together.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DPad {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl DPad {
    pub const NEUTRAL: DPad = DPad {
        up: false,
        down: false,
        left: false,
        right: false,
    };

    const fn new(up: bool, right: bool, down: bool, left: bool) -> Self {
        Self {
            up,
            down,
            left,
            right,
        }
    }

    /// Map a hat code to directions. Codes `>= 8` are neutral.
    pub fn from_hat(code: u8) -> Self {
        HAT_TABLE
            .get(usize::from(code))
            .copied()
            .unwrap_or(Self::NEUTRAL)
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::NEUTRAL
    }
}

/// Hat code → directions (Up = 0, clockwise).
const HAT_TABLE: [DPad; 8] = [
    DPad::new(true, false, false, false), // up
    DPad::new(true, true, false, false),  // up + right
    DPad::new(false, true, false, false), // right
    DPad::new(false, true, true, false),  // right + down
    DPad::new(false, false, true, false), // down
    DPad::new(false, false, true, true),  // down + left
    DPad::new(false, false, false, true), // left
    DPad::new(true, false, false, true),  // left + up
];

/// One analog stick, full signed 16-bit range per axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stick {
    pub x: i16,
    pub y: i16,
}

/// Canonical snapshot decoded from one input report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControllerState {
    pub buttons: Buttons,
    pub dpad: DPad,
    pub left_stick: Stick,
    pub right_stick: Stick,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub battery: u8,
    /// Raw guide bit. The bridge turns this into a timed pulse.
    pub guide: bool,
}

/// Rumble / LED request coming back from the virtual pad.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeedbackCommand {
    pub small_motor: u8,
    pub large_motor: u8,
    pub led_index: u8,
}

impl FeedbackCommand {
    /// `true` when both motors are requested off.
    pub fn is_stop(&self) -> bool {
        self.small_motor == 0 && self.large_motor == 0
    }
}

#[inline]
fn bit(byte: u8, n: u8) -> bool {
    (byte >> n) & 1 != 0
}

/// Widen an unsigned byte to the signed 16-bit axis range.
///
/// `value * 257 + i16::MIN`, sign-flipped when `invert` is set. The flip
/// mirrors around -0.5 (`-v - 1`) so `0 → i16::MAX` and `255 → i16::MIN`
/// instead of overflowing.
pub fn map_analog(value: u8, invert: bool) -> i16 {
    let widened = i32::from(value) * 257 + i32::from(i16::MIN);
    let mapped = if invert { -widened - 1 } else { widened };
    mapped.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

/// Decode a 20-byte input report.
pub fn decode(report: &[u8; REPORT_LEN]) -> ControllerState {
    let lo = report[BYTE_BUTTONS_LOW];
    let hi = report[BYTE_BUTTONS_HIGH];

    let buttons = Buttons {
        a: bit(lo, 0),
        b: bit(lo, 1),
        x: bit(lo, 3),
        y: bit(lo, 4),
        left_shoulder: bit(lo, 6),
        right_shoulder: bit(lo, 7),
        back: bit(hi, 2),
        start: bit(hi, 3),
        left_thumb: bit(hi, 5),
        right_thumb: bit(hi, 6),
    };

    ControllerState {
        buttons,
        dpad: DPad::from_hat(report[BYTE_HAT]),
        left_stick: Stick {
            x: map_analog(report[BYTE_LX], false),
            y: map_analog(report[BYTE_LY], true),
        },
        right_stick: Stick {
            x: map_analog(report[BYTE_RX], false),
            y: map_analog(report[BYTE_RY], true),
        },
        left_trigger: report[BYTE_LT],
        right_trigger: report[BYTE_RT],
        battery: report[BYTE_BATTERY],
        guide: bit(report[BYTE_GUIDE], 0),
    }
}

/// Build the rumble feature report: `{0x20, small, large}`.
pub fn encode_feedback(cmd: &FeedbackCommand) -> [u8; 3] {
    [FEEDBACK_REPORT_ID, cmd.small_motor, cmd.large_motor]
}

/// Extract the 20-byte payload from a raw read.
///
/// Reads arrive either as the bare payload or prefixed with a report-ID byte
/// (Windows always prepends it). Anything else is not a report we understand.
pub fn split_report(data: &[u8]) -> Option<&[u8; REPORT_LEN]> {
    match data.len() {
        REPORT_LEN => data.try_into().ok(),
        n if n == REPORT_LEN + 1 => data.get(1..).and_then(|p| p.try_into().ok()),
        _ => None,
    }
}
