//! Virtual pad boundary.
//!
//! A [`VirtualPad`] is one standardized Xbox 360-style target on a virtual bus.
//! The bridge keeps a pending [`PadFrame`], updates it from decoded reports,
//! and submits the whole frame at once.
//!
//! Feedback (rumble + LED) flows the other way through a [`FeedbackHandler`]
//! that the pad calls from its own thread.

use crate::error::SinkError;
use crate::report::{ControllerState, FeedbackCommand};
use std::sync::Arc;

/// Xbox 360 button bits (same values as XInput / XUSB).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PadButtons(pub u16);

impl PadButtons {
    pub const UP: u16 = 0x0001;
    pub const DOWN: u16 = 0x0002;
    pub const LEFT: u16 = 0x0004;
    pub const RIGHT: u16 = 0x0008;
    pub const START: u16 = 0x0010;
    pub const BACK: u16 = 0x0020;
    pub const LTHUMB: u16 = 0x0040;
    pub const RTHUMB: u16 = 0x0080;
    pub const LB: u16 = 0x0100;
    pub const RB: u16 = 0x0200;
    pub const GUIDE: u16 = 0x0400;
    pub const A: u16 = 0x1000;
    pub const B: u16 = 0x2000;
    pub const X: u16 = 0x4000;
    pub const Y: u16 = 0x8000;

    #[inline]
    pub fn set(&mut self, mask: u16, on: bool) {
        if on {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }

    #[inline]
    pub fn contains(&self, mask: u16) -> bool {
        self.0 & mask == mask
    }
}

/// Full state submitted to the virtual pad in one go.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PadFrame {
    pub buttons: PadButtons,
    pub left_trigger: u8,
    pub right_trigger: u8,
    pub thumb_lx: i16,
    pub thumb_ly: i16,
    pub thumb_rx: i16,
    pub thumb_ry: i16,
}

impl PadFrame {
    /// Copy everything from a decoded report except the guide button.
    ///
    /// Guide is owned by the bridge's pulse timer and left untouched here.
    pub fn apply(&mut self, state: &ControllerState) {
        let b = &state.buttons;
        let d = &state.dpad;
        let btn = &mut self.buttons;

        btn.set(PadButtons::A, b.a);
        btn.set(PadButtons::B, b.b);
        btn.set(PadButtons::X, b.x);
        btn.set(PadButtons::Y, b.y);
        btn.set(PadButtons::LB, b.left_shoulder);
        btn.set(PadButtons::RB, b.right_shoulder);
        btn.set(PadButtons::BACK, b.back);
        btn.set(PadButtons::START, b.start);
        btn.set(PadButtons::LTHUMB, b.left_thumb);
        btn.set(PadButtons::RTHUMB, b.right_thumb);

        btn.set(PadButtons::UP, d.up);
        btn.set(PadButtons::DOWN, d.down);
        btn.set(PadButtons::LEFT, d.left);
        btn.set(PadButtons::RIGHT, d.right);

        self.thumb_lx = state.left_stick.x;
        self.thumb_ly = state.left_stick.y;
        self.thumb_rx = state.right_stick.x;
        self.thumb_ry = state.right_stick.y;
        self.left_trigger = state.left_trigger;
        self.right_trigger = state.right_trigger;
    }

    pub fn guide(&self) -> bool {
        self.buttons.contains(PadButtons::GUIDE)
    }

    pub fn set_guide(&mut self, on: bool) {
        self.buttons.set(PadButtons::GUIDE, on);
    }
}

/// Callback the pad invokes when the consumer sends rumble / LED updates.
pub type FeedbackHandler = Arc<dyn Fn(FeedbackCommand) + Send + Sync>;

/// One virtual pad target.
pub trait VirtualPad: Send {
    /// Plug the target into the bus.
    ///
    /// Returns [`SinkError::AlreadyConnected`] when a previous session did not
    /// fully unplug.
    fn connect(&mut self) -> Result<(), SinkError>;

    fn disconnect(&mut self) -> Result<(), SinkError>;

    /// Submit a complete frame.
    fn submit(&mut self, frame: &PadFrame) -> Result<(), SinkError>;

    /// Install the feedback callback. Must be called before [`connect`](Self::connect).
    fn set_feedback_handler(&mut self, handler: FeedbackHandler);
}

/// Creates one virtual pad per bridge.
pub trait PadFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn VirtualPad>, SinkError>;
}
