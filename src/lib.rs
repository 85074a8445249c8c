//! # padbridge
//!
//! Bridges fixed-layout HID gamepads to a virtual Xbox 360 pad.
//!
//! - [`report`]: pure decode of the 20-byte input report and encode of the
//!   feedback feature report
//! - [`bridge`]: one [`DeviceBridge`] per physical device, with its read loop,
//!   feedback relay, rumble watchdog and guide pulse
//! - [`monitor`], [`registry`], [`service`]: hotplug polling, the path-keyed
//!   bridge map and the hub thread tying them together
//! - [`backends`]: hidapi and native Windows device access, ViGEmBus pads
//!
//! Every seam the core talks through ([`HidOpener`], [`DeviceEnumerator`],
//! [`PadFactory`], [`VisibilityControl`]) is a trait, so the whole pipeline
//! runs against in-memory fakes in tests.

pub mod backends;
pub mod bridge;
pub mod config;
pub mod device;
pub mod error;
pub mod monitor;
pub mod registry;
pub mod report;
pub mod service;
pub mod sink;
pub mod visibility;

pub use bridge::{BridgeEvent, BridgeId, BridgeState, DeviceBridge};
pub use config::{BridgeTiming, Config};
pub use device::{
    instance_id_from_path, DeviceDescriptor, DeviceEnumerator, HidHandle, HidOpener, ReadStatus,
    ShareMode,
};
pub use error::{BridgeError, ConfigError, DeviceError, Result, SinkError, VisibilityError};
pub use monitor::{DeviceFilter, HotplugEvent, HotplugMonitor, Scanner};
pub use registry::{Notification, Registry};
pub use report::{ControllerState, FeedbackCommand};
pub use service::BridgeService;
pub use sink::{FeedbackHandler, PadFactory, PadFrame, VirtualPad};
pub use visibility::{NoVisibility, VisibilityControl};
