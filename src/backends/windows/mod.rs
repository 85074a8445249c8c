#![cfg(target_os = "windows")]

//! Windows backends.
//!
//! - [`hid_device`]: native HID handles opened with `CreateFileW` in overlapped
//!   mode, so the bridge can ask for exclusive access and read with a timeout
//!   while feedback writes go through on another thread
//! - [`vigem`]: Xbox 360 virtual pads on the ViGEmBus driver
//!
//! Most users should not interact with these modules directly. Prefer
//! [`platform_backend`](crate::backends::platform_backend) and
//! [`VirtualBus`](vigem::VirtualBus).

pub mod hid_device;
pub mod vigem;

pub use hid_device::WinHidOpener;
pub use vigem::VirtualBus;
