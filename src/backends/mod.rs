//! Device and virtual-pad backends for `padbridge`.
//!
//! Implementations of the [`HidOpener`](crate::device::HidOpener),
//! [`DeviceEnumerator`](crate::device::DeviceEnumerator) and
//! [`PadFactory`](crate::sink::PadFactory) seams.
//!
//! # Feature flags
//! - **`hid`**: enables the hidapi backend (default).
//!
//! # Platforms
//! - **Windows**: enumeration through hidapi, device I/O through the native
//!   overlapped backend (real exclusive access), virtual pads through ViGEmBus.
//! - **Elsewhere**: enumeration and shared-mode I/O through hidapi. There is no
//!   virtual pad backend; callers provide their own [`PadFactory`](crate::sink::PadFactory).

use crate::device::{DeviceEnumerator, HidOpener};
use crate::error::DeviceError;
use std::sync::Arc;

#[cfg(feature = "hid")]
#[cfg_attr(docsrs, doc(cfg(feature = "hid")))]
pub mod hid;

#[cfg(target_os = "windows")]
#[cfg_attr(docsrs, doc(cfg(target_os = "windows")))]
pub mod windows;

/// Enumerator + opener pair for the current platform.
pub struct PlatformBackend {
    pub enumerator: Box<dyn DeviceEnumerator>,
    pub opener: Arc<dyn HidOpener>,
}

/// Build the default device backend for this platform.
#[cfg(feature = "hid")]
pub fn platform_backend() -> Result<PlatformBackend, DeviceError> {
    let hid = hid::HidApiBackend::new()?;

    #[cfg(target_os = "windows")]
    let opener: Arc<dyn HidOpener> = Arc::new(windows::hid_device::WinHidOpener);
    #[cfg(not(target_os = "windows"))]
    let opener: Arc<dyn HidOpener> = Arc::new(hid.clone());

    Ok(PlatformBackend {
        enumerator: Box::new(hid),
        opener,
    })
}

#[cfg(not(feature = "hid"))]
pub fn platform_backend() -> Result<PlatformBackend, DeviceError> {
    Err(DeviceError::Enumerate(
        "built without the `hid` feature".into(),
    ))
}
