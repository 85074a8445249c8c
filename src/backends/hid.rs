//! hidapi backend.
//!
//! Cross-platform enumeration and shared-mode device I/O. hidapi cannot ask
//! the OS for exclusive access, so [`ShareMode::Exclusive`] is refused and the
//! bridge falls back to shared mode.
//!
//! A `HidDevice` must not be used from two threads at once. Reads therefore
//! hold the device lock only for short slices, which lets feedback writes get
//! in between while the worker waits for the next report.

use crate::device::{
    DeviceDescriptor, DeviceEnumerator, HidHandle, HidOpener, ReadStatus, ShareMode,
};
use crate::error::DeviceError;
use hidapi::{HidApi, HidDevice};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ffi::CString;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Longest a single hidapi read holds the device lock.
const READ_SLICE: Duration = Duration::from_millis(20);

/// Shared `HidApi` context used for both enumeration and opening.
#[derive(Clone)]
pub struct HidApiBackend {
    api: Arc<Mutex<HidApi>>,
}

impl HidApiBackend {
    pub fn new() -> Result<Self, DeviceError> {
        let api = HidApi::new().map_err(|e| DeviceError::Enumerate(e.to_string()))?;
        Ok(Self {
            api: Arc::new(Mutex::new(api)),
        })
    }
}

impl DeviceEnumerator for HidApiBackend {
    fn enumerate(&mut self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let mut api = self.api.lock();
        api.refresh_devices()
            .map_err(|e| DeviceError::Enumerate(e.to_string()))?;

        // hidapi lists one entry per top-level collection; keep one per path
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for info in api.device_list() {
            let path = info.path().to_string_lossy().into_owned();
            if seen.insert(path.clone()) {
                out.push(DeviceDescriptor::from_path(path));
            }
        }
        debug!(count = out.len(), "hid enumeration");
        Ok(out)
    }
}

impl HidOpener for HidApiBackend {
    fn open(&self, path: &str, mode: ShareMode) -> Result<Box<dyn HidHandle>, DeviceError> {
        if mode == ShareMode::Exclusive {
            return Err(DeviceError::ExclusiveUnsupported);
        }
        let open_err = |reason: String| DeviceError::Open {
            path: path.to_string(),
            reason,
        };
        let c_path = CString::new(path).map_err(|e| open_err(e.to_string()))?;
        let device = self
            .api
            .lock()
            .open_path(&c_path)
            .map_err(|e| open_err(e.to_string()))?;
        Ok(Box::new(HidApiHandle {
            device: Mutex::new(device),
        }))
    }
}

struct HidApiHandle {
    device: Mutex<HidDevice>,
}

impl HidHandle for HidApiHandle {
    fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<ReadStatus, DeviceError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(ReadStatus::TimedOut);
            }
            let slice = remaining.min(READ_SLICE);
            let millis = i32::try_from(slice.as_millis()).unwrap_or(i32::MAX).max(1);

            let n = self
                .device
                .lock()
                .read_timeout(buf, millis)
                .map_err(|e| DeviceError::Read(e.to_string()))?;
            if n > 0 {
                return Ok(ReadStatus::Data(n));
            }
        }
    }

    fn send_feature_report(&self, data: &[u8]) -> Result<(), DeviceError> {
        self.device
            .lock()
            .send_feature_report(data)
            .map_err(|e| DeviceError::Write(e.to_string()))
    }
}
