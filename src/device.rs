//! Physical device boundary.
//!
//! The bridge talks to hardware through two small traits so the same worker
//! runs against the Windows overlapped-I/O backend, the cross-platform hidapi
//! backend, or an in-memory fake in tests:
//!
//! - [`HidOpener`] opens a device path in a given [`ShareMode`]
//! - [`HidHandle`] is one open connection: bounded reads and feature writes
//!
//! Closing a device is dropping its handle.
//!
//! ## Identity
//! [`DeviceDescriptor`] identity is the OS path alone. Two descriptors with the
//! same path compare equal even if their instance IDs differ.

use crate::error::DeviceError;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// A device found during enumeration.
#[derive(Clone, Debug, Eq)]
pub struct DeviceDescriptor {
    /// Opaque OS handle path. Unique per present device.
    pub path: String,
    /// Device instance ID, used for the visibility collaborator.
    pub instance_id: String,
}

impl DeviceDescriptor {
    pub fn new(path: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            instance_id: instance_id.into(),
        }
    }

    /// Build a descriptor whose instance ID is derived from the path.
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let instance_id = instance_id_from_path(&path);
        Self { path, instance_id }
    }
}

impl PartialEq for DeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Hash for DeviceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path, self.instance_id)
    }
}

/// Derive a device instance ID from a Windows device-interface path.
///
/// `\\?\hid#vid_2717&pid_3144#7&2b3c&0&0000#{4d1e55b2-...}` becomes
/// `hid\vid_2717&pid_3144\7&2b3c&0&0000`. Paths that don't look like
/// interface paths are returned with only the separator rewrite applied.
pub fn instance_id_from_path(path: &str) -> String {
    let tail = path.rsplit('\\').next().unwrap_or(path);
    let body = match tail.rfind('{') {
        Some(idx) => tail.get(..idx).unwrap_or(tail),
        None => tail,
    };
    let id = body.replace('#', "\\");
    id.trim_end_matches('\\').to_string()
}

/// How the device file is shared with other processes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShareMode {
    /// No other handle may read or write while we hold it.
    Exclusive,
    /// Shared read/write access.
    Shared,
}

impl fmt::Display for ShareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShareMode::Exclusive => f.write_str("exclusive"),
            ShareMode::Shared => f.write_str("shared"),
        }
    }
}

/// Outcome of a bounded read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n` bytes were written into the buffer.
    Data(usize),
    /// No report arrived before the timeout. Normal idle polling.
    TimedOut,
}

/// One open device connection.
///
/// Methods take `&self`: the read loop and the feedback relay use the handle
/// from different threads. Writes are serialized by the bridge, reads happen on
/// the worker only.
pub trait HidHandle: Send + Sync {
    /// Block for at most `timeout` waiting for one input report.
    fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<ReadStatus, DeviceError>;

    /// Send a feature report. `data[0]` is the report ID.
    fn send_feature_report(&self, data: &[u8]) -> Result<(), DeviceError>;
}

/// Opens device paths.
pub trait HidOpener: Send + Sync {
    fn open(&self, path: &str, mode: ShareMode) -> Result<Box<dyn HidHandle>, DeviceError>;
}

/// Lists currently present devices.
pub trait DeviceEnumerator: Send {
    fn enumerate(&mut self) -> Result<Vec<DeviceDescriptor>, DeviceError>;
}
