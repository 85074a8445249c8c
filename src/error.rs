//! Error types.
//!
//! Every failure in padbridge is scoped to a single device: errors are logged by
//! the bridge or registry and turned into lifecycle events rather than bubbling
//! up to the process.

use std::io;

/// Failures at the physical HID boundary.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The OS refused to open the device path in the requested share mode.
    #[error("cannot open {path}: {reason}")]
    Open { path: String, reason: String },

    /// The backend cannot request exclusive access (e.g. hidapi on non-Windows).
    #[error("exclusive access is not supported by this backend")]
    ExclusiveUnsupported,

    /// A non-timeout read failure.
    #[error("read failed: {0}")]
    Read(String),

    /// A feature-report write failed.
    #[error("write failed: {0}")]
    Write(String),

    /// The device reported itself closed / disconnected.
    #[error("device closed")]
    Closed,

    /// Enumeration of present devices failed.
    #[error("enumeration failed: {0}")]
    Enumerate(String),
}

/// Failures at the virtual sink boundary.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The target is still plugged in from an earlier session.
    ///
    /// Recoverable: the bridge disconnects and reconnects once.
    #[error("virtual pad already connected")]
    AlreadyConnected,

    #[error("virtual pad not connected")]
    NotConnected,

    /// Any other bus/driver failure.
    #[error("virtual bus: {0}")]
    Bus(String),
}

/// Failures of the OS visibility collaborator. Logged and ignored.
#[derive(Debug, thiserror::Error)]
#[error("visibility change for {instance_id} failed: {reason}")]
pub struct VisibilityError {
    pub instance_id: String,
    pub reason: String,
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors returned by the bridge and service control surface.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge already started")]
    AlreadyStarted,

    #[error("cannot spawn thread: {0}")]
    Spawn(#[from] io::Error),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
