//! Hotplug monitor.
//!
//! Polls the [`DeviceEnumerator`] on a fixed interval (first scan immediately),
//! keeps only paths matching the hardware filter, and diffs the result against
//! the previous scan. New paths become [`HotplugEvent::Attached`], vanished
//! ones [`HotplugEvent::Detached`]. Order of enumeration does not matter and an
//! unchanged device is never re-announced.
//!
//! A failed enumeration is logged and skipped; the previous scan stays the
//! reference, so a transient error does not look like every device leaving.

use crate::device::{DeviceDescriptor, DeviceEnumerator};
use crate::error::{BridgeError, DeviceError};
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use std::collections::HashSet;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HotplugEvent {
    Attached(DeviceDescriptor),
    Detached(DeviceDescriptor),
}

/// Case-insensitive substring match on device paths.
#[derive(Clone, Debug)]
pub struct DeviceFilter {
    needle: String,
}

impl DeviceFilter {
    pub fn new(pattern: &str) -> Self {
        Self {
            needle: pattern.to_lowercase(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        path.to_lowercase().contains(&self.needle)
    }
}

/// Set of devices seen in the previous scan.
#[derive(Debug, Default)]
pub struct SeenDevices {
    devices: Vec<DeviceDescriptor>,
}

impl SeenDevices {
    /// Replace the seen set with `current` and return what changed.
    ///
    /// Attachments come first (in `current` order), then detachments.
    pub fn update(&mut self, current: Vec<DeviceDescriptor>) -> Vec<HotplugEvent> {
        let mut unique = HashSet::new();
        let current: Vec<_> = current
            .into_iter()
            .filter(|d| unique.insert(d.path.clone()))
            .collect();

        let before: HashSet<&str> = self.devices.iter().map(|d| d.path.as_str()).collect();
        let now: HashSet<&str> = current.iter().map(|d| d.path.as_str()).collect();

        let mut events: Vec<HotplugEvent> = current
            .iter()
            .filter(|d| !before.contains(d.path.as_str()))
            .cloned()
            .map(HotplugEvent::Attached)
            .collect();
        events.extend(
            self.devices
                .iter()
                .filter(|d| !now.contains(d.path.as_str()))
                .cloned()
                .map(HotplugEvent::Detached),
        );

        self.devices = current;
        events
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Enumerate + filter + diff, one scan at a time.
pub struct Scanner {
    enumerator: Box<dyn DeviceEnumerator>,
    filter: DeviceFilter,
    seen: SeenDevices,
}

impl Scanner {
    pub fn new(enumerator: Box<dyn DeviceEnumerator>, filter: DeviceFilter) -> Self {
        Self {
            enumerator,
            filter,
            seen: SeenDevices::default(),
        }
    }

    pub fn scan(&mut self) -> Result<Vec<HotplugEvent>, DeviceError> {
        let matching: Vec<_> = self
            .enumerator
            .enumerate()?
            .into_iter()
            .filter(|d| self.filter.matches(&d.path))
            .collect();
        Ok(self.seen.update(matching))
    }
}

/// Background thread running a [`Scanner`] on an interval.
pub struct HotplugMonitor {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl HotplugMonitor {
    pub fn spawn(
        mut scanner: Scanner,
        interval: Duration,
        events: Sender<HotplugEvent>,
    ) -> Result<Self, BridgeError> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        info!(filter = %scanner.filter.needle, ?interval, "starting hotplug monitor");

        let thread = thread::Builder::new()
            .name("hotplug-monitor".into())
            .spawn(move || loop {
                match scanner.scan() {
                    Ok(changes) => {
                        for event in changes {
                            debug!(?event, "hotplug");
                            if events.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "device scan failed"),
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => return,
                }
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Stop polling and wait for the thread. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
            info!("stopping hotplug monitor");
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("hotplug monitor panicked");
            }
        }
    }
}

impl Drop for HotplugMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
