//! Bridge registry.
//!
//! Owns every live [`DeviceBridge`], keyed by device path. At most one bridge
//! exists per path. The registry is not thread-safe on purpose: the service
//! hub thread is its only owner, which makes it the single writer of the map
//! and the single place notifications are sent from.
//!
//! Bridges report lifecycle through a channel shared by all of them. Every
//! event carries the [`BridgeId`] it came from; an event whose id is not the
//! one currently registered for its path belongs to a bridge that was already
//! removed and is dropped.

use crate::bridge::{BridgeEvent, BridgeId, DeviceBridge};
use crate::config::{BridgeTiming, Config};
use crate::device::{DeviceDescriptor, HidOpener};
use crate::monitor::HotplugEvent;
use crate::sink::PadFactory;
use crate::visibility::VisibilityControl;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// What the consumer hears about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    /// A matching device appeared.
    Attached(DeviceDescriptor),
    /// A matching device disappeared.
    Detached(DeviceDescriptor),
    /// The bridge for this path is running.
    Started(String),
    /// The bridge for this path was torn down.
    Removed(String),
}

pub struct Registry {
    bridges: HashMap<String, DeviceBridge>,
    opener: Arc<dyn HidOpener>,
    pads: Arc<dyn PadFactory>,
    visibility: Arc<dyn VisibilityControl>,
    hide_devices: bool,
    timing: BridgeTiming,
    max_bridges: Option<usize>,
    next_id: BridgeId,
    lifecycle_tx: Sender<BridgeEvent>,
    lifecycle_rx: Receiver<BridgeEvent>,
    notify: Sender<Notification>,
}

impl Registry {
    pub fn new(
        config: &Config,
        opener: Arc<dyn HidOpener>,
        pads: Arc<dyn PadFactory>,
        visibility: Arc<dyn VisibilityControl>,
        notify: Sender<Notification>,
    ) -> Self {
        let (lifecycle_tx, lifecycle_rx) = channel::unbounded();
        Self {
            bridges: HashMap::new(),
            opener,
            pads,
            visibility,
            hide_devices: config.hide_devices,
            timing: config.timing(),
            max_bridges: config.max_bridges,
            next_id: 1,
            lifecycle_tx,
            lifecycle_rx,
            notify,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.bridges.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&DeviceBridge> {
        self.bridges.get(path)
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.bridges.keys().map(String::as_str)
    }

    /// Lifecycle events of every bridge this registry started.
    ///
    /// Feed each one to [`handle_bridge_event`](Self::handle_bridge_event).
    pub fn lifecycle(&self) -> &Receiver<BridgeEvent> {
        &self.lifecycle_rx
    }

    /// Create, hide, register and start a bridge for `descriptor`.
    ///
    /// Returns `false` (and does nothing) if the path is already bridged, the
    /// bridge cap is reached, or no virtual pad could be created.
    pub fn add_and_start(&mut self, descriptor: &DeviceDescriptor) -> bool {
        let path = descriptor.path.as_str();
        if self.contains(path) {
            debug!(path, "already bridged");
            return false;
        }
        if let Some(max) = self.max_bridges {
            if self.bridges.len() >= max {
                warn!(path, max, "bridge limit reached, ignoring device");
                return false;
            }
        }

        let pad = match self.pads.create() {
            Ok(pad) => pad,
            Err(e) => {
                error!(path, error = %e, "cannot create virtual pad");
                return false;
            }
        };

        let id = self.next_id;
        self.next_id += 1;
        let bridge = DeviceBridge::new(
            id,
            descriptor.clone(),
            Arc::clone(&self.opener),
            pad,
            self.timing,
            self.lifecycle_tx.clone(),
        );

        self.set_hidden(descriptor, true);
        let bridge = self.bridges.entry(descriptor.path.clone()).or_insert(bridge);

        if let Err(e) = bridge.start() {
            error!(path, error = %e, "cannot start bridge");
            if let Some(bridge) = self.bridges.remove(path) {
                bridge.dispose();
            }
            self.set_hidden(descriptor, false);
            return false;
        }

        info!(path, id, "bridge added");
        true
    }

    /// Stop and drop the bridge for `path`, then notify [`Notification::Removed`].
    ///
    /// Unknown paths are ignored without a notification. Blocks until the
    /// bridge's worker has exited.
    pub fn stop_and_remove(&mut self, path: &str) -> bool {
        // out of the map first: later events from this bridge are now stale
        let Some(mut bridge) = self.bridges.remove(path) else {
            trace!(path, "nothing to remove");
            return false;
        };

        bridge.stop();
        let descriptor = bridge.descriptor().clone();
        self.set_hidden(&descriptor, false);
        bridge.dispose();

        info!(path, "bridge removed");
        self.send(Notification::Removed(descriptor.path));
        true
    }

    /// Route one lifecycle event.
    ///
    /// An unclean end is treated like the device leaving.
    pub fn handle_bridge_event(&mut self, event: BridgeEvent) {
        let registered = self
            .bridges
            .get(event_path(&event))
            .is_some_and(|b| b.id() == event.id());
        if !registered {
            trace!(?event, "event from unregistered bridge");
            return;
        }

        match event {
            BridgeEvent::Started { path, .. } => self.send(Notification::Started(path)),
            BridgeEvent::Ended { clean: true, .. } => {}
            BridgeEvent::Ended { path, .. } => {
                warn!(path = %path, "bridge ended unexpectedly");
                self.stop_and_remove(&path);
            }
        }
    }

    pub fn handle_hotplug(&mut self, event: HotplugEvent) {
        match event {
            HotplugEvent::Attached(descriptor) => {
                info!(path = %descriptor.path, "device attached");
                self.send(Notification::Attached(descriptor.clone()));
                self.add_and_start(&descriptor);
            }
            HotplugEvent::Detached(descriptor) => {
                info!(path = %descriptor.path, "device detached");
                self.send(Notification::Detached(descriptor.clone()));
                self.stop_and_remove(&descriptor.path);
            }
        }
    }

    /// Wait up to `timeout` for one lifecycle event and handle it.
    ///
    /// Returns `false` if nothing arrived.
    pub fn dispatch_next(&mut self, timeout: Duration) -> bool {
        match self.lifecycle_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_bridge_event(event);
                true
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Stop and remove every bridge.
    pub fn shutdown(&mut self) {
        let paths: Vec<String> = self.bridges.keys().cloned().collect();
        if !paths.is_empty() {
            info!(count = paths.len(), "stopping all bridges");
        }
        for path in paths {
            self.stop_and_remove(&path);
        }
    }

    fn set_hidden(&self, descriptor: &DeviceDescriptor, hidden: bool) {
        if !self.hide_devices {
            return;
        }
        if let Err(e) = self.visibility.set_hidden(&descriptor.instance_id, hidden) {
            warn!(error = %e, hidden, "cannot change device visibility");
        }
    }

    fn send(&self, notification: Notification) {
        if self.notify.send(notification).is_err() {
            trace!("notification dropped, consumer gone");
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn event_path(event: &BridgeEvent) -> &str {
    match event {
        BridgeEvent::Started { path, .. } | BridgeEvent::Ended { path, .. } => path,
    }
}
