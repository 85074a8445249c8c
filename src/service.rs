//! Running service: monitor thread + hub thread.
//!
//! The hub owns the [`Registry`] and multiplexes three inputs with
//! `crossbeam::select!`: hotplug events from the monitor, lifecycle events from
//! bridges, and the shutdown signal. Every [`Notification`] therefore comes
//! from the hub thread, in the order the hub handled its inputs.

use crate::config::Config;
use crate::device::{DeviceEnumerator, HidOpener};
use crate::error::BridgeError;
use crate::monitor::{DeviceFilter, HotplugEvent, HotplugMonitor, Scanner};
use crate::registry::{Notification, Registry};
use crate::sink::PadFactory;
use crate::visibility::VisibilityControl;
use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

pub struct BridgeService {
    monitor: Option<HotplugMonitor>,
    stop_tx: Option<Sender<()>>,
    hub: Option<JoinHandle<()>>,
}

impl BridgeService {
    /// Start monitoring and bridging.
    ///
    /// The returned receiver gets every [`Notification`]; dropping it is fine,
    /// notifications are then discarded.
    pub fn spawn(
        config: &Config,
        enumerator: Box<dyn DeviceEnumerator>,
        opener: Arc<dyn HidOpener>,
        pads: Arc<dyn PadFactory>,
        visibility: Arc<dyn VisibilityControl>,
    ) -> Result<(Self, Receiver<Notification>), BridgeError> {
        let (notify_tx, notify_rx) = channel::unbounded();
        let (hotplug_tx, hotplug_rx) = channel::unbounded();
        let (stop_tx, stop_rx) = channel::bounded(1);

        let registry = Registry::new(config, opener, pads, visibility, notify_tx);
        let hub = thread::Builder::new()
            .name("bridge-hub".into())
            .spawn(move || run_hub(registry, hotplug_rx, stop_rx))?;

        let scanner = Scanner::new(enumerator, DeviceFilter::new(&config.hardware_filter));
        let monitor = match HotplugMonitor::spawn(scanner, config.scan_interval(), hotplug_tx) {
            Ok(m) => m,
            Err(e) => {
                let _ = stop_tx.send(());
                let _ = hub.join();
                return Err(e);
            }
        };

        info!("bridge service started");
        Ok((
            Self {
                monitor: Some(monitor),
                stop_tx: Some(stop_tx),
                hub: Some(hub),
            },
            notify_rx,
        ))
    }

    /// Stop the monitor, then every bridge. Idempotent; blocks until done.
    pub fn shutdown(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(hub) = self.hub.take() {
            if hub.join().is_err() {
                warn!("bridge hub panicked");
            }
            info!("bridge service stopped");
        }
    }
}

impl Drop for BridgeService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_hub(mut registry: Registry, hotplug: Receiver<HotplugEvent>, stop: Receiver<()>) {
    let lifecycle = registry.lifecycle().clone();
    let never = channel::never();
    let mut hotplug = Some(hotplug);

    loop {
        let mut monitor_gone = false;
        let hotplug_rx = hotplug.as_ref().unwrap_or(&never);
        select! {
            recv(hotplug_rx) -> msg => match msg {
                Ok(event) => registry.handle_hotplug(event),
                Err(_) => monitor_gone = true,
            },
            recv(lifecycle) -> msg => {
                if let Ok(event) = msg {
                    registry.handle_bridge_event(event);
                }
            },
            recv(stop) -> _ => break,
        }
        if monitor_gone {
            debug!("hotplug monitor gone");
            hotplug = None;
        }
    }

    registry.shutdown();
}
