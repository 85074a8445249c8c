//! Per-device bridge.
//!
//! A [`DeviceBridge`] owns one physical device connection and one virtual pad
//! for its whole life. Once started it runs on two threads:
//!
//! - the **worker** opens the device, connects the pad, then loops
//!   read → [`decode`] → submit until cancelled or the device fails
//! - the **relay** handles everything time- or callback-driven: feedback
//!   writes coming from the pad, the rumble watchdog, and the guide-button
//!   pulse release
//!
//! ## State machine
//! `Created → Opening → Running → Stopping → Ended`. The only skip is
//! `Opening → Ended` when the device (or the pad) cannot be opened; in that
//! case no `Started` event is ever raised.
//!
//! ## Events
//! Exactly one [`BridgeEvent::Ended`] is emitted per started bridge, including
//! when the worker panics. `clean` tells whether [`DeviceBridge::stop`] asked
//! for it.
//!
//! ## Locking
//! - all device writes go through one mutex that also holds the open handle;
//!   a write after close is skipped, not an error
//! - frame assembly and submit happen under one per-bridge pad mutex, so the
//!   pad never sees half a frame

use crate::config::BridgeTiming;
use crate::device::{DeviceDescriptor, HidHandle, HidOpener, ReadStatus, ShareMode};
use crate::error::{BridgeError, DeviceError, SinkError};
use crate::report::{
    decode, encode_feedback, split_report, ControllerState, FeedbackCommand, FEEDBACK_RESET,
};
use crate::sink::{PadFrame, VirtualPad};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, info_span, trace, warn};

/// Registry-assigned identity of one bridge instance.
///
/// Paths are reused across replugs; ids are not.
pub type BridgeId = u64;

/// Read buffer size. Larger than any report the supported pads send.
const READ_BUF_LEN: usize = 64;

/// LED index before the consumer assigned one.
const LED_UNASSIGNED: u8 = 0xFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgeState {
    Created,
    Opening,
    Running,
    Stopping,
    Ended,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgeState::Created => "created",
            BridgeState::Opening => "opening",
            BridgeState::Running => "running",
            BridgeState::Stopping => "stopping",
            BridgeState::Ended => "ended",
        };
        f.write_str(s)
    }
}

/// Lifecycle notifications sent to the owner of a bridge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeEvent {
    Started { id: BridgeId, path: String },
    Ended { id: BridgeId, path: String, clean: bool },
}

impl BridgeEvent {
    pub fn id(&self) -> BridgeId {
        match self {
            BridgeEvent::Started { id, .. } | BridgeEvent::Ended { id, .. } => *id,
        }
    }
}

/// Open handle + write lock.
struct DeviceSlot {
    handle: Mutex<Option<Arc<dyn HidHandle>>>,
}

impl DeviceSlot {
    fn new() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }

    fn install(&self, handle: Arc<dyn HidHandle>) {
        *self.handle.lock() = Some(handle);
    }

    /// Write a feature report. `Ok(false)` means the device is closed and the
    /// write was skipped.
    fn write(&self, data: &[u8]) -> Result<bool, DeviceError> {
        let guard = self.handle.lock();
        match guard.as_ref() {
            Some(handle) => handle.send_feature_report(data).map(|()| true),
            None => Ok(false),
        }
    }

    #[cfg(test)]
    fn is_open(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Drop our reference. Waits for an in-flight write to finish.
    fn close(&self) {
        self.handle.lock().take();
    }
}

struct Shared {
    id: BridgeId,
    descriptor: DeviceDescriptor,
    state: Mutex<BridgeState>,
    cancel: AtomicBool,
    ended: AtomicBool,
    access: Mutex<Option<ShareMode>>,
    battery: AtomicU8,
    led: AtomicU8,
    device: DeviceSlot,
    events: Sender<BridgeEvent>,
}

impl Shared {
    fn set_state(&self, next: BridgeState) {
        let mut state = self.state.lock();
        debug!(from = %*state, to = %next, "bridge state");
        *state = next;
    }

    fn emit(&self, event: BridgeEvent) {
        if self.events.send(event).is_err() {
            trace!("bridge event dropped, owner gone");
        }
    }

    fn path(&self) -> String {
        self.descriptor.path.clone()
    }

    /// Close everything and raise `Ended` once.
    fn finish(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.device.close();
        self.set_state(BridgeState::Ended);
        let clean = self.cancel.load(Ordering::SeqCst);
        info!(clean, "bridge ended");
        self.emit(BridgeEvent::Ended {
            id: self.id,
            path: self.path(),
            clean,
        });
    }
}

/// Raises `Ended` when the worker returns or unwinds.
struct EndGuard<'a>(&'a Shared);

impl Drop for EndGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("bridge worker panicked");
        }
        self.0.finish();
    }
}

/// Pending frame + pad, locked together.
struct PadSlot {
    pad: Box<dyn VirtualPad>,
    frame: PadFrame,
}

impl PadSlot {
    fn submit(&mut self) {
        let frame = self.frame;
        if let Err(e) = self.pad.submit(&frame) {
            warn!(error = %e, "frame submit failed");
        }
    }
}

enum RelayMsg {
    Feedback(FeedbackCommand),
    GuidePressed(Instant),
    Shutdown,
}

/// One bridge instance. See the module docs.
pub struct DeviceBridge {
    shared: Arc<Shared>,
    opener: Arc<dyn HidOpener>,
    pad: Option<Box<dyn VirtualPad>>,
    timing: BridgeTiming,
    worker: Option<JoinHandle<()>>,
}

impl DeviceBridge {
    pub fn new(
        id: BridgeId,
        descriptor: DeviceDescriptor,
        opener: Arc<dyn HidOpener>,
        pad: Box<dyn VirtualPad>,
        timing: BridgeTiming,
        events: Sender<BridgeEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                descriptor,
                state: Mutex::new(BridgeState::Created),
                cancel: AtomicBool::new(false),
                ended: AtomicBool::new(false),
                access: Mutex::new(None),
                battery: AtomicU8::new(0),
                led: AtomicU8::new(LED_UNASSIGNED),
                device: DeviceSlot::new(),
                events,
            }),
            opener,
            pad: Some(pad),
            timing,
            worker: None,
        }
    }

    pub fn id(&self) -> BridgeId {
        self.shared.id
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.shared.descriptor
    }

    pub fn path(&self) -> &str {
        &self.shared.descriptor.path
    }

    pub fn state(&self) -> BridgeState {
        *self.shared.state.lock()
    }

    /// Which share mode the open succeeded with, once it did.
    pub fn access_mode(&self) -> Option<ShareMode> {
        *self.shared.access.lock()
    }

    pub fn is_exclusive(&self) -> bool {
        self.access_mode() == Some(ShareMode::Exclusive)
    }

    /// Battery byte from the most recent report.
    pub fn battery_level(&self) -> u8 {
        self.shared.battery.load(Ordering::Relaxed)
    }

    /// LED index last requested by the consumer, `0xFF` until then.
    pub fn led_index(&self) -> u8 {
        self.shared.led.load(Ordering::Relaxed)
    }

    /// `true` while the worker thread is alive.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state(),
            BridgeState::Opening | BridgeState::Running | BridgeState::Stopping
        )
    }

    /// `true` once [`stop`](Self::stop) has been requested.
    pub fn clean_end(&self) -> bool {
        self.shared.cancel.load(Ordering::SeqCst)
    }

    /// Spawn the worker. Transitions to `Opening`.
    pub fn start(&mut self) -> Result<(), BridgeError> {
        let pad = self.pad.take().ok_or(BridgeError::AlreadyStarted)?;
        self.shared.set_state(BridgeState::Opening);

        let shared = Arc::clone(&self.shared);
        let opener = Arc::clone(&self.opener);
        let timing = self.timing;
        let spawned = thread::Builder::new()
            .name(format!("bridge-{}", self.shared.id))
            .spawn(move || run_worker(shared, opener.as_ref(), pad, timing));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                error!(path = %self.path(), error = %e, "cannot spawn bridge worker");
                self.shared.finish();
                Err(e.into())
            }
        }
    }

    /// Request cancellation and wait for the worker to exit.
    ///
    /// Idempotent. After this returns the bridge performs no further device I/O.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if !self.shared.cancel.swap(true, Ordering::SeqCst) {
            info!(path = %self.path(), "stopping bridge");
        }
        if worker.join().is_err() {
            warn!(path = %self.path(), "bridge worker exited by panic");
        }
    }

    /// Stop (if needed) and release everything.
    pub fn dispose(mut self) {
        self.stop();
    }
}

impl Drop for DeviceBridge {
    fn drop(&mut self) {
        self.stop();
        self.shared.device.close();
    }
}

impl fmt::Debug for DeviceBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBridge")
            .field("id", &self.shared.id)
            .field("path", &self.shared.descriptor.path)
            .field("state", &self.state())
            .field("access", &self.access_mode())
            .finish()
    }
}

fn run_worker(
    shared: Arc<Shared>,
    opener: &dyn HidOpener,
    pad: Box<dyn VirtualPad>,
    timing: BridgeTiming,
) {
    let span = info_span!("bridge", id = shared.id, path = %shared.descriptor.path);
    let _entered = span.enter();
    let _end = EndGuard(&shared);

    let Some(handle) = open_device(&shared, opener) else {
        return;
    };
    shared.device.install(Arc::clone(&handle));

    match shared.device.write(&FEEDBACK_RESET) {
        Ok(_) => debug!("rumble reset"),
        Err(e) => warn!(error = %e, "initial rumble reset failed"),
    }

    let session = match Session::begin(&shared, pad, timing) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "cannot connect virtual pad");
            return;
        }
    };

    shared.set_state(BridgeState::Running);
    info!(mode = ?shared.access.lock().as_ref(), "bridge running");
    shared.emit(BridgeEvent::Started {
        id: shared.id,
        path: shared.path(),
    });

    read_loop(&shared, handle.as_ref(), &session, timing);

    shared.set_state(BridgeState::Stopping);
    session.end();
    shared.device.close();
}

/// Exclusive first, shared as fallback.
fn open_device(shared: &Shared, opener: &dyn HidOpener) -> Option<Arc<dyn HidHandle>> {
    let path = shared.descriptor.path.as_str();
    let (handle, mode) = match opener.open(path, ShareMode::Exclusive) {
        Ok(h) => (h, ShareMode::Exclusive),
        Err(e) => {
            info!(error = %e, "exclusive open failed, retrying shared");
            match opener.open(path, ShareMode::Shared) {
                Ok(h) => (h, ShareMode::Shared),
                Err(e) => {
                    error!(error = %e, "cannot open device");
                    return None;
                }
            }
        }
    };
    *shared.access.lock() = Some(mode);
    Some(Arc::from(handle))
}

fn read_loop(shared: &Shared, handle: &dyn HidHandle, session: &Session, timing: BridgeTiming) {
    let mut buf = [0u8; READ_BUF_LEN];

    while !shared.cancel.load(Ordering::SeqCst) {
        match handle.read_timeout(&mut buf, timing.read_timeout) {
            Ok(ReadStatus::TimedOut) => continue,
            Ok(ReadStatus::Data(n)) => {
                let Some(report) = buf.get(..n).and_then(split_report) else {
                    debug!(len = n, "ignoring unexpected report length");
                    continue;
                };
                let state = decode(report);
                shared.battery.store(state.battery, Ordering::Relaxed);
                session.publish(&state);
            }
            Err(DeviceError::Closed) => {
                info!("device closed");
                break;
            }
            Err(e) => {
                error!(error = %e, "device read failed");
                break;
            }
        }
    }
}

/// Connected pad + running relay.
struct Session {
    pad: Arc<Mutex<PadSlot>>,
    relay_tx: Sender<RelayMsg>,
    relay: Option<JoinHandle<()>>,
}

impl Session {
    fn begin(
        shared: &Arc<Shared>,
        mut pad: Box<dyn VirtualPad>,
        timing: BridgeTiming,
    ) -> Result<Self, BridgeError> {
        let (relay_tx, relay_rx) = channel::unbounded();

        let feedback_tx = relay_tx.clone();
        pad.set_feedback_handler(Arc::new(move |cmd| {
            // fails only after the relay is gone, i.e. during teardown
            let _ = feedback_tx.send(RelayMsg::Feedback(cmd));
        }));
        connect_pad(pad.as_mut())?;

        let pad = Arc::new(Mutex::new(PadSlot {
            pad,
            frame: PadFrame::default(),
        }));

        let relay = Relay {
            shared: Arc::clone(shared),
            pad: Arc::clone(&pad),
            rx: relay_rx,
            timing,
        };
        let spawned = thread::Builder::new()
            .name(format!("relay-{}", shared.id))
            .spawn(move || relay.run());

        match spawned {
            Ok(handle) => Ok(Self {
                pad,
                relay_tx,
                relay: Some(handle),
            }),
            Err(e) => {
                if let Err(e) = pad.lock().pad.disconnect() {
                    warn!(error = %e, "virtual pad disconnect failed");
                }
                Err(e.into())
            }
        }
    }

    /// Apply a decoded report and submit the frame.
    fn publish(&self, state: &ControllerState) {
        let mut slot = self.pad.lock();
        slot.frame.apply(state);
        if state.guide {
            slot.frame.set_guide(true);
            let _ = self.relay_tx.send(RelayMsg::GuidePressed(Instant::now()));
        }
        slot.submit();
    }

    fn end(mut self) {
        let _ = self.relay_tx.send(RelayMsg::Shutdown);
        if let Some(relay) = self.relay.take() {
            if relay.join().is_err() {
                warn!("relay thread panicked");
            }
        }
        if let Err(e) = self.pad.lock().pad.disconnect() {
            warn!(error = %e, "virtual pad disconnect failed");
        }
    }
}

/// Connect, retrying once after a stale `AlreadyConnected`.
fn connect_pad(pad: &mut dyn VirtualPad) -> Result<(), SinkError> {
    match pad.connect() {
        Err(SinkError::AlreadyConnected) => {
            info!("virtual pad already connected, reconnecting");
            if let Err(e) = pad.disconnect() {
                debug!(error = %e, "disconnect before reconnect failed");
            }
            pad.connect()
        }
        other => other,
    }
}

/// Feedback writes, rumble watchdog and guide release for one bridge.
struct Relay {
    shared: Arc<Shared>,
    pad: Arc<Mutex<PadSlot>>,
    rx: Receiver<RelayMsg>,
    timing: BridgeTiming,
}

impl Relay {
    fn run(self) {
        let span = info_span!("relay", id = self.shared.id);
        let _entered = span.enter();

        let mut guide_release: Option<Instant> = None;
        let mut rumble_reset: Option<Instant> = None;

        loop {
            let next = [guide_release, rumble_reset].into_iter().flatten().min();
            let msg = match next {
                Some(deadline) => self.rx.recv_deadline(deadline),
                None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match msg {
                Ok(RelayMsg::Feedback(cmd)) => {
                    if self.feedback(&cmd) {
                        rumble_reset = if cmd.is_stop() {
                            None
                        } else {
                            Some(Instant::now() + self.timing.rumble_timeout)
                        };
                    }
                }
                Ok(RelayMsg::GuidePressed(at)) => {
                    guide_release = Some(at + self.timing.guide_pulse);
                }
                Ok(RelayMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            let now = Instant::now();
            if guide_release.is_some_and(|d| d <= now) {
                guide_release = None;
                self.release_guide();
            }
            if rumble_reset.is_some_and(|d| d <= now) {
                rumble_reset = None;
                self.reset_rumble();
            }
        }
    }

    /// Forward one command to the device. Returns `false` if it was skipped
    /// because the device is closed.
    fn feedback(&self, cmd: &FeedbackCommand) -> bool {
        let previous = self.shared.led.swap(cmd.led_index, Ordering::Relaxed);
        if previous != cmd.led_index {
            info!(led = cmd.led_index, "virtual pad LED assigned");
        }

        match self.shared.device.write(&encode_feedback(cmd)) {
            Ok(true) => {
                trace!(small = cmd.small_motor, large = cmd.large_motor, "rumble");
                true
            }
            Ok(false) => {
                debug!("feedback skipped, device closed");
                false
            }
            Err(e) => {
                warn!(error = %e, "feedback write failed");
                true
            }
        }
    }

    fn reset_rumble(&self) {
        match self.shared.device.write(&FEEDBACK_RESET) {
            Ok(true) => debug!("rumble watchdog reset motors"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "rumble watchdog write failed"),
        }
    }

    fn release_guide(&self) {
        let mut slot = self.pad.lock();
        if slot.frame.guide() {
            slot.frame.set_guide(false);
            slot.submit();
        }
    }
}
