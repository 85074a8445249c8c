//! In-memory fakes for the device, pad and visibility seams.

#![allow(dead_code)]

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use padbridge::report::REPORT_LEN;
use padbridge::{
    BridgeTiming, DeviceDescriptor, DeviceEnumerator, DeviceError, FeedbackCommand,
    FeedbackHandler, HidHandle, HidOpener, PadFactory, PadFrame, ReadStatus, ShareMode, SinkError,
    VirtualPad, VisibilityControl, VisibilityError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const PAD_PATH: &str = r"\\?\hid#vid_2717&pid_3144&mi_00#7&2a3b4c5d&0&0000#{4d1e55b2-f16f-11cf-88cb-001111000030}";

/// Short timings so tests finish quickly.
pub fn fast_timing() -> BridgeTiming {
    BridgeTiming {
        read_timeout: Duration::from_millis(20),
        guide_pulse: Duration::from_millis(100),
        rumble_timeout: Duration::from_millis(200),
    }
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// A 20-byte report with neutral sticks and hat, edited by `f`.
pub fn report(f: impl FnOnce(&mut [u8; REPORT_LEN])) -> [u8; REPORT_LEN] {
    let mut r = [0u8; REPORT_LEN];
    r[3] = 0x0F;
    r[4..8].copy_from_slice(&[0x80; 4]);
    f(&mut r);
    r
}

enum ReadStep {
    Report(Vec<u8>),
    Fail(DeviceError),
}

/// Test-side controls of one fake physical device.
#[derive(Clone)]
pub struct FakeDevice {
    tx: Sender<ReadStep>,
    rx: Receiver<ReadStep>,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FakeDevice {
    fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            tx,
            rx,
            writes: Arc::default(),
        }
    }

    /// Queue a report read, prefixed with a report-ID byte like the OS does.
    pub fn push_report(&self, report: [u8; REPORT_LEN]) {
        let mut raw = vec![0u8];
        raw.extend_from_slice(&report);
        let _ = self.tx.send(ReadStep::Report(raw));
    }

    pub fn push_raw(&self, raw: &[u8]) {
        let _ = self.tx.send(ReadStep::Report(raw.to_vec()));
    }

    pub fn push_error(&self, e: DeviceError) {
        let _ = self.tx.send(ReadStep::Fail(e));
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }
}

struct FakeHandle {
    device: FakeDevice,
}

impl HidHandle for FakeHandle {
    fn read_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<ReadStatus, DeviceError> {
        match self.device.rx.recv_timeout(timeout) {
            Ok(ReadStep::Report(raw)) => {
                let n = raw.len().min(buf.len());
                buf[..n].copy_from_slice(&raw[..n]);
                Ok(ReadStatus::Data(n))
            }
            Ok(ReadStep::Fail(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(ReadStatus::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Err(DeviceError::Closed),
        }
    }

    fn send_feature_report(&self, data: &[u8]) -> Result<(), DeviceError> {
        self.device.writes.lock().push(data.to_vec());
        Ok(())
    }
}

/// Opens [`FakeDevice`]s by path, optionally refusing a share mode.
#[derive(Default)]
pub struct FakeOpener {
    devices: Mutex<HashMap<String, FakeDevice>>,
    opens: Mutex<Vec<ShareMode>>,
    pub refuse_exclusive: AtomicBool,
    pub refuse_shared: AtomicBool,
}

impl FakeOpener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Device behind `path`, created on first use.
    pub fn device(&self, path: &str) -> FakeDevice {
        self.devices
            .lock()
            .entry(path.to_string())
            .or_insert_with(FakeDevice::new)
            .clone()
    }

    pub fn refuse(&self, exclusive: bool, shared: bool) {
        self.refuse_exclusive.store(exclusive, Ordering::SeqCst);
        self.refuse_shared.store(shared, Ordering::SeqCst);
    }

    /// Share modes requested so far, successful or not.
    pub fn opens(&self) -> Vec<ShareMode> {
        self.opens.lock().clone()
    }
}

impl HidOpener for FakeOpener {
    fn open(&self, path: &str, mode: ShareMode) -> Result<Box<dyn HidHandle>, DeviceError> {
        self.opens.lock().push(mode);
        let refused = match mode {
            ShareMode::Exclusive => self.refuse_exclusive.load(Ordering::SeqCst),
            ShareMode::Shared => self.refuse_shared.load(Ordering::SeqCst),
        };
        if refused {
            return Err(DeviceError::Open {
                path: path.to_string(),
                reason: format!("{mode} access denied"),
            });
        }
        Ok(Box::new(FakeHandle {
            device: self.device(path),
        }))
    }
}

#[derive(Default)]
struct PadLog {
    frames: Vec<PadFrame>,
    connects: usize,
    disconnects: usize,
    handler: Option<FeedbackHandler>,
    /// Number of upcoming connects that report `AlreadyConnected`.
    stale_connects: usize,
}

/// Test-side view of one fake virtual pad.
#[derive(Clone, Default)]
pub struct PadProbe {
    log: Arc<Mutex<PadLog>>,
}

impl PadProbe {
    pub fn frames(&self) -> Vec<PadFrame> {
        self.log.lock().frames.clone()
    }

    pub fn last_frame(&self) -> Option<PadFrame> {
        self.log.lock().frames.last().copied()
    }

    pub fn connects(&self) -> usize {
        self.log.lock().connects
    }

    pub fn disconnects(&self) -> usize {
        self.log.lock().disconnects
    }

    /// Deliver a rumble/LED command as the virtual bus would.
    pub fn feedback(&self, small: u8, large: u8, led: u8) {
        let handler = self.log.lock().handler.clone();
        if let Some(handler) = handler {
            handler(FeedbackCommand {
                small_motor: small,
                large_motor: large,
                led_index: led,
            });
        }
    }
}

pub struct FakePad {
    probe: PadProbe,
}

impl FakePad {
    /// A pad plus its probe. `stale` makes the first connect report
    /// `AlreadyConnected`.
    pub fn new(stale: bool) -> (Box<dyn VirtualPad>, PadProbe) {
        Self::with_stale_connects(usize::from(stale))
    }

    /// A pad whose every connect reports `AlreadyConnected`.
    pub fn always_stale() -> (Box<dyn VirtualPad>, PadProbe) {
        Self::with_stale_connects(usize::MAX)
    }

    fn with_stale_connects(n: usize) -> (Box<dyn VirtualPad>, PadProbe) {
        let probe = PadProbe::default();
        probe.log.lock().stale_connects = n;
        (
            Box::new(Self {
                probe: probe.clone(),
            }),
            probe,
        )
    }
}

impl VirtualPad for FakePad {
    fn connect(&mut self) -> Result<(), SinkError> {
        let mut log = self.probe.log.lock();
        log.connects += 1;
        if log.stale_connects > 0 {
            log.stale_connects -= 1;
            return Err(SinkError::AlreadyConnected);
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), SinkError> {
        self.probe.log.lock().disconnects += 1;
        Ok(())
    }

    fn submit(&mut self, frame: &PadFrame) -> Result<(), SinkError> {
        self.probe.log.lock().frames.push(*frame);
        Ok(())
    }

    fn set_feedback_handler(&mut self, handler: FeedbackHandler) {
        self.probe.log.lock().handler = Some(handler);
    }
}

/// Hands out [`FakePad`]s and keeps their probes in creation order.
#[derive(Default)]
pub struct FakePadFactory {
    probes: Mutex<Vec<PadProbe>>,
    pub fail: AtomicBool,
    /// Hand out pads that never manage to connect.
    pub stale: AtomicBool,
}

impl FakePadFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn probes(&self) -> Vec<PadProbe> {
        self.probes.lock().clone()
    }
}

impl PadFactory for FakePadFactory {
    fn create(&self) -> Result<Box<dyn VirtualPad>, SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::Bus("bus unavailable".into()));
        }
        let (pad, probe) = if self.stale.load(Ordering::SeqCst) {
            FakePad::always_stale()
        } else {
            FakePad::new(false)
        };
        self.probes.lock().push(probe);
        Ok(pad)
    }
}

/// Records every visibility request.
#[derive(Default)]
pub struct FakeVisibility {
    calls: Mutex<Vec<(String, bool)>>,
}

impl FakeVisibility {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().clone()
    }
}

impl VisibilityControl for FakeVisibility {
    fn set_hidden(&self, instance_id: &str, hidden: bool) -> Result<(), VisibilityError> {
        self.calls.lock().push((instance_id.to_string(), hidden));
        Ok(())
    }
}

/// Enumerates whatever the test put in it.
#[derive(Clone, Default)]
pub struct FakeEnumerator {
    present: Arc<Mutex<Vec<DeviceDescriptor>>>,
}

impl FakeEnumerator {
    pub fn set(&self, devices: Vec<DeviceDescriptor>) {
        *self.present.lock() = devices;
    }
}

impl DeviceEnumerator for FakeEnumerator {
    fn enumerate(&mut self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        Ok(self.present.lock().clone())
    }
}
