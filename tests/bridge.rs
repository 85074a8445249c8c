mod common;

use common::*;
use crossbeam::channel::{self, Receiver};
use padbridge::report::FEEDBACK_RESET;
use padbridge::sink::PadButtons;
use padbridge::{
    BridgeError, BridgeEvent, BridgeState, DeviceBridge, DeviceDescriptor, DeviceError, ShareMode,
    VirtualPad,
};
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);

struct Rig {
    bridge: DeviceBridge,
    events: Receiver<BridgeEvent>,
    opener: std::sync::Arc<FakeOpener>,
    device: FakeDevice,
    pad: PadProbe,
}

fn rig_with(
    (pad_box, pad): (Box<dyn VirtualPad>, PadProbe),
    configure: impl FnOnce(&FakeOpener),
) -> Rig {
    let opener = FakeOpener::new();
    configure(&*opener);
    let device = opener.device(PAD_PATH);
    let (tx, events) = channel::unbounded();
    let bridge = DeviceBridge::new(
        1,
        DeviceDescriptor::from_path(PAD_PATH),
        opener.clone(),
        pad_box,
        fast_timing(),
        tx,
    );
    Rig {
        bridge,
        events,
        opener,
        device,
        pad,
    }
}

fn rig() -> Rig {
    rig_with(FakePad::new(false), |_| {})
}

fn running() -> Rig {
    let mut rig = rig();
    rig.bridge.start().unwrap();
    let started = rig.events.recv_timeout(WAIT).unwrap();
    assert!(matches!(started, BridgeEvent::Started { id: 1, .. }));
    rig
}

#[test]
fn failed_open_ends_without_started() {
    let mut rig = rig_with(FakePad::new(false), |o| o.refuse(true, true));
    rig.bridge.start().unwrap();

    let event = rig.events.recv_timeout(WAIT).unwrap();
    assert_eq!(
        event,
        BridgeEvent::Ended {
            id: 1,
            path: PAD_PATH.into(),
            clean: false
        }
    );
    assert!(rig.events.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(rig.bridge.state(), BridgeState::Ended);
    assert_eq!(rig.bridge.access_mode(), None);
    assert_eq!(rig.opener.opens(), vec![ShareMode::Exclusive, ShareMode::Shared]);
    assert_eq!(rig.pad.connects(), 0);
    assert!(rig.device.writes().is_empty());
}

#[test]
fn exclusive_refusal_falls_back_to_shared() {
    let mut rig = rig_with(FakePad::new(false), |o| o.refuse(true, false));
    rig.bridge.start().unwrap();
    assert!(matches!(
        rig.events.recv_timeout(WAIT).unwrap(),
        BridgeEvent::Started { .. }
    ));

    assert_eq!(rig.bridge.access_mode(), Some(ShareMode::Shared));
    assert!(!rig.bridge.is_exclusive());
    assert_eq!(rig.bridge.state(), BridgeState::Running);
}

#[test]
fn start_resets_rumble_and_prefers_exclusive() {
    let rig = running();
    assert!(rig.bridge.is_exclusive());
    assert_eq!(rig.opener.opens(), vec![ShareMode::Exclusive]);
    assert_eq!(rig.device.writes(), vec![FEEDBACK_RESET.to_vec()]);
    assert_eq!(rig.pad.connects(), 1);
    assert_eq!(rig.bridge.led_index(), 0xFF);
}

#[test]
fn second_start_is_rejected() {
    let mut rig = running();
    assert!(matches!(rig.bridge.start(), Err(BridgeError::AlreadyStarted)));
}

#[test]
fn reports_become_pad_frames() {
    let rig = running();
    rig.device.push_report(report(|r| {
        r[0] = 0b0000_0001; // A
        r[3] = 2; // right
        r[4] = 0xFF;
        r[10] = 0x40;
        r[18] = 87;
    }));

    assert!(wait_until(WAIT, || rig.pad.last_frame().is_some()));
    let frame = rig.pad.last_frame().unwrap();
    assert!(frame.buttons.contains(PadButtons::A));
    assert!(frame.buttons.contains(PadButtons::RIGHT));
    assert!(!frame.buttons.contains(PadButtons::UP));
    assert!(!frame.guide());
    assert_eq!(frame.thumb_lx, i16::MAX);
    assert_eq!(frame.left_trigger, 0x40);
    assert!(wait_until(WAIT, || rig.bridge.battery_level() == 87));
}

#[test]
fn odd_length_reads_are_skipped() {
    let rig = running();
    rig.device.push_raw(&[1, 2, 3, 4, 5]);
    rig.device.push_report(report(|r| r[0] = 0b0000_0010));

    assert!(wait_until(WAIT, || rig.pad.frames().len() == 1));
    assert!(rig.pad.frames()[0].buttons.contains(PadButtons::B));
    assert_eq!(rig.bridge.state(), BridgeState::Running);
}

#[test]
fn guide_pulse_releases_without_further_reports() {
    let rig = running();
    let pressed = Instant::now();
    rig.device.push_report(report(|r| r[19] = 1));

    let guide = |on: bool| rig.pad.last_frame().is_some_and(|f| f.guide() == on);
    assert!(wait_until(WAIT, || guide(true)));
    assert!(wait_until(WAIT, || guide(false)));
    assert!(pressed.elapsed() >= fast_timing().guide_pulse);

    let frames = rig.pad.frames();
    assert_eq!(frames.len(), 2);
    assert!(frames[0].guide());
    assert!(!frames[1].guide());
}

#[test]
fn rumble_watchdog_stops_motors_after_silence() {
    let rig = running();
    let sent = Instant::now();
    rig.pad.feedback(10, 200, 1);

    let expected = vec![
        FEEDBACK_RESET.to_vec(),
        vec![0x20, 10, 200],
        FEEDBACK_RESET.to_vec(),
    ];
    assert!(wait_until(WAIT, || rig.device.writes() == expected));
    assert!(sent.elapsed() >= fast_timing().rumble_timeout);
    assert_eq!(rig.bridge.led_index(), 1);
}

#[test]
fn stop_command_disarms_watchdog() {
    let rig = running();
    rig.pad.feedback(10, 200, 0);
    rig.pad.feedback(0, 0, 0);

    let expected = vec![
        FEEDBACK_RESET.to_vec(),
        vec![0x20, 10, 200],
        vec![0x20, 0, 0],
    ];
    assert!(wait_until(WAIT, || rig.device.writes() == expected));
    thread::sleep(fast_timing().rumble_timeout * 2);
    assert_eq!(rig.device.writes(), expected);
}

#[test]
fn read_error_ends_bridge_uncleanly() {
    let rig = running();
    rig.device.push_error(DeviceError::Read("gone".into()));

    let event = rig.events.recv_timeout(WAIT).unwrap();
    assert_eq!(
        event,
        BridgeEvent::Ended {
            id: 1,
            path: PAD_PATH.into(),
            clean: false
        }
    );
    assert_eq!(rig.bridge.state(), BridgeState::Ended);
    assert!(!rig.bridge.clean_end());
    assert_eq!(rig.pad.disconnects(), 1);
}

#[test]
fn stop_is_idempotent_and_silences_device() {
    let mut rig = running();
    rig.bridge.stop();
    rig.bridge.stop();

    let event = rig.events.recv_timeout(WAIT).unwrap();
    assert!(matches!(event, BridgeEvent::Ended { clean: true, .. }));
    assert!(rig.events.recv_timeout(Duration::from_millis(50)).is_err());
    assert!(!rig.bridge.is_active());
    assert!(rig.bridge.clean_end());
    assert_eq!(rig.pad.disconnects(), 1);

    let before = rig.device.writes();
    rig.pad.feedback(50, 50, 0);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(rig.device.writes(), before);

    rig.bridge.dispose();
}

#[test]
fn stale_virtual_pad_is_reconnected_once() {
    let mut rig = rig_with(FakePad::new(true), |_| {});
    rig.bridge.start().unwrap();
    assert!(matches!(
        rig.events.recv_timeout(WAIT).unwrap(),
        BridgeEvent::Started { .. }
    ));
    assert_eq!(rig.pad.connects(), 2);
    assert_eq!(rig.pad.disconnects(), 1);
}

#[test]
fn pad_stale_after_reconnect_ends_without_started() {
    let mut rig = rig_with(FakePad::always_stale(), |_| {});
    rig.bridge.start().unwrap();

    let event = rig.events.recv_timeout(WAIT).unwrap();
    assert_eq!(
        event,
        BridgeEvent::Ended {
            id: 1,
            path: PAD_PATH.into(),
            clean: false
        }
    );
    assert!(rig.events.recv_timeout(Duration::from_millis(100)).is_err());
    assert_eq!(rig.pad.connects(), 2);
    assert_eq!(rig.bridge.state(), BridgeState::Ended);
    assert!(!rig.bridge.is_active());
    assert!(rig.pad.frames().is_empty());
    assert_eq!(rig.device.writes(), vec![FEEDBACK_RESET.to_vec()]);
}

#[test]
fn dropping_a_running_bridge_stops_it() {
    let rig = running();
    let Rig { bridge, events, .. } = rig;
    drop(bridge);
    assert!(matches!(
        events.recv_timeout(WAIT).unwrap(),
        BridgeEvent::Ended { clean: true, .. }
    ));
}
