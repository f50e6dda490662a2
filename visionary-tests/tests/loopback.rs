use std::time::Duration;

use visionary_client::{Camera, Error, channels::Channels, control::Control};
use visionary_protocol::{AccessMode, Reply};
use visionary_tests::{Emulator, LOCALHOST};

const TIMEOUT: Duration = Duration::from_secs(2);

fn connect(emulator: &Emulator) -> Control {
    Control::connect(emulator.control_addr(), TIMEOUT, Some(TIMEOUT)).unwrap()
}

#[test]
fn control_session_starts_in_run_mode() {
    let emulator = Emulator::spawn(4, 4).unwrap();
    let mut control = connect(&emulator);
    assert_eq!(control.access_mode(), AccessMode::Run);
    assert_eq!(control.integration_time_us().unwrap(), 1000);
    assert_eq!(control.modulation_frequency().unwrap(), 0);
    control.close().unwrap();
}

#[test]
fn setters_raise_access_mode() {
    let emulator = Emulator::spawn(4, 4).unwrap();
    let mut control = connect(&emulator);

    control.set_modulation_frequency(2).unwrap();
    assert_eq!(control.access_mode(), AccessMode::AuthorizedClient);
    control.set_integration_time_us(2500).unwrap();
    assert_eq!(control.access_mode(), AccessMode::Service);

    assert_eq!(control.integration_time_us().unwrap(), 2500);
    assert_eq!(
        emulator.server.device().variable("modulationFrequency"),
        Some(2)
    );
    // The mode is never lowered
    control.set_access_mode(AccessMode::Operator).unwrap();
    assert_eq!(control.query_access_mode().unwrap(), AccessMode::Service);
}

#[test]
fn write_without_access_is_rejected() {
    let emulator = Emulator::spawn(4, 4).unwrap();
    let mut control = connect(&emulator);
    match control.write_int("integrationTimeUs", 10) {
        Err(Error::Rejected { action, reply }) => {
            assert_eq!(action, "write variable integrationTimeUs");
            assert_eq!(reply, Reply::Error { code: 0x000A });
        }
        other => panic!("expected Rejected, got {:?}", other),
    }
    assert_eq!(
        emulator.server.device().variable("integrationTimeUs"),
        Some(1000)
    );
}

#[test]
fn unknown_variable_is_rejected() {
    let emulator = Emulator::spawn(4, 4).unwrap();
    let mut control = connect(&emulator);
    let err = control.read_int("serialNumber").unwrap_err();
    assert_eq!(
        err.to_string(),
        "Failed to read variable serialNumber: device answered 'sFA 0003'"
    );
}

#[test]
fn streaming_requires_blob_client_config() {
    let emulator = Emulator::spawn(4, 4).unwrap();
    let mut control = connect(&emulator);
    assert!(matches!(
        control.start_stream(),
        Err(Error::StreamNotInitialized)
    ));
    assert!(!emulator.server.is_playing());
    control.init_stream().unwrap();
    control.start_stream().unwrap();
    assert!(emulator.server.is_playing());
    control.close().unwrap();
    assert!(!emulator.server.is_playing());
}

#[test]
fn camera_delivers_increasing_frames() {
    let emulator = Emulator::spawn(16, 12).unwrap();
    let mut camera = Camera::connect(LOCALHOST, emulator.client_config(TIMEOUT)).unwrap();
    assert!(emulator.server.is_playing());

    let mut last = None;
    for _ in 0..3 {
        let frame = camera.next_frame().unwrap();
        assert_eq!(frame.width(), 16);
        assert_eq!(frame.height(), 12);
        let n = frame.frame_number();
        assert_eq!(frame.distance().get(0, 0), Some(500 + (n % 1000) as u16));
        assert_eq!(frame.distance().get(3, 2), Some(500 + ((n + 5) % 1000) as u16));
        if let Some(previous) = last {
            assert!(n > previous);
        }
        last = Some(n);

        let channels = Channels::decode(frame);
        assert_eq!(channels.confidence.len(), 16 * 12);
        assert!(channels.confidence.iter().all(|c| *c == 0xFFFF));
    }

    camera.disconnect().unwrap();
    assert!(!emulator.server.is_playing());
}

#[test]
fn acquisition_gives_up_when_stream_stops() {
    let emulator = Emulator::spawn(4, 4).unwrap();
    let timeout = Duration::from_millis(200);
    let mut camera = Camera::connect(LOCALHOST, emulator.client_config(timeout)).unwrap();
    camera.next_frame().unwrap();

    let mut other = connect(&emulator);
    other.init_stream().unwrap();
    other.stop_stream().unwrap();

    let err = loop {
        match camera.next_frame() {
            Ok(_) => continue,
            Err(err) => break err,
        }
    };
    match err {
        Error::AcquisitionFailed { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, Error::Io(_)));
        }
        other => panic!("expected AcquisitionFailed, got {:?}", other),
    }
    assert!(matches!(camera.next_frame(), Err(Error::Disconnected)));
    camera.disconnect().unwrap();
}
