//! Engine integration tests
//!
//! Configuration, port layout, low-latency mode and a driver running on
//! its own threads behind a backend.

mod helpers;

use approx::assert_relative_eq;
use helpers::tolerances::*;
use helpers::*;
use std::time::Duration;
use tessitura::prelude::*;
use tessitura::Error;

#[test]
fn test_invalid_config_is_refused() {
    let result = SoundDriver::builder().block_size(0).manual().build();
    assert!(matches!(
        result,
        Err(Error::Core(tessitura::core::Error::InvalidConfig(_)))
    ));

    let result = SoundDriver::builder().instruments(0, 0).manual().build();
    assert!(result.is_err());
}

#[test]
fn test_port_layout() {
    let driver = test_driver();
    let ports = driver.ports();

    // Master, monitor, three instruments, one buss.
    assert_eq!(ports.outputs(), 6);
    assert_eq!(ports.inputs(), 2);
    assert_eq!(ports.output_name(OutputPort::Master).unwrap(), "master_out");
    assert_eq!(ports.output_name(OutputPort::Monitor).unwrap(), "monitor_out");
    assert_eq!(
        ports.output_name(OutputPort::Instrument(2)).unwrap(),
        format!("instrument_{}_out", InstrumentId::synth(0).0)
    );
    assert_eq!(ports.output_name(OutputPort::Buss(0)).unwrap(), "buss_1_out");
    assert!(ports.output_name(OutputPort::Buss(1)).is_none());
    assert_eq!(
        ports.input_name(1).unwrap(),
        format!("record_{}_in", InstrumentId::audio(1).0)
    );
    assert!(ports.input_name(2).is_none());
    assert_eq!(ports.output_ports().count(), ports.outputs());
}

/// In low-latency mode the callback mixes inline, so nothing needs
/// pumping for streamed playback to be continuous.
#[test]
fn test_low_latency_mixes_in_the_callback() {
    let dir = tempfile::tempdir().unwrap();
    let driver = test_driver_with(test_config().low_latency(true));
    mono_instruments(&driver, &[(InstrumentId::audio(0), -1.0)]);

    // Small enough to be cached whole, so the file reader is not needed.
    let file = mono_file(&driver, dir.path(), 1, &vec![0.5; 4800]);
    schedule(&driver, 1, file, InstrumentId::audio(0), 0, 4800);

    driver.start_playing().unwrap();
    let mut io = driver.create_io(TEST_BLOCK_SIZE);
    let mut out = Vec::new();
    for _ in 0..100 {
        driver.process(&mut io, TEST_BLOCK_SIZE);
        out.extend_from_slice(&io.master()[0][..TEST_BLOCK_SIZE]);
    }

    for sample in &out[FADE_MARGIN..4800 - FADE_MARGIN] {
        assert_relative_eq!(*sample, 0.5, epsilon = GAIN_EPSILON);
    }
    assert_silence(&out[4800..], SILENCE_THRESHOLD);
    let failures = driver.take_failures();
    assert!(!failures.contains(&FailureCode::MixUnderrun));
    assert!(!failures.contains(&FailureCode::LowLatencyMixSkipped));
}

/// A driver on its own worker threads, called back by the silent backend.
#[test]
fn test_threaded_driver_behind_a_backend() {
    init_tracing();
    let driver = SoundDriver::builder()
        .config(test_config())
        .build()
        .unwrap();
    let mut supervisor =
        BackendSupervisor::start(driver.clone(), Box::new(NullBackend::new())).unwrap();
    assert_eq!(supervisor.backend_name(), "null");
    assert!(!supervisor.is_fallback());

    driver.start_playing().unwrap();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(supervisor.check(), BackendStatus::Running);
    assert!(driver.position() > 0);
    assert!(driver.cpu_load() >= 0.0);

    driver.stop_playing().unwrap();
    let stopped_at = driver.position();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(driver.position(), stopped_at);

    supervisor.stop();
}

#[test]
fn test_device_period_and_rate_changes() {
    let driver = test_driver();
    let mut io = driver.create_io(TEST_BLOCK_SIZE);

    driver.buffer_size_changed(&mut io, TEST_BLOCK_SIZE * 4);
    assert_eq!(io.max_frames(), TEST_BLOCK_SIZE * 4);
    assert_eq!(io.master()[0].len(), TEST_BLOCK_SIZE * 4);

    driver.start_playing().unwrap();
    driver.process(&mut io, TEST_BLOCK_SIZE * 4);
    assert_eq!(driver.position(), (TEST_BLOCK_SIZE * 4) as u64);

    assert!(driver.sample_rate_changed(TEST_SAMPLE_RATE));
    assert!(!driver.sample_rate_changed(TEST_SAMPLE_RATE / 2));
    assert!(!driver.sample_rate_changed(0));
    assert_eq!(driver.sample_rate(), TEST_SAMPLE_RATE);
}
