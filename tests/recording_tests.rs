//! Recording integration tests
//!
//! Record inputs through the callback and the file writer to WAV files on
//! disk, and the notifications that follow.

mod helpers;

use approx::assert_relative_eq;
use helpers::tolerances::*;
use helpers::*;
use tessitura::prelude::*;
use tessitura::Error;

#[test]
fn test_record_while_rolling() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("take.wav");
    let driver = test_driver();
    let take = AudioFileId(50);

    driver
        .open_record_file(InstrumentId::audio(0), take, &path)
        .unwrap();
    assert!(driver.is_recording());

    let sine = generate_sine(440.0, TEST_BLOCK_SIZE * 100);
    let mut io = driver.create_io(TEST_BLOCK_SIZE);
    let feed = |io: &mut tessitura::DriverIo, period: usize| {
        let block = &sine[period * TEST_BLOCK_SIZE..(period + 1) * TEST_BLOCK_SIZE];
        let [left, right] = io.input_mut(0).unwrap();
        left[..TEST_BLOCK_SIZE].copy_from_slice(block);
        for (r, s) in right.iter_mut().zip(block) {
            *r = -s;
        }
    };

    // Nothing is taken while stopped.
    for period in 0..10 {
        feed(&mut io, period);
        driver.process(&mut io, TEST_BLOCK_SIZE);
        driver.pump();
    }

    driver.start_playing().unwrap();
    for period in 0..100 {
        feed(&mut io, period);
        driver.process(&mut io, TEST_BLOCK_SIZE);
        // Inputs are monitored as they arrive.
        let [monitor, _] = io.output(OutputPort::Monitor).unwrap();
        assert_eq!(monitor[..TEST_BLOCK_SIZE], io.input(0).unwrap()[0][..TEST_BLOCK_SIZE]);
        driver.pump();
    }
    driver.stop_playing().unwrap();
    driver.pump();
    driver.housekeeping().unwrap();

    assert!(!driver.is_recording());
    assert!(driver
        .take_notifications()
        .contains(&Notification::RecordComplete(take)));

    let (spec, samples) = read_wav(&path);
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, TEST_SAMPLE_RATE);
    assert_eq!(samples.len(), sine.len() * 2);
    for (i, s) in sine.iter().enumerate() {
        assert_relative_eq!(samples[2 * i], *s, epsilon = FLOAT_EPSILON);
        assert_relative_eq!(samples[2 * i + 1], -*s, epsilon = FLOAT_EPSILON);
    }
    assert!(!driver.take_failures().contains(&FailureCode::DiskOverrun));
}

#[test]
fn test_mono_instrument_records_one_channel() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mono.wav");
    let driver = test_driver();
    mono_instruments(&driver, &[(InstrumentId::audio(1), 0.0)]);

    driver
        .open_record_file(InstrumentId::audio(1), AudioFileId(1), &path)
        .unwrap();
    driver.start_playing().unwrap();
    let mut io = driver.create_io(TEST_BLOCK_SIZE);
    for _ in 0..20 {
        let [left, right] = io.input_mut(1).unwrap();
        left.fill(0.25);
        right.fill(0.75);
        driver.process(&mut io, TEST_BLOCK_SIZE);
        driver.pump();
    }

    assert!(driver.close_record_file(InstrumentId::audio(1)).unwrap());
    driver.pump();
    assert!(!driver.close_record_file(InstrumentId::audio(1)).unwrap());
    assert!(driver.is_playing());

    let (spec, samples) = read_wav(&path);
    assert_eq!(spec.channels, 1);
    assert_eq!(samples.len(), 20 * TEST_BLOCK_SIZE);
    assert!(samples.iter().all(|s| (*s - 0.25).abs() < FLOAT_EPSILON));
}

#[test]
fn test_record_errors() {
    let dir = tempfile::tempdir().unwrap();
    let driver = test_driver();

    // Synth instruments have no record input.
    assert!(matches!(
        driver.open_record_file(InstrumentId::synth(0), AudioFileId(1), dir.path().join("a.wav")),
        Err(Error::NotRecordable(_))
    ));

    driver
        .open_record_file(InstrumentId::audio(0), AudioFileId(2), dir.path().join("b.wav"))
        .unwrap();
    assert!(matches!(
        driver.open_record_file(InstrumentId::audio(0), AudioFileId(3), dir.path().join("c.wav")),
        Err(Error::AlreadyRecording(_))
    ));
    assert!(!driver.close_record_file(InstrumentId::audio(1)).unwrap());

    assert!(driver
        .open_record_file(
            InstrumentId::audio(1),
            AudioFileId(4),
            dir.path().join("missing").join("d.wav")
        )
        .is_err());
}
