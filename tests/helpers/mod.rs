//! Test helpers and fixtures for tessitura integration tests
//!
//! Drivers are built without worker threads, so every test steps the
//! engine by hand: one `process` call standing in for the audio callback,
//! then one `pump` standing in for the workers.
//!
//! ## Tolerance Levels
//!
//! Use the appropriate tolerance from [`tolerances`] module:
//! - `FLOAT_EPSILON` (1e-6): Exact operations (passthrough, unity gain)
//! - `GAIN_EPSILON` (1e-4): dB and pan law derived gains
//! - `SILENCE_THRESHOLD` (0.0001): Silence detection (-80dB)
#![allow(dead_code)]

pub mod tolerances;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tessitura::core::frames_to_duration;
use tessitura::prelude::*;
use tessitura::{DriverIo, InstrumentConfig};

pub const TEST_SAMPLE_RATE: u32 = 48_000;

/// Period size for deterministic stepping.
pub const TEST_BLOCK_SIZE: usize = 64;

/// Equal-power gain per side at centre pan.
pub const CENTRE_GAIN: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Route engine logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Two audio instruments, one synth instrument, one buss.
pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .sample_rate(TEST_SAMPLE_RATE)
        .block_size(TEST_BLOCK_SIZE)
        .instruments(2, 1)
        .busses(1)
        .plugin_slots(2, 2)
}

pub fn test_driver() -> Arc<SoundDriver> {
    test_driver_with(test_config())
}

pub fn test_driver_with(config: EngineConfig) -> Arc<SoundDriver> {
    SoundDriver::builder()
        .config(config)
        .manual()
        .build()
        .expect("Failed to create test driver")
}

/// Write interleaved `samples` as a 32-bit float WAV.
pub fn write_wav(path: &Path, channels: u16, samples: &[f32]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).expect("Failed to create WAV");
    for &s in samples {
        writer.write_sample(s).expect("Failed to write sample");
    }
    writer.finalize().expect("Failed to finalize WAV");
}

/// Read a float WAV back; samples stay interleaved.
pub fn read_wav(path: &Path) -> (hound::WavSpec, Vec<f32>) {
    let mut reader = hound::WavReader::open(path).expect("Failed to open WAV");
    let spec = reader.spec();
    let samples = reader
        .samples::<f32>()
        .collect::<Result<Vec<_>, _>>()
        .expect("Failed to read samples");
    (spec, samples)
}

/// Sawtooth between -0.5 and 0.5, `period` frames per cycle.
pub fn generate_ramp(num_samples: usize, period: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| (i % period) as f32 / period as f32 - 0.5)
        .collect()
}

/// Sine wave at `frequency` for `num_samples` samples.
pub fn generate_sine(frequency: f32, num_samples: usize) -> Vec<f32> {
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / TEST_SAMPLE_RATE as f32;
            (std::f32::consts::TAU * frequency * t).sin()
        })
        .collect()
}

pub fn frames(n: u64) -> Duration {
    frames_to_duration(n, TEST_SAMPLE_RATE)
}

/// Register a mono WAV of `samples` as `id`.
pub fn mono_file(driver: &SoundDriver, dir: &Path, id: u32, samples: &[f32]) -> AudioFileId {
    let path = dir.join(format!("file_{}.wav", id));
    write_wav(&path, 1, samples);
    let id = AudioFileId(id);
    driver
        .register_audio_file(id, &path)
        .expect("Failed to register audio file");
    id
}

/// Schedule all of `file` (`len` frames) on `instrument` at `start`.
pub fn schedule(
    driver: &SoundDriver,
    event: u64,
    file: AudioFileId,
    instrument: InstrumentId,
    start: u64,
    len: u64,
) {
    driver
        .schedule_audio(&ScheduledAudio::new(
            EventId(event),
            file,
            instrument,
            frames(start),
            frames(len),
        ))
        .expect("Failed to schedule audio");
}

/// Make each instrument mono at 0 dB with the given pan.
pub fn mono_instruments(driver: &SoundDriver, instruments: &[(InstrumentId, f32)]) {
    let mut studio = StudioConfig::default();
    for &(id, pan) in instruments {
        let mut config = InstrumentConfig::new(id);
        config.channels = 1;
        config.pan = pan;
        studio.instruments.push(config);
    }
    driver
        .update_audio_data(&studio)
        .expect("Failed to update studio");
}

/// Output captured from one port.
#[derive(Debug, Default)]
pub struct Capture {
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

/// Run `periods` callbacks, each followed by a worker pump, capturing
/// `port`.
pub fn run_periods(
    driver: &SoundDriver,
    io: &mut DriverIo,
    periods: usize,
    port: OutputPort,
) -> Capture {
    let mut capture = Capture::default();
    for _ in 0..periods {
        driver.process(io, TEST_BLOCK_SIZE);
        let [left, right] = io.output(port).expect("No such port");
        capture.left.extend_from_slice(&left[..TEST_BLOCK_SIZE]);
        capture.right.extend_from_slice(&right[..TEST_BLOCK_SIZE]);
        driver.pump();
    }
    capture
}

/// Calculate RMS of a signal.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Calculate peak amplitude of a signal.
pub fn peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .map(|s| s.abs())
        .fold(0.0_f32, |a, b| a.max(b))
}

/// Assert that a signal is approximately silent (all values near zero).
pub fn assert_silence(samples: &[f32], tolerance: f32) {
    let max = peak(samples);
    assert!(
        max <= tolerance,
        "Expected silence, but peak amplitude was {}",
        max
    );
}

/// Assert that a signal has content (not silent).
pub fn assert_has_audio(samples: &[f32], min_rms: f32) {
    let r = rms(samples);
    assert!(
        r >= min_rms,
        "Expected audio content with RMS >= {}, but RMS was {}",
        min_rms,
        r
    );
}
