//! Engine configuration.

use crate::level::PanLaw;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the audio engine. Fixed at construction: slot counts and
/// ring sizes decided here are never grown from the real-time path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Frames per period.
    pub block_size: usize,
    /// Audio-input instruments.
    pub audio_instruments: usize,
    /// Soft-synth instruments.
    pub synth_instruments: usize,
    pub busses: usize,
    pub instrument_plugin_slots: usize,
    pub buss_plugin_slots: usize,
    /// Instrument mixer ring size, in seconds.
    pub instrument_buffer_secs: f32,
    /// Buss mixer ring size, in seconds.
    pub buss_buffer_secs: f32,
    /// Read-ahead ring size of a streamed file, in seconds.
    pub file_buffer_secs: f32,
    /// Record ring size, in seconds.
    pub record_buffer_secs: f32,
    /// Frames decoded per `update_buffers` step.
    pub file_read_block: usize,
    /// Files smaller than this many bytes are decoded into memory.
    pub small_file_threshold: u64,
    /// Initial number of rings in the file pool.
    pub pool_size: usize,
    /// Lock mixer and pool rings into RAM.
    pub lock_memory: bool,
    /// Pump the mixers from the real-time callback.
    pub low_latency: bool,
    pub pan_law: PanLaw,
    /// Backend restarts attempted before falling back to silence.
    pub backend_restart_attempts: u32,
    #[serde(with = "millis")]
    pub backend_restart_cooldown: Duration,
    /// Callback load (fraction of the period) that counts as an overload.
    pub cpu_overload_threshold: f32,
    /// Capacity of the real-time failure queue.
    pub failure_queue: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 512,
            audio_instruments: 16,
            synth_instruments: 16,
            busses: 4,
            instrument_plugin_slots: 5,
            buss_plugin_slots: 5,
            instrument_buffer_secs: 0.1,
            buss_buffer_secs: 0.1,
            file_buffer_secs: 1.0,
            record_buffer_secs: 1.0,
            file_read_block: 4096,
            small_file_threshold: 256 * 1024,
            pool_size: 32,
            lock_memory: false,
            low_latency: false,
            pan_law: PanLaw::ConstantPower,
            backend_restart_attempts: 3,
            backend_restart_cooldown: Duration::from_millis(500),
            cpu_overload_threshold: 0.95,
            failure_queue: 256,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn instruments(mut self, audio: usize, synth: usize) -> Self {
        self.audio_instruments = audio;
        self.synth_instruments = synth;
        self
    }

    pub fn busses(mut self, busses: usize) -> Self {
        self.busses = busses;
        self
    }

    pub fn plugin_slots(mut self, instrument: usize, buss: usize) -> Self {
        self.instrument_plugin_slots = instrument;
        self.buss_plugin_slots = buss;
        self
    }

    pub fn instrument_buffer_secs(mut self, secs: f32) -> Self {
        self.instrument_buffer_secs = secs;
        self
    }

    pub fn buss_buffer_secs(mut self, secs: f32) -> Self {
        self.buss_buffer_secs = secs;
        self
    }

    pub fn file_buffer_secs(mut self, secs: f32) -> Self {
        self.file_buffer_secs = secs;
        self
    }

    pub fn small_file_threshold(mut self, bytes: u64) -> Self {
        self.small_file_threshold = bytes;
        self
    }

    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn low_latency(mut self, low_latency: bool) -> Self {
        self.low_latency = low_latency;
        self
    }

    pub fn pan_law(mut self, pan_law: PanLaw) -> Self {
        self.pan_law = pan_law;
        self
    }

    pub fn lock_memory(mut self, lock: bool) -> Self {
        self.lock_memory = lock;
        self
    }

    pub fn backend_restarts(mut self, attempts: u32, cooldown: Duration) -> Self {
        self.backend_restart_attempts = attempts;
        self.backend_restart_cooldown = cooldown;
        self
    }

    fn frames_for(&self, secs: f32) -> usize {
        (secs as f64 * self.sample_rate as f64).round() as usize
    }

    /// Instrument ring capacity in frames, at least two periods.
    pub fn instrument_ring_frames(&self) -> usize {
        self.frames_for(self.instrument_buffer_secs)
            .max(self.block_size * 2)
    }

    /// Buss ring capacity in frames, at least two periods.
    pub fn buss_ring_frames(&self) -> usize {
        self.frames_for(self.buss_buffer_secs).max(self.block_size * 2)
    }

    /// Streamed file ring capacity in frames.
    pub fn file_ring_frames(&self) -> usize {
        self.frames_for(self.file_buffer_secs)
            .max(self.file_read_block.max(self.block_size) * 2)
    }

    /// Record ring capacity in frames.
    pub fn record_ring_frames(&self) -> usize {
        self.frames_for(self.record_buffer_secs)
            .max(self.block_size * 4)
    }

    /// Wall-clock duration of one period.
    pub fn period(&self) -> Duration {
        crate::time::frames_to_duration(self.block_size as u64, self.sample_rate)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate < 8000 || self.sample_rate > 384_000 {
            return Err(Error::InvalidConfig(format!(
                "sample_rate {} out of range (8000-384000 Hz)",
                self.sample_rate
            )));
        }
        if self.block_size == 0 || self.block_size > 8192 {
            return Err(Error::InvalidConfig(format!(
                "block_size {} out of range (1-8192 frames)",
                self.block_size
            )));
        }
        if self.audio_instruments == 0 && self.synth_instruments == 0 {
            return Err(Error::InvalidConfig(
                "at least one instrument is required".into(),
            ));
        }
        for (name, secs) in [
            ("instrument_buffer_secs", self.instrument_buffer_secs),
            ("buss_buffer_secs", self.buss_buffer_secs),
            ("file_buffer_secs", self.file_buffer_secs),
            ("record_buffer_secs", self.record_buffer_secs),
        ] {
            if !(secs > 0.0 && secs <= 60.0) {
                return Err(Error::InvalidConfig(format!(
                    "{} {} out of range (0-60 s)",
                    name, secs
                )));
            }
        }
        // The reader prepares files two file rings past the playhead; the
        // instrument mixers must never run further ahead than that.
        if self.instrument_ring_frames() > self.file_ring_frames() * 2 {
            return Err(Error::InvalidConfig(format!(
                "instrument ring of {} frames outruns the file read-ahead of {} frames",
                self.instrument_ring_frames(),
                self.file_ring_frames() * 2
            )));
        }
        if self.file_read_block == 0 {
            return Err(Error::InvalidConfig("file_read_block must be non-zero".into()));
        }
        if !(self.cpu_overload_threshold > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "cpu_overload_threshold {} must be positive",
                self.cpu_overload_threshold
            )));
        }
        if self.failure_queue == 0 {
            return Err(Error::InvalidConfig("failure_queue must be non-zero".into()));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 48_000);
        assert!(config.validate().is_ok());
        assert_eq!(config.instrument_ring_frames(), 4800);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .sample_rate(44_100)
            .block_size(256)
            .instruments(2, 1)
            .busses(1)
            .low_latency(true);
        assert_eq!(config.block_size, 256);
        assert_eq!(config.audio_instruments, 2);
        assert!(config.low_latency);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rings_hold_at_least_two_periods() {
        let config = EngineConfig::new()
            .block_size(4096)
            .instrument_buffer_secs(0.001);
        assert_eq!(config.instrument_ring_frames(), 8192);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(EngineConfig::new().sample_rate(100).validate().is_err());
        assert!(EngineConfig::new().block_size(0).validate().is_err());
        assert!(EngineConfig::new().instruments(0, 0).validate().is_err());
        assert!(EngineConfig::new()
            .file_buffer_secs(0.0)
            .validate()
            .is_err());
        let mut config = EngineConfig::new();
        config.cpu_overload_threshold = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_instrument_ring_must_fit_the_read_ahead() {
        // 48000 frames of file ring read two rings ahead.
        let config = EngineConfig::new()
            .file_buffer_secs(1.0)
            .instrument_buffer_secs(2.0);
        assert!(config.validate().is_ok());

        let config = config.instrument_buffer_secs(2.5);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        // Short file rings still hold two read blocks.
        let config = EngineConfig::new()
            .file_buffer_secs(0.01)
            .instrument_buffer_secs(0.3);
        assert_eq!(config.file_ring_frames(), 8192);
        assert!(config.validate().is_ok());
        assert!(config.instrument_buffer_secs(0.5).validate().is_err());
    }
}
