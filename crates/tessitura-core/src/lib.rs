//! Real-time kernel for the tessitura audio engine.
//!
//! # Primary API
//!
//! - [`RingBuffer`]: lock-free single-writer, multi-reader sample ring
//! - [`RingBufferPool`]: fixed-capacity pool of rings lent to streamed files
//! - [`Scavenger`]: deferred destruction across the real-time boundary
//! - [`AudioThread`] / [`AudioWorker`]: condvar-driven worker threads
//! - [`TransportClock`] / [`TransportSync`]: transport state and the external
//!   start/stop/relocate handshake
//! - [`FailureReporter`]: lock-free failure reporting from the real-time path
//! - [`PeakMeter`], [`CpuMeter`]: metering
//! - [`EngineConfig`]: engine configuration

pub mod error;
pub use error::{Error, Result};

pub mod config;
pub use config::EngineConfig;

pub mod failure;
pub use failure::{FailureCode, FailureReporter};

pub mod instrument;
pub use instrument::{
    BussId, InstrumentId, InstrumentKind, InstrumentLayout, OutputTarget, AUDIO_INSTRUMENT_BASE,
    SYNTH_INSTRUMENT_BASE,
};

pub mod level;
pub use level::{db_to_gain, gain_to_db, pan_gains, AtomicStereoGain, PanLaw, StereoGain};

pub(crate) mod lockfree;
pub use lockfree::{AtomicFlag, AtomicFloat};

pub mod metering;
pub use metering::{peak_of, CpuMeter, LevelReading, PeakMeter};

pub mod pool;
pub use pool::RingBufferPool;

pub mod ring_buffer;
pub use ring_buffer::{RingBuffer, Sample, SampleRing, SharedSampleRing};

pub mod scavenger;
pub use scavenger::{EpochCounter, Scavenger};

pub mod thread;
pub use thread::{AudioThread, AudioWorker, Signaller};

pub mod time;
pub use time::{duration_to_frames, frames_to_duration};

pub mod transport;
pub use transport::{TransportClock, TransportRequest, TransportState, TransportSync};
