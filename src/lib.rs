//! # Tessitura - Real-time Audio Engine
//!
//! Disk-streamed audio playback, recording, plugin hosting and mixing.
//!
//! ## Architecture
//!
//! Tessitura is an umbrella crate that coordinates:
//! - **tessitura-core** - Ring buffers, worker threads, scavenging, transport, metering
//! - **tessitura-stream** - Audio files, the play queue, the file reader and writer
//! - **tessitura-plugin** - Plugin hosting (built-in and LADSPA)
//! - **tessitura-mixer** - Instrument and buss mixing
//!
//! [`SoundDriver`] ties them together and is driven once per period by an
//! [`AudioBackend`].
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::time::Duration;
//! use tessitura::prelude::*;
//!
//! let driver = SoundDriver::builder().instruments(4, 2).build()?;
//! let _backend = BackendSupervisor::start(driver.clone(), Box::new(CpalBackend::new(None)))?;
//!
//! driver.register_audio_file(AudioFileId(1), "drums.wav")?;
//! driver.schedule_audio(&ScheduledAudio::new(
//!     EventId(1),
//!     AudioFileId(1),
//!     InstrumentId::audio(0),
//!     Duration::ZERO,
//!     Duration::from_secs(4),
//! ))?;
//! driver.start_playing()?;
//!
//! loop {
//!     driver.housekeeping()?;
//!     for note in driver.take_notifications() {
//!         println!("{:?}", note);
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `std` (default) - Hardware output through CPAL

/// Re-export of tessitura-core for direct access
pub use tessitura_core as core;
pub use tessitura_mixer as mixer;
pub use tessitura_plugin as plugin;
pub use tessitura_stream as stream;

pub use tessitura_core::{
    BussId, EngineConfig, FailureCode, InstrumentId, InstrumentKind, LevelReading, OutputTarget,
    PanLaw, TransportState,
};
pub use tessitura_mixer::PluginPosition;
pub use tessitura_plugin::{PluginEvent, PluginFactory, PluginIdentifier};
pub use tessitura_stream::AudioFileId;

mod error;
pub use error::{Error, Result};

mod studio;
pub use studio::{BussConfig, EventId, InstrumentConfig, PluginConfig, ScheduledAudio, StudioConfig};

mod notification;
pub use notification::Notification;

mod ports;
pub use ports::{DriverIo, OutputPort, PortLayout};

mod gate;

mod driver;
pub use driver::{PluginLocation, SoundDriver, PREVIEW_EVENT_BASE};

mod builder;
pub use builder::SoundDriverBuilder;

pub mod backend;
#[cfg(feature = "std")]
pub use backend::CpalBackend;
pub use backend::{AudioBackend, BackendStatus, BackendSupervisor, NullBackend};

impl SoundDriver {
    pub fn builder() -> SoundDriverBuilder {
        SoundDriverBuilder::default()
    }
}

/// Convenience prelude for common imports
pub mod prelude {
    pub use crate::{SoundDriver, SoundDriverBuilder};

    pub use crate::backend::{AudioBackend, BackendStatus, BackendSupervisor, NullBackend};
    #[cfg(feature = "std")]
    pub use crate::backend::CpalBackend;

    pub use crate::{
        AudioFileId, BussId, EngineConfig, EventId, FailureCode, InstrumentId, Notification,
        OutputPort, PluginEvent, PluginLocation, PluginPosition, ScheduledAudio, StudioConfig,
    };
}
