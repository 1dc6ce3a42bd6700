//! Mixing stages for the tessitura audio engine.
//!
//! # Primary API
//!
//! - [`InstrumentBank`] / [`AudioInstrumentMixer`]: per-instrument state and
//!   the worker mixing files and plugins into stereo instrument rings
//! - [`BussBank`] / [`AudioBussMixer`]: submix busses fed from reader 0 of the
//!   instrument rings
//! - [`Routing`]: instrument to buss assignment snapshot
//! - [`PluginSlots`]: fixed plugin slot arrays with channel adaptation

pub mod error;
pub use error::{Error, Result};

pub mod chain;
pub use chain::{PluginPosition, PluginSlots};

pub mod instrument;
pub use instrument::{
    AudioInstrumentMixer, InstrumentBank, InstrumentStrip, BUSS_READER, CALLBACK_READER,
    MAX_FILES_PER_INSTRUMENT,
};

pub mod buss;
pub use buss::{AudioBussMixer, BussBank, BussStrip, Routing};
