//! Error types for the mixing stages.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Instrument index {0} out of range")]
    InstrumentOutOfRange(usize),

    #[error("Buss index {0} out of range")]
    BussOutOfRange(usize),

    #[error("Plugin position {position} out of range ({slots} slots)")]
    SlotOutOfRange { position: usize, slots: usize },

    #[error("Instrument {0} has no synth slot")]
    NoSynthSlot(usize),

    #[error(transparent)]
    Plugin(#[from] tessitura_plugin::PluginError),

    #[error(transparent)]
    Core(#[from] tessitura_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
