//! Centralized error type for the tessitura umbrella crate.
//!
//! Wraps every subsystem error so `?` propagates naturally across crate
//! boundaries.

use crate::driver::PluginLocation;
use crate::studio::EventId;
use tessitura_core::InstrumentId;
use tessitura_stream::AudioFileId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] tessitura_core::Error),

    #[error("Stream: {0}")]
    Stream(#[from] tessitura_stream::Error),

    #[error("Plugin: {0}")]
    Plugin(#[from] tessitura_plugin::PluginError),

    #[error("Mixer: {0}")]
    Mixer(#[from] tessitura_mixer::Error),

    #[error("Audio file {0} is not registered")]
    UnknownAudioFile(AudioFileId),

    #[error("No scheduled audio with event id {0}")]
    UnknownEvent(EventId),

    #[error("{0} cannot record")]
    NotRecordable(InstrumentId),

    #[error("{0} is already recording")]
    AlreadyRecording(InstrumentId),

    #[error("No plugin at {0:?}")]
    NoPlugin(PluginLocation),

    #[error("Audio backend: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(feature = "std")]
macro_rules! backend_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(e: $ty) -> Self {
                    Error::Backend(e.to_string())
                }
            }
        )*
    };
}

#[cfg(feature = "std")]
backend_error!(
    cpal::BuildStreamError,
    cpal::PlayStreamError,
    cpal::DefaultStreamConfigError,
    cpal::DevicesError,
    cpal::DeviceNameError,
);
