//! Error types.

use std::path::PathBuf;
use thiserror::Error;

/// Error type.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV decoding or encoding error.
    #[error("Hound error: {0}")]
    HoundError(#[from] hound::Error),

    /// Audio file could not be found.
    #[error("Audio file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// File format the decoder cannot handle.
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    /// Sample-rate conversion failed.
    #[error("Resampler error: {0}")]
    Resampler(String),

    /// Not enough ring buffers left in the pool.
    #[error("Ring buffer pool exhausted: needed {needed} buffers")]
    PoolExhausted { needed: usize },

    /// Operation not valid in the file's current state.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Core error.
    #[error(transparent)]
    Core(#[from] tessitura_core::Error),
}

impl From<rubato::ResamplerConstructionError> for Error {
    fn from(e: rubato::ResamplerConstructionError) -> Self {
        Error::Resampler(e.to_string())
    }
}

impl From<rubato::ResampleError> for Error {
    fn from(e: rubato::ResampleError) -> Self {
        Error::Resampler(e.to_string())
    }
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
