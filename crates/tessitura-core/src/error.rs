//! Error types for tessitura-core.

use thiserror::Error;

/// Error type for tessitura-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(u32),

    #[error("Unknown buss: {0}")]
    UnknownBuss(u32),

    #[error("Failed to spawn {name} thread")]
    ThreadSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Thread {0} is already running")]
    ThreadRunning(String),

    #[error("Ring buffer pool exhausted ({allocated} buffers allocated)")]
    PoolExhausted { allocated: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
