//! Error types for plugin hosting

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Scanning,
    Opening,
    Descriptor,
    Validation,
    Instantiation,
    Activation,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStage::Scanning => write!(f, "scanning"),
            LoadStage::Opening => write!(f, "opening library"),
            LoadStage::Descriptor => write!(f, "reading descriptor"),
            LoadStage::Validation => write!(f, "validating descriptor"),
            LoadStage::Instantiation => write!(f, "creating instance"),
            LoadStage::Activation => write!(f, "activating"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Plugin load failed at {stage} stage: {path}\n  Reason: {reason}")]
    LoadFailed {
        path: PathBuf,
        stage: LoadStage,
        reason: String,
    },

    #[error("Invalid plugin identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Unknown plugin architecture: {0}")]
    UnknownArchitecture(String),

    #[error("Plugin not found: {0}")]
    NotFound(String),

    #[error("Port {port} out of range ({count} ports)")]
    PortOutOfRange { port: usize, count: usize },

    #[error("Port {0} is not a control input")]
    NotAControl(usize),

    #[error("Program {bank}:{program} not available")]
    ProgramNotFound { bank: u32, program: u32 },

    #[error("Expected a {expected} plugin, got a {found}")]
    KindMismatch {
        expected: crate::PluginKind,
        found: crate::PluginKind,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PluginError>;
