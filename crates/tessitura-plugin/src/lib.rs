//! Plugin hosting for the tessitura audio engine.
//!
//! # Primary API
//!
//! - [`PluginInstance`]: one interface for every plugin architecture
//! - [`PluginRegistry`]: factories keyed by the architecture part of an
//!   `architecture:library:label` [`PluginIdentifier`]
//! - [`PluginSlot`]: host wrapper giving control threads lock-free port,
//!   bypass and event access while the mixer runs the plugin

pub mod error;
pub use error::{LoadStage, PluginError, Result};

pub mod descriptor;
pub use descriptor::{
    PluginDescriptor, PluginIdentifier, PluginKind, PortDescriptor, PortDirection, PortHint,
    PortType, ProgramDescriptor,
};

pub mod instance;
pub use instance::{PluginEvent, PluginInstance, PortBuffers};

pub mod builtin;
pub use builtin::{AmpPlugin, SineSynth};

pub mod ladspa;
pub use ladspa::{LadspaInstance, LadspaLibrary};

pub mod factory;
pub use factory::{BuiltinFactory, LadspaFactory, PluginFactory, PluginRegistry};

pub mod slot;
pub use slot::{ActivePlugin, PluginSlot};
