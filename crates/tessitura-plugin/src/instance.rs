//! Plugin instance trait and processing types.
//!
//! One interface for native LADSPA plugins and the built-ins.

use crate::descriptor::{PluginDescriptor, PluginKind};

/// Event delivered to a synth at a frame offset within the next block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PluginEvent {
    NoteOn { frame: u32, note: u8, velocity: u8 },
    NoteOff { frame: u32, note: u8 },
    AllNotesOff { frame: u32 },
}

impl PluginEvent {
    pub fn frame(&self) -> u32 {
        match *self {
            PluginEvent::NoteOn { frame, .. }
            | PluginEvent::NoteOff { frame, .. }
            | PluginEvent::AllNotesOff { frame } => frame,
        }
    }
}

/// Audio buffers connected to a plugin's audio ports, allocated once for the
/// largest block the host will run.
#[derive(Debug, Clone)]
pub struct PortBuffers {
    pub inputs: Vec<Vec<f32>>,
    pub outputs: Vec<Vec<f32>>,
}

impl PortBuffers {
    pub fn new(inputs: usize, outputs: usize, max_frames: usize) -> Self {
        Self {
            inputs: vec![vec![0.0; max_frames]; inputs],
            outputs: vec![vec![0.0; max_frames]; outputs],
        }
    }

    pub fn for_descriptor(descriptor: &PluginDescriptor, max_frames: usize) -> Self {
        Self::new(descriptor.audio_inputs(), descriptor.audio_outputs(), max_frames)
    }

    /// Frames each buffer holds.
    pub fn max_frames(&self) -> usize {
        self.inputs
            .first()
            .or(self.outputs.first())
            .map_or(0, |b| b.len())
    }
}

/// A live plugin. Calls other than `run` happen off the real-time thread,
/// serialized by the owning slot.
pub trait PluginInstance: Send {
    fn descriptor(&self) -> &PluginDescriptor;

    fn kind(&self) -> PluginKind {
        self.descriptor().kind
    }

    /// Set a control input. `value` is already clamped to the port's hint.
    fn set_control(&mut self, port: usize, value: f32);

    /// Process `frames` frames from `io.inputs` into `io.outputs`. Events
    /// carry frame offsets within this block.
    fn run(&mut self, io: &mut PortBuffers, frames: usize, events: &[PluginEvent]);

    /// Return to the freshly activated state, silencing tails and voices.
    fn reset(&mut self) {}

    /// Select a program. Returns `false` when the plugin has no such program.
    fn select_program(&mut self, _bank: u32, _program: u32) -> bool {
        false
    }

    /// Processing latency in frames.
    fn latency(&self) -> usize {
        0
    }
}

impl std::fmt::Debug for dyn PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PluginInstance({})", self.descriptor().identifier)
    }
}
