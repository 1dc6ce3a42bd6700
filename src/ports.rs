//! Named stereo ports between the driver and the hardware.
//!
//! Outputs, in order: master, monitor, one fader out per instrument, one out
//! per buss. Inputs: one record in per audio instrument. Every port is a
//! pair of preallocated channel buffers owned by [`DriverIo`], so the
//! backend hands the driver its buffers without allocating per period.

use tessitura_core::{BussId, EngineConfig, InstrumentKind, InstrumentLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputPort {
    Master,
    /// Copy of the record inputs.
    Monitor,
    /// Post-fader output of the instrument at this mixer index.
    Instrument(usize),
    /// Output of the buss at this index (buss id minus one).
    Buss(usize),
}

/// Fixed port layout decided from the engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortLayout {
    instruments: InstrumentLayout,
    busses: usize,
}

impl PortLayout {
    pub fn new(instruments: InstrumentLayout, busses: usize) -> Self {
        Self {
            instruments,
            busses,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            InstrumentLayout::new(config.audio_instruments, config.synth_instruments),
            config.busses,
        )
    }

    pub fn instruments(&self) -> &InstrumentLayout {
        &self.instruments
    }

    pub fn busses(&self) -> usize {
        self.busses
    }

    /// Record inputs: one per audio instrument.
    pub fn inputs(&self) -> usize {
        (0..self.instruments.len())
            .take_while(|&i| self.instruments.kind_of(i) == Some(InstrumentKind::Audio))
            .count()
    }

    pub fn outputs(&self) -> usize {
        2 + self.instruments.len() + self.busses
    }

    /// Dense index of `port` among the outputs, if it exists.
    pub fn output_index(&self, port: OutputPort) -> Option<usize> {
        match port {
            OutputPort::Master => Some(0),
            OutputPort::Monitor => Some(1),
            OutputPort::Instrument(i) if i < self.instruments.len() => Some(2 + i),
            OutputPort::Buss(b) if b < self.busses => Some(2 + self.instruments.len() + b),
            _ => None,
        }
    }

    pub fn output_name(&self, port: OutputPort) -> Option<String> {
        self.output_index(port)?;
        Some(match port {
            OutputPort::Master => "master_out".to_string(),
            OutputPort::Monitor => "monitor_out".to_string(),
            OutputPort::Instrument(i) => format!("instrument_{}_out", self.instruments.id_at(i)?.0),
            OutputPort::Buss(b) => format!("buss_{}_out", BussId(b as u32 + 1).0),
        })
    }

    pub fn input_name(&self, index: usize) -> Option<String> {
        if index >= self.inputs() {
            return None;
        }
        Some(format!("record_{}_in", self.instruments.id_at(index)?.0))
    }

    /// Every output port, in dense order.
    pub fn output_ports(&self) -> impl Iterator<Item = OutputPort> + '_ {
        [OutputPort::Master, OutputPort::Monitor]
            .into_iter()
            .chain((0..self.instruments.len()).map(OutputPort::Instrument))
            .chain((0..self.busses).map(OutputPort::Buss))
    }
}

type Stereo = [Vec<f32>; 2];

fn stereo(frames: usize) -> Stereo {
    [vec![0.0; frames], vec![0.0; frames]]
}

/// Preallocated port buffers for one backend.
///
/// The backend writes record inputs, calls
/// [`SoundDriver::process`](crate::SoundDriver::process) with at most
/// [`max_frames`](Self::max_frames) frames, then reads the outputs it
/// cares about.
pub struct DriverIo {
    layout: PortLayout,
    max_frames: usize,
    inputs: Vec<Stereo>,
    outputs: Vec<Stereo>,
}

impl DriverIo {
    pub fn new(layout: PortLayout, max_frames: usize) -> Self {
        let max_frames = max_frames.max(1);
        Self {
            inputs: (0..layout.inputs()).map(|_| stereo(max_frames)).collect(),
            outputs: (0..layout.outputs()).map(|_| stereo(max_frames)).collect(),
            layout,
            max_frames,
        }
    }

    pub fn layout(&self) -> &PortLayout {
        &self.layout
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Reallocate every buffer for a new maximum period. Not real-time safe.
    pub fn set_max_frames(&mut self, max_frames: usize) {
        *self = Self::new(self.layout.clone(), max_frames);
    }

    pub fn output(&self, port: OutputPort) -> Option<&Stereo> {
        self.layout.output_index(port).map(|i| &self.outputs[i])
    }

    pub fn master(&self) -> &Stereo {
        &self.outputs[0]
    }

    pub fn input(&self, index: usize) -> Option<&Stereo> {
        self.inputs.get(index)
    }

    pub fn input_mut(&mut self, index: usize) -> Option<&mut Stereo> {
        self.inputs.get_mut(index)
    }

    pub(crate) fn inputs(&self) -> &[Stereo] {
        &self.inputs
    }

    pub(crate) fn output_mut(&mut self, port: OutputPort) -> Option<&mut Stereo> {
        let index = self.layout.output_index(port)?;
        Some(&mut self.outputs[index])
    }

    pub(crate) fn silence_outputs(&mut self, frames: usize) {
        for port in &mut self.outputs {
            for channel in port.iter_mut() {
                channel[..frames].fill(0.0);
            }
        }
    }

    /// Sum `port` into the master out.
    pub(crate) fn add_to_master(&mut self, port: OutputPort, frames: usize) {
        let Some(index) = self.layout.output_index(port) else {
            return;
        };
        if index == 0 {
            return;
        }
        let (master, rest) = self.outputs.split_at_mut(1);
        let source = &rest[index - 1];
        for (dst, src) in master[0].iter_mut().zip(source.iter()) {
            for (d, s) in dst[..frames].iter_mut().zip(&src[..frames]) {
                *d += s;
            }
        }
    }

    /// Sum every record input into the monitor out.
    pub(crate) fn copy_inputs_to_monitor(&mut self, frames: usize) {
        let monitor = &mut self.outputs[1];
        for channel in monitor.iter_mut() {
            channel[..frames].fill(0.0);
        }
        for input in &self.inputs {
            for (dst, src) in monitor.iter_mut().zip(input.iter()) {
                for (d, s) in dst[..frames].iter_mut().zip(&src[..frames]) {
                    *d += s;
                }
            }
        }
    }
}

impl std::fmt::Debug for DriverIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverIo")
            .field("layout", &self.layout)
            .field("max_frames", &self.max_frames)
            .finish()
    }
}
