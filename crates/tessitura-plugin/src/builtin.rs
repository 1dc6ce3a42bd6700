//! Built-in plugins, available without loading any library.
//!
//! - `builtin::amp_mono`, `builtin::amp_stereo`: gain in dB
//! - `builtin::sine`: polyphonic sine synth with an organ program

use crate::descriptor::{
    PluginDescriptor, PluginIdentifier, PluginKind, PortDescriptor, PortHint,
};
use crate::instance::{PluginEvent, PluginInstance, PortBuffers};
use std::f32::consts::TAU;
use tessitura_core::db_to_gain;

pub const ARCHITECTURE: &str = "builtin";

pub const AMP_MONO: &str = "amp_mono";
pub const AMP_STEREO: &str = "amp_stereo";
pub const SINE_SYNTH: &str = "sine";

fn identifier(label: &str) -> PluginIdentifier {
    PluginIdentifier::new(ARCHITECTURE, "", label)
}

/// Descriptors of every built-in plugin.
pub fn descriptors() -> Vec<PluginDescriptor> {
    vec![
        amp_descriptor(1),
        amp_descriptor(2),
        sine_descriptor(),
    ]
}

/// Create a built-in plugin by label.
pub fn instantiate(label: &str, sample_rate: u32) -> Option<Box<dyn PluginInstance>> {
    match label {
        AMP_MONO => Some(Box::new(AmpPlugin::new(1))),
        AMP_STEREO => Some(Box::new(AmpPlugin::new(2))),
        SINE_SYNTH => Some(Box::new(SineSynth::new(sample_rate))),
        _ => None,
    }
}

fn amp_descriptor(channels: usize) -> PluginDescriptor {
    let (label, name, unique_id) = if channels == 1 {
        (AMP_MONO, "Mono Amplifier", 1048)
    } else {
        (AMP_STEREO, "Stereo Amplifier", 1049)
    };
    let mut desc = PluginDescriptor::new(identifier(label), name, PluginKind::AudioEffect)
        .unique_id(unique_id)
        .maker("tessitura")
        .port(PortDescriptor::control_input(
            "gain",
            PortHint::new(-70.0, 24.0, 0.0),
        ));
    let names: &[(&str, &str)] = if channels == 1 {
        &[("in", "out")]
    } else {
        &[("in_l", "out_l"), ("in_r", "out_r")]
    };
    for (input, _) in names {
        desc = desc.port(PortDescriptor::audio_input(*input));
    }
    for (_, output) in names {
        desc = desc.port(PortDescriptor::audio_output(*output));
    }
    desc
}

/// Gain stage.
pub struct AmpPlugin {
    descriptor: PluginDescriptor,
    gain: f32,
}

impl AmpPlugin {
    pub fn new(channels: usize) -> Self {
        Self {
            descriptor: amp_descriptor(channels.clamp(1, 2)),
            gain: 1.0,
        }
    }
}

impl PluginInstance for AmpPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn set_control(&mut self, port: usize, value: f32) {
        if port == 0 {
            self.gain = db_to_gain(value);
        }
    }

    fn run(&mut self, io: &mut PortBuffers, frames: usize, _events: &[PluginEvent]) {
        for (input, output) in io.inputs.iter().zip(io.outputs.iter_mut()) {
            for (o, i) in output[..frames].iter_mut().zip(&input[..frames]) {
                *o = *i * self.gain;
            }
        }
    }
}

const MAX_VOICES: usize = 16;
/// Frames for a voice to ramp fully on or off.
const ENVELOPE_FRAMES: f32 = 64.0;

const PROGRAM_SINE: u32 = 0;
const PROGRAM_ORGAN: u32 = 1;

fn sine_descriptor() -> PluginDescriptor {
    PluginDescriptor::new(identifier(SINE_SYNTH), "Sine Synth", PluginKind::SynthesizerSource)
        .unique_id(1050)
        .maker("tessitura")
        .port(PortDescriptor::control_input(
            "level",
            PortHint::new(0.0, 1.0, 0.25),
        ))
        .port(PortDescriptor::audio_output("out_l"))
        .port(PortDescriptor::audio_output("out_r"))
        .program(0, PROGRAM_SINE, "Sine")
        .program(0, PROGRAM_ORGAN, "Organ")
}

#[derive(Debug, Clone, Copy, Default)]
struct Voice {
    note: u8,
    phase: f32,
    step: f32,
    velocity: f32,
    envelope: f32,
    target: f32,
}

impl Voice {
    fn is_active(&self) -> bool {
        self.target > 0.0 || self.envelope > 0.0
    }

    #[inline]
    fn tick(&mut self, organ: bool) -> f32 {
        let delta = 1.0 / ENVELOPE_FRAMES;
        if self.envelope < self.target {
            self.envelope = (self.envelope + delta).min(self.target);
        } else if self.envelope > self.target {
            self.envelope = (self.envelope - delta).max(self.target);
        }

        let mut s = (self.phase * TAU).sin();
        if organ {
            s = 0.6 * s + 0.3 * (self.phase * 2.0 * TAU).sin() + 0.1 * (self.phase * 3.0 * TAU).sin();
        }
        self.phase += self.step;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        s * self.envelope * self.velocity
    }
}

fn note_frequency(note: u8) -> f32 {
    440.0 * 2f32.powf((note as f32 - 69.0) / 12.0)
}

/// Polyphonic sine synth.
pub struct SineSynth {
    descriptor: PluginDescriptor,
    sample_rate: f32,
    level: f32,
    program: u32,
    voices: [Voice; MAX_VOICES],
}

impl SineSynth {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            descriptor: sine_descriptor(),
            sample_rate: sample_rate.max(1) as f32,
            level: 0.25,
            program: PROGRAM_SINE,
            voices: [Voice::default(); MAX_VOICES],
        }
    }

    /// Voices still sounding, including releases.
    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|v| v.is_active()).count()
    }

    fn handle(&mut self, event: PluginEvent) {
        match event {
            PluginEvent::NoteOn { note, velocity, .. } if velocity > 0 => {
                let step = note_frequency(note) / self.sample_rate;
                let index = self
                    .voices
                    .iter()
                    .position(|v| v.is_active() && v.note == note)
                    .or_else(|| self.voices.iter().position(|v| !v.is_active()))
                    .unwrap_or_else(|| self.quietest_voice());
                let voice = &mut self.voices[index];
                if !voice.is_active() {
                    voice.phase = 0.0;
                }
                voice.note = note;
                voice.step = step;
                voice.velocity = velocity as f32 / 127.0;
                voice.target = 1.0;
            }
            PluginEvent::NoteOn { note, .. } | PluginEvent::NoteOff { note, .. } => {
                for v in self.voices.iter_mut().filter(|v| v.note == note) {
                    v.target = 0.0;
                }
            }
            PluginEvent::AllNotesOff { .. } => {
                for v in self.voices.iter_mut() {
                    v.target = 0.0;
                }
            }
        }
    }

    fn quietest_voice(&self) -> usize {
        self.voices
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.envelope.total_cmp(&b.envelope))
            .map_or(0, |(i, _)| i)
    }
}

impl PluginInstance for SineSynth {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn set_control(&mut self, port: usize, value: f32) {
        if port == 0 {
            self.level = value;
        }
    }

    fn run(&mut self, io: &mut PortBuffers, frames: usize, events: &[PluginEvent]) {
        let organ = self.program == PROGRAM_ORGAN;
        let mut next = 0;
        for i in 0..frames {
            while next < events.len() && events[next].frame() as usize <= i {
                self.handle(events[next]);
                next += 1;
            }
            let mut s = 0.0;
            for v in self.voices.iter_mut().filter(|v| v.is_active()) {
                s += v.tick(organ);
            }
            s *= self.level;
            for out in io.outputs.iter_mut() {
                out[i] = s;
            }
        }
        // Late events take effect from the next block.
        for event in &events[next..] {
            self.handle(*event);
        }
    }

    fn reset(&mut self) {
        self.voices = [Voice::default(); MAX_VOICES];
    }

    fn select_program(&mut self, bank: u32, program: u32) -> bool {
        if bank == 0 && (program == PROGRAM_SINE || program == PROGRAM_ORGAN) {
            self.program = program;
            true
        } else {
            false
        }
    }
}
