//! Plugin descriptors, identifiers and port metadata.

use crate::error::{PluginError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a plugin does in a mixing chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginKind {
    /// Processes the instrument or buss signal in place.
    AudioEffect,
    /// Generates the signal of a synth instrument from events.
    SynthesizerSource,
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginKind::AudioEffect => write!(f, "effect"),
            PluginKind::SynthesizerSource => write!(f, "synth"),
        }
    }
}

/// `architecture:library:label`, e.g. `ladspa:/usr/lib/ladspa/amp.so:amp_mono`.
///
/// The library part may itself contain colons (Windows drive letters); the
/// architecture is everything before the first colon and the label
/// everything after the last.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PluginIdentifier {
    architecture: String,
    library: String,
    label: String,
}

impl PluginIdentifier {
    pub fn new(
        architecture: impl Into<String>,
        library: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            architecture: architecture.into(),
            library: library.into(),
            label: label.into(),
        }
    }

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for PluginIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.architecture, self.library, self.label)
    }
}

impl FromStr for PluginIdentifier {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PluginError::InvalidIdentifier(s.to_string());
        let (architecture, rest) = s.split_once(':').ok_or_else(invalid)?;
        let (library, label) = rest.rsplit_once(':').ok_or_else(invalid)?;
        if architecture.is_empty() || label.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(architecture, library, label))
    }
}

impl TryFrom<String> for PluginIdentifier {
    type Error = PluginError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PluginIdentifier> for String {
    fn from(id: PluginIdentifier) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortType {
    Audio,
    Control,
}

/// Range and default of a control port.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortHint {
    pub min: f32,
    pub max: f32,
    pub default: f32,
    #[serde(default)]
    pub integer: bool,
    #[serde(default)]
    pub toggled: bool,
    #[serde(default)]
    pub logarithmic: bool,
}

impl PortHint {
    pub fn new(min: f32, max: f32, default: f32) -> Self {
        Self {
            min,
            max,
            default,
            integer: false,
            toggled: false,
            logarithmic: false,
        }
    }

    pub fn toggle(default: bool) -> Self {
        Self {
            toggled: true,
            ..Self::new(0.0, 1.0, if default { 1.0 } else { 0.0 })
        }
    }

    /// Clamp `value` into range, rounding integer ports and snapping toggles.
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.default;
        }
        if self.toggled {
            return if value > 0.0 { 1.0 } else { 0.0 };
        }
        let v = value.clamp(self.min.min(self.max), self.max.max(self.min));
        if self.integer {
            v.round()
        } else {
            v
        }
    }
}

impl Default for PortHint {
    fn default() -> Self {
        Self::new(f32::MIN, f32::MAX, 0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub name: String,
    pub direction: PortDirection,
    pub port_type: PortType,
    pub hint: PortHint,
}

impl PortDescriptor {
    pub fn audio_input(name: impl Into<String>) -> Self {
        Self::new(name, PortDirection::Input, PortType::Audio, PortHint::default())
    }

    pub fn audio_output(name: impl Into<String>) -> Self {
        Self::new(name, PortDirection::Output, PortType::Audio, PortHint::default())
    }

    pub fn control_input(name: impl Into<String>, hint: PortHint) -> Self {
        Self::new(name, PortDirection::Input, PortType::Control, hint)
    }

    pub fn control_output(name: impl Into<String>) -> Self {
        Self::new(name, PortDirection::Output, PortType::Control, PortHint::default())
    }

    fn new(
        name: impl Into<String>,
        direction: PortDirection,
        port_type: PortType,
        hint: PortHint,
    ) -> Self {
        Self {
            name: name.into(),
            direction,
            port_type,
            hint,
        }
    }

    pub fn is_audio_input(&self) -> bool {
        self.port_type == PortType::Audio && self.direction == PortDirection::Input
    }

    pub fn is_audio_output(&self) -> bool {
        self.port_type == PortType::Audio && self.direction == PortDirection::Output
    }

    pub fn is_control_input(&self) -> bool {
        self.port_type == PortType::Control && self.direction == PortDirection::Input
    }
}

/// A selectable program (preset).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramDescriptor {
    pub bank: u32,
    pub program: u32,
    pub name: String,
}

/// Everything the host knows about a plugin before instantiating it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub identifier: PluginIdentifier,
    pub unique_id: u64,
    pub name: String,
    pub maker: String,
    pub kind: PluginKind,
    pub ports: Vec<PortDescriptor>,
    #[serde(default)]
    pub programs: Vec<ProgramDescriptor>,
}

impl PluginDescriptor {
    pub fn new(identifier: PluginIdentifier, name: impl Into<String>, kind: PluginKind) -> Self {
        Self {
            identifier,
            unique_id: 0,
            name: name.into(),
            maker: String::new(),
            kind,
            ports: Vec::new(),
            programs: Vec::new(),
        }
    }

    pub fn unique_id(mut self, id: u64) -> Self {
        self.unique_id = id;
        self
    }

    pub fn maker(mut self, maker: impl Into<String>) -> Self {
        self.maker = maker.into();
        self
    }

    pub fn port(mut self, port: PortDescriptor) -> Self {
        self.ports.push(port);
        self
    }

    pub fn program(mut self, bank: u32, program: u32, name: impl Into<String>) -> Self {
        self.programs.push(ProgramDescriptor {
            bank,
            program,
            name: name.into(),
        });
        self
    }

    pub fn audio_inputs(&self) -> usize {
        self.ports.iter().filter(|p| p.is_audio_input()).count()
    }

    pub fn audio_outputs(&self) -> usize {
        self.ports.iter().filter(|p| p.is_audio_output()).count()
    }

    /// Port indices of the control inputs, in port order.
    pub fn control_inputs(&self) -> impl Iterator<Item = usize> + '_ {
        self.ports
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_control_input())
            .map(|(i, _)| i)
    }

    pub fn port_by_name(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.name == name)
    }

    pub fn has_program(&self, bank: u32, program: u32) -> bool {
        self.programs
            .iter()
            .any(|p| p.bank == bank && p.program == program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_parse() {
        let id: PluginIdentifier = "ladspa:/usr/lib/ladspa/amp.so:amp_mono".parse().unwrap();
        assert_eq!(id.architecture(), "ladspa");
        assert_eq!(id.library(), "/usr/lib/ladspa/amp.so");
        assert_eq!(id.label(), "amp_mono");
        assert_eq!(id.to_string(), "ladspa:/usr/lib/ladspa/amp.so:amp_mono");

        let win: PluginIdentifier = "ladspa:C:\\plugins\\amp.dll:amp".parse().unwrap();
        assert_eq!(win.library(), "C:\\plugins\\amp.dll");
        assert_eq!(win.label(), "amp");

        let builtin: PluginIdentifier = "builtin::sine".parse().unwrap();
        assert_eq!(builtin.library(), "");

        assert!("nocolon".parse::<PluginIdentifier>().is_err());
        assert!(":lib:label".parse::<PluginIdentifier>().is_err());
        assert!("arch:lib:".parse::<PluginIdentifier>().is_err());
    }

    #[test]
    fn test_identifier_serde_as_string() {
        let id = PluginIdentifier::new("builtin", "", "amp_stereo");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"builtin::amp_stereo\"");
        let back: PluginIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<PluginIdentifier>("\"bad\"").is_err());
    }

    #[test]
    fn test_hint_clamp() {
        let hint = PortHint::new(-10.0, 10.0, 0.0);
        assert_eq!(hint.clamp(42.0), 10.0);
        assert_eq!(hint.clamp(-42.0), -10.0);
        assert_eq!(hint.clamp(f32::NAN), 0.0);

        let int = PortHint {
            integer: true,
            ..PortHint::new(0.0, 8.0, 1.0)
        };
        assert_eq!(int.clamp(2.6), 3.0);

        let toggle = PortHint::toggle(false);
        assert_eq!(toggle.clamp(0.3), 1.0);
        assert_eq!(toggle.clamp(0.0), 0.0);
    }

    #[test]
    fn test_descriptor_port_queries() {
        let desc = PluginDescriptor::new(
            PluginIdentifier::new("builtin", "", "test"),
            "Test",
            PluginKind::AudioEffect,
        )
        .port(PortDescriptor::control_input("gain", PortHint::new(0.0, 2.0, 1.0)))
        .port(PortDescriptor::audio_input("in"))
        .port(PortDescriptor::audio_output("out"))
        .port(PortDescriptor::control_output("latency"))
        .program(0, 3, "Loud");

        assert_eq!(desc.audio_inputs(), 1);
        assert_eq!(desc.audio_outputs(), 1);
        assert_eq!(desc.control_inputs().collect::<Vec<_>>(), vec![0]);
        assert_eq!(desc.port_by_name("latency"), Some(3));
        assert!(desc.has_program(0, 3));
        assert!(!desc.has_program(1, 3));
    }
}
