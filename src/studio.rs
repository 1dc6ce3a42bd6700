//! Control-surface descriptions consumed by the driver.
//!
//! [`StudioConfig`] is the mixer-facing snapshot of the document: which
//! instruments and busses exist, their levels and connections, and which
//! plugins sit where. [`ScheduledAudio`] describes one audio segment on the
//! timeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tessitura_core::{BussId, InstrumentId, OutputTarget};
use tessitura_plugin::PluginIdentifier;
use tessitura_stream::AudioFileId;

/// Identifies one scheduled or previewed playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "event {}", self.0)
    }
}

/// A plugin to load into a slot, with its initial settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub identifier: PluginIdentifier,
    #[serde(default)]
    pub bypass: bool,
    /// `(bank, program)` to select after loading.
    #[serde(default)]
    pub program: Option<(u32, u32)>,
    /// `(port index, value)` pairs.
    #[serde(default)]
    pub ports: Vec<(usize, f32)>,
}

impl PluginConfig {
    pub fn new(identifier: PluginIdentifier) -> Self {
        Self {
            identifier,
            bypass: false,
            program: None,
            ports: Vec::new(),
        }
    }

    pub fn port(mut self, port: usize, value: f32) -> Self {
        self.ports.push((port, value));
        self
    }

    pub fn bypass(mut self, bypass: bool) -> Self {
        self.bypass = bypass;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentConfig {
    pub id: InstrumentId,
    /// 1 (mono) or 2 (stereo).
    pub channels: usize,
    /// Level in dB.
    pub level: f32,
    /// -1.0 (left) to 1.0 (right).
    pub pan: f32,
    pub muted: bool,
    pub solo: bool,
    pub output: OutputTarget,
    /// Synth instruments only.
    pub synth: Option<PluginConfig>,
    /// Indexed by effect slot; `None` leaves a slot empty.
    pub effects: Vec<Option<PluginConfig>>,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            id: InstrumentId::audio(0),
            channels: 2,
            level: 0.0,
            pan: 0.0,
            muted: false,
            solo: false,
            output: OutputTarget::Master,
            synth: None,
            effects: Vec::new(),
        }
    }
}

impl InstrumentConfig {
    pub fn new(id: InstrumentId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BussConfig {
    pub id: BussId,
    pub level: f32,
    pub pan: f32,
    pub effects: Vec<Option<PluginConfig>>,
}

impl Default for BussConfig {
    fn default() -> Self {
        Self {
            id: BussId(1),
            level: 0.0,
            pan: 0.0,
            effects: Vec::new(),
        }
    }
}

impl BussConfig {
    pub fn new(id: BussId) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }
}

/// Mixer-facing snapshot of the studio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub instruments: Vec<InstrumentConfig>,
    pub busses: Vec<BussConfig>,
    /// Master level in dB.
    pub master_level: f32,
}

impl StudioConfig {
    pub fn instrument(&self, id: InstrumentId) -> Option<&InstrumentConfig> {
        self.instruments.iter().find(|i| i.id == id)
    }

    pub fn buss(&self, id: BussId) -> Option<&BussConfig> {
        self.busses.iter().find(|b| b.id == id)
    }

    /// Muted instruments, and every unsoloed one while anything is soloed,
    /// are silent.
    pub fn is_muted(&self, id: InstrumentId) -> bool {
        let soloing = self.instruments.iter().any(|i| i.solo);
        self.instrument(id)
            .is_some_and(|i| i.muted || (soloing && !i.solo))
    }
}

/// One audio segment on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledAudio {
    pub event: EventId,
    pub file: AudioFileId,
    pub instrument: InstrumentId,
    /// Timeline position of the first frame.
    pub start: Duration,
    /// Offset into the file.
    #[serde(default)]
    pub source_offset: Duration,
    pub duration: Duration,
    #[serde(default)]
    pub fade_in: Duration,
    #[serde(default)]
    pub fade_out: Duration,
}

impl ScheduledAudio {
    pub fn new(
        event: EventId,
        file: AudioFileId,
        instrument: InstrumentId,
        start: Duration,
        duration: Duration,
    ) -> Self {
        Self {
            event,
            file,
            instrument,
            start,
            source_offset: Duration::ZERO,
            duration,
            fade_in: Duration::ZERO,
            fade_out: Duration::ZERO,
        }
    }

    pub fn source_offset(mut self, offset: Duration) -> Self {
        self.source_offset = offset;
        self
    }

    pub fn fades(mut self, fade_in: Duration, fade_out: Duration) -> Self {
        self.fade_in = fade_in;
        self.fade_out = fade_out;
        self
    }
}
