//! Instrument and buss identifiers, and their dense mixer indices.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// First id of the audio-input instruments.
pub const AUDIO_INSTRUMENT_BASE: u32 = 1000;
/// First id of the soft-synth instruments.
pub const SYNTH_INSTRUMENT_BASE: u32 = 10000;

/// Identifier of an instrument as the rest of the application knows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentId(pub u32);

impl InstrumentId {
    pub fn audio(n: u32) -> Self {
        Self(AUDIO_INSTRUMENT_BASE + n)
    }

    pub fn synth(n: u32) -> Self {
        Self(SYNTH_INSTRUMENT_BASE + n)
    }
}

impl std::fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "instrument {}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentKind {
    /// Plays audio files and live input.
    Audio,
    /// Driven by a synthesizer plugin.
    Synth,
}

/// Identifier of a submix buss. Buss 0 is the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BussId(pub u32);

impl BussId {
    pub const MASTER: BussId = BussId(0);

    pub fn is_master(&self) -> bool {
        self.0 == 0
    }
}

/// Where an instrument's output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputTarget {
    /// Straight into the master sum.
    #[default]
    Master,
    Buss(BussId),
}

/// Fixed mapping between instrument ids and dense mixer indices.
///
/// Audio instruments occupy indices `0..audio`, synth instruments
/// `audio..audio + synth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentLayout {
    audio: usize,
    synth: usize,
}

impl InstrumentLayout {
    pub fn new(audio: usize, synth: usize) -> Self {
        Self { audio, synth }
    }

    pub fn len(&self) -> usize {
        self.audio + self.synth
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index_of(&self, id: InstrumentId) -> Option<usize> {
        if id.0 >= SYNTH_INSTRUMENT_BASE {
            let n = (id.0 - SYNTH_INSTRUMENT_BASE) as usize;
            (n < self.synth).then_some(self.audio + n)
        } else if id.0 >= AUDIO_INSTRUMENT_BASE {
            let n = (id.0 - AUDIO_INSTRUMENT_BASE) as usize;
            (n < self.audio).then_some(n)
        } else {
            None
        }
    }

    /// Like [`index_of`](Self::index_of) but an unknown id is an error.
    pub fn require(&self, id: InstrumentId) -> Result<usize> {
        self.index_of(id).ok_or(Error::UnknownInstrument(id.0))
    }

    pub fn id_at(&self, index: usize) -> Option<InstrumentId> {
        if index < self.audio {
            Some(InstrumentId::audio(index as u32))
        } else if index < self.len() {
            Some(InstrumentId::synth((index - self.audio) as u32))
        } else {
            None
        }
    }

    pub fn kind_of(&self, index: usize) -> Option<InstrumentKind> {
        if index < self.audio {
            Some(InstrumentKind::Audio)
        } else if index < self.len() {
            Some(InstrumentKind::Synth)
        } else {
            None
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = InstrumentId> + '_ {
        (0..self.len()).filter_map(|i| self.id_at(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_mapping() {
        let layout = InstrumentLayout::new(3, 2);
        assert_eq!(layout.len(), 5);
        assert_eq!(layout.index_of(InstrumentId(1000)), Some(0));
        assert_eq!(layout.index_of(InstrumentId(1002)), Some(2));
        assert_eq!(layout.index_of(InstrumentId(1003)), None);
        assert_eq!(layout.index_of(InstrumentId(10000)), Some(3));
        assert_eq!(layout.index_of(InstrumentId(10001)), Some(4));
        assert_eq!(layout.index_of(InstrumentId(10002)), None);
        assert_eq!(layout.index_of(InstrumentId(5)), None);

        for (i, id) in layout.ids().enumerate() {
            assert_eq!(layout.index_of(id), Some(i));
        }
        assert_eq!(layout.kind_of(3), Some(InstrumentKind::Synth));
        assert!(matches!(
            layout.require(InstrumentId(42)),
            Err(Error::UnknownInstrument(42))
        ));
    }
}
