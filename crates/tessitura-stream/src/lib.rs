//! Disk streaming for the tessitura audio engine.
//!
//! # Primary API
//!
//! - [`AudioFile`]: header of a file on disk
//! - [`PlayableAudioFile`]: one scheduled playback, fed by the file reader
//!   through pooled rings or from the [`SmallFileCache`]
//! - [`AudioPlayQueue`]: playbacks indexed by instrument and start second
//! - [`RecordableAudioFile`]: input being captured to disk
//! - [`FileReader`] / [`FileWriter`]: the disk worker threads

pub mod error;
pub use error::{Error, Result};

pub mod audio_file;
pub use audio_file::{AudioFile, AudioFileId, SampleEncoding};

pub mod cache;
pub use cache::{DecodedAudio, SmallFileCache};

pub mod decoder;
pub use decoder::{decode_all, map_frame, StreamDecoder};

pub mod fade;
pub use fade::{FadeEnvelope, FADE_FRAMES};

pub mod playable;
pub use playable::{FileState, PlayableAudioFile, StreamContext};

pub mod queue;
pub use queue::AudioPlayQueue;

pub mod recordable;
pub use recordable::{RecordState, RecordableAudioFile};

pub mod workers;
pub use workers::{FileReader, FileWriter, RecordSlots, SharedPlayQueue};
