//! Audio file headers.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Identifier the application uses for an audio file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AudioFileId(pub u32);

impl std::fmt::Display for AudioFileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "audio file {}", self.0)
    }
}

/// Sample encoding of a file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleEncoding {
    Int { bits: u16 },
    Float,
}

/// Header of a WAV file: everything known without decoding it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFile {
    id: AudioFileId,
    path: PathBuf,
    channels: u16,
    sample_rate: u32,
    frames: u64,
    encoding: SampleEncoding,
    byte_size: u64,
}

impl AudioFile {
    /// Read the header of the file at `path`.
    pub fn open(id: AudioFileId, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let encoding = match spec.sample_format {
            hound::SampleFormat::Float if spec.bits_per_sample == 32 => SampleEncoding::Float,
            hound::SampleFormat::Int if (8..=32).contains(&spec.bits_per_sample) => {
                SampleEncoding::Int {
                    bits: spec.bits_per_sample,
                }
            }
            format => {
                return Err(Error::UnsupportedFormat(format!(
                    "{:?} with {} bits per sample",
                    format, spec.bits_per_sample
                )))
            }
        };
        if spec.channels == 0 {
            return Err(Error::UnsupportedFormat("zero channels".into()));
        }
        let byte_size = std::fs::metadata(path)?.len();

        Ok(Self {
            id,
            path: path.to_path_buf(),
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            frames: reader.duration() as u64,
            encoding,
            byte_size,
        })
    }

    /// Header from already-known values, without touching the disk.
    pub fn from_parts(
        id: AudioFileId,
        path: impl Into<PathBuf>,
        channels: u16,
        sample_rate: u32,
        frames: u64,
        byte_size: u64,
    ) -> Self {
        Self {
            id,
            path: path.into(),
            channels,
            sample_rate,
            frames,
            encoding: SampleEncoding::Float,
            byte_size,
        }
    }

    pub fn id(&self) -> AudioFileId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn channels(&self) -> usize {
        self.channels as usize
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length in frames at the file's own rate.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    /// Size of the file on disk.
    pub fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub fn duration(&self) -> Duration {
        tessitura_core::frames_to_duration(self.frames, self.sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_reads_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..441 {
            writer.write_sample(1000i16).unwrap();
            writer.write_sample(-1000i16).unwrap();
        }
        writer.finalize().unwrap();

        let file = AudioFile::open(AudioFileId(7), &path).unwrap();
        assert_eq!(file.id(), AudioFileId(7));
        assert_eq!(file.channels(), 2);
        assert_eq!(file.sample_rate(), 44_100);
        assert_eq!(file.frames(), 441);
        assert_eq!(file.encoding(), SampleEncoding::Int { bits: 16 });
        assert_eq!(file.duration(), Duration::from_millis(10));
        assert!(file.byte_size() > 441 * 4);
    }

    #[test]
    fn test_missing_file() {
        let err = AudioFile::open(AudioFileId(1), "/nonexistent/file.wav").unwrap_err();
        assert!(matches!(err, Error::FileNotFound(_)));
    }
}
