//! Shared in-memory cache for small files.
//!
//! Files below the small-file threshold are decoded once and read directly by
//! every playback that needs them. Entries are reference counted per
//! acquisition and evicted when the last playback releases them.

use crate::audio_file::AudioFile;
use crate::decoder::decode_all;
use crate::Result;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Fully decoded audio in a fixed target layout.
#[derive(Debug)]
pub struct DecodedAudio {
    channels: Vec<Vec<f32>>,
    frames: usize,
}

impl DecodedAudio {
    pub fn new(channels: Vec<Vec<f32>>) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        Self { channels, frames }
    }

    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel(&self, c: usize) -> &[f32] {
        &self.channels[c][..self.frames]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: PathBuf,
    channels: usize,
    sample_rate: u32,
}

struct CacheEntry {
    audio: Arc<DecodedAudio>,
    refs: usize,
}

/// Reference-counted cache of decoded small files.
#[derive(Default)]
pub struct SmallFileCache {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl SmallFileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoded content of `file` in the given layout, decoding it on first use.
    /// Every successful call must be paired with a [`release`](Self::release).
    pub fn acquire(
        &self,
        file: &AudioFile,
        channels: usize,
        sample_rate: u32,
    ) -> Result<Arc<DecodedAudio>> {
        let key = CacheKey {
            path: file.path().to_path_buf(),
            channels,
            sample_rate,
        };
        if let Some(mut entry) = self.entries.get_mut(&key) {
            entry.refs += 1;
            return Ok(Arc::clone(&entry.audio));
        }

        // Decoded outside the map lock; a racing acquire may decode the same
        // file twice, in which case the first insert wins.
        let audio = Arc::new(DecodedAudio::new(decode_all(file, channels, sample_rate)?));
        tracing::debug!(
            "Cached small file {} ({} frames)",
            file.path().display(),
            audio.frames()
        );
        let mut entry = self.entries.entry(key).or_insert(CacheEntry { audio, refs: 0 });
        entry.refs += 1;
        Ok(Arc::clone(&entry.audio))
    }

    /// Drop one reference taken by [`acquire`](Self::acquire).
    pub fn release(&self, file: &AudioFile, channels: usize, sample_rate: u32) {
        let key = CacheKey {
            path: file.path().to_path_buf(),
            channels,
            sample_rate,
        };
        self.entries.remove_if_mut(&key, |_, entry| {
            entry.refs = entry.refs.saturating_sub(1);
            entry.refs == 0
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_file::AudioFileId;

    fn small_file(dir: &std::path::Path) -> AudioFile {
        let path = dir.join("click.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..64 {
            writer.write_sample(i as f32 / 64.0).unwrap();
        }
        writer.finalize().unwrap();
        AudioFile::open(AudioFileId(3), &path).unwrap()
    }

    #[test]
    fn test_shared_until_last_release() {
        let dir = tempfile::tempdir().unwrap();
        let file = small_file(dir.path());
        let cache = SmallFileCache::new();

        let a = cache.acquire(&file, 2, 48_000).unwrap();
        let b = cache.acquire(&file, 2, 48_000).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.channels(), 2);
        assert_eq!(a.frames(), 64);
        assert_eq!(a.channel(0), a.channel(1));
        assert_eq!(cache.len(), 1);

        cache.release(&file, 2, 48_000);
        assert_eq!(cache.len(), 1);
        cache.release(&file, 2, 48_000);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_layouts_are_cached_separately() {
        let dir = tempfile::tempdir().unwrap();
        let file = small_file(dir.path());
        let cache = SmallFileCache::new();

        let stereo = cache.acquire(&file, 2, 48_000).unwrap();
        let mono = cache.acquire(&file, 1, 48_000).unwrap();
        assert!(!Arc::ptr_eq(&stereo, &mono));
        assert_eq!(cache.len(), 2);
    }
}
