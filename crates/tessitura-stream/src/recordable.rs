//! Recording to disk.
//!
//! The real-time callback pushes input into per-channel rings; the file
//! writer thread drains them into a 32-bit float WAV file. Closing is
//! two-phase: [`close`](RecordableAudioFile::close) only marks the file, and
//! the writer finalizes it once no push is in flight and the rings are
//! drained.

use crate::audio_file::AudioFileId;
use crate::Result;
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use tessitura_core::{InstrumentId, SampleRing};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordState {
    Recording = 0,
    /// Closed by the control thread; the writer is draining what is left.
    Closing = 1,
    Closed = 2,
    /// Writing failed; the file is abandoned.
    Failed = 3,
}

impl RecordState {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => RecordState::Closing,
            2 => RecordState::Closed,
            3 => RecordState::Failed,
            _ => RecordState::Recording,
        }
    }
}

struct WriterState {
    wav: Option<WavWriter<BufWriter<File>>>,
    scratch: Vec<Vec<f32>>,
}

/// A file being recorded from one instrument's input.
pub struct RecordableAudioFile {
    id: AudioFileId,
    path: PathBuf,
    instrument: InstrumentId,
    channels: usize,
    sample_rate: u32,
    rings: Vec<SampleRing>,
    state: AtomicU8,
    /// Set by the callback for the length of one push.
    pushing: AtomicBool,
    frames_written: AtomicU64,
    writer: Mutex<WriterState>,
}

impl RecordableAudioFile {
    /// Create the file on disk and the rings that feed it.
    pub fn create(
        id: AudioFileId,
        path: impl AsRef<Path>,
        instrument: InstrumentId,
        channels: usize,
        sample_rate: u32,
        ring_frames: usize,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let channels = channels.clamp(1, 2);
        let spec = WavSpec {
            channels: channels as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let wav = WavWriter::new(BufWriter::new(File::create(&path)?), spec)?;
        tracing::info!("Recording {} to {}", id, path.display());

        Ok(Self {
            id,
            path,
            instrument,
            channels,
            sample_rate,
            rings: (0..channels).map(|_| SampleRing::new(ring_frames)).collect(),
            state: AtomicU8::new(RecordState::Recording as u8),
            pushing: AtomicBool::new(false),
            frames_written: AtomicU64::new(0),
            writer: Mutex::new(WriterState {
                wav: Some(wav),
                scratch: vec![vec![0.0; ring_frames]; channels],
            }),
        })
    }

    pub fn id(&self) -> AudioFileId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn instrument(&self) -> InstrumentId {
        self.instrument
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn state(&self) -> RecordState {
        RecordState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecordState::Recording
    }

    /// Finalized or abandoned: nothing more will be written.
    pub fn is_done(&self) -> bool {
        matches!(self.state(), RecordState::Closed | RecordState::Failed)
    }

    /// Frames already on disk.
    pub fn frames_written(&self) -> u64 {
        self.frames_written.load(Ordering::Relaxed)
    }

    /// Push one block of input. Real-time safe. `inputs` holds one slice per
    /// input channel; a mono file records the first. Returns `false` when the
    /// rings could not take the whole block (disk overrun).
    pub fn add_samples(&self, inputs: &[&[f32]], frames: usize) -> bool {
        if inputs.is_empty() {
            return true;
        }
        // Announce the push before looking at the state, so a writer that
        // sees the file closing also sees this push.
        self.pushing.store(true, Ordering::SeqCst);
        if self.state.load(Ordering::SeqCst) != RecordState::Recording as u8 {
            self.pushing.store(false, Ordering::Release);
            return true;
        }
        let space = self.rings.iter().map(|r| r.write_space()).min().unwrap_or(0);
        let n = frames.min(space);
        for (c, ring) in self.rings.iter().enumerate() {
            let input = inputs[c.min(inputs.len() - 1)];
            ring.write(&input[..n.min(input.len())]);
        }
        self.pushing.store(false, Ordering::Release);
        n == frames
    }

    /// Stop accepting input. The writer finalizes the file once drained.
    pub fn close(&self) {
        let _ = self.state.compare_exchange(
            RecordState::Recording as u8,
            RecordState::Closing as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Drain the rings to disk, finalizing the file when it is closing.
    /// Returns frames written.
    pub fn update(&self) -> Result<usize> {
        let mut writer = self.writer.lock();
        let WriterState { wav, scratch } = &mut *writer;
        let Some(out) = wav.as_mut() else {
            return Ok(0);
        };

        let closing = self.state() == RecordState::Closing;
        let mut n = match self.drain(out, scratch) {
            Ok(n) => n,
            Err(e) => {
                self.state.store(RecordState::Failed as u8, Ordering::Release);
                *wav = None;
                return Err(e);
            }
        };

        // A push that began before the close may still be writing; wait for
        // the next pass. Otherwise whatever it wrote is visible now.
        if closing && !self.pushing.load(Ordering::SeqCst) {
            match self.drain(out, scratch) {
                Ok(tail) => n += tail,
                Err(e) => {
                    self.state.store(RecordState::Failed as u8, Ordering::Release);
                    *wav = None;
                    return Err(e);
                }
            }
            if let Some(out) = wav.take() {
                out.finalize()?;
            }
            self.state.store(RecordState::Closed as u8, Ordering::Release);
            tracing::info!(
                "Closed record file {} ({} frames)",
                self.path.display(),
                self.frames_written()
            );
        }
        Ok(n)
    }

    /// Write everything the rings hold.
    fn drain(
        &self,
        out: &mut WavWriter<BufWriter<File>>,
        scratch: &mut [Vec<f32>],
    ) -> Result<usize> {
        let mut total = 0;
        loop {
            let available = self.rings.iter().map(|r| r.read_space(0)).min().unwrap_or(0);
            if available == 0 {
                return Ok(total);
            }
            let mut n = 0;
            for (ring, buf) in self.rings.iter().zip(scratch.iter_mut()) {
                n = ring.read(&mut buf[..available], 0);
            }
            if n == 0 {
                return Ok(total);
            }
            for i in 0..n {
                for channel in scratch.iter() {
                    out.write_sample(channel[i])?;
                }
            }
            self.frames_written.fetch_add(n as u64, Ordering::Relaxed);
            total += n;
        }
    }
}

impl std::fmt::Debug for RecordableAudioFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordableAudioFile")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_close_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let file =
            RecordableAudioFile::create(AudioFileId(9), &path, InstrumentId::audio(0), 2, 48_000, 256)
                .unwrap();

        let left = [0.25f32; 64];
        let right = [-0.25f32; 64];
        for _ in 0..3 {
            assert!(file.add_samples(&[&left[..], &right[..]], 64));
        }
        assert_eq!(file.update().unwrap(), 192);

        file.add_samples(&[&left[..], &right[..]], 64);
        file.close();
        // Closed files accept nothing more.
        file.add_samples(&[&left[..], &right[..]], 64);
        assert_eq!(file.state(), RecordState::Closing);

        file.update().unwrap();
        file.update().unwrap();
        assert_eq!(file.state(), RecordState::Closed);
        assert!(file.is_done());
        assert_eq!(file.frames_written(), 256);

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 256);
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples[0], 0.25);
        assert_eq!(samples[1], -0.25);
    }

    #[test]
    fn test_close_writes_everything_pushed_before_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.wav");
        let file =
            RecordableAudioFile::create(AudioFileId(2), &path, InstrumentId::audio(0), 1, 48_000, 512)
                .unwrap();

        let block = [0.5f32; 64];
        for _ in 0..4 {
            assert!(file.add_samples(&[&block[..]], 64));
        }
        file.close();

        // One pass drains the tail and finalizes.
        assert_eq!(file.update().unwrap(), 256);
        assert_eq!(file.state(), RecordState::Closed);
        assert_eq!(hound::WavReader::open(&path).unwrap().duration(), 256);
    }

    #[test]
    fn test_push_in_flight_at_close_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.wav");
        let file =
            RecordableAudioFile::create(AudioFileId(3), &path, InstrumentId::audio(0), 1, 48_000, 512)
                .unwrap();
        let block = [0.5f32; 64];
        assert!(file.add_samples(&[&block[..]], 64));

        // The callback passed its state check, then the control thread closed.
        file.pushing.store(true, Ordering::SeqCst);
        file.close();
        assert_eq!(file.update().unwrap(), 64);
        assert_eq!(file.state(), RecordState::Closing);

        // The push lands after the writer's first pass.
        file.rings[0].write(&[0.75f32; 32]);
        file.pushing.store(false, Ordering::Release);

        assert_eq!(file.update().unwrap(), 32);
        assert_eq!(file.state(), RecordState::Closed);
        assert_eq!(file.frames_written(), 96);

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 96);
        assert_eq!(samples[95], 0.75);
    }

    #[test]
    fn test_overrun_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = RecordableAudioFile::create(
            AudioFileId(1),
            dir.path().join("over.wav"),
            InstrumentId::audio(0),
            1,
            48_000,
            100,
        )
        .unwrap();
        let block = [0.1f32; 64];
        assert!(file.add_samples(&[&block[..]], 64));
        assert!(!file.add_samples(&[&block[..]], 64));
    }
}
