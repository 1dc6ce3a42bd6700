//! One scheduled playback of one audio file.
//!
//! A [`PlayableAudioFile`] is filled by the file reader thread and drained by
//! the instrument mixer. Large files stream through per-channel rings
//! borrowed from the [`RingBufferPool`]; small files are decoded once into the
//! [`SmallFileCache`] and read straight from memory.
//!
//! Lifecycle: `Unbuffered` until the first [`fill_buffers`], `Buffered` once
//! the rings hold their first block, `Updating` while [`update_buffers`] tops
//! them up, `Ended` once the source or the scheduled duration is exhausted.
//! Borrowed rings go back to the pool when the playback is dropped.
//!
//! [`fill_buffers`]: PlayableAudioFile::fill_buffers
//! [`update_buffers`]: PlayableAudioFile::update_buffers

use crate::audio_file::AudioFile;
use crate::cache::{DecodedAudio, SmallFileCache};
use crate::decoder::StreamDecoder;
use crate::fade::FadeEnvelope;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tessitura_core::{duration_to_frames, InstrumentId, RingBufferPool, SampleRing};

/// Where a playback is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileState {
    Unbuffered = 0,
    Buffered = 1,
    Updating = 2,
    Ended = 3,
}

impl FileState {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => FileState::Buffered,
            2 => FileState::Updating,
            3 => FileState::Ended,
            _ => FileState::Unbuffered,
        }
    }
}

/// Resources and settings shared by every playback.
pub struct StreamContext {
    pub pool: Arc<RingBufferPool>,
    pub cache: Arc<SmallFileCache>,
    /// Engine sample rate: every playback is decoded to it.
    pub sample_rate: u32,
    /// Frames decoded per step while topping up.
    pub read_block: usize,
    /// Files smaller than this (in bytes) are played from memory.
    pub small_file_threshold: u64,
}

impl StreamContext {
    pub fn new(pool: Arc<RingBufferPool>, sample_rate: u32) -> Self {
        Self {
            pool,
            cache: Arc::new(SmallFileCache::new()),
            sample_rate,
            read_block: 4096,
            small_file_threshold: 0,
        }
    }

    pub fn with_cache(mut self, cache: Arc<SmallFileCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn read_block(mut self, frames: usize) -> Self {
        self.read_block = frames.max(1);
        self
    }

    pub fn small_file_threshold(mut self, bytes: u64) -> Self {
        self.small_file_threshold = bytes;
        self
    }
}

struct WriterState {
    decoder: Option<StreamDecoder>,
    scratch: Vec<Vec<f32>>,
    written: u64,
}

/// A scheduled playback of an audio file on one instrument.
pub struct PlayableAudioFile {
    ctx: Arc<StreamContext>,
    file: Arc<AudioFile>,
    instrument: InstrumentId,
    start: Duration,
    source_offset: Duration,
    duration: Duration,
    target_channels: usize,
    small: bool,
    play_frames: u64,
    envelope: FadeEnvelope,
    state: AtomicU8,
    consumed: AtomicU64,
    rings: OnceLock<Vec<Arc<SampleRing>>>,
    cached: OnceLock<Arc<DecodedAudio>>,
    writer: Mutex<WriterState>,
}

impl PlayableAudioFile {
    /// Play `duration` of `file`, starting `source_offset` into it, at
    /// `start` on the timeline.
    pub fn new(
        ctx: Arc<StreamContext>,
        file: Arc<AudioFile>,
        instrument: InstrumentId,
        start: Duration,
        source_offset: Duration,
        duration: Duration,
        target_channels: usize,
    ) -> Self {
        let rate = ctx.sample_rate;
        let offset_source_frames = duration_to_frames(source_offset, file.sample_rate());
        let source_left = file.frames().saturating_sub(offset_source_frames);
        let source_left_frames = (source_left as u128 * rate as u128)
            .div_ceil(file.sample_rate().max(1) as u128) as u64;
        let play_frames = duration_to_frames(duration, rate).min(source_left_frames);
        let target_channels = target_channels.max(1);
        let small = file.byte_size() < ctx.small_file_threshold;

        Self {
            envelope: FadeEnvelope::new(play_frames, 0, 0),
            ctx,
            file,
            instrument,
            start,
            source_offset,
            duration,
            target_channels,
            small,
            play_frames,
            state: AtomicU8::new(FileState::Unbuffered as u8),
            consumed: AtomicU64::new(0),
            rings: OnceLock::new(),
            cached: OnceLock::new(),
            writer: Mutex::new(WriterState {
                decoder: None,
                scratch: vec![Vec::new(); target_channels],
                written: 0,
            }),
        }
    }

    /// Fade in and out over the given times (at least the short boundary
    /// fade).
    pub fn with_fades(mut self, fade_in: Duration, fade_out: Duration) -> Self {
        let rate = self.ctx.sample_rate;
        self.envelope = FadeEnvelope::new(
            self.play_frames,
            duration_to_frames(fade_in, rate),
            duration_to_frames(fade_out, rate),
        );
        self
    }

    pub fn file(&self) -> &Arc<AudioFile> {
        &self.file
    }

    pub fn instrument(&self) -> InstrumentId {
        self.instrument
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn end(&self) -> Duration {
        self.start + self.duration
    }

    pub fn source_offset(&self) -> Duration {
        self.source_offset
    }

    pub fn target_channels(&self) -> usize {
        self.target_channels
    }

    pub fn is_small(&self) -> bool {
        self.small
    }

    /// Frames this playback will produce in total.
    pub fn play_frames(&self) -> u64 {
        self.play_frames
    }

    /// Timeline position of the first frame, in engine frames.
    pub fn start_frame(&self) -> u64 {
        duration_to_frames(self.start, self.ctx.sample_rate)
    }

    pub fn state(&self) -> FileState {
        FileState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: FileState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Frames already handed to the mixer.
    pub fn frames_consumed(&self) -> u64 {
        self.consumed.load(Ordering::Acquire)
    }

    /// Everything this playback will ever produce is already readable.
    pub fn is_fully_buffered(&self) -> bool {
        if self.small {
            self.cached.get().is_some()
        } else {
            self.state() == FileState::Ended
        }
    }

    /// Fully buffered and fully consumed.
    pub fn is_finished(&self) -> bool {
        self.is_fully_buffered() && self.available_frames() == 0
    }

    /// Frames `add_samples` could deliver right now. Real-time safe.
    pub fn available_frames(&self) -> usize {
        let pos = self.consumed.load(Ordering::Acquire);
        if self.small {
            return match self.cached.get() {
                Some(audio) => self.cached_frames_left(audio, pos) as usize,
                None => 0,
            };
        }
        match self.rings.get() {
            Some(rings) => rings.iter().map(|r| r.read_space(0)).min().unwrap_or(0),
            None => 0,
        }
    }

    fn cache_offset(&self) -> u64 {
        duration_to_frames(self.source_offset, self.ctx.sample_rate)
    }

    fn cached_frames_left(&self, audio: &DecodedAudio, pos: u64) -> u64 {
        let in_data = (audio.frames() as u64).saturating_sub(self.cache_offset() + pos);
        in_data.min(self.play_frames.saturating_sub(pos))
    }

    /// Add up to `frames` frames into `dest[c][offset..]` for the first
    /// `channels` channels. Returns the frames transferred; fewer than
    /// requested means starvation unless the file is fully buffered.
    ///
    /// Real-time safe: never blocks or allocates.
    pub fn add_samples(
        &self,
        dest: &mut [Vec<f32>],
        channels: usize,
        frames: usize,
        offset: usize,
    ) -> usize {
        let channels = channels.min(dest.len());
        let frames = dest[..channels]
            .iter()
            .map(|d| d.len().saturating_sub(offset))
            .fold(frames, usize::min);
        if frames == 0 {
            return 0;
        }
        let pos = self.consumed.load(Ordering::Acquire);

        let n = if self.small {
            let Some(audio) = self.cached.get() else {
                return 0;
            };
            let n = (frames as u64).min(self.cached_frames_left(audio, pos)) as usize;
            let base = (self.cache_offset() + pos) as usize;
            for c in 0..channels {
                let src = audio.channel(c % audio.channels());
                let dst = &mut dest[c][offset..offset + n];
                for (i, (d, s)) in dst.iter_mut().zip(&src[base..base + n]).enumerate() {
                    *d += s * self.envelope.gain(pos + i as u64);
                }
            }
            n
        } else {
            let Some(rings) = self.rings.get() else {
                return 0;
            };
            let n = rings
                .iter()
                .map(|r| r.read_space(0))
                .fold(frames, usize::min);
            for (c, ring) in rings.iter().enumerate() {
                if c < channels {
                    ring.read_adding(&mut dest[c][offset..offset + n], 0);
                } else {
                    ring.skip(n, 0);
                }
            }
            n
        };

        self.consumed.store(pos + n as u64, Ordering::Release);
        n
    }

    /// First fill: position the decoder at the source offset, borrow rings
    /// from the pool and decode the first block. Small files are decoded into
    /// the cache instead. A no-op once buffered.
    pub fn fill_buffers(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        if self.state() != FileState::Unbuffered {
            return Ok(());
        }

        if self.small {
            let audio =
                self.ctx
                    .cache
                    .acquire(&self.file, self.target_channels, self.ctx.sample_rate)?;
            if self.cached.set(audio).is_err() {
                self.ctx
                    .cache
                    .release(&self.file, self.target_channels, self.ctx.sample_rate);
            }
            self.set_state(FileState::Buffered);
            return Ok(());
        }

        let start_frame = duration_to_frames(self.source_offset, self.file.sample_rate());
        let decoder = StreamDecoder::open(
            &self.file,
            start_frame,
            self.target_channels,
            self.ctx.sample_rate,
        )?;
        let rings = self
            .ctx
            .pool
            .get_buffers(self.target_channels)
            .ok_or(Error::PoolExhausted {
                needed: self.target_channels,
            })?;
        if let Err(rings) = self.rings.set(rings) {
            for ring in rings {
                self.ctx.pool.return_buffer(ring);
            }
        }
        writer.decoder = Some(decoder);
        self.set_state(FileState::Buffered);
        self.top_up(&mut writer)?;
        Ok(())
    }

    /// Top the rings up from the decoder. Returns frames written.
    pub fn update_buffers(&self) -> Result<usize> {
        let mut writer = self.writer.lock();
        match self.state() {
            FileState::Unbuffered | FileState::Ended => Ok(0),
            FileState::Buffered | FileState::Updating => {
                if self.small {
                    return Ok(0);
                }
                self.set_state(FileState::Updating);
                self.top_up(&mut writer)
            }
        }
    }

    fn top_up(&self, writer: &mut WriterState) -> Result<usize> {
        let Some(rings) = self.rings.get() else {
            return Ok(0);
        };
        let WriterState {
            decoder,
            scratch,
            written,
        } = writer;
        let Some(dec) = decoder.as_mut() else {
            return Ok(0);
        };

        let mut total = 0;
        loop {
            let left = self.play_frames.saturating_sub(*written);
            if left == 0 {
                self.finish(decoder);
                break;
            }
            let space = rings.iter().map(|r| r.write_space()).min().unwrap_or(0);
            let n = (space as u64).min(left).min(self.ctx.read_block as u64) as usize;
            if n == 0 {
                break;
            }
            let got = dec.read(n, scratch)?;
            if got == 0 {
                self.finish(decoder);
                break;
            }
            for (ring, channel) in rings.iter().zip(scratch.iter_mut()) {
                self.envelope.apply(*written, &mut channel[..got]);
                ring.write(&channel[..got]);
            }
            *written += got as u64;
            total += got;
        }
        Ok(total)
    }

    fn finish(&self, decoder: &mut Option<StreamDecoder>) {
        *decoder = None;
        self.set_state(FileState::Ended);
    }
}

impl Drop for PlayableAudioFile {
    fn drop(&mut self) {
        if let Some(rings) = self.rings.take() {
            for ring in rings {
                self.ctx.pool.return_buffer(ring);
            }
        }
        if self.cached.take().is_some() {
            self.ctx
                .cache
                .release(&self.file, self.target_channels, self.ctx.sample_rate);
        }
    }
}

impl std::fmt::Debug for PlayableAudioFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayableAudioFile")
            .field("file", &self.file.id())
            .field("instrument", &self.instrument)
            .field("start", &self.start)
            .field("duration", &self.duration)
            .field("state", &self.state())
            .finish()
    }
}
