//! Streaming WAV decoder with channel mapping and sample-rate conversion.
//!
//! Channel and rate mismatches between a file and its playback target are
//! resolved here, at decode time, so the mixing path only ever sees samples in
//! the target layout.

use crate::audio_file::{AudioFile, SampleEncoding};
use crate::Result;
use hound::WavReader;
use rubato::{FftFixedIn, Resampler};
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufReader;

/// Source frames decoded per step when no resampling is needed.
const PASSTHROUGH_CHUNK: usize = 4096;
/// Resampler chunk size in source frames.
const RESAMPLE_CHUNK: usize = 1024;
const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Map one interleaved source frame onto `dst.len()` target channels.
///
/// Mono sources are duplicated, mono targets get the average of every source
/// channel, and otherwise channels map one to one (wrapping when the target
/// has more).
#[inline]
pub fn map_frame(src: &[f32], dst: &mut [f32]) {
    let src_channels = src.len();
    if src_channels == 0 {
        dst.fill(0.0);
        return;
    }
    if dst.len() == 1 && src_channels > 1 {
        dst[0] = src.iter().sum::<f32>() / src_channels as f32;
        return;
    }
    for (c, out) in dst.iter_mut().enumerate() {
        *out = src[c % src_channels];
    }
}

/// Sequential decoder for one playback of one file.
pub struct StreamDecoder {
    reader: WavReader<BufReader<File>>,
    encoding: SampleEncoding,
    source_channels: usize,
    target_channels: usize,
    resampler: Option<FftFixedIn<f32>>,
    interleaved: Vec<f32>,
    frame: Vec<f32>,
    mapped: Vec<Vec<f32>>,
    pending: Vec<VecDeque<f32>>,
    source_done: bool,
    /// Output frames still to emit (resampling only): trims flush padding.
    remaining_out: u64,
    /// Leading output frames to drop (resampler delay).
    skip_out: usize,
}

impl StreamDecoder {
    /// Open `file` positioned at `start_frame` (in the file's own rate).
    pub fn open(
        file: &AudioFile,
        start_frame: u64,
        target_channels: usize,
        target_rate: u32,
    ) -> Result<Self> {
        let mut reader = WavReader::open(file.path())?;
        let start_frame = start_frame.min(file.frames());
        reader.seek(start_frame.min(u32::MAX as u64) as u32)?;

        let target_channels = target_channels.max(1);
        let resampler = if file.sample_rate() != target_rate {
            Some(FftFixedIn::<f32>::new(
                file.sample_rate() as usize,
                target_rate as usize,
                RESAMPLE_CHUNK,
                RESAMPLE_SUB_CHUNKS,
                target_channels,
            )?)
        } else {
            None
        };

        let source_frames = file.frames() - start_frame;
        let remaining_out = (source_frames as u128 * target_rate as u128)
            .div_ceil(file.sample_rate().max(1) as u128) as u64;
        let skip_out = resampler.as_ref().map_or(0, |r| r.output_delay());

        Ok(Self {
            reader,
            encoding: file.encoding(),
            source_channels: file.channels(),
            target_channels,
            resampler,
            interleaved: Vec::new(),
            frame: vec![0.0; target_channels],
            mapped: vec![Vec::new(); target_channels],
            pending: vec![VecDeque::new(); target_channels],
            source_done: false,
            remaining_out,
            skip_out,
        })
    }

    pub fn target_channels(&self) -> usize {
        self.target_channels
    }

    /// Whether every frame has been handed out.
    pub fn is_finished(&self) -> bool {
        self.pending[0].is_empty() && self.source_exhausted()
    }

    fn source_exhausted(&self) -> bool {
        if self.resampler.is_some() {
            self.remaining_out == 0
        } else {
            self.source_done
        }
    }

    /// Decode up to `frames` frames into `out` (one vector per target
    /// channel, cleared first). Returns the number of frames decoded; zero
    /// means the source is exhausted.
    pub fn read(&mut self, frames: usize, out: &mut [Vec<f32>]) -> Result<usize> {
        while self.pending[0].len() < frames && !self.source_exhausted() {
            self.decode_chunk()?;
        }
        let n = frames.min(self.pending[0].len());
        for (c, dst) in out.iter_mut().enumerate().take(self.target_channels) {
            dst.clear();
            dst.extend(self.pending[c].drain(..n));
        }
        Ok(n)
    }

    /// Decode everything that is left.
    pub fn read_to_end(&mut self) -> Result<Vec<Vec<f32>>> {
        let mut all = vec![Vec::new(); self.target_channels];
        let mut chunk = vec![Vec::new(); self.target_channels];
        loop {
            let n = self.read(PASSTHROUGH_CHUNK, &mut chunk)?;
            if n == 0 {
                break;
            }
            for (dst, src) in all.iter_mut().zip(&chunk) {
                dst.extend_from_slice(src);
            }
        }
        Ok(all)
    }

    fn read_source(&mut self, frames: usize) -> Result<usize> {
        self.interleaved.clear();
        if self.source_done {
            return Ok(0);
        }
        let wanted = frames * self.source_channels;
        match self.encoding {
            SampleEncoding::Float => {
                for s in self.reader.samples::<f32>().take(wanted) {
                    self.interleaved.push(s?);
                }
            }
            SampleEncoding::Int { bits } => {
                let scale = 1.0 / (1u64 << (bits - 1)) as f32;
                for s in self.reader.samples::<i32>().take(wanted) {
                    self.interleaved.push(s? as f32 * scale);
                }
            }
        }
        let got = self.interleaved.len() / self.source_channels;
        if got < frames {
            self.source_done = true;
        }
        Ok(got)
    }

    fn decode_chunk(&mut self) -> Result<()> {
        let chunk = self
            .resampler
            .as_ref()
            .map_or(PASSTHROUGH_CHUNK, |r| r.input_frames_next());
        self.read_source(chunk)?;

        for mapped in &mut self.mapped {
            mapped.clear();
        }
        for src in self.interleaved.chunks_exact(self.source_channels) {
            map_frame(src, &mut self.frame);
            for (mapped, value) in self.mapped.iter_mut().zip(&self.frame) {
                mapped.push(*value);
            }
        }

        let Some(resampler) = self.resampler.as_mut() else {
            for (pending, mapped) in self.pending.iter_mut().zip(&self.mapped) {
                pending.extend(mapped.iter().copied());
            }
            return Ok(());
        };

        // Fixed-size input: pad the tail (and flush chunks) with silence.
        for mapped in &mut self.mapped {
            mapped.resize(chunk, 0.0);
        }
        let output = resampler.process(&self.mapped, None)?;
        let produced = output.first().map_or(0, Vec::len);
        let skip = self.skip_out.min(produced);
        self.skip_out -= skip;
        let keep = ((produced - skip) as u64).min(self.remaining_out) as usize;
        self.remaining_out -= keep as u64;
        for (pending, channel) in self.pending.iter_mut().zip(&output) {
            pending.extend(channel[skip..skip + keep].iter().copied());
        }
        Ok(())
    }
}

/// Decode a whole file into the target layout.
pub fn decode_all(
    file: &AudioFile,
    target_channels: usize,
    target_rate: u32,
) -> Result<Vec<Vec<f32>>> {
    StreamDecoder::open(file, 0, target_channels, target_rate)?.read_to_end()
}
