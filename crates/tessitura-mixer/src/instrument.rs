//! Instrument mixing stage.
//!
//! [`InstrumentBank`] holds the per-instrument state shared between the
//! control thread, the mixer and the callback: rings, gains, flags, meters
//! and plugin slots. Everything in it is atomic or swapped through
//! `arc-swap`, so control operations never wait on the mixer lock.
//!
//! [`AudioInstrumentMixer`] is the worker that fills the rings one period at
//! a time. Each period is mixed as: synth, plus file samples, through the
//! effect chain, muted if needed, then gain and pan into the stereo rings.

use crate::buss::AudioBussMixer;
use crate::chain::{run_synth, PluginPosition, PluginSlots};
use crate::{Error, Result};
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessitura_core::{
    frames_to_duration, peak_of, AtomicFlag, AtomicFloat, AtomicStereoGain, AudioWorker,
    EngineConfig, FailureCode, FailureReporter, InstrumentId, InstrumentKind, InstrumentLayout,
    LevelReading, PanLaw, PeakMeter, Scavenger, SharedSampleRing, Signaller, StereoGain,
};
use tessitura_plugin::{PluginError, PluginKind, PluginSlot};
use tessitura_stream::{AudioPlayQueue, FileReader, PlayableAudioFile, SharedPlayQueue};

/// Most files one instrument can play in a single period.
pub const MAX_FILES_PER_INSTRUMENT: usize = 64;

/// Ring reader drained by the buss mixer.
pub const BUSS_READER: usize = 0;
/// Ring reader drained by the callback.
pub const CALLBACK_READER: usize = 1;

/// One instrument's shared state.
pub struct InstrumentStrip {
    id: InstrumentId,
    kind: InstrumentKind,
    rings: [SharedSampleRing; 2],
    channels: AtomicUsize,
    level: AtomicFloat,
    pan: AtomicFloat,
    gain: AtomicStereoGain,
    muted: AtomicFlag,
    empty: AtomicFlag,
    dormant: AtomicFlag,
    zero_run: AtomicUsize,
    block_position: AtomicU64,
    meter: PeakMeter,
    synth: ArcSwapOption<PluginSlot>,
    effects: PluginSlots,
}

impl InstrumentStrip {
    fn new(
        id: InstrumentId,
        kind: InstrumentKind,
        ring_frames: usize,
        effect_slots: usize,
        pan_law: PanLaw,
    ) -> Self {
        Self {
            id,
            kind,
            rings: [
                SharedSampleRing::new(ring_frames),
                SharedSampleRing::new(ring_frames),
            ],
            channels: AtomicUsize::new(2),
            level: AtomicFloat::new(0.0),
            pan: AtomicFloat::new(0.0),
            gain: AtomicStereoGain::new(StereoGain::from_level(0.0, 0.0, pan_law)),
            muted: AtomicFlag::new(false),
            empty: AtomicFlag::new(true),
            dormant: AtomicFlag::new(false),
            zero_run: AtomicUsize::new(0),
            block_position: AtomicU64::new(0),
            meter: PeakMeter::new(),
            synth: ArcSwapOption::empty(),
            effects: PluginSlots::new(effect_slots),
        }
    }

    pub fn id(&self) -> InstrumentId {
        self.id
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    /// Left and right output rings.
    #[inline]
    pub fn rings(&self) -> &[SharedSampleRing; 2] {
        &self.rings
    }

    /// Frames readable by `reader` on both rings.
    #[inline]
    pub fn read_space(&self, reader: usize) -> usize {
        self.rings[0]
            .read_space(reader)
            .min(self.rings[1].read_space(reader))
    }

    #[inline]
    pub fn write_space(&self) -> usize {
        self.rings[0].write_space().min(self.rings[1].write_space())
    }

    /// Skip `frames` on both rings for `reader`.
    #[inline]
    pub fn skip(&self, frames: usize, reader: usize) -> usize {
        let l = self.rings[0].skip(frames, reader);
        let r = self.rings[1].skip(frames, reader);
        l.min(r)
    }

    pub fn channels(&self) -> usize {
        self.channels.load(Ordering::Relaxed)
    }

    pub fn level(&self) -> f32 {
        self.level.get()
    }

    pub fn pan(&self) -> f32 {
        self.pan.get()
    }

    #[inline]
    pub fn gain(&self) -> StereoGain {
        self.gain.get()
    }

    pub fn is_muted(&self) -> bool {
        self.muted.get()
    }

    /// No file is playing and no live plugin is loaded.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.empty.get()
    }

    /// Every frame still readable from the rings is zero.
    #[inline]
    pub fn is_dormant(&self) -> bool {
        self.dormant.get()
    }

    /// Timeline frame of the next period this instrument will mix.
    pub fn block_position(&self) -> u64 {
        self.block_position.load(Ordering::Acquire)
    }

    pub fn meter(&self) -> &PeakMeter {
        &self.meter
    }

    pub fn synth(&self) -> Option<Arc<PluginSlot>> {
        self.synth.load_full()
    }

    pub fn effects(&self) -> &PluginSlots {
        &self.effects
    }

    /// Sum of the latencies of the live plugins, in frames.
    pub fn latency(&self) -> usize {
        let synth = self
            .synth
            .load()
            .as_ref()
            .filter(|p| !p.is_bypassed())
            .map_or(0, |p| p.latency());
        synth + self.effects.latency()
    }

    fn has_live_plugin(&self) -> bool {
        self.synth
            .load()
            .as_ref()
            .is_some_and(|p| !p.is_bypassed())
            || self.effects.any_live()
    }

    fn note_written(&self, frames: usize, silent: bool) {
        if silent {
            let run = self.zero_run.load(Ordering::Relaxed).saturating_add(frames);
            self.zero_run.store(run, Ordering::Relaxed);
            if run >= self.rings[0].capacity() {
                self.dormant.set(true);
            }
        } else {
            self.zero_run.store(0, Ordering::Relaxed);
            self.dormant.set(false);
        }
        self.block_position
            .fetch_add(frames as u64, Ordering::AcqRel);
    }

    fn reset(&self, position: u64) {
        for ring in &self.rings {
            ring.reset();
        }
        self.zero_run.store(0, Ordering::Relaxed);
        self.dormant.set(false);
        self.block_position.store(position, Ordering::Release);
        self.meter.reset();
    }
}

impl std::fmt::Debug for InstrumentStrip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentStrip")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("channels", &self.channels())
            .field("empty", &self.is_empty())
            .field("dormant", &self.is_dormant())
            .finish()
    }
}

/// Every instrument strip, indexed densely through an [`InstrumentLayout`].
pub struct InstrumentBank {
    layout: InstrumentLayout,
    strips: Box<[InstrumentStrip]>,
    pan_law: PanLaw,
    scavenger: Arc<Scavenger<PluginSlot>>,
    run_when_stopped: AtomicFlag,
}

impl InstrumentBank {
    pub fn new(config: &EngineConfig, scavenger: Arc<Scavenger<PluginSlot>>) -> Self {
        Self::with_ring_frames(
            InstrumentLayout::new(config.audio_instruments, config.synth_instruments),
            config.instrument_ring_frames(),
            config.instrument_plugin_slots,
            config.pan_law,
            scavenger,
        )
    }

    pub fn with_ring_frames(
        layout: InstrumentLayout,
        ring_frames: usize,
        effect_slots: usize,
        pan_law: PanLaw,
        scavenger: Arc<Scavenger<PluginSlot>>,
    ) -> Self {
        let strips = (0..layout.len())
            .filter_map(|i| Some((layout.id_at(i)?, layout.kind_of(i)?)))
            .map(|(id, kind)| InstrumentStrip::new(id, kind, ring_frames, effect_slots, pan_law))
            .collect();
        Self {
            layout,
            strips,
            pan_law,
            scavenger,
            run_when_stopped: AtomicFlag::new(false),
        }
    }

    pub fn layout(&self) -> &InstrumentLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.strips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strips.is_empty()
    }

    pub fn strips(&self) -> &[InstrumentStrip] {
        &self.strips
    }

    pub fn strip(&self, index: usize) -> Result<&InstrumentStrip> {
        self.strips
            .get(index)
            .ok_or(Error::InstrumentOutOfRange(index))
    }

    pub fn index_of(&self, id: InstrumentId) -> Result<usize> {
        Ok(self.layout.require(id)?)
    }

    pub fn pan_law(&self) -> PanLaw {
        self.pan_law
    }

    pub fn scavenger(&self) -> &Arc<Scavenger<PluginSlot>> {
        &self.scavenger
    }

    /// Keep mixing with the transport stopped (synths, previews).
    pub fn set_run_when_stopped(&self, run: bool) {
        self.run_when_stopped.set(run);
    }

    pub fn run_when_stopped(&self) -> bool {
        self.run_when_stopped.get()
    }

    /// Set fader level (dB) and pan (-1..1).
    pub fn set_instrument_levels(&self, index: usize, db: f32, pan: f32) -> Result<()> {
        let strip = self.strip(index)?;
        let pan = pan.clamp(-1.0, 1.0);
        strip.level.set(db);
        strip.pan.set(pan);
        strip.gain.set(StereoGain::from_level(db, pan, self.pan_law));
        Ok(())
    }

    /// Set the channel count the instrument mixes at, 1 or 2.
    pub fn set_instrument_channels(&self, index: usize, channels: usize) -> Result<()> {
        self.strip(index)?
            .channels
            .store(channels.clamp(1, 2), Ordering::Relaxed);
        Ok(())
    }

    /// Refresh every instrument's mute flag.
    pub fn update_instrument_muting(&self, is_muted: impl Fn(InstrumentId) -> bool) {
        for strip in self.strips.iter() {
            strip.muted.set(is_muted(strip.id));
        }
    }

    pub fn instrument_is_empty(&self, index: usize) -> Result<bool> {
        Ok(self.strip(index)?.is_empty())
    }

    pub fn instrument_is_dormant(&self, index: usize) -> Result<bool> {
        Ok(self.strip(index)?.is_dormant())
    }

    pub fn instrument_latency(&self, index: usize) -> Result<usize> {
        Ok(self.strip(index)?.latency())
    }

    /// Held peak since the last call.
    pub fn take_level(&self, index: usize) -> Result<LevelReading> {
        Ok(self.strip(index)?.meter.take())
    }

    /// Whether any synth instrument has a synth loaded.
    pub fn has_synth_plugins(&self) -> bool {
        self.strips.iter().any(|s| s.synth.load().is_some())
    }

    /// Install `plugin` at `position`, retiring whatever was there.
    pub fn set_plugin(
        &self,
        index: usize,
        position: PluginPosition,
        plugin: Arc<PluginSlot>,
    ) -> Result<()> {
        let strip = self.strip(index)?;
        match position {
            PluginPosition::Synth => {
                if strip.kind != InstrumentKind::Synth {
                    return Err(Error::NoSynthSlot(index));
                }
                expect_kind(&plugin, PluginKind::SynthesizerSource)?;
                tracing::debug!("{}: synth {}", strip.id, plugin.identifier());
                if let Some(old) = strip.synth.swap(Some(plugin)) {
                    self.scavenger.retire(old);
                }
            }
            PluginPosition::Effect(slot) => {
                check_slot(slot, strip.effects.len())?;
                expect_kind(&plugin, PluginKind::AudioEffect)?;
                tracing::debug!("{}: effect {} in slot {}", strip.id, plugin.identifier(), slot);
                strip.effects.replace(slot, Some(plugin), &self.scavenger);
            }
        }
        Ok(())
    }

    /// Empty `position`. Returns whether a plugin was removed.
    pub fn remove_plugin(&self, index: usize, position: PluginPosition) -> Result<bool> {
        let strip = self.strip(index)?;
        let removed = match position {
            PluginPosition::Synth => match strip.synth.swap(None) {
                Some(old) => {
                    self.scavenger.retire(old);
                    true
                }
                None => false,
            },
            PluginPosition::Effect(slot) => {
                check_slot(slot, strip.effects.len())?;
                strip.effects.replace(slot, None, &self.scavenger)
            }
        };
        if removed {
            tracing::debug!("{}: removed plugin at {:?}", strip.id, position);
        }
        Ok(removed)
    }

    pub fn plugin(&self, index: usize, position: PluginPosition) -> Result<Option<Arc<PluginSlot>>> {
        let strip = self.strip(index)?;
        match position {
            PluginPosition::Synth => Ok(strip.synth.load_full()),
            PluginPosition::Effect(slot) => {
                check_slot(slot, strip.effects.len())?;
                Ok(strip.effects.load_full(slot))
            }
        }
    }

    /// Remove every plugin from every instrument.
    pub fn clear_plugins(&self) {
        for strip in self.strips.iter() {
            if let Some(old) = strip.synth.swap(None) {
                self.scavenger.retire(old);
            }
            strip.effects.clear(&self.scavenger);
        }
    }

    fn plugins(&self) -> impl Iterator<Item = Arc<PluginSlot>> + '_ {
        self.strips
            .iter()
            .flat_map(|s| s.synth.load_full().into_iter().chain(s.effects.occupied()))
    }

    /// Return every plugin to its initial state. Blocks on each instance.
    pub fn reset_all_plugins(&self, discard_events: bool) {
        for plugin in self.plugins() {
            plugin.reset(discard_events);
        }
    }

    pub fn discard_plugin_events(&self) {
        for plugin in self.plugins() {
            plugin.discard_events();
        }
    }

    /// Empty every ring and move every instrument to `position`.
    ///
    /// Nothing may read or write the rings meanwhile: callers hold both
    /// mixer locks and keep the callback away from the rings.
    pub fn reset_buffers(&self, position: u64) {
        for strip in self.strips.iter() {
            strip.reset(position);
        }
    }
}

impl std::fmt::Debug for InstrumentBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentBank")
            .field("layout", &self.layout)
            .field("pan_law", &self.pan_law)
            .finish()
    }
}

fn check_slot(slot: usize, slots: usize) -> Result<()> {
    if slot < slots {
        Ok(())
    } else {
        Err(Error::SlotOutOfRange {
            position: slot,
            slots,
        })
    }
}

fn expect_kind(plugin: &PluginSlot, expected: PluginKind) -> Result<()> {
    if plugin.kind() == expected {
        Ok(())
    } else {
        Err(PluginError::KindMismatch {
            expected,
            found: plugin.kind(),
        }
        .into())
    }
}

/// Outcome of trying to mix one period for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    Mixed,
    /// Zeros written without running the mix.
    Silent,
    NoSpace,
    /// A file could not supply the period.
    Starved,
}

/// Worker filling every instrument's rings.
pub struct AudioInstrumentMixer {
    bank: Arc<InstrumentBank>,
    queue: SharedPlayQueue,
    failures: Arc<FailureReporter>,
    sample_rate: u32,
    block_size: usize,
    low_latency: bool,
    buffer_duration: Duration,
    scratch: Vec<Vec<f32>>,
    files: Vec<Arc<PlayableAudioFile>>,
    buss_mixer: Option<Signaller<AudioBussMixer>>,
    file_reader: Option<Signaller<FileReader>>,
}

impl AudioInstrumentMixer {
    pub fn new(
        bank: Arc<InstrumentBank>,
        queue: SharedPlayQueue,
        failures: Arc<FailureReporter>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            bank,
            queue,
            failures,
            sample_rate: config.sample_rate,
            block_size: config.block_size,
            low_latency: config.low_latency,
            buffer_duration: frames_to_duration(
                config.instrument_ring_frames() as u64,
                config.sample_rate,
            ),
            scratch: vec![vec![0.0; config.block_size]; 2],
            files: Vec::with_capacity(MAX_FILES_PER_INSTRUMENT),
            buss_mixer: None,
            file_reader: None,
        }
    }

    pub fn bank(&self) -> &Arc<InstrumentBank> {
        &self.bank
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Wake the buss mixer whenever a period is written.
    pub fn set_buss_signaller(&mut self, signaller: Signaller<AudioBussMixer>) {
        self.buss_mixer = Some(signaller);
    }

    /// Wake the file reader whenever a file starves an instrument.
    pub fn set_reader_signaller(&mut self, signaller: Signaller<FileReader>) {
        self.file_reader = Some(signaller);
    }

    /// Mix whole periods until no instrument can progress. Returns the
    /// number of instrument periods written.
    pub fn process_blocks(&mut self) -> usize {
        let queue = Arc::clone(&self.queue);
        let guard = if self.low_latency {
            match queue.try_lock() {
                Some(guard) => guard,
                None => return 0,
            }
        } else {
            queue.lock()
        };

        let mut written = 0;
        let mut starved = false;
        loop {
            let mut progressed = false;
            for index in 0..self.bank.len() {
                match self.process_instrument(index, &guard) {
                    Period::Mixed | Period::Silent => {
                        progressed = true;
                        written += 1;
                    }
                    Period::Starved => starved = true,
                    Period::NoSpace => {}
                }
            }
            if !progressed {
                break;
            }
        }
        drop(guard);

        if starved {
            if let Some(reader) = &self.file_reader {
                reader.signal();
            }
        }
        if written > 0 {
            if let Some(buss) = &self.buss_mixer {
                buss.signal();
            }
        }
        written
    }

    fn process_instrument(&mut self, index: usize, queue: &AudioPlayQueue) -> Period {
        let Self {
            bank,
            failures,
            sample_rate,
            block_size,
            low_latency,
            scratch,
            files,
            ..
        } = self;
        let period = *block_size;
        let strip = &bank.strips[index];

        if strip.write_space() < period {
            return Period::NoSpace;
        }

        let position = strip.block_position();
        files.clear();
        queue.playing_files_for_instrument(
            frames_to_duration(position, *sample_rate),
            frames_to_duration(period as u64, *sample_rate),
            strip.id,
            files,
            MAX_FILES_PER_INSTRUMENT,
        );

        // Every file must be able to cover its share of the period.
        let mut underrun = false;
        for file in files.iter() {
            let needed = frames_needed(file, position, period);
            if file.available_frames() < needed && !file.is_fully_buffered() {
                if *low_latency {
                    underrun = true;
                } else {
                    return Period::Starved;
                }
            }
        }
        if underrun {
            failures.report(FailureCode::DiskUnderrun);
        }

        let live = strip.has_live_plugin();
        strip.empty.set(files.is_empty() && !live);
        if files.is_empty() && !live {
            for ring in &strip.rings {
                ring.write_zeros(period);
            }
            strip.note_written(period, true);
            return Period::Silent;
        }

        let channels = strip.channels();
        for buffer in scratch.iter_mut() {
            buffer[..period].fill(0.0);
        }

        if let Some(synth) = strip.synth.load().as_ref() {
            if !synth.is_bypassed() {
                if let Some(mut active) = synth.try_activate() {
                    run_synth(&mut active, scratch.as_mut_slice(), channels, period);
                }
            }
        }

        for file in files.iter() {
            let offset = start_offset(file, position, period);
            let needed = frames_needed(file, position, period);
            file.add_samples(scratch.as_mut_slice(), channels, needed, offset);
        }

        strip.effects.run(scratch.as_mut_slice(), channels, period);

        if strip.muted.get() {
            for buffer in scratch.iter_mut() {
                buffer[..period].fill(0.0);
            }
        }

        let gain = strip.gain.get();
        let (left, right) = scratch.split_at_mut(1);
        let (left, right) = (&mut left[0][..period], &mut right[0][..period]);
        if channels == 1 {
            for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                let s = *l;
                *l = s * gain.left;
                *r = s * gain.right;
            }
        } else {
            for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                *l *= gain.left;
                *r *= gain.right;
            }
        }

        let peak_left = peak_of(left);
        let peak_right = peak_of(right);
        strip.meter.update_values(peak_left, peak_right);
        strip.rings[0].write(left);
        strip.rings[1].write(right);
        strip.note_written(period, peak_left == 0.0 && peak_right == 0.0);
        Period::Mixed
    }
}

/// Frames into the period at which `file` starts.
#[inline]
fn start_offset(file: &PlayableAudioFile, position: u64, period: usize) -> usize {
    file.start_frame()
        .saturating_sub(position)
        .min(period as u64) as usize
}

/// Frames `file` contributes to the period starting at `position`.
#[inline]
fn frames_needed(file: &PlayableAudioFile, position: u64, period: usize) -> usize {
    let remaining = file.play_frames().saturating_sub(file.frames_consumed());
    let room = period - start_offset(file, position, period);
    remaining.min(room as u64) as usize
}

impl AudioWorker for AudioInstrumentMixer {
    fn kick(&mut self) {
        self.process_blocks();
    }

    fn buffer_duration(&self) -> Duration {
        self.buffer_duration
    }

    fn kick_when_stopped(&self) -> bool {
        self.bank.run_when_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use parking_lot::Mutex;
    use std::path::Path;
    use tessitura_core::{AudioThread, EpochCounter, RingBufferPool, TransportClock};
    use tessitura_plugin::{AmpPlugin, PluginEvent, SineSynth};
    use tessitura_stream::{AudioFile, AudioFileId, StreamContext};

    const BLOCK: usize = 64;

    fn config() -> EngineConfig {
        EngineConfig::default()
            .block_size(BLOCK)
            .instruments(2, 1)
            .plugin_slots(2, 2)
    }

    fn bank_with_ring(ring_frames: usize) -> Arc<InstrumentBank> {
        let scavenger = Arc::new(Scavenger::new(Arc::new(EpochCounter::new())));
        Arc::new(InstrumentBank::with_ring_frames(
            InstrumentLayout::new(2, 1),
            ring_frames,
            2,
            PanLaw::ConstantPower,
            scavenger,
        ))
    }

    fn mixer(bank: &Arc<InstrumentBank>, queue: &SharedPlayQueue) -> AudioInstrumentMixer {
        AudioInstrumentMixer::new(
            Arc::clone(bank),
            Arc::clone(queue),
            Arc::new(FailureReporter::default()),
            &config(),
        )
    }

    fn write_wav(path: &Path, samples: impl Iterator<Item = f32>) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 48_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn buffered_file(
        path: &Path,
        instrument: InstrumentId,
        seconds: u64,
        channels: usize,
    ) -> Arc<PlayableAudioFile> {
        let header = Arc::new(AudioFile::open(AudioFileId(1), path).unwrap());
        let pool = Arc::new(RingBufferPool::new(2, 48_000 * seconds as usize + 1024));
        let ctx = Arc::new(StreamContext::new(pool, 48_000));
        let file = Arc::new(PlayableAudioFile::new(
            ctx,
            header,
            instrument,
            Duration::ZERO,
            Duration::ZERO,
            Duration::from_secs(seconds),
            channels,
        ));
        file.fill_buffers().unwrap();
        assert!(file.is_fully_buffered());
        file
    }

    /// Drain both readers; returns what the callback reader saw.
    fn drain(strip: &InstrumentStrip, left: &mut Vec<f32>, right: &mut Vec<f32>) {
        let n = strip.read_space(CALLBACK_READER);
        let start = left.len();
        left.resize(start + n, 0.0);
        right.resize(start + n, 0.0);
        strip.rings[0].read(&mut left[start..], CALLBACK_READER);
        strip.rings[1].read(&mut right[start..], CALLBACK_READER);
        strip.skip(strip.read_space(BUSS_READER), BUSS_READER);
    }

    #[test]
    fn test_mono_file_at_centre_pan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.wav");
        let source: Vec<f32> = (0..96_000).map(|i| ((i % 480) as f32 / 480.0) - 0.5).collect();
        write_wav(&path, source.iter().copied());

        let bank = bank_with_ring(BLOCK * 8);
        let id = InstrumentId::audio(0);
        bank.set_instrument_channels(0, 1).unwrap();
        bank.set_instrument_levels(0, 0.0, 0.0).unwrap();

        let queue: SharedPlayQueue = Arc::new(Mutex::new(AudioPlayQueue::new()));
        queue.lock().add_scheduled(buffered_file(&path, id, 2, 1));
        let mut mixer = mixer(&bank, &queue);

        let strip = bank.strip(0).unwrap();
        let (mut left, mut right) = (Vec::new(), Vec::new());
        while left.len() < source.len() {
            assert!(mixer.process_blocks() > 0);
            drain(strip, &mut left, &mut right);
        }
        assert!(!strip.is_empty());

        let centre = std::f32::consts::FRAC_1_SQRT_2;
        // Past the boundary fade the mix is the source at -3 dB per side.
        for i in 100..source.len() - 100 {
            assert_relative_eq!(left[i], right[i], epsilon = 1e-6);
            assert_relative_eq!(left[i], source[i] * centre, epsilon = 1e-5);
        }
        assert!(left.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn test_hard_left_pan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dc.wav");
        write_wav(&path, std::iter::repeat(0.5).take(48_000));

        let bank = bank_with_ring(BLOCK * 8);
        bank.set_instrument_channels(0, 1).unwrap();
        bank.set_instrument_levels(0, 0.0, -1.0).unwrap();

        let queue: SharedPlayQueue = Arc::new(Mutex::new(AudioPlayQueue::new()));
        queue
            .lock()
            .add_scheduled(buffered_file(&path, InstrumentId::audio(0), 1, 1));
        let mut mixer = mixer(&bank, &queue);
        mixer.process_blocks();

        let strip = bank.strip(0).unwrap();
        let (mut left, mut right) = (Vec::new(), Vec::new());
        drain(strip, &mut left, &mut right);
        assert_eq!(left.len(), BLOCK * 8);
        for i in BLOCK..left.len() {
            assert_relative_eq!(left[i], 0.5, epsilon = 1e-6);
            assert!(right[i].abs() < 1e-6);
        }
    }

    #[test]
    fn test_partial_write_space_gives_whole_periods() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dc.wav");
        write_wav(&path, std::iter::repeat(0.5).take(48_000));

        let bank = bank_with_ring(BLOCK * 10);
        bank.set_instrument_channels(0, 1).unwrap();
        bank.set_instrument_levels(0, 0.0, -1.0).unwrap();
        let strip = bank.strip(0).unwrap();
        for ring in strip.rings() {
            ring.write_zeros(BLOCK * 7);
        }
        // The other instruments are idle; fill their rings so only one moves.
        for other in &bank.strips()[1..] {
            for ring in other.rings() {
                ring.write_zeros(BLOCK * 10);
            }
        }

        let queue: SharedPlayQueue = Arc::new(Mutex::new(AudioPlayQueue::new()));
        queue
            .lock()
            .add_scheduled(buffered_file(&path, InstrumentId::audio(0), 1, 1));
        let mut mixer = mixer(&bank, &queue);

        assert_eq!(mixer.process_blocks(), 3);
        assert_eq!(strip.block_position(), (BLOCK * 3) as u64);
        assert_eq!(strip.read_space(CALLBACK_READER), BLOCK * 10);
        assert!(!strip.is_dormant());

        // Free the leading zeros; the signal carries on without a gap.
        strip.skip(BLOCK * 7, CALLBACK_READER);
        strip.skip(BLOCK * 7, BUSS_READER);
        assert_eq!(mixer.process_blocks(), 7);
        assert_eq!(strip.block_position(), (BLOCK * 10) as u64);

        let mut mixed = vec![0.0; BLOCK * 10];
        assert_eq!(strip.rings[0].read(&mut mixed, CALLBACK_READER), BLOCK * 10);
        assert_relative_eq!(mixed[BLOCK * 3 - 1], 0.5, epsilon = 1e-6);
        assert_relative_eq!(mixed[BLOCK * 3], 0.5, epsilon = 1e-6);
        assert_relative_eq!(mixed[BLOCK * 10 - 1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_unbuffered_file_blocks_the_instrument() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dc.wav");
        write_wav(&path, std::iter::repeat(0.5).take(4800));
        let header = Arc::new(AudioFile::open(AudioFileId(1), &path).unwrap());
        let ctx = Arc::new(StreamContext::new(Arc::new(RingBufferPool::new(2, 8192)), 48_000));
        let file = Arc::new(PlayableAudioFile::new(
            ctx,
            header,
            InstrumentId::audio(0),
            Duration::ZERO,
            Duration::ZERO,
            Duration::from_millis(100),
            1,
        ));

        let bank = bank_with_ring(BLOCK * 4);
        let queue: SharedPlayQueue = Arc::new(Mutex::new(AudioPlayQueue::new()));
        queue.lock().add_scheduled(Arc::clone(&file));
        let mut mixer = mixer(&bank, &queue);

        mixer.process_blocks();
        let strip = bank.strip(0).unwrap();
        assert_eq!(strip.read_space(CALLBACK_READER), 0);
        assert_eq!(strip.block_position(), 0);
        // Idle instruments still move.
        assert_eq!(bank.strip(1).unwrap().read_space(CALLBACK_READER), BLOCK * 4);

        file.fill_buffers().unwrap();
        mixer.process_blocks();
        assert_eq!(strip.read_space(CALLBACK_READER), BLOCK * 4);
    }

    #[test]
    fn test_low_latency_substitutes_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dc.wav");
        write_wav(&path, std::iter::repeat(0.5).take(4800));
        let header = Arc::new(AudioFile::open(AudioFileId(1), &path).unwrap());
        let ctx = Arc::new(StreamContext::new(Arc::new(RingBufferPool::new(2, 8192)), 48_000));
        let file = Arc::new(PlayableAudioFile::new(
            ctx,
            header,
            InstrumentId::audio(0),
            Duration::ZERO,
            Duration::ZERO,
            Duration::from_millis(100),
            1,
        ));

        let bank = bank_with_ring(BLOCK * 2);
        let queue: SharedPlayQueue = Arc::new(Mutex::new(AudioPlayQueue::new()));
        queue.lock().add_scheduled(file);
        let failures = Arc::new(FailureReporter::default());
        let mut mixer = AudioInstrumentMixer::new(
            Arc::clone(&bank),
            queue,
            Arc::clone(&failures),
            &config().low_latency(true),
        );

        mixer.process_blocks();
        let strip = bank.strip(0).unwrap();
        assert_eq!(strip.read_space(CALLBACK_READER), BLOCK * 2);
        assert!(failures.drain().contains(&FailureCode::DiskUnderrun));
    }

    #[test]
    fn test_idle_instrument_goes_dormant() {
        let bank = bank_with_ring(BLOCK * 4);
        let queue: SharedPlayQueue = Arc::new(Mutex::new(AudioPlayQueue::new()));
        let mut mixer = mixer(&bank, &queue);
        let strip = bank.strip(0).unwrap();
        assert!(!strip.is_dormant());

        mixer.process_blocks();
        assert!(strip.is_empty());
        assert!(strip.is_dormant());
        assert_eq!(strip.read_space(BUSS_READER), BLOCK * 4);
    }

    #[test]
    fn test_synth_instrument_mixes_its_synth() {
        let bank = bank_with_ring(BLOCK * 4);
        let synth_index = 2;
        let synth = Arc::new(PluginSlot::new(Box::new(SineSynth::new(48_000)), BLOCK));
        synth.send_event(PluginEvent::NoteOn {
            frame: 0,
            note: 69,
            velocity: 127,
        });
        bank.set_plugin(synth_index, PluginPosition::Synth, synth)
            .unwrap();
        assert!(bank.has_synth_plugins());

        let queue: SharedPlayQueue = Arc::new(Mutex::new(AudioPlayQueue::new()));
        let mut mixer = mixer(&bank, &queue);
        mixer.process_blocks();

        let strip = bank.strip(synth_index).unwrap();
        assert!(!strip.is_empty());
        assert!(!strip.is_dormant());
        assert!(strip.meter().peek().max() > 0.0);
        let mut left = vec![0.0; BLOCK * 4];
        let mut right = vec![0.0; BLOCK * 4];
        strip.rings[0].read(&mut left, CALLBACK_READER);
        strip.rings[1].read(&mut right, CALLBACK_READER);
        for (l, r) in left.iter().zip(&right) {
            assert_relative_eq!(*l, *r, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_plugin_kinds_and_slots_are_checked() {
        let bank = bank_with_ring(BLOCK * 4);
        let amp = || Arc::new(PluginSlot::new(Box::new(AmpPlugin::new(2)), BLOCK));
        let synth = Arc::new(PluginSlot::new(Box::new(SineSynth::new(48_000)), BLOCK));

        assert!(matches!(
            bank.set_plugin(0, PluginPosition::Synth, Arc::clone(&synth)),
            Err(Error::NoSynthSlot(0))
        ));
        assert!(matches!(
            bank.set_plugin(2, PluginPosition::Synth, amp()),
            Err(Error::Plugin(PluginError::KindMismatch { .. }))
        ));
        assert!(matches!(
            bank.set_plugin(0, PluginPosition::Effect(0), synth),
            Err(Error::Plugin(PluginError::KindMismatch { .. }))
        ));
        assert!(matches!(
            bank.set_plugin(0, PluginPosition::Effect(2), amp()),
            Err(Error::SlotOutOfRange { position: 2, slots: 2 })
        ));
        assert!(matches!(
            bank.set_plugin(9, PluginPosition::Effect(0), amp()),
            Err(Error::InstrumentOutOfRange(9))
        ));

        bank.set_plugin(0, PluginPosition::Effect(1), amp()).unwrap();
        assert!(bank.plugin(0, PluginPosition::Effect(1)).unwrap().is_some());
        assert!(bank.remove_plugin(0, PluginPosition::Effect(1)).unwrap());
        assert!(!bank.remove_plugin(0, PluginPosition::Effect(1)).unwrap());
        assert_eq!(bank.scavenger().pending(), 1);
    }

    #[test]
    fn test_remove_plugin_while_mixer_is_locked() {
        let bank = bank_with_ring(BLOCK * 4);
        let queue: SharedPlayQueue = Arc::new(Mutex::new(AudioPlayQueue::new()));
        let thread = AudioThread::new(
            "instrument mixer",
            mixer(&bank, &queue),
            Arc::new(TransportClock::new(48_000)),
        );

        let plugin = Arc::new(PluginSlot::new(Box::new(AmpPlugin::new(2)), BLOCK));
        let weak = Arc::downgrade(&plugin);
        bank.set_plugin(0, PluginPosition::Effect(0), plugin).unwrap();

        let mut guard = thread.lock();
        // Mid-block: the mixer holds its own reference to the plugin.
        let held = bank.plugin(0, PluginPosition::Effect(0)).unwrap().unwrap();
        assert!(bank.remove_plugin(0, PluginPosition::Effect(0)).unwrap());
        let epochs = Arc::clone(bank.scavenger().epochs());
        epochs.advance();
        epochs.advance();
        assert_eq!(bank.scavenger().sweep(), 0);
        assert!(held.try_activate().is_some());
        guard.process_blocks();
        drop(held);
        drop(guard);

        assert!(weak.upgrade().is_some());
        assert_eq!(bank.scavenger().sweep(), 1);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_levels_muting_and_reset() {
        let bank = bank_with_ring(BLOCK * 4);
        bank.set_instrument_levels(1, -6.0, 0.5).unwrap();
        let strip = bank.strip(1).unwrap();
        assert_eq!(strip.level(), -6.0);
        assert_eq!(strip.pan(), 0.5);
        let expected = StereoGain::from_level(-6.0, 0.5, PanLaw::ConstantPower);
        assert_relative_eq!(strip.gain().left, expected.left);
        assert_relative_eq!(strip.gain().right, expected.right);

        bank.update_instrument_muting(|id| id == InstrumentId::audio(1));
        assert!(strip.is_muted());
        assert!(!bank.strip(0).unwrap().is_muted());

        let queue: SharedPlayQueue = Arc::new(Mutex::new(AudioPlayQueue::new()));
        mixer(&bank, &queue).process_blocks();
        assert!(strip.read_space(BUSS_READER) > 0);

        bank.reset_buffers(4800);
        assert_eq!(strip.read_space(BUSS_READER), 0);
        assert_eq!(strip.block_position(), 4800);
        assert!(!strip.is_dormant());
        assert_eq!(bank.instrument_latency(1).unwrap(), 0);
    }
}
