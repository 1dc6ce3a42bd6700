//! The real-time integration layer.
//!
//! [`SoundDriver`] owns every engine component: the transport clock, the
//! play queue and ring pool, the instrument and buss banks, the four worker
//! threads and the scavengers. The control thread drives it through `&self`
//! methods; an audio backend calls [`SoundDriver::process`] once per period.
//!
//! ```text
//!  files ─► FileReader ─► AudioInstrumentMixer ─┬─► AudioBussMixer ─► buss rings ─┐
//!                                               │                                 ├─► process ─► master
//!                                               └─► instrument rings (reader 1) ──┘
//!  record in ─► process ─► record rings ─► FileWriter ─► WAV
//! ```

use crate::error::{Error, Result};
use crate::gate::CallbackGate;
use crate::notification::{Notification, Notifier};
use crate::ports::{DriverIo, OutputPort, PortLayout};
use crate::studio::{EventId, PluginConfig, ScheduledAudio, StudioConfig};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tessitura_core::{
    db_to_gain, frames_to_duration, AtomicFloat, AtomicStereoGain, AudioThread, BussId, CpuMeter,
    EngineConfig, EpochCounter, FailureCode, FailureReporter, InstrumentId, InstrumentKind,
    LevelReading, PeakMeter, RingBufferPool, Scavenger, StereoGain, TransportClock,
    TransportRequest, TransportState, TransportSync,
};
use tessitura_mixer::{
    AudioBussMixer, AudioInstrumentMixer, BussBank, InstrumentBank, PluginPosition,
    CALLBACK_READER,
};
use tessitura_plugin::{PluginEvent, PluginIdentifier, PluginRegistry, PluginSlot};
use tessitura_stream::{
    AudioFile, AudioFileId, AudioPlayQueue, FileReader, FileWriter, PlayableAudioFile,
    RecordSlots, RecordableAudioFile, SharedPlayQueue, StreamContext,
};

/// Event ids handed out for previews start here.
pub const PREVIEW_EVENT_BASE: u64 = 1 << 62;

/// Where a plugin sits in the mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginLocation {
    Instrument(InstrumentId, PluginPosition),
    /// Effect slot on a buss.
    Buss(BussId, usize),
}

struct AudioEvent {
    /// `None` for previews.
    audio: Option<ScheduledAudio>,
    playing: Option<Arc<PlayableAudioFile>>,
}

/// The engine, as seen by the control thread and the audio backend.
pub struct SoundDriver {
    config: EngineConfig,
    ports: PortLayout,
    clock: Arc<TransportClock>,
    sync: TransportSync,
    failures: Arc<FailureReporter>,
    epochs: Arc<EpochCounter>,
    file_scavenger: Scavenger<PlayableAudioFile>,
    record_scavenger: Arc<Scavenger<RecordableAudioFile>>,
    pool: Arc<RingBufferPool>,
    stream: Arc<StreamContext>,
    queue: SharedPlayQueue,
    instruments: Arc<InstrumentBank>,
    busses: Arc<BussBank>,
    instrument_mixer: AudioThread<AudioInstrumentMixer>,
    buss_mixer: AudioThread<AudioBussMixer>,
    file_reader: AudioThread<FileReader>,
    file_writer: AudioThread<FileWriter>,
    record_slots: Arc<RecordSlots>,
    registry: PluginRegistry,
    audio_files: Mutex<HashMap<AudioFileId, Arc<AudioFile>>>,
    events: Mutex<HashMap<EventId, AudioEvent>>,
    next_preview: AtomicU64,
    master_gain: AtomicStereoGain,
    master_level: AtomicFloat,
    master_meter: PeakMeter,
    cpu: CpuMeter,
    gate: CallbackGate,
    /// Serializes transport changes.
    transport: Mutex<()>,
    notifier: Notifier,
    completions: Receiver<AudioFileId>,
}

impl SoundDriver {
    /// Build every component. With `spawn_workers` false no thread is
    /// started and the workers only run through [`pump`](Self::pump).
    pub(crate) fn new(
        config: EngineConfig,
        registry: PluginRegistry,
        spawn_workers: bool,
    ) -> Result<Self> {
        config.validate()?;
        let rate = config.sample_rate;

        let clock = Arc::new(TransportClock::new(rate));
        let failures = Arc::new(FailureReporter::new(config.failure_queue));
        let epochs = Arc::new(EpochCounter::new());

        let pool = Arc::new(RingBufferPool::new(config.pool_size, config.file_ring_frames()));
        pool.set_lock_memory(config.lock_memory);
        let stream = Arc::new(
            StreamContext::new(Arc::clone(&pool), rate)
                .read_block(config.file_read_block)
                .small_file_threshold(config.small_file_threshold),
        );
        let queue: SharedPlayQueue = Arc::new(Mutex::new(AudioPlayQueue::new()));

        let instruments = Arc::new(InstrumentBank::new(
            &config,
            Arc::new(Scavenger::new(Arc::clone(&epochs))),
        ));
        let busses = Arc::new(BussBank::new(&config, Arc::clone(&instruments)));
        let ports = PortLayout::from_config(&config);

        let file_buffer = frames_to_duration(config.file_ring_frames() as u64, rate);
        let mut file_reader = AudioThread::new(
            "tessitura-reader",
            FileReader::new(
                Arc::clone(&queue),
                Arc::clone(&clock),
                Arc::clone(&failures),
                file_buffer * 2,
                file_buffer,
            ),
            Arc::clone(&clock),
        );

        let record_slots = Arc::new(RecordSlots::new(ports.inputs()));
        let record_scavenger = Arc::new(Scavenger::new(Arc::clone(&epochs)));
        let (completion_tx, completions) = crossbeam_channel::unbounded();
        let mut file_writer = AudioThread::new(
            "tessitura-writer",
            FileWriter::new(
                Arc::clone(&record_slots),
                Arc::clone(&record_scavenger),
                Arc::clone(&failures),
                completion_tx,
                frames_to_duration(config.record_ring_frames() as u64, rate),
            ),
            Arc::clone(&clock),
        );

        let mut buss_mixer = AudioThread::new(
            "tessitura-buss-mixer",
            AudioBussMixer::new(Arc::clone(&busses), &config),
            Arc::clone(&clock),
        );
        let mut mixer = AudioInstrumentMixer::new(
            Arc::clone(&instruments),
            Arc::clone(&queue),
            Arc::clone(&failures),
            &config,
        );
        mixer.set_buss_signaller(buss_mixer.signaller());
        mixer.set_reader_signaller(file_reader.signaller());
        let mut instrument_mixer = AudioThread::new("tessitura-mixer", mixer, Arc::clone(&clock));

        if spawn_workers {
            file_reader.run()?;
            file_writer.run()?;
            // Low latency: the callback pumps the mixers itself.
            if !config.low_latency {
                instrument_mixer.run()?;
                buss_mixer.run()?;
            }
        }

        tracing::info!(
            "Sound driver: {} Hz, {} frames, {} audio + {} synth instruments, {} busses{}",
            rate,
            config.block_size,
            config.audio_instruments,
            config.synth_instruments,
            config.busses,
            if config.low_latency { ", low latency" } else { "" }
        );

        Ok(Self {
            cpu: CpuMeter::new(rate, config.cpu_overload_threshold),
            config,
            ports,
            clock,
            sync: TransportSync::default(),
            failures,
            file_scavenger: Scavenger::new(Arc::clone(&epochs)),
            epochs,
            record_scavenger,
            pool,
            stream,
            queue,
            instruments,
            busses,
            instrument_mixer,
            buss_mixer,
            file_reader,
            file_writer,
            record_slots,
            registry,
            audio_files: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
            next_preview: AtomicU64::new(PREVIEW_EVENT_BASE),
            master_gain: AtomicStereoGain::default(),
            master_level: AtomicFloat::new(0.0),
            master_meter: PeakMeter::new(),
            gate: CallbackGate::default(),
            transport: Mutex::new(()),
            notifier: Notifier::new(),
            completions,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ports(&self) -> &PortLayout {
        &self.ports
    }

    /// Port buffers sized for this driver, for a backend delivering at most
    /// `max_frames` per callback.
    pub fn create_io(&self, max_frames: usize) -> DriverIo {
        DriverIo::new(self.ports.clone(), max_frames)
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn clock(&self) -> &Arc<TransportClock> {
        &self.clock
    }

    pub fn instruments(&self) -> &Arc<InstrumentBank> {
        &self.instruments
    }

    pub fn busses(&self) -> &Arc<BussBank> {
        &self.busses
    }

    pub fn pool(&self) -> &Arc<RingBufferPool> {
        &self.pool
    }

    // -- Real-time ---------------------------------------------------------

    /// One period of real-time work. Never blocks, allocates or logs.
    ///
    /// `frames` beyond [`DriverIo::max_frames`] are ignored.
    pub fn process(&self, io: &mut DriverIo, frames: usize) {
        let started = Instant::now();
        self.epochs.advance();
        let frames = frames.min(io.max_frames());

        if !self.gate.enter() {
            io.silence_outputs(frames);
            return;
        }

        if self.config.low_latency {
            self.pump_mixers_inline();
        }
        self.mix_outputs(io, frames);
        self.record_inputs(io, frames);
        if self.clock.is_running() {
            self.clock.advance(frames as u64);
        }
        self.gate.exit();

        if !self.config.low_latency {
            self.instrument_mixer.signal();
        }
        if self.cpu.record(frames, started.elapsed()) {
            self.failures.report(FailureCode::CpuOverload);
        }
    }

    fn pump_mixers_inline(&self) {
        match self.instrument_mixer.try_lock() {
            Some(mut mixer) => {
                mixer.process_blocks();
            }
            None => self.failures.report(FailureCode::LowLatencyMixSkipped),
        }
        match self.buss_mixer.try_lock() {
            Some(mut mixer) => {
                mixer.process_blocks();
            }
            None => self.failures.report(FailureCode::LowLatencyMixSkipped),
        }
    }

    fn mix_outputs(&self, io: &mut DriverIo, frames: usize) {
        let rolling = self.clock.is_running();
        let routing = self.busses.routing();
        io.silence_outputs(frames);

        // Every instrument's reader 1 advances each period, routed or not.
        for (index, strip) in self.instruments.strips().iter().enumerate() {
            let port = OutputPort::Instrument(index);
            let Some([left, right]) = io.output_mut(port) else {
                continue;
            };
            let rings = strip.rings();
            let read = rings[0].read(&mut left[..frames], CALLBACK_READER);
            rings[1].read(&mut right[..frames], CALLBACK_READER);
            if read < frames && rolling {
                self.failures.report(FailureCode::MixUnderrun);
            }
            if routing.is_direct(index) {
                io.add_to_master(port, frames);
            }
        }

        for (index, buss) in self.busses.busses().iter().enumerate() {
            let port = OutputPort::Buss(index);
            let Some([left, right]) = io.output_mut(port) else {
                continue;
            };
            let rings = buss.rings();
            let read = rings[0].read(&mut left[..frames], 0);
            rings[1].read(&mut right[..frames], 0);
            if read < frames && rolling {
                self.failures.report(FailureCode::BussMixUnderrun);
            }
            io.add_to_master(port, frames);
        }

        let gain = self.master_gain.get();
        if let Some([left, right]) = io.output_mut(OutputPort::Master) {
            for (l, r) in left[..frames].iter_mut().zip(right[..frames].iter_mut()) {
                *l *= gain.left;
                *r *= gain.right;
            }
            self.master_meter.update(&left[..frames], &right[..frames]);
        }
    }

    fn record_inputs(&self, io: &mut DriverIo, frames: usize) {
        if self.clock.is_running() {
            for (index, input) in io.inputs().iter().enumerate() {
                let slot = self.record_slots.get(index);
                let Some(file) = slot.as_ref() else {
                    continue;
                };
                if !file.is_recording() {
                    continue;
                }
                let channels = [&input[0][..frames], &input[1][..frames]];
                if !file.add_samples(&channels[..file.channels()], frames) {
                    self.failures.report(FailureCode::DiskOverrun);
                }
            }
        }
        io.copy_inputs_to_monitor(frames);
    }

    /// External transport handshake, called from the real-time thread with
    /// the master's state. Returns `true` once the engine is ready to roll
    /// at `position`; requests are carried out by
    /// [`housekeeping`](Self::housekeeping).
    pub fn sync_request(&self, state: TransportState, position: u64) -> bool {
        self.sync.sync_request(state, position)
    }

    /// Report a failure from outside the real-time path (backends,
    /// supervisors).
    pub fn report_failure(&self, code: FailureCode) {
        self.failures.report(code);
    }

    // -- Workers -----------------------------------------------------------

    /// One pass of every worker on the calling thread, in data-flow order.
    /// Drivers built without worker threads run entirely on this.
    pub fn pump(&self) {
        self.file_reader.lock().service();
        self.instrument_mixer.lock().process_blocks();
        self.buss_mixer.lock().process_blocks();
        self.file_writer.lock().service();
    }

    fn signal_workers(&self) {
        self.file_reader.signal();
        self.instrument_mixer.signal();
        self.buss_mixer.signal();
        self.file_writer.signal();
    }

    // -- Transport ---------------------------------------------------------

    pub fn is_playing(&self) -> bool {
        self.clock.is_running()
    }

    /// Transport position in frames.
    pub fn position(&self) -> u64 {
        self.clock.position()
    }

    /// Start rolling from the current position. Scheduled audio is requeued
    /// from there and the mixers are primed before the clock starts.
    pub fn start_playing(&self) -> Result<()> {
        let _transport = self.transport.lock();
        if self.clock.is_running() {
            return Ok(());
        }
        let position = self.clock.position();
        self.reposition(position)?;
        self.preroll();
        self.clock.start();
        self.signal_workers();
        tracing::info!("Transport started at frame {}", position);
        Ok(())
    }

    /// Stop rolling. Asynchronous state is discarded: files go back to the
    /// pool, plugins are reset and their pending events dropped, and every
    /// open recording is closed.
    pub fn stop_playing(&self) -> Result<()> {
        let _transport = self.transport.lock();
        if !self.clock.is_running() {
            return Ok(());
        }
        self.clock.stop();
        let position = self.clock.position();
        self.reposition(position)?;
        for index in 0..self.record_slots.len() {
            if let Some(file) = self.record_slots.load_full(index) {
                file.close();
            }
        }
        self.file_writer.signal();
        tracing::info!("Transport stopped at frame {}", position);
        Ok(())
    }

    /// Jump to `position` (frames). Scheduled audio is requeued from there;
    /// previews end.
    pub fn relocate(&self, position: u64) -> Result<()> {
        let _transport = self.transport.lock();
        self.reposition(position)?;
        if self.clock.is_running() {
            self.preroll();
            self.signal_workers();
        }
        tracing::debug!("Transport relocated to frame {}", position);
        Ok(())
    }

    /// Reset every ring and plugin and rebuild the play queue at `position`.
    fn reposition(&self, position: u64) -> Result<()> {
        let _gate = self.gate.hold();
        let _instrument_mixer = self.instrument_mixer.lock();
        let _buss_mixer = self.buss_mixer.lock();

        self.clock.set_position(position);
        self.instruments.reset_buffers(position);
        self.busses.reset_buffers();
        self.instruments.reset_all_plugins(true);
        self.busses.reset_all_plugins(true);
        self.requeue(position)
    }

    /// Prime the rings so the first periods after a start are not underruns.
    fn preroll(&self) {
        self.file_reader.lock().service();
        self.instrument_mixer.lock().process_blocks();
        self.buss_mixer.lock().process_blocks();
    }

    fn requeue(&self, position: u64) -> Result<()> {
        let from = frames_to_duration(position, self.config.sample_rate);
        let mut events = self.events.lock();
        events.retain(|_, event| event.audio.is_some());

        let mut queue = self.queue.lock();
        for file in queue.clear() {
            self.file_scavenger.retire(file);
        }
        for event in events.values_mut() {
            event.playing = None;
            let Some(audio) = &event.audio else {
                continue;
            };
            if let Some(file) = self.playable(audio, from)? {
                let file = Arc::new(file);
                queue.add_scheduled(Arc::clone(&file));
                event.playing = Some(file);
            }
        }
        drop(queue);
        drop(events);
        self.grow_pool();
        Ok(())
    }

    // -- Levels ------------------------------------------------------------

    pub fn set_instrument_level(&self, instrument: InstrumentId, db: f32, pan: f32) -> Result<()> {
        let index = self.instruments.index_of(instrument)?;
        self.instruments.set_instrument_levels(index, db, pan)?;
        Ok(())
    }

    pub fn set_buss_level(&self, buss: BussId, db: f32, pan: f32) -> Result<()> {
        let index = self.busses.index_of(buss)?;
        self.busses.set_buss_levels(index, db, pan)?;
        Ok(())
    }

    pub fn set_master_level(&self, db: f32) {
        self.master_level.set(db);
        let gain = db_to_gain(db);
        self.master_gain.set(StereoGain {
            left: gain,
            right: gain,
        });
    }

    pub fn master_level(&self) -> f32 {
        self.master_level.get()
    }

    /// Peak since the last reading.
    pub fn instrument_peak(&self, instrument: InstrumentId) -> Result<LevelReading> {
        let index = self.instruments.index_of(instrument)?;
        Ok(self.instruments.take_level(index)?)
    }

    pub fn buss_peak(&self, buss: BussId) -> Result<LevelReading> {
        let index = self.busses.index_of(buss)?;
        Ok(self.busses.take_level(index)?)
    }

    pub fn master_peak(&self) -> LevelReading {
        self.master_meter.take()
    }

    /// Frames of latency reported by the instrument's live plugins.
    pub fn instrument_latency(&self, instrument: InstrumentId) -> Result<usize> {
        let index = self.instruments.index_of(instrument)?;
        Ok(self.instruments.instrument_latency(index)?)
    }

    pub fn buss_latency(&self, buss: BussId) -> Result<usize> {
        let index = self.busses.index_of(buss)?;
        Ok(self.busses.buss_latency(index)?)
    }

    /// Callback load as a percentage of the period.
    pub fn cpu_load(&self) -> f32 {
        self.cpu.average_percent()
    }

    pub fn cpu_overloads(&self) -> u64 {
        self.cpu.overloads()
    }

    // -- Hardware notifications ----------------------------------------------

    /// The device now delivers up to `max_frames` per callback. Reallocates
    /// `io`, so call it from the backend's control side, not the callback.
    pub fn buffer_size_changed(&self, io: &mut DriverIo, max_frames: usize) {
        if io.max_frames() != max_frames {
            tracing::info!("Device period changed to {} frames", max_frames);
            io.set_max_frames(max_frames);
        }
    }

    /// The device clock now runs at `sample_rate`. Audio stays decoded at the
    /// engine rate; only the CPU budget follows the device. Returns whether
    /// the rates still match.
    pub fn sample_rate_changed(&self, sample_rate: u32) -> bool {
        if sample_rate == 0 {
            return false;
        }
        self.cpu.set_sample_rate(sample_rate);
        if sample_rate != self.config.sample_rate {
            tracing::warn!(
                "Device runs at {} Hz, engine at {} Hz; playback will be off-pitch",
                sample_rate,
                self.config.sample_rate
            );
            return false;
        }
        true
    }

    // -- Plugins -----------------------------------------------------------

    fn load_plugin(&self, identifier: &PluginIdentifier) -> Result<Arc<PluginSlot>> {
        let instance =
            self.registry
                .instantiate(identifier, self.config.sample_rate, self.config.block_size)?;
        Ok(Arc::new(PluginSlot::new(instance, self.config.block_size)))
    }

    /// Load `identifier` and install it at `location`, retiring whatever was
    /// there.
    pub fn set_plugin(
        &self,
        location: PluginLocation,
        identifier: &PluginIdentifier,
    ) -> Result<Arc<PluginSlot>> {
        let plugin = self.load_plugin(identifier)?;
        self.install_plugin(location, Arc::clone(&plugin))?;
        Ok(plugin)
    }

    fn install_plugin(&self, location: PluginLocation, plugin: Arc<PluginSlot>) -> Result<()> {
        match location {
            PluginLocation::Instrument(id, position) => {
                let index = self.instruments.index_of(id)?;
                self.instruments.set_plugin(index, position, plugin)?;
                if position == PluginPosition::Synth {
                    self.instruments.set_run_when_stopped(true);
                    self.instrument_mixer.signal();
                }
            }
            PluginLocation::Buss(id, slot) => {
                let index = self.busses.index_of(id)?;
                self.busses.set_plugin(index, slot, plugin)?;
            }
        }
        Ok(())
    }

    /// Empty `location`. The plugin is destroyed once the mixers can no
    /// longer be using it. Returns whether anything was removed.
    pub fn remove_plugin(&self, location: PluginLocation) -> Result<bool> {
        let removed = match location {
            PluginLocation::Instrument(id, position) => {
                let index = self.instruments.index_of(id)?;
                self.instruments.remove_plugin(index, position)?
            }
            PluginLocation::Buss(id, slot) => {
                let index = self.busses.index_of(id)?;
                self.busses.remove_plugin(index, slot)?
            }
        };
        Ok(removed)
    }

    pub fn plugin(&self, location: PluginLocation) -> Result<Option<Arc<PluginSlot>>> {
        Ok(match location {
            PluginLocation::Instrument(id, position) => {
                let index = self.instruments.index_of(id)?;
                self.instruments.plugin(index, position)?
            }
            PluginLocation::Buss(id, slot) => {
                let index = self.busses.index_of(id)?;
                self.busses.plugin(index, slot)?
            }
        })
    }

    fn require_plugin(&self, location: PluginLocation) -> Result<Arc<PluginSlot>> {
        self.plugin(location)?.ok_or(Error::NoPlugin(location))
    }

    /// Set a control port. Returns the value after clamping to the port's
    /// range.
    pub fn set_plugin_port(&self, location: PluginLocation, port: usize, value: f32) -> Result<f32> {
        Ok(self.require_plugin(location)?.set_port(port, value)?)
    }

    pub fn set_plugin_bypass(&self, location: PluginLocation, bypass: bool) -> Result<()> {
        self.require_plugin(location)?.set_bypass(bypass);
        Ok(())
    }

    pub fn select_plugin_program(
        &self,
        location: PluginLocation,
        bank: u32,
        program: u32,
    ) -> Result<()> {
        Ok(self.require_plugin(location)?.select_program(bank, program)?)
    }

    /// Queue an event for an instrument's synth. Returns `false` when the
    /// event queue is full.
    pub fn send_synth_event(&self, instrument: InstrumentId, event: PluginEvent) -> Result<bool> {
        let location = PluginLocation::Instrument(instrument, PluginPosition::Synth);
        Ok(self.require_plugin(location)?.send_event(event))
    }

    // -- Audio files -------------------------------------------------------

    /// Read the header of the file at `path` and make it playable as `id`.
    pub fn register_audio_file(&self, id: AudioFileId, path: impl AsRef<Path>) -> Result<Arc<AudioFile>> {
        let file = Arc::new(AudioFile::open(id, path)?);
        tracing::debug!(
            "Registered {}: {} ch, {} Hz, {} frames",
            id,
            file.channels(),
            file.sample_rate(),
            file.frames()
        );
        self.audio_files.lock().insert(id, Arc::clone(&file));
        Ok(file)
    }

    pub fn unregister_audio_file(&self, id: AudioFileId) -> bool {
        self.audio_files.lock().remove(&id).is_some()
    }

    fn audio_file(&self, id: AudioFileId) -> Result<Arc<AudioFile>> {
        self.audio_files
            .lock()
            .get(&id)
            .cloned()
            .ok_or(Error::UnknownAudioFile(id))
    }

    /// The part of `audio` still to play from `from`, or `None` when it has
    /// already ended.
    fn playable(&self, audio: &ScheduledAudio, from: Duration) -> Result<Option<PlayableAudioFile>> {
        let end = audio.start + audio.duration;
        if end <= from {
            return Ok(None);
        }
        let file = self.audio_file(audio.file)?;
        let index = self.instruments.index_of(audio.instrument)?;
        let channels = self.instruments.strip(index)?.channels();

        let skipped = from.saturating_sub(audio.start);
        let fade_in = if skipped.is_zero() {
            audio.fade_in
        } else {
            Duration::ZERO
        };
        Ok(Some(
            PlayableAudioFile::new(
                Arc::clone(&self.stream),
                file,
                audio.instrument,
                audio.start + skipped,
                audio.source_offset + skipped,
                audio.duration - skipped,
                channels,
            )
            .with_fades(fade_in, audio.fade_out),
        ))
    }

    /// Put `audio` on the timeline. An event with the same id is replaced.
    /// Audio that ended before the playhead is remembered for later
    /// relocations but not queued.
    ///
    /// The instrument mixer runs ahead of the playhead. Audio starting in
    /// the part it has already mixed joins at the first period it has not,
    /// with its source advanced to match.
    pub fn schedule_audio(&self, audio: &ScheduledAudio) -> Result<()> {
        let strip = self
            .instruments
            .strip(self.instruments.index_of(audio.instrument)?)?;

        let mut events = self.events.lock();
        // Holding the queue keeps the mixer from moving its block position.
        let mut queue = self.queue.lock();
        let position = self.clock.position().max(strip.block_position());
        let from = frames_to_duration(position, self.config.sample_rate);
        let playing = self.playable(audio, from)?.map(Arc::new);

        let previous = events.insert(
            audio.event,
            AudioEvent {
                audio: Some(audio.clone()),
                playing: playing.clone(),
            },
        );
        if let Some(old) = previous.and_then(|e| e.playing) {
            if let Some(old) = queue.erase(&old) {
                self.file_scavenger.retire(old);
            }
        }
        if let Some(file) = playing {
            queue.add_scheduled(file);
        }
        drop(queue);
        drop(events);

        self.grow_pool();
        self.file_reader.signal();
        Ok(())
    }

    /// Play a whole file on `instrument` right away, transport or not.
    pub fn preview_audio(&self, file: AudioFileId, instrument: InstrumentId) -> Result<EventId> {
        let audio_file = self.audio_file(file)?;
        let index = self.instruments.index_of(instrument)?;
        let strip = self.instruments.strip(index)?;
        let start = frames_to_duration(strip.block_position(), self.config.sample_rate);
        let duration = audio_file.duration();
        let playable = Arc::new(PlayableAudioFile::new(
            Arc::clone(&self.stream),
            audio_file,
            instrument,
            start,
            Duration::ZERO,
            duration,
            strip.channels(),
        ));

        let event = EventId(self.next_preview.fetch_add(1, Ordering::Relaxed));
        let mut events = self.events.lock();
        events.insert(
            event,
            AudioEvent {
                audio: None,
                playing: Some(Arc::clone(&playable)),
            },
        );
        self.queue.lock().add_unscheduled(playable);
        drop(events);

        self.instruments.set_run_when_stopped(true);
        self.file_reader.signal();
        self.instrument_mixer.signal();
        tracing::debug!("Previewing {} on {} as {}", file, instrument, event);
        Ok(event)
    }

    /// Remove a scheduled or previewed event.
    pub fn cancel_audio(&self, event: EventId) -> Result<()> {
        let mut events = self.events.lock();
        let removed = events.remove(&event).ok_or(Error::UnknownEvent(event))?;
        if let Some(file) = removed.playing {
            if let Some(file) = self.queue.lock().erase(&file) {
                self.file_scavenger.retire(file);
            }
        }
        Ok(())
    }

    /// Remove every scheduled and previewed event.
    pub fn clear_audio(&self) {
        let mut events = self.events.lock();
        events.clear();
        for file in self.queue.lock().clear() {
            self.file_scavenger.retire(file);
        }
    }

    pub fn scheduled_events(&self) -> usize {
        self.events.lock().len()
    }

    // -- Recording ---------------------------------------------------------

    /// Start capturing `instrument`'s record input to a new WAV file at
    /// `path`. Samples are only taken while the transport rolls.
    pub fn open_record_file(
        &self,
        instrument: InstrumentId,
        file: AudioFileId,
        path: impl AsRef<Path>,
    ) -> Result<()> {
        let index = self.instruments.index_of(instrument)?;
        if index >= self.record_slots.len() {
            return Err(Error::NotRecordable(instrument));
        }
        if self.record_slots.load_full(index).is_some() {
            return Err(Error::AlreadyRecording(instrument));
        }
        let channels = self.instruments.strip(index)?.channels();
        let recording = RecordableAudioFile::create(
            file,
            path,
            instrument,
            channels,
            self.config.sample_rate,
            self.config.record_ring_frames(),
        )?;
        self.record_slots.swap(index, Some(Arc::new(recording)));
        Ok(())
    }

    /// Stop capturing `instrument`. The file writer drains what is left,
    /// finalizes the file and a [`Notification::RecordComplete`] follows.
    /// Returns whether a recording was open.
    pub fn close_record_file(&self, instrument: InstrumentId) -> Result<bool> {
        let index = self.instruments.index_of(instrument)?;
        if index >= self.record_slots.len() {
            return Err(Error::NotRecordable(instrument));
        }
        let Some(file) = self.record_slots.load_full(index) else {
            return Ok(false);
        };
        file.close();
        tracing::info!("Closing recording {} on {}", file.id(), instrument);
        self.file_writer.signal();
        Ok(true)
    }

    pub fn is_recording(&self) -> bool {
        self.record_slots.any_recording()
    }

    // -- Studio ------------------------------------------------------------

    /// Bring levels, muting, routing and plugins in line with `studio`.
    /// Instruments and busses it does not mention are left alone.
    pub fn update_audio_data(&self, studio: &StudioConfig) -> Result<()> {
        for config in &studio.instruments {
            let index = self.instruments.index_of(config.id)?;
            self.instruments
                .set_instrument_levels(index, config.level, config.pan)?;
            self.instruments
                .set_instrument_channels(index, config.channels)?;
            self.busses.set_instrument_output(index, config.output)?;

            let strip = self.instruments.strip(index)?;
            if strip.kind() == InstrumentKind::Synth || config.synth.is_some() {
                self.sync_plugin(
                    PluginLocation::Instrument(config.id, PluginPosition::Synth),
                    config.synth.as_ref(),
                )?;
            }
            let slots = strip.effects().len();
            if config.effects.len() > slots {
                return Err(tessitura_mixer::Error::SlotOutOfRange {
                    position: config.effects.len() - 1,
                    slots,
                }
                .into());
            }
            for slot in 0..slots {
                self.sync_plugin(
                    PluginLocation::Instrument(config.id, PluginPosition::Effect(slot)),
                    config.effects.get(slot).and_then(Option::as_ref),
                )?;
            }
        }
        self.instruments
            .update_instrument_muting(|id| studio.is_muted(id));

        for config in &studio.busses {
            let index = self.busses.index_of(config.id)?;
            self.busses.set_buss_levels(index, config.level, config.pan)?;
            let slots = self.busses.buss(index)?.effects().len();
            if config.effects.len() > slots {
                return Err(tessitura_mixer::Error::SlotOutOfRange {
                    position: config.effects.len() - 1,
                    slots,
                }
                .into());
            }
            for slot in 0..slots {
                self.sync_plugin(
                    PluginLocation::Buss(config.id, slot),
                    config.effects.get(slot).and_then(Option::as_ref),
                )?;
            }
        }

        self.set_master_level(studio.master_level);
        Ok(())
    }

    fn sync_plugin(&self, location: PluginLocation, wanted: Option<&PluginConfig>) -> Result<()> {
        let current = self.plugin(location)?;
        let Some(wanted) = wanted else {
            if current.is_some() {
                self.remove_plugin(location)?;
            }
            return Ok(());
        };
        let plugin = match current {
            Some(plugin) if plugin.identifier() == &wanted.identifier => plugin,
            _ => self.set_plugin(location, &wanted.identifier)?,
        };
        plugin.set_bypass(wanted.bypass);
        if let Some((bank, program)) = wanted.program {
            plugin.select_program(bank, program)?;
        }
        for &(port, value) in &wanted.ports {
            plugin.set_port(port, value)?;
        }
        Ok(())
    }

    // -- Housekeeping ------------------------------------------------------

    /// Periodic control-thread upkeep: carry out external transport
    /// requests, free retired objects, drop finished files, grow the pool
    /// and forward failures and completed recordings as notifications.
    pub fn housekeeping(&self) -> Result<()> {
        while let Some(request) = self.sync.pop_request() {
            match request {
                TransportRequest::Start { position, .. } => {
                    self.relocate(position)?;
                    self.start_playing()?;
                }
                TransportRequest::Stop { .. } => self.stop_playing()?,
                TransportRequest::Relocate { position, .. } => self.relocate(position)?,
            }
            self.sync.complete(request.token());
        }

        self.release_finished_files();

        let freed = self.instruments.scavenger().sweep()
            + self.file_scavenger.sweep()
            + self.record_scavenger.sweep();
        if freed > 0 {
            tracing::trace!("Scavenged {} objects", freed);
        }

        self.grow_pool();

        for code in self.failures.drain() {
            self.notifier.send(Notification::Failure(code));
        }
        let dropped = self.failures.take_dropped();
        if dropped > 0 {
            tracing::warn!("{} failure reports lost to a full queue", dropped);
            self.notifier.send(Notification::FailuresDropped(dropped));
        }
        while let Ok(id) = self.completions.try_recv() {
            tracing::info!("Recording {} complete", id);
            self.notifier.send(Notification::RecordComplete(id));
        }
        Ok(())
    }

    fn release_finished_files(&self) {
        let mut events = self.events.lock();
        let mut queue = self.queue.lock();

        let finished: Vec<_> = queue
            .scheduled_files()
            .iter()
            .chain(queue.unscheduled_files())
            .filter(|f| f.is_finished())
            .cloned()
            .collect();
        for file in finished {
            if let Some(file) = queue.erase(&file) {
                self.file_scavenger.retire(file);
            }
        }
        // Previews are forgotten once played; scheduled events stay for
        // later relocations.
        events.retain(|_, event| {
            if event.playing.as_ref().is_some_and(|f| f.is_finished()) {
                event.playing = None;
            }
            event.audio.is_some() || event.playing.is_some()
        });

        let previewing = !queue.unscheduled_files().is_empty();
        self.instruments
            .set_run_when_stopped(previewing || self.instruments.has_synth_plugins());
    }

    fn grow_pool(&self) {
        let refused = self.pool.take_refused_count();
        let required = self.queue.lock().max_buffers_required();
        let size = self.pool.pool_size();
        let wanted = required.max(if refused > 0 { size + refused } else { 0 });
        if wanted > size {
            tracing::info!("Growing ring buffer pool from {} to {}", size, wanted);
            self.pool.set_pool_size(wanted);
        }
    }

    /// Failures reported since the last call or the last
    /// [`housekeeping`](Self::housekeeping), oldest first.
    pub fn take_failures(&self) -> Vec<FailureCode> {
        self.failures.drain()
    }

    /// Notifications forwarded by [`housekeeping`](Self::housekeeping).
    pub fn take_notifications(&self) -> Vec<Notification> {
        self.notifier.drain()
    }

    /// A receiver for the notification stream.
    pub fn notifications(&self) -> Receiver<Notification> {
        self.notifier.receiver()
    }
}

impl Drop for SoundDriver {
    fn drop(&mut self) {
        let mut open = false;
        for index in 0..self.record_slots.len() {
            if let Some(file) = self.record_slots.load_full(index) {
                file.close();
                open = true;
            }
        }
        if open {
            self.file_writer.terminate();
            self.file_writer.lock().service();
        }
    }
}

impl std::fmt::Debug for SoundDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundDriver")
            .field("sample_rate", &self.config.sample_rate)
            .field("block_size", &self.config.block_size)
            .field("position", &self.clock.position())
            .field("playing", &self.clock.is_running())
            .field("instruments", &self.instruments.len())
            .field("busses", &self.busses.len())
            .finish()
    }
}
