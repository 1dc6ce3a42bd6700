//! Submix busses.
//!
//! ```text
//! instrument rings ──reader 0──▶ AudioBussMixer ──▶ buss rings ──▶ callback
//!        │
//!        └──────────reader 1──────────────────────────────────────▶ callback
//! ```
//!
//! Routing is an immutable [`Routing`] snapshot swapped in by the control
//! thread. The buss mixer loads it once per pass, so a routing change never
//! lands in the middle of a period.

use crate::chain::PluginSlots;
use crate::instrument::{InstrumentBank, BUSS_READER};
use crate::{Error, Result};
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tessitura_core::{
    frames_to_duration, peak_of, AtomicFlag, AtomicFloat, AtomicStereoGain, AudioWorker, BussId,
    EngineConfig, LevelReading, OutputTarget, PanLaw, PeakMeter, SampleRing, Scavenger,
    StereoGain,
};
use tessitura_plugin::{PluginError, PluginKind, PluginSlot};

/// Which buss every instrument feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    targets: Box<[OutputTarget]>,
    members: Box<[Vec<usize>]>,
    unassigned: Vec<usize>,
}

impl Routing {
    /// Every instrument straight to the master.
    pub fn new(instruments: usize, busses: usize) -> Self {
        Self::from_targets(vec![OutputTarget::Master; instruments], busses)
    }

    /// Build from one target per instrument index. Targets naming a buss
    /// that does not exist fall back to the master.
    pub fn from_targets(targets: Vec<OutputTarget>, busses: usize) -> Self {
        let mut members = vec![Vec::new(); busses];
        let mut unassigned = Vec::new();
        let targets: Box<[OutputTarget]> = targets
            .into_iter()
            .enumerate()
            .map(|(instrument, target)| match buss_index(target, busses) {
                Some(buss) => {
                    members[buss].push(instrument);
                    target
                }
                None => {
                    unassigned.push(instrument);
                    OutputTarget::Master
                }
            })
            .collect();
        Self {
            targets,
            members: members.into_boxed_slice(),
            unassigned,
        }
    }

    pub fn target(&self, instrument: usize) -> OutputTarget {
        self.targets
            .get(instrument)
            .copied()
            .unwrap_or(OutputTarget::Master)
    }

    pub fn targets(&self) -> &[OutputTarget] {
        &self.targets
    }

    /// Instrument indices feeding buss `buss`.
    #[inline]
    pub fn members(&self, buss: usize) -> &[usize] {
        self.members.get(buss).map_or(&[][..], Vec::as_slice)
    }

    /// Instrument indices going straight to the master.
    #[inline]
    pub fn unassigned(&self) -> &[usize] {
        &self.unassigned
    }

    /// Whether the callback mixes this instrument into the master itself.
    #[inline]
    pub fn is_direct(&self, instrument: usize) -> bool {
        self.target(instrument) == OutputTarget::Master
    }

    fn with_target(&self, instrument: usize, target: OutputTarget) -> Self {
        let mut targets = self.targets.to_vec();
        targets[instrument] = target;
        Self::from_targets(targets, self.members.len())
    }
}

/// Dense buss index of a target, `None` for the master.
fn buss_index(target: OutputTarget, busses: usize) -> Option<usize> {
    match target {
        OutputTarget::Buss(id) if !id.is_master() => {
            let index = id.0 as usize - 1;
            (index < busses).then_some(index)
        }
        _ => None,
    }
}

/// One buss's shared state.
pub struct BussStrip {
    id: BussId,
    rings: [SampleRing; 2],
    level: AtomicFloat,
    pan: AtomicFloat,
    gain: AtomicStereoGain,
    dormant: AtomicFlag,
    zero_run: AtomicUsize,
    meter: PeakMeter,
    effects: PluginSlots,
}

impl BussStrip {
    fn new(id: BussId, ring_frames: usize, effect_slots: usize) -> Self {
        Self {
            id,
            rings: [SampleRing::new(ring_frames), SampleRing::new(ring_frames)],
            level: AtomicFloat::new(0.0),
            pan: AtomicFloat::new(0.0),
            gain: AtomicStereoGain::new(StereoGain::UNITY),
            dormant: AtomicFlag::new(false),
            zero_run: AtomicUsize::new(0),
            meter: PeakMeter::new(),
            effects: PluginSlots::new(effect_slots),
        }
    }

    pub fn id(&self) -> BussId {
        self.id
    }

    #[inline]
    pub fn rings(&self) -> &[SampleRing; 2] {
        &self.rings
    }

    #[inline]
    pub fn read_space(&self) -> usize {
        self.rings[0].read_space(0).min(self.rings[1].read_space(0))
    }

    #[inline]
    pub fn write_space(&self) -> usize {
        self.rings[0].write_space().min(self.rings[1].write_space())
    }

    pub fn level(&self) -> f32 {
        self.level.get()
    }

    pub fn pan(&self) -> f32 {
        self.pan.get()
    }

    pub fn gain(&self) -> StereoGain {
        self.gain.get()
    }

    pub fn is_dormant(&self) -> bool {
        self.dormant.get()
    }

    pub fn meter(&self) -> &PeakMeter {
        &self.meter
    }

    pub fn effects(&self) -> &PluginSlots {
        &self.effects
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
    }

    fn reset(&self) {
        for ring in &self.rings {
            ring.reset();
        }
        self.zero_run.store(0, Ordering::Relaxed);
        self.dormant.set(false);
        self.meter.reset();
    }
}

impl std::fmt::Debug for BussStrip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BussStrip")
            .field("id", &self.id)
            .field("dormant", &self.is_dormant())
            .finish()
    }
}

/// Every buss plus the routing snapshot.
pub struct BussBank {
    busses: Box<[BussStrip]>,
    routing: ArcSwap<Routing>,
    instruments: Arc<InstrumentBank>,
    pan_law: PanLaw,
    scavenger: Arc<Scavenger<PluginSlot>>,
}

impl BussBank {
    pub fn new(config: &EngineConfig, instruments: Arc<InstrumentBank>) -> Self {
        Self::with_ring_frames(
            config.busses,
            config.buss_ring_frames(),
            config.buss_plugin_slots,
            instruments,
        )
    }

    pub fn with_ring_frames(
        busses: usize,
        ring_frames: usize,
        effect_slots: usize,
        instruments: Arc<InstrumentBank>,
    ) -> Self {
        let routing = Routing::new(instruments.len(), busses);
        Self {
            busses: (0..busses)
                .map(|i| BussStrip::new(BussId(i as u32 + 1), ring_frames, effect_slots))
                .collect(),
            routing: ArcSwap::from_pointee(routing),
            pan_law: instruments.pan_law(),
            scavenger: Arc::clone(instruments.scavenger()),
            instruments,
        }
    }

    pub fn len(&self) -> usize {
        self.busses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.busses.is_empty()
    }

    pub fn busses(&self) -> &[BussStrip] {
        &self.busses
    }

    pub fn buss(&self, index: usize) -> Result<&BussStrip> {
        self.busses.get(index).ok_or(Error::BussOutOfRange(index))
    }

    /// Dense index of a buss id. The master has none.
    pub fn index_of(&self, id: BussId) -> Result<usize> {
        buss_index(OutputTarget::Buss(id), self.busses.len()).ok_or(Error::BussOutOfRange(id.0 as usize))
    }

    pub fn instruments(&self) -> &Arc<InstrumentBank> {
        &self.instruments
    }

    /// Current routing snapshot.
    pub fn routing(&self) -> Arc<Routing> {
        self.routing.load_full()
    }

    /// Replace the whole routing table.
    pub fn set_routing(&self, routing: Routing) {
        self.routing.store(Arc::new(routing));
    }

    /// Route one instrument.
    pub fn set_instrument_output(&self, instrument: usize, target: OutputTarget) -> Result<()> {
        self.instruments.strip(instrument)?;
        if let OutputTarget::Buss(id) = target {
            if !id.is_master() {
                self.index_of(id)?;
            }
        }
        let routing = self.routing.load().with_target(instrument, target);
        self.routing.store(Arc::new(routing));
        Ok(())
    }

    pub fn set_buss_levels(&self, index: usize, db: f32, pan: f32) -> Result<()> {
        let buss = self.buss(index)?;
        let pan = pan.clamp(-1.0, 1.0);
        buss.level.set(db);
        buss.pan.set(pan);
        buss.gain.set(balance(db, pan, self.pan_law));
        Ok(())
    }

    pub fn take_level(&self, index: usize) -> Result<LevelReading> {
        Ok(self.buss(index)?.meter.take())
    }

    pub fn buss_latency(&self, index: usize) -> Result<usize> {
        Ok(self.buss(index)?.effects.latency())
    }

    pub fn set_plugin(&self, index: usize, slot: usize, plugin: Arc<PluginSlot>) -> Result<()> {
        let buss = self.buss(index)?;
        check_slot(slot, buss.effects.len())?;
        if plugin.kind() != PluginKind::AudioEffect {
            return Err(PluginError::KindMismatch {
                expected: PluginKind::AudioEffect,
                found: plugin.kind(),
            }
            .into());
        }
        tracing::debug!("Buss {}: effect {} in slot {}", buss.id.0, plugin.identifier(), slot);
        buss.effects.replace(slot, Some(plugin), &self.scavenger);
        Ok(())
    }

    pub fn remove_plugin(&self, index: usize, slot: usize) -> Result<bool> {
        let buss = self.buss(index)?;
        check_slot(slot, buss.effects.len())?;
        Ok(buss.effects.replace(slot, None, &self.scavenger))
    }

    pub fn plugin(&self, index: usize, slot: usize) -> Result<Option<Arc<PluginSlot>>> {
        let buss = self.buss(index)?;
        check_slot(slot, buss.effects.len())?;
        Ok(buss.effects.load_full(slot))
    }

    pub fn clear_plugins(&self) {
        for buss in self.busses.iter() {
            buss.effects.clear(&self.scavenger);
        }
    }

    pub fn reset_all_plugins(&self, discard_events: bool) {
        for plugin in self.busses.iter().flat_map(|b| b.effects.occupied()) {
            plugin.reset(discard_events);
        }
    }

    pub fn discard_plugin_events(&self) {
        for plugin in self.busses.iter().flat_map(|b| b.effects.occupied()) {
            plugin.discard_events();
        }
    }

    /// Empty every buss ring. Same exclusion rules as
    /// [`InstrumentBank::reset_buffers`].
    pub fn reset_buffers(&self) {
        for buss in self.busses.iter() {
            buss.reset();
        }
    }
}

impl std::fmt::Debug for BussBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BussBank")
            .field("busses", &self.busses.len())
            .field("routing", &self.routing.load_full())
            .finish()
    }
}

/// Busses are stereo: pan is a balance control.
fn balance(db: f32, pan: f32, law: PanLaw) -> StereoGain {
    let centre = StereoGain::from_level(0.0, 0.0, law);
    let gain = StereoGain::from_level(db, pan, law);
    StereoGain {
        left: gain.left / centre.left,
        right: gain.right / centre.right,
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

/// Worker summing instruments into busses.
pub struct AudioBussMixer {
    bank: Arc<BussBank>,
    block_size: usize,
    buffer_duration: Duration,
    scratch: Vec<Vec<f32>>,
}

impl AudioBussMixer {
    pub fn new(bank: Arc<BussBank>, config: &EngineConfig) -> Self {
        Self {
            bank,
            block_size: config.block_size,
            buffer_duration: frames_to_duration(
                config.buss_ring_frames() as u64,
                config.sample_rate,
            ),
            scratch: vec![vec![0.0; config.block_size]; 2],
        }
    }

    pub fn bank(&self) -> &Arc<BussBank> {
        &self.bank
    }

    /// Whole periods every buss can take and every contributing instrument
    /// can give.
    fn available_periods(&self, routing: &Routing) -> usize {
        let instruments = &self.bank.instruments;
        let mut frames = usize::MAX;
        for (index, buss) in self.bank.busses.iter().enumerate() {
            frames = frames.min(buss.write_space());
            for &member in routing.members(index) {
                // Idle members still advance a period at a time, so waiting
                // on them keeps every member at the same position.
                frames = frames.min(instruments.strips()[member].read_space(BUSS_READER));
            }
        }
        frames / self.block_size
    }

    /// Mix every whole period available. Returns periods written.
    pub fn process_blocks(&mut self) -> usize {
        let routing = self.bank.routing.load_full();
        let instruments = Arc::clone(&self.bank.instruments);

        if self.bank.busses.is_empty() {
            // Nothing reads reader 0; keep it from holding back the mixer.
            for strip in instruments.strips() {
                strip.skip(strip.read_space(BUSS_READER), BUSS_READER);
            }
            return 0;
        }

        let periods = self.available_periods(&routing);
        for _ in 0..periods {
            self.mix_period(&routing, &instruments);
        }
        periods
    }

    fn mix_period(&mut self, routing: &Routing, instruments: &InstrumentBank) {
        let period = self.block_size;
        let bank = &self.bank;
        let scratch = &mut self.scratch;

        for (index, buss) in bank.busses.iter().enumerate() {
            for buffer in scratch.iter_mut() {
                buffer[..period].fill(0.0);
            }

            for &member in routing.members(index) {
                let strip = &instruments.strips()[member];
                if strip.is_dormant() {
                    strip.skip(period, BUSS_READER);
                    continue;
                }
                for (ring, buffer) in strip.rings().iter().zip(scratch.iter_mut()) {
                    ring.read_adding(&mut buffer[..period], BUSS_READER);
                }
            }

            buss.effects.run(scratch.as_mut_slice(), 2, period);

            let gain = buss.gain.get();
            let (left, right) = scratch.split_at_mut(1);
            let (left, right) = (&mut left[0][..period], &mut right[0][..period]);
            for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                *l *= gain.left;
                *r *= gain.right;
            }

            let peak_left = peak_of(left);
            let peak_right = peak_of(right);
            buss.meter.update_values(peak_left, peak_right);
            buss.rings[0].write(left);
            buss.rings[1].write(right);
            buss.note_written(period, peak_left == 0.0 && peak_right == 0.0);
        }

        for &instrument in routing.unassigned() {
            instruments.strips()[instrument].skip(period, BUSS_READER);
        }
    }
}

impl AudioWorker for AudioBussMixer {
    fn kick(&mut self) {
        self.process_blocks();
    }

    fn buffer_duration(&self) -> Duration {
        self.buffer_duration
    }

    fn kick_when_stopped(&self) -> bool {
        self.bank.instruments.run_when_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::PluginPosition;
    use crate::instrument::{AudioInstrumentMixer, CALLBACK_READER};
    use approx::assert_relative_eq;
    use parking_lot::Mutex;
    use tessitura_core::{EpochCounter, InstrumentLayout};
    use tessitura_plugin::{AmpPlugin, PluginEvent, SineSynth};
    use tessitura_stream::{AudioPlayQueue, SharedPlayQueue};

    const BLOCK: usize = 64;

    fn config() -> EngineConfig {
        EngineConfig::default().block_size(BLOCK).busses(1)
    }

    fn instruments(audio: usize, synth: usize) -> Arc<InstrumentBank> {
        let scavenger = Arc::new(Scavenger::new(Arc::new(EpochCounter::new())));
        Arc::new(InstrumentBank::with_ring_frames(
            InstrumentLayout::new(audio, synth),
            BLOCK * 4,
            1,
            PanLaw::ConstantPower,
            scavenger,
        ))
    }

    fn drain_callback(instruments: &InstrumentBank, busses: &BussBank) -> usize {
        for strip in instruments.strips() {
            strip.skip(strip.read_space(CALLBACK_READER), CALLBACK_READER);
        }
        let mut drained = 0;
        for buss in busses.busses() {
            let n = buss.read_space();
            buss.rings()[0].skip(n, 0);
            buss.rings()[1].skip(n, 0);
            drained = n;
        }
        drained
    }

    #[test]
    fn test_routing_snapshot() {
        let routing = Routing::from_targets(
            vec![
                OutputTarget::Buss(BussId(1)),
                OutputTarget::Master,
                OutputTarget::Buss(BussId(7)),
                OutputTarget::Buss(BussId(0)),
            ],
            2,
        );
        assert_eq!(routing.members(0), &[0]);
        assert!(routing.members(1).is_empty());
        assert_eq!(routing.unassigned(), &[1, 2, 3]);
        assert!(routing.is_direct(2));
        assert!(!routing.is_direct(0));
        assert_eq!(routing.members(5), &[] as &[usize]);
    }

    #[test]
    fn test_dormant_member_stays_in_lockstep() {
        let instruments = instruments(1, 1);
        let busses = Arc::new(BussBank::with_ring_frames(1, BLOCK * 4, 1, Arc::clone(&instruments)));
        busses.set_instrument_output(0, OutputTarget::Buss(BussId(1))).unwrap();
        busses.set_instrument_output(1, OutputTarget::Buss(BussId(1))).unwrap();

        let synth = Arc::new(PluginSlot::new(Box::new(SineSynth::new(48_000)), BLOCK));
        synth.send_event(PluginEvent::NoteOn {
            frame: 0,
            note: 60,
            velocity: 100,
        });
        instruments.set_plugin(1, PluginPosition::Synth, synth).unwrap();

        let queue: SharedPlayQueue = Arc::new(Mutex::new(AudioPlayQueue::new()));
        let failures = Arc::new(tessitura_core::FailureReporter::default());
        let mut instrument_mixer =
            AudioInstrumentMixer::new(Arc::clone(&instruments), queue, failures, &config());
        let mut buss_mixer = AudioBussMixer::new(Arc::clone(&busses), &config());

        let idle = &instruments.strips()[0];
        let active = &instruments.strips()[1];
        let mut periods = 0;
        while periods < 100 {
            instrument_mixer.process_blocks();
            assert!(idle.is_dormant());
            assert!(!active.is_dormant());
            periods += buss_mixer.process_blocks();
            assert_eq!(idle.read_space(BUSS_READER), active.read_space(BUSS_READER));
            assert_eq!(idle.block_position(), active.block_position());
            drain_callback(&instruments, &busses);
        }
        assert!(busses.buss(0).unwrap().meter().take().max() > 0.0);
    }

    #[test]
    fn test_unassigned_instruments_are_drained() {
        let instruments = instruments(2, 0);
        let busses = Arc::new(BussBank::with_ring_frames(1, BLOCK * 4, 1, Arc::clone(&instruments)));
        let queue: SharedPlayQueue = Arc::new(Mutex::new(AudioPlayQueue::new()));
        let failures = Arc::new(tessitura_core::FailureReporter::default());
        let mut instrument_mixer =
            AudioInstrumentMixer::new(Arc::clone(&instruments), queue, failures, &config());
        let mut buss_mixer = AudioBussMixer::new(Arc::clone(&busses), &config());

        instrument_mixer.process_blocks();
        assert_eq!(buss_mixer.process_blocks(), 4);
        for strip in instruments.strips() {
            assert_eq!(strip.read_space(BUSS_READER), 0);
            assert_eq!(strip.read_space(CALLBACK_READER), BLOCK * 4);
        }
        let buss = busses.buss(0).unwrap();
        assert_eq!(buss.read_space(), BLOCK * 4);
        assert!(buss.is_dormant());
    }

    #[test]
    fn test_no_busses_drains_everything() {
        let instruments = instruments(2, 0);
        let busses = Arc::new(BussBank::with_ring_frames(0, BLOCK * 4, 1, Arc::clone(&instruments)));
        let queue: SharedPlayQueue = Arc::new(Mutex::new(AudioPlayQueue::new()));
        let failures = Arc::new(tessitura_core::FailureReporter::default());
        let mut instrument_mixer =
            AudioInstrumentMixer::new(Arc::clone(&instruments), queue, failures, &config());
        let mut buss_mixer = AudioBussMixer::new(busses, &config());

        instrument_mixer.process_blocks();
        assert_eq!(buss_mixer.process_blocks(), 0);
        assert!(instruments
            .strips()
            .iter()
            .all(|s| s.read_space(BUSS_READER) == 0));
    }

    #[test]
    fn test_buss_levels_and_plugins() {
        let instruments = instruments(1, 0);
        let busses = BussBank::with_ring_frames(2, BLOCK * 4, 1, Arc::clone(&instruments));

        busses.set_buss_levels(0, 0.0, 0.0).unwrap();
        let unity = busses.buss(0).unwrap().gain();
        assert_relative_eq!(unity.left, 1.0, epsilon = 1e-6);
        assert_relative_eq!(unity.right, 1.0, epsilon = 1e-6);
        busses.set_buss_levels(1, -6.0, 1.0).unwrap();
        assert!(busses.buss(1).unwrap().gain().left.abs() < 1e-6);
        assert!(matches!(busses.set_buss_levels(2, 0.0, 0.0), Err(Error::BussOutOfRange(2))));

        assert_eq!(busses.index_of(BussId(2)).unwrap(), 1);
        assert!(busses.index_of(BussId::MASTER).is_err());
        assert!(busses
            .set_instrument_output(0, OutputTarget::Buss(BussId(3)))
            .is_err());

        let amp = Arc::new(PluginSlot::new(Box::new(AmpPlugin::new(2)), BLOCK));
        busses.set_plugin(1, 0, amp).unwrap();
        assert!(busses.plugin(1, 0).unwrap().is_some());
        assert!(matches!(
            busses.set_plugin(1, 1, Arc::new(PluginSlot::new(Box::new(AmpPlugin::new(2)), BLOCK))),
            Err(Error::SlotOutOfRange { position: 1, slots: 1 })
        ));
        assert!(busses.remove_plugin(1, 0).unwrap());
        assert_eq!(instruments.scavenger().pending(), 1);
    }
}
