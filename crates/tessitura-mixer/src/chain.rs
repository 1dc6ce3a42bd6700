//! Fixed plugin slot arrays and channel adaptation at plugin boundaries.
//!
//! A strip has one or two channels; a plugin has whatever audio port counts
//! its descriptor declares. Going in, missing inputs duplicate the strip's
//! channels up to two and zero-fill the rest. Coming out, extra outputs are
//! discarded, except that a mono strip folds output 1 into output 0 by
//! averaging, and a mono plugin on a stereo strip feeds both channels.

use arc_swap::{ArcSwapOption, Guard};
use std::sync::Arc;
use tessitura_core::Scavenger;
use tessitura_plugin::{ActivePlugin, PluginSlot};

/// Where a plugin sits on an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginPosition {
    /// The synth seeding a synth instrument.
    Synth,
    /// An effect, run in slot order.
    Effect(usize),
}

/// A fixed number of plugin slots, swapped by the control thread and loaded
/// lock-free by the mixer.
pub struct PluginSlots {
    slots: Box<[ArcSwapOption<PluginSlot>]>,
}

impl PluginSlots {
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count).map(|_| ArcSwapOption::empty()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn get(&self, position: usize) -> Option<Guard<Option<Arc<PluginSlot>>>> {
        self.slots.get(position).map(|s| s.load())
    }

    pub fn load_full(&self, position: usize) -> Option<Arc<PluginSlot>> {
        self.slots.get(position).and_then(|s| s.load_full())
    }

    /// Replace the plugin at `position`, retiring the previous one.
    /// `position` must be in range.
    pub fn replace(
        &self,
        position: usize,
        plugin: Option<Arc<PluginSlot>>,
        scavenger: &Scavenger<PluginSlot>,
    ) -> bool {
        let previous = self.slots[position].swap(plugin);
        match previous {
            Some(old) => {
                scavenger.retire(old);
                true
            }
            None => false,
        }
    }

    /// Whether any occupied slot is not bypassed.
    #[inline]
    pub fn any_live(&self) -> bool {
        self.slots
            .iter()
            .any(|s| s.load().as_ref().is_some_and(|p| !p.is_bypassed()))
    }

    pub fn occupied(&self) -> impl Iterator<Item = Arc<PluginSlot>> + '_ {
        self.slots.iter().filter_map(|s| s.load_full())
    }

    /// Sum of the reported latencies of live plugins.
    pub fn latency(&self) -> usize {
        self.occupied()
            .filter(|p| !p.is_bypassed())
            .map(|p| p.latency())
            .sum()
    }

    /// Retire every plugin.
    pub fn clear(&self, scavenger: &Scavenger<PluginSlot>) {
        for slot in self.slots.iter() {
            if let Some(old) = slot.swap(None) {
                scavenger.retire(old);
            }
        }
    }

    /// Run every live plugin in slot order over `buffers[..channels]`.
    /// Plugins whose instance is busy on another thread are passed through.
    pub fn run(&self, buffers: &mut [Vec<f32>], channels: usize, frames: usize) {
        for slot in self.slots.iter() {
            let guard = slot.load();
            let Some(plugin) = guard.as_ref() else {
                continue;
            };
            if plugin.is_bypassed() {
                continue;
            }
            if let Some(mut active) = plugin.try_activate() {
                run_effect(&mut active, buffers, channels, frames);
            };
        }
    }
}

/// Copy the strip's channels into the plugin inputs.
#[inline]
pub fn feed_inputs(active: &mut ActivePlugin<'_>, buffers: &[Vec<f32>], channels: usize, frames: usize) {
    let channels = channels.min(buffers.len());
    for (i, input) in active.inputs_mut().iter_mut().enumerate() {
        let frames = frames.min(input.len());
        let source = if i < channels {
            Some(i)
        } else if i < 2 && channels > 0 {
            Some(i % channels)
        } else {
            None
        };
        match source {
            Some(c) => input[..frames].copy_from_slice(&buffers[c][..frames]),
            None => input[..frames].fill(0.0),
        }
    }
}

/// Copy the plugin outputs back over the strip's channels.
#[inline]
pub fn collect_outputs(active: &ActivePlugin<'_>, buffers: &mut [Vec<f32>], channels: usize, frames: usize) {
    let outputs = active.outputs();
    let channels = channels.min(buffers.len());
    if outputs.is_empty() || channels == 0 {
        return;
    }
    let frames = frames.min(outputs[0].len());

    if channels == 1 && outputs.len() >= 2 {
        for ((d, l), r) in buffers[0][..frames]
            .iter_mut()
            .zip(&outputs[0][..frames])
            .zip(&outputs[1][..frames])
        {
            *d = (l + r) * 0.5;
        }
        return;
    }
    for (c, buffer) in buffers[..channels].iter_mut().enumerate() {
        let output = &outputs[c.min(outputs.len() - 1)];
        buffer[..frames].copy_from_slice(&output[..frames]);
    }
}

/// Run one effect in place over the strip's buffers.
#[inline]
pub fn run_effect(active: &mut ActivePlugin<'_>, buffers: &mut [Vec<f32>], channels: usize, frames: usize) {
    feed_inputs(active, buffers, channels, frames);
    active.run(frames);
    collect_outputs(active, buffers, channels, frames);
}

/// Run a synth and write its output over the strip's buffers.
#[inline]
pub fn run_synth(active: &mut ActivePlugin<'_>, buffers: &mut [Vec<f32>], channels: usize, frames: usize) {
    for input in active.inputs_mut() {
        let n = frames.min(input.len());
        input[..n].fill(0.0);
    }
    active.run(frames);
    collect_outputs(active, buffers, channels, frames);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessitura_core::EpochCounter;
    use tessitura_plugin::{AmpPlugin, SineSynth};

    fn amp(channels: usize) -> Arc<PluginSlot> {
        Arc::new(PluginSlot::new(Box::new(AmpPlugin::new(channels)), 64))
    }

    #[test]
    fn test_mono_plugin_on_stereo_strip() {
        let slot = amp(1);
        slot.set_port(0, 6.0).unwrap();
        let mut buffers = vec![vec![0.5; 64], vec![0.25; 64]];
        let mut active = slot.try_activate().unwrap();
        run_effect(&mut active, &mut buffers, 2, 64);
        let g = tessitura_core::db_to_gain(6.0);
        assert!((buffers[0][0] - 0.5 * g).abs() < 1e-6);
        // The single output feeds both channels.
        assert!((buffers[1][0] - 0.5 * g).abs() < 1e-6);
    }

    #[test]
    fn test_stereo_plugin_on_mono_strip_folds() {
        let slot = amp(2);
        let mut buffers = vec![vec![0.5; 64], vec![9.0; 64]];
        let mut active = slot.try_activate().unwrap();
        run_effect(&mut active, &mut buffers, 1, 64);
        // Input 1 duplicates channel 0, so the fold is an average of equals.
        assert!((buffers[0][10] - 0.5).abs() < 1e-6);
        // Channel 1 is not part of the strip and stays untouched.
        assert_eq!(buffers[1][10], 9.0);
    }

    #[test]
    fn test_synth_seeds_buffers() {
        let slot = Arc::new(PluginSlot::new(Box::new(SineSynth::new(48_000)), 64));
        slot.send_event(tessitura_plugin::PluginEvent::NoteOn {
            frame: 0,
            note: 69,
            velocity: 127,
        });
        let mut buffers = vec![vec![0.0; 64]; 2];
        let mut active = slot.try_activate().unwrap();
        run_synth(&mut active, &mut buffers, 2, 64);
        assert!(buffers[0].iter().any(|s| *s != 0.0));
        assert_eq!(buffers[0], buffers[1]);
    }

    #[test]
    fn test_slots_replace_and_bypass() {
        let scavenger = Scavenger::new(Arc::new(EpochCounter::new()));
        let slots = PluginSlots::new(3);
        assert!(!slots.any_live());

        assert!(!slots.replace(1, Some(amp(2)), &scavenger));
        assert!(slots.any_live());
        slots.load_full(1).unwrap().set_bypass(true);
        assert!(!slots.any_live());

        assert!(slots.replace(1, None, &scavenger));
        assert_eq!(scavenger.pending(), 1);
        assert!(slots.get(7).is_none());
    }

    #[test]
    fn test_busy_plugin_is_passed_through() {
        let slots = PluginSlots::new(1);
        let scavenger = Scavenger::new(Arc::new(EpochCounter::new()));
        let plugin = amp(2);
        plugin.set_port(0, -70.0).unwrap();
        slots.replace(0, Some(Arc::clone(&plugin)), &scavenger);

        let held = plugin.try_activate().unwrap();
        let mut buffers = vec![vec![0.5; 64]; 2];
        slots.run(&mut buffers, 2, 64);
        assert_eq!(buffers[0][0], 0.5);
        drop(held);

        slots.run(&mut buffers, 2, 64);
        assert!(buffers[0][0].abs() < 1e-3);
    }
}
