//! Host wrapper around one plugin instance.
//!
//! Control threads set ports, bypass and queue events without touching the
//! instance; the mixing thread picks the changes up when it runs the plugin.
//! The instance sits behind a mutex that the mixing path only `try_lock`s;
//! while a control thread holds it (program change, reset) the block is
//! skipped.

use crate::descriptor::{PluginDescriptor, PluginIdentifier, PluginKind};
use crate::error::{PluginError, Result};
use crate::instance::{PluginEvent, PluginInstance, PortBuffers};
use crossbeam::queue::ArrayQueue;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tessitura_core::AtomicFloat;

pub const DEFAULT_EVENT_CAPACITY: usize = 512;

struct SlotState {
    instance: Box<dyn PluginInstance>,
    io: PortBuffers,
    applied_generation: u64,
    events: Vec<PluginEvent>,
}

/// A plugin owned by an instrument or buss.
pub struct PluginSlot {
    descriptor: PluginDescriptor,
    state: Mutex<SlotState>,
    /// Indexed by port; only control inputs are meaningful.
    ports: Box<[AtomicFloat]>,
    generation: AtomicU64,
    bypassed: AtomicBool,
    events: ArrayQueue<PluginEvent>,
    latency: AtomicUsize,
}

impl PluginSlot {
    pub fn new(instance: Box<dyn PluginInstance>, max_frames: usize) -> Self {
        Self::with_event_capacity(instance, max_frames, DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_event_capacity(
        mut instance: Box<dyn PluginInstance>,
        max_frames: usize,
        event_capacity: usize,
    ) -> Self {
        let descriptor = instance.descriptor().clone();
        let ports: Box<[AtomicFloat]> = descriptor
            .ports
            .iter()
            .map(|p| AtomicFloat::new(p.hint.default))
            .collect();
        for port in descriptor.control_inputs() {
            instance.set_control(port, descriptor.ports[port].hint.default);
        }
        let latency = instance.latency();
        let io = PortBuffers::for_descriptor(&descriptor, max_frames);

        Self {
            descriptor,
            state: Mutex::new(SlotState {
                instance,
                io,
                applied_generation: 0,
                events: Vec::with_capacity(event_capacity),
            }),
            ports,
            generation: AtomicU64::new(0),
            bypassed: AtomicBool::new(false),
            events: ArrayQueue::new(event_capacity.max(1)),
            latency: AtomicUsize::new(latency),
        }
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn identifier(&self) -> &PluginIdentifier {
        &self.descriptor.identifier
    }

    pub fn kind(&self) -> PluginKind {
        self.descriptor.kind
    }

    /// Set a control input, clamped to its hint. Returns the stored value.
    pub fn set_port(&self, port: usize, value: f32) -> Result<f32> {
        let desc = self.descriptor.ports.get(port).ok_or(PluginError::PortOutOfRange {
            port,
            count: self.descriptor.ports.len(),
        })?;
        if !desc.is_control_input() {
            return Err(PluginError::NotAControl(port));
        }
        let value = desc.hint.clamp(value);
        self.ports[port].set(value);
        self.generation.fetch_add(1, Ordering::Release);
        Ok(value)
    }

    pub fn port_value(&self, port: usize) -> Option<f32> {
        self.ports.get(port).map(|p| p.get())
    }

    pub fn set_bypass(&self, bypass: bool) {
        self.bypassed.store(bypass, Ordering::Release);
    }

    pub fn is_bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Acquire)
    }

    /// Queue an event for the next run. Returns `false` when the queue is full.
    pub fn send_event(&self, event: PluginEvent) -> bool {
        self.events.push(event).is_ok()
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Drop queued events. Real-time safe.
    pub fn discard_events(&self) {
        while self.events.pop().is_some() {}
    }

    /// Latency reported by the plugin when last run, in frames.
    pub fn latency(&self) -> usize {
        self.latency.load(Ordering::Relaxed)
    }

    /// Select a program. Blocks on the instance lock; not for the mixing path.
    pub fn select_program(&self, bank: u32, program: u32) -> Result<()> {
        if !self.descriptor.has_program(bank, program) {
            return Err(PluginError::ProgramNotFound { bank, program });
        }
        let mut state = self.state.lock();
        if state.instance.select_program(bank, program) {
            Ok(())
        } else {
            Err(PluginError::ProgramNotFound { bank, program })
        }
    }

    /// Return the plugin to its initial state. Blocks on the instance lock.
    pub fn reset(&self, discard_events: bool) {
        if discard_events {
            self.discard_events();
        }
        let mut state = self.state.lock();
        state.instance.reset();
    }

    /// Lock the instance for one block. `None` when another thread holds it.
    #[inline]
    pub fn try_activate(&self) -> Option<ActivePlugin<'_>> {
        self.state.try_lock().map(|state| ActivePlugin { slot: self, state })
    }
}

impl std::fmt::Debug for PluginSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSlot")
            .field("identifier", &self.descriptor.identifier)
            .field("bypassed", &self.is_bypassed())
            .finish()
    }
}

/// A plugin locked for processing one block.
pub struct ActivePlugin<'a> {
    slot: &'a PluginSlot,
    state: MutexGuard<'a, SlotState>,
}

impl ActivePlugin<'_> {
    pub fn inputs_mut(&mut self) -> &mut [Vec<f32>] {
        &mut self.state.io.inputs
    }

    pub fn outputs(&self) -> &[Vec<f32>] {
        &self.state.io.outputs
    }

    pub fn max_frames(&self) -> usize {
        self.state.io.max_frames()
    }

    /// Apply pending port changes, drain queued events and run the plugin
    /// over `frames` frames of the connected buffers.
    pub fn run(&mut self, frames: usize) {
        let slot = self.slot;
        let SlotState {
            instance,
            io,
            applied_generation,
            events,
        } = &mut *self.state;

        let generation = slot.generation.load(Ordering::Acquire);
        if generation != *applied_generation {
            for port in slot.descriptor.control_inputs() {
                instance.set_control(port, slot.ports[port].get());
            }
            *applied_generation = generation;
        }

        events.clear();
        while events.len() < events.capacity() {
            match slot.events.pop() {
                Some(event) => events.push(event),
                None => break,
            }
        }

        let frames = frames.min(io.max_frames());
        instance.run(io, frames, events);
        slot.latency.store(instance.latency(), Ordering::Relaxed);
    }
}
