//! Builder for configuring and constructing a [`SoundDriver`].

use crate::{Result, SoundDriver};
use std::path::PathBuf;
use std::sync::Arc;
use tessitura_core::{EngineConfig, PanLaw};
use tessitura_plugin::{LadspaFactory, PluginFactory, PluginRegistry};

/// Worker threads are spawned unless [`manual`](Self::manual) is set; in
/// low-latency mode the mixers are never spawned and run from the callback.
///
/// # Example
///
/// ```ignore
/// use tessitura::prelude::*;
///
/// let driver = SoundDriver::builder()
///     .block_size(256)
///     .instruments(8, 8)
///     .busses(2)
///     .build()?;
///
/// let mut backend = BackendSupervisor::start(driver.clone(), Box::new(NullBackend::new()))?;
/// driver.start_playing()?;
/// ```
pub struct SoundDriverBuilder {
    config: EngineConfig,
    ladspa_paths: Vec<PathBuf>,
    factories: Vec<Box<dyn PluginFactory>>,
    spawn_workers: bool,
}

impl Default for SoundDriverBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            ladspa_paths: Vec::new(),
            factories: Vec::new(),
            spawn_workers: true,
        }
    }
}

impl SoundDriverBuilder {
    /// Replace the whole configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Default: 48000
    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.config = self.config.sample_rate(sample_rate);
        self
    }

    /// Default: 512
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.config = self.config.block_size(block_size);
        self
    }

    /// Default: 16 audio, 16 synth
    pub fn instruments(mut self, audio: usize, synth: usize) -> Self {
        self.config = self.config.instruments(audio, synth);
        self
    }

    /// Default: 4
    pub fn busses(mut self, busses: usize) -> Self {
        self.config = self.config.busses(busses);
        self
    }

    pub fn plugin_slots(mut self, instrument: usize, buss: usize) -> Self {
        self.config = self.config.plugin_slots(instrument, buss);
        self
    }

    pub fn low_latency(mut self, low_latency: bool) -> Self {
        self.config = self.config.low_latency(low_latency);
        self
    }

    pub fn pan_law(mut self, pan_law: PanLaw) -> Self {
        self.config = self.config.pan_law(pan_law);
        self
    }

    /// Search `path` for LADSPA libraries, ahead of `LADSPA_PATH` and the
    /// system directories.
    pub fn ladspa_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ladspa_paths.push(path.into());
        self
    }

    /// Register an extra plugin architecture.
    pub fn plugin_factory(mut self, factory: impl PluginFactory + 'static) -> Self {
        self.factories.push(Box::new(factory));
        self
    }

    /// Spawn no worker threads; everything runs through
    /// [`SoundDriver::pump`]. For offline use and tests.
    pub fn manual(mut self) -> Self {
        self.spawn_workers = false;
        self
    }

    pub fn build(self) -> Result<Arc<SoundDriver>> {
        let mut ladspa_paths = self.ladspa_paths;
        ladspa_paths.extend(LadspaFactory::from_env().search_paths().iter().cloned());

        let mut registry = PluginRegistry::with_defaults(ladspa_paths);
        for factory in self.factories {
            registry.register_boxed(factory);
        }

        Ok(Arc::new(SoundDriver::new(
            self.config,
            registry,
            self.spawn_workers,
        )?))
    }
}
