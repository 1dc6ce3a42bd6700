//! Plugin factories, keyed by identifier architecture.
//!
//! ```ignore
//! let registry = PluginRegistry::with_defaults(&["/usr/lib/ladspa"]);
//! let amp = registry.instantiate(&"builtin::amp_stereo".parse()?, 48_000, 512)?;
//! ```

use crate::builtin;
use crate::descriptor::{PluginDescriptor, PluginIdentifier};
use crate::error::{LoadStage, PluginError, Result};
use crate::instance::PluginInstance;
use crate::ladspa::{self, LadspaLibrary};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Creates plugins of one architecture.
pub trait PluginFactory: Send + Sync {
    fn architecture(&self) -> &str;

    /// Every plugin this factory can create.
    fn enumerate(&self, sample_rate: u32) -> Vec<PluginDescriptor>;

    fn instantiate(
        &self,
        identifier: &PluginIdentifier,
        sample_rate: u32,
        max_frames: usize,
    ) -> Result<Box<dyn PluginInstance>>;
}

/// Factory for the `builtin:` plugins.
#[derive(Debug, Default)]
pub struct BuiltinFactory;

impl PluginFactory for BuiltinFactory {
    fn architecture(&self) -> &str {
        builtin::ARCHITECTURE
    }

    fn enumerate(&self, _sample_rate: u32) -> Vec<PluginDescriptor> {
        builtin::descriptors()
    }

    fn instantiate(
        &self,
        identifier: &PluginIdentifier,
        sample_rate: u32,
        _max_frames: usize,
    ) -> Result<Box<dyn PluginInstance>> {
        builtin::instantiate(identifier.label(), sample_rate)
            .ok_or_else(|| PluginError::NotFound(identifier.to_string()))
    }
}

/// Factory for native LADSPA libraries. Libraries stay open once loaded.
pub struct LadspaFactory {
    search_paths: Vec<PathBuf>,
    libraries: Mutex<HashMap<PathBuf, Arc<LadspaLibrary>>>,
}

impl LadspaFactory {
    pub fn new(search_paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            search_paths: search_paths.into_iter().map(Into::into).collect(),
            libraries: Mutex::new(HashMap::new()),
        }
    }

    /// Search paths from `LADSPA_PATH`, falling back to the usual locations.
    pub fn from_env() -> Self {
        match std::env::var_os("LADSPA_PATH") {
            Some(paths) => Self::new(std::env::split_paths(&paths)),
            None => Self::new(default_search_paths()),
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    fn resolve(&self, library: &str) -> Option<PathBuf> {
        let path = Path::new(library);
        if path.is_absolute() {
            return Some(path.to_path_buf());
        }
        self.search_paths
            .iter()
            .map(|dir| dir.join(path))
            .find(|candidate| candidate.exists())
    }

    fn library(&self, path: &Path, sample_rate: u32) -> Result<Arc<LadspaLibrary>> {
        let mut libraries = self.libraries.lock();
        if let Some(library) = libraries.get(path) {
            return Ok(Arc::clone(library));
        }
        let library = Arc::new(LadspaLibrary::open(path, sample_rate)?);
        libraries.insert(path.to_path_buf(), Arc::clone(&library));
        Ok(library)
    }
}

impl PluginFactory for LadspaFactory {
    fn architecture(&self) -> &str {
        ladspa::ARCHITECTURE
    }

    fn enumerate(&self, sample_rate: u32) -> Vec<PluginDescriptor> {
        let mut found = Vec::new();
        for dir in &self.search_paths {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !is_plugin_file(&path) {
                    continue;
                }
                match self.library(&path, sample_rate) {
                    Ok(library) => found.extend(library.descriptors().cloned()),
                    Err(e) => tracing::warn!("Skipping {}: {}", path.display(), e),
                }
            }
        }
        found
    }

    fn instantiate(
        &self,
        identifier: &PluginIdentifier,
        sample_rate: u32,
        max_frames: usize,
    ) -> Result<Box<dyn PluginInstance>> {
        let path = self
            .resolve(identifier.library())
            .ok_or_else(|| PluginError::LoadFailed {
                path: PathBuf::from(identifier.library()),
                stage: LoadStage::Scanning,
                reason: "library not found on the search path".to_string(),
            })?;
        let library = self.library(&path, sample_rate)?;
        let instance = library.instantiate(identifier.label(), sample_rate, max_frames)?;
        Ok(Box::new(instance))
    }
}

fn is_plugin_file(path: &Path) -> bool {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    matches!(ext, "so" | "dylib" | "dll")
}

fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(PathBuf::from(home).join(".ladspa"));
    }
    paths.push(PathBuf::from("/usr/local/lib/ladspa"));
    paths.push(PathBuf::from("/usr/lib/ladspa"));
    paths
}

/// Every known factory, looked up by the architecture part of an identifier.
pub struct PluginRegistry {
    factories: HashMap<String, Box<dyn PluginFactory>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Built-ins plus LADSPA with the given search paths.
    pub fn with_defaults(ladspa_paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        let mut registry = Self::new();
        registry.register(BuiltinFactory);
        registry.register(LadspaFactory::new(ladspa_paths));
        registry
    }

    pub fn register(&mut self, factory: impl PluginFactory + 'static) {
        self.register_boxed(Box::new(factory));
    }

    /// Register a factory, replacing any other of the same architecture.
    pub fn register_boxed(&mut self, factory: Box<dyn PluginFactory>) {
        let architecture = factory.architecture().to_string();
        tracing::debug!("Registered plugin factory: {}", architecture);
        self.factories.insert(architecture, factory);
    }

    pub fn architectures(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn enumerate(&self, sample_rate: u32) -> Vec<PluginDescriptor> {
        self.factories
            .values()
            .flat_map(|f| f.enumerate(sample_rate))
            .collect()
    }

    pub fn instantiate(
        &self,
        identifier: &PluginIdentifier,
        sample_rate: u32,
        max_frames: usize,
    ) -> Result<Box<dyn PluginInstance>> {
        let factory = self
            .factories
            .get(identifier.architecture())
            .ok_or_else(|| PluginError::UnknownArchitecture(identifier.architecture().to_string()))?;
        let instance = factory.instantiate(identifier, sample_rate, max_frames)?;
        tracing::info!("Loaded plugin {}", identifier);
        Ok(instance)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_defaults(default_search_paths())
    }
}
