//! Native plugins through the LADSPA C ABI.
//!
//! A library exports `ladspa_descriptor(index)`, returning descriptors until
//! it returns null. Each descriptor carries its ports with range hints and
//! the lifecycle `instantiate → connect_port → activate → run → deactivate →
//! cleanup`. A descriptor missing a required function or with malformed
//! ports fails when instantiated, not when the library is scanned.

use crate::descriptor::{
    PluginDescriptor, PluginIdentifier, PluginKind, PortDescriptor, PortDirection, PortHint,
    PortType,
};
use crate::error::{LoadStage, PluginError, Result};
use crate::instance::{PluginEvent, PluginInstance, PortBuffers};
use std::ffi::{c_char, c_int, c_ulong, c_void, CStr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const ARCHITECTURE: &str = "ladspa";

pub type LadspaHandle = *mut c_void;

pub const PORT_INPUT: c_int = 0x1;
pub const PORT_OUTPUT: c_int = 0x2;
pub const PORT_CONTROL: c_int = 0x4;
pub const PORT_AUDIO: c_int = 0x8;

pub const HINT_BOUNDED_BELOW: c_int = 0x1;
pub const HINT_BOUNDED_ABOVE: c_int = 0x2;
pub const HINT_TOGGLED: c_int = 0x4;
pub const HINT_SAMPLE_RATE: c_int = 0x8;
pub const HINT_LOGARITHMIC: c_int = 0x10;
pub const HINT_INTEGER: c_int = 0x20;
pub const HINT_DEFAULT_MASK: c_int = 0x3C0;
pub const HINT_DEFAULT_MINIMUM: c_int = 0x40;
pub const HINT_DEFAULT_LOW: c_int = 0x80;
pub const HINT_DEFAULT_MIDDLE: c_int = 0xC0;
pub const HINT_DEFAULT_HIGH: c_int = 0x100;
pub const HINT_DEFAULT_MAXIMUM: c_int = 0x140;
pub const HINT_DEFAULT_0: c_int = 0x200;
pub const HINT_DEFAULT_1: c_int = 0x240;
pub const HINT_DEFAULT_100: c_int = 0x280;
pub const HINT_DEFAULT_440: c_int = 0x2C0;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LadspaPortRangeHint {
    pub hint_descriptor: c_int,
    pub lower_bound: f32,
    pub upper_bound: f32,
}

/// `LADSPA_Descriptor`, field for field.
#[repr(C)]
pub struct LadspaDescriptor {
    pub unique_id: c_ulong,
    pub label: *const c_char,
    pub properties: c_int,
    pub name: *const c_char,
    pub maker: *const c_char,
    pub copyright: *const c_char,
    pub port_count: c_ulong,
    pub port_descriptors: *const c_int,
    pub port_names: *const *const c_char,
    pub port_range_hints: *const LadspaPortRangeHint,
    pub implementation_data: *mut c_void,
    pub instantiate:
        Option<unsafe extern "C" fn(*const LadspaDescriptor, c_ulong) -> LadspaHandle>,
    pub connect_port: Option<unsafe extern "C" fn(LadspaHandle, c_ulong, *mut f32)>,
    pub activate: Option<unsafe extern "C" fn(LadspaHandle)>,
    pub run: Option<unsafe extern "C" fn(LadspaHandle, c_ulong)>,
    pub run_adding: Option<unsafe extern "C" fn(LadspaHandle, c_ulong)>,
    pub set_run_adding_gain: Option<unsafe extern "C" fn(LadspaHandle, f32)>,
    pub deactivate: Option<unsafe extern "C" fn(LadspaHandle)>,
    pub cleanup: Option<unsafe extern "C" fn(LadspaHandle)>,
}

type DescriptorFn = unsafe extern "C" fn(c_ulong) -> *const LadspaDescriptor;

/// # Safety
/// `ptr` must be null or a valid NUL-terminated string.
unsafe fn c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}

/// Translate a LADSPA range hint into a [`PortHint`], resolving the default.
pub fn port_hint(raw: &LadspaPortRangeHint, sample_rate: u32) -> PortHint {
    let flags = raw.hint_descriptor;
    let scale = if flags & HINT_SAMPLE_RATE != 0 {
        sample_rate as f32
    } else {
        1.0
    };
    let min = if flags & HINT_BOUNDED_BELOW != 0 {
        raw.lower_bound * scale
    } else {
        f32::MIN
    };
    let max = if flags & HINT_BOUNDED_ABOVE != 0 {
        raw.upper_bound * scale
    } else {
        f32::MAX
    };
    let logarithmic = flags & HINT_LOGARITHMIC != 0 && min > 0.0 && max > 0.0;

    let between = |fraction: f32| {
        if logarithmic {
            (min.ln() * (1.0 - fraction) + max.ln() * fraction).exp()
        } else {
            min * (1.0 - fraction) + max * fraction
        }
    };

    let toggled = flags & HINT_TOGGLED != 0;
    let default = match flags & HINT_DEFAULT_MASK {
        HINT_DEFAULT_MINIMUM => min,
        HINT_DEFAULT_LOW => between(0.25),
        HINT_DEFAULT_MIDDLE => between(0.5),
        HINT_DEFAULT_HIGH => between(0.75),
        HINT_DEFAULT_MAXIMUM => max,
        HINT_DEFAULT_1 => 1.0,
        HINT_DEFAULT_100 => 100.0,
        HINT_DEFAULT_440 => 440.0,
        _ if toggled => 0.0,
        // DEFAULT_0, DEFAULT_NONE: zero, pulled into range.
        _ => 0.0f32.clamp(min.min(max), max.max(min)),
    };

    PortHint {
        min: if toggled { 0.0 } else { min },
        max: if toggled { 1.0 } else { max },
        default,
        integer: flags & HINT_INTEGER != 0,
        toggled,
        logarithmic,
    }
}

/// Read a raw descriptor into a [`PluginDescriptor`].
///
/// # Safety
/// `raw` must point to a descriptor whose pointers are valid for
/// `port_count` entries, as the ABI requires.
pub unsafe fn read_descriptor(
    raw: &LadspaDescriptor,
    library: &str,
    sample_rate: u32,
) -> std::result::Result<PluginDescriptor, String> {
    let label = c_string(raw.label).ok_or("descriptor has no label")?;
    let name = c_string(raw.name).unwrap_or_else(|| label.clone());
    let maker = c_string(raw.maker).unwrap_or_default();

    let count = raw.port_count as usize;
    if count > 0
        && (raw.port_descriptors.is_null()
            || raw.port_names.is_null()
            || raw.port_range_hints.is_null())
    {
        return Err(format!("{label}: port arrays missing"));
    }

    let mut ports = Vec::with_capacity(count);
    for i in 0..count {
        let flags = *raw.port_descriptors.add(i);
        let direction = match (flags & PORT_INPUT != 0, flags & PORT_OUTPUT != 0) {
            (true, false) => PortDirection::Input,
            (false, true) => PortDirection::Output,
            _ => return Err(format!("{label}: port {i} has no single direction")),
        };
        let port_type = match (flags & PORT_AUDIO != 0, flags & PORT_CONTROL != 0) {
            (true, false) => PortType::Audio,
            (false, true) => PortType::Control,
            _ => return Err(format!("{label}: port {i} has no single type")),
        };
        let port_name = c_string(*raw.port_names.add(i)).unwrap_or_else(|| format!("port {i}"));
        let hint = if port_type == PortType::Control {
            port_hint(&*raw.port_range_hints.add(i), sample_rate)
        } else {
            PortHint::default()
        };
        ports.push(PortDescriptor {
            name: port_name,
            direction,
            port_type,
            hint,
        });
    }

    let has_audio_input = ports.iter().any(|p| p.is_audio_input());
    let kind = if has_audio_input {
        PluginKind::AudioEffect
    } else {
        PluginKind::SynthesizerSource
    };

    let mut desc = PluginDescriptor::new(
        PluginIdentifier::new(ARCHITECTURE, library, label),
        name,
        kind,
    )
    .unique_id(raw.unique_id as u64)
    .maker(maker);
    desc.ports = ports;
    Ok(desc)
}

/// An opened LADSPA library and the descriptors it exports.
pub struct LadspaLibrary {
    path: PathBuf,
    library: Arc<libloading::Library>,
    entries: Vec<(*const LadspaDescriptor, std::result::Result<PluginDescriptor, String>)>,
}

// The raw descriptor pointers are static data owned by the library, which
// lives as long as `library`.
unsafe impl Send for LadspaLibrary {}
unsafe impl Sync for LadspaLibrary {}

impl LadspaLibrary {
    /// Open a library and read every descriptor it exports.
    pub fn open(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let path = path.as_ref();
        let load_failed = |stage, reason: String| PluginError::LoadFailed {
            path: path.to_path_buf(),
            stage,
            reason,
        };

        let library = unsafe {
            libloading::Library::new(path)
                .map_err(|e| load_failed(LoadStage::Opening, format!("Failed to load library: {e}")))?
        };

        let entries = {
            let descriptor_fn: libloading::Symbol<DescriptorFn> = unsafe {
                library.get(b"ladspa_descriptor\0").map_err(|e| {
                    load_failed(LoadStage::Opening, format!("No ladspa_descriptor symbol: {e}"))
                })?
            };

            let library_name = path.to_string_lossy();
            let mut entries = Vec::new();
            for index in 0.. {
                let raw = unsafe { descriptor_fn(index) };
                if raw.is_null() {
                    break;
                }
                let parsed = unsafe { read_descriptor(&*raw, &library_name, sample_rate) };
                if let Err(reason) = &parsed {
                    tracing::warn!("Malformed descriptor {} in {}: {}", index, path.display(), reason);
                }
                entries.push((raw, parsed));
            }
            entries
        };

        tracing::info!("Opened LADSPA library {} ({} plugins)", path.display(), entries.len());
        Ok(Self {
            path: path.to_path_buf(),
            library: Arc::new(library),
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Descriptors that parsed cleanly.
    pub fn descriptors(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.entries.iter().filter_map(|(_, d)| d.as_ref().ok())
    }

    /// Instantiate the plugin with `label`.
    pub fn instantiate(&self, label: &str, sample_rate: u32, max_frames: usize) -> Result<LadspaInstance> {
        let (raw, parsed) = self
            .entries
            .iter()
            .find(|(_, d)| match d {
                Ok(desc) => desc.identifier.label() == label,
                Err(_) => false,
            })
            .ok_or_else(|| PluginError::NotFound(format!("{}:{}", self.path.display(), label)))?;
        let descriptor = parsed
            .as_ref()
            .map_err(|reason| PluginError::LoadFailed {
                path: self.path.clone(),
                stage: LoadStage::Descriptor,
                reason: reason.clone(),
            })?
            .clone();

        unsafe {
            LadspaInstance::new(
                Some(Arc::clone(&self.library)),
                *raw,
                descriptor,
                sample_rate,
                max_frames,
                &self.path,
            )
        }
    }
}

/// A live LADSPA plugin.
pub struct LadspaInstance {
    // Keeps the code behind `raw` loaded; dropped after `handle` is cleaned up.
    _library: Option<Arc<libloading::Library>>,
    raw: *const LadspaDescriptor,
    handle: LadspaHandle,
    descriptor: PluginDescriptor,
    /// One value per port; only control ports are connected to it.
    controls: Box<[f32]>,
    audio_inputs: Vec<usize>,
    audio_outputs: Vec<usize>,
    latency_port: Option<usize>,
    active: bool,
}

// A LADSPA handle may move between threads; the owning slot serializes calls.
unsafe impl Send for LadspaInstance {}

impl LadspaInstance {
    /// Validate, instantiate and activate a plugin from its raw descriptor.
    ///
    /// # Safety
    /// `raw` must stay valid for the life of the instance: either static in
    /// this binary or owned by `library`.
    pub unsafe fn new(
        library: Option<Arc<libloading::Library>>,
        raw: *const LadspaDescriptor,
        descriptor: PluginDescriptor,
        sample_rate: u32,
        max_frames: usize,
        path: &Path,
    ) -> Result<Self> {
        let load_failed = |stage, reason: &str| PluginError::LoadFailed {
            path: path.to_path_buf(),
            stage,
            reason: format!("{}: {}", descriptor.identifier.label(), reason),
        };

        let table = &*raw;
        let (Some(instantiate), Some(connect_port)) = (table.instantiate, table.connect_port) else {
            return Err(load_failed(LoadStage::Validation, "missing instantiate or connect_port"));
        };
        if table.run.is_none() {
            return Err(load_failed(LoadStage::Validation, "missing run"));
        }

        let handle = instantiate(raw, sample_rate as c_ulong);
        if handle.is_null() {
            return Err(load_failed(LoadStage::Instantiation, "instantiate returned null"));
        }

        let mut controls: Box<[f32]> = descriptor
            .ports
            .iter()
            .map(|p| if p.port_type == PortType::Control { p.hint.default } else { 0.0 })
            .collect();
        for (i, port) in descriptor.ports.iter().enumerate() {
            if port.port_type == PortType::Control {
                connect_port(handle, i as c_ulong, controls.as_mut_ptr().add(i));
            }
        }

        let audio_inputs = (0..descriptor.ports.len())
            .filter(|&i| descriptor.ports[i].is_audio_input())
            .collect();
        let audio_outputs = (0..descriptor.ports.len())
            .filter(|&i| descriptor.ports[i].is_audio_output())
            .collect();
        let latency_port = descriptor.ports.iter().position(|p| {
            p.port_type == PortType::Control
                && p.direction == PortDirection::Output
                && p.name.eq_ignore_ascii_case("latency")
        });

        let mut instance = Self {
            _library: library,
            raw,
            handle,
            descriptor,
            controls,
            audio_inputs,
            audio_outputs,
            latency_port,
            active: false,
        };
        instance.activate();
        tracing::debug!(
            "Instantiated {} (block of {} frames)",
            instance.descriptor.identifier,
            max_frames
        );
        Ok(instance)
    }

    fn activate(&mut self) {
        if let Some(activate) = unsafe { (*self.raw).activate } {
            unsafe { activate(self.handle) };
        }
        self.active = true;
    }

    fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        if let Some(deactivate) = unsafe { (*self.raw).deactivate } {
            unsafe { deactivate(self.handle) };
        }
        self.active = false;
    }
}

impl PluginInstance for LadspaInstance {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn set_control(&mut self, port: usize, value: f32) {
        if let Some(slot) = self.controls.get_mut(port) {
            *slot = value;
        }
    }

    fn run(&mut self, io: &mut PortBuffers, frames: usize, _events: &[PluginEvent]) {
        let table = unsafe { &*self.raw };
        let (Some(connect_port), Some(run)) = (table.connect_port, table.run) else {
            return;
        };
        let frames = frames.min(io.max_frames());
        unsafe {
            for (port, buffer) in self.audio_inputs.iter().zip(io.inputs.iter_mut()) {
                connect_port(self.handle, *port as c_ulong, buffer.as_mut_ptr());
            }
            for (port, buffer) in self.audio_outputs.iter().zip(io.outputs.iter_mut()) {
                connect_port(self.handle, *port as c_ulong, buffer.as_mut_ptr());
            }
            run(self.handle, frames as c_ulong);
        }
    }

    fn reset(&mut self) {
        self.deactivate();
        self.activate();
    }

    fn latency(&self) -> usize {
        self.latency_port
            .map_or(0, |p| self.controls[p].max(0.0) as usize)
    }
}

impl Drop for LadspaInstance {
    fn drop(&mut self) {
        self.deactivate();
        if let Some(cleanup) = unsafe { (*self.raw).cleanup } {
            unsafe { cleanup(self.handle) };
        }
        tracing::debug!("Cleaned up {}", self.descriptor.identifier);
    }
}
