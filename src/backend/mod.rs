//! Audio backends: what calls [`SoundDriver::process`] once per period.
//!
//! - [`CpalBackend`]: hardware output through CPAL (`std` feature)
//! - [`NullBackend`]: a timer thread discarding the output, used when no
//!   hardware is available or the hardware died for good
//! - [`BackendSupervisor`]: restarts a dead backend a bounded number of
//!   times, then falls back to [`NullBackend`]

use crate::{Result, SoundDriver};
use std::sync::Arc;

#[cfg(feature = "std")]
mod hardware;
#[cfg(feature = "std")]
pub use hardware::{list_output_devices, CpalBackend};

mod null;
pub use null::NullBackend;

mod supervisor;
pub use supervisor::{BackendStatus, BackendSupervisor};

/// Something that delivers real-time callbacks to a driver.
pub trait AudioBackend: Send {
    fn name(&self) -> &str;

    /// Start calling `driver.process` from the backend's real-time thread.
    /// Starting a running backend restarts it.
    fn start(&mut self, driver: Arc<SoundDriver>) -> Result<()>;

    /// Stop calling back and release the driver.
    fn stop(&mut self);

    /// Whether callbacks are still being delivered.
    fn is_alive(&self) -> bool;
}
