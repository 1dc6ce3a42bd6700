//! Silent backend: a timer thread driving the engine at the period rate.

use super::AudioBackend;
use crate::{Error, Result, SoundDriver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Runs the engine without hardware. Output is discarded.
pub struct NullBackend {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &str {
        "null"
    }

    fn start(&mut self, driver: Arc<SoundDriver>) -> Result<()> {
        self.stop();
        self.running.store(true, Ordering::Release);

        let running = Arc::clone(&self.running);
        let block = driver.config().block_size;
        let period = driver.config().period();
        let handle = thread::Builder::new()
            .name("tessitura-null-backend".into())
            .spawn(move || {
                let mut io = driver.create_io(block);
                let mut next = Instant::now();
                while running.load(Ordering::Acquire) {
                    driver.process(&mut io, block);
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        // Fell behind; don't try to catch up.
                        next = now;
                    }
                }
            })
            .map_err(|e| Error::Backend(format!("failed to spawn null backend thread: {}", e)))?;

        self.handle = Some(handle);
        tracing::info!("Null audio backend started");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Null backend thread panicked");
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for NullBackend {
    fn drop(&mut self) {
        self.stop();
    }
}
