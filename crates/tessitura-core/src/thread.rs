//! Worker thread base shared by the file reader, file writer and mixers.
//!
//! Each [`AudioThread`] owns one OS thread, one mutex guarding its worker and
//! one condition variable. While the transport runs, the thread calls
//! [`AudioWorker::kick`] and then waits on the condvar for half the worker's
//! buffer duration (never less than [`MIN_WAIT`]), so a [`signal`] produces
//! an immediate pass and an idle worker neither spins nor stalls.
//!
//! The same mutex is what the control thread takes to mutate worker state,
//! and what the real-time callback `try_lock`s in low-latency mode to pump a
//! worker inline.
//!
//! [`signal`]: AudioThread::signal

use crate::error::{Error, Result};
use crate::transport::TransportClock;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thread_priority::ThreadPriority;

/// Lower bound for the idle wait.
pub const MIN_WAIT: Duration = Duration::from_millis(10);

/// Work performed by an [`AudioThread`] on each pass.
pub trait AudioWorker: Send + 'static {
    /// One unit of work. Called with the worker mutex held.
    fn kick(&mut self);

    /// Duration of the buffer this worker keeps filled or drained.
    fn buffer_duration(&self) -> Duration;

    /// Whether to keep kicking while the transport is stopped (previews and
    /// live input still need mixing).
    fn kick_when_stopped(&self) -> bool {
        false
    }
}

struct Shared<W> {
    worker: Mutex<W>,
    wakeup: Condvar,
    exiting: AtomicBool,
}

/// Cloneable handle that wakes an [`AudioThread`] without owning it.
pub struct Signaller<W> {
    shared: Arc<Shared<W>>,
}

impl<W> Clone for Signaller<W> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<W> Signaller<W> {
    pub fn signal(&self) {
        self.shared.wakeup.notify_one();
    }
}

/// An OS thread driving one [`AudioWorker`].
pub struct AudioThread<W: AudioWorker> {
    name: String,
    shared: Arc<Shared<W>>,
    clock: Arc<TransportClock>,
    handle: Option<JoinHandle<()>>,
}

impl<W: AudioWorker> AudioThread<W> {
    /// Wrap `worker` without starting a thread. A thread that is never
    /// [`run`](Self::run) can still be pumped through [`lock`](Self::lock).
    pub fn new(name: impl Into<String>, worker: W, clock: Arc<TransportClock>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                worker: Mutex::new(worker),
                wakeup: Condvar::new(),
                exiting: AtomicBool::new(false),
            }),
            clock,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the OS thread.
    pub fn run(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::ThreadRunning(self.name.clone()));
        }
        self.shared.exiting.store(false, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let clock = Arc::clone(&self.clock);
        let name = self.name.clone();

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                if let Err(e) = thread_priority::set_current_thread_priority(ThreadPriority::Max)
                {
                    tracing::warn!(
                        "{} thread: could not raise scheduling priority ({:?}), running at normal priority",
                        name,
                        e
                    );
                }
                tracing::debug!("{} thread started", name);
                thread_loop(&shared, &clock);
                tracing::debug!("{} thread exiting", name);
            })
            .map_err(|source| Error::ThreadSpawn {
                name: self.name.clone(),
                source,
            })?;

        self.handle = Some(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Block until the worker mutex is available.
    pub fn lock(&self) -> MutexGuard<'_, W> {
        self.shared.worker.lock()
    }

    /// Take the worker mutex only if it is free. Safe from the real-time path.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, W>> {
        self.shared.worker.try_lock()
    }

    /// Wake the thread for an immediate pass.
    pub fn signal(&self) {
        self.shared.wakeup.notify_one();
    }

    pub fn signaller(&self) -> Signaller<W> {
        Signaller {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop the thread and wait for it to exit.
    pub fn terminate(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.exiting.store(true, Ordering::Release);
        {
            // Taking the lock orders the flag store before the thread's next
            // wait, so the notification cannot be lost.
            let _guard = self.shared.worker.lock();
            self.shared.wakeup.notify_all();
        }
        if handle.join().is_err() {
            tracing::warn!("{} thread panicked", self.name);
        }
    }
}

impl<W: AudioWorker> Drop for AudioThread<W> {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn thread_loop<W: AudioWorker>(shared: &Shared<W>, clock: &TransportClock) {
    let mut worker = shared.worker.lock();
    while !shared.exiting.load(Ordering::Acquire) {
        if clock.is_running() || worker.kick_when_stopped() {
            worker.kick();
        }
        if shared.exiting.load(Ordering::Acquire) {
            break;
        }
        let wait = (worker.buffer_duration() / 2).max(MIN_WAIT);
        shared.wakeup.wait_for(&mut worker, wait);
    }
}
