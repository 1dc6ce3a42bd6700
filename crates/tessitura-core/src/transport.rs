//! Transport clock and external transport synchronization.
//!
//! [`TransportClock`] is the engine's own notion of "playing or not, and
//! where". Workers consult it to decide whether to kick; the real-time
//! callback advances it once per period.
//!
//! [`TransportSync`] is the two-phase handshake used when an external
//! transport master (a hardware or session clock) drives start, stop and
//! relocation. The real-time side queues a request tagged with a fresh token
//! and keeps answering "not ready" until the control thread has acted on the
//! request and completed that token, so the logical and audible positions
//! never disagree.

use crate::lockfree::AtomicFlag;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};

/// Engine transport clock, shared by workers and the callback.
#[derive(Debug)]
pub struct TransportClock {
    running: AtomicFlag,
    position: AtomicU64,
    sample_rate: AtomicU32,
}

impl TransportClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            running: AtomicFlag::new(false),
            position: AtomicU64::new(0),
            sample_rate: AtomicU32::new(sample_rate),
        }
    }

    pub fn start(&self) {
        self.running.set(true);
    }

    pub fn stop(&self) {
        self.running.set(false);
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Current position in frames.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn set_position(&self, frames: u64) {
        self.position.store(frames, Ordering::Release);
    }

    /// Move forward by one period. Only advances while running.
    #[inline]
    pub fn advance(&self, frames: u64) -> u64 {
        if self.is_running() {
            self.position.fetch_add(frames, Ordering::AcqRel) + frames
        } else {
            self.position()
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
    }

    /// Current position in seconds.
    pub fn seconds(&self) -> f64 {
        self.position() as f64 / self.sample_rate().max(1) as f64
    }
}

impl Default for TransportClock {
    fn default() -> Self {
        Self::new(48_000)
    }
}

/// Transport state reported by an external transport master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TransportState {
    #[default]
    Stopped = 0,
    /// The master wants to start at the given position and is waiting for
    /// every participant to be ready.
    Starting = 1,
    Rolling = 2,
}

impl TransportState {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => TransportState::Starting,
            2 => TransportState::Rolling,
            _ => TransportState::Stopped,
        }
    }
}

/// A transport change the control thread must act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportRequest {
    Start { token: u64, position: u64 },
    Stop { token: u64 },
    Relocate { token: u64, position: u64 },
}

impl TransportRequest {
    pub fn token(&self) -> u64 {
        match *self {
            TransportRequest::Start { token, .. }
            | TransportRequest::Stop { token }
            | TransportRequest::Relocate { token, .. } => token,
        }
    }
}

const NO_TOKEN: u64 = 0;

/// Token-based handshake between an external transport and the control thread.
pub struct TransportSync {
    next_token: AtomicU64,
    completed: AtomicU64,
    waiting: AtomicU64,
    waiting_position: AtomicU64,
    last_state: AtomicU8,
    requests: ArrayQueue<TransportRequest>,
}

impl TransportSync {
    pub fn new(capacity: usize) -> Self {
        Self {
            next_token: AtomicU64::new(NO_TOKEN + 1),
            completed: AtomicU64::new(NO_TOKEN),
            waiting: AtomicU64::new(NO_TOKEN),
            waiting_position: AtomicU64::new(0),
            last_state: AtomicU8::new(TransportState::Stopped as u8),
            requests: ArrayQueue::new(capacity.max(1)),
        }
    }

    fn queue(&self, make: impl FnOnce(u64) -> TransportRequest) -> Option<u64> {
        let token = self.next_token.load(Ordering::Relaxed);
        if self.requests.push(make(token)).is_err() {
            return None;
        }
        self.next_token.store(token + 1, Ordering::Relaxed);
        Some(token)
    }

    /// Real-time side. Called once per period with the master's state and
    /// position; returns `true` once this participant is ready to roll at
    /// `position`.
    pub fn sync_request(&self, state: TransportState, position: u64) -> bool {
        let last = TransportState::from_u8(self.last_state.load(Ordering::Relaxed));

        if state == TransportState::Stopped {
            if last != TransportState::Stopped
                && self.queue(|token| TransportRequest::Stop { token }).is_some()
            {
                self.last_state
                    .store(TransportState::Stopped as u8, Ordering::Relaxed);
                self.waiting.store(NO_TOKEN, Ordering::Relaxed);
            }
            return true;
        }

        let waiting = self.waiting.load(Ordering::Relaxed);
        if waiting != NO_TOKEN && self.waiting_position.load(Ordering::Relaxed) == position {
            if self.completed.load(Ordering::Acquire) >= waiting {
                self.waiting.store(NO_TOKEN, Ordering::Relaxed);
                self.last_state
                    .store(TransportState::Rolling as u8, Ordering::Relaxed);
                return true;
            }
            return false;
        }

        if waiting == NO_TOKEN && last == TransportState::Rolling && state == TransportState::Rolling
        {
            return true;
        }

        let queued = if last == TransportState::Stopped {
            self.queue(|token| TransportRequest::Start { token, position })
        } else {
            self.queue(|token| TransportRequest::Relocate { token, position })
        };
        if let Some(token) = queued {
            self.waiting.store(token, Ordering::Relaxed);
            self.waiting_position.store(position, Ordering::Relaxed);
            self.last_state
                .store(TransportState::Starting as u8, Ordering::Relaxed);
        }
        false
    }

    /// Control side: next pending request, oldest first.
    pub fn pop_request(&self) -> Option<TransportRequest> {
        self.requests.pop()
    }

    /// Control side: the request carrying `token` (and every earlier one) has
    /// been carried out.
    pub fn complete(&self, token: u64) {
        self.completed.fetch_max(token, Ordering::AcqRel);
    }

    pub fn completed_token(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// Whether the real-time side is waiting on the control thread.
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Relaxed) != NO_TOKEN
    }
}

impl Default for TransportSync {
    fn default() -> Self {
        Self::new(16)
    }
}
