//! Real-time failure reporting.
//!
//! The real-time path never logs or returns errors. It pushes a
//! [`FailureCode`] into a bounded lock-free queue and carries on; the control
//! thread drains the queue and forwards the codes to whoever is listening.

use crossbeam::queue::ArrayQueue;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Category of a failure observed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCode {
    /// A streamed file could not supply data fast enough.
    DiskUnderrun,
    /// A record file could not be written fast enough.
    DiskOverrun,
    /// An instrument ring could not supply a full period to the callback.
    MixUnderrun,
    /// A buss ring could not supply a full period to the callback.
    BussMixUnderrun,
    /// The callback exceeded its period budget.
    CpuOverload,
    /// The audio backend disappeared.
    BackendDied,
    /// The backend was restarted after dying.
    ClockRestarted,
    /// Restarting the backend failed; the engine fell back to silence.
    ClockRestartFailed,
    /// Low-latency mode could not take a mixer lock this period.
    LowLatencyMixSkipped,
    /// The ring buffer pool refused a request.
    PoolExhausted,
}

impl FailureCode {
    pub fn description(&self) -> &'static str {
        match self {
            FailureCode::DiskUnderrun => "disk underrun",
            FailureCode::DiskOverrun => "disk overrun",
            FailureCode::MixUnderrun => "mix underrun",
            FailureCode::BussMixUnderrun => "buss mix underrun",
            FailureCode::CpuOverload => "CPU overload",
            FailureCode::BackendDied => "audio backend died",
            FailureCode::ClockRestarted => "audio backend restarted",
            FailureCode::ClockRestartFailed => "audio backend restart failed",
            FailureCode::LowLatencyMixSkipped => "low-latency mix skipped",
            FailureCode::PoolExhausted => "ring buffer pool exhausted",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Bounded, lock-free failure queue. Reports beyond capacity are dropped and
/// counted.
pub struct FailureReporter {
    queue: ArrayQueue<FailureCode>,
    dropped: AtomicU64,
}

impl FailureReporter {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Record a failure. Never blocks or allocates.
    #[inline]
    pub fn report(&self, code: FailureCode) {
        if self.queue.push(code).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take every queued failure, oldest first.
    pub fn drain(&self) -> Vec<FailureCode> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(code) = self.queue.pop() {
            out.push(code);
        }
        out
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Reads and resets the number of reports lost to a full queue.
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

impl Default for FailureReporter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_and_drain_in_order() {
        let reporter = FailureReporter::new(8);
        reporter.report(FailureCode::DiskUnderrun);
        reporter.report(FailureCode::MixUnderrun);
        assert_eq!(reporter.pending(), 2);
        assert_eq!(
            reporter.drain(),
            vec![FailureCode::DiskUnderrun, FailureCode::MixUnderrun]
        );
        assert!(reporter.drain().is_empty());
    }

    #[test]
    fn test_overflow_is_counted() {
        let reporter = FailureReporter::new(2);
        for _ in 0..5 {
            reporter.report(FailureCode::CpuOverload);
        }
        assert_eq!(reporter.pending(), 2);
        assert_eq!(reporter.take_dropped(), 3);
        assert_eq!(reporter.take_dropped(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(FailureCode::BussMixUnderrun.to_string(), "buss mix underrun");
    }
}
