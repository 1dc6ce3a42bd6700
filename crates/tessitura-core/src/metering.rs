//! Lock-free peak and CPU metering.

use crate::lockfree::AtomicFloat;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Peak levels of a stereo signal since the last read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LevelReading {
    pub left: f32,
    pub right: f32,
}

impl LevelReading {
    pub fn max(&self) -> f32 {
        self.left.max(self.right)
    }
}

/// Stereo peak meter. The audio side raises; the control side takes and
/// resets.
#[derive(Debug, Default)]
pub struct PeakMeter {
    left: AtomicFloat,
    right: AtomicFloat,
}

impl PeakMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one block into the held peak.
    #[inline]
    pub fn update(&self, left: &[f32], right: &[f32]) {
        self.left.raise(peak_of(left));
        self.right.raise(peak_of(right));
    }

    #[inline]
    pub fn update_values(&self, left: f32, right: f32) {
        self.left.raise(left.abs());
        self.right.raise(right.abs());
    }

    /// Held peak without resetting it.
    pub fn peek(&self) -> LevelReading {
        LevelReading {
            left: self.left.get(),
            right: self.right.get(),
        }
    }

    /// Held peak since the previous call, then reset.
    pub fn take(&self) -> LevelReading {
        LevelReading {
            left: self.left.swap(0.0),
            right: self.right.swap(0.0),
        }
    }

    pub fn reset(&self) {
        self.left.set(0.0);
        self.right.set(0.0);
    }
}

/// Absolute peak of a block.
#[inline]
pub fn peak_of(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}

/// CPU load of the real-time callback relative to its period budget.
pub struct CpuMeter {
    current: AtomicFloat,
    peak: AtomicFloat,
    average: AtomicFloat,
    overloads: AtomicU64,
    samples: AtomicU32,
    sample_rate: AtomicU32,
    /// Load (1.0 = whole period) above which a cycle counts as an overload.
    threshold: f32,
}

impl CpuMeter {
    pub fn new(sample_rate: u32, threshold: f32) -> Self {
        Self {
            current: AtomicFloat::new(0.0),
            peak: AtomicFloat::new(0.0),
            average: AtomicFloat::new(0.0),
            overloads: AtomicU64::new(0),
            samples: AtomicU32::new(0),
            sample_rate: AtomicU32::new(sample_rate),
            threshold,
        }
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Relaxed);
    }

    /// Record one cycle. Returns `true` when it overran the threshold.
    pub fn record(&self, frames: usize, elapsed: Duration) -> bool {
        let sample_rate = self.sample_rate.load(Ordering::Relaxed).max(1) as f64;
        let budget = frames as f64 / sample_rate;
        if budget <= 0.0 {
            return false;
        }
        let load = (elapsed.as_secs_f64() / budget) as f32;

        self.current.set(load);
        self.peak.raise(load);

        let count = self.samples.fetch_add(1, Ordering::Relaxed);
        let alpha = 1.0 / (count.min(100) + 1) as f32;
        let avg = self.average.get();
        self.average.set(avg * (1.0 - alpha) + load * alpha);

        let overloaded = load > self.threshold;
        if overloaded {
            self.overloads.fetch_add(1, Ordering::Relaxed);
        }
        overloaded
    }

    pub fn current_percent(&self) -> f32 {
        self.current.get() * 100.0
    }

    pub fn average_percent(&self) -> f32 {
        self.average.get() * 100.0
    }

    pub fn peak_percent(&self) -> f32 {
        self.peak.get() * 100.0
    }

    pub fn overloads(&self) -> u64 {
        self.overloads.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.current.set(0.0);
        self.peak.set(0.0);
        self.average.set(0.0);
        self.overloads.store(0, Ordering::Relaxed);
        self.samples.store(0, Ordering::Relaxed);
    }
}
