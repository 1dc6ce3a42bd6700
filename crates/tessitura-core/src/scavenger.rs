//! Deferred destruction across the real-time boundary.
//!
//! Anything the real-time path might still be looking at (a plugin instance,
//! a streaming file, a replaced ring) is retired here instead of dropped. The
//! callback advances an [`EpochCounter`] once per cycle; [`Scavenger::sweep`],
//! run from a non-real-time thread, frees an entry only once at least
//! `grace_epochs` cycles have completed since it was retired and no other
//! `Arc` to it remains.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default number of completed cycles before a retired object may be freed.
pub const DEFAULT_GRACE_EPOCHS: u64 = 2;

/// Monotonic cycle counter advanced by the real-time callback.
#[derive(Debug, Default)]
pub struct EpochCounter {
    epoch: AtomicU64,
}

impl EpochCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the end of one real-time cycle.
    #[inline]
    pub fn advance(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}

struct Retired<T> {
    item: Arc<T>,
    epoch: u64,
}

/// Retirement list for one kind of object.
pub struct Scavenger<T> {
    epochs: Arc<EpochCounter>,
    grace_epochs: u64,
    retired: Mutex<Vec<Retired<T>>>,
}

impl<T> Scavenger<T> {
    pub fn new(epochs: Arc<EpochCounter>) -> Self {
        Self::with_grace(epochs, DEFAULT_GRACE_EPOCHS)
    }

    pub fn with_grace(epochs: Arc<EpochCounter>, grace_epochs: u64) -> Self {
        Self {
            epochs,
            grace_epochs,
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Hand an object over for deferred destruction.
    pub fn retire(&self, item: Arc<T>) {
        let epoch = self.epochs.current();
        self.retired.lock().push(Retired { item, epoch });
    }

    /// Free everything that is old enough and no longer shared.
    /// Returns the number of objects released.
    pub fn sweep(&self) -> usize {
        let now = self.epochs.current();
        let released: Vec<Arc<T>> = {
            let mut retired = self.retired.lock();
            let mut released = Vec::new();
            let mut i = 0;
            while i < retired.len() {
                let entry = &retired[i];
                if now >= entry.epoch + self.grace_epochs && Arc::strong_count(&entry.item) == 1
                {
                    released.push(retired.swap_remove(i).item);
                } else {
                    i += 1;
                }
            }
            released
        };
        // Dropped outside the lock: destructors may be slow.
        released.len()
    }

    /// Free every retired object that is no longer shared, regardless of age.
    /// Only valid once the real-time path has stopped.
    pub fn drain(&self) -> usize {
        let released: Vec<Arc<T>> = {
            let mut retired = self.retired.lock();
            let (free, keep): (Vec<_>, Vec<_>) = retired
                .drain(..)
                .partition(|entry| Arc::strong_count(&entry.item) == 1);
            *retired = keep;
            free.into_iter().map(|entry| entry.item).collect()
        };
        released.len()
    }

    /// Objects waiting to be freed.
    pub fn pending(&self) -> usize {
        self.retired.lock().len()
    }

    pub fn epochs(&self) -> &Arc<EpochCounter> {
        &self.epochs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_waits_for_grace_period() {
        let epochs = Arc::new(EpochCounter::new());
        let scavenger = Scavenger::new(Arc::clone(&epochs));
        let drops = Arc::new(AtomicUsize::new(0));

        scavenger.retire(Arc::new(DropCounter(Arc::clone(&drops))));
        assert_eq!(scavenger.sweep(), 0);

        epochs.advance();
        assert_eq!(scavenger.sweep(), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        epochs.advance();
        assert_eq!(scavenger.sweep(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(scavenger.pending(), 0);
    }

    #[test]
    fn test_shared_objects_are_kept() {
        let epochs = Arc::new(EpochCounter::new());
        let scavenger = Scavenger::with_grace(Arc::clone(&epochs), 0);
        let drops = Arc::new(AtomicUsize::new(0));

        let item = Arc::new(DropCounter(Arc::clone(&drops)));
        let still_in_use = Arc::clone(&item);
        scavenger.retire(item);

        assert_eq!(scavenger.sweep(), 0);
        assert_eq!(scavenger.pending(), 1);

        drop(still_in_use);
        assert_eq!(scavenger.sweep(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drain_ignores_epochs() {
        let epochs = Arc::new(EpochCounter::new());
        let scavenger = Scavenger::new(epochs);
        let drops = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            scavenger.retire(Arc::new(DropCounter(Arc::clone(&drops))));
        }
        assert_eq!(scavenger.drain(), 3);
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }
}
