//! Time-indexed set of scheduled and unscheduled playbacks.
//!
//! Scheduled files are indexed per instrument in one-second buckets, so
//! answering "what plays on instrument X during this period" touches only the
//! buckets the period spans. Buckets are keyed by second and only exist for
//! seconds some file covers, so a file far out on the timeline costs no more
//! than one near the origin. Unscheduled files (previews) sit in a flat list
//! scanned on every lookup.
//!
//! The queue is not synchronized. Its owner serializes mutation against
//! lookup.

use crate::playable::PlayableAudioFile;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tessitura_core::InstrumentId;

type FileRef = Arc<PlayableAudioFile>;

#[derive(Default)]
struct InstrumentIndex {
    /// Files overlapping each whole second of the timeline.
    buckets: BTreeMap<u64, Vec<FileRef>>,
}

/// Index of the playbacks the engine knows about.
#[derive(Default)]
pub struct AudioPlayQueue {
    scheduled: Vec<FileRef>,
    index: HashMap<InstrumentId, InstrumentIndex>,
    /// Target channels of scheduled files overlapping each second.
    channel_counts: BTreeMap<u64, usize>,
    max_buffers: usize,
    unscheduled: Vec<FileRef>,
}

/// Seconds whose bucket a `[start, start + duration)` span touches.
fn bucket_range(start: Duration, duration: Duration) -> std::ops::RangeInclusive<u64> {
    let first = start.as_secs();
    let last = if duration.is_zero() {
        first
    } else {
        (start + duration - Duration::from_nanos(1)).as_secs()
    };
    first..=last
}

/// Half-open overlap: a file abutting either edge of the window is excluded.
#[inline]
fn overlaps(file: &PlayableAudioFile, start: Duration, end: Duration) -> bool {
    file.start() < end && file.end() > start
}

#[inline]
fn push_unique(out: &mut Vec<FileRef>, file: &FileRef) -> bool {
    if out.iter().any(|f| Arc::ptr_eq(f, file)) {
        return false;
    }
    out.push(Arc::clone(file));
    true
}

impl AudioPlayQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a file under every second it spans.
    pub fn add_scheduled(&mut self, file: FileRef) {
        let range = bucket_range(file.start(), file.duration());
        let channels = file.target_channels();

        let entry = self.index.entry(file.instrument()).or_default();
        for second in range {
            entry.buckets.entry(second).or_default().push(Arc::clone(&file));
            let count = self.channel_counts.entry(second).or_insert(0);
            *count += channels;
            self.max_buffers = self.max_buffers.max(*count);
        }
        self.scheduled.push(file);
    }

    /// Add a file to the flat list scanned on every lookup.
    pub fn add_unscheduled(&mut self, file: FileRef) {
        self.unscheduled.push(file);
    }

    /// Remove a file from every index it is in and hand it back. Removing a
    /// file that is not queued is a no-op.
    pub fn erase(&mut self, file: &FileRef) -> Option<FileRef> {
        if let Some(pos) = self.scheduled.iter().position(|f| Arc::ptr_eq(f, file)) {
            let removed = self.scheduled.swap_remove(pos);
            let range = bucket_range(removed.start(), removed.duration());
            let channels = removed.target_channels();
            if let Some(entry) = self.index.get_mut(&removed.instrument()) {
                for second in range.clone() {
                    if let Some(bucket) = entry.buckets.get_mut(&second) {
                        bucket.retain(|f| !Arc::ptr_eq(f, &removed));
                        if bucket.is_empty() {
                            entry.buckets.remove(&second);
                        }
                    }
                }
                if entry.buckets.is_empty() {
                    self.index.remove(&removed.instrument());
                }
            }
            let mut peak_touched = false;
            for second in range {
                if let Some(count) = self.channel_counts.get_mut(&second) {
                    peak_touched |= *count == self.max_buffers;
                    *count = count.saturating_sub(channels);
                    if *count == 0 {
                        self.channel_counts.remove(&second);
                    }
                }
            }
            if peak_touched {
                self.max_buffers = self.channel_counts.values().copied().max().unwrap_or(0);
            }
            return Some(removed);
        }
        if let Some(pos) = self.unscheduled.iter().position(|f| Arc::ptr_eq(f, file)) {
            return Some(self.unscheduled.remove(pos));
        }
        None
    }

    /// Files on `instrument` overlapping `[start, start + duration)`, at most
    /// `limit`, appended to `out` without duplicates. Returns the number
    /// added.
    pub fn playing_files_for_instrument(
        &self,
        start: Duration,
        duration: Duration,
        instrument: InstrumentId,
        out: &mut Vec<FileRef>,
        limit: usize,
    ) -> usize {
        let end = start + duration;
        let mut added = 0;

        if let Some(entry) = self.index.get(&instrument) {
            let buckets = entry.buckets.range(bucket_range(start, duration));
            'buckets: for (_, bucket) in buckets {
                for file in bucket {
                    if added >= limit {
                        break 'buckets;
                    }
                    if overlaps(file, start, end) && push_unique(out, file) {
                        added += 1;
                    }
                }
            }
        }

        for file in &self.unscheduled {
            if added >= limit {
                break;
            }
            if file.instrument() == instrument
                && overlaps(file, start, end)
                && push_unique(out, file)
            {
                added += 1;
            }
        }
        added
    }

    /// Files on any instrument overlapping `[start, start + duration)`.
    pub fn playing_files(&self, start: Duration, duration: Duration, out: &mut Vec<FileRef>) {
        let end = start + duration;
        for entry in self.index.values() {
            for (_, bucket) in entry.buckets.range(bucket_range(start, duration)) {
                for file in bucket {
                    if overlaps(file, start, end) {
                        push_unique(out, file);
                    }
                }
            }
        }
        for file in &self.unscheduled {
            if overlaps(file, start, end) {
                push_unique(out, file);
            }
        }
    }

    /// Whether anything at all could play on `instrument`.
    pub fn has_files_for_instrument(&self, instrument: InstrumentId) -> bool {
        self.index.contains_key(&instrument)
            || self.unscheduled.iter().any(|f| f.instrument() == instrument)
    }

    /// Most ring buffers the queued scheduled files need at once.
    pub fn max_buffers_required(&self) -> usize {
        self.max_buffers
    }

    /// Earliest end, strictly after `time`, of any queued file.
    pub fn earliest_end_after(&self, time: Duration) -> Option<Duration> {
        self.scheduled
            .iter()
            .chain(&self.unscheduled)
            .map(|f| f.end())
            .filter(|end| *end > time)
            .min()
    }

    pub fn scheduled_files(&self) -> &[FileRef] {
        &self.scheduled
    }

    pub fn unscheduled_files(&self) -> &[FileRef] {
        &self.unscheduled
    }

    pub fn len(&self) -> usize {
        self.scheduled.len() + self.unscheduled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty() && self.unscheduled.is_empty()
    }

    /// Remove everything and hand the files back.
    pub fn clear(&mut self) -> Vec<FileRef> {
        self.index.clear();
        self.channel_counts.clear();
        self.max_buffers = 0;
        let mut drained = std::mem::take(&mut self.scheduled);
        drained.append(&mut self.unscheduled);
        drained
    }
}
