//! Disk worker threads: the file reader feeds playbacks, the file writer
//! drains recordings.

use crate::audio_file::AudioFileId;
use crate::playable::{FileState, PlayableAudioFile};
use crate::queue::AudioPlayQueue;
use crate::recordable::{RecordState, RecordableAudioFile};
use crate::Error;
use arc_swap::{ArcSwapOption, Guard};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tessitura_core::{
    frames_to_duration, AudioWorker, FailureCode, FailureReporter, Scavenger, TransportClock,
};

/// Play queue shared between the control thread, the file reader and the
/// instrument mixer.
pub type SharedPlayQueue = Arc<Mutex<AudioPlayQueue>>;

/// Fixed set of record slots, one per audio instrument. The callback loads
/// them lock-free; the control thread and file writer swap them.
pub struct RecordSlots {
    slots: Box<[ArcSwapOption<RecordableAudioFile>]>,
}

impl RecordSlots {
    pub fn new(count: usize) -> Self {
        Self {
            slots: (0..count).map(|_| ArcSwapOption::empty()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Real-time safe view of one slot.
    #[inline]
    pub fn get(&self, index: usize) -> Guard<Option<Arc<RecordableAudioFile>>> {
        self.slots[index].load()
    }

    pub fn load_full(&self, index: usize) -> Option<Arc<RecordableAudioFile>> {
        self.slots[index].load_full()
    }

    /// Replace a slot's file, returning the previous one.
    pub fn swap(
        &self,
        index: usize,
        file: Option<Arc<RecordableAudioFile>>,
    ) -> Option<Arc<RecordableAudioFile>> {
        self.slots[index].swap(file)
    }

    pub fn any_recording(&self) -> bool {
        self.slots
            .iter()
            .any(|s| s.load().as_ref().is_some_and(|f| f.is_recording()))
    }
}

/// Keeps the rings of every playback near the playhead topped up.
pub struct FileReader {
    queue: SharedPlayQueue,
    clock: Arc<TransportClock>,
    failures: Arc<FailureReporter>,
    lookahead: Duration,
    buffer_duration: Duration,
    files: Vec<Arc<PlayableAudioFile>>,
}

impl FileReader {
    /// `lookahead` is how far past the playhead files are prepared;
    /// `buffer_duration` is the read-ahead each streamed file holds.
    pub fn new(
        queue: SharedPlayQueue,
        clock: Arc<TransportClock>,
        failures: Arc<FailureReporter>,
        lookahead: Duration,
        buffer_duration: Duration,
    ) -> Self {
        Self {
            queue,
            clock,
            failures,
            lookahead,
            buffer_duration,
            files: Vec::new(),
        }
    }

    /// One pass over the files playing in `[now, now + lookahead)` plus every
    /// unscheduled file.
    pub fn service(&mut self) {
        let now = frames_to_duration(self.clock.position(), self.clock.sample_rate());
        {
            let queue = self.queue.lock();
            queue.playing_files(now, self.lookahead, &mut self.files);
            // Previews follow the instrument's block position, not the clock.
            for file in queue.unscheduled_files() {
                if !self.files.iter().any(|f| Arc::ptr_eq(f, file)) {
                    self.files.push(Arc::clone(file));
                }
            }
        }

        for file in &self.files {
            let result = match file.state() {
                FileState::Unbuffered => file.fill_buffers(),
                FileState::Buffered | FileState::Updating => file.update_buffers().map(|_| ()),
                FileState::Ended => Ok(()),
            };
            match result {
                Ok(()) => {}
                Err(Error::PoolExhausted { needed }) => {
                    self.failures.report(FailureCode::PoolExhausted);
                    tracing::debug!("No ring buffers for {:?} ({} needed)", file, needed);
                }
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}", file.file().path().display(), e);
                    self.failures.report(FailureCode::DiskUnderrun);
                }
            }
        }
        self.files.clear();
    }
}

impl AudioWorker for FileReader {
    fn kick(&mut self) {
        self.service();
    }

    fn buffer_duration(&self) -> Duration {
        self.buffer_duration
    }

    fn kick_when_stopped(&self) -> bool {
        // Previews play with the transport stopped.
        true
    }
}

/// Drains record rings to disk and finalizes closed recordings.
pub struct FileWriter {
    slots: Arc<RecordSlots>,
    scavenger: Arc<Scavenger<RecordableAudioFile>>,
    failures: Arc<FailureReporter>,
    completions: Sender<AudioFileId>,
    buffer_duration: Duration,
}

impl FileWriter {
    pub fn new(
        slots: Arc<RecordSlots>,
        scavenger: Arc<Scavenger<RecordableAudioFile>>,
        failures: Arc<FailureReporter>,
        completions: Sender<AudioFileId>,
        buffer_duration: Duration,
    ) -> Self {
        Self {
            slots,
            scavenger,
            failures,
            completions,
            buffer_duration,
        }
    }

    /// One pass over every record slot.
    pub fn service(&mut self) {
        for index in 0..self.slots.len() {
            let Some(file) = self.slots.load_full(index) else {
                continue;
            };
            if let Err(e) = file.update() {
                tracing::warn!("Failed to write {}: {}", file.path().display(), e);
                self.failures.report(FailureCode::DiskOverrun);
            }
            if file.is_done() {
                if let Some(done) = self.slots.swap(index, None) {
                    if done.state() == RecordState::Closed {
                        let _ = self.completions.send(done.id());
                    }
                    self.scavenger.retire(done);
                }
            }
        }
    }
}

impl AudioWorker for FileWriter {
    fn kick(&mut self) {
        self.service();
    }

    fn buffer_duration(&self) -> Duration {
        self.buffer_duration
    }

    fn kick_when_stopped(&self) -> bool {
        // Closing happens after the transport stops.
        true
    }
}
