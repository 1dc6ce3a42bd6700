//! Fixed-capacity pool of same-size sample rings.
//!
//! Disk-streamed files borrow their per-channel rings from here instead of
//! allocating, so scheduling playback never touches the allocator on a hot
//! path. All access goes through one mutex and must come from non-real-time
//! threads; the real-time side only ever sees rings it has already been handed.

use crate::ring_buffer::SampleRing;
use parking_lot::Mutex;
use std::sync::Arc;

struct PoolState {
    free: Vec<Arc<SampleRing>>,
    buffer_size: usize,
    pool_size: usize,
    lent: usize,
    refused: usize,
    lock_memory: bool,
}

impl PoolState {
    fn make_buffer(&self) -> Arc<SampleRing> {
        let rb = SampleRing::new(self.buffer_size);
        if self.lock_memory {
            rb.mlock();
        }
        Arc::new(rb)
    }
}

/// Thread-safe pool of sample rings lent out to streaming files.
pub struct RingBufferPool {
    state: Mutex<PoolState>,
}

impl RingBufferPool {
    /// Create a pool holding `pool_size` rings of `buffer_size` samples each.
    pub fn new(pool_size: usize, buffer_size: usize) -> Self {
        let mut state = PoolState {
            free: Vec::with_capacity(pool_size),
            buffer_size,
            pool_size,
            lent: 0,
            refused: 0,
            lock_memory: false,
        };
        for _ in 0..pool_size {
            let rb = state.make_buffer();
            state.free.push(rb);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Lock every pooled ring into RAM from now on (best effort).
    pub fn set_lock_memory(&self, lock: bool) {
        let mut state = self.state.lock();
        state.lock_memory = lock;
        if lock {
            for rb in &state.free {
                rb.mlock();
            }
        }
    }

    /// Borrow a ring. Returns `None` when every ring is lent out; the refusal
    /// is counted so the owner can grow the pool later.
    pub fn get_buffer(&self) -> Option<Arc<SampleRing>> {
        let mut state = self.state.lock();
        match state.free.pop() {
            Some(rb) => {
                state.lent += 1;
                Some(rb)
            }
            None => {
                state.refused += 1;
                None
            }
        }
    }

    /// Borrow `count` rings at once, or none at all.
    pub fn get_buffers(&self, count: usize) -> Option<Vec<Arc<SampleRing>>> {
        let mut state = self.state.lock();
        if state.free.len() < count {
            state.refused += count;
            return None;
        }
        let at = state.free.len() - count;
        let buffers = state.free.split_off(at);
        state.lent += count;
        Some(buffers)
    }

    /// Give a ring back. Its content is discarded. Rings whose size no longer
    /// matches the pool (after `set_buffer_size`) or that exceed the pool size
    /// are dropped.
    pub fn return_buffer(&self, buffer: Arc<SampleRing>) {
        let mut state = self.state.lock();
        state.lent = state.lent.saturating_sub(1);
        if buffer.capacity() != state.buffer_size
            || state.free.len() + state.lent >= state.pool_size
        {
            return;
        }
        buffer.reset();
        state.free.push(buffer);
    }

    /// Grow or shrink the number of rings the pool manages.
    pub fn set_pool_size(&self, pool_size: usize) {
        let mut state = self.state.lock();
        let managed = state.free.len() + state.lent;
        if pool_size > managed {
            for _ in managed..pool_size {
                let rb = state.make_buffer();
                state.free.push(rb);
            }
            tracing::debug!("Ring buffer pool grown to {} buffers", pool_size);
        } else {
            let excess = (managed - pool_size).min(state.free.len());
            let keep = state.free.len() - excess;
            state.free.truncate(keep);
        }
        state.pool_size = pool_size;
    }

    /// Change the ring size. Free rings are reallocated now; lent rings are
    /// dropped when they come back.
    pub fn set_buffer_size(&self, buffer_size: usize) {
        let mut state = self.state.lock();
        if state.buffer_size == buffer_size {
            return;
        }
        state.buffer_size = buffer_size;
        let count = state.free.len();
        state.free.clear();
        for _ in 0..count {
            let rb = state.make_buffer();
            state.free.push(rb);
        }
    }

    /// Size in samples of each pooled ring.
    pub fn buffer_size(&self) -> usize {
        self.state.lock().buffer_size
    }

    /// Rings ready to be lent.
    pub fn available_count(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Rings currently lent out.
    pub fn lent_count(&self) -> usize {
        self.state.lock().lent
    }

    /// Target number of rings managed by the pool.
    pub fn pool_size(&self) -> usize {
        self.state.lock().pool_size
    }

    /// Reads and resets the number of refused requests.
    pub fn take_refused_count(&self) -> usize {
        std::mem::take(&mut self.state.lock().refused)
    }
}
