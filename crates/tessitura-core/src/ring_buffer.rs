//! Lock-free single-writer, multi-reader ring buffer.
//!
//! One writer thread appends elements; up to `N` reader roles each keep an
//! independent cursor into the same backing storage. The writer is bounded by
//! the slowest reader, so a reader that is not interested in the data must
//! still `skip()` past it or it will eventually stall the writer.
//!
//! Nothing here blocks or allocates after construction. Requests larger than
//! the available data or free space are clamped silently; callers poll
//! [`RingBuffer::write_space`] / [`RingBuffer::read_space`] first when a
//! partial transfer matters.

use std::cell::UnsafeCell;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Sample type used throughout the engine.
pub type Sample = f32;

/// Ring of samples with a single reader.
pub type SampleRing = RingBuffer<Sample, 1>;

/// Ring of samples read by two independent consumers.
pub type SharedSampleRing = RingBuffer<Sample, 2>;

/// Lock-free circular buffer with one writer and `N` independent readers.
///
/// Holds `capacity + 1` slots so that a full buffer can be told apart from an
/// empty one.
///
/// # Thread contract
///
/// Exactly one thread may call the writer methods (`write`, `write_zeros`) at
/// a time, and for each reader index exactly one thread may call the reader
/// methods (`read`, `read_adding`, `peek`, `skip`) at a time. `reset` must not
/// race with either side.
pub struct RingBuffer<T, const N: usize = 1> {
    slots: Box<[UnsafeCell<T>]>,
    writer: AtomicUsize,
    readers: [AtomicUsize; N],
    locked: AtomicBool,
}

// SAFETY: slots are only written at indices the writer owns (between the write
// cursor and the slowest reader) and only read at indices a reader owns
// (between its cursor and the write cursor). Cursor publication uses
// Release/Acquire so element writes happen-before the matching reads.
unsafe impl<T: Send, const N: usize> Send for RingBuffer<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for RingBuffer<T, N> {}

impl<T: Copy + Default, const N: usize> RingBuffer<T, N> {
    /// Create a buffer able to hold `capacity` elements.
    pub fn new(capacity: usize) -> Self {
        assert!(N > 0, "a ring buffer needs at least one reader");
        Self {
            slots: Self::allocate(capacity + 1),
            writer: AtomicUsize::new(0),
            readers: std::array::from_fn(|_| AtomicUsize::new(0)),
            locked: AtomicBool::new(false),
        }
    }

    fn allocate(size: usize) -> Box<[UnsafeCell<T>]> {
        (0..size).map(|_| UnsafeCell::new(T::default())).collect()
    }

    #[inline]
    fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of elements the buffer can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size() - 1
    }

    /// Number of independent reader cursors.
    #[inline]
    pub const fn readers(&self) -> usize {
        N
    }

    /// Whether `mlock` succeeded on the current storage.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Elements available to `reader`.
    #[inline]
    pub fn read_space(&self, reader: usize) -> usize {
        let w = self.writer.load(Ordering::Acquire);
        let r = self.readers[reader].load(Ordering::Acquire);
        (w + self.size() - r) % self.size()
    }

    /// Free space as seen by the writer: the minimum across all readers.
    #[inline]
    pub fn write_space(&self) -> usize {
        let w = self.writer.load(Ordering::Acquire);
        self.write_space_at(w)
    }

    #[inline]
    fn write_space_at(&self, w: usize) -> usize {
        let size = self.size();
        self.readers
            .iter()
            .map(|r| (r.load(Ordering::Acquire) + size - w - 1) % size)
            .min()
            .unwrap_or(0)
    }

    /// Append up to `src.len()` elements. Returns the number written.
    pub fn write(&self, src: &[T]) -> usize {
        if src.is_empty() {
            return 0;
        }
        let w = self.writer.load(Ordering::Relaxed);
        let n = src.len().min(self.write_space_at(w));
        let size = self.size();
        for (k, value) in src[..n].iter().enumerate() {
            // SAFETY: index lies in the writer-owned region (see type docs).
            unsafe { *self.slots[(w + k) % size].get() = *value };
        }
        self.writer.store((w + n) % size, Ordering::Release);
        n
    }

    /// Append up to `n` default-valued elements. Returns the number written.
    pub fn write_zeros(&self, n: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let w = self.writer.load(Ordering::Relaxed);
        let n = n.min(self.write_space_at(w));
        let size = self.size();
        for k in 0..n {
            // SAFETY: index lies in the writer-owned region.
            unsafe { *self.slots[(w + k) % size].get() = T::default() };
        }
        self.writer.store((w + n) % size, Ordering::Release);
        n
    }

    #[inline]
    fn copy_out(&self, reader: usize, dst: &mut [T]) -> (usize, usize) {
        let r = self.readers[reader].load(Ordering::Relaxed);
        let n = dst.len().min(self.read_space(reader));
        let size = self.size();
        for (k, slot) in dst[..n].iter_mut().enumerate() {
            // SAFETY: index lies in this reader's readable region.
            *slot = unsafe { *self.slots[(r + k) % size].get() };
        }
        (r, n)
    }

    /// Copy up to `dst.len()` elements for `reader`, zero-filling whatever
    /// could not be read. Returns the number actually read.
    pub fn read(&self, dst: &mut [T], reader: usize) -> usize {
        if dst.is_empty() {
            return 0;
        }
        let (r, n) = self.copy_out(reader, dst);
        self.readers[reader].store((r + n) % self.size(), Ordering::Release);
        dst[n..].fill(T::default());
        n
    }

    /// Copy without advancing the reader. Zero-fills the remainder.
    pub fn peek(&self, dst: &mut [T], reader: usize) -> usize {
        if dst.is_empty() {
            return 0;
        }
        let (_, n) = self.copy_out(reader, dst);
        dst[n..].fill(T::default());
        n
    }

    /// Advance `reader` by up to `n` elements without copying.
    pub fn skip(&self, n: usize, reader: usize) -> usize {
        if n == 0 {
            return 0;
        }
        let r = self.readers[reader].load(Ordering::Relaxed);
        let n = n.min(self.read_space(reader));
        self.readers[reader].store((r + n) % self.size(), Ordering::Release);
        n
    }

    /// Drop all unread content for every reader.
    pub fn reset(&self) {
        let w = self.writer.load(Ordering::Acquire);
        for r in &self.readers {
            r.store(w, Ordering::Release);
        }
    }

    /// Reallocate for a new capacity. Existing content is discarded.
    pub fn resize(&mut self, capacity: usize) {
        let was_locked = self.is_locked();
        self.munlock();
        self.slots = Self::allocate(capacity + 1);
        *self.writer.get_mut() = 0;
        for r in &mut self.readers {
            *r.get_mut() = 0;
        }
        if was_locked {
            self.mlock();
        }
    }

    /// Lock the storage into RAM. Best effort: failure only raises the risk
    /// of page faults on the real-time path.
    pub fn mlock(&self) -> bool {
        let ok = self.lock_pages();
        if !ok {
            tracing::warn!(
                "Failed to mlock ring buffer of {} elements",
                self.capacity()
            );
        }
        self.locked.store(ok, Ordering::Relaxed);
        ok
    }

    fn munlock(&self) {
        if self.locked.swap(false, Ordering::Relaxed) {
            self.unlock_pages();
        }
    }

    #[cfg(unix)]
    fn lock_pages(&self) -> bool {
        let len = std::mem::size_of_val(&*self.slots);
        // SAFETY: the pointer and length describe our own live allocation.
        unsafe { libc::mlock(self.slots.as_ptr() as *const libc::c_void, len) == 0 }
    }

    #[cfg(unix)]
    fn unlock_pages(&self) {
        let len = std::mem::size_of_val(&*self.slots);
        // SAFETY: as above.
        unsafe {
            libc::munlock(self.slots.as_ptr() as *const libc::c_void, len);
        }
    }

    #[cfg(not(unix))]
    fn lock_pages(&self) -> bool {
        false
    }

    #[cfg(not(unix))]
    fn unlock_pages(&self) {}
}

impl<T: Copy + Default + AddAssign, const N: usize> RingBuffer<T, N> {
    /// Add up to `dst.len()` elements into `dst` for `reader`, stopping early
    /// when the buffer runs dry. Returns the number read.
    pub fn read_adding(&self, dst: &mut [T], reader: usize) -> usize {
        if dst.is_empty() {
            return 0;
        }
        let r = self.readers[reader].load(Ordering::Relaxed);
        let n = dst.len().min(self.read_space(reader));
        let size = self.size();
        for (k, slot) in dst[..n].iter_mut().enumerate() {
            // SAFETY: index lies in this reader's readable region.
            *slot += unsafe { *self.slots[(r + k) % size].get() };
        }
        self.readers[reader].store((r + n) % size, Ordering::Release);
        n
    }
}

impl<T, const N: usize> Drop for RingBuffer<T, N> {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            if *self.locked.get_mut() {
                let len = std::mem::size_of_val(&*self.slots);
                // SAFETY: the allocation is still live here.
                unsafe {
                    libc::munlock(self.slots.as_ptr() as *const libc::c_void, len);
                }
            }
        }
    }
}

impl<T, const N: usize> std::fmt::Debug for RingBuffer<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &(self.slots.len() - 1))
            .field("readers", &N)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_new_buffer_is_empty() {
        let rb = SampleRing::new(8);
        assert_eq!(rb.capacity(), 8);
        assert_eq!(rb.read_space(0), 0);
        assert_eq!(rb.write_space(), 8);
    }

    #[test]
    fn test_write_clamps_to_space() {
        let rb = SampleRing::new(4);
        assert_eq!(rb.write(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]), 4);
        assert_eq!(rb.write_space(), 0);
        assert_eq!(rb.write(&[7.0]), 0);
    }

    #[test]
    fn test_read_zero_fills_shortfall() {
        let rb = SampleRing::new(8);
        rb.write(&[1.0, 2.0]);
        let mut out = [9.0; 4];
        assert_eq!(rb.read(&mut out, 0), 2);
        assert_eq!(out, [1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_read_adding_stops_early() {
        let rb = SampleRing::new(8);
        rb.write(&[1.0, 2.0]);
        let mut out = [0.5; 4];
        assert_eq!(rb.read_adding(&mut out, 0), 2);
        assert_eq!(out, [1.5, 2.5, 0.5, 0.5]);
    }

    #[test]
    fn test_zero_length_operations_are_noops() {
        let rb = SampleRing::new(4);
        assert_eq!(rb.write(&[]), 0);
        assert_eq!(rb.write_zeros(0), 0);
        assert_eq!(rb.read(&mut [], 0), 0);
        assert_eq!(rb.skip(0, 0), 0);
        assert_eq!(rb.write_space(), 4);
    }

    #[test]
    fn test_wraparound() {
        let rb = SampleRing::new(4);
        let mut out = [0.0; 3];
        for round in 0..10 {
            let base = round as f32 * 3.0;
            assert_eq!(rb.write(&[base, base + 1.0, base + 2.0]), 3);
            assert_eq!(rb.read(&mut out, 0), 3);
            assert_eq!(out, [base, base + 1.0, base + 2.0]);
        }
    }

    #[test]
    fn test_writer_bounded_by_slowest_reader() {
        let rb = SharedSampleRing::new(4);
        rb.write(&[1.0, 2.0, 3.0, 4.0]);
        let mut out = [0.0; 4];
        rb.read(&mut out, 0);
        assert_eq!(rb.read_space(0), 0);
        assert_eq!(rb.read_space(1), 4);
        assert_eq!(rb.write_space(), 0);

        rb.skip(2, 1);
        assert_eq!(rb.write_space(), 2);
    }

    #[test]
    fn test_skip_clamps() {
        let rb = SampleRing::new(8);
        rb.write(&[1.0, 2.0, 3.0]);
        assert_eq!(rb.skip(10, 0), 3);
        assert_eq!(rb.read_space(0), 0);
    }

    #[test]
    fn test_peek_does_not_advance() {
        let rb = SampleRing::new(8);
        rb.write(&[1.0, 2.0, 3.0]);
        let mut out = [0.0; 2];
        assert_eq!(rb.peek(&mut out, 0), 2);
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(rb.read_space(0), 3);
    }

    #[test]
    fn test_reset_discards_content() {
        let rb = SharedSampleRing::new(8);
        rb.write(&[1.0; 6]);
        rb.skip(2, 0);
        rb.reset();
        assert_eq!(rb.read_space(0), 0);
        assert_eq!(rb.read_space(1), 0);
        assert_eq!(rb.write_space(), 8);
    }

    #[test]
    fn test_resize_discards_content() {
        let mut rb = SampleRing::new(4);
        rb.write(&[1.0, 2.0]);
        rb.resize(16);
        assert_eq!(rb.capacity(), 16);
        assert_eq!(rb.read_space(0), 0);
        assert_eq!(rb.write_space(), 16);
    }

    #[test]
    fn test_write_zeros() {
        let rb = SampleRing::new(4);
        rb.write(&[1.0]);
        assert_eq!(rb.write_zeros(10), 3);
        let mut out = [5.0; 4];
        rb.read(&mut out, 0);
        assert_eq!(out, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_concurrent_writer_and_reader() {
        let rb = Arc::new(SampleRing::new(64));
        let total = 10_000usize;

        let writer = {
            let rb = Arc::clone(&rb);
            std::thread::spawn(move || {
                let mut next = 0usize;
                while next < total {
                    let chunk: Vec<f32> = (next..(next + 7).min(total)).map(|v| v as f32).collect();
                    let written = rb.write(&chunk);
                    next += written;
                    if written == 0 {
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut received = Vec::with_capacity(total);
        let mut buf = [0.0f32; 5];
        while received.len() < total {
            let n = rb.read(&mut buf, 0);
            received.extend_from_slice(&buf[..n]);
            if n == 0 {
                std::thread::yield_now();
            }
        }
        writer.join().unwrap();

        for (i, v) in received.iter().enumerate() {
            assert_eq!(*v, i as f32);
        }
    }

    proptest! {
        #[test]
        fn prop_write_then_read_roundtrips(
            capacity in 1usize..256,
            data in proptest::collection::vec(-1.0f32..1.0, 0..256),
        ) {
            let rb = SampleRing::new(capacity);
            let n = data.len().min(capacity);
            prop_assert_eq!(rb.write(&data[..n]), n);
            let mut out = vec![0.0; n];
            prop_assert_eq!(rb.read(&mut out, 0), n);
            prop_assert_eq!(&out[..], &data[..n]);
        }

        #[test]
        fn prop_space_is_conserved(
            capacity in 1usize..128,
            ops in proptest::collection::vec((any::<bool>(), 0usize..64), 0..64),
        ) {
            let rb = SampleRing::new(capacity);
            let chunk = vec![0.5f32; 64];
            let mut out = vec![0.0f32; 64];
            for (is_write, n) in ops {
                if is_write {
                    rb.write(&chunk[..n]);
                } else {
                    rb.read(&mut out[..n], 0);
                }
                prop_assert_eq!(rb.write_space() + rb.read_space(0), capacity);
            }
        }

        #[test]
        fn prop_lockstep_readers_conserve_space(
            capacity in 1usize..128,
            ops in proptest::collection::vec(0usize..64, 0..32),
        ) {
            let rb = SharedSampleRing::new(capacity);
            let chunk = vec![0.25f32; 64];
            let mut out = vec![0.0f32; 64];
            for n in ops {
                let written = rb.write(&chunk[..n]);
                rb.read(&mut out[..written], 0);
                rb.skip(written, 1);
                for reader in 0..2 {
                    prop_assert_eq!(rb.write_space() + rb.read_space(reader), capacity);
                }
            }
        }
    }
}
