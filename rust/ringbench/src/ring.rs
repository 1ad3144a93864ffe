//! Cursor bookkeeping for the slot array.
//!
//! The ring does no locking of its own: every mutation happens between a
//! backend's `begin_*` and `end_*`. The cursor words are atomics only so that
//! [`Ring::status`] can be sampled from outside the critical section.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

/// Ring cursors as laid out in the shared region.
#[repr(C)]
pub struct RingHeader {
    /// Next slot to write.
    head: AtomicU32,
    /// Next slot to read.
    tail: AtomicU32,
    /// Full slots.
    ready_count: AtomicU32,
    /// Immutable after init.
    capacity: u32,
    /// Set once a participant gives up. Never cleared.
    aborted: AtomicU32,
}

/// Snapshot of the cursors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStatus {
    pub head: u32,
    pub tail: u32,
    pub ready_count: u32,
    pub capacity: u32,
}

/// View of a [`RingHeader`] inside a region.
#[derive(Clone, Copy)]
pub struct Ring {
    header: NonNull<RingHeader>,
}

// SAFETY: mutation is serialized by the owning backend; probes use atomics.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Write a fresh, empty header.
    ///
    /// # Safety
    ///
    /// `header` must point into a live region and nobody else may touch it yet.
    pub(crate) unsafe fn init(header: NonNull<RingHeader>, capacity: u32) -> Self {
        assert!(capacity >= 1, "ring capacity must be at least 1");
        // SAFETY: forwarded to the caller.
        unsafe {
            header.as_ptr().write(RingHeader {
                head: AtomicU32::new(0),
                tail: AtomicU32::new(0),
                ready_count: AtomicU32::new(0),
                capacity,
                aborted: AtomicU32::new(0),
            });
        }
        Self { header }
    }

    /// View an already initialized header.
    ///
    /// # Safety
    ///
    /// `header` must point at a header written by [`Ring::init`] that stays
    /// mapped for the lifetime of the view.
    pub(crate) unsafe fn attach(header: NonNull<RingHeader>) -> Self {
        Self { header }
    }

    #[inline]
    fn header(&self) -> &RingHeader {
        // SAFETY: see the constructors.
        unsafe { self.header.as_ref() }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.header().capacity
    }

    #[inline]
    pub fn ready_count(&self) -> u32 {
        self.header().ready_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.ready_count() == self.capacity()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ready_count() == 0
    }

    /// Index of the slot the producer may fill. Requires a free slot.
    #[inline]
    pub fn slot_for_write(&self) -> usize {
        debug_assert!(
            !self.is_full(),
            "slot_for_write on a full ring (capacity {})",
            self.capacity()
        );
        self.header().head.load(Ordering::Relaxed) as usize
    }

    /// Publish the slot returned by [`slot_for_write`](Self::slot_for_write).
    #[inline]
    pub fn advance_write(&self) {
        let h = self.header();
        debug_assert!(!self.is_full(), "advance_write on a full ring");
        let head = h.head.load(Ordering::Relaxed);
        h.head.store((head + 1) % h.capacity, Ordering::Relaxed);
        h.ready_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Index of the oldest full slot. Requires at least one.
    #[inline]
    pub fn slot_for_read(&self) -> usize {
        debug_assert!(!self.is_empty(), "slot_for_read on an empty ring");
        self.header().tail.load(Ordering::Relaxed) as usize
    }

    /// Release the slot returned by [`slot_for_read`](Self::slot_for_read).
    #[inline]
    pub fn advance_read(&self) {
        let h = self.header();
        debug_assert!(!self.is_empty(), "advance_read on an empty ring");
        let tail = h.tail.load(Ordering::Relaxed);
        h.tail.store((tail + 1) % h.capacity, Ordering::Relaxed);
        h.ready_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Mark the ring dead. Backends fail every `begin_*` from here on.
    #[inline]
    pub fn abort(&self) {
        self.header().aborted.store(1, Ordering::Release);
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.header().aborted.load(Ordering::Acquire) != 0
    }

    pub fn status(&self) -> RingStatus {
        let h = self.header();
        RingStatus {
            head: h.head.load(Ordering::Relaxed),
            tail: h.tail.load(Ordering::Relaxed),
            ready_count: h.ready_count.load(Ordering::Relaxed),
            capacity: h.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringbench_primitives::HeapRegion;

    fn ring(heap: &HeapRegion, capacity: u32) -> Ring {
        unsafe { Ring::init(heap.region().at::<RingHeader>(0), capacity) }
    }

    #[test]
    fn cursors_wrap_modulo_capacity() {
        let heap = HeapRegion::zeroed(64);
        let ring = ring(&heap, 3);

        let mut written = Vec::new();
        for _ in 0..3 {
            written.push(ring.slot_for_write());
            ring.advance_write();
        }
        assert_eq!(written, [0, 1, 2]);
        assert!(ring.is_full());

        assert_eq!(ring.slot_for_read(), 0);
        ring.advance_read();
        assert_eq!(ring.slot_for_write(), 0);
        ring.advance_write();

        assert_eq!(
            ring.status(),
            RingStatus {
                head: 1,
                tail: 1,
                ready_count: 3,
                capacity: 3
            }
        );
    }

    #[test]
    fn capacity_one_is_a_handshake() {
        let heap = HeapRegion::zeroed(64);
        let ring = ring(&heap, 1);

        for _ in 0..5 {
            assert!(ring.is_empty());
            assert_eq!(ring.slot_for_write(), 0);
            ring.advance_write();
            assert!(ring.is_full());
            assert_eq!(ring.slot_for_read(), 0);
            ring.advance_read();
        }
    }

    #[test]
    fn attach_sees_initialized_state() {
        let heap = HeapRegion::zeroed(64);
        let first = ring(&heap, 8);
        first.advance_write();
        first.advance_write();

        let second = unsafe { Ring::attach(heap.region().at::<RingHeader>(0)) };
        assert_eq!(second.ready_count(), 2);
        assert_eq!(second.slot_for_read(), 0);
        assert_eq!(second.capacity(), 8);
        assert!(!second.is_aborted());

        first.abort();
        assert!(second.is_aborted());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "empty ring")]
    fn reading_an_empty_ring_is_a_bug() {
        let heap = HeapRegion::zeroed(64);
        ring(&heap, 4).slot_for_read();
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "full ring")]
    fn writing_a_full_ring_is_a_bug() {
        let heap = HeapRegion::zeroed(64);
        let ring = ring(&heap, 1);
        ring.advance_write();
        ring.slot_for_write();
    }
}
