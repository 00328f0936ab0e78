//! Multi-producer ring buffer gated by a fixed table of consumer barriers.
//!
//! # Design
//! - **Publishers**: claim the next sequence with a CAS on `claim`, write
//!   the slot, then `commit` in claim order. The commit store has release
//!   semantics so a consumer that observes the new cursor also observes the
//!   slot contents.
//! - **Consumers**: register a barrier entry, poll the committed cursor with
//!   `wait_for`, read slots, and release their barrier as they go. A
//!   publisher never reuses a slot until every registered barrier has moved
//!   past it one full lap earlier.
//!
//! Sequences start at 1; 0 means "nothing published yet". The counters are
//! 64-bit and monotonic, which makes wrap-around reasoning unnecessary for
//! any realistic process lifetime.
//!
//! # Thread Safety
//! The buffer itself is `Sync` and shared by reference. Protocol mistakes
//! (touching a slot without holding its sequence) are ruled out by the
//! `unsafe` contracts on [`RingBuffer::show_entry`] and
//! [`RingBuffer::acquire_entry`], not by runtime checks.

use crate::ring::seq_to_index;
use crossbeam_utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Barrier table sentinel: slot is not registered to any consumer.
const FREE: u64 = u64::MAX;

#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("all {0} consumer barrier slots are in use")]
    BarriersExhausted(usize),
}

/// Opaque registration of one consumer barrier.
///
/// Deliberately neither `Clone` nor `Copy`: the handle is the capability to
/// release and unregister exactly one barrier entry, and giving it back via
/// [`RingBuffer::unregister`] consumes it.
#[derive(Debug)]
pub struct ConsumerHandle {
    index: usize,
}

/// Fixed-capacity lock-free queue.
///
/// # Type Parameters
/// - `T`: slot type. Slots are pre-allocated and reused in place for the
///   life of the buffer.
/// - `N`: capacity, must be a power of two.
/// - `P`: maximum number of simultaneously registered consumers.
pub struct RingBuffer<T, const N: usize, const P: usize> {
    /// Highest sequence claimed by any publisher.
    claim: CachePadded<AtomicU64>,
    /// Highest committed (visible) sequence.
    cursor: CachePadded<AtomicU64>,
    /// Per-consumer released positions, `FREE` when unregistered.
    barriers: [CachePadded<AtomicU64>; P],
    /// The slots. Boxed so large rings do not live on the stack.
    slots: Box<[UnsafeCell<T>]>,
}

// The slot array is only touched through the claim/commit/release protocol,
// which hands out exclusive access windows per sequence number.
unsafe impl<T: Send, const N: usize, const P: usize> Send for RingBuffer<T, N, P> {}
unsafe impl<T: Send, const N: usize, const P: usize> Sync for RingBuffer<T, N, P> {}

impl<T, const N: usize, const P: usize> RingBuffer<T, N, P> {
    /// Creates a buffer with every slot produced by `init`.
    ///
    /// # Panics
    /// If `N` is not a power of two or `P` is zero.
    pub fn new(mut init: impl FnMut(usize) -> T) -> Self {
        assert!(N.is_power_of_two(), "capacity must be a power of 2");
        assert!(P > 0, "at least one barrier slot is required");
        let slots: Box<[UnsafeCell<T>]> =
            (0..N).map(|i| UnsafeCell::new(init(i))).collect();
        Self {
            claim: CachePadded::new(AtomicU64::new(0)),
            cursor: CachePadded::new(AtomicU64::new(0)),
            barriers: std::array::from_fn(|_| CachePadded::new(AtomicU64::new(FREE))),
            slots,
        }
    }

    #[inline(always)]
    fn mask() -> u64 {
        (N as u64) - 1
    }

    /// The slowest released position across registered consumers, or the
    /// committed cursor when nobody is registered (which caps a publisher
    /// at `N` uncommitted claims).
    #[inline]
    fn gate(&self) -> u64 {
        let mut min = FREE;
        for b in &self.barriers {
            let v = b.load(Ordering::Acquire);
            if v < min {
                min = v;
            }
        }
        if min == FREE {
            self.cursor.load(Ordering::Relaxed)
        } else {
            min
        }
    }

    /// Claims the next publisher sequence, or `None` when the ring is full
    /// (the lap-behind consumer has not released the slot yet).
    #[inline]
    pub fn try_acquire_publisher_slot(&self) -> Option<u64> {
        loop {
            let claimed = self.claim.load(Ordering::Relaxed);
            let next = claimed + 1;
            if next > self.gate() + N as u64 {
                return None;
            }
            if self
                .claim
                .compare_exchange_weak(claimed, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(next);
            }
            std::hint::spin_loop();
        }
    }

    /// Claims the next publisher sequence, spinning until a slot frees up.
    pub fn acquire_publisher_slot(&self) -> u64 {
        let backoff = Backoff::new();
        loop {
            if let Some(seq) = self.try_acquire_publisher_slot() {
                return seq;
            }
            backoff.snooze();
        }
    }

    /// Publishes `seq`. Spins until all lower claims have committed so that
    /// consumers observe a dense committed prefix.
    ///
    /// The release store pairs with the acquire load in [`Self::wait_for`]:
    /// every write to the slot happens-before the cursor becomes visible.
    pub fn commit_publisher_slot(&self, seq: u64) {
        let backoff = Backoff::new();
        while self.cursor.load(Ordering::Relaxed) != seq - 1 {
            backoff.snooze();
        }
        self.cursor.store(seq, Ordering::Release);
    }

    /// Allocates a barrier entry.
    ///
    /// Returns the handle and the starting sequence: the consumer's first
    /// readable sequence is `start + 1`, so a late-registering consumer only
    /// sees messages published after registration.
    pub fn register_consumer(&self) -> Result<(ConsumerHandle, u64), RingError> {
        for (index, barrier) in self.barriers.iter().enumerate() {
            let start = self.cursor.load(Ordering::Acquire);
            if barrier
                .compare_exchange(FREE, start, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok((ConsumerHandle { index }, start));
            }
        }
        Err(RingError::BarriersExhausted(P))
    }

    /// Returns the highest committed sequence if it is at least
    /// `upper_limit`, without waiting.
    #[inline(always)]
    pub fn try_wait_for(&self, upper_limit: u64) -> Option<u64> {
        let committed = self.cursor.load(Ordering::Acquire);
        (committed >= upper_limit).then_some(committed)
    }

    /// Spins until the committed cursor reaches `upper_limit`, returning the
    /// (possibly larger) committed sequence.
    pub fn wait_for(&self, upper_limit: u64) -> u64 {
        let backoff = Backoff::new();
        loop {
            if let Some(committed) = self.try_wait_for(upper_limit) {
                return committed;
            }
            backoff.snooze();
        }
    }

    /// Read-only view of the slot holding `seq`.
    ///
    /// # Safety
    /// `seq` must be committed and not yet released past by this caller's
    /// barrier, and no publisher may concurrently hold the same slot (which
    /// the barrier protocol guarantees while the sequence is unreleased).
    #[inline(always)]
    pub unsafe fn show_entry(&self, seq: u64) -> &T {
        let idx = seq_to_index(seq, Self::mask()) as usize;
        unsafe { &*self.slots[idx].get() }
    }

    /// Exclusive view of the slot holding `seq`.
    ///
    /// # Safety
    /// The caller must hold exclusive access to `seq`: either a claimed,
    /// uncommitted publisher sequence, or a committed sequence this caller's
    /// barrier has not yet released while being the only reader of it.
    #[allow(clippy::mut_from_ref)]
    #[inline(always)]
    pub unsafe fn acquire_entry(&self, seq: u64) -> &mut T {
        let idx = seq_to_index(seq, Self::mask()) as usize;
        unsafe { &mut *self.slots[idx].get() }
    }

    /// Marks every sequence up to and including `seq` as consumed by the
    /// handle's barrier, allowing publishers to lap into those slots.
    #[inline(always)]
    pub fn release_entry(&self, handle: &ConsumerHandle, seq: u64) {
        self.barriers[handle.index].store(seq, Ordering::Release);
    }

    /// Frees the barrier entry. The handle is consumed; the slot becomes
    /// available for a future [`Self::register_consumer`].
    pub fn unregister(&self, handle: ConsumerHandle) {
        self.barriers[handle.index].store(FREE, Ordering::Release);
    }

    /// Highest committed sequence (0 when nothing was ever published).
    #[inline(always)]
    pub fn committed(&self) -> u64 {
        self.cursor.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_consume_in_order() {
        let ring: RingBuffer<u64, 8, 2> = RingBuffer::new(|_| 0);
        let (handle, start) = ring.register_consumer().unwrap();
        assert_eq!(start, 0);

        for v in 1..=5u64 {
            let seq = ring.acquire_publisher_slot();
            unsafe { *ring.acquire_entry(seq) = v * 100 };
            ring.commit_publisher_slot(seq);
        }

        let committed = ring.try_wait_for(start + 1).unwrap();
        assert_eq!(committed, 5);
        for seq in 1..=committed {
            assert_eq!(unsafe { *ring.show_entry(seq) }, seq * 100);
            ring.release_entry(&handle, seq);
        }
        ring.unregister(handle);
    }

    #[test]
    fn full_ring_reports_not_ready() {
        let ring: RingBuffer<u32, 4, 1> = RingBuffer::new(|_| 0);
        let (handle, _) = ring.register_consumer().unwrap();

        for _ in 0..4 {
            let seq = ring.try_acquire_publisher_slot().unwrap();
            ring.commit_publisher_slot(seq);
        }
        // Consumer has not released anything, slot 1 cannot be lapped.
        assert!(ring.try_acquire_publisher_slot().is_none());

        ring.release_entry(&handle, 1);
        assert_eq!(ring.try_acquire_publisher_slot(), Some(5));
        ring.unregister(handle);
    }

    #[test]
    fn late_consumer_starts_at_current_cursor() {
        let ring: RingBuffer<u8, 8, 2> = RingBuffer::new(|_| 0);
        let (writer_gate, _) = ring.register_consumer().unwrap();

        for _ in 0..3 {
            let seq = ring.acquire_publisher_slot();
            ring.commit_publisher_slot(seq);
            ring.release_entry(&writer_gate, seq);
        }

        let (late, start) = ring.register_consumer().unwrap();
        assert_eq!(start, 3);
        assert!(ring.try_wait_for(start + 1).is_none());
        ring.unregister(late);
        ring.unregister(writer_gate);
    }

    #[test]
    fn barrier_table_exhaustion() {
        let ring: RingBuffer<u8, 4, 1> = RingBuffer::new(|_| 0);
        let (first, _) = ring.register_consumer().unwrap();
        assert!(matches!(
            ring.register_consumer(),
            Err(RingError::BarriersExhausted(1))
        ));
        ring.unregister(first);
        assert!(ring.register_consumer().is_ok());
    }

    #[test]
    fn empty_ring_has_nothing_to_wait_for() {
        let ring: RingBuffer<u8, 4, 1> = RingBuffer::new(|_| 0);
        assert!(ring.try_wait_for(1).is_none());
        assert_eq!(ring.committed(), 0);
    }
}
