// src/abi/ring.rs

//! Lock-free completion ring
//!
//! Single-producer (interrupt handler), single-consumer (event loop)
//! ring buffer carrying [`CompletionEntry`] records from interrupt
//! context to loop context.
//!
//! # Synchronization protocol
//!
//! 1. Handler checks `tail - head < RING_SIZE` (space available)
//! 2. Handler writes the entry at `entries[tail & RING_MASK]`
//! 3. Handler updates tail with `Release` ordering
//! 4. Loop reads tail with `Acquire` ordering, then reads entries
//! 5. Loop updates head with `Release` ordering
//!
//! This is the strict single-writer/single-reader handoff that makes a
//! mutex between handler and loop unnecessary. `push` is O(1), never
//! blocks, and never allocates, which is the full set of things an interrupt
//! handler is permitted to do. On overflow the entry is dropped and the
//! overflow counter incremented; the loop reports the count.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::abi::work::CompletionEntry;
use crate::constants::COMPLETION_RING_SIZE;

/// Ring capacity (must be a power of 2)
pub const RING_SIZE: usize = COMPLETION_RING_SIZE;

/// Ring mask for efficient modulo operation
pub const RING_MASK: usize = RING_SIZE - 1;

const _: () = assert!(RING_SIZE.is_power_of_two(), "RING_SIZE must be a power of 2");

/// Handler-to-loop completion ring
///
/// Declared as a `static` so the registered interrupt handler can reach
/// it; all interior state is atomic or guarded by the SPSC discipline.
pub struct CompletionRing {
    entries: [UnsafeCell<CompletionEntry>; RING_SIZE],
    /// Consumer index, advanced only by the event loop
    head: AtomicU32,
    /// Producer index, advanced only by the interrupt handler
    tail: AtomicU32,
    /// Completions dropped due to a full ring
    dropped: AtomicU32,
}

// Safety: the producer side is touched only from interrupt context and
// the consumer side only from the event loop; each index has exactly one
// writer and the entry cells are published via Release/Acquire on tail.
unsafe impl Sync for CompletionRing {}

impl CompletionRing {
    /// Create an empty ring
    #[must_use]
    pub const fn new() -> Self {
        const INIT: UnsafeCell<CompletionEntry> = UnsafeCell::new(CompletionEntry::zeroed());
        Self {
            entries: [INIT; RING_SIZE],
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }

    /// Publish a completion from interrupt context
    ///
    /// Returns `false` (and counts the drop) if the ring is full.
    pub fn push(&self, entry: CompletionEntry) -> bool {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if tail.wrapping_sub(head) >= RING_SIZE as u32 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let idx = (tail as usize) & RING_MASK;
        // Safety: this cell is outside the head..tail window, so the
        // consumer will not read it until the tail store below.
        unsafe {
            *self.entries[idx].get() = entry;
        }
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        true
    }

    /// Take the oldest completion, loop context only
    pub fn pop(&self) -> Option<CompletionEntry> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let idx = (head as usize) & RING_MASK;
        // Safety: head..tail entries were published by the Release store
        // in `push` and are not rewritten until head advances past them.
        let entry = unsafe { *self.entries[idx].get() };
        self.head.store(head.wrapping_add(1), Ordering::Release);
        Some(entry)
    }

    /// Number of completions waiting to be consumed
    #[must_use]
    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) as usize
    }

    /// True if no completions are waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of completions dropped due to overflow
    #[must_use]
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for CompletionRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::work::{ResultCode, SlotId};

    #[test]
    fn test_fifo_order() {
        let ring = CompletionRing::new();
        for i in 0..5u16 {
            assert!(ring.push(CompletionEntry::success(SlotId(i), u32::from(i))));
        }
        assert_eq!(ring.len(), 5);
        for i in 0..5u16 {
            let e = ring.pop().unwrap();
            assert_eq!(e.slot, SlotId(i));
            assert_eq!(e.bytes, u32::from(i));
        }
        assert!(ring.pop().is_none());
        assert!(ring.is_empty());
    }

    #[test]
    fn test_overflow_counts_drops() {
        let ring = CompletionRing::new();
        for _ in 0..RING_SIZE {
            assert!(ring.push(CompletionEntry::success(SlotId(0), 0)));
        }
        assert!(!ring.push(CompletionEntry::failure(SlotId(1), ResultCode::IoError)));
        assert!(!ring.push(CompletionEntry::failure(SlotId(2), ResultCode::IoError)));
        assert_eq!(ring.dropped(), 2);
        assert_eq!(ring.len(), RING_SIZE);

        // Draining one slot makes room again
        ring.pop().unwrap();
        assert!(ring.push(CompletionEntry::success(SlotId(3), 0)));
    }

    #[test]
    fn test_wraparound() {
        let ring = CompletionRing::new();
        for round in 0..3u32 {
            for i in 0..RING_SIZE {
                assert!(ring.push(CompletionEntry::success(SlotId(i as u16), round)));
            }
            for i in 0..RING_SIZE {
                let e = ring.pop().unwrap();
                assert_eq!(e.slot, SlotId(i as u16));
                assert_eq!(e.bytes, round);
            }
        }
        assert_eq!(ring.dropped(), 0);
    }
}
