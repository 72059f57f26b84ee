// src/kernel/timer.rs

//! Active timer list
//!
//! Fixed-capacity list of (slot, absolute deadline) pairs. Timers are
//! serviced entirely by the kernel: arming one never reaches the
//! platform, and expiry is detected during the tick against the clock
//! the wait-for-interrupt call returned. Capacity is small enough that
//! the O(n) scans are cheaper than maintaining a heap.

use crate::abi::work::SlotId;
use crate::constants::MAX_TIMERS;
use crate::errors::{KernelResult, WorkError};

/// Fixed-capacity active timer list
#[derive(Debug)]
pub struct TimerList {
    entries: [Option<(SlotId, u64)>; MAX_TIMERS],
}

impl TimerList {
    /// Empty timer list
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: [None; MAX_TIMERS],
        }
    }

    /// Arm a timer for `slot` at the absolute deadline
    pub fn insert(&mut self, slot: SlotId, deadline_ms: u64) -> KernelResult<()> {
        for entry in &mut self.entries {
            if entry.is_none() {
                *entry = Some((slot, deadline_ms));
                return Ok(());
            }
        }
        Err(WorkError::TimerListFull.into())
    }

    /// Disarm the timer for `slot`, if armed
    ///
    /// Returns `true` if a timer was removed.
    pub fn remove(&mut self, slot: SlotId) -> bool {
        for entry in &mut self.entries {
            if matches!(entry, Some((s, _)) if *s == slot) {
                *entry = None;
                return true;
            }
        }
        false
    }

    /// Take one expired timer, earliest deadline first
    ///
    /// Call repeatedly until it returns `None` to drain everything due
    /// at `now_ms`.
    pub fn take_expired(&mut self, now_ms: u64) -> Option<SlotId> {
        let mut best: Option<(usize, u64)> = None;
        for (i, entry) in self.entries.iter().enumerate() {
            if let Some((_, deadline)) = entry {
                if *deadline <= now_ms && best.map_or(true, |(_, d)| *deadline < d) {
                    best = Some((i, *deadline));
                }
            }
        }
        let (idx, _) = best?;
        self.entries[idx].take().map(|(slot, _)| slot)
    }

    /// Delay until the earliest deadline, `None` when no timer is armed
    ///
    /// Already-expired timers yield a zero delay (poll immediately).
    #[must_use]
    pub fn next_delay(&self, now_ms: u64) -> Option<u64> {
        let mut min: Option<u64> = None;
        for entry in self.entries.iter().flatten() {
            let (_, deadline) = entry;
            let delay = deadline.saturating_sub(now_ms);
            min = Some(min.map_or(delay, |m| m.min(delay)));
        }
        min
    }

    /// Number of armed timers
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// True when no timer is armed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TimerList {
    fn default() -> Self {
        Self::new()
    }
}
