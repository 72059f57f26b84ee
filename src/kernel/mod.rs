// src/kernel/mod.rs

//! Asynchronous work-submission core
//!
//! The kernel is single-threaded: one event loop submits device
//! operations in batches, parks in the platform's wait-for-interrupt
//! call, then drains the completion ring and dispatches events to the
//! owning state machines. Interrupt handlers only push completion
//! entries onto the ring; every other state transition happens here, in
//! loop context.
//!
//! Request slots live in a fixed [`RequestTable`]. Each reserved slot
//! carries an [`Owner`] tag so completions route back to the state
//! machine that issued the request without callbacks or dynamic
//! dispatch.

pub mod block;
pub mod csprng;
pub mod mmio;
pub mod net;
pub mod timer;

use log::{debug, warn};

use crate::abi::ring::CompletionRing;
use crate::abi::work::{
    CompletionEntry, CompletionFlags, OpCode, SlotId, Status, SubmissionBatch, WorkRequest,
};
use crate::constants::{COMPLETION_RING_SIZE, NUM_SLOTS, SUBMIT_QUEUE_DEPTH};
use crate::errors::{KernelResult, WorkError};
use crate::kernel::csprng::CsprngState;
use crate::kernel::net::Protocol;
use crate::kernel::timer::TimerList;
use crate::platform::{Platform, WakeEvent};

/// State machine a reserved slot belongs to
///
/// Completions are routed by this tag alone; the kernel never inspects
/// request payloads on behalf of an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Slot is free
    Unassigned,
    /// Boot-time entropy seed read
    Seed,
    /// Periodic remix interval timer
    RemixTimer,
    /// Entropy fill for a generator remix
    RemixFill,
    /// Block device self-test
    BlockTest,
    /// Standing network receive ring
    NetRx,
    /// Network transmit channel for one protocol
    NetTx(Protocol),
}

/// One request table slot
#[derive(Debug, Clone, Copy)]
pub struct Slot {
    /// The request occupying this slot
    pub request: WorkRequest,
    /// Lifecycle state
    pub status: Status,
    /// Routing tag
    pub owner: Owner,
}

impl Slot {
    const fn free() -> Self {
        Self {
            request: WorkRequest::empty(),
            status: Status::Free,
            owner: Owner::Unassigned,
        }
    }
}

/// Fixed table of request slots
#[derive(Debug)]
pub struct RequestTable {
    slots: [Slot; NUM_SLOTS],
}

impl RequestTable {
    /// Table with every slot free
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [Slot::free(); NUM_SLOTS],
        }
    }

    /// Borrow a slot
    #[must_use]
    pub fn slot(&self, id: SlotId) -> &Slot {
        &self.slots[id.index()]
    }

    /// Mutably borrow a slot
    pub fn slot_mut(&mut self, id: SlotId) -> &mut Slot {
        &mut self.slots[id.index()]
    }

    /// Claim the lowest-numbered free slot for `owner`
    ///
    /// The owner tag doubles as the occupancy marker: a slot is free
    /// only while it is `Unassigned`, so a reserved slot is claimed
    /// exclusively even before its request is submitted.
    pub fn reserve(&mut self, owner: Owner) -> KernelResult<SlotId> {
        debug_assert!(owner != Owner::Unassigned);
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.owner == Owner::Unassigned {
                slot.owner = owner;
                return Ok(SlotId(i as u16));
            }
        }
        Err(WorkError::NoFreeSlot.into())
    }

    /// Return a slot to the free pool
    pub fn release(&mut self, id: SlotId) {
        self.slots[id.index()] = Slot::free();
    }

    /// Number of slots not currently free
    #[must_use]
    pub fn active(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.owner != Owner::Unassigned)
            .count()
    }
}

impl Default for RequestTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-capacity FIFO of slot ids, used for the submit and cancel
/// staging queues
#[derive(Debug)]
pub struct SlotQueue {
    ids: [SlotId; SUBMIT_QUEUE_DEPTH],
    len: usize,
}

impl SlotQueue {
    /// Empty queue
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ids: [SlotId(0); SUBMIT_QUEUE_DEPTH],
            len: 0,
        }
    }

    /// Append a slot id; full queues are backpressure, not faults
    pub fn push(&mut self, id: SlotId) -> KernelResult<()> {
        if self.len == SUBMIT_QUEUE_DEPTH {
            return Err(WorkError::QueueFull.into());
        }
        self.ids[self.len] = id;
        self.len += 1;
        Ok(())
    }

    /// True if `id` is queued
    #[must_use]
    pub fn contains(&self, id: SlotId) -> bool {
        self.ids[..self.len].contains(&id)
    }

    /// Remove `id`, preserving the order of the remaining entries
    pub fn remove(&mut self, id: SlotId) -> bool {
        let Some(pos) = self.ids[..self.len].iter().position(|&s| s == id) else {
            return false;
        };
        self.ids.copy_within(pos + 1..self.len, pos);
        self.len -= 1;
        true
    }

    /// Queued slot ids in insertion order
    #[must_use]
    pub fn as_slice(&self) -> &[SlotId] {
        &self.ids[..self.len]
    }

    /// Drop all queued ids
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Number of queued ids
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for SlotQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// A completion routed to its owning state machine
#[derive(Debug, Clone, Copy)]
pub struct Event {
    /// Slot the completion belongs to
    pub slot: SlotId,
    /// Owner tag recorded at reservation time
    pub owner: Owner,
    /// The raw completion record
    pub completion: CompletionEntry,
}

const EVENT_QUEUE_SIZE: usize = COMPLETION_RING_SIZE;

/// Loop-context FIFO of routed events
#[derive(Debug)]
struct EventQueue {
    events: [Event; EVENT_QUEUE_SIZE],
    head: usize,
    len: usize,
}

impl EventQueue {
    const fn new() -> Self {
        const EMPTY: Event = Event {
            slot: SlotId(0),
            owner: Owner::Unassigned,
            completion: CompletionEntry::zeroed(),
        };
        Self {
            events: [EMPTY; EVENT_QUEUE_SIZE],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, event: Event) -> bool {
        if self.len == EVENT_QUEUE_SIZE {
            return false;
        }
        let idx = (self.head + self.len) % EVENT_QUEUE_SIZE;
        self.events[idx] = event;
        self.len += 1;
        true
    }

    fn pop(&mut self) -> Option<Event> {
        if self.len == 0 {
            return None;
        }
        let event = self.events[self.head];
        self.head = (self.head + 1) % EVENT_QUEUE_SIZE;
        self.len -= 1;
        Some(event)
    }
}

/// The work-submission core
///
/// Owns the platform collaborator, the request table, the staging
/// queues, the timer list, and the CSPRNG. All methods are loop-context
/// only; the single interrupt-facing structure is the completion ring
/// passed to [`Kernel::new`].
pub struct Kernel<P: Platform> {
    platform: P,
    table: RequestTable,
    submit_q: SlotQueue,
    cancel_q: SlotQueue,
    timers: TimerList,
    events: EventQueue,
    ring: &'static CompletionRing,
    rng: Option<CsprngState>,
    now_ms: u64,
    dropped_seen: u32,
}

impl<P: Platform> Kernel<P> {
    /// Create a kernel around a platform and its completion ring
    #[must_use]
    pub fn new(platform: P, ring: &'static CompletionRing) -> Self {
        Self {
            platform,
            table: RequestTable::new(),
            submit_q: SlotQueue::new(),
            cancel_q: SlotQueue::new(),
            timers: TimerList::new(),
            events: EventQueue::new(),
            ring,
            rng: None,
            now_ms: 0,
            dropped_seen: 0,
        }
    }

    /// Claim a free slot for `owner`
    pub fn reserve(&mut self, owner: Owner) -> KernelResult<SlotId> {
        self.table.reserve(owner)
    }

    /// Return a slot to the free pool
    ///
    /// Only valid after a terminal completion (or cancellation) has been
    /// consumed by the owner.
    pub fn release(&mut self, slot: SlotId) {
        debug_assert!(!matches!(
            self.table.slot(slot).status,
            Status::Pending | Status::InFlight
        ));
        self.table.release(slot);
    }

    /// Stage a request for the next submission batch
    ///
    /// The slot must be reserved and idle. The request becomes `Pending`
    /// until [`Kernel::flush`] hands it to the platform (or, for timers,
    /// arms it in the kernel's own timer list).
    pub fn submit(&mut self, slot: SlotId, request: WorkRequest) -> KernelResult<()> {
        {
            let s = self.table.slot(slot);
            if s.owner == Owner::Unassigned {
                return Err(WorkError::InvalidState.into());
            }
            match s.status {
                Status::Free | Status::Complete(_) | Status::Cancelled => {}
                Status::Pending | Status::InFlight => {
                    return Err(WorkError::SlotBusy.into());
                }
            }
        }
        self.submit_q.push(slot)?;
        let s = self.table.slot_mut(slot);
        s.request = request;
        s.status = Status::Pending;
        Ok(())
    }

    /// Stage a cancellation for the next batch
    ///
    /// Cancelling a still-`Pending` request resolves kernel-side before
    /// the platform ever sees it; cancelling an `InFlight` request is
    /// advisory and the operation may still complete normally.
    pub fn cancel(&mut self, slot: SlotId) -> KernelResult<()> {
        match self.table.slot(slot).status {
            Status::Pending | Status::InFlight => {}
            _ => return Err(WorkError::InvalidState.into()),
        }
        if self.cancel_q.contains(slot) {
            return Ok(());
        }
        self.cancel_q.push(slot)
    }

    /// Hand the staged batch to the platform
    ///
    /// Resolution order inside one batch:
    /// 1. A slot in both lists that is still `Pending` is cancelled
    ///    locally and never starts.
    /// 2. Timers are armed in the kernel's timer list, not submitted.
    /// 3. Everything else is marked `InFlight` and handed over in one
    ///    platform call.
    pub fn flush(&mut self) -> KernelResult<()> {
        let mut submissions = [SlotId(0); SUBMIT_QUEUE_DEPTH];
        let mut num_sub = 0usize;
        let mut cancellations = [SlotId(0); SUBMIT_QUEUE_DEPTH];
        let mut num_cancel = 0usize;

        for i in 0..self.cancel_q.len() {
            let slot = self.cancel_q.as_slice()[i];
            if self.table.slot(slot).status == Status::Pending && self.submit_q.contains(slot) {
                // Cancelled before it ever started.
                self.submit_q.remove(slot);
                self.complete_cancelled(slot);
            } else if self.table.slot(slot).status == Status::InFlight {
                if self.table.slot(slot).request.op == OpCode::Timer {
                    // Timers are kernel-owned; disarm directly.
                    self.timers.remove(slot);
                    self.complete_cancelled(slot);
                } else {
                    cancellations[num_cancel] = slot;
                    num_cancel += 1;
                }
            }
        }
        self.cancel_q.clear();

        for i in 0..self.submit_q.len() {
            let slot = self.submit_q.as_slice()[i];
            let s = self.table.slot_mut(slot);
            if s.status != Status::Pending {
                continue;
            }
            s.status = Status::InFlight;
            if s.request.op == OpCode::Timer {
                let deadline = s.request.deadline_ms;
                self.timers.insert(slot, deadline)?;
            } else {
                submissions[num_sub] = slot;
                num_sub += 1;
            }
        }
        self.submit_q.clear();

        let batch = SubmissionBatch {
            submissions: &submissions[..num_sub],
            cancellations: &cancellations[..num_cancel],
        };
        if !batch.is_empty() {
            debug!(
                "flush: {} submissions, {} cancellations",
                num_sub, num_cancel
            );
            self.platform.submit(&mut self.table, batch);
        }
        Ok(())
    }

    fn complete_cancelled(&mut self, slot: SlotId) {
        let s = self.table.slot_mut(slot);
        s.status = Status::Cancelled;
        let owner = s.owner;
        let entry = CompletionEntry {
            slot,
            result: crate::abi::work::ResultCode::Cancelled,
            bytes: 0,
            buffer_index: 0,
            flags: CompletionFlags::empty(),
        };
        self.push_event(Event {
            slot,
            owner,
            completion: entry,
        });
    }

    /// Park until an interrupt fires, a timer is due, or `max_timeout_ms`
    /// elapses
    ///
    /// Updates the kernel clock from the wake event.
    pub fn wait(&mut self, max_timeout_ms: Option<u64>) -> WakeEvent {
        let timer_delay = self.timers.next_delay(self.now_ms);
        let timeout = match (timer_delay, max_timeout_ms) {
            (Some(t), Some(m)) => Some(t.min(m)),
            (Some(t), None) => Some(t),
            (None, m) => m,
        };
        let wake = self.platform.wfi(timeout);
        self.now_ms = wake.now_ms;
        wake
    }

    /// Drain the completion ring and expire due timers
    ///
    /// Call after every wake, before consuming events.
    pub fn tick(&mut self) {
        let dropped = self.ring.dropped();
        if dropped != self.dropped_seen {
            warn!(
                "completion ring overflow: {} entries dropped",
                dropped - self.dropped_seen
            );
            self.dropped_seen = dropped;
        }

        while let Some(entry) = self.ring.pop() {
            self.apply_completion(entry);
        }

        while let Some(slot) = self.timers.take_expired(self.now_ms) {
            let s = self.table.slot_mut(slot);
            s.status = Status::Complete(crate::abi::work::ResultCode::Ok);
            let owner = s.owner;
            self.push_event(Event {
                slot,
                owner,
                completion: CompletionEntry::success(slot, 0),
            });
        }
    }

    fn apply_completion(&mut self, entry: CompletionEntry) {
        let s = self.table.slot_mut(entry.slot);
        if s.status != Status::InFlight {
            // Stale completion for a slot the loop already resolved
            // (for example an advisory cancellation that raced a real
            // completion). Drop it.
            warn!(
                "stale completion for slot {} in state {:?}",
                entry.slot.0, s.status
            );
            return;
        }
        if !entry.flags.contains(CompletionFlags::MORE) {
            s.status = Status::Complete(entry.result);
        }
        let owner = s.owner;
        self.push_event(Event {
            slot: entry.slot,
            owner,
            completion: entry,
        });
    }

    fn push_event(&mut self, event: Event) {
        if !self.events.push(event) {
            warn!("event queue full, dropping event for slot {}", event.slot.0);
        }
    }

    /// Take the next routed event, oldest first
    pub fn take_event(&mut self) -> Option<Event> {
        self.events.pop()
    }

    /// Return ownership of a standing-receive buffer to the device
    pub fn rx_release(&mut self, slot: SlotId, buffer_index: usize) {
        self.platform.rx_release(&self.table, slot, buffer_index);
    }

    /// Delay until the next armed timer deadline
    #[must_use]
    pub fn next_delay(&self) -> Option<u64> {
        self.timers.next_delay(self.now_ms)
    }

    /// Current kernel clock in milliseconds
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Install the seeded generator
    pub fn set_rng(&mut self, rng: CsprngState) {
        self.rng = Some(rng);
    }

    /// Mutable access to the generator, once seeded
    pub fn rng_mut(&mut self) -> Option<&mut CsprngState> {
        self.rng.as_mut()
    }

    /// Borrow the request table
    #[must_use]
    pub fn table(&self) -> &RequestTable {
        &self.table
    }

    /// Borrow the platform collaborator
    #[must_use]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Mutably borrow the platform collaborator
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Completion ring registered with the platform's interrupt lines
    #[must_use]
    pub fn ring(&self) -> &'static CompletionRing {
        self.ring
    }
}
