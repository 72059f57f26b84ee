// src/platform/sim.rs

//! In-memory platform
//!
//! Services every device operation against in-memory state, with the
//! same two-phase shape as a hardware platform: `submit` only records
//! the work, and completions are pushed onto the registered ring during
//! `wfi`, so the kernel's batch/park/drain cycle is exercised end to
//! end.
//!
//! Test hooks: a one-shot failure directive per opcode, frame
//! injection into the receive ring, write tampering for the block
//! self-test's verify stage, and a transmit log.

use log::trace;

use crate::abi::ring::CompletionRing;
use crate::abi::work::{
    BufferDesc, CompletionEntry, OpCode, ResultCode, SlotId, SubmissionBatch, WorkRequest,
};
use crate::constants::{FRAME_SIZE, NET_RX_BUFFERS, NUM_SLOTS, SECTOR_SIZE};
use crate::errors::{KernelResult, PlatformError};
use crate::kernel::RequestTable;
use crate::platform::{BootInfo, Platform, WakeEvent, WakeReason};

/// Simulated disk capacity in sectors
pub const SIM_DISK_SECTORS: usize = 16;

const MAX_IRQS: usize = 8;
const INJECT_CAP: usize = 8;
const TX_LOG_CAP: usize = 8;

#[derive(Clone, Copy)]
struct PendingOp {
    slot: SlotId,
    request: WorkRequest,
    cancelled: bool,
}

#[derive(Clone, Copy)]
struct Frame {
    data: [u8; FRAME_SIZE],
    len: usize,
}

impl Frame {
    const EMPTY: Self = Self {
        data: [0; FRAME_SIZE],
        len: 0,
    };
}

/// In-memory platform for host-side tests
pub struct SimPlatform {
    ring: Option<&'static CompletionRing>,
    irq_registered: [bool; MAX_IRQS],
    irq_enabled: [bool; MAX_IRQS],
    initialized: bool,
    now_ms: u64,

    disk: [[u8; SECTOR_SIZE]; SIM_DISK_SECTORS],
    entropy_state: u64,

    pending: [Option<PendingOp>; NUM_SLOTS],

    rx_slot: Option<SlotId>,
    rx_descs: [BufferDesc; NET_RX_BUFFERS],
    rx_posted: [bool; NET_RX_BUFFERS],
    injected: [Frame; INJECT_CAP],
    num_injected: usize,

    tx_log: [Frame; TX_LOG_CAP],
    num_sent: usize,

    fail_directive: Option<(OpCode, ResultCode, u32)>,
    tamper_after_write: bool,
}

impl SimPlatform {
    /// Platform with a zeroed disk and a fixed entropy seed
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: None,
            irq_registered: [false; MAX_IRQS],
            irq_enabled: [false; MAX_IRQS],
            initialized: false,
            now_ms: 0,
            disk: [[0; SECTOR_SIZE]; SIM_DISK_SECTORS],
            entropy_state: 0x853c_49e6_748f_ea9b,
            pending: [None; NUM_SLOTS],
            rx_slot: None,
            rx_descs: [BufferDesc::EMPTY; NET_RX_BUFFERS],
            rx_posted: [false; NET_RX_BUFFERS],
            injected: [Frame::EMPTY; INJECT_CAP],
            num_injected: 0,
            tx_log: [Frame::EMPTY; TX_LOG_CAP],
            num_sent: 0,
            fail_directive: None,
            tamper_after_write: false,
        }
    }

    /// Fail the next `count` operations with opcode `op`
    pub fn fail_next(&mut self, op: OpCode, result: ResultCode, count: u32) {
        self.fail_directive = Some((op, result, count));
    }

    /// Corrupt the written sector after each block write completes
    pub fn set_tamper_after_write(&mut self, tamper: bool) {
        self.tamper_after_write = tamper;
    }

    /// Queue a frame for delivery into the receive ring on the next wake
    pub fn inject_frame(&mut self, frame: &[u8]) {
        debug_assert!(frame.len() <= FRAME_SIZE);
        debug_assert!(self.num_injected < INJECT_CAP);
        if self.num_injected == INJECT_CAP {
            return;
        }
        let len = frame.len().min(FRAME_SIZE);
        let mut f = Frame::EMPTY;
        f.data[..len].copy_from_slice(&frame[..len]);
        f.len = len;
        self.injected[self.num_injected] = f;
        self.num_injected += 1;
    }

    /// One disk sector
    #[must_use]
    pub fn sector(&self, lba: u64) -> &[u8; SECTOR_SIZE] {
        assert!(
            (lba as usize) < SIM_DISK_SECTORS,
            "lba {} outside the simulated disk",
            lba
        );
        &self.disk[lba as usize]
    }

    /// Mutable access to one disk sector
    pub fn sector_mut(&mut self, lba: u64) -> &mut [u8; SECTOR_SIZE] {
        assert!(
            (lba as usize) < SIM_DISK_SECTORS,
            "lba {} outside the simulated disk",
            lba
        );
        &mut self.disk[lba as usize]
    }

    /// Number of frames sent so far
    #[must_use]
    pub fn tx_sent(&self) -> usize {
        self.num_sent
    }

    /// A sent frame, oldest first
    #[must_use]
    pub fn tx_frame(&self, i: usize) -> &[u8] {
        let f = &self.tx_log[i];
        &f.data[..f.len]
    }

    /// Number of posted receive buffers
    #[must_use]
    pub fn rx_posted_count(&self) -> usize {
        self.rx_posted.iter().filter(|p| **p).count()
    }

    /// True once `irq` has been registered
    #[must_use]
    pub fn irq_registered(&self, irq: u32) -> bool {
        self.irq_registered[irq as usize]
    }

    /// True once `irq` has been armed
    #[must_use]
    pub fn irq_enabled(&self, irq: u32) -> bool {
        self.irq_enabled[irq as usize]
    }

    fn next_entropy_byte(&mut self) -> u8 {
        self.entropy_state = self
            .entropy_state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.entropy_state >> 33) as u8
    }

    fn should_fail(&mut self, op: OpCode) -> Option<ResultCode> {
        let (fail_op, result, count) = self.fail_directive?;
        if fail_op != op || count == 0 {
            return None;
        }
        self.fail_directive = if count > 1 {
            Some((fail_op, result, count - 1))
        } else {
            None
        };
        Some(result)
    }

    /// Fill a descriptor's memory from a byte source.
    ///
    /// Safety: descriptors handed to `submit` cover buffers owned by
    /// requests the kernel keeps in flight, so the memory is live and
    /// exclusively device-owned for the duration of the operation.
    unsafe fn desc_slice(desc: BufferDesc) -> &'static mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(desc.addr as *mut u8, desc.len as usize) }
    }

    fn service(&mut self, op: PendingOp) -> CompletionEntry {
        if op.cancelled {
            return CompletionEntry::failure(op.slot, ResultCode::Cancelled);
        }
        if let Some(result) = self.should_fail(op.request.op) {
            return CompletionEntry::failure(op.slot, result);
        }

        match op.request.op {
            OpCode::RngFill => {
                let mut total = 0u32;
                for &desc in op.request.buffers() {
                    // Safety: see desc_slice.
                    let buf = unsafe { Self::desc_slice(desc) };
                    for byte in buf.iter_mut() {
                        *byte = self.next_entropy_byte();
                    }
                    total += desc.len;
                }
                CompletionEntry::success(op.slot, total)
            }
            OpCode::BlockRead | OpCode::BlockVerify => {
                let lba = op.request.lba as usize;
                if lba >= SIM_DISK_SECTORS {
                    return CompletionEntry::failure(op.slot, ResultCode::InvalidRequest);
                }
                let desc = op.request.buffers()[0];
                // Safety: see desc_slice.
                let buf = unsafe { Self::desc_slice(desc) };
                let len = (desc.len as usize).min(SECTOR_SIZE);
                buf[..len].copy_from_slice(&self.disk[lba][..len]);
                CompletionEntry::success(op.slot, len as u32)
            }
            OpCode::BlockWrite => {
                let lba = op.request.lba as usize;
                if lba >= SIM_DISK_SECTORS {
                    return CompletionEntry::failure(op.slot, ResultCode::InvalidRequest);
                }
                let desc = op.request.buffers()[0];
                // Safety: see desc_slice.
                let buf = unsafe { Self::desc_slice(desc) };
                let len = (desc.len as usize).min(SECTOR_SIZE);
                self.disk[lba][..len].copy_from_slice(&buf[..len]);
                if self.tamper_after_write {
                    self.disk[lba][0] ^= 0xFF;
                }
                CompletionEntry::success(op.slot, len as u32)
            }
            OpCode::NetSend => {
                let desc = op.request.buffers()[0];
                // Safety: see desc_slice.
                let buf = unsafe { Self::desc_slice(desc) };
                if self.num_sent < TX_LOG_CAP {
                    let len = buf.len().min(FRAME_SIZE);
                    self.tx_log[self.num_sent].data[..len].copy_from_slice(&buf[..len]);
                    self.tx_log[self.num_sent].len = len;
                }
                self.num_sent += 1;
                CompletionEntry::success(op.slot, buf.len() as u32)
            }
            // Standing receives park; delivery happens from the inject
            // queue, not here. Anything else is malformed.
            OpCode::NetRecv | OpCode::Nop | OpCode::Timer => {
                CompletionEntry::failure(op.slot, ResultCode::InvalidRequest)
            }
        }
    }

    fn deliver_injected(&mut self) -> usize {
        let Some(rx_slot) = self.rx_slot else {
            return 0;
        };
        let Some(ring) = self.ring else {
            return 0;
        };
        let mut delivered = 0;
        while delivered < self.num_injected {
            let Some(idx) = self.rx_posted.iter().position(|p| *p) else {
                break;
            };
            let frame = self.injected[delivered];
            let desc = self.rx_descs[idx];
            let len = frame.len.min(desc.len as usize);
            // Safety: see desc_slice.
            let buf = unsafe { Self::desc_slice(desc) };
            buf[..len].copy_from_slice(&frame.data[..len]);
            self.rx_posted[idx] = false;
            ring.push(CompletionEntry::rx_buffer(rx_slot, idx as u8, len as u32));
            delivered += 1;
        }
        // Keep undelivered frames for the next wake.
        self.injected.copy_within(delivered..self.num_injected, 0);
        self.num_injected -= delivered;
        delivered
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SimPlatform {
    fn init(&mut self, _boot: &BootInfo<'_>) -> KernelResult<()> {
        self.initialized = true;
        Ok(())
    }

    fn submit(&mut self, table: &mut RequestTable, batch: SubmissionBatch<'_>) {
        for &slot in batch.submissions {
            let request = table.slot(slot).request;
            if request.op == OpCode::NetRecv {
                // The standing receive parks until frames arrive.
                self.rx_slot = Some(slot);
                for (i, &desc) in request.buffers().iter().enumerate() {
                    self.rx_descs[i] = desc;
                    self.rx_posted[i] = true;
                }
                continue;
            }
            self.pending[slot.index()] = Some(PendingOp {
                slot,
                request,
                cancelled: false,
            });
        }
        for &slot in batch.cancellations {
            // Advisory: only honored while the operation is still queued.
            if let Some(op) = self.pending[slot.index()].as_mut() {
                op.cancelled = true;
            }
        }
    }

    fn rx_release(&mut self, _table: &RequestTable, slot: SlotId, buffer_index: usize) {
        debug_assert_eq!(self.rx_slot, Some(slot));
        if buffer_index < NET_RX_BUFFERS {
            self.rx_posted[buffer_index] = true;
        }
    }

    fn wfi(&mut self, timeout_ms: Option<u64>) -> WakeEvent {
        let mut serviced = 0;
        for i in 0..NUM_SLOTS {
            if let Some(op) = self.pending[i].take() {
                let entry = self.service(op);
                if let Some(ring) = self.ring {
                    ring.push(entry);
                }
                serviced += 1;
            }
        }
        serviced += self.deliver_injected();
        trace!("sim wake: {} completions", serviced);

        if serviced > 0 {
            self.now_ms += 1;
            WakeEvent {
                now_ms: self.now_ms,
                reason: WakeReason::Interrupt,
            }
        } else {
            self.now_ms += timeout_ms.unwrap_or(1);
            WakeEvent {
                now_ms: self.now_ms,
                reason: WakeReason::Timeout,
            }
        }
    }

    fn irq_register(&mut self, irq: u32, ring: &'static CompletionRing) -> KernelResult<()> {
        if irq as usize >= MAX_IRQS {
            return Err(PlatformError::IrqUnavailable.into());
        }
        self.ring = Some(ring);
        self.irq_registered[irq as usize] = true;
        Ok(())
    }

    fn irq_enable(&mut self, irq: u32) {
        if (irq as usize) < MAX_IRQS {
            self.irq_enabled[irq as usize] = true;
        }
    }
}
