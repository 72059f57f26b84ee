// src/abi/work.rs

//! Work request and completion definitions
//!
//! A [`WorkRequest`] describes one asynchronous device operation. The
//! kernel owns the request slot for its entire lifetime; the platform
//! borrows it only while the operation is in flight and communicates the
//! outcome through a [`CompletionEntry`] pushed onto the completion ring.
//!
//! # State machine
//!
//! ```text
//! Pending ──platform_submit──► InFlight ──interrupt──► Complete(result)
//!    │                            │
//!    └──cancelled-before-start────┴──(advisory only)─► Cancelled
//! ```
//!
//! A request named in both the submission and cancellation lists of the
//! same batch is resolved before the platform sees it: still-`Pending`
//! entries go straight to `Cancelled` and never start. Cancellation of an
//! `InFlight` request is advisory; the platform completes it normally.

use bitflags::bitflags;

use crate::constants::{FRAME_SIZE, MAX_BUFS_PER_REQUEST, SECTOR_SIZE};

/// I/O operation codes
///
/// Timers are serviced by the kernel itself and never reach the platform.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    /// No operation (unreserved slot placeholder)
    Nop = 0,
    /// Timer expiration
    Timer = 1,
    /// Fill buffers with hardware entropy
    RngFill = 2,
    /// Block device read
    BlockRead = 3,
    /// Block device write
    BlockWrite = 4,
    /// Block device read-back for verification
    BlockVerify = 5,
    /// Network packet receive (multi-buffer, standing)
    NetRecv = 6,
    /// Network packet send
    NetSend = 7,
}

impl OpCode {
    /// Convert from raw u8 value
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Nop),
            1 => Some(Self::Timer),
            2 => Some(Self::RngFill),
            3 => Some(Self::BlockRead),
            4 => Some(Self::BlockWrite),
            5 => Some(Self::BlockVerify),
            6 => Some(Self::NetRecv),
            7 => Some(Self::NetSend),
            _ => None,
        }
    }

    /// True for operations executed by the platform (everything but
    /// `Nop` and `Timer`).
    #[must_use]
    pub const fn is_device_op(self) -> bool {
        !matches!(self, Self::Nop | Self::Timer)
    }
}

/// Result of a completed operation
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// Success
    Ok = 0,
    /// Transient I/O error (retryable)
    IoError = 1,
    /// Device not present
    NoDevice = 2,
    /// Operation was cancelled before it started
    Cancelled = 3,
    /// Device did not respond in time
    Timeout = 4,
    /// Request was malformed
    InvalidRequest = 5,
}

impl ResultCode {
    /// Convert from raw u8 value
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::IoError),
            2 => Some(Self::NoDevice),
            3 => Some(Self::Cancelled),
            4 => Some(Self::Timeout),
            5 => Some(Self::InvalidRequest),
            _ => None,
        }
    }

    /// Success check
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }

    /// True if the failure may succeed on a retry of the same operation
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::IoError | Self::Timeout)
    }
}

/// Request slot state
///
/// Written only by loop-context code. Interrupt handlers never touch
/// slot state directly; they publish a [`CompletionEntry`] through the
/// ring and the loop applies it after the wait-for-interrupt returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Slot holds no request
    Free,
    /// Queued for the next submission batch
    Pending,
    /// Handed to the platform (or armed, for timers)
    InFlight,
    /// Finished with the given result
    Complete(ResultCode),
    /// Cancelled before it started
    Cancelled,
}

bitflags! {
    /// Per-request behavior flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RequestFlags: u8 {
        /// Request remains in flight after each completion (receive ring)
        const STANDING = 1 << 0;
    }
}

bitflags! {
    /// Per-completion flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CompletionFlags: u8 {
        /// More completions will follow for this request (standing work)
        const MORE = 1 << 0;
        /// `buffer_index` identifies which posted buffer completed
        const BUFFER = 1 << 1;
    }
}

/// Index of a request slot in the request table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(pub u16);

impl SlotId {
    /// Slot index as usize
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Logical device identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceId(pub u8);

/// One DMA buffer: raw address plus length
///
/// Descriptors are only ever built from the aligned buffer wrapper types
/// ([`SectorBuf`], [`FrameBuf`]) or kernel-owned byte arrays, so the
/// device alignment preconditions hold by construction. The platform may
/// dereference the address only while the owning request is `InFlight`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    /// Physical-contiguous buffer address
    pub addr: usize,
    /// Buffer length in bytes
    pub len: u32,
}

impl BufferDesc {
    /// Descriptor for an unused buffer position
    pub const EMPTY: Self = Self { addr: 0, len: 0 };

    /// Build a descriptor covering an owned byte slice
    #[inline]
    #[must_use]
    pub fn from_slice(buf: &mut [u8]) -> Self {
        Self {
            addr: buf.as_mut_ptr() as usize,
            len: buf.len() as u32,
        }
    }

    /// True if this position carries no buffer
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Block-device-aligned sector buffer
#[repr(C, align(512))]
pub struct SectorBuf(pub [u8; SECTOR_SIZE]);

impl SectorBuf {
    /// Zero-filled sector buffer
    #[must_use]
    pub const fn new() -> Self {
        Self([0; SECTOR_SIZE])
    }

    /// Descriptor covering the whole sector
    #[inline]
    #[must_use]
    pub fn desc(&mut self) -> BufferDesc {
        BufferDesc::from_slice(&mut self.0)
    }
}

impl Default for SectorBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for SectorBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SectorBuf({} bytes)", SECTOR_SIZE)
    }
}

/// DMA-aligned Ethernet frame buffer
#[repr(C, align(64))]
pub struct FrameBuf(pub [u8; FRAME_SIZE]);

impl FrameBuf {
    /// Zero-filled frame buffer
    #[must_use]
    pub const fn new() -> Self {
        Self([0; FRAME_SIZE])
    }

    /// Descriptor covering the whole frame buffer
    #[inline]
    #[must_use]
    pub fn desc(&mut self) -> BufferDesc {
        BufferDesc::from_slice(&mut self.0)
    }

    /// Descriptor covering only the first `len` bytes
    #[inline]
    #[must_use]
    pub fn desc_prefix(&mut self, len: usize) -> BufferDesc {
        BufferDesc::from_slice(&mut self.0[..len])
    }
}

impl Default for FrameBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for FrameBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "FrameBuf({} bytes)", FRAME_SIZE)
    }
}

/// One asynchronous device operation
///
/// Exclusively owned by the issuing device state machine via its table
/// slot; the platform must never retain a reference past completion or
/// cancellation.
#[derive(Debug, Clone, Copy)]
pub struct WorkRequest {
    /// Operation class
    pub op: OpCode,
    /// Target device
    pub device: DeviceId,
    /// Behavior flags
    pub flags: RequestFlags,
    /// Buffer descriptors (first `num_bufs` are valid)
    pub bufs: [BufferDesc; MAX_BUFS_PER_REQUEST],
    /// Number of valid buffer descriptors
    pub num_bufs: u8,
    /// Logical block address (block operations only)
    pub lba: u64,
    /// Absolute deadline in ms (timer operations only)
    pub deadline_ms: u64,
}

impl WorkRequest {
    /// Placeholder request for an unreserved slot
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            op: OpCode::Nop,
            device: DeviceId(0),
            flags: RequestFlags::empty(),
            bufs: [BufferDesc::EMPTY; MAX_BUFS_PER_REQUEST],
            num_bufs: 0,
            lba: 0,
            deadline_ms: 0,
        }
    }

    const fn single_buf(op: OpCode, device: DeviceId, buf: BufferDesc) -> Self {
        let mut bufs = [BufferDesc::EMPTY; MAX_BUFS_PER_REQUEST];
        bufs[0] = buf;
        Self {
            op,
            device,
            flags: RequestFlags::empty(),
            bufs,
            num_bufs: 1,
            lba: 0,
            deadline_ms: 0,
        }
    }

    /// Create an entropy-fill request
    #[must_use]
    pub const fn rng_fill(device: DeviceId, buf: BufferDesc) -> Self {
        Self::single_buf(OpCode::RngFill, device, buf)
    }

    /// Create a block read request
    #[must_use]
    pub const fn block_read(device: DeviceId, lba: u64, buf: BufferDesc) -> Self {
        let mut req = Self::single_buf(OpCode::BlockRead, device, buf);
        req.lba = lba;
        req
    }

    /// Create a block write request
    #[must_use]
    pub const fn block_write(device: DeviceId, lba: u64, buf: BufferDesc) -> Self {
        let mut req = Self::single_buf(OpCode::BlockWrite, device, buf);
        req.lba = lba;
        req
    }

    /// Create a block verification read-back request
    #[must_use]
    pub const fn block_verify(device: DeviceId, lba: u64, buf: BufferDesc) -> Self {
        let mut req = Self::single_buf(OpCode::BlockVerify, device, buf);
        req.lba = lba;
        req
    }

    /// Create a standing multi-buffer receive request
    #[must_use]
    pub fn net_recv(device: DeviceId, bufs: &[BufferDesc]) -> Self {
        debug_assert!(bufs.len() <= MAX_BUFS_PER_REQUEST);
        let mut all = [BufferDesc::EMPTY; MAX_BUFS_PER_REQUEST];
        let n = bufs.len().min(MAX_BUFS_PER_REQUEST);
        all[..n].copy_from_slice(&bufs[..n]);
        Self {
            op: OpCode::NetRecv,
            device,
            flags: RequestFlags::STANDING,
            bufs: all,
            num_bufs: n as u8,
            lba: 0,
            deadline_ms: 0,
        }
    }

    /// Create a packet send request
    #[must_use]
    pub const fn net_send(device: DeviceId, buf: BufferDesc) -> Self {
        Self::single_buf(OpCode::NetSend, device, buf)
    }

    /// Create a timer request with an absolute deadline
    #[must_use]
    pub const fn timer(deadline_ms: u64) -> Self {
        Self {
            op: OpCode::Timer,
            device: DeviceId(0),
            flags: RequestFlags::empty(),
            bufs: [BufferDesc::EMPTY; MAX_BUFS_PER_REQUEST],
            num_bufs: 0,
            lba: 0,
            deadline_ms,
        }
    }

    /// Valid buffer descriptors
    #[inline]
    #[must_use]
    pub fn buffers(&self) -> &[BufferDesc] {
        &self.bufs[..self.num_bufs as usize]
    }
}

impl Default for WorkRequest {
    fn default() -> Self {
        Self::empty()
    }
}

/// Result record produced by an interrupt handler
///
/// The handler fills every field and pushes the entry onto the
/// completion ring; the event loop reads it after the suspension point
/// returns. Handlers do nothing else: no buffer reclamation, no
/// protocol work, no resubmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEntry {
    /// Slot of the request this completion belongs to
    pub slot: SlotId,
    /// Outcome
    pub result: ResultCode,
    /// Bytes transferred
    pub bytes: u32,
    /// Which posted buffer completed (with `CompletionFlags::BUFFER`)
    pub buffer_index: u8,
    /// Completion flags
    pub flags: CompletionFlags,
}

impl CompletionEntry {
    /// Zeroed placeholder entry
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            slot: SlotId(0),
            result: ResultCode::Ok,
            bytes: 0,
            buffer_index: 0,
            flags: CompletionFlags::empty(),
        }
    }

    /// Create a success completion
    #[must_use]
    pub const fn success(slot: SlotId, bytes: u32) -> Self {
        Self {
            slot,
            result: ResultCode::Ok,
            bytes,
            buffer_index: 0,
            flags: CompletionFlags::empty(),
        }
    }

    /// Create a failure completion
    #[must_use]
    pub const fn failure(slot: SlotId, result: ResultCode) -> Self {
        Self {
            slot,
            result,
            bytes: 0,
            buffer_index: 0,
            flags: CompletionFlags::empty(),
        }
    }

    /// Create a per-buffer completion for a standing receive request
    #[must_use]
    pub const fn rx_buffer(slot: SlotId, buffer_index: u8, bytes: u32) -> Self {
        Self {
            slot,
            result: ResultCode::Ok,
            bytes,
            buffer_index,
            flags: CompletionFlags::MORE.union(CompletionFlags::BUFFER),
        }
    }
}

/// The paired (new submissions, cancellations) lists handed to the
/// platform in one call
#[derive(Debug, Clone, Copy)]
pub struct SubmissionBatch<'a> {
    /// Requests to start, already marked `InFlight`
    pub submissions: &'a [SlotId],
    /// Advisory cancellations for in-flight requests
    pub cancellations: &'a [SlotId],
}

impl SubmissionBatch<'_> {
    /// True when there is nothing to hand over
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.submissions.is_empty() && self.cancellations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for raw in 0..=7u8 {
            let op = OpCode::from_u8(raw).unwrap();
            assert_eq!(op as u8, raw);
        }
        assert_eq!(OpCode::from_u8(8), None);
        assert_eq!(OpCode::from_u8(255), None);
    }

    #[test]
    fn test_result_code_classification() {
        assert!(ResultCode::Ok.is_ok());
        assert!(ResultCode::IoError.is_transient());
        assert!(ResultCode::Timeout.is_transient());
        assert!(!ResultCode::NoDevice.is_transient());
        assert!(!ResultCode::Cancelled.is_transient());
    }

    #[test]
    fn test_block_request_builders() {
        let mut sector = SectorBuf::new();
        let req = WorkRequest::block_write(DeviceId(1), 7, sector.desc());
        assert_eq!(req.op, OpCode::BlockWrite);
        assert_eq!(req.lba, 7);
        assert_eq!(req.buffers().len(), 1);
        assert_eq!(req.buffers()[0].len as usize, SECTOR_SIZE);
        assert_eq!(req.buffers()[0].addr % 512, 0);
    }

    #[test]
    fn test_net_recv_builder_is_standing() {
        let mut bufs = [FrameBuf::new(), FrameBuf::new(), FrameBuf::new(), FrameBuf::new()];
        let descs = [
            bufs[0].desc(),
            bufs[1].desc(),
            bufs[2].desc(),
            bufs[3].desc(),
        ];
        let req = WorkRequest::net_recv(DeviceId(2), &descs);
        assert!(req.flags.contains(RequestFlags::STANDING));
        assert_eq!(req.buffers().len(), 4);
        for d in req.buffers() {
            assert_eq!(d.addr % 64, 0);
        }
    }

    #[test]
    fn test_rx_buffer_completion_flags() {
        let e = CompletionEntry::rx_buffer(SlotId(3), 2, 60);
        assert!(e.flags.contains(CompletionFlags::MORE));
        assert!(e.flags.contains(CompletionFlags::BUFFER));
        assert_eq!(e.buffer_index, 2);
        assert_eq!(e.bytes, 60);
    }
}
