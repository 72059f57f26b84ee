// src/abi/mod.rs

//! Shared data structures for asynchronous device I/O
//!
//! Everything the kernel event loop, the device state machines, and the
//! platform's interrupt handlers exchange lives here: request records,
//! completion records, and the lock-free handler-to-loop ring.

pub mod ring;
pub mod work;

pub use ring::CompletionRing;
pub use work::{
    BufferDesc, CompletionEntry, CompletionFlags, DeviceId, FrameBuf, OpCode, RequestFlags,
    ResultCode, SectorBuf, SlotId, Status, SubmissionBatch, WorkRequest,
};
