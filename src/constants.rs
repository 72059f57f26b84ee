// src/constants.rs

//! Kernel constants and configuration values
//!
//! This module centralizes the compile-time sizing of every arena in the
//! kernel: request slots, completion ring, timer list, and the fixed
//! device buffers. Nothing here is tunable at runtime: a freestanding
//! target has no allocator, so capacity is a build-time decision.

use crate::abi::work::DeviceId;

/// Number of request slots in the [`RequestTable`](crate::kernel::RequestTable).
///
/// Every outstanding device operation occupies one slot. The demo
/// configuration needs 8 (seed, remix timer, remix fill, block test,
/// net rx, three tx channels); 16 leaves headroom.
pub const NUM_SLOTS: usize = 16;

/// Completion ring capacity (must be a power of 2).
///
/// Sized so a full table of in-flight requests plus a burst of rx
/// completions cannot overflow the ring within one loop iteration.
pub const COMPLETION_RING_SIZE: usize = 64;

/// Maximum buffer descriptors attached to one request.
///
/// The receive ring posts all of its buffers in a single request, so this
/// must be at least [`NET_RX_BUFFERS`].
pub const MAX_BUFS_PER_REQUEST: usize = 4;

/// Depth of the per-tick submit and cancel queues.
pub const SUBMIT_QUEUE_DEPTH: usize = NUM_SLOTS;

/// Active timer capacity.
pub const MAX_TIMERS: usize = 8;

/// Block device sector buffer size in bytes.
pub const SECTOR_SIZE: usize = 4096;

/// Alignment required for block device DMA buffers.
pub const SECTOR_ALIGN: usize = 512;

/// Ethernet frame buffer size (1500 MTU + 14-byte header).
pub const FRAME_SIZE: usize = 1514;

/// Alignment required for network DMA buffers.
pub const FRAME_ALIGN: usize = 64;

/// Number of buffers in the network receive ring.
pub const NET_RX_BUFFERS: usize = 4;

/// Bytes of device entropy requested for the initial CSPRNG seed.
pub const SEED_LEN: usize = 64;

/// Bytes of device entropy mixed in on each periodic re-seed.
pub const REMIX_LEN: usize = 32;

/// Interval between periodic CSPRNG entropy re-mixes.
pub const REMIX_INTERVAL_MS: u64 = 60_000;

/// Step timeout for the bounded boot-time seed wait.
pub const SEED_WAIT_STEP_MS: u64 = 10;

/// Maximum time to wait for seed entropy before falling back.
pub const SEED_WAIT_MAX_MS: u64 = 1_000;

/// Logical device identifiers used by the demo configuration.
pub const DEV_RNG: DeviceId = DeviceId(0);
/// Block storage device.
pub const DEV_BLOCK: DeviceId = DeviceId(1);
/// Network device.
pub const DEV_NET: DeviceId = DeviceId(2);

/// IRQ line assignments (platform-relative).
pub const IRQ_RNG: u32 = 1;
/// Block device interrupt line.
pub const IRQ_BLOCK: u32 = 2;
/// Network device interrupt line.
pub const IRQ_NET: u32 = 3;
