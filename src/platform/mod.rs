// src/platform/mod.rs

//! Platform collaborator contract
//!
//! The kernel core is platform-agnostic: everything hardware-specific
//! (transport registers, interrupt controllers, timers) lives behind the
//! [`Platform`] trait. The core consumes exactly four things from it
//! (batch submission, the wait-for-interrupt suspension primitive, IRQ
//! registration, and the receive-buffer release hook) plus one-time
//! initialization from the boot tables.
//!
//! Boot-time device tree parsing is an external collaborator: it
//! produces the memory-region and device-address tables in [`BootInfo`];
//! the core only consumes the resulting addresses and never parses the
//! format itself.

pub mod sim;

use crate::abi::ring::CompletionRing;
use crate::abi::work::{SlotId, SubmissionBatch};
use crate::errors::KernelResult;
use crate::kernel::RequestTable;

/// One usable RAM region reported by the boot collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    /// Physical base address
    pub base: u64,
    /// Region size in bytes
    pub size: u64,
}

/// One discovered device: MMIO window plus interrupt line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceNode {
    /// MMIO register window base
    pub mmio_base: u64,
    /// MMIO window size in bytes
    pub mmio_size: u64,
    /// Interrupt line for this device
    pub irq: u32,
}

/// Boot tables produced by the device-discovery collaborator
#[derive(Debug, Clone, Copy)]
pub struct BootInfo<'a> {
    /// Usable memory regions
    pub memory: &'a [MemoryRegion],
    /// Discovered devices
    pub devices: &'a [DeviceNode],
}

impl BootInfo<'_> {
    /// Boot info with no discovered regions or devices
    #[must_use]
    pub const fn empty() -> Self {
        BootInfo {
            memory: &[],
            devices: &[],
        }
    }
}

/// Why a wait-for-interrupt call returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// A hardware interrupt fired
    Interrupt,
    /// The timeout elapsed without a relevant interrupt
    Timeout,
}

/// Result of a wait-for-interrupt call
#[derive(Debug, Clone, Copy)]
pub struct WakeEvent {
    /// Monotonic time after waking, in milliseconds
    pub now_ms: u64,
    /// Wake cause
    pub reason: WakeReason,
}

/// The collaborator contract consumed by the kernel core
///
/// All methods except interrupt delivery are loop-context only. The
/// platform signals completions exclusively by pushing entries onto the
/// registered [`CompletionRing`] from its interrupt handlers.
pub trait Platform {
    /// One-time setup; called once before any submission.
    fn init(&mut self, boot: &BootInfo<'_>) -> KernelResult<()>;

    /// Process a submission batch.
    ///
    /// Every entry in `batch.submissions` has already been marked
    /// `InFlight` by the kernel. Cancellations are advisory: an
    /// operation the hardware has begun completes normally and the
    /// cancellation is a no-op.
    fn submit(&mut self, table: &mut RequestTable, batch: SubmissionBatch<'_>);

    /// Return ownership of one receive-ring buffer to the device.
    ///
    /// Called for standing receive requests after the kernel has
    /// consumed the buffer's contents; the descriptor at
    /// `buffer_index` becomes device-owned again.
    fn rx_release(&mut self, table: &RequestTable, slot: SlotId, buffer_index: usize);

    /// Park until an interrupt fires or the timeout elapses.
    ///
    /// `None` waits indefinitely; `Some(0)` polls and returns
    /// immediately when no interrupt is pending. The sole suspension
    /// point of the event loop.
    fn wfi(&mut self, timeout_ms: Option<u64>) -> WakeEvent;

    /// Register the completion ring as the target of an interrupt line.
    ///
    /// Fails with `PlatformError::IrqUnavailable` if the line cannot be
    /// claimed.
    fn irq_register(&mut self, irq: u32, ring: &'static CompletionRing) -> KernelResult<()>;

    /// Arm a previously registered interrupt line.
    fn irq_enable(&mut self, irq: u32);
}
