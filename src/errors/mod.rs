// src/errors/mod.rs

//! Unified error types for the kernel
//!
//! This module provides a consistent error handling approach across all
//! kernel subsystems: a single [`KernelError`] carrying an [`ErrorKind`]
//! plus optional static context for diagnostics.

use core::fmt;

/// Kernel Result type
pub type KernelResult<T> = Result<T, KernelError>;

/// Kernel error with optional context information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelError {
    kind: ErrorKind,
    context: Option<&'static str>,
}

impl KernelError {
    /// Create a new error
    #[inline]
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, context: None }
    }

    /// Create an error with context information
    #[inline]
    pub const fn with_context(kind: ErrorKind, ctx: &'static str) -> Self {
        Self { kind, context: Some(ctx) }
    }

    /// Get the error kind
    #[inline]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Get the context string, if any
    #[inline]
    pub const fn context(&self) -> Option<&'static str> {
        self.context
    }

    /// Check whether this is a backpressure condition rather than a fault
    ///
    /// Queue-full, table-full, and channel-busy conditions are deferred
    /// to the next loop iteration, never reported as failures.
    #[inline]
    pub const fn is_backpressure(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::Work(WorkError::QueueFull)
                | ErrorKind::Work(WorkError::NoFreeSlot)
                | ErrorKind::Net(NetError::ChannelBusy)
        )
    }
}

/// Error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Work queue error
    Work(WorkError),
    /// Device error
    Device(DeviceError),
    /// Network error
    Net(NetError),
    /// Platform collaborator error
    Platform(PlatformError),
    /// Memory access error
    Memory(MemoryError),
    /// Invalid argument
    InvalidArgument,
}

/// Work queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkError {
    /// Slot already has a request in flight
    SlotBusy,
    /// Submit or cancel queue is full (backpressure)
    QueueFull,
    /// Operation not valid for the slot's current state
    InvalidState,
    /// No free slot in the request table
    NoFreeSlot,
    /// Timer list is full
    TimerListFull,
}

/// Device errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    /// I/O error reported by the device
    IoError,
    /// Device not present
    NotFound,
    /// Device did not respond in time
    Timeout,
}

/// Network errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// Send channel has a transmission in flight (backpressure)
    ChannelBusy,
    /// Frame exceeds the transmit buffer
    FrameTooLarge,
    /// Completion referenced a buffer the kernel already owns
    BufferNotPosted,
}

/// Platform collaborator errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    /// Interrupt line unavailable
    IrqUnavailable,
    /// Platform used before init
    NotInitialized,
    /// Platform initialization failed
    InitFailed,
}

/// Memory access errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// Invalid address (null or below the MMIO floor)
    InvalidAddress,
    /// Alignment violation
    MisalignedAccess,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Work(e) => write!(f, "Work error: {:?}", e)?,
            ErrorKind::Device(e) => write!(f, "Device error: {:?}", e)?,
            ErrorKind::Net(e) => write!(f, "Net error: {:?}", e)?,
            ErrorKind::Platform(e) => write!(f, "Platform error: {:?}", e)?,
            ErrorKind::Memory(e) => write!(f, "Memory error: {:?}", e)?,
            ErrorKind::InvalidArgument => write!(f, "Invalid argument")?,
        }

        if let Some(ctx) = self.context {
            write!(f, " (context: {})", ctx)?;
        }

        Ok(())
    }
}

impl From<WorkError> for KernelError {
    #[inline]
    fn from(e: WorkError) -> Self {
        KernelError::new(ErrorKind::Work(e))
    }
}

impl From<DeviceError> for KernelError {
    #[inline]
    fn from(e: DeviceError) -> Self {
        KernelError::new(ErrorKind::Device(e))
    }
}

impl From<NetError> for KernelError {
    #[inline]
    fn from(e: NetError) -> Self {
        KernelError::new(ErrorKind::Net(e))
    }
}

impl From<PlatformError> for KernelError {
    #[inline]
    fn from(e: PlatformError) -> Self {
        KernelError::new(ErrorKind::Platform(e))
    }
}

impl From<MemoryError> for KernelError {
    #[inline]
    fn from(e: MemoryError) -> Self {
        KernelError::new(ErrorKind::Memory(e))
    }
}
