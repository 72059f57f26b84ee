// src/arch/mod.rs

//! Architecture-specific abstractions
//!
//! Each supported architecture provides the same narrow surface: a
//! [`Cpu`] implementation for interrupt masking and idle, and a
//! `SerialBackend` type implementing [`ByteSink`] for the boot console.
//! Everything above this module is architecture-independent.

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "x86_64")]
pub use self::x86_64 as active;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;

#[cfg(target_arch = "aarch64")]
pub use self::aarch64 as active;

#[cfg(target_arch = "arm")]
pub mod arm;

#[cfg(target_arch = "arm")]
pub use self::arm as active;

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub mod riscv;

#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub use self::riscv as active;

/// CPU-specific operations
pub trait Cpu {
    /// Halt until the next interrupt
    fn halt();

    /// Mask interrupts
    fn disable_interrupts();

    /// Unmask interrupts
    fn enable_interrupts();
}

/// Byte-at-a-time output device, the console's hardware seam
pub trait ByteSink {
    /// Emit one byte, blocking until the device accepts it
    fn put_byte(&mut self, byte: u8);
}
