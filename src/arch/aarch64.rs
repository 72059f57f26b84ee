// src/arch/aarch64.rs

//! AArch64 support: PL011 serial and wfi-based idle
//!
//! Register addresses match the QEMU virt machine.

use core::arch::asm;

use crate::arch::{ByteSink, Cpu};
use crate::kernel::mmio::MmioReg;

/// PL011 base on the QEMU virt machine
const PL011_BASE: usize = 0x0900_0000;

/// Data register offset
const UART_DR: usize = 0x00;

/// Flag register offset
const UART_FR: usize = 0x18;

/// Flag register bit: transmit FIFO full
const FR_TXFF: u32 = 1 << 5;

/// AArch64 CPU operations
pub struct Armv8Cpu;

impl Cpu for Armv8Cpu {
    fn halt() {
        unsafe { asm!("wfi", options(nomem, nostack)) };
    }

    fn disable_interrupts() {
        unsafe { asm!("msr daifset, #2", options(nomem, nostack)) };
    }

    fn enable_interrupts() {
        unsafe { asm!("msr daifclr, #2", options(nomem, nostack)) };
    }
}

/// Active CPU type for this architecture
pub type BootCpu = Armv8Cpu;

/// PL011 serial transmitter
pub struct SerialBackend {
    dr: MmioReg<u32>,
    fr: MmioReg<u32>,
}

impl SerialBackend {
    /// Backend at the virt machine's PL011 window
    #[must_use]
    pub const fn new() -> Self {
        // Safety: fixed addresses of the virt machine's UART window.
        unsafe {
            Self {
                dr: MmioReg::new_unchecked(PL011_BASE + UART_DR),
                fr: MmioReg::new_unchecked(PL011_BASE + UART_FR),
            }
        }
    }
}

impl Default for SerialBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteSink for SerialBackend {
    fn put_byte(&mut self, byte: u8) {
        // Safety: the PL011 window is identity-mapped and live.
        unsafe {
            while self.fr.read() & FR_TXFF != 0 {
                core::hint::spin_loop();
            }
            self.dr.write(u32::from(byte));
        }
    }
}
