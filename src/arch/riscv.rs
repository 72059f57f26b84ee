// src/arch/riscv.rs

//! RISC-V support: ns16550a serial and wfi-based idle
//!
//! Register addresses match the QEMU virt machine.

use core::arch::asm;

use crate::arch::{ByteSink, Cpu};
use crate::kernel::mmio::MmioReg;

/// ns16550a base on the QEMU virt machine
const UART_BASE: usize = 0x1000_0000;

/// Transmit holding register offset
const UART_THR: usize = 0x00;

/// Line status register offset
const UART_LSR: usize = 0x05;

/// Line status bit: transmit holding register empty
const LSR_THRE: u8 = 1 << 5;

/// RISC-V CPU operations
pub struct RiscvCpu;

impl Cpu for RiscvCpu {
    fn halt() {
        unsafe { asm!("wfi", options(nomem, nostack)) };
    }

    fn disable_interrupts() {
        unsafe { asm!("csrci mstatus, 8", options(nomem, nostack)) };
    }

    fn enable_interrupts() {
        unsafe { asm!("csrsi mstatus, 8", options(nomem, nostack)) };
    }
}

/// Active CPU type for this architecture
pub type BootCpu = RiscvCpu;

/// ns16550a serial transmitter
pub struct SerialBackend {
    thr: MmioReg<u8>,
    lsr: MmioReg<u8>,
}

impl SerialBackend {
    /// Backend at the virt machine's UART window
    #[must_use]
    pub const fn new() -> Self {
        // Safety: fixed addresses of the virt machine's UART window.
        unsafe {
            Self {
                thr: MmioReg::new_unchecked(UART_BASE + UART_THR),
                lsr: MmioReg::new_unchecked(UART_BASE + UART_LSR),
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
        // Safety: the UART window is identity-mapped and live.
        unsafe {
            while self.lsr.read() & LSR_THRE == 0 {
                core::hint::spin_loop();
            }
            self.thr.write(byte);
        }
    }
}
