// src/arch/x86_64.rs

//! x86_64 support: port-I/O serial and hlt-based idle

use x86_64::instructions::port::Port;
use x86_64::instructions::{hlt, interrupts};

use crate::arch::{ByteSink, Cpu};

/// Standard COM1 base port
const COM1_BASE: u16 = 0x3F8;

/// Line status register bit: transmit holding register empty
const LSR_THRE: u8 = 1 << 5;

/// x86_64 CPU operations
pub struct X86Cpu;

impl Cpu for X86Cpu {
    fn halt() {
        hlt();
    }

    fn disable_interrupts() {
        interrupts::disable();
    }

    fn enable_interrupts() {
        interrupts::enable();
    }
}

/// Active CPU type for this architecture
pub type BootCpu = X86Cpu;

/// COM1 serial transmitter backed by port I/O
pub struct SerialBackend {
    data: Port<u8>,
    line_status: Port<u8>,
}

impl SerialBackend {
    /// Backend at the standard COM1 address
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data: Port::new(COM1_BASE),
            line_status: Port::new(COM1_BASE + 5),
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
        unsafe {
            while self.line_status.read() & LSR_THRE == 0 {
                core::hint::spin_loop();
            }
            self.data.write(byte);
        }
    }
}
