// src/panic.rs

//! Panic handler for freestanding targets

use core::panic::PanicInfo;

use crate::arch::{active::BootCpu, Cpu};
use crate::kprintln;

#[panic_handler]
fn panic(info: &PanicInfo<'_>) -> ! {
    kprintln!("KERNEL PANIC: {}", info);
    BootCpu::disable_interrupts();
    loop {
        BootCpu::halt();
    }
}
