// src/driver/serial.rs

//! Serial console and the kernel logger
//!
//! One global console behind a spin mutex, fed by the architecture's
//! `SerialBackend`. The `log` facade is wired to it by [`init`]; kernel
//! code logs through `log::info!` and friends, never by writing to the
//! console directly.

use core::fmt::{self, Write};

use log::{LevelFilter, Metadata, Record, SetLoggerError};
use spin::Mutex;

use crate::arch::active::SerialBackend;
use crate::arch::ByteSink;

/// Line-oriented console over a byte sink
pub struct Console<B: ByteSink> {
    backend: B,
}

impl<B: ByteSink> Console<B> {
    /// Console over `backend`
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Write one byte, translating LF to CRLF for serial terminals
    pub fn write_byte(&mut self, byte: u8) {
        if byte == b'\n' {
            self.backend.put_byte(b'\r');
        }
        self.backend.put_byte(byte);
    }
}

impl<B: ByteSink> Write for Console<B> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.write_byte(byte);
        }
        Ok(())
    }
}

static CONSOLE: Mutex<Console<SerialBackend>> = Mutex::new(Console::new(SerialBackend::new()));

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    // Console errors are unreportable; drop them.
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Print to the serial console
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ($crate::driver::serial::_print(format_args!($($arg)*)));
}

/// Print a line to the serial console
#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}

/// `log` facade backend writing to the serial console
struct SerialLogger;

impl log::Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            _print(format_args!(
                "[{:5}] {}: {}\n",
                record.level(),
                record.target(),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

/// Install the serial logger as the `log` facade backend
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}
