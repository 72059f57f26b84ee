// src/driver/pci.rs

//! PCI configuration space access via ECAM
//!
//! Enhanced Configuration Access Mechanism: each function's 4 KiB
//! config window lives at a fixed offset inside a memory-mapped region
//! reported by the boot tables. Only the probing the boot path needs is
//! implemented: vendor/device identification and BAR reads.

use log::debug;

use crate::errors::KernelResult;
use crate::kernel::mmio::MmioReg;

/// Config space offset of the vendor id register
const OFF_VENDOR_ID: usize = 0x00;

/// Config space offset of the first BAR
const OFF_BAR0: usize = 0x10;

/// Vendor id read from an empty slot
const VENDOR_NONE: u16 = 0xFFFF;

/// One PCI function's identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciId {
    /// Vendor identifier
    pub vendor: u16,
    /// Device identifier
    pub device: u16,
}

/// A memory-mapped PCI configuration region
#[derive(Debug, Clone, Copy)]
pub struct EcamRegion {
    base: usize,
}

impl EcamRegion {
    /// Region rooted at `base`
    #[must_use]
    pub const fn new(base: usize) -> Self {
        Self { base }
    }

    /// Address of a config register
    ///
    /// ECAM layout: bus in bits 20..28, device in 15..20, function in
    /// 12..15, register offset below.
    #[must_use]
    pub const fn address(&self, bus: u8, device: u8, function: u8, offset: usize) -> usize {
        self.base
            + ((bus as usize) << 20)
            + (((device as usize) & 0x1F) << 15)
            + (((function as usize) & 0x7) << 12)
            + (offset & 0xFFF)
    }

    /// Read one 32-bit config register
    pub fn read_u32(&self, bus: u8, device: u8, function: u8, offset: usize) -> KernelResult<u32> {
        let reg = MmioReg::<u32>::new_checked(self.address(bus, device, function, offset))?;
        // Safety: the region was reported by the boot tables and the
        // constructor validated the address.
        Ok(unsafe { reg.read() })
    }

    /// Identify the function at (bus, device, function)
    ///
    /// Returns `None` for an empty slot.
    pub fn probe(&self, bus: u8, device: u8, function: u8) -> KernelResult<Option<PciId>> {
        let id = self.read_u32(bus, device, function, OFF_VENDOR_ID)?;
        let vendor = (id & 0xFFFF) as u16;
        if vendor == VENDOR_NONE {
            return Ok(None);
        }
        let device_id = (id >> 16) as u16;
        debug!(
            "pci {:02x}:{:02x}.{}: vendor {:04x} device {:04x}",
            bus, device, function, vendor, device_id
        );
        Ok(Some(PciId {
            vendor,
            device: device_id,
        }))
    }

    /// Read one base address register
    pub fn read_bar(&self, bus: u8, device: u8, function: u8, bar: usize) -> KernelResult<u32> {
        debug_assert!(bar < 6);
        self.read_u32(bus, device, function, OFF_BAR0 + bar * 4)
    }
}
