// src/kernel/mmio.rs

//! Typed memory-mapped register access
//!
//! Device register windows come out of the boot tables as raw addresses;
//! [`MmioReg`] wraps one register behind a typed volatile cell so the
//! unsafe surface is two methods instead of ad-hoc pointer casts at
//! every driver call site.

use core::marker::PhantomData;
use core::ptr;

use crate::errors::{KernelResult, MemoryError};

/// Lowest address accepted as a plausible MMIO window
const MMIO_FLOOR: usize = 0x1000;

/// A typed memory-mapped register
#[derive(Debug)]
#[repr(transparent)]
pub struct MmioReg<T> {
    addr: usize,
    _phantom: PhantomData<T>,
}

impl<T: Copy> MmioReg<T> {
    /// Create a register without validating the address
    ///
    /// # Safety
    ///
    /// `addr` must be a valid, properly aligned MMIO address for `T`.
    #[must_use]
    pub const unsafe fn new_unchecked(addr: usize) -> Self {
        Self {
            addr,
            _phantom: PhantomData,
        }
    }

    /// Create a register, rejecting null, misaligned, and implausibly
    /// low addresses
    pub fn new_checked(addr: usize) -> KernelResult<Self> {
        if addr == 0 {
            return Err(MemoryError::InvalidAddress.into());
        }
        if addr % core::mem::align_of::<T>() != 0 {
            return Err(MemoryError::MisalignedAccess.into());
        }
        if addr < MMIO_FLOOR {
            return Err(MemoryError::InvalidAddress.into());
        }
        Ok(Self {
            addr,
            _phantom: PhantomData,
        })
    }

    /// Register address
    #[must_use]
    pub const fn addr(&self) -> usize {
        self.addr
    }

    /// Volatile read
    ///
    /// # Safety
    ///
    /// The register address must still map a live device window.
    pub unsafe fn read(&self) -> T {
        unsafe { ptr::read_volatile(self.addr as *const T) }
    }

    /// Volatile write
    ///
    /// # Safety
    ///
    /// The register address must still map a live device window.
    pub unsafe fn write(&mut self, value: T) {
        unsafe { ptr::write_volatile(self.addr as *mut T, value) }
    }
}

/// Bit manipulation helper for register values
pub trait BitField: Sized + Copy {
    /// Set one bit
    fn set_bit(&mut self, bit: u32);
    /// Clear one bit
    fn clear_bit(&mut self, bit: u32);
    /// Test one bit
    fn is_set(&self, bit: u32) -> bool;
}

macro_rules! impl_bitfield {
    ($($t:ty),*) => {
        $(
            impl BitField for $t {
                fn set_bit(&mut self, bit: u32) {
                    *self |= 1 << bit;
                }

                fn clear_bit(&mut self, bit: u32) {
                    *self &= !(1 << bit);
                }

                fn is_set(&self, bit: u32) -> bool {
                    (*self & (1 << bit)) != 0
                }
            }
        )*
    };
}

impl_bitfield!(u8, u16, u32, u64, usize);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_checked_constructor_rejects_bad_addresses() {
        assert!(matches!(
            MmioReg::<u32>::new_checked(0).unwrap_err().kind(),
            ErrorKind::Memory(MemoryError::InvalidAddress)
        ));
        assert!(matches!(
            MmioReg::<u32>::new_checked(0x2002).unwrap_err().kind(),
            ErrorKind::Memory(MemoryError::MisalignedAccess)
        ));
        assert!(matches!(
            MmioReg::<u32>::new_checked(0x10).unwrap_err().kind(),
            ErrorKind::Memory(MemoryError::InvalidAddress)
        ));
        assert!(MmioReg::<u32>::new_checked(0x2000).is_ok());
    }

    #[test]
    fn test_read_write_through_local_cell() {
        let mut cell: u32 = 0;
        let addr = core::ptr::addr_of_mut!(cell) as usize;
        // Safety: the "register" is a local variable for the duration
        // of the test.
        let mut reg = unsafe { MmioReg::<u32>::new_unchecked(addr) };
        unsafe {
            reg.write(0xDEAD_BEEF);
            assert_eq!(reg.read(), 0xDEAD_BEEF);
        }
    }

    #[test]
    fn test_bitfield_helpers() {
        let mut v: u32 = 0;
        v.set_bit(3);
        assert!(v.is_set(3));
        assert_eq!(v, 8);
        v.clear_bit(3);
        assert!(!v.is_set(3));
        assert_eq!(v, 0);
    }
}
