// src/driver/mod.rs

//! Device drivers used at boot: serial console and PCI config space

pub mod pci;
pub mod serial;
