// src/lib.rs
//! femto_os - a minimal asynchronous-I/O kernel
//!
//! One event loop, a fixed table of request slots, and a lock-free
//! completion ring between interrupt handlers and loop context. Device
//! state machines (CSPRNG seeding, block self-test, network rx/tx) run
//! entirely in loop context and talk to hardware through the
//! [`platform::Platform`] trait.
//!
//! The crate is `no_std` and allocation-free: every arena is sized at
//! compile time in [`constants`]. Host-side tests build against std and
//! drive the whole stack through [`platform::sim::SimPlatform`].

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod abi;
pub mod arch;
pub mod constants;
pub mod driver;
pub mod errors;
pub mod kernel;
pub mod kmain;
pub mod platform;

#[cfg(all(not(test), target_os = "none"))]
mod panic;

pub use errors::{KernelError, KernelResult};
pub use kmain::Os;
