// src/kernel/block.rs

//! Block device self-test
//!
//! Three-stage write/read-back check of one sector: read the sector to
//! confirm the device responds, write a generator-derived pattern, then
//! read it back and compare. A transient device failure (I/O error or
//! timeout) is retried once per stage; a second failure, or any
//! non-transient failure, ends the test.
//!
//! The test owns its two sector buffers. They are handed to the device
//! by raw descriptor, so the test must not move while a request is in
//! flight.

use log::{info, warn};

use crate::abi::work::{
    CompletionEntry, DeviceId, ResultCode, SectorBuf, SlotId, WorkRequest,
};
use crate::constants::SECTOR_SIZE;
use crate::errors::{KernelResult, WorkError};
use crate::kernel::{Kernel, Owner};
use crate::platform::Platform;

/// Why the self-test failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// The device reported an error that did not clear on retry
    Device(ResultCode),
    /// Read-back data differed from the written pattern
    Mismatch {
        /// First differing byte offset within the sector
        offset: usize,
    },
}

/// Self-test progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Not started
    Idle,
    /// Initial read, confirms the device responds
    Read,
    /// Pattern write in flight
    Write,
    /// Read-back in flight
    Verify,
    /// All stages passed
    Pass,
    /// Test ended in failure
    Fail(FailReason),
}

impl Stage {
    /// True once the test has reached a terminal stage
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Pass | Self::Fail(_))
    }
}

/// Block device self-test state machine
#[derive(Debug)]
pub struct BlockTest {
    device: DeviceId,
    lba: u64,
    stage: Stage,
    slot: Option<SlotId>,
    retried: bool,
    pattern: SectorBuf,
    sector: SectorBuf,
}

impl BlockTest {
    /// Create an idle test against one sector of `device`
    #[must_use]
    pub const fn new(device: DeviceId, lba: u64) -> Self {
        Self {
            device,
            lba,
            stage: Stage::Idle,
            slot: None,
            retried: false,
            pattern: SectorBuf::new(),
            sector: SectorBuf::new(),
        }
    }

    /// Current stage
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Kick off the initial read
    pub fn start<P: Platform>(&mut self, k: &mut Kernel<P>) -> KernelResult<()> {
        if self.stage != Stage::Idle {
            return Err(WorkError::InvalidState.into());
        }
        let slot = k.reserve(Owner::BlockTest)?;
        self.slot = Some(slot);
        self.stage = Stage::Read;
        self.retried = false;
        let req = self.stage_request();
        if let Err(e) = k.submit(slot, req) {
            k.release(slot);
            self.slot = None;
            self.stage = Stage::Idle;
            return Err(e);
        }
        Ok(())
    }

    /// The request for the current in-flight stage
    fn stage_request(&mut self) -> WorkRequest {
        match self.stage {
            Stage::Read => WorkRequest::block_read(self.device, self.lba, self.sector.desc()),
            Stage::Write => WorkRequest::block_write(self.device, self.lba, self.pattern.desc()),
            Stage::Verify => WorkRequest::block_verify(self.device, self.lba, self.sector.desc()),
            _ => WorkRequest::empty(),
        }
    }

    /// Advance the state machine with a completion for its slot
    pub fn on_completion<P: Platform>(
        &mut self,
        k: &mut Kernel<P>,
        entry: &CompletionEntry,
    ) -> KernelResult<()> {
        let Some(slot) = self.slot else {
            return Err(WorkError::InvalidState.into());
        };
        debug_assert_eq!(entry.slot, slot);

        if !entry.result.is_ok() {
            return self.on_failure(k, slot, entry.result);
        }

        match self.stage {
            Stage::Read => {
                // Device responds; derive the test pattern and write it.
                let Some(rng) = k.rng_mut() else {
                    self.finish(k, slot, Stage::Fail(FailReason::Device(ResultCode::NoDevice)));
                    return Err(WorkError::InvalidState.into());
                };
                rng.generate(&mut self.pattern.0);
                self.stage = Stage::Write;
                self.retried = false;
                let req = self.stage_request();
                k.submit(slot, req)
            }
            Stage::Write => {
                self.sector.0.fill(0);
                self.stage = Stage::Verify;
                self.retried = false;
                let req = self.stage_request();
                k.submit(slot, req)
            }
            Stage::Verify => {
                let outcome = match first_mismatch(&self.pattern.0, &self.sector.0) {
                    Some(offset) => {
                        warn!("block self-test: mismatch at sector offset {}", offset);
                        Stage::Fail(FailReason::Mismatch { offset })
                    }
                    None => {
                        info!("block self-test: pass (lba {})", self.lba);
                        Stage::Pass
                    }
                };
                self.finish(k, slot, outcome);
                Ok(())
            }
            _ => Err(WorkError::InvalidState.into()),
        }
    }

    fn on_failure<P: Platform>(
        &mut self,
        k: &mut Kernel<P>,
        slot: SlotId,
        result: ResultCode,
    ) -> KernelResult<()> {
        if result.is_transient() && !self.retried {
            warn!(
                "block self-test: transient {:?} in {:?}, retrying once",
                result, self.stage
            );
            self.retried = true;
            let req = self.stage_request();
            return k.submit(slot, req);
        }
        warn!("block self-test: failed with {:?} in {:?}", result, self.stage);
        self.finish(k, slot, Stage::Fail(FailReason::Device(result)));
        Ok(())
    }

    fn finish<P: Platform>(&mut self, k: &mut Kernel<P>, slot: SlotId, outcome: Stage) {
        self.stage = outcome;
        self.slot = None;
        k.release(slot);
    }
}

/// Offset of the first differing byte, `None` when equal
fn first_mismatch(expected: &[u8; SECTOR_SIZE], actual: &[u8; SECTOR_SIZE]) -> Option<usize> {
    expected
        .iter()
        .zip(actual.iter())
        .position(|(a, b)| a != b)
}
