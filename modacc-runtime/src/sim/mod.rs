//! # Simulated Accelerator
//!
//! A functional model of the board behind the [`DeviceIo`](crate::DeviceIo)
//! surface. Writing `go` runs the global stream found in the bypass window:
//! L1 transfers move DDR bytes into per-chip SRAM or instruction buffers,
//! instruction-length announcements execute chip words, and Interrupts write
//! each PE's result back to DDR. The arithmetic is exact (`rug`), so results
//! can be checked against host math.
//!
//! A fault (malformed word, out-of-range access, a PE in the wrong state,
//! a chip reset before it drained its buffer) stops the run and leaves the
//! completion register at 0.

mod chip;
mod device;
mod memory;

pub use chip::{Chip, Pe};
pub use device::SimulatedIo;
pub use memory::{SparseMemory, PAGE_SIZE};

use modacc_isa::IsaError;
use thiserror::Error;

/// Why a simulated run stopped early
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("{target} access at {address:#x} of {length} bytes exceeds {limit:#x}")]
    OutOfRange {
        target: &'static str,
        address: u64,
        length: u64,
        limit: u64,
    },

    #[error("malformed instruction: {0}")]
    Decode(String),

    #[error("chip {chip}: {reason}")]
    Chip { chip: usize, reason: String },

    #[error("sequencer: {0}")]
    Sequencer(String),
}

impl From<IsaError> for Fault {
    fn from(e: IsaError) -> Self {
        Self::Decode(e.to_string())
    }
}
