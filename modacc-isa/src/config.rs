//! # Accelerator Topology
//!
//! Board shape the compiler targets: how many chips, how many PEs per chip,
//! how much DDR, and the largest vector slice one chip takes per round.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical board slot of each logical chip. The first eight entries are the
/// populated slots of the reference board; the rest fill the free slots.
pub const CHIP_SLOTS: [u8; 16] = [0, 2, 4, 7, 9, 11, 12, 15, 1, 3, 5, 6, 8, 10, 13, 14];

/// Accelerator topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topology {
    /// Number of chips (1-16, one bit each in the 16-bit chip mask)
    pub num_chips: u32,
    /// Processing elements per chip (1-16)
    pub pes_per_chip: u32,
    /// DDR size in bytes (addresses are 32-bit on the wire)
    pub ddr_size: u64,
    /// Largest vector slice one chip processes per batch (1-2048)
    pub max_batch: u32,
}

impl Topology {
    /// Reference board: 8 chips × 16 PEs, 2 GiB DDR, 2048-element batches
    pub const DEFAULT: Self = Self {
        num_chips: 8,
        pes_per_chip: 16,
        ddr_size: 2 << 30,
        max_batch: crate::MAX_ON_CHIP_VECTOR,
    };

    /// Create a new topology with validation
    pub const fn new(
        num_chips: u32,
        pes_per_chip: u32,
        ddr_size: u64,
        max_batch: u32,
    ) -> Result<Self, ConfigError> {
        let topology = Self {
            num_chips,
            pes_per_chip,
            ddr_size,
            max_batch,
        };
        match topology.validate() {
            Ok(()) => Ok(topology),
            Err(e) => Err(e),
        }
    }

    /// Validate the topology
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.num_chips < 1 || self.num_chips > 16 {
            return Err(ConfigError::InvalidChipCount(self.num_chips));
        }
        if self.pes_per_chip < 1 || self.pes_per_chip > 16 {
            return Err(ConfigError::InvalidPeCount(self.pes_per_chip));
        }
        if self.ddr_size == 0 || self.ddr_size > 1 << 32 {
            return Err(ConfigError::InvalidDdrSize(self.ddr_size));
        }
        if self.max_batch < 1 || self.max_batch > crate::MAX_ON_CHIP_VECTOR {
            return Err(ConfigError::InvalidBatchSize(self.max_batch));
        }
        Ok(())
    }

    /// Chip-mask bit of one logical chip
    #[inline]
    pub const fn chip_mask(&self, chip: usize) -> u16 {
        1 << (15 - CHIP_SLOTS[chip] as u32)
    }

    /// Chip mask covering every chip of the board
    pub fn all_chips_mask(&self) -> u16 {
        (0..self.num_chips as usize).fold(0, |mask, chip| mask | self.chip_mask(chip))
    }

    /// Logical chips addressed by a chip mask
    pub fn chips_in_mask(&self, mask: u16) -> Vec<usize> {
        (0..self.num_chips as usize)
            .filter(|&chip| mask & self.chip_mask(chip) != 0)
            .collect()
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} chips × {} PEs, {} MiB DDR, batch ≤ {}",
            self.num_chips,
            self.pes_per_chip,
            self.ddr_size >> 20,
            self.max_batch
        )
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Chip count must be in 1..=16, got {0}")]
    InvalidChipCount(u32),

    #[error("PE count must be in 1..=16, got {0}")]
    InvalidPeCount(u32),

    #[error("DDR size must be in 1..=4 GiB, got {0} bytes")]
    InvalidDdrSize(u64),

    #[error("Batch size must be in 1..=2048, got {0}")]
    InvalidBatchSize(u32),
}
