//! # Error Types for the Accelerator ISA

use crate::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IsaError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Invalid program: {0}")]
    InvalidProgram(String),

    #[error("SRAM address overflow: load at {address:#x} of {length} units exceeds {limit} units")]
    AddressOverflow { address: u32, length: u64, limit: u32 },

    #[error("Invalid instruction encoding: {0:#034x}")]
    InvalidEncoding(u128),
}

pub type Result<T> = std::result::Result<T, IsaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IsaError::AddressOverflow {
            address: 0x14000,
            length: 2,
            limit: 81920,
        };
        assert_eq!(
            err.to_string(),
            "SRAM address overflow: load at 0x14000 of 2 units exceeds 81920 units"
        );

        let err = IsaError::InvalidEncoding(0x4000_0000_0000_0000_0000_0000_0000_0000);
        assert_eq!(
            err.to_string(),
            "Invalid instruction encoding: 0x40000000000000000000000000000000"
        );
    }

    #[test]
    fn test_config_error_from() {
        let err: IsaError = ConfigError::InvalidChipCount(0).into();
        assert!(err.to_string().starts_with("Invalid configuration"));
    }
}
