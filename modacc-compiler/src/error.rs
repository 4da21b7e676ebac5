//! Compiler errors

use modacc_isa::IsaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Invalid program parameters: {0}")]
    InvalidProgramParams(String),

    #[error("Out of DDR space: {requested} bytes requested at cursor {cursor:#x}, limit {limit:#x}")]
    OutOfDdrSpace { requested: u64, cursor: u64, limit: u64 },

    #[error("Too many instructions: {count} in {scope}, limit {limit}")]
    TooManyInstructions {
        count: usize,
        limit: usize,
        scope: String,
    },

    #[error("SRAM address overflow: load at {address:#x} of {length} units exceeds {limit} units")]
    AddressOverflow { address: u32, length: u64, limit: u32 },

    #[error("Invalid executor image: {0}")]
    InvalidExecutor(String),
}

impl From<IsaError> for CompileError {
    fn from(err: IsaError) -> Self {
        match err {
            IsaError::AddressOverflow { address, length, limit } => {
                Self::AddressOverflow { address, length, limit }
            }
            IsaError::InvalidProgram(msg) => Self::InvalidProgramParams(msg),
            other => Self::InvalidProgramParams(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;
