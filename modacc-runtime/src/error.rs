//! Runtime error types

use modacc_compiler::CompileError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the raw device surface and the run protocol
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device unavailable: {}: {source}", .path.display())]
    DeviceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Write to {target} failed: {reason}")]
    WriteFailed { target: String, reason: String },

    #[error("Read from {target} failed: {reason}")]
    ReadFailed { target: String, reason: String },

    #[error("Device did not complete after {polls} polls")]
    Timeout { polls: u32 },

    #[error("Device is not open")]
    NotOpen,
}

impl DeviceError {
    pub(crate) fn write(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::WriteFailed {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn read(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::ReadFailed {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures of a runtime operation
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("Value is not invertible")]
    NotInvertible,
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_display() {
        let err = DeviceError::DeviceUnavailable {
            path: PathBuf::from("/dev/xdma0_h2c_0"),
            source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
        };
        assert_eq!(err.to_string(), "Device unavailable: /dev/xdma0_h2c_0: no such device");

        assert_eq!(
            DeviceError::Timeout { polls: 100_000 }.to_string(),
            "Device did not complete after 100000 polls"
        );
        assert_eq!(
            DeviceError::write("ddr", "address out of range").to_string(),
            "Write to ddr failed: address out of range"
        );
    }

    #[test]
    fn test_runtime_error_from() {
        let err: RuntimeError = DeviceError::NotOpen.into();
        assert_eq!(err.to_string(), "Device error: Device is not open");

        let err: RuntimeError = CompileError::InvalidProgramParams("bad".into()).into();
        assert!(matches!(err, RuntimeError::Compile(_)));

        let err = RuntimeError::LengthMismatch { expected: 3, found: 2 };
        assert_eq!(err.to_string(), "Length mismatch: expected 3, found 2");
    }
}
