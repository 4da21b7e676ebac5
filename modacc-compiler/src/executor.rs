//! # Compiled Executor
//!
//! Everything the device driver needs for one run: both instruction
//! sections and the three DDR anchors.
//!
//! Binary format (all integers little-endian):
//! ```text
//! Offset  Size  Field
//! ──────────────────────────────────
//! 0x00    4     magic ("MACX")
//! 0x04    4     version
//! 0x08    1     operation
//! 0x09    3     reserved
//! 0x0C    4     vec_size
//! 0x10    4     p_bits
//! 0x14    4     e_bits
//! 0x18    16    in_params address, length
//! 0x28    16    inst address, length
//! 0x38    16    out address, length
//! 0x48    8     chip section size
//! 0x50    8     device section size
//! 0x58    32    SHA-256 of both sections
//! 0x78    ..    chip section, device section
//! ```

use crate::alloc::DdrRegion;
use crate::error::{CompileError, Result};
use modacc_isa::{GlobalInstruction, Operation, Program, CHIP_WORD_BYTES, GLOBAL_WORD_BYTES};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Magic number for executor images: "MACX"
pub const MAGIC: [u8; 4] = *b"MACX";

/// Image format version
pub const VERSION: u32 = 1;

const HEADER_SIZE: usize = 0x78;

/// Compiled program, ready for the device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Executor {
    pub program: Program,
    /// Chip streams, chip-major then batch, little-endian 64-bit words
    pub instruction_bytes: Vec<u8>,
    /// Global stream, each 128-bit word in device (big-endian) byte order
    pub instruction_bytes_device: Vec<u8>,
    /// Shared parameters followed by every operand vector
    pub in_params: DdrRegion,
    pub inst: DdrRegion,
    /// Output vector in element order
    pub out: DdrRegion,
}

impl Executor {
    /// Number of 128-bit global words
    pub fn global_len(&self) -> usize {
        self.instruction_bytes_device.len() / GLOBAL_WORD_BYTES
    }

    /// Decode the global stream back into instructions
    pub fn global_stream(&self) -> Result<Vec<GlobalInstruction>> {
        self.instruction_bytes_device
            .chunks_exact(GLOBAL_WORD_BYTES)
            .map(|chunk| {
                let mut word = [0u8; GLOBAL_WORD_BYTES];
                word.copy_from_slice(chunk);
                GlobalInstruction::decode(u128::from_be_bytes(word)).map_err(CompileError::from)
            })
            .collect()
    }

    /// Serialize to an image
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            HEADER_SIZE + self.instruction_bytes.len() + self.instruction_bytes_device.len(),
        );

        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.push(self.program.operation.to_u8());
        bytes.extend_from_slice(&[0; 3]);
        bytes.extend_from_slice(&self.program.vec_size.to_le_bytes());
        bytes.extend_from_slice(&self.program.p_bits.to_le_bytes());
        bytes.extend_from_slice(&self.program.e_bits.to_le_bytes());
        for region in [self.in_params, self.inst, self.out] {
            bytes.extend_from_slice(&region.address.to_le_bytes());
            bytes.extend_from_slice(&region.length.to_le_bytes());
        }
        bytes.extend_from_slice(&(self.instruction_bytes.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&(self.instruction_bytes_device.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&self.checksum());

        bytes.extend_from_slice(&self.instruction_bytes);
        bytes.extend_from_slice(&self.instruction_bytes_device);
        bytes
    }

    /// Deserialize from an image
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(invalid("image too small"));
        }
        if bytes[0..4] != MAGIC {
            return Err(invalid("invalid magic number"));
        }
        let version = read_u32(bytes, 0x04);
        if version != VERSION {
            return Err(invalid(format!("unsupported version {version}")));
        }

        let operation = Operation::from_u8(bytes[0x08])
            .ok_or_else(|| invalid(format!("unknown operation {}", bytes[0x08])))?;
        let program = Program::vector(
            operation,
            read_u32(bytes, 0x0C),
            read_u32(bytes, 0x10),
            read_u32(bytes, 0x14),
        );
        let region = |offset| DdrRegion::new(read_u64(bytes, offset), read_u64(bytes, offset + 8));
        let (in_params, inst, out) = (region(0x18), region(0x28), region(0x38));

        let chip_len = read_u64(bytes, 0x48) as usize;
        let device_len = read_u64(bytes, 0x50) as usize;
        if chip_len % CHIP_WORD_BYTES != 0 || device_len % GLOBAL_WORD_BYTES != 0 {
            return Err(invalid("section sizes are not whole words"));
        }
        if chip_len as u64 != inst.length {
            return Err(invalid("chip section does not match its region"));
        }
        let expected = chip_len
            .checked_add(device_len)
            .and_then(|n| n.checked_add(HEADER_SIZE));
        if expected != Some(bytes.len()) {
            return Err(invalid("section sizes do not match image length"));
        }

        let chip_end = HEADER_SIZE + chip_len;
        let executor = Self {
            program,
            instruction_bytes: bytes[HEADER_SIZE..chip_end].to_vec(),
            instruction_bytes_device: bytes[chip_end..].to_vec(),
            in_params,
            inst,
            out,
        };
        if executor.checksum()[..] != bytes[0x58..HEADER_SIZE] {
            return Err(invalid("checksum mismatch"));
        }
        Ok(executor)
    }

    /// Save the image to a file
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        std::fs::write(path, self.to_bytes())
    }

    /// Load an image from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| invalid(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// SHA-256 over both instruction sections
    pub fn checksum(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(&self.instruction_bytes);
        hasher.update(&self.instruction_bytes_device);
        hasher.finalize().into()
    }
}

fn invalid(msg: impl Into<String>) -> CompileError {
    CompileError::InvalidExecutor(msg.into())
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Executor {
        let words = [GlobalInstruction::Nop, GlobalInstruction::WAIT, GlobalInstruction::Done];
        Executor {
            program: Program::vector(Operation::ModExp, 3, 1024, 512),
            instruction_bytes: (0..48).collect(),
            instruction_bytes_device: words.iter().flat_map(|w| w.encode().to_be_bytes()).collect(),
            in_params: DdrRegion::new(0x400, 0x200),
            inst: DdrRegion::new(0x100, 48),
            out: DdrRegion::new(0, 0x100),
        }
    }

    #[test]
    fn test_image_roundtrip() {
        let executor = sample();
        let bytes = executor.to_bytes();
        assert_eq!(&bytes[..4], b"MACX");
        assert_eq!(bytes.len(), HEADER_SIZE + 48 + 48);
        assert_eq!(Executor::from_bytes(&bytes).unwrap(), executor);
    }

    #[test]
    fn test_global_stream_decode() {
        let stream = sample().global_stream().unwrap();
        assert_eq!(stream.len(), 3);
        assert_eq!(stream[2], GlobalInstruction::Done);
        assert_eq!(sample().global_len(), 3);
    }

    #[test]
    fn test_rejects_corruption() {
        let bytes = sample().to_bytes();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(Executor::from_bytes(&bad_magic), Err(CompileError::InvalidExecutor(_))));

        let mut flipped = bytes.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 1;
        let err = Executor::from_bytes(&flipped).unwrap_err();
        assert_eq!(err.to_string(), "Invalid executor image: checksum mismatch");

        assert!(Executor::from_bytes(&bytes[..bytes.len() - 16]).is_err());
        assert!(Executor::from_bytes(&bytes[..10]).is_err());

        let mut bad_op = bytes;
        bad_op[0x08] = 99;
        assert!(Executor::from_bytes(&bad_op).is_err());
    }
}
