//! # Vector Programs and the Parameter Word
//!
//! A [`Program`] names one vector operation and its bit widths. Its
//! [`ParamWord`] is the 32-bit control word the PEs read from the first
//! unit of the shared-parameter block.
//!
//! ```text
//! Bit   31..25  24..22  21..19  18..6    5         4..0
//!       pes     p_code  case    e_field  r_square  op_code
//! ```

use crate::config::Topology;
use crate::error::{IsaError, Result};
use crate::operation::Operation;
use crate::{PARAM_BLOCK_BYTES, SUPPORTED_P_BITS};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest exponent width the 13-bit e field carries
pub const MAX_E_BITS: u32 = 8192;

/// Interrupt length field covers at most this many bytes per PE group
pub const MAX_GROUP_OUTPUT_BYTES: u64 = 1 << 13;

/// Program kind. Only vector programs exist on this accelerator generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProgramKind {
    Vector,
}

/// One vector operation over `vec_size` elements
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Program {
    pub kind: ProgramKind,
    pub operation: Operation,
    pub vec_size: u32,
    /// Modulus width
    pub p_bits: u32,
    /// Exponent width (ignored by operations without an exponent)
    pub e_bits: u32,
}

impl Program {
    pub const fn vector(operation: Operation, vec_size: u32, p_bits: u32, e_bits: u32) -> Self {
        Self {
            kind: ProgramKind::Vector,
            operation,
            vec_size,
            p_bits,
            e_bits,
        }
    }

    /// Check the widths and size against the operation and the board
    pub fn validate(&self, topology: &Topology) -> Result<()> {
        if self.vec_size == 0 {
            return Err(IsaError::InvalidProgram("vector size must be positive".into()));
        }
        if p_code(self.p_bits).is_none() {
            return Err(IsaError::InvalidProgram(format!(
                "unsupported modulus width {} (expected one of {:?})",
                self.p_bits, SUPPORTED_P_BITS
            )));
        }
        let template = self.operation.template();
        if template.uses_exponent()
            && (self.e_bits == 0 || self.e_bits % 256 != 0 || self.e_bits >= MAX_E_BITS)
        {
            return Err(IsaError::InvalidProgram(format!(
                "exponent width {} must be a positive multiple of 256 below {}",
                self.e_bits, MAX_E_BITS
            )));
        }
        let group_bytes = topology.pes_per_chip as u64 * self.p_bits as u64 / 8;
        if group_bytes > MAX_GROUP_OUTPUT_BYTES {
            return Err(IsaError::InvalidProgram(format!(
                "{} PEs × {} bits overflow the {}-byte interrupt window",
                topology.pes_per_chip, self.p_bits, MAX_GROUP_OUTPUT_BYTES
            )));
        }
        Ok(())
    }

    /// Byte width of one output element
    #[inline]
    pub const fn p_bytes(&self) -> u64 {
        self.p_bits as u64 / 8
    }

    /// Byte width of one element of operand `index`
    pub fn operand_bytes(&self, index: usize) -> u64 {
        self.operation.template().operands[index].bits(self.p_bits, self.e_bits) as u64 / 8
    }

    /// Shared-parameter block size in bytes
    pub fn param_bytes(&self) -> u64 {
        self.operation.template().param_bytes(self.p_bits, self.e_bits)
    }

    /// Parameter word for a chip running `pes` PEs
    pub fn param_word(&self, pes: u32) -> ParamWord {
        let template = self.operation.template();
        ParamWord {
            pes: pes as u8,
            p_code: p_code(self.p_bits).unwrap_or(0),
            add_case: template.add_case as u8,
            e_field: if self.operation == Operation::PaillierEnc {
                self.p_bits as u16
            } else {
                self.e_bits as u16
            },
            r_square: template.preloads_r_square(),
            op_code: self.operation.to_u8(),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] p={} e={}",
            self.operation, self.vec_size, self.p_bits, self.e_bits
        )
    }
}

/// Encoded modulus width
pub const fn p_code(p_bits: u32) -> Option<u8> {
    match p_bits {
        512 => Some(1),
        1024 => Some(2),
        2048 => Some(3),
        3072 => Some(4),
        4096 => Some(5),
        _ => None,
    }
}

/// Decoded modulus width
pub const fn p_bits_from_code(code: u8) -> Option<u32> {
    match code {
        1 => Some(512),
        2 => Some(1024),
        3 => Some(2048),
        4 => Some(3072),
        5 => Some(4096),
        _ => None,
    }
}

const PES_SHIFT: u32 = 25;
const P_CODE_SHIFT: u32 = 22;
const CASE_SHIFT: u32 = 19;
const E_SHIFT: u32 = 6;
const R_SQUARE_SHIFT: u32 = 5;

/// Per-chip control word at the head of the shared-parameter block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamWord {
    pub pes: u8,
    pub p_code: u8,
    pub add_case: u8,
    pub e_field: u16,
    pub r_square: bool,
    pub op_code: u8,
}

impl ParamWord {
    pub const fn encode(&self) -> u32 {
        ((self.pes as u32 & 0x7F) << PES_SHIFT)
            | ((self.p_code as u32 & 0x7) << P_CODE_SHIFT)
            | ((self.add_case as u32 & 0x7) << CASE_SHIFT)
            | ((self.e_field as u32 & 0x1FFF) << E_SHIFT)
            | ((self.r_square as u32) << R_SQUARE_SHIFT)
            | (self.op_code as u32 & 0x1F)
    }

    pub const fn decode(word: u32) -> Self {
        Self {
            pes: ((word >> PES_SHIFT) & 0x7F) as u8,
            p_code: ((word >> P_CODE_SHIFT) & 0x7) as u8,
            add_case: ((word >> CASE_SHIFT) & 0x7) as u8,
            e_field: ((word >> E_SHIFT) & 0x1FFF) as u16,
            r_square: (word >> R_SQUARE_SHIFT) & 1 == 1,
            op_code: (word & 0x1F) as u8,
        }
    }

    /// The 32-byte SRAM unit carrying this word
    pub fn to_block(&self) -> [u8; PARAM_BLOCK_BYTES] {
        let mut block = [0u8; PARAM_BLOCK_BYTES];
        block[..4].copy_from_slice(&self.encode().to_le_bytes());
        block
    }

    pub fn from_block(block: &[u8]) -> Option<Self> {
        let head: [u8; 4] = block.get(..4)?.try_into().ok()?;
        Some(Self::decode(u32::from_le_bytes(head)))
    }

    pub fn operation(&self) -> Option<Operation> {
        Operation::from_u8(self.op_code)
    }

    pub fn p_bits(&self) -> Option<u32> {
        p_bits_from_code(self.p_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_reference_shapes() {
        let topology = Topology::DEFAULT;
        assert!(Program::vector(Operation::ModMul, 10, 2048, 0).validate(&topology).is_ok());
        assert!(Program::vector(Operation::PaillierEnc, 3, 2048, 1024)
            .validate(&topology)
            .is_ok());
        assert!(Program::vector(Operation::ModExpConstE, 1, 4096, 2048)
            .validate(&topology)
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_params() {
        let topology = Topology::DEFAULT;
        let bad = [
            Program::vector(Operation::ModMul, 0, 2048, 0),
            Program::vector(Operation::ModMul, 4, 1000, 0),
            Program::vector(Operation::ModExp, 4, 2048, 0),
            Program::vector(Operation::ModExp, 4, 2048, 300),
            Program::vector(Operation::ModExp, 4, 2048, 8192),
        ];
        for program in bad {
            assert!(
                matches!(program.validate(&topology), Err(IsaError::InvalidProgram(_))),
                "{program}"
            );
        }
    }

    #[test]
    fn test_validate_ignores_unused_exponent() {
        let topology = Topology::DEFAULT;
        assert!(Program::vector(Operation::ModMul, 4, 2048, 300).validate(&topology).is_ok());
    }

    #[test]
    fn test_validate_group_window() {
        // 16 × 4096 / 8 = 8192 fits exactly
        assert!(Program::vector(Operation::ModMul, 1, 4096, 0)
            .validate(&Topology::DEFAULT)
            .is_ok());
    }

    #[test]
    fn test_param_word_fields() {
        let word = Program::vector(Operation::ModAdd, 5, 2048, 0).param_word(16);
        assert_eq!(word.pes, 16);
        assert_eq!(word.p_code, 3);
        assert_eq!(word.add_case, 1);
        assert!(!word.r_square);
        assert_eq!(word.encode(), (16 << 25) | (3 << 22) | (1 << 19) | 5);

        let word = Program::vector(Operation::PaillierEnc, 5, 2048, 1024).param_word(3);
        assert_eq!(word.e_field, 2048);
        assert!(word.r_square);
        assert_eq!(word.operation(), Some(Operation::PaillierEnc));
        assert_eq!(word.p_bits(), Some(2048));
    }

    #[test]
    fn test_param_block_layout() {
        let word = Program::vector(Operation::ModExp, 5, 1024, 512).param_word(7);
        let block = word.to_block();
        assert_eq!(block.len(), 32);
        assert!(block[4..].iter().all(|&b| b == 0));
        assert_eq!(ParamWord::from_block(&block), Some(word));
        assert_eq!(ParamWord::from_block(&block[..3]), None);
    }

    #[test]
    fn test_param_word_decode() {
        let word = ParamWord::decode(0xFFFF_FFFF);
        assert_eq!(word.pes, 0x7F);
        assert_eq!(word.e_field, 0x1FFF);
        assert_eq!(word.encode(), 0xFFFF_FFFF);
    }

    #[test]
    fn test_operand_bytes() {
        let program = Program::vector(Operation::PaillierEnc, 1, 2048, 1024);
        assert_eq!(program.operand_bytes(0), 128);
        assert_eq!(program.operand_bytes(1), 128);
        assert_eq!(program.p_bytes(), 256);
    }
}
