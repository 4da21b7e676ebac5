//! Input and output byte layouts
//!
//! The input region of a run is the shared-parameter block followed by
//! every operand vector, all little-endian and fixed-width:
//!
//! ```text
//! param (32 B) │ constant slots in template order │ operand 0 [vec_size] │ operand 1 [vec_size]
//! ```
//!
//! The output region is `vec_size` results of `p_bits / 8` bytes each, in
//! element order.

use crate::error::{Result, RuntimeError};
use modacc_isa::{Operation, Program, SlotRole, SlotSize};
use rug::integer::Order;
use rug::Integer;

/// Fixed-length little-endian byte builder
#[derive(Debug)]
pub struct ByteWriter {
    buf: Vec<u8>,
    length: usize,
}

impl ByteWriter {
    /// Builder for exactly `length` bytes
    pub fn with_length(length: usize) -> Self {
        Self {
            buf: Vec::with_capacity(length),
            length,
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.length - self.buf.len()
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.remaining() {
            return Err(RuntimeError::InvalidInput(format!(
                "{} bytes at offset {} overflow a {}-byte region",
                bytes.len(),
                self.position(),
                self.length
            )));
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Append `value` as exactly `width` little-endian bytes
    pub fn put_integer(&mut self, value: &Integer, width: usize) -> Result<()> {
        if *value < 0 {
            return Err(RuntimeError::InvalidInput(format!("negative value {value}")));
        }
        let mut bytes = value.to_digits::<u8>(Order::Lsf);
        if bytes.len() > width {
            return Err(RuntimeError::InvalidInput(format!(
                "{}-bit value exceeds a {width}-byte slot",
                value.significant_bits()
            )));
        }
        bytes.resize(width, 0);
        self.put_bytes(&bytes)
    }

    /// The finished region; every declared byte must have been written
    pub fn finish(self) -> Result<Vec<u8>> {
        if self.buf.len() != self.length {
            return Err(RuntimeError::LengthMismatch {
                expected: self.length,
                found: self.buf.len(),
            });
        }
        Ok(self.buf)
    }
}

/// −p⁻¹ mod 2²⁵⁶
pub fn n_prime(p: &Integer) -> Result<Integer> {
    let r = Integer::from(1) << 256u32;
    let inverse = p.clone().invert(&r).map_err(|_| RuntimeError::NotInvertible)?;
    Ok(r - inverse)
}

/// R² mod p with R = 2^p_bits
pub fn r_square(p: &Integer, p_bits: u32) -> Integer {
    (Integer::from(1) << (2 * p_bits)) % p
}

/// R mod p with R = 2^p_bits
pub fn r_mont(p: &Integer, p_bits: u32) -> Integer {
    (Integer::from(1) << p_bits) % p
}

/// One vector operation with its data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VectorJob {
    pub operation: Operation,
    pub p_bits: u32,
    pub e_bits: u32,
    /// The modulus; for ModInvConstP the value inverses are taken against
    pub modulus: Integer,
    /// The scalar constant of the `*Const*` operations; for PaillierEnc the public n
    pub constant: Option<Integer>,
    /// Streamed operand vectors, in template order
    pub operands: Vec<Vec<Integer>>,
}

impl VectorJob {
    pub fn new(operation: Operation, p_bits: u32, e_bits: u32, modulus: Integer) -> Self {
        Self {
            operation,
            p_bits,
            e_bits,
            modulus,
            constant: None,
            operands: Vec::new(),
        }
    }

    pub fn constant(mut self, constant: Integer) -> Self {
        self.constant = Some(constant);
        self
    }

    pub fn operand(mut self, values: Vec<Integer>) -> Self {
        self.operands.push(values);
        self
    }

    /// Element count shared by every operand
    pub fn vec_size(&self) -> usize {
        self.operands.first().map_or(0, Vec::len)
    }

    pub fn program(&self) -> Program {
        Program::vector(self.operation, self.vec_size() as u32, self.p_bits, self.e_bits)
    }

    /// Check operand shapes and the values the slots need
    pub fn validate(&self) -> Result<()> {
        let template = self.operation.template();
        if self.operands.len() != template.operands.len() {
            return Err(RuntimeError::InvalidInput(format!(
                "{} takes {} operand vectors, got {}",
                self.operation,
                template.operands.len(),
                self.operands.len()
            )));
        }
        let expected = self.vec_size();
        for operand in &self.operands[1..] {
            if operand.len() != expected {
                return Err(RuntimeError::LengthMismatch {
                    expected,
                    found: operand.len(),
                });
            }
        }
        if self.modulus <= 1 {
            return Err(RuntimeError::InvalidInput(format!("modulus {} is too small", self.modulus)));
        }
        let needs_constant = template
            .slots
            .iter()
            .any(|s| matches!(s.role, SlotRole::Constant | SlotRole::PaillierExponent));
        if needs_constant && self.constant.is_none() {
            return Err(RuntimeError::InvalidInput(format!("{} needs a constant", self.operation)));
        }
        Ok(())
    }

    fn paillier_n(&self) -> Result<&Integer> {
        self.constant
            .as_ref()
            .ok_or_else(|| RuntimeError::InvalidInput("Paillier encryption needs n".into()))
    }

    /// Bytes of the input region for chips running `pes` PEs
    pub fn encode_input(&self, pes: u32) -> Result<Vec<u8>> {
        self.validate()?;
        let program = self.program();
        let template = self.operation.template();
        let vec_size = self.vec_size() as u64;
        let operand_bytes: u64 = (0..template.operands.len())
            .map(|i| program.operand_bytes(i) * vec_size)
            .sum();
        let mut writer = ByteWriter::with_length((program.param_bytes() + operand_bytes) as usize);

        for slot in template.slots {
            let width = (slot.size.bits(self.p_bits, self.e_bits) / 8) as usize;
            match slot.role {
                SlotRole::Param => {
                    debug_assert_eq!(slot.size, SlotSize::Unit);
                    writer.put_bytes(&program.param_word(pes).to_block())?;
                }
                SlotRole::Modulus => writer.put_integer(&self.modulus, width)?,
                SlotRole::NPrime => writer.put_integer(&n_prime(&self.modulus)?, width)?,
                SlotRole::RSquare => writer.put_integer(&r_square(&self.modulus, self.p_bits), width)?,
                SlotRole::RMont => writer.put_integer(&r_mont(&self.modulus, self.p_bits), width)?,
                SlotRole::Constant => {
                    let constant = self.constant.as_ref().ok_or_else(|| {
                        RuntimeError::InvalidInput(format!("{} needs a constant", self.operation))
                    })?;
                    writer.put_integer(constant, width)?;
                }
                SlotRole::PaillierExponent => {
                    writer.put_integer(&Integer::from(self.paillier_n()? << 1u32), width)?
                }
                SlotRole::PaillierGenerator => {
                    writer.put_integer(&Integer::from(self.paillier_n()? + 1u32), width)?
                }
            }
        }

        for (index, values) in self.operands.iter().enumerate() {
            let width = program.operand_bytes(index) as usize;
            for value in values {
                writer.put_integer(value, width)?;
            }
        }
        writer.finish()
    }
}

/// Split an output region into `width`-byte results
pub fn decode_output(bytes: &[u8], width: usize) -> Result<Vec<Integer>> {
    if width == 0 || bytes.len() % width != 0 {
        return Err(RuntimeError::LengthMismatch {
            expected: bytes.len().next_multiple_of(width.max(1)),
            found: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(width)
        .map(|chunk| Integer::from_digits(chunk, Order::Lsf))
        .collect())
}
