//! DDR memory allocation
//!
//! A single bump cursor hands out regions in four passes:
//!
//! ```text
//! base ─► outputs ─► instructions ─► shared params ─► operand 0 ─► operand 1 ─► cursor
//! ```
//!
//! Outputs and operands are laid out in global batch order, so each of them
//! is one contiguous vector in element order. Regions are never reused
//! within a compile.

use crate::error::{CompileError, Result};
use crate::split::TaskSplit;
use modacc_isa::{Program, CHIP_INST_DEPTH, CHIP_WORD_BYTES};
use std::fmt;

/// Contiguous byte range of accelerator DDR
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DdrRegion {
    pub address: u64,
    pub length: u64,
}

impl DdrRegion {
    pub const fn new(address: u64, length: u64) -> Self {
        Self { address, length }
    }

    #[inline]
    pub const fn end(&self) -> u64 {
        self.address + self.length
    }

    pub const fn overlaps(&self, other: &DdrRegion) -> bool {
        self.address < other.end() && other.address < self.end()
    }

    /// Address as carried by the 32-bit wire fields
    #[inline]
    pub const fn wire_address(&self) -> u32 {
        self.address as u32
    }

    /// Smallest region covering `regions`
    pub fn span<'a>(regions: impl IntoIterator<Item = &'a DdrRegion>) -> Option<DdrRegion> {
        regions.into_iter().fold(None, |acc, r| match acc {
            None => Some(*r),
            Some(a) => {
                let start = a.address.min(r.address);
                Some(DdrRegion::new(start, a.end().max(r.end()) - start))
            }
        })
    }
}

impl fmt::Display for DdrRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.address, self.end())
    }
}

/// Bump allocator over `[base, limit)`
#[derive(Debug)]
pub struct MemoryAllocator {
    cursor: u64,
    limit: u64,
}

impl MemoryAllocator {
    pub fn new(base: u64, limit: u64) -> Self {
        Self { cursor: base, limit }
    }

    #[inline]
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Take the next `length` bytes
    pub fn alloc(&mut self, length: u64) -> Result<DdrRegion> {
        let end = self.cursor.checked_add(length).filter(|&end| end <= self.limit);
        let Some(end) = end else {
            return Err(CompileError::OutOfDdrSpace {
                requested: length,
                cursor: self.cursor,
                limit: self.limit,
            });
        };
        let region = DdrRegion::new(self.cursor, length);
        self.cursor = end;
        Ok(region)
    }

    /// Pass 1: one region per PE group, `[chip][batch][group]`
    pub fn alloc_outputs(
        &mut self,
        split: &TaskSplit,
        pes_per_chip: u32,
        program: &Program,
    ) -> Result<Vec<Vec<Vec<DdrRegion>>>> {
        let mut out: Vec<Vec<Vec<DdrRegion>>> = split
            .batches
            .iter()
            .map(|batches| vec![Vec::new(); batches.len()])
            .collect();
        for (chip, round, size) in split.global_order() {
            for group in group_sizes(size, pes_per_chip) {
                let region = self.alloc(group as u64 * program.p_bytes())?;
                out[chip][round].push(region);
            }
        }
        Ok(out)
    }

    /// Pass 2: one region per generated chip stream, `[chip][batch]`
    pub fn alloc_instructions(&mut self, words: &[Vec<usize>]) -> Result<Vec<Vec<DdrRegion>>> {
        let mut inst = Vec::with_capacity(words.len());
        for (chip, batches) in words.iter().enumerate() {
            let mut regions = Vec::with_capacity(batches.len());
            for (round, &count) in batches.iter().enumerate() {
                if count > CHIP_INST_DEPTH {
                    return Err(CompileError::TooManyInstructions {
                        count,
                        limit: CHIP_INST_DEPTH,
                        scope: format!("chip {chip} batch {round}"),
                    });
                }
                regions.push(self.alloc((count * CHIP_WORD_BYTES) as u64)?);
            }
            inst.push(regions);
        }
        Ok(inst)
    }

    /// Pass 3: the shared-parameter block
    pub fn alloc_params(&mut self, program: &Program) -> Result<DdrRegion> {
        self.alloc(program.param_bytes())
    }

    /// Pass 4: one region per operand and batch, `[operand][chip][batch]`
    pub fn alloc_operands(
        &mut self,
        split: &TaskSplit,
        program: &Program,
    ) -> Result<Vec<Vec<Vec<DdrRegion>>>> {
        let operand_count = program.operation.template().operands.len();
        let mut operands = Vec::with_capacity(operand_count);
        for index in 0..operand_count {
            let element = program.operand_bytes(index);
            let mut per_chip: Vec<Vec<DdrRegion>> = split
                .batches
                .iter()
                .map(|batches| Vec::with_capacity(batches.len()))
                .collect();
            for (chip, _, size) in split.global_order() {
                per_chip[chip].push(self.alloc(size as u64 * element)?);
            }
            operands.push(per_chip);
        }
        Ok(operands)
    }
}

/// Sizes of the PE groups of one batch
pub fn group_sizes(batch: u32, pes_per_chip: u32) -> impl Iterator<Item = u32> {
    let pes = pes_per_chip.max(1);
    (0..batch.div_ceil(pes)).map(move |g| (batch - g * pes).min(pes))
}

/// Every DDR region of one compile
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryAllocation {
    /// `[chip][batch][group]`
    pub out: Vec<Vec<Vec<DdrRegion>>>,
    /// `[chip][batch]`
    pub inst: Vec<Vec<DdrRegion>>,
    pub in_params: DdrRegion,
    /// `[operand][chip][batch]`
    pub operands: Vec<Vec<Vec<DdrRegion>>>,
    /// Cursor after the last pass
    pub end: u64,
}

impl MemoryAllocation {
    /// All regions in allocation order
    pub fn regions(&self) -> Vec<DdrRegion> {
        let mut all: Vec<DdrRegion> = Vec::new();
        all.extend(self.out.iter().flatten().flatten());
        all.extend(self.inst.iter().flatten());
        all.push(self.in_params);
        all.extend(self.operands.iter().flatten().flatten());
        all
    }

    /// Output vector in element order
    pub fn out_span(&self) -> DdrRegion {
        DdrRegion::span(self.out.iter().flatten().flatten()).unwrap_or_default()
    }

    /// Instruction streams, chip-major
    pub fn inst_span(&self) -> DdrRegion {
        DdrRegion::span(self.inst.iter().flatten()).unwrap_or_default()
    }

    /// Shared parameters followed by every operand vector
    pub fn input_span(&self) -> DdrRegion {
        DdrRegion::span(
            std::iter::once(&self.in_params).chain(self.operands.iter().flatten().flatten()),
        )
        .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modacc_isa::Operation;

    #[test]
    fn test_bump_allocation() {
        let mut alloc = MemoryAllocator::new(0x100, 0x1000);
        let a = alloc.alloc(0x80).unwrap();
        let b = alloc.alloc(0x20).unwrap();
        assert_eq!(a, DdrRegion::new(0x100, 0x80));
        assert_eq!(b.address, 0x180);
        assert_eq!(alloc.cursor(), 0x1A0);
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn test_out_of_space() {
        let mut alloc = MemoryAllocator::new(0, 0x100);
        alloc.alloc(0xF0).unwrap();
        let err = alloc.alloc(0x20).unwrap_err();
        assert!(matches!(
            err,
            CompileError::OutOfDdrSpace { requested: 0x20, cursor: 0xF0, limit: 0x100 }
        ));
        // a failed request leaves the cursor alone
        assert_eq!(alloc.cursor(), 0xF0);
        assert!(alloc.alloc(0x10).is_ok());
    }

    #[test]
    fn test_group_sizes() {
        assert_eq!(group_sizes(35, 16).collect::<Vec<_>>(), vec![16, 16, 3]);
        assert_eq!(group_sizes(16, 16).collect::<Vec<_>>(), vec![16]);
        assert_eq!(group_sizes(0, 16).count(), 0);
    }

    #[test]
    fn test_outputs_in_element_order() {
        let program = Program::vector(Operation::ModMul, 40, 512, 0);
        let split = TaskSplit::new(40, 2, 20);
        let mut alloc = MemoryAllocator::new(0, 1 << 30);
        let out = alloc.alloc_outputs(&split, 16, &program).unwrap();
        // chip 0 batch 0 covers elements 0..20, chip 1 batch 0 elements 20..40
        assert_eq!(out[0][0][0], DdrRegion::new(0, 16 * 64));
        assert_eq!(out[0][0][1], DdrRegion::new(16 * 64, 4 * 64));
        assert_eq!(out[1][0][0].address, 20 * 64);
        assert_eq!(alloc.cursor(), 40 * 64);
    }

    #[test]
    fn test_instruction_depth_limit() {
        let mut alloc = MemoryAllocator::new(0, 1 << 30);
        let err = alloc.alloc_instructions(&[vec![10], vec![CHIP_INST_DEPTH + 1]]).unwrap_err();
        assert!(matches!(
            err,
            CompileError::TooManyInstructions { count, .. } if count == CHIP_INST_DEPTH + 1
        ));
    }

    #[test]
    fn test_operands_are_contiguous_vectors() {
        let program = Program::vector(Operation::ModExp, 7, 1024, 512);
        let split = TaskSplit::new(7, 3, 2);
        let mut alloc = MemoryAllocator::new(0, 1 << 30);
        let operands = alloc.alloc_operands(&split, &program).unwrap();
        let first = DdrRegion::span(operands[0].iter().flatten()).unwrap();
        let second = DdrRegion::span(operands[1].iter().flatten()).unwrap();
        assert_eq!(first, DdrRegion::new(0, 7 * 128));
        assert_eq!(second, DdrRegion::new(7 * 128, 7 * 64));
        // chip 0 batch 1 is global batch 3, elements 6..7
        assert_eq!(operands[0][0][1], DdrRegion::new(6 * 128, 128));
    }

    #[test]
    fn test_span() {
        let regions = [DdrRegion::new(0x40, 0x10), DdrRegion::new(0x10, 0x10)];
        assert_eq!(DdrRegion::span(&regions), Some(DdrRegion::new(0x10, 0x40)));
        assert_eq!(DdrRegion::span(&[] as &[DdrRegion]), None);
    }
}
