//! Board-level sequencing
//!
//! Turns the per-chip, per-batch streams into the 128-bit global stream:
//!
//! ```text
//! bring-up   nop, unlock pin mux, inst reset, L1 shared params to all chips, wait
//! per batch  inst reset
//!            L1 operand slices per active chip, wait
//!            L1 instruction stream per active chip, wait
//!            announce first segment per active chip
//!            synchronization tiers (announce + repeat)
//! end        inst reset, done
//! ```
//!
//! Chips whose batches end at different lengths are released in cumulative
//! tiers: tier `l` addresses every chip with at least `rem_l` instructions
//! left, announces the difference to the previous tier and repeats over the
//! segment difference. Chips with shorter queues drop out of later tiers
//! instead of idling on them.

use crate::alloc::MemoryAllocation;
use crate::error::{CompileError, Result};
use crate::generator::{ChipStream, SramLayout};
use crate::split::TaskSplit;
use modacc_isa::{
    DataType, GlobalInstruction, Program, RegisterAccess, Repeat, Topology, Transfer,
    GLOBAL_INST_DEPTH, PIN_MUX_REGISTER,
};
use tracing::trace;

/// Remaining work of one chip after its first segment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChipRemainder {
    pub mask: u16,
    /// Instructions left in the batch
    pub words: usize,
    /// Segments left in the batch
    pub segments: usize,
}

/// Global stream builder
pub struct FpgaSequencer<'a> {
    topology: &'a Topology,
    program: &'a Program,
}

impl<'a> FpgaSequencer<'a> {
    pub fn new(topology: &'a Topology, program: &'a Program) -> Self {
        Self { topology, program }
    }

    /// Build the global stream. `streams` is indexed `[chip][batch]`.
    pub fn sequence(
        &self,
        split: &TaskSplit,
        allocation: &MemoryAllocation,
        streams: &[Vec<ChipStream>],
    ) -> Result<Vec<GlobalInstruction>> {
        let all = self.topology.all_chips_mask();
        let mut global = self.bring_up(all, allocation);

        for round in 0..split.num_rounds() {
            global.push(register(all, DataType::InstReset, 0, 0));

            let active: Vec<usize> = split.active_chips(round).collect();
            for &chip in &active {
                let batch = split.batch(chip, round).unwrap_or(0);
                let layout = SramLayout::new(self.program, batch);
                for (operand, base) in layout.operand_bases.iter().enumerate() {
                    let region = allocation.operands[operand][chip][round];
                    global.push(GlobalInstruction::Transfer(Transfer {
                        chip_mask: self.topology.chip_mask(chip),
                        ddr_address: region.wire_address(),
                        length: region.length,
                        data_type: DataType::WriteData.to_u8(),
                        data_address: *base,
                        check: false,
                    }));
                }
            }
            global.push(GlobalInstruction::WAIT);

            for &chip in &active {
                let region = allocation.inst[chip][round];
                global.push(GlobalInstruction::Transfer(Transfer {
                    chip_mask: self.topology.chip_mask(chip),
                    ddr_address: region.wire_address(),
                    length: region.length,
                    data_type: DataType::WriteInst.to_u8(),
                    data_address: 0,
                    check: false,
                }));
            }
            global.push(GlobalInstruction::WAIT);

            let mut remainders = Vec::with_capacity(active.len());
            for &chip in &active {
                let stream = &streams[chip][round];
                let first = stream.splits.first().copied().unwrap_or(stream.len());
                let mask = self.topology.chip_mask(chip);
                global.push(register(mask, DataType::WriteInstLength, 0, first as u32));
                remainders.push(ChipRemainder {
                    mask,
                    words: stream.len() - first,
                    segments: stream.splits.len().saturating_sub(1),
                });
            }
            let tiers = sync_tiers(&remainders);
            trace!(round, chips = active.len(), tiers = tiers.len() / 2, "sequenced batch");
            global.extend(tiers);
        }

        global.push(register(all, DataType::InstReset, 0, 0));
        global.push(GlobalInstruction::Done);

        if global.len() > GLOBAL_INST_DEPTH {
            return Err(CompileError::TooManyInstructions {
                count: global.len(),
                limit: GLOBAL_INST_DEPTH,
                scope: "global stream".into(),
            });
        }
        Ok(global)
    }

    fn bring_up(&self, all: u16, allocation: &MemoryAllocation) -> Vec<GlobalInstruction> {
        vec![
            GlobalInstruction::Nop,
            register(all, DataType::WriteReg, PIN_MUX_REGISTER, 0),
            register(all, DataType::InstReset, 0, 0),
            GlobalInstruction::Transfer(Transfer {
                chip_mask: all,
                ddr_address: allocation.in_params.wire_address(),
                length: allocation.in_params.length,
                data_type: DataType::WriteData.to_u8(),
                data_address: 0,
                check: false,
            }),
            GlobalInstruction::WAIT,
        ]
    }
}

fn register(chip_mask: u16, data_type: DataType, data_address: u32, data: u32) -> GlobalInstruction {
    GlobalInstruction::RegisterAccess(RegisterAccess {
        chip_mask,
        data_type: data_type.to_u8(),
        data_address,
        data,
    })
}

/// Announce/repeat pairs releasing every chip's remaining work
pub fn sync_tiers(remainders: &[ChipRemainder]) -> Vec<GlobalInstruction> {
    let words = levels(remainders.iter().map(|r| r.words));
    let segments = levels(remainders.iter().map(|r| r.segments));

    let mut tiers = Vec::with_capacity(words.len() + segments.len());
    for tier in 0..words.len().max(segments.len()) {
        if let Some(&level) = words.get(tier) {
            let prev = tier.checked_sub(1).map_or(0, |t| words[t]);
            let mask = chips_at_least(remainders, level, |r| r.words);
            tiers.push(register(mask, DataType::WriteInstLength, 0, (level - prev) as u32));
        }
        if let Some(&level) = segments.get(tier) {
            let prev = tier.checked_sub(1).map_or(0, |t| segments[t]);
            tiers.push(GlobalInstruction::Repeat(Repeat {
                chip_mask: chips_at_least(remainders, level, |r| r.segments),
                times: (level - prev) as u32,
            }));
        }
    }
    tiers
}

/// Distinct non-zero values, ascending
fn levels(values: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut levels: Vec<usize> = values.filter(|&v| v > 0).collect();
    levels.sort_unstable();
    levels.dedup();
    levels
}

fn chips_at_least(
    remainders: &[ChipRemainder],
    level: usize,
    key: impl Fn(&ChipRemainder) -> usize,
) -> u16 {
    remainders
        .iter()
        .filter(|r| key(r) >= level)
        .fold(0, |mask, r| mask | r.mask)
}
