//! # Instruction Words
//!
//! Typed views of the 64-bit chip words and 128-bit global words, with
//! `encode`/`decode` between the two representations.

use crate::encoding::*;
use crate::error::{IsaError, Result};
use crate::state::{DataType, PeState};
use crate::SRAM_DEPTH_UNITS;
use std::fmt;

/// Bytes per chip word
pub const CHIP_WORD_BYTES: usize = 8;

/// Bytes per global word
pub const GLOBAL_WORD_BYTES: usize = 16;

// ============================================================================
// Chip Words
// ============================================================================

/// Stage operand data from SRAM into PE registers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Load {
    /// SRAM address in 32-byte units
    pub address: u32,
    /// Length in 32-byte units
    pub length: u32,
    /// Destination PE code (see [`crate::DestPe`])
    pub dest_pe: u8,
    /// Destination register (see [`crate::DestReg`])
    pub dest_reg: u8,
    /// How many consecutive chunks of `length` to load
    pub repeat: u16,
    /// Advance to the next PE after each chunk
    pub change: bool,
    pub pe_gate: u8,
}

impl Load {
    /// Reject loads that would read past the operand SRAM
    pub fn check_bounds(&self) -> Result<()> {
        let span = self.length as u64 * self.repeat.max(1) as u64;
        if self.address >= SRAM_DEPTH_UNITS || self.address as u64 + span > SRAM_DEPTH_UNITS as u64 {
            return Err(IsaError::AddressOverflow {
                address: self.address,
                length: span,
                limit: SRAM_DEPTH_UNITS,
            });
        }
        Ok(())
    }
}

/// Move the PE controller between states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Control {
    pub state: u8,
    /// Compute on the transition (`true`) or hold in `state` (`false`)
    pub cal: bool,
    pub next: u8,
    pub address: u32,
    pub pe_gate: u8,
}

/// Write the results of the active PEs to DDR
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Interrupt {
    pub ddr_address: u32,
    /// Length in bytes (1-8192)
    pub length: u32,
}

/// 64-bit word executed by one chip
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChipInstruction {
    Nop,
    Load(Load),
    Control(Control),
    Interrupt(Interrupt),
}

impl ChipInstruction {
    /// Pack into a 64-bit word
    pub const fn encode(&self) -> u64 {
        match self {
            Self::Nop => 0,
            Self::Load(l) => pack_load(
                l.address, l.length, l.dest_pe, l.dest_reg, l.repeat, l.change, l.pe_gate,
            ),
            Self::Control(c) => pack_control(c.state, c.cal, c.next, c.address, c.pe_gate),
            Self::Interrupt(i) => pack_interrupt(i.ddr_address, i.length),
        }
    }

    /// Unpack a 64-bit word
    pub fn decode(word: u64) -> Result<Self> {
        let inst = match chip_tag(word) {
            TAG_NOP => Self::Nop,
            TAG_LOAD => Self::Load(Load {
                address: field64(word, LOAD_ADDRESS_SHIFT, SRAM_FIELD_MASK) as u32,
                length: field64(word, LOAD_LENGTH_SHIFT, SRAM_FIELD_MASK) as u32,
                dest_pe: field64(word, LOAD_DEST_PE_SHIFT, DEST_PE_MASK) as u8,
                dest_reg: field64(word, LOAD_DEST_REG_SHIFT, DEST_REG_MASK) as u8,
                repeat: field64(word, LOAD_REPEAT_SHIFT, REPEAT_MASK) as u16,
                change: field64(word, LOAD_CHANGE_SHIFT, FLAG_MASK) != 0,
                pe_gate: field64(word, LOAD_GATE_SHIFT, GATE_MASK) as u8,
            }),
            TAG_CONTROL => Self::Control(Control {
                state: field64(word, CONTROL_STATE_SHIFT, STATE_MASK) as u8,
                cal: field64(word, CONTROL_CAL_SHIFT, FLAG_MASK) != 0,
                next: field64(word, CONTROL_NEXT_SHIFT, STATE_MASK) as u8,
                address: field64(word, CONTROL_ADDRESS_SHIFT, SRAM_FIELD_MASK) as u32,
                pe_gate: field64(word, CONTROL_GATE_SHIFT, GATE_MASK) as u8,
            }),
            _ => Self::Interrupt(Interrupt {
                ddr_address: field64(word, INTERRUPT_ADDRESS_SHIFT, DDR_FIELD_MASK) as u32,
                length: field64(word, INTERRUPT_LENGTH_SHIFT, INTERRUPT_LENGTH_MASK) as u32 + 1,
            }),
        };

        // Reserved bits must be clear
        if inst.encode() != word {
            return Err(IsaError::InvalidEncoding(word as u128));
        }
        Ok(inst)
    }
}

impl fmt::Display for ChipInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => write!(f, "nop"),
            Self::Load(l) => write!(
                f,
                "load  sram={:#07x} len={} pe={:#04x} reg={} x{}{} gate={}",
                l.address,
                l.length,
                l.dest_pe,
                l.dest_reg,
                l.repeat,
                if l.change { " change" } else { "" },
                l.pe_gate
            ),
            Self::Control(c) => {
                let name = |raw: u8| PeState::from_u8(raw).map_or("?", PeState::name);
                write!(
                    f,
                    "ctrl  {} -{}-> {} gate={}",
                    name(c.state),
                    if c.cal { "cal" } else { "wait" },
                    name(c.next),
                    c.pe_gate
                )
            }
            Self::Interrupt(i) => write!(f, "irq   ddr={:#010x} len={}", i.ddr_address, i.length),
        }
    }
}

// ============================================================================
// Global Words
// ============================================================================

/// Bulk DDR-to-chip transfer (L1)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Transfer {
    pub chip_mask: u16,
    pub ddr_address: u32,
    /// Length in bytes
    pub length: u64,
    pub data_type: u8,
    /// Destination in 32-byte SRAM units (instruction transfers use 0)
    pub data_address: u32,
    pub check: bool,
}

/// Synchronization barrier over `times` segments of the addressed chips
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Repeat {
    pub chip_mask: u16,
    pub times: u32,
}

/// Chip register write or control command
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegisterAccess {
    pub chip_mask: u16,
    pub data_type: u8,
    pub data_address: u32,
    pub data: u32,
}

/// 128-bit word executed by the board sequencer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GlobalInstruction {
    Nop,
    Transfer(Transfer),
    Repeat(Repeat),
    RegisterAccess(RegisterAccess),
    Done,
}

impl GlobalInstruction {
    /// Repeat with an empty chip mask: drain outstanding transfers
    pub const WAIT: Self = Self::Repeat(Repeat { chip_mask: 0, times: 1 });

    /// Pack into a 128-bit word
    pub const fn encode(&self) -> u128 {
        match self {
            Self::Nop => 0,
            Self::Transfer(t) => pack_transfer(
                t.chip_mask,
                t.ddr_address,
                t.length,
                t.data_type,
                t.data_address,
                t.check,
            ),
            Self::Repeat(r) => pack_repeat(r.chip_mask, r.times),
            Self::RegisterAccess(r) => pack_register(r.chip_mask, r.data_type, r.data_address, r.data),
            Self::Done => pack_done(),
        }
    }

    /// Unpack a 128-bit word
    pub fn decode(word: u128) -> Result<Self> {
        let mask = field128(word, CHIP_MASK_SHIFT, CHIP_MASK_MASK) as u16;
        let inst = match global_tag(word) {
            _ if word == 0 => Self::Nop,
            TAG_TRANSFER => Self::Transfer(Transfer {
                chip_mask: mask,
                ddr_address: field128(word, TRANSFER_DDR_SHIFT, WIDE_FIELD_MASK) as u32,
                length: field128(word, TRANSFER_LENGTH_SHIFT, WIDE_FIELD_MASK) as u64 + 1,
                data_type: field128(word, TRANSFER_TYPE_SHIFT, DATA_TYPE_MASK) as u8,
                data_address: field128(word, TRANSFER_DATA_ADDRESS_SHIFT, WIDE_FIELD_MASK) as u32,
                check: field128(word, TRANSFER_CHECK_SHIFT, 1) != 0,
            }),
            TAG_REPEAT => Self::Repeat(Repeat {
                chip_mask: mask,
                times: field128(word, REPEAT_TIMES_SHIFT, REPEAT_TIMES_MASK) as u32 + 1,
            }),
            TAG_REGISTER => Self::RegisterAccess(RegisterAccess {
                chip_mask: mask,
                data_type: field128(word, REGISTER_TYPE_SHIFT, DATA_TYPE_MASK) as u8,
                data_address: field128(word, REGISTER_ADDRESS_SHIFT, WIDE_FIELD_MASK) as u32,
                data: field128(word, REGISTER_DATA_SHIFT, WIDE_FIELD_MASK) as u32,
            }),
            TAG_DONE => Self::Done,
            _ => return Err(IsaError::InvalidEncoding(word)),
        };

        if inst.encode() != word {
            return Err(IsaError::InvalidEncoding(word));
        }
        Ok(inst)
    }
}

impl fmt::Display for GlobalInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = |raw: u8| match DataType::from_u8(raw) {
            Some(DataType::WriteData) => "data",
            Some(DataType::WriteInst) => "inst",
            Some(DataType::WriteInstLength) => "inst_len",
            Some(DataType::InstReset) => "inst_reset",
            Some(DataType::WriteReg) => "w_reg",
            Some(DataType::ReadReg) => "r_reg",
            None => "?",
        };
        match self {
            Self::Nop => write!(f, "nop"),
            Self::Transfer(t) => write!(
                f,
                "l1     chips={:#06x} ddr={:#010x} len={} {} sram={:#x}",
                t.chip_mask,
                t.ddr_address,
                t.length,
                kind(t.data_type),
                t.data_address
            ),
            Self::Repeat(r) if r.chip_mask == 0 => write!(f, "wait"),
            Self::Repeat(r) => write!(f, "repeat chips={:#06x} x{}", r.chip_mask, r.times),
            Self::RegisterAccess(r) => write!(
                f,
                "reg    chips={:#06x} {} addr={:#x} data={}",
                r.chip_mask,
                kind(r.data_type),
                r.data_address,
                r.data
            ),
            Self::Done => write!(f, "done"),
        }
    }
}
