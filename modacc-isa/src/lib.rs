//! # Modular-Arithmetic Accelerator ISA
//!
//! Instruction set of a multi-chip modular-arithmetic accelerator: each chip
//! runs a stream of 64-bit words over its processing elements (PEs), and a
//! board sequencer runs a stream of 128-bit global words that moves data
//! between DDR and the chips and keeps the chips in step.
//!
//! ## Key Features
//! - 64-bit chip words: Load, Control, Interrupt
//! - 128-bit global words: L1 transfer, Repeat, RegisterAccess, Done
//! - Field overflow truncates by masking, as the hardware does
//! - Eleven vector operations described as data-driven phase scripts
//! - Configurable board topology (chips, PEs, DDR size, batch size)

pub mod config;
pub mod encoding;
pub mod error;
pub mod instruction;
pub mod operation;
pub mod program;
pub mod state;

pub use config::{ConfigError, Topology, CHIP_SLOTS};
pub use error::{IsaError, Result};
pub use instruction::{
    ChipInstruction, Control, GlobalInstruction, Interrupt, Load, RegisterAccess, Repeat,
    Transfer, CHIP_WORD_BYTES, GLOBAL_WORD_BYTES,
};
pub use operation::{
    ConstSlot, OpTemplate, OperandShape, Operation, PhaseStep, SlotRole, SlotSize,
};
pub use program::{ParamWord, Program, ProgramKind};
pub use state::{DataType, DestPe, DestReg, PeState};

/// Operand SRAM depth per chip, in 32-byte units (80 Ki units)
pub const SRAM_DEPTH_UNITS: u32 = 80 * 1024;

/// Bytes per SRAM unit
pub const SRAM_UNIT_BYTES: u32 = 32;

/// Bits per SRAM unit
pub const SRAM_UNIT_BITS: u32 = SRAM_UNIT_BYTES * 8;

/// Chip instruction buffer depth, in 64-bit words
pub const CHIP_INST_DEPTH: usize = 16 * 1024;

/// Board sequencer stream depth, in 128-bit words
pub const GLOBAL_INST_DEPTH: usize = 4096;

/// Address field value carried by every Control word
pub const CONTROL_ADDRESS: u32 = 0x3FFFF;

/// Pin-mux control register (cleared during bring-up to lock the PLLs)
pub const PIN_MUX_REGISTER: u32 = 0x68;

/// Instruction-flag register
pub const INST_FLAG_REGISTER: u32 = 0xD0;

/// Largest vector slice one chip holds on-chip
pub const MAX_ON_CHIP_VECTOR: u32 = 2048;

/// Bytes in the parameter-word unit
pub const PARAM_BLOCK_BYTES: usize = 32;

/// Supported modulus widths
pub const SUPPORTED_P_BITS: [u32; 5] = [512, 1024, 2048, 3072, 4096];
