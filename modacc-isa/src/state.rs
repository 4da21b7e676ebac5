//! # PE States, Registers and Transfer Types
//!
//! Named values for the raw fields carried by chip and global words.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing-element controller state (8 bits)
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeState {
    Idle = 0x00,
    LoadPara = 0x01,
    /// Montgomery product with the R² register
    ElementRSquare = 0x02,
    EleModMul = 0x03,
    EleModExp = 0x04,
    /// Modular inverse, or modular add when the parameter word selects the add case
    EleModInv = 0x05,
    /// Modular inverse against the preloaded constant modulus
    EleModInvP = 0x06,
    VecOutputResults = 0x07,
    /// Signed exponentiation step of the fused exp-mul-exp path
    ExpInvExp = 0x31,
    ExpInvMul = 0x32,
    ExpInvCom = 0x33,
    ExpExpExp = 0x34,
    ExpExpMul = 0x35,
    ExpExpCom = 0x36,
    Completed = 0xFF,
}

impl PeState {
    /// Convert to the raw field value
    #[inline]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a raw field value
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Idle),
            0x01 => Some(Self::LoadPara),
            0x02 => Some(Self::ElementRSquare),
            0x03 => Some(Self::EleModMul),
            0x04 => Some(Self::EleModExp),
            0x05 => Some(Self::EleModInv),
            0x06 => Some(Self::EleModInvP),
            0x07 => Some(Self::VecOutputResults),
            0x31 => Some(Self::ExpInvExp),
            0x32 => Some(Self::ExpInvMul),
            0x33 => Some(Self::ExpInvCom),
            0x34 => Some(Self::ExpExpExp),
            0x35 => Some(Self::ExpExpMul),
            0x36 => Some(Self::ExpExpCom),
            0xFF => Some(Self::Completed),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::LoadPara => "LOAD_PARA",
            Self::ElementRSquare => "ELEMENT_RSQUARE",
            Self::EleModMul => "ELE_MOD_MUL",
            Self::EleModExp => "ELE_MOD_EXP",
            Self::EleModInv => "ELE_MOD_INV",
            Self::EleModInvP => "ELE_MOD_INV_P",
            Self::VecOutputResults => "VEC_OUTPUT_RESULTS",
            Self::ExpInvExp => "EXP_INV_EXP",
            Self::ExpInvMul => "EXP_INV_MUL",
            Self::ExpInvCom => "EXP_INV_COM",
            Self::ExpExpExp => "EXP_EXP_EXP",
            Self::ExpExpMul => "EXP_EXP_MUL",
            Self::ExpExpCom => "EXP_EXP_COM",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for PeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-PE register file index (4 bits)
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DestReg {
    Activation = 0,
    A = 1,
    B = 2,
    Weight = 3,
    RSquare = 4,
    RMont = 5,
    NPrime = 6,
    P = 7,
    Param = 8,
}

impl DestReg {
    /// Number of addressable registers per PE
    pub const COUNT: usize = 9;

    #[inline]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Activation),
            1 => Some(Self::A),
            2 => Some(Self::B),
            3 => Some(Self::Weight),
            4 => Some(Self::RSquare),
            5 => Some(Self::RMont),
            6 => Some(Self::NPrime),
            7 => Some(Self::P),
            8 => Some(Self::Param),
            _ => None,
        }
    }
}

/// Destination selector of a Load (6 bits)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DestPe {
    /// Every PE on the chip
    All,
    /// One of the four groups of four PEs
    Group(u8),
    /// A single PE; with the change flag set, the first of a run of PEs
    Pe(u8),
}

impl DestPe {
    const ALL_BITS: u8 = 0b10_1111;
    const GROUP_FLAG: u8 = 0b10_0000;

    pub const fn to_bits(self) -> u8 {
        match self {
            Self::All => Self::ALL_BITS,
            Self::Group(k) => Self::GROUP_FLAG | (1 << (k & 0b11)),
            Self::Pe(n) => n & 0b1_1111,
        }
    }

    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            Self::ALL_BITS => Some(Self::All),
            0b10_0001 => Some(Self::Group(0)),
            0b10_0010 => Some(Self::Group(1)),
            0b10_0100 => Some(Self::Group(2)),
            0b10_1000 => Some(Self::Group(3)),
            n if n < Self::GROUP_FLAG => Some(Self::Pe(n)),
            _ => None,
        }
    }
}

/// Transfer and register-access data type (3 bits)
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    /// DDR to on-chip operand SRAM
    WriteData = 0,
    /// DDR to the chip instruction buffer
    WriteInst = 1,
    /// Announce how many queued instructions a chip may execute
    WriteInstLength = 2,
    /// Rewind the chip instruction pointers
    InstReset = 3,
    WriteReg = 4,
    ReadReg = 5,
}

impl DataType {
    #[inline]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::WriteData),
            1 => Some(Self::WriteInst),
            2 => Some(Self::WriteInstLength),
            3 => Some(Self::InstReset),
            4 => Some(Self::WriteReg),
            5 => Some(Self::ReadReg),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pe_state_roundtrip() {
        for raw in 0..=255u8 {
            if let Some(state) = PeState::from_u8(raw) {
                assert_eq!(state.to_u8(), raw);
            }
        }
        assert_eq!(PeState::from_u8(0x08), None);
        assert_eq!(PeState::ExpInvCom.to_u8(), 0x33);
    }

    #[test]
    fn test_pe_state_display() {
        assert_eq!(PeState::VecOutputResults.to_string(), "VEC_OUTPUT_RESULTS");
    }

    #[test]
    fn test_dest_pe_codes() {
        assert_eq!(DestPe::All.to_bits(), 0b101111);
        assert_eq!(DestPe::Group(0).to_bits(), 0b100001);
        assert_eq!(DestPe::Group(3).to_bits(), 0b101000);
        assert_eq!(DestPe::Pe(7).to_bits(), 7);
        assert_eq!(DestPe::from_bits(0b101111), Some(DestPe::All));
        assert_eq!(DestPe::from_bits(0b100100), Some(DestPe::Group(2)));
        assert_eq!(DestPe::from_bits(15), Some(DestPe::Pe(15)));
        assert_eq!(DestPe::from_bits(0b111111), None);
    }

    #[test]
    fn test_dest_reg_values() {
        assert_eq!(DestReg::Param.to_u8(), 8);
        assert_eq!(DestReg::from_u8(4), Some(DestReg::RSquare));
        assert_eq!(DestReg::from_u8(9), None);
    }

    #[test]
    fn test_data_type_values() {
        assert_eq!(DataType::InstReset.to_u8(), 3);
        assert_eq!(DataType::from_u8(2), Some(DataType::WriteInstLength));
        assert_eq!(DataType::from_u8(6), None);
    }
}
