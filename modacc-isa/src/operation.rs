//! # Vector Operations and Their Phase Scripts
//!
//! Every operation the accelerator runs follows the same three-phase shape:
//! a Start phase that stages constant slots from the shared-parameter block
//! into broadcast registers, a Middle phase repeated once per PE group, and
//! an End phase that parks the PEs. What differs per operation is data: the
//! constant slots, the streamed operands, and the Middle script. This module
//! holds that data as one static table of [`OpTemplate`]s.
//!
//! ```text
//! Idle -> LoadPara -> Compute(phases...) -> VecOutputResults -> Idle
//! ```

use crate::state::{DestReg, PeState};
use crate::SRAM_UNIT_BITS;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Vector operation kinds
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// c[i] = a[i]·b[i] mod p
    ModMul = 0,
    /// c[i] = a[i]·k mod p
    ModMulConst = 1,
    /// c[i] = a[i]^b[i] mod p
    ModExp = 2,
    /// c[i] = k^b[i] mod p
    ModExpConstA = 3,
    /// c[i] = a[i]^k mod p
    ModExpConstE = 4,
    /// c[i] = a[i] + b[i] mod p
    ModAdd = 5,
    /// c[i] = a[i] + k mod p
    ModAddConst = 6,
    /// c[i] = a[i]·b[i]·R⁻¹ mod p
    Mont = 7,
    /// c[i] = a[i]·k·R⁻¹ mod p
    MontConst = 8,
    /// c[i] = a[i]⁻¹ mod k
    ModInvConstP = 9,
    /// c[i] = g^m[i]·r[i]^n mod n²
    PaillierEnc = 10,
}

impl Operation {
    pub const ALL: [Operation; 11] = [
        Self::ModMul,
        Self::ModMulConst,
        Self::ModExp,
        Self::ModExpConstA,
        Self::ModExpConstE,
        Self::ModAdd,
        Self::ModAddConst,
        Self::Mont,
        Self::MontConst,
        Self::ModInvConstP,
        Self::PaillierEnc,
    ];

    #[inline]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        if (value as usize) < Self::ALL.len() {
            Some(Self::ALL[value as usize])
        } else {
            None
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::ModMul => "MOD_MUL",
            Self::ModMulConst => "MOD_MUL_CONST",
            Self::ModExp => "MOD_EXP",
            Self::ModExpConstA => "MOD_EXP_CONST_A",
            Self::ModExpConstE => "MOD_EXP_CONST_E",
            Self::ModAdd => "MOD_ADD",
            Self::ModAddConst => "MOD_ADD_CONST",
            Self::Mont => "MONT",
            Self::MontConst => "MONT_CONST",
            Self::ModInvConstP => "MOD_INV_CONST_P",
            Self::PaillierEnc => "PAILLIER_ENC",
        }
    }

    /// The phase script of this operation
    #[inline]
    pub fn template(self) -> &'static OpTemplate {
        &TEMPLATES[self as usize]
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Template Building Blocks
// ============================================================================

/// Size class of a constant slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotSize {
    /// One 256-bit SRAM unit
    Unit,
    /// p_bits wide
    Modulus,
    /// e_bits wide
    Exponent,
}

impl SlotSize {
    #[inline]
    pub const fn bits(self, p_bits: u32, e_bits: u32) -> u32 {
        match self {
            Self::Unit => SRAM_UNIT_BITS,
            Self::Modulus => p_bits,
            Self::Exponent => e_bits,
        }
    }
}

/// What the host stores in a constant slot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotRole {
    /// 32-byte parameter word block
    Param,
    /// The modulus (for ModInvConstP: the constant the inverse is taken against)
    Modulus,
    /// −p⁻¹ mod 2²⁵⁶
    NPrime,
    /// R² mod p, R = 2^p_bits
    RSquare,
    /// R mod p
    RMont,
    /// The caller's scalar constant
    Constant,
    /// 2·n, the signed exponent that raises the blinding factor to n
    PaillierExponent,
    /// g = n + 1
    PaillierGenerator,
}

/// One entry of the shared-parameter block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConstSlot {
    pub role: SlotRole,
    pub size: SlotSize,
    pub reg: DestReg,
    pub change: bool,
    /// Loaded by the Start phase; otherwise only reachable through a Middle broadcast
    pub preload: bool,
}

impl ConstSlot {
    const fn new(role: SlotRole, size: SlotSize, reg: DestReg) -> Self {
        Self { role, size, reg, change: false, preload: true }
    }

    const fn changing(self) -> Self {
        Self { change: true, ..self }
    }

    const fn deferred(self) -> Self {
        Self { preload: false, ..self }
    }
}

/// Width of one streamed operand element: p_bits·p_num/p_den + e_bits·e_mult
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperandShape {
    pub p_num: u32,
    pub p_den: u32,
    pub e_mult: u32,
}

impl OperandShape {
    pub const MODULUS: Self = Self { p_num: 1, p_den: 1, e_mult: 0 };
    pub const EXPONENT: Self = Self { p_num: 0, p_den: 1, e_mult: 1 };
    pub const HALF_MODULUS: Self = Self { p_num: 1, p_den: 2, e_mult: 0 };

    #[inline]
    pub const fn bits(&self, p_bits: u32, e_bits: u32) -> u32 {
        p_bits * self.p_num / self.p_den + e_bits * self.e_mult
    }
}

/// One step of the Middle phase script
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseStep {
    /// Compute on the transition `state -> next`
    Step { state: PeState, next: PeState },
    /// Hold in `state` until the loads land
    Wait { state: PeState },
    /// Load one element of an operand into each active PE
    Stream { operand: usize, reg: DestReg },
    /// Reload a constant slot into every PE
    Broadcast { slot: usize, reg: DestReg },
    /// Write the group's results and close a split segment
    Interrupt,
}

/// Per-operation constant data driving the generic generator
#[derive(Debug)]
pub struct OpTemplate {
    pub operation: Operation,
    /// Shared-parameter block layout, in SRAM order
    pub slots: &'static [ConstSlot],
    /// Streamed per-element operands
    pub operands: &'static [OperandShape],
    /// Middle phase script
    pub middle: &'static [PhaseStep],
    /// Main compute state (first compute state for multi-phase scripts)
    pub compute_state: PeState,
    /// ELE_MOD_INV computes an addition
    pub add_case: bool,
}

impl OpTemplate {
    /// Number of p-sized, e-sized and unit-sized constant slots
    pub fn const_counts(&self) -> (u32, u32, u32) {
        self.slots.iter().fold((0, 0, 0), |(p, e, u), slot| match slot.size {
            SlotSize::Modulus => (p + 1, e, u),
            SlotSize::Exponent => (p, e + 1, u),
            SlotSize::Unit => (p, e, u + 1),
        })
    }

    /// Shared-parameter block size in bytes
    pub fn param_bytes(&self, p_bits: u32, e_bits: u32) -> u64 {
        let bits: u64 = self
            .slots
            .iter()
            .map(|slot| slot.size.bits(p_bits, e_bits) as u64)
            .sum();
        bits / 8
    }

    /// Shared-parameter block size in SRAM units
    pub fn param_units(&self, p_bits: u32, e_bits: u32) -> u32 {
        (self.param_bytes(p_bits, e_bits) * 8 / SRAM_UNIT_BITS as u64) as u32
    }

    /// Whether e_bits is meaningful for this operation
    pub fn uses_exponent(&self) -> bool {
        self.slots.iter().any(|s| s.size == SlotSize::Exponent)
            || self.operands.iter().any(|o| o.e_mult > 0)
    }

    /// Whether the Start phase preloads R²
    pub fn preloads_r_square(&self) -> bool {
        self.slots.iter().any(|s| s.role == SlotRole::RSquare)
    }
}

// ============================================================================
// Template Table
// ============================================================================

const PARAM: ConstSlot = ConstSlot::new(SlotRole::Param, SlotSize::Unit, DestReg::Param);
const MODULUS: ConstSlot = ConstSlot::new(SlotRole::Modulus, SlotSize::Modulus, DestReg::P);
const N_PRIME: ConstSlot = ConstSlot::new(SlotRole::NPrime, SlotSize::Unit, DestReg::NPrime);
const R_SQUARE: ConstSlot = ConstSlot::new(SlotRole::RSquare, SlotSize::Modulus, DestReg::RSquare);
const R_MONT: ConstSlot = ConstSlot::new(SlotRole::RMont, SlotSize::Modulus, DestReg::RMont);

const fn constant(size: SlotSize, reg: DestReg) -> ConstSlot {
    ConstSlot::new(SlotRole::Constant, size, reg)
}

const fn two_operand_middle(compute: PeState, second: DestReg) -> [PhaseStep; 8] {
    [
        PhaseStep::Step { state: PeState::Idle, next: PeState::LoadPara },
        PhaseStep::Step { state: PeState::LoadPara, next: compute },
        PhaseStep::Wait { state: compute },
        PhaseStep::Stream { operand: 0, reg: DestReg::A },
        PhaseStep::Stream { operand: 1, reg: second },
        PhaseStep::Interrupt,
        PhaseStep::Step { state: compute, next: PeState::VecOutputResults },
        PhaseStep::Step { state: PeState::VecOutputResults, next: PeState::Idle },
    ]
}

const fn one_operand_middle(compute: PeState, reg: DestReg) -> [PhaseStep; 7] {
    [
        PhaseStep::Step { state: PeState::Idle, next: PeState::LoadPara },
        PhaseStep::Step { state: PeState::LoadPara, next: compute },
        PhaseStep::Wait { state: compute },
        PhaseStep::Stream { operand: 0, reg },
        PhaseStep::Interrupt,
        PhaseStep::Step { state: compute, next: PeState::VecOutputResults },
        PhaseStep::Step { state: PeState::VecOutputResults, next: PeState::Idle },
    ]
}

const MUL_MIDDLE: [PhaseStep; 8] = two_operand_middle(PeState::EleModMul, DestReg::B);
const MUL_CONST_MIDDLE: [PhaseStep; 7] = one_operand_middle(PeState::EleModMul, DestReg::A);
const EXP_MIDDLE: [PhaseStep; 8] = two_operand_middle(PeState::EleModExp, DestReg::B);
const EXP_CONST_E_MIDDLE: [PhaseStep; 7] = one_operand_middle(PeState::EleModExp, DestReg::A);
const EXP_CONST_A_MIDDLE: [PhaseStep; 7] = one_operand_middle(PeState::EleModExp, DestReg::B);
const ADD_MIDDLE: [PhaseStep; 8] = two_operand_middle(PeState::EleModInv, DestReg::B);
const ADD_CONST_MIDDLE: [PhaseStep; 7] = one_operand_middle(PeState::EleModInv, DestReg::A);
const MONT_MIDDLE: [PhaseStep; 8] = two_operand_middle(PeState::ElementRSquare, DestReg::RSquare);
const MONT_CONST_MIDDLE: [PhaseStep; 7] = one_operand_middle(PeState::ElementRSquare, DestReg::A);
const INV_MIDDLE: [PhaseStep; 7] = one_operand_middle(PeState::EleModInvP, DestReg::A);

/// Slot indices of the deferred Paillier constants
const PAILLIER_EXPONENT_SLOT: usize = 5;
const PAILLIER_GENERATOR_SLOT: usize = 6;

/// g^m (sign-aware), then r^n, multiplied together
const PAILLIER_MIDDLE: [PhaseStep; 15] = [
    PhaseStep::Step { state: PeState::Idle, next: PeState::LoadPara },
    PhaseStep::Step { state: PeState::LoadPara, next: PeState::ExpInvExp },
    PhaseStep::Wait { state: PeState::ExpInvExp },
    PhaseStep::Broadcast { slot: PAILLIER_GENERATOR_SLOT, reg: DestReg::A },
    PhaseStep::Stream { operand: 0, reg: DestReg::B },
    PhaseStep::Step { state: PeState::ExpInvExp, next: PeState::ExpInvMul },
    PhaseStep::Step { state: PeState::ExpInvMul, next: PeState::ExpInvExp },
    PhaseStep::Wait { state: PeState::ExpInvExp },
    PhaseStep::Stream { operand: 1, reg: DestReg::A },
    PhaseStep::Broadcast { slot: PAILLIER_EXPONENT_SLOT, reg: DestReg::B },
    PhaseStep::Step { state: PeState::ExpInvExp, next: PeState::ExpInvMul },
    PhaseStep::Step { state: PeState::ExpInvMul, next: PeState::ExpInvCom },
    PhaseStep::Interrupt,
    PhaseStep::Step { state: PeState::ExpInvCom, next: PeState::VecOutputResults },
    PhaseStep::Step { state: PeState::VecOutputResults, next: PeState::Idle },
];

const P: OperandShape = OperandShape::MODULUS;
const E: OperandShape = OperandShape::EXPONENT;

static TEMPLATES: [OpTemplate; 11] = [
    OpTemplate {
        operation: Operation::ModMul,
        slots: &[PARAM, MODULUS, N_PRIME, R_SQUARE],
        operands: &[P, P],
        middle: &MUL_MIDDLE,
        compute_state: PeState::EleModMul,
        add_case: false,
    },
    OpTemplate {
        operation: Operation::ModMulConst,
        slots: &[
            PARAM,
            MODULUS,
            N_PRIME,
            R_SQUARE,
            constant(SlotSize::Modulus, DestReg::B).changing(),
        ],
        operands: &[P],
        middle: &MUL_CONST_MIDDLE,
        compute_state: PeState::EleModMul,
        add_case: false,
    },
    OpTemplate {
        operation: Operation::ModExp,
        slots: &[PARAM, MODULUS, N_PRIME, R_SQUARE],
        operands: &[P, E],
        middle: &EXP_MIDDLE,
        compute_state: PeState::EleModExp,
        add_case: false,
    },
    OpTemplate {
        operation: Operation::ModExpConstA,
        slots: &[
            PARAM,
            MODULUS,
            N_PRIME,
            R_SQUARE,
            constant(SlotSize::Modulus, DestReg::A),
        ],
        operands: &[E],
        middle: &EXP_CONST_A_MIDDLE,
        compute_state: PeState::EleModExp,
        add_case: false,
    },
    OpTemplate {
        operation: Operation::ModExpConstE,
        slots: &[
            PARAM,
            MODULUS,
            N_PRIME,
            R_SQUARE,
            constant(SlotSize::Exponent, DestReg::B).changing(),
        ],
        operands: &[P],
        middle: &EXP_CONST_E_MIDDLE,
        compute_state: PeState::EleModExp,
        add_case: false,
    },
    OpTemplate {
        operation: Operation::ModAdd,
        slots: &[PARAM, MODULUS],
        operands: &[P, P],
        middle: &ADD_MIDDLE,
        compute_state: PeState::EleModInv,
        add_case: true,
    },
    OpTemplate {
        operation: Operation::ModAddConst,
        slots: &[PARAM, MODULUS, constant(SlotSize::Modulus, DestReg::B).changing()],
        operands: &[P],
        middle: &ADD_CONST_MIDDLE,
        compute_state: PeState::EleModInv,
        add_case: true,
    },
    OpTemplate {
        operation: Operation::Mont,
        slots: &[PARAM, MODULUS, N_PRIME],
        operands: &[P, P],
        middle: &MONT_MIDDLE,
        compute_state: PeState::ElementRSquare,
        add_case: false,
    },
    OpTemplate {
        operation: Operation::MontConst,
        slots: &[
            PARAM,
            MODULUS,
            N_PRIME,
            constant(SlotSize::Modulus, DestReg::RSquare),
        ],
        operands: &[P],
        middle: &MONT_CONST_MIDDLE,
        compute_state: PeState::ElementRSquare,
        add_case: false,
    },
    OpTemplate {
        operation: Operation::ModInvConstP,
        slots: &[PARAM, MODULUS],
        operands: &[P],
        middle: &INV_MIDDLE,
        compute_state: PeState::EleModInvP,
        add_case: false,
    },
    OpTemplate {
        operation: Operation::PaillierEnc,
        slots: &[
            PARAM,
            MODULUS,
            N_PRIME,
            R_SQUARE,
            R_MONT,
            ConstSlot::new(SlotRole::PaillierExponent, SlotSize::Modulus, DestReg::B).deferred(),
            ConstSlot::new(SlotRole::PaillierGenerator, SlotSize::Modulus, DestReg::A).deferred(),
        ],
        operands: &[E, OperandShape::HALF_MODULUS],
        middle: &PAILLIER_MIDDLE,
        compute_state: PeState::ExpInvExp,
        add_case: false,
    },
];
