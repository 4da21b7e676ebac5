//! Per-batch chip instruction generation
//!
//! One interpreter serves every operation: it walks the operation's
//! [`OpTemplate`] and emits the Start, Middle and End phases.
//!
//! ```text
//! Start   ctrl IDLE wait, load each preloaded constant slot (all PEs)
//! Middle  the template script, once per PE group, ending a segment at its Interrupt
//! End     ctrl IDLE wait, ctrl IDLE wait with no PEs gated in
//! ```

use crate::alloc::{group_sizes, DdrRegion};
use crate::error::Result;
use modacc_isa::{
    ChipInstruction, Control, DestPe, DestReg, Interrupt, Load, OpTemplate, PeState, PhaseStep,
    Program, CHIP_WORD_BYTES, CONTROL_ADDRESS, SRAM_UNIT_BITS,
};

/// Where constants and operands sit in a chip's operand SRAM for one batch.
/// Addresses and sizes are in 32-byte units.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SramLayout {
    /// `(address, units)` of each constant slot
    pub slots: Vec<(u32, u32)>,
    pub param_units: u32,
    /// First unit of each streamed operand vector
    pub operand_bases: Vec<u32>,
    /// Units per operand element
    pub operand_units: Vec<u32>,
}

impl SramLayout {
    pub fn new(program: &Program, batch: u32) -> Self {
        let template = program.operation.template();
        let mut slots = Vec::with_capacity(template.slots.len());
        let mut address = 0;
        for slot in template.slots {
            let units = slot.size.bits(program.p_bits, program.e_bits) / SRAM_UNIT_BITS;
            slots.push((address, units));
            address += units;
        }
        let param_units = address;

        let operand_units: Vec<u32> = template
            .operands
            .iter()
            .map(|shape| shape.bits(program.p_bits, program.e_bits) / SRAM_UNIT_BITS)
            .collect();
        let mut operand_bases = Vec::with_capacity(operand_units.len());
        for &units in &operand_units {
            operand_bases.push(address);
            address = address.saturating_add(units.saturating_mul(batch));
        }

        Self {
            slots,
            param_units,
            operand_bases,
            operand_units,
        }
    }
}

/// Instruction stream of one chip for one batch, cut into segments at each
/// Interrupt
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChipStream {
    pub words: Vec<ChipInstruction>,
    /// Segment lengths; they sum to `words.len()`
    pub splits: Vec<usize>,
}

impl ChipStream {
    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Little-endian bytes as loaded into the chip instruction buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.words.len() * CHIP_WORD_BYTES);
        for word in &self.words {
            bytes.extend_from_slice(&word.encode().to_le_bytes());
        }
        bytes
    }
}

/// Generator for one program on chips of `pes` PEs
pub struct InstructionGenerator<'a> {
    program: &'a Program,
    template: &'static OpTemplate,
    pes: u32,
}

impl<'a> InstructionGenerator<'a> {
    pub fn new(program: &'a Program, pes: u32) -> Self {
        Self {
            program,
            template: program.operation.template(),
            pes,
        }
    }

    /// Emit the stream for a batch whose PE groups write to `out`
    pub fn generate(&self, batch: u32, out: &[DdrRegion]) -> Result<ChipStream> {
        let layout = SramLayout::new(self.program, batch);
        let groups: Vec<u32> = group_sizes(batch, self.pes).collect();
        let mut emitter = Emitter::default();

        // Start
        let first = groups.first().copied().unwrap_or(0) as u8;
        emitter.wait(PeState::Idle, first);
        for (slot, &(address, units)) in self.template.slots.iter().zip(&layout.slots) {
            if !slot.preload {
                continue;
            }
            emitter.load(Load {
                address,
                length: units,
                dest_pe: DestPe::All.to_bits(),
                dest_reg: slot.reg.to_u8(),
                repeat: 1,
                change: slot.change,
                pe_gate: first,
            })?;
        }

        // Middle
        let mut cursors = layout.operand_bases.clone();
        for (&active, region) in groups.iter().zip(out) {
            let gate = active as u8;
            for step in self.template.middle {
                match *step {
                    PhaseStep::Step { state, next } => emitter.step(state, next, gate),
                    PhaseStep::Wait { state } => emitter.wait(state, gate),
                    PhaseStep::Stream { operand, reg } => {
                        let units = layout.operand_units[operand];
                        emitter.load(Load {
                            address: cursors[operand],
                            length: units,
                            dest_pe: DestPe::Pe(0).to_bits(),
                            dest_reg: reg.to_u8(),
                            repeat: active as u16,
                            change: true,
                            pe_gate: gate,
                        })?;
                        cursors[operand] += units * active;
                    }
                    PhaseStep::Broadcast { slot, reg } => {
                        let (address, units) = layout.slots[slot];
                        emitter.broadcast(address, units, reg, gate)?;
                    }
                    PhaseStep::Interrupt => {
                        emitter.push(ChipInstruction::Interrupt(Interrupt {
                            ddr_address: region.wire_address(),
                            length: region.length as u32,
                        }));
                        emitter.cut();
                    }
                }
            }
        }

        // End
        let last = groups.last().copied().unwrap_or(0) as u8;
        emitter.wait(PeState::Idle, last);
        emitter.wait(PeState::Idle, 0);
        emitter.cut();

        Ok(emitter.stream)
    }

    /// Words a batch of `batch` elements will take
    pub fn stream_len(&self, batch: u32) -> usize {
        let preloads = self.template.slots.iter().filter(|s| s.preload).count();
        let groups = batch.div_ceil(self.pes.max(1)) as usize;
        1 + preloads + groups * self.template.middle.len() + 2
    }
}

#[derive(Default)]
struct Emitter {
    stream: ChipStream,
    segment_start: usize,
}

impl Emitter {
    fn push(&mut self, inst: ChipInstruction) {
        self.stream.words.push(inst);
    }

    fn control(&mut self, state: PeState, cal: bool, next: PeState, gate: u8) {
        self.push(ChipInstruction::Control(Control {
            state: state.to_u8(),
            cal,
            next: next.to_u8(),
            address: CONTROL_ADDRESS,
            pe_gate: gate,
        }));
    }

    fn step(&mut self, state: PeState, next: PeState, gate: u8) {
        self.control(state, true, next, gate);
    }

    fn wait(&mut self, state: PeState, gate: u8) {
        self.control(state, false, state, gate);
    }

    fn load(&mut self, load: Load) -> Result<()> {
        load.check_bounds()?;
        self.push(ChipInstruction::Load(load));
        Ok(())
    }

    fn broadcast(&mut self, address: u32, units: u32, reg: DestReg, gate: u8) -> Result<()> {
        self.load(Load {
            address,
            length: units,
            dest_pe: DestPe::All.to_bits(),
            dest_reg: reg.to_u8(),
            repeat: 1,
            change: false,
            pe_gate: gate,
        })
    }

    /// Close the current segment
    fn cut(&mut self) {
        let len = self.stream.words.len();
        self.stream.splits.push(len - self.segment_start);
        self.segment_start = len;
    }
}
