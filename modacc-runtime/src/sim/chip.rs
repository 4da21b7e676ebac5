//! One chip: operand SRAM, instruction buffer, PE array

use super::memory::SparseMemory;
use super::Fault;
use modacc_isa::{
    ChipInstruction, Control, DestPe, DestReg, Interrupt, Load, ParamWord, PeState,
    CHIP_INST_DEPTH, CHIP_WORD_BYTES, INST_FLAG_REGISTER, PIN_MUX_REGISTER, SRAM_DEPTH_UNITS,
    SRAM_UNIT_BYTES,
};
use rug::integer::Order;
use rug::Integer;
use std::collections::HashMap;
use tracing::trace;

/// Processing element
#[derive(Debug, Clone)]
pub struct Pe {
    regs: Vec<Integer>,
    state: PeState,
    /// Running product of the fused exponentiation path
    acc: Integer,
}

impl Default for Pe {
    fn default() -> Self {
        Self {
            regs: vec![Integer::new(); DestReg::COUNT],
            state: PeState::Idle,
            acc: Integer::from(1),
        }
    }
}

impl Pe {
    #[inline]
    pub fn state(&self) -> PeState {
        self.state
    }

    #[inline]
    pub fn reg(&self, reg: DestReg) -> &Integer {
        &self.regs[reg as usize]
    }

    fn param(&self) -> Result<(ParamWord, u32), String> {
        let word = ParamWord::decode(self.reg(DestReg::Param).to_u32_wrapping());
        let p_bits = word
            .p_bits()
            .ok_or_else(|| format!("parameter word {:#010x} has no modulus width", word.encode()))?;
        Ok((word, p_bits))
    }

    fn modulus(&self) -> Result<&Integer, String> {
        let p = self.reg(DestReg::P);
        if *p <= 0 {
            return Err("modulus register is zero".into());
        }
        Ok(p)
    }

    /// Side effect of a computing transition
    fn transition(&mut self, from: PeState, to: PeState) -> Result<(), String> {
        match (from, to) {
            (PeState::Idle, PeState::LoadPara) => self.acc = Integer::from(1),
            (PeState::ExpInvExp, PeState::ExpInvMul) => {
                let p = self.modulus()?.clone();
                let b = self.reg(DestReg::B);
                let exponent = Integer::from(b >> 1u32);
                let mut factor = self
                    .reg(DestReg::A)
                    .clone()
                    .pow_mod(&exponent, &p)
                    .map_err(|_| "exponentiation failed".to_string())?;
                if b.is_odd() {
                    factor = factor.invert(&p).map_err(|_| "base is not invertible".to_string())?;
                }
                self.acc *= factor;
                self.acc %= &p;
            }
            _ => {}
        }
        Ok(())
    }

    /// Value this PE reports on an Interrupt
    fn result(&self) -> Result<Integer, String> {
        let p = self.modulus()?;
        let a = self.reg(DestReg::A);
        let b = self.reg(DestReg::B);
        let value = match self.state {
            PeState::ElementRSquare => {
                let (_, p_bits) = self.param()?;
                let r_inv = (Integer::from(1) << p_bits)
                    .invert(p)
                    .map_err(|_| "even modulus has no Montgomery form".to_string())?;
                Integer::from(a * self.reg(DestReg::RSquare)) * r_inv % p
            }
            PeState::EleModMul => Integer::from(a * b) % p,
            PeState::EleModExp => a
                .clone()
                .pow_mod(b, p)
                .map_err(|_| "exponentiation failed".to_string())?,
            PeState::EleModInv => {
                let (word, _) = self.param()?;
                if word.add_case != 0 {
                    Integer::from(a + b) % p
                } else {
                    a.clone().invert(p).map_err(|_| "operand is not invertible".to_string())?
                }
            }
            PeState::EleModInvP => {
                a.clone().invert(p).map_err(|_| "operand is not invertible".to_string())?
            }
            PeState::ExpInvCom => Integer::from(&self.acc % p),
            other => return Err(format!("no result in state {other}")),
        };
        Ok(value)
    }
}

/// Chip model
#[derive(Debug, Clone)]
pub struct Chip {
    index: usize,
    pes: Vec<Pe>,
    sram: SparseMemory,
    inst: Vec<u64>,
    pc: usize,
    /// Segments started since the last pointer reset
    segments: usize,
    /// The next word opens a segment
    boundary: bool,
    registers: HashMap<u32, u32>,
}

impl Chip {
    pub fn new(index: usize, pes: u32) -> Self {
        let mut registers = HashMap::new();
        // PLLs stay unlocked until bring-up clears the pin mux
        registers.insert(PIN_MUX_REGISTER, 1);
        Self {
            index,
            pes: vec![Pe::default(); pes as usize],
            sram: SparseMemory::new("sram", SRAM_DEPTH_UNITS as u64 * SRAM_UNIT_BYTES as u64),
            inst: Vec::new(),
            pc: 0,
            segments: 0,
            boundary: true,
            registers,
        }
    }

    pub fn pes(&self) -> &[Pe] {
        &self.pes
    }

    /// Instructions executed since the last pointer reset
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Segments started since the last pointer reset. A segment opens on the
    /// first word of a batch and on the first word after each interrupt.
    pub fn segments(&self) -> usize {
        self.segments
    }

    pub fn register(&self, address: u32) -> Option<u32> {
        self.registers.get(&address).copied()
    }

    fn fault(&self, reason: impl Into<String>) -> Fault {
        Fault::Chip {
            chip: self.index,
            reason: reason.into(),
        }
    }

    pub fn write_register(&mut self, address: u32, value: u32) {
        self.registers.insert(address, value);
    }

    /// L1 data transfer into operand SRAM
    pub fn write_sram(&mut self, unit: u32, data: &[u8]) -> Result<(), Fault> {
        self.sram.write(unit as u64 * SRAM_UNIT_BYTES as u64, data)
    }

    /// L1 instruction transfer into the instruction buffer
    pub fn load_instructions(&mut self, bytes: &[u8]) -> Result<(), Fault> {
        if self.pc != 0 {
            return Err(self.fault("instruction buffer reloaded before a pointer reset"));
        }
        if bytes.len() % CHIP_WORD_BYTES != 0 {
            return Err(self.fault(format!("{} bytes is not a whole number of words", bytes.len())));
        }
        let words = bytes.len() / CHIP_WORD_BYTES;
        if words > CHIP_INST_DEPTH {
            return Err(self.fault(format!("{words} words overflow the instruction buffer")));
        }
        self.inst = bytes
            .chunks_exact(CHIP_WORD_BYTES)
            .map(|chunk| {
                let mut word = [0u8; CHIP_WORD_BYTES];
                word.copy_from_slice(chunk);
                u64::from_le_bytes(word)
            })
            .collect();
        Ok(())
    }

    /// Rewind the instruction pointer. The previous batch must be fully drained.
    pub fn reset_pointer(&mut self) -> Result<(), Fault> {
        if self.pc != self.inst.len() {
            return Err(self.fault(format!(
                "pointer reset with {} of {} instructions executed",
                self.pc,
                self.inst.len()
            )));
        }
        self.pc = 0;
        self.segments = 0;
        self.boundary = true;
        self.inst.clear();
        self.registers.insert(INST_FLAG_REGISTER, 0);
        Ok(())
    }

    /// Execute the next `count` queued instructions
    pub fn execute(&mut self, count: u32, ddr: &mut SparseMemory) -> Result<(), Fault> {
        if self.register(PIN_MUX_REGISTER) != Some(0) {
            return Err(self.fault("instructions released before the PLLs locked"));
        }
        for _ in 0..count {
            let Some(&word) = self.inst.get(self.pc) else {
                return Err(self.fault(format!("ran past {} queued instructions", self.inst.len())));
            };
            let inst = ChipInstruction::decode(word)?;
            trace!(chip = self.index, pc = self.pc, %inst, "chip step");
            if self.boundary {
                self.segments += 1;
                self.boundary = false;
            }
            match inst {
                ChipInstruction::Nop => {}
                ChipInstruction::Load(load) => self.load(&load)?,
                ChipInstruction::Control(control) => self.control(&control)?,
                ChipInstruction::Interrupt(irq) => {
                    self.interrupt(&irq, ddr)?;
                    self.boundary = true;
                }
            }
            self.pc += 1;
        }
        self.registers.insert(INST_FLAG_REGISTER, self.pc as u32);
        Ok(())
    }

    fn load(&mut self, load: &Load) -> Result<(), Fault> {
        load.check_bounds()?;
        let reg = DestReg::from_u8(load.dest_reg)
            .ok_or_else(|| self.fault(format!("unknown register {}", load.dest_reg)))?;
        let chunk = load.length as usize * SRAM_UNIT_BYTES as usize;
        let read = |sram: &SparseMemory, unit: u32| -> Result<Integer, Fault> {
            let bytes = sram.read_vec(unit as u64 * SRAM_UNIT_BYTES as u64, chunk)?;
            Ok(Integer::from_digits(&bytes, Order::Lsf))
        };

        let targets: Vec<(usize, u32)> = match DestPe::from_bits(load.dest_pe) {
            Some(DestPe::All) => (0..self.pes.len()).map(|pe| (pe, load.address)).collect(),
            Some(DestPe::Group(k)) => (4 * k as usize..4 * k as usize + 4)
                .map(|pe| (pe, load.address))
                .collect(),
            Some(DestPe::Pe(first)) if load.change => (0..load.repeat as usize)
                .map(|i| (first as usize + i, load.address + i as u32 * load.length))
                .collect(),
            Some(DestPe::Pe(first)) => vec![(first as usize, load.address)],
            None => return Err(self.fault(format!("unknown PE code {:#04x}", load.dest_pe))),
        };

        for (pe, unit) in targets {
            if pe >= self.pes.len() {
                return Err(self.fault(format!("load addresses PE {pe} of {}", self.pes.len())));
            }
            let value = read(&self.sram, unit)?;
            self.pes[pe].regs[reg as usize] = value;
        }
        Ok(())
    }

    fn control(&mut self, control: &Control) -> Result<(), Fault> {
        let decode = |raw: u8| PeState::from_u8(raw);
        let (Some(from), Some(to)) = (decode(control.state), decode(control.next)) else {
            return Err(self.fault(format!(
                "unknown PE state in {:#04x} -> {:#04x}",
                control.state, control.next
            )));
        };
        let gate = control.pe_gate as usize;
        if gate > self.pes.len() {
            return Err(self.fault(format!("gate {gate} exceeds {} PEs", self.pes.len())));
        }
        for pe in 0..gate {
            let current = self.pes[pe].state;
            if current != from {
                return Err(self.fault(format!("PE {pe} is in {current}, expected {from}")));
            }
            if control.cal {
                self.pes[pe]
                    .transition(from, to)
                    .map_err(|reason| self.fault(format!("PE {pe}: {reason}")))?;
            }
            self.pes[pe].state = to;
        }
        Ok(())
    }

    fn interrupt(&mut self, irq: &Interrupt, ddr: &mut SparseMemory) -> Result<(), Fault> {
        let (_, p_bits) = self.pes[0]
            .param()
            .map_err(|reason| self.fault(format!("PE 0: {reason}")))?;
        let width = p_bits as usize / 8;
        let length = irq.length as usize;
        if length % width != 0 || length / width > self.pes.len() {
            return Err(self.fault(format!("interrupt of {length} bytes for {width}-byte results")));
        }

        for pe in 0..length / width {
            let value = self.pes[pe]
                .result()
                .map_err(|reason| self.fault(format!("PE {pe}: {reason}")))?;
            let mut bytes = value.to_digits::<u8>(Order::Lsf);
            if bytes.len() > width {
                return Err(self.fault(format!("PE {pe}: result wider than {p_bits} bits")));
            }
            bytes.resize(width, 0);
            ddr.write(irq.ddr_address as u64 + (pe * width) as u64, &bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modacc_isa::{Operation, Program, CONTROL_ADDRESS};

    fn control(state: PeState, cal: bool, next: PeState, gate: u8) -> u64 {
        ChipInstruction::Control(Control {
            state: state.to_u8(),
            cal,
            next: next.to_u8(),
            address: CONTROL_ADDRESS,
            pe_gate: gate,
        })
        .encode()
    }

    fn load(address: u32, length: u32, dest_pe: DestPe, reg: DestReg, repeat: u16, change: bool) -> u64 {
        ChipInstruction::Load(Load {
            address,
            length,
            dest_pe: dest_pe.to_bits(),
            dest_reg: reg.to_u8(),
            repeat,
            change,
            pe_gate: 2,
        })
        .encode()
    }

    fn unit(value: u64) -> Vec<u8> {
        let mut bytes = value.to_le_bytes().to_vec();
        bytes.resize(64, 0);
        bytes
    }

    fn bytes(words: &[u64]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    /// Two PEs multiply 512-bit operands mod 1000003
    #[test]
    fn test_two_pe_mod_mul() {
        let mut chip = Chip::new(0, 2);
        chip.write_register(PIN_MUX_REGISTER, 0);
        let mut ddr = SparseMemory::new("ddr", 1 << 20);

        let word = Program::vector(Operation::ModMul, 2, 512, 0).param_word(2);
        let mut sram = word.to_block().to_vec();
        sram.resize(32, 0);
        sram.extend(unit(1_000_003)); // units 1-2
        sram.extend(unit(12345)); // a0, units 3-4
        sram.extend(unit(67890)); // a1
        sram.extend(unit(99999)); // b0, units 7-8
        sram.extend(unit(2)); // b1
        chip.write_sram(0, &sram).unwrap();

        let irq = ChipInstruction::Interrupt(Interrupt {
            ddr_address: 0x100,
            length: 128,
        })
        .encode();
        let program = [
            control(PeState::Idle, false, PeState::Idle, 2),
            load(0, 1, DestPe::All, DestReg::Param, 1, false),
            load(1, 2, DestPe::All, DestReg::P, 1, false),
            control(PeState::Idle, true, PeState::LoadPara, 2),
            control(PeState::LoadPara, true, PeState::EleModMul, 2),
            control(PeState::EleModMul, false, PeState::EleModMul, 2),
            load(3, 2, DestPe::Pe(0), DestReg::A, 2, true),
            load(7, 2, DestPe::Pe(0), DestReg::B, 2, true),
            irq,
        ];
        chip.load_instructions(&bytes(&program)).unwrap();
        chip.execute(program.len() as u32, &mut ddr).unwrap();

        let out = ddr.read_vec(0x100, 128).unwrap();
        let r0 = Integer::from_digits(&out[..64], Order::Lsf);
        let r1 = Integer::from_digits(&out[64..], Order::Lsf);
        assert_eq!(r0, Integer::from(12345u64 * 99999 % 1_000_003));
        assert_eq!(r1, Integer::from(67890u64 * 2 % 1_000_003));
        assert_eq!(chip.register(INST_FLAG_REGISTER), Some(program.len() as u32));
        // the interrupt closes the only segment without opening another
        assert_eq!(chip.segments(), 1);
        chip.reset_pointer().unwrap();
        assert_eq!(chip.pc(), 0);
        assert_eq!(chip.segments(), 0);
    }

    #[test]
    fn test_locked_pll_required() {
        let mut chip = Chip::new(3, 1);
        chip.load_instructions(&bytes(&[0])).unwrap();
        let err = chip.execute(1, &mut SparseMemory::new("ddr", 64)).unwrap_err();
        assert!(matches!(err, Fault::Chip { chip: 3, .. }));
    }

    #[test]
    fn test_wrong_state_faults() {
        let mut chip = Chip::new(0, 1);
        chip.write_register(PIN_MUX_REGISTER, 0);
        chip.load_instructions(&bytes(&[control(PeState::LoadPara, true, PeState::EleModMul, 1)]))
            .unwrap();
        let err = chip.execute(1, &mut SparseMemory::new("ddr", 64)).unwrap_err();
        assert_eq!(err.to_string(), "chip 0: PE 0 is in IDLE, expected LOAD_PARA");
    }

    #[test]
    fn test_reset_requires_drained_buffer() {
        let mut chip = Chip::new(1, 1);
        chip.write_register(PIN_MUX_REGISTER, 0);
        chip.load_instructions(&bytes(&[0, 0])).unwrap();
        chip.execute(1, &mut SparseMemory::new("ddr", 64)).unwrap();
        assert!(chip.reset_pointer().is_err());
        assert!(chip.load_instructions(&bytes(&[0])).is_err());
        chip.execute(1, &mut SparseMemory::new("ddr", 64)).unwrap();
        assert!(chip.reset_pointer().is_ok());
        assert!(chip.execute(1, &mut SparseMemory::new("ddr", 64)).is_err());
    }
}
