//! Simulated board behind the raw device surface

use super::chip::Chip;
use super::memory::SparseMemory;
use super::Fault;
use crate::driver::{regs, DeviceIo};
use crate::error::DeviceError;
use modacc_isa::{
    DataType, GlobalInstruction, RegisterAccess, Repeat, Topology, Transfer, GLOBAL_WORD_BYTES,
};
use tracing::{debug, trace, warn};

/// Bypass window size of the reference board
const BYPASS_SIZE: usize = 2 * 1024 * 1024;

/// Accelerator model implementing [`DeviceIo`]
#[derive(Debug)]
pub struct SimulatedIo {
    topology: Topology,
    open: bool,
    ddr: SparseMemory,
    bypass: Vec<u8>,
    chips: Vec<Chip>,
    /// Segments released per chip since its last pointer reset
    released: Vec<usize>,
    runs: u64,
    last_fault: Option<Fault>,
}

impl SimulatedIo {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            open: false,
            ddr: SparseMemory::new("ddr", topology.ddr_size),
            bypass: vec![0; BYPASS_SIZE],
            chips: fresh_chips(&topology),
            released: vec![0; topology.num_chips as usize],
            runs: 0,
            last_fault: None,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn ddr(&self) -> &SparseMemory {
        &self.ddr
    }

    pub fn chips(&self) -> &[Chip] {
        &self.chips
    }

    /// Completed runs since construction
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// The fault that stopped the most recent run, if any
    pub fn last_fault(&self) -> Option<&Fault> {
        self.last_fault.as_ref()
    }

    fn register(&self, offset: u32) -> u32 {
        let offset = offset as usize;
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bypass[offset..offset + 4]);
        u32::from_le_bytes(raw)
    }

    fn set_register(&mut self, offset: u32, value: u32) {
        let offset = offset as usize;
        self.bypass[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn check_bypass(&self, offset: usize, len: usize) -> Result<(), String> {
        match offset.checked_add(len) {
            Some(end) if end <= self.bypass.len() => Ok(()),
            _ => Err(format!(
                "offset {offset:#x} + {len} exceeds the {:#x}-byte window",
                self.bypass.len()
            )),
        }
    }

    fn reset_board(&mut self) {
        self.chips = fresh_chips(&self.topology);
        self.released = vec![0; self.chips.len()];
        self.set_register(regs::COMPLETION, 0);
        trace!("board reset");
    }

    /// Run the global stream announced by the length register
    fn launch(&mut self) {
        let words = self.register(regs::INST_LENGTH) as usize + 1;
        match self.fetch(words).and_then(|stream| self.sequence(&stream)) {
            Ok(()) => {
                self.runs += 1;
                self.last_fault = None;
                self.set_register(regs::COMPLETION, 1);
                debug!(words, "simulated run complete");
            }
            Err(fault) => {
                warn!(%fault, "simulated run faulted");
                self.last_fault = Some(fault);
            }
        }
    }

    fn fetch(&self, words: usize) -> Result<Vec<GlobalInstruction>, Fault> {
        let bytes = words * GLOBAL_WORD_BYTES;
        if bytes > regs::SEND_BASE as usize {
            return Err(Fault::Sequencer(format!(
                "{words} words overlap the register block"
            )));
        }
        self.bypass[..bytes]
            .chunks_exact(GLOBAL_WORD_BYTES)
            .map(|chunk| {
                let mut word = [0u8; GLOBAL_WORD_BYTES];
                word.copy_from_slice(chunk);
                GlobalInstruction::decode(u128::from_be_bytes(word)).map_err(Fault::from)
            })
            .collect()
    }

    fn sequence(&mut self, stream: &[GlobalInstruction]) -> Result<(), Fault> {
        for (index, inst) in stream.iter().enumerate() {
            trace!(index, %inst, "global step");
            match *inst {
                GlobalInstruction::Nop => {}
                GlobalInstruction::Repeat(repeat) => self.repeat(&repeat)?,
                GlobalInstruction::Transfer(transfer) => self.transfer(&transfer)?,
                GlobalInstruction::RegisterAccess(access) => self.register_access(&access)?,
                GlobalInstruction::Done => {
                    for chip in 0..self.chips.len() {
                        self.check_drained(chip)?;
                    }
                    return Ok(());
                }
            }
        }
        Err(Fault::Sequencer(format!(
            "{} words ended without a done marker",
            stream.len()
        )))
    }

    /// Release `times` announced segments on every chip in the mask. An empty
    /// mask only drains transfers.
    fn repeat(&mut self, repeat: &Repeat) -> Result<(), Fault> {
        for chip in self.topology.chips_in_mask(repeat.chip_mask) {
            let owed = self.chips[chip].segments().saturating_sub(self.released[chip]);
            let times = repeat.times as usize;
            if times > owed {
                return Err(Fault::Sequencer(format!(
                    "repeat releases {times} segments on chip {chip} with {owed} announced"
                )));
            }
            self.released[chip] += times;
        }
        Ok(())
    }

    /// A chip may only leave a batch once every announced segment ran
    fn check_drained(&self, chip: usize) -> Result<(), Fault> {
        let owed = self.chips[chip].segments().saturating_sub(self.released[chip]);
        if owed > 0 {
            return Err(Fault::Sequencer(format!(
                "chip {chip} stalled with {owed} unreleased segments"
            )));
        }
        Ok(())
    }

    fn transfer(&mut self, transfer: &Transfer) -> Result<(), Fault> {
        let bytes = self
            .ddr
            .read_vec(transfer.ddr_address as u64, transfer.length as usize)?;
        let data_type = DataType::from_u8(transfer.data_type);
        for chip in self.topology.chips_in_mask(transfer.chip_mask) {
            match data_type {
                Some(DataType::WriteData) => {
                    self.chips[chip].write_sram(transfer.data_address, &bytes)?
                }
                Some(DataType::WriteInst) => self.chips[chip].load_instructions(&bytes)?,
                _ => {
                    return Err(Fault::Sequencer(format!(
                        "transfer of type {} is not a DDR move",
                        transfer.data_type
                    )))
                }
            }
        }
        Ok(())
    }

    fn register_access(&mut self, access: &RegisterAccess) -> Result<(), Fault> {
        let data_type = DataType::from_u8(access.data_type);
        for chip in self.topology.chips_in_mask(access.chip_mask) {
            match data_type {
                Some(DataType::WriteInstLength) => {
                    let opening = self.chips[chip].segments() == 0;
                    self.chips[chip].execute(access.data, &mut self.ddr)?;
                    // the first segment of a batch runs on its own announce
                    if opening && self.chips[chip].segments() > 0 {
                        self.released[chip] += 1;
                    }
                }
                Some(DataType::InstReset) => {
                    self.check_drained(chip)?;
                    self.chips[chip].reset_pointer()?;
                    self.released[chip] = 0;
                }
                Some(DataType::WriteReg) => {
                    self.chips[chip].write_register(access.data_address, access.data)
                }
                Some(DataType::ReadReg) => {
                    let value = self.chips[chip].register(access.data_address);
                    trace!(chip, address = access.data_address, ?value, "register read");
                }
                _ => {
                    return Err(Fault::Sequencer(format!(
                        "register access of type {}",
                        access.data_type
                    )))
                }
            }
        }
        Ok(())
    }
}

fn fresh_chips(topology: &Topology) -> Vec<Chip> {
    (0..topology.num_chips as usize)
        .map(|index| Chip::new(index, topology.pes_per_chip))
        .collect()
}

impl DeviceIo for SimulatedIo {
    fn open(&mut self) -> Result<(), DeviceError> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write_reg(&mut self, offset: u32, value: u32) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        self.check_bypass(offset as usize, 4)
            .map_err(|e| DeviceError::write("register", e))?;
        self.set_register(offset, value);
        match offset {
            regs::GO if value == 1 => self.launch(),
            regs::FAST_RESET | regs::FULL_RESET if value == 1 => self.reset_board(),
            _ => {}
        }
        Ok(())
    }

    fn read_reg(&mut self, offset: u32) -> Result<u32, DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        self.check_bypass(offset as usize, 4)
            .map_err(|e| DeviceError::read("register", e))?;
        Ok(self.register(offset))
    }

    fn write_ddr(&mut self, address: u64, data: &[u8]) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        self.ddr
            .write(address, data)
            .map_err(|e| DeviceError::write("ddr", e))
    }

    fn read_ddr(&mut self, address: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        self.ddr.read(address, buf).map_err(|e| DeviceError::read("ddr", e))
    }

    fn write_bypass(&mut self, offset: usize, data: &[u8]) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        self.check_bypass(offset, data.len())
            .map_err(|e| DeviceError::write("bypass", e))?;
        self.bypass[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_bypass(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        self.check_bypass(offset, buf.len())
            .map_err(|e| DeviceError::read("bypass", e))?;
        buf.copy_from_slice(&self.bypass[offset..offset + buf.len()]);
        Ok(())
    }
}
