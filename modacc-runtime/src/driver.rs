//! Device driver: the run protocol over a raw I/O backend
//!
//! ```text
//! fast reset ─► DMA input ─► DMA chip streams ─► global stream to bypass
//!            ─► length, go ─► poll completion ─► clear ─► DMA output ─► fast reset
//! ```

use crate::error::DeviceError;
use modacc_compiler::Executor;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Register offsets in the bypass window
pub mod regs {
    /// Base of the send block
    pub const SEND_BASE: u32 = 0x24000;

    /// Global stream length in 16-byte words, minus one
    pub const INST_LENGTH: u32 = SEND_BASE + 0x04;

    /// Start the board sequencer
    pub const GO: u32 = SEND_BASE + 0x08;

    /// Completion pointer, non-zero once the sequencer reaches Done
    pub const COMPLETION: u32 = SEND_BASE + 0x0C;

    /// Reset toggled around every run
    pub const FAST_RESET: u32 = SEND_BASE;

    /// Secondary reset, needs long settles
    pub const FULL_RESET: u32 = SEND_BASE + 0x10;
}

/// Raw handle surface of an accelerator board
pub trait DeviceIo {
    /// Acquire every handle. Opening an open device is a no-op.
    fn open(&mut self) -> Result<(), DeviceError>;

    /// Release every handle
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// 32-bit register write at a bypass-window offset
    fn write_reg(&mut self, offset: u32, value: u32) -> Result<(), DeviceError>;

    /// 32-bit register read at a bypass-window offset
    fn read_reg(&mut self, offset: u32) -> Result<u32, DeviceError>;

    /// DMA host-to-card
    fn write_ddr(&mut self, address: u64, data: &[u8]) -> Result<(), DeviceError>;

    /// DMA card-to-host
    fn read_ddr(&mut self, address: u64, buf: &mut [u8]) -> Result<(), DeviceError>;

    /// Direct byte write into the bypass window
    fn write_bypass(&mut self, offset: usize, data: &[u8]) -> Result<(), DeviceError>;

    /// Direct byte read from the bypass window
    fn read_bypass(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), DeviceError>;
}

/// Device paths and protocol timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Host-to-card DMA channel
    pub h2c_path: PathBuf,
    /// Card-to-host DMA channel
    pub c2h_path: PathBuf,
    /// Register and bypass window
    pub bypass_path: PathBuf,
    pub bypass_size: usize,
    pub poll_interval: Duration,
    /// Completion polls before giving up
    pub max_polls: u32,
    pub reset_settle: Duration,
    pub full_reset_settle: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            h2c_path: PathBuf::from("/dev/xdma0_h2c_0"),
            c2h_path: PathBuf::from("/dev/xdma0_c2h_0"),
            bypass_path: PathBuf::from("/dev/xdma0_bypass"),
            bypass_size: 2 * 1024 * 1024,
            poll_interval: Duration::from_millis(1),
            max_polls: 100_000,
            reset_settle: Duration::from_millis(1),
            full_reset_settle: Duration::from_secs(2),
        }
    }
}

impl DriverConfig {
    /// Same paths, no sleeping. For backends that complete synchronously.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            reset_settle: Duration::ZERO,
            full_reset_settle: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }
}

/// Run protocol on top of a [`DeviceIo`] backend
#[derive(Debug)]
pub struct DeviceDriver<I> {
    io: I,
    config: DriverConfig,
}

impl<I: DeviceIo> DeviceDriver<I> {
    pub fn new(io: I, config: DriverConfig) -> Self {
        Self { io, config }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn io(&self) -> &I {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut I {
        &mut self.io
    }

    pub fn into_inner(self) -> I {
        self.io
    }

    pub fn open(&mut self) -> Result<(), DeviceError> {
        self.io.open()
    }

    pub fn close(&mut self) {
        self.io.close();
    }

    pub fn is_open(&self) -> bool {
        self.io.is_open()
    }

    /// Toggle the secondary reset register
    pub fn reset(&mut self) -> Result<(), DeviceError> {
        self.toggle(regs::FULL_RESET, self.config.full_reset_settle)
    }

    /// Toggle the reset register used around every run
    pub fn fast_reset(&mut self) -> Result<(), DeviceError> {
        self.toggle(regs::FAST_RESET, self.config.reset_settle)
    }

    fn toggle(&mut self, register: u32, settle: Duration) -> Result<(), DeviceError> {
        self.io.write_reg(register, 0)?;
        sleep(settle);
        self.io.write_reg(register, 1)?;
        sleep(settle);
        Ok(())
    }

    /// Execute one compiled program and return its output bytes
    pub fn run(&mut self, executor: &Executor, input: &[u8]) -> Result<Vec<u8>, DeviceError> {
        if !self.io.is_open() {
            return Err(DeviceError::NotOpen);
        }
        let started = Instant::now();
        let result = self.launch(executor, input);
        if let Err(e) = self.fast_reset() {
            warn!(error = %e, "post-run reset failed");
        }
        if result.is_ok() {
            debug!(
                program = %executor.program,
                elapsed_us = started.elapsed().as_micros() as u64,
                "run complete"
            );
        }
        result
    }

    fn launch(&mut self, executor: &Executor, input: &[u8]) -> Result<Vec<u8>, DeviceError> {
        if input.len() as u64 != executor.in_params.length {
            return Err(DeviceError::write(
                "ddr",
                format!(
                    "input is {} bytes but its region holds {}",
                    input.len(),
                    executor.in_params.length
                ),
            ));
        }

        self.fast_reset()?;
        self.io.write_ddr(executor.in_params.address, input)?;
        self.io.write_ddr(executor.inst.address, &executor.instruction_bytes)?;
        self.io.write_bypass(0, &executor.instruction_bytes_device)?;

        let length = (executor.global_len() as u32).saturating_sub(1);
        self.io.write_reg(regs::INST_LENGTH, length)?;
        sleep(self.config.reset_settle);
        self.io.write_reg(regs::GO, 1)?;

        let completed = self.wait_for_completion();
        let cleared = self.clear_launch();
        completed?;
        cleared?;

        let mut out = vec![0u8; executor.out.length as usize];
        self.io.read_ddr(executor.out.address, &mut out)?;
        Ok(out)
    }

    /// Poll the completion register at most `max_polls` times
    fn wait_for_completion(&mut self) -> Result<(), DeviceError> {
        let max_polls = self.config.max_polls;
        for poll in 1..=max_polls {
            if self.io.read_reg(regs::COMPLETION)? >= 1 {
                debug!(polls = poll, "sequencer done");
                return Ok(());
            }
            if poll < max_polls {
                sleep(self.config.poll_interval);
            }
        }
        Err(DeviceError::Timeout { polls: max_polls })
    }

    fn clear_launch(&mut self) -> Result<(), DeviceError> {
        self.io.write_reg(regs::INST_LENGTH, 0)?;
        sleep(self.config.reset_settle);
        self.io.write_reg(regs::GO, 0)
    }
}
