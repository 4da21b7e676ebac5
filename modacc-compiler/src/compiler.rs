//! Program compiler: split, allocate, generate, sequence

use crate::alloc::{MemoryAllocation, MemoryAllocator};
use crate::error::{CompileError, Result};
use crate::executor::Executor;
use crate::generator::{ChipStream, InstructionGenerator};
use crate::sequencer::FpgaSequencer;
use crate::split::TaskSplit;
use modacc_isa::{GlobalInstruction, Program, Topology};
use tracing::debug;

/// Compiler for one board topology
#[derive(Clone, Copy, Debug)]
pub struct Compiler {
    topology: Topology,
    base_address: u64,
}

/// A compiled executor together with every intermediate artifact
#[derive(Clone, Debug)]
pub struct Compilation {
    pub executor: Executor,
    pub split: TaskSplit,
    pub allocation: MemoryAllocation,
    /// `[chip][batch]`
    pub chip_streams: Vec<Vec<ChipStream>>,
    pub global: Vec<GlobalInstruction>,
}

impl Compiler {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology,
            base_address: 0,
        }
    }

    /// Start allocating at `base` instead of 0
    pub fn with_base_address(mut self, base: u64) -> Self {
        self.base_address = base;
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn compile(&self, program: &Program) -> Result<Executor> {
        Ok(self.compile_detailed(program)?.executor)
    }

    pub fn compile_detailed(&self, program: &Program) -> Result<Compilation> {
        self.topology
            .validate()
            .map_err(|e| CompileError::InvalidProgramParams(e.to_string()))?;
        program.validate(&self.topology)?;

        let split = TaskSplit::new(
            program.vec_size,
            self.topology.num_chips as usize,
            self.topology.max_batch,
        );
        let mut allocator = MemoryAllocator::new(self.base_address, self.topology.ddr_size);

        let out = allocator.alloc_outputs(&split, self.topology.pes_per_chip, program)?;

        let generator = InstructionGenerator::new(program, self.topology.pes_per_chip);
        let mut chip_streams = Vec::with_capacity(split.num_chips());
        for (chip, batches) in split.batches.iter().enumerate() {
            let mut streams = Vec::with_capacity(batches.len());
            for (round, &batch) in batches.iter().enumerate() {
                streams.push(generator.generate(batch, &out[chip][round])?);
            }
            chip_streams.push(streams);
        }
        let words: Vec<Vec<usize>> = chip_streams
            .iter()
            .map(|streams| streams.iter().map(ChipStream::len).collect())
            .collect();

        let inst = allocator.alloc_instructions(&words)?;
        let in_params = allocator.alloc_params(program)?;
        let operands = allocator.alloc_operands(&split, program)?;
        let allocation = MemoryAllocation {
            out,
            inst,
            in_params,
            operands,
            end: allocator.cursor(),
        };

        let global = FpgaSequencer::new(&self.topology, program).sequence(
            &split,
            &allocation,
            &chip_streams,
        )?;

        let instruction_bytes: Vec<u8> = chip_streams.iter().flatten().flat_map(ChipStream::to_bytes).collect();
        let instruction_bytes_device: Vec<u8> = global
            .iter()
            .flat_map(|inst| inst.encode().to_be_bytes())
            .collect();

        let executor = Executor {
            program: *program,
            instruction_bytes,
            instruction_bytes_device,
            in_params: allocation.input_span(),
            inst: allocation.inst_span(),
            out: allocation.out_span(),
        };
        debug!(
            %program,
            chip_words = executor.instruction_bytes.len() / 8,
            global_words = global.len(),
            ddr_end = allocation.end,
            "compiled"
        );

        Ok(Compilation {
            executor,
            split,
            allocation,
            chip_streams,
            global,
        })
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(Topology::DEFAULT)
    }
}

/// Compile for the reference board
pub fn compile(program: &Program) -> Result<Executor> {
    Compiler::default().compile(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modacc_isa::Operation;

    #[test]
    fn test_compile_single_batch() {
        let program = Program::vector(Operation::ModMul, 3, 2048, 0);
        let compilation = Compiler::default().compile_detailed(&program).unwrap();
        let executor = &compilation.executor;

        assert_eq!(executor.out.length, 3 * 256);
        assert_eq!(executor.out.address, 0);
        // params (576 bytes) and two operand vectors
        assert_eq!(executor.in_params.length, 576 + 2 * 3 * 256);
        assert_eq!(executor.inst.length as usize, executor.instruction_bytes.len());
        assert_eq!(executor.global_len(), compilation.global.len());
        assert_eq!(compilation.global.last(), Some(&GlobalInstruction::Done));
        assert_eq!(executor.global_stream().unwrap(), compilation.global);
    }

    #[test]
    fn test_base_address() {
        let program = Program::vector(Operation::ModAdd, 5, 512, 0);
        let executor = Compiler::default().with_base_address(0x1000).compile(&program).unwrap();
        assert_eq!(executor.out.address, 0x1000);
    }

    #[test]
    fn test_rejects_invalid_program() {
        let err = compile(&Program::vector(Operation::ModMul, 0, 2048, 0)).unwrap_err();
        assert!(matches!(err, CompileError::InvalidProgramParams(_)));
        let err = compile(&Program::vector(Operation::ModExp, 4, 2048, 100)).unwrap_err();
        assert!(matches!(err, CompileError::InvalidProgramParams(_)));
    }

    #[test]
    fn test_out_of_ddr() {
        let topology = Topology::new(1, 16, 4096, 2048).unwrap();
        let err = Compiler::new(topology)
            .compile(&Program::vector(Operation::ModMul, 64, 2048, 0))
            .unwrap_err();
        assert!(matches!(err, CompileError::OutOfDdrSpace { .. }));
    }
}
