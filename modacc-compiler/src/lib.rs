//! Accelerator Program Compiler
//!
//! Lower a vector modular-arithmetic program into the chip and board
//! instruction streams of the accelerator, with its DDR layout.
//!
//! ## Example
//!
//! ```rust
//! use modacc_compiler::compile;
//! use modacc_isa::{Operation, Program};
//!
//! let program = Program::vector(Operation::ModMul, 100, 2048, 0);
//! let executor = compile(&program).unwrap();
//! assert_eq!(executor.out.length, 100 * 256);
//! ```

pub mod alloc;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod generator;
pub mod sequencer;
pub mod split;

pub use alloc::{DdrRegion, MemoryAllocation, MemoryAllocator};
pub use compiler::{compile, Compilation, Compiler};
pub use error::{CompileError, Result};
pub use executor::Executor;
pub use generator::{ChipStream, InstructionGenerator, SramLayout};
pub use sequencer::{sync_tiers, ChipRemainder, FpgaSequencer};
pub use split::TaskSplit;
