//! Integration tests for the accelerator compiler
//!
//! Covers the whole lowering path:
//! - DDR regions never overlap and stay below the final cursor
//! - The board stream releases exactly the instructions each chip holds
//! - Chip streams and instruction regions agree

use modacc_compiler::{compile, Compilation, Compiler, DdrRegion};
use modacc_isa::{
    ChipInstruction, DataType, GlobalInstruction, Operation, Program, Topology, CHIP_WORD_BYTES,
};
use proptest::prelude::*;

/// Per-chip totals released by the global stream: (announced words, repeat times, batches)
fn released(compilation: &Compilation, topology: &Topology) -> Vec<(u64, u64, u64)> {
    let mut totals = vec![(0u64, 0u64, 0u64); topology.num_chips as usize];
    for inst in &compilation.global {
        match inst {
            GlobalInstruction::RegisterAccess(r)
                if r.data_type == DataType::WriteInstLength.to_u8() =>
            {
                for chip in topology.chips_in_mask(r.chip_mask) {
                    totals[chip].0 += r.data as u64;
                }
            }
            GlobalInstruction::Repeat(r) => {
                for chip in topology.chips_in_mask(r.chip_mask) {
                    totals[chip].1 += r.times as u64;
                }
            }
            GlobalInstruction::Transfer(t) if t.data_type == DataType::WriteInst.to_u8() => {
                for chip in topology.chips_in_mask(t.chip_mask) {
                    totals[chip].2 += 1;
                }
            }
            _ => {}
        }
    }
    totals
}

fn check_sync_invariant(compilation: &Compilation, topology: &Topology) {
    let totals = released(compilation, topology);
    for (chip, streams) in compilation.chip_streams.iter().enumerate() {
        let words: u64 = streams.iter().map(|s| s.len() as u64).sum();
        let segments: u64 = streams.iter().map(|s| s.splits.len() as u64).sum();
        let (announced, repeats, batches) = totals[chip];
        assert_eq!(announced, words, "chip {chip} announced words");
        assert_eq!(batches, streams.len() as u64, "chip {chip} batches");
        assert_eq!(batches + repeats, segments, "chip {chip} segments");
    }
}

fn check_no_overlap(compilation: &Compilation) {
    let mut regions: Vec<DdrRegion> = compilation
        .allocation
        .regions()
        .into_iter()
        .filter(|r| r.length > 0)
        .collect();
    regions.sort_by_key(|r| r.address);
    for pair in regions.windows(2) {
        assert!(!pair[0].overlaps(&pair[1]), "{} overlaps {}", pair[0], pair[1]);
    }
    for region in &regions {
        assert!(region.end() <= compilation.allocation.end);
    }
}

// ============================================================================
// Fixed Scenarios
// ============================================================================

#[test]
fn test_uneven_last_batch() {
    // 8 chips × 2048: 20000 elements leave chip 1 with a short second batch
    let topology = Topology::DEFAULT;
    let program = Program::vector(Operation::ModMul, 20000, 1024, 0);
    let compilation = Compiler::new(topology).compile_detailed(&program).unwrap();

    assert_eq!(compilation.split.batches[0], vec![2048, 2048]);
    assert_eq!(compilation.split.batches[1], vec![2048, 1568]);
    assert_eq!(compilation.split.batches[2], vec![2048]);
    check_sync_invariant(&compilation, &topology);
    check_no_overlap(&compilation);
}

#[test]
fn test_bring_up_block() {
    let program = Program::vector(Operation::ModAdd, 4, 512, 0);
    let compilation = Compiler::default().compile_detailed(&program).unwrap();
    let global = &compilation.global;

    assert_eq!(global[0], GlobalInstruction::Nop);
    let GlobalInstruction::RegisterAccess(pin_mux) = global[1] else {
        panic!("expected register access");
    };
    assert_eq!(pin_mux.data_type, DataType::WriteReg.to_u8());
    assert_eq!(pin_mux.data_address, 0x68);
    let GlobalInstruction::Transfer(params) = global[3] else {
        panic!("expected transfer");
    };
    assert_eq!(params.chip_mask, Topology::DEFAULT.all_chips_mask());
    assert_eq!(params.ddr_address as u64, compilation.allocation.in_params.address);
    assert_eq!(params.length, program.param_bytes());
    assert_eq!(global[4], GlobalInstruction::WAIT);
}

#[test]
fn test_instruction_regions_hold_streams() {
    let program = Program::vector(Operation::PaillierEnc, 40, 1024, 512);
    let topology = Topology::new(3, 4, 1 << 30, 8).unwrap();
    let compilation = Compiler::new(topology).compile_detailed(&program).unwrap();

    let mut offset = 0usize;
    let bytes = &compilation.executor.instruction_bytes;
    for (chip, streams) in compilation.chip_streams.iter().enumerate() {
        for (round, stream) in streams.iter().enumerate() {
            let region = compilation.allocation.inst[chip][round];
            assert_eq!(region.length as usize, stream.len() * CHIP_WORD_BYTES);
            let chunk = &bytes[offset..offset + region.length as usize];
            let first = u64::from_le_bytes(chunk[..8].try_into().unwrap());
            assert_eq!(ChipInstruction::decode(first).unwrap(), stream.words[0]);
            offset += region.length as usize;
        }
    }
    assert_eq!(offset, bytes.len());
    check_sync_invariant(&compilation, &topology);
}

#[test]
fn test_global_stream_limit() {
    // one-element batches on one chip need far more than 4096 board words
    let topology = Topology::new(1, 16, 1 << 30, 1).unwrap();
    let err = Compiler::new(topology)
        .compile(&Program::vector(Operation::ModMul, 1000, 512, 0))
        .unwrap_err();
    assert!(err.to_string().contains("global stream"));
}

#[test]
fn test_executor_image_roundtrip() {
    let executor = compile(&Program::vector(Operation::ModExpConstA, 300, 2048, 1024)).unwrap();
    let restored = modacc_compiler::Executor::from_bytes(&executor.to_bytes()).unwrap();
    assert_eq!(restored, executor);
}

// ============================================================================
// Properties
// ============================================================================

fn arb_operation() -> impl Strategy<Value = Operation> {
    (0usize..Operation::ALL.len()).prop_map(|i| Operation::ALL[i])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_regions_never_overlap(
        operation in arb_operation(),
        vec_size in 1u32..3000,
        chips in 1u32..=8,
        pes in 4u32..=16,
        max_batch in 16u32..=512,
    ) {
        let topology = Topology::new(chips, pes, 1 << 31, max_batch).unwrap();
        let program = Program::vector(operation, vec_size, 512, 512);
        let compilation = Compiler::new(topology).compile_detailed(&program).unwrap();
        check_no_overlap(&compilation);
        prop_assert_eq!(compilation.executor.out.length, vec_size as u64 * 64);
    }

    #[test]
    fn test_every_chip_released_exactly(
        operation in arb_operation(),
        vec_size in 1u32..3000,
        chips in 1u32..=8,
        pes in 4u32..=16,
        max_batch in 16u32..=512,
    ) {
        let topology = Topology::new(chips, pes, 1 << 31, max_batch).unwrap();
        let program = Program::vector(operation, vec_size, 512, 512);
        let compilation = Compiler::new(topology).compile_detailed(&program).unwrap();
        check_sync_invariant(&compilation, &topology);
    }
}
