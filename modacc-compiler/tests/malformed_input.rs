//! Programs and images the compiler must refuse

use modacc_compiler::{compile, CompileError, Compiler, Executor};
use modacc_isa::{Operation, Program, Topology};

#[test]
fn test_unsupported_modulus_widths() {
    for p_bits in [0, 256, 1536, 8192] {
        let err = compile(&Program::vector(Operation::ModMul, 4, p_bits, 0)).unwrap_err();
        assert!(
            matches!(err, CompileError::InvalidProgramParams(ref msg) if msg.contains("modulus width")),
            "{p_bits}: {err}"
        );
    }
}

#[test]
fn test_bad_exponent_widths() {
    for e_bits in [0, 128, 1000, 8192, 9000] {
        let err = compile(&Program::vector(Operation::ModExpConstE, 4, 1024, e_bits)).unwrap_err();
        assert!(matches!(err, CompileError::InvalidProgramParams(_)), "{e_bits}");
    }
}

#[test]
fn test_empty_vector() {
    let err = compile(&Program::vector(Operation::PaillierEnc, 0, 2048, 1024)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid program parameters: vector size must be positive"
    );
}

#[test]
fn test_group_output_window() {
    // 16 × 4096 bits fills the interrupt window exactly
    let topology = Topology::new(2, 16, 1 << 30, 64).unwrap();
    assert!(Compiler::new(topology)
        .compile(&Program::vector(Operation::ModMul, 40, 4096, 0))
        .is_ok());
}

#[test]
fn test_invalid_topology() {
    let topology = Topology {
        num_chips: 0,
        ..Topology::DEFAULT
    };
    let err = Compiler::new(topology)
        .compile(&Program::vector(Operation::ModMul, 4, 1024, 0))
        .unwrap_err();
    assert!(err.to_string().contains("Chip count"));
}

#[test]
fn test_sram_overflow_surfaces_as_address_overflow() {
    let err = compile(&Program::vector(Operation::ModExp, 4096, 4096, 7936)).unwrap_err();
    assert!(matches!(err, CompileError::AddressOverflow { .. }));
}

#[test]
fn test_garbage_image() {
    assert!(matches!(
        Executor::from_bytes(b"not an executor image at all"),
        Err(CompileError::InvalidExecutor(_))
    ));
}
