//! Stress tests: uneven multi-batch splits, many chips, wide moduli

use modacc_compiler::{Compiler, CompileError};
use modacc_isa::{Operation, Program, Topology, MAX_ON_CHIP_VECTOR};
use modacc_runtime::{KeyPair, Runtime, RuntimeError, VectorJob};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rug::Integer;

fn residues(count: usize, modulus: &Integer, salt: u64) -> Vec<Integer> {
    (0..count as u64)
        .map(|i| (Integer::from(i + salt) << 200u32 | Integer::from(i * 7919)) % modulus)
        .collect()
}

#[test]
fn test_uneven_batches_keep_element_order() {
    // 3 chips, 3 PEs, batches of 5: partial groups and a short last round
    let topology = Topology::new(3, 3, 1 << 28, 5).unwrap();
    let p = (Integer::from(1) << 500u32) + 1u32;
    for size in [1usize, 2, 4, 5, 14, 16, 47] {
        let a = residues(size, &p, 1);
        let b = residues(size, &p, 2);
        let mut rt = Runtime::simulated(topology);
        let out = rt
            .execute(&VectorJob::new(Operation::ModMul, 512, 0, p.clone()).operand(a.clone()).operand(b.clone()))
            .unwrap();
        let expected: Vec<Integer> = a.iter().zip(&b).map(|(x, y)| Integer::from(x * y) % &p).collect();
        assert_eq!(out, expected, "size {size}");
    }
}

#[test]
fn test_sixteen_chips() {
    let topology = Topology::new(16, 2, 1 << 28, 3).unwrap();
    let p = Integer::from(2_147_483_647u32);
    let a = residues(100, &p, 9);
    let mut rt = Runtime::simulated(topology);
    let out = rt
        .execute(
            &VectorJob::new(Operation::ModAddConst, 512, 0, p.clone())
                .constant(Integer::from(12))
                .operand(a.clone()),
        )
        .unwrap();
    for (x, y) in a.iter().zip(&out) {
        assert_eq!(*y, Integer::from(x + 12u32) % &p);
    }
}

#[test]
fn test_paillier_many_batches_small_key() {
    // 512-bit key on a small board: 31 ciphertexts over several rounds
    let topology = Topology::new(2, 4, 1 << 28, 6).unwrap();
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let key = KeyPair::generate(512, &mut rng).unwrap();
    let (pk, sk) = (&key.public, &key.secret);
    let mut rt = Runtime::simulated(topology);

    let messages: Vec<Integer> = (0..31i64).map(|i| Integer::from((i - 15) * 1_000_003)).collect();
    let cts = rt.encrypt(pk, &messages, &mut rng).unwrap();
    assert_eq!(rt.decrypt(pk, sk, &cts).unwrap(), messages);

    let doubled = rt.add(pk, &cts, &cts).unwrap();
    let expected: Vec<Integer> = messages.iter().map(|m| Integer::from(m * 2u32)).collect();
    assert_eq!(rt.decrypt(pk, sk, &doubled).unwrap(), expected);
    assert_eq!(rt.driver().io().runs(), 6);
}

#[test]
fn test_max_batch_boundary() {
    let topology = Topology::new(1, 16, 1 << 30, MAX_ON_CHIP_VECTOR).unwrap();
    let p = Integer::from(65_537);
    let size = MAX_ON_CHIP_VECTOR as usize + 1;
    let a = residues(size, &p, 3);
    let mut rt = Runtime::simulated(topology);
    let out = rt
        .execute(&VectorJob::new(Operation::ModInvConstP, 512, 0, p.clone()).operand(
            a.iter().map(|x| if *x == 0 { Integer::from(1) } else { x.clone() }).collect(),
        ))
        .unwrap();
    assert_eq!(out.len(), size);
    assert!(out.iter().all(|y| *y != 0 && *y < p));
}

#[test]
fn test_ddr_exhaustion_is_a_compile_error() {
    let topology = Topology::new(1, 16, 1 << 20, 2048).unwrap();
    let err = Compiler::new(topology)
        .compile(&Program::vector(Operation::ModMul, 2048, 4096, 0))
        .unwrap_err();
    assert!(matches!(err, CompileError::OutOfDdrSpace { .. }));

    let mut rt = Runtime::simulated(topology);
    let p = Integer::from(7);
    let job = VectorJob::new(Operation::ModMul, 4096, 0, p)
        .operand(vec![Integer::from(1); 2048])
        .operand(vec![Integer::from(2); 2048]);
    assert!(matches!(
        rt.execute(&job),
        Err(RuntimeError::Compile(CompileError::OutOfDdrSpace { .. }))
    ));
}
