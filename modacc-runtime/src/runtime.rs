//! Composite operations over the accelerator
//!
//! Every public call opens the device, runs one or two compiled programs,
//! and closes it again. When the second program of a pair fails the first
//! result is dropped and the whole call fails.

use crate::driver::{DeviceDriver, DeviceIo, DriverConfig};
use crate::encode::{decode_output, VectorJob};
use crate::error::{Result, RuntimeError};
use crate::paillier::{Ciphertext, PublicKey, SecretKey};
use crate::sim::SimulatedIo;
use crate::xdma::XdmaIo;
use modacc_compiler::Compiler;
use modacc_isa::{Operation, Topology};
use rand::RngCore;
use rug::Integer;
use std::time::Instant;
use tracing::debug;

/// Device driver plus compiler for one board
#[derive(Debug)]
pub struct Runtime<I> {
    driver: DeviceDriver<I>,
    compiler: Compiler,
}

impl Runtime<SimulatedIo> {
    /// Runtime over the functional board model
    pub fn simulated(topology: Topology) -> Self {
        Self::new(SimulatedIo::new(topology), DriverConfig::immediate(), topology)
    }
}

impl Runtime<XdmaIo> {
    /// Runtime over the reference PCIe board
    pub fn xdma(config: DriverConfig) -> Self {
        Self::new(XdmaIo::new(config.clone()), config, Topology::DEFAULT)
    }
}

impl<I: DeviceIo> Runtime<I> {
    /// Runtime over any device surface, compiling for `topology`
    pub fn new(io: I, config: DriverConfig, topology: Topology) -> Self {
        Self {
            driver: DeviceDriver::new(io, config),
            compiler: Compiler::new(topology),
        }
    }

    /// Board shape programs are compiled for
    pub fn topology(&self) -> &Topology {
        self.compiler.topology()
    }

    /// Underlying driver, for inspecting the device surface
    pub fn driver(&self) -> &DeviceDriver<I> {
        &self.driver
    }

    /// Mutable driver, for raw runs outside the composite operations
    pub fn driver_mut(&mut self) -> &mut DeviceDriver<I> {
        &mut self.driver
    }

    /// Run `f` with the device open, closing it on every path
    fn session<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.driver.open()?;
        let result = f(self);
        self.driver.close();
        result
    }

    /// Compile and run one job on an open device
    fn run_job(&mut self, job: &VectorJob) -> Result<Vec<Integer>> {
        let program = job.program();
        let executor = self.compiler.compile(&program)?;
        let input = job.encode_input(self.topology().pes_per_chip)?;
        let started = Instant::now();
        let out = self.driver.run(&executor, &input)?;
        let results = decode_output(&out, program.p_bytes() as usize)?;
        if results.len() != job.vec_size() {
            return Err(RuntimeError::LengthMismatch {
                expected: job.vec_size(),
                found: results.len(),
            });
        }
        debug!(%program, elapsed_us = started.elapsed().as_micros() as u64, "job done");
        Ok(results)
    }

    /// Run a single vector operation
    pub fn execute(&mut self, job: &VectorJob) -> Result<Vec<Integer>> {
        job.validate()?;
        if job.vec_size() == 0 {
            return Ok(Vec::new());
        }
        self.session(|rt| rt.run_job(job))
    }

    /// Encrypt with a fresh blinding factor per message
    pub fn encrypt<R: RngCore + ?Sized>(
        &mut self,
        pk: &PublicKey,
        messages: &[Integer],
        rng: &mut R,
    ) -> Result<Vec<Ciphertext>> {
        let blinding: Vec<Integer> = messages.iter().map(|_| pk.random_blinding(rng)).collect();
        self.encrypt_with_blinding(pk, messages, &blinding)
    }

    /// Encrypt with caller-chosen blinding factors; a factor of 1 leaves
    /// that ciphertext unblinded
    pub fn encrypt_with_blinding(
        &mut self,
        pk: &PublicKey,
        messages: &[Integer],
        blinding: &[Integer],
    ) -> Result<Vec<Ciphertext>> {
        if messages.len() != blinding.len() {
            return Err(RuntimeError::LengthMismatch {
                expected: messages.len(),
                found: blinding.len(),
            });
        }
        let encoded = messages
            .iter()
            .map(|m| pk.encode_plaintext(m))
            .collect::<Result<Vec<_>>>()?;
        for r in blinding {
            if *r <= 0 || *r >= pk.n {
                return Err(RuntimeError::InvalidInput(format!("blinding factor {r} is not in [1, n)")));
            }
        }
        let job = VectorJob::new(Operation::PaillierEnc, pk.p_bits(), pk.n_bits, pk.n_square.clone())
            .constant(pk.n.clone())
            .operand(encoded)
            .operand(blinding.to_vec());
        Ok(self.execute(&job)?.into_iter().map(Ciphertext).collect())
    }

    /// c^λ on the device, L on the host, ·μ on the device
    pub fn decrypt(&mut self, pk: &PublicKey, sk: &SecretKey, cts: &[Ciphertext]) -> Result<Vec<Integer>> {
        let values = ciphertext_values(pk, cts)?;
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let lifted = VectorJob::new(Operation::ModExpConstE, pk.p_bits(), pk.n_bits, pk.n_square.clone())
            .constant(sk.lambda.clone())
            .operand(values);
        let residues = self.session(|rt| {
            let powers = rt.run_job(&lifted)?;
            let l: Vec<Integer> = powers.into_iter().map(|x| (x - 1u32) / &pk.n).collect();
            let scale = VectorJob::new(Operation::ModMulConst, pk.n_bits, 0, pk.n.clone())
                .constant(Integer::from(sk.mu.rem_euc_ref(&pk.n)))
                .operand(l);
            rt.run_job(&scale)
        })?;
        Ok(residues.into_iter().map(|m| pk.decode_plaintext(m)).collect())
    }

    /// Homomorphic addition of two ciphertext vectors
    pub fn add(&mut self, pk: &PublicKey, a: &[Ciphertext], b: &[Ciphertext]) -> Result<Vec<Ciphertext>> {
        let (a, b) = paired(pk, a, b)?;
        let job = VectorJob::new(Operation::ModMul, pk.p_bits(), 0, pk.n_square.clone())
            .operand(a)
            .operand(b);
        Ok(self.execute(&job)?.into_iter().map(Ciphertext).collect())
    }

    /// Add the plaintext `k` to every ciphertext
    pub fn add_scalar(&mut self, pk: &PublicKey, cts: &[Ciphertext], k: &Integer) -> Result<Vec<Ciphertext>> {
        let values = ciphertext_values(pk, cts)?;
        let job = VectorJob::new(Operation::ModMulConst, pk.p_bits(), 0, pk.n_square.clone())
            .constant(pk.trivial_ciphertext(k).0)
            .operand(values);
        Ok(self.execute(&job)?.into_iter().map(Ciphertext).collect())
    }

    /// Subtract the plaintext `k` from every ciphertext: multiply by the
    /// trivial encryption of −k
    pub fn sub_scalar(&mut self, pk: &PublicKey, cts: &[Ciphertext], k: &Integer) -> Result<Vec<Ciphertext>> {
        let values = ciphertext_values(pk, cts)?;
        let job = VectorJob::new(Operation::ModMulConst, pk.p_bits(), 0, pk.n_square.clone())
            .constant(pk.trivial_ciphertext(&Integer::from(-k)).0)
            .operand(values);
        Ok(self.execute(&job)?.into_iter().map(Ciphertext).collect())
    }

    /// Homomorphic negation: c⁻¹ mod n² encrypts −m
    pub fn negate(&mut self, pk: &PublicKey, cts: &[Ciphertext]) -> Result<Vec<Ciphertext>> {
        let values = ciphertext_values(pk, cts)?;
        let job = VectorJob::new(Operation::ModInvConstP, pk.p_bits(), 0, pk.n_square.clone()).operand(values);
        Ok(self.execute(&job)?.into_iter().map(Ciphertext).collect())
    }

    /// Homomorphic subtraction: invert `b` mod n², then multiply
    pub fn sub(&mut self, pk: &PublicKey, a: &[Ciphertext], b: &[Ciphertext]) -> Result<Vec<Ciphertext>> {
        let (a, b) = paired(pk, a, b)?;
        if a.is_empty() {
            return Ok(Vec::new());
        }
        let invert = VectorJob::new(Operation::ModInvConstP, pk.p_bits(), 0, pk.n_square.clone()).operand(b);
        let results = self.session(|rt| {
            let inverses = rt.run_job(&invert)?;
            let product = VectorJob::new(Operation::ModMul, pk.p_bits(), 0, pk.n_square.clone())
                .operand(a)
                .operand(inverses);
            rt.run_job(&product)
        })?;
        Ok(results.into_iter().map(Ciphertext).collect())
    }

    /// Multiply every ciphertext by the plaintext `k`
    pub fn mul_scalar(&mut self, pk: &PublicKey, cts: &[Ciphertext], k: &Integer) -> Result<Vec<Ciphertext>> {
        let values = ciphertext_values(pk, cts)?;
        let job = VectorJob::new(Operation::ModExpConstE, pk.p_bits(), pk.n_bits, pk.n_square.clone())
            .constant(Integer::from(k.rem_euc_ref(&pk.n)))
            .operand(values);
        Ok(self.execute(&job)?.into_iter().map(Ciphertext).collect())
    }

    /// Multiply each ciphertext by its own plaintext scalar
    pub fn mul(&mut self, pk: &PublicKey, cts: &[Ciphertext], ks: &[Integer]) -> Result<Vec<Ciphertext>> {
        if cts.len() != ks.len() {
            return Err(RuntimeError::LengthMismatch {
                expected: cts.len(),
                found: ks.len(),
            });
        }
        let values = ciphertext_values(pk, cts)?;
        let exponents = ks.iter().map(|k| Integer::from(k.rem_euc_ref(&pk.n))).collect();
        let job = VectorJob::new(Operation::ModExp, pk.p_bits(), pk.n_bits, pk.n_square.clone())
            .operand(values)
            .operand(exponents);
        Ok(self.execute(&job)?.into_iter().map(Ciphertext).collect())
    }
}

/// Raw residues, each checked to lie in [0, n²)
fn ciphertext_values(pk: &PublicKey, cts: &[Ciphertext]) -> Result<Vec<Integer>> {
    cts.iter()
        .map(|ct| {
            if ct.0 < 0 || ct.0 >= pk.n_square {
                Err(RuntimeError::InvalidInput("ciphertext is not reduced mod n²".into()))
            } else {
                Ok(ct.0.clone())
            }
        })
        .collect()
}

fn paired(pk: &PublicKey, a: &[Ciphertext], b: &[Ciphertext]) -> Result<(Vec<Integer>, Vec<Integer>)> {
    if a.len() != b.len() {
        return Err(RuntimeError::LengthMismatch {
            expected: a.len(),
            found: b.len(),
        });
    }
    Ok((ciphertext_values(pk, a)?, ciphertext_values(pk, b)?))
}
