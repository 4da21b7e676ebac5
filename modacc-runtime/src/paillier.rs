//! Paillier key material and plaintext encoding
//!
//! Keys use g = n + 1. Plaintexts are signed: values at or above ⌊2n/3⌋
//! decode as negative (`m − n`). The accelerator streams a message as
//! `2·|m| + sign` so one exponent field carries the sign bit.

use crate::error::{Result, RuntimeError};
use rand::RngCore;
use rug::integer::{IsPrime, Order};
use rug::Integer;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Modulus widths whose n and n² are both accelerator widths
pub const SUPPORTED_N_BITS: [u32; 3] = [512, 1024, 2048];

/// Uniform value below 2^bits
fn random_bits<R: RngCore + ?Sized>(rng: &mut R, bits: u32) -> Integer {
    let mut bytes = vec![0u8; bits.div_ceil(8) as usize];
    rng.fill_bytes(&mut bytes);
    let mut value = Integer::from_digits(&bytes, Order::Lsf);
    value.keep_bits_mut(bits);
    value
}

/// Prime in [2^(bits−1), 1.5·2^(bits−1)). The second-highest bit stays
/// clear so n = p·q keeps 4n/3 below 2^n_bits.
fn random_prime<R: RngCore + ?Sized>(rng: &mut R, bits: u32) -> Integer {
    let mut candidate = random_bits(rng, bits);
    candidate.set_bit(bits - 1, true);
    candidate.set_bit(bits - 2, false);
    candidate.next_prime()
}

/// Public half of a key pair
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub n: Integer,
    pub n_square: Integer,
    pub g: Integer,
    /// Accelerator width of n; ciphertexts use twice this
    pub n_bits: u32,
}

impl PublicKey {
    pub fn new(n: Integer, n_bits: u32) -> Result<Self> {
        if !SUPPORTED_N_BITS.contains(&n_bits) {
            return Err(RuntimeError::InvalidInput(format!(
                "key width {n_bits} is not one of {SUPPORTED_N_BITS:?}"
            )));
        }
        if n <= 3 || n.is_even() || n.significant_bits() > n_bits {
            return Err(RuntimeError::InvalidInput(format!(
                "modulus of {} bits does not fit a {n_bits}-bit key",
                n.significant_bits()
            )));
        }
        let n_square = Integer::from(n.square_ref());
        let g = Integer::from(&n + 1u32);
        Ok(Self { n, n_square, g, n_bits })
    }

    /// Ciphertext width in bits
    #[inline]
    pub fn p_bits(&self) -> u32 {
        2 * self.n_bits
    }

    /// ⌊2n/3⌋, the first residue that decodes as negative
    pub fn negative_threshold(&self) -> Integer {
        Integer::from(&self.n << 1u32) / 3u32
    }

    /// Whether `m` round-trips through encryption
    pub fn is_valid_plaintext(&self, m: &Integer) -> bool {
        let threshold = self.negative_threshold();
        if *m >= 0 {
            *m < threshold
        } else {
            Integer::from(m + &self.n) > threshold
        }
    }

    /// `2·|m| + sign`, the exponent field PaillierEnc streams
    pub fn encode_plaintext(&self, m: &Integer) -> Result<Integer> {
        if !self.is_valid_plaintext(m) {
            return Err(RuntimeError::InvalidInput(format!(
                "plaintext {m} is outside the signed range of this key"
            )));
        }
        let sign = u32::from(*m < 0);
        Ok(Integer::from(m.abs_ref()) * 2u32 + sign)
    }

    /// Map a residue mod n back to a signed plaintext
    pub fn decode_plaintext(&self, residue: Integer) -> Integer {
        if residue >= self.negative_threshold() {
            residue - &self.n
        } else {
            residue
        }
    }

    /// 1 + k·n mod n², an unblinded encryption of k
    pub fn trivial_ciphertext(&self, k: &Integer) -> Ciphertext {
        let k = Integer::from(k.rem_euc_ref(&self.n));
        Ciphertext((k * &self.n + 1u32) % &self.n_square)
    }

    /// Blinding factor in [1, n) coprime to n
    pub fn random_blinding<R: RngCore + ?Sized>(&self, rng: &mut R) -> Integer {
        loop {
            let r = random_bits(rng, self.n_bits) % &self.n;
            if r != 0 && Integer::from(r.gcd_ref(&self.n)) == 1 {
                return r;
            }
        }
    }

    /// Host encryption with an explicit blinding factor
    pub fn encrypt_with(&self, m: &Integer, r: &Integer) -> Result<Ciphertext> {
        if !self.is_valid_plaintext(m) {
            return Err(RuntimeError::InvalidInput(format!(
                "plaintext {m} is outside the signed range of this key"
            )));
        }
        let m = Integer::from(m.rem_euc_ref(&self.n));
        let gm = self
            .g
            .pow_mod_ref(&m, &self.n_square)
            .map(Integer::from)
            .ok_or(RuntimeError::NotInvertible)?;
        let rn = r
            .pow_mod_ref(&self.n, &self.n_square)
            .map(Integer::from)
            .ok_or(RuntimeError::NotInvertible)?;
        Ok(Ciphertext(gm * rn % &self.n_square))
    }
}

/// Private half of a key pair
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey {
    pub p: Integer,
    pub q: Integer,
    /// (p − 1)(q − 1)
    pub lambda: Integer,
    /// L(g^λ mod n²)⁻¹ mod n
    pub mu: Integer,
}

impl SecretKey {
    /// Host decryption
    pub fn decrypt(&self, pk: &PublicKey, ct: &Ciphertext) -> Result<Integer> {
        let x = ct
            .0
            .pow_mod_ref(&self.lambda, &pk.n_square)
            .map(Integer::from)
            .ok_or(RuntimeError::NotInvertible)?;
        let l = (x - 1u32) / &pk.n;
        Ok(pk.decode_plaintext(l * &self.mu % &pk.n))
    }
}

/// A Paillier ciphertext, a residue mod n²
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ciphertext(pub Integer);

impl Ciphertext {
    #[inline]
    pub fn value(&self) -> &Integer {
        &self.0
    }
}

impl From<Integer> for Ciphertext {
    fn from(value: Integer) -> Self {
        Self(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl KeyPair {
    /// Fresh key with an n of at most `n_bits` bits
    pub fn generate<R: RngCore + ?Sized>(n_bits: u32, rng: &mut R) -> Result<Self> {
        if !SUPPORTED_N_BITS.contains(&n_bits) {
            return Err(RuntimeError::InvalidInput(format!(
                "key width {n_bits} is not one of {SUPPORTED_N_BITS:?}"
            )));
        }
        loop {
            let p = random_prime(rng, n_bits / 2);
            let q = random_prime(rng, n_bits / 2);
            if p == q {
                continue;
            }
            let pair = Self::from_primes(p, q, n_bits)?;
            debug!(n_bits, bits = pair.public.n.significant_bits(), "generated key pair");
            return Ok(pair);
        }
    }

    pub fn from_primes(p: Integer, q: Integer, n_bits: u32) -> Result<Self> {
        if p == q
            || p.is_probably_prime(30) == IsPrime::No
            || q.is_probably_prime(30) == IsPrime::No
        {
            return Err(RuntimeError::InvalidInput("key factors must be distinct primes".into()));
        }
        let public = PublicKey::new(Integer::from(&p * &q), n_bits)?;
        let lambda = Integer::from(&p - 1u32) * Integer::from(&q - 1u32);
        let x = public
            .g
            .pow_mod_ref(&lambda, &public.n_square)
            .map(Integer::from)
            .ok_or(RuntimeError::NotInvertible)?;
        let l = (x - 1u32) / &public.n;
        let mu = l.invert(&public.n).map_err(|_| RuntimeError::NotInvertible)?;
        Ok(Self {
            public,
            secret: SecretKey { p, q, lambda, mu },
        })
    }
}
