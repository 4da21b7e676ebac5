//! # Modular-Arithmetic Accelerator Runtime
//!
//! Drive compiled programs on the accelerator and build Paillier
//! operations on top of them.
//!
//! - [`driver`]: the run protocol over any [`DeviceIo`] backend
//! - [`xdma`]: the Linux XDMA PCIe backend
//! - [`sim`]: a functional model of the board for hosts without one
//! - [`encode`]: input and output byte layouts
//! - [`paillier`]: keys, ciphertexts and plaintext encoding
//! - [`runtime`]: encrypt, decrypt and the homomorphic operations
//!
//! ## Example
//!
//! ```rust,no_run
//! use modacc_isa::Topology;
//! use modacc_runtime::{KeyPair, Runtime};
//! use rug::Integer;
//!
//! let mut rng = rand::rng();
//! let key = KeyPair::generate(1024, &mut rng).unwrap();
//! let mut rt = Runtime::simulated(Topology::DEFAULT);
//! let cts = rt.encrypt(&key.public, &[Integer::from(12345)], &mut rng).unwrap();
//! let sum = rt.add(&key.public, &cts, &cts).unwrap();
//! assert_eq!(rt.decrypt(&key.public, &key.secret, &sum).unwrap()[0], 24690);
//! ```

pub mod driver;
pub mod encode;
pub mod error;
pub mod paillier;
pub mod runtime;
pub mod sim;
pub mod xdma;

pub use driver::{DeviceDriver, DeviceIo, DriverConfig};
pub use encode::{decode_output, ByteWriter, VectorJob};
pub use error::{DeviceError, Result, RuntimeError};
pub use paillier::{Ciphertext, KeyPair, PublicKey, SecretKey, SUPPORTED_N_BITS};
pub use runtime::Runtime;
pub use sim::{Fault, SimulatedIo};
pub use xdma::XdmaIo;
