//! Stateless cryptography primitives (Secure Core).
//!
//! NO key storage. NO lifecycle. NO state.
//!
//! §4.2 Local Cipher and the §4.1 PBKDF2-SM3 key derivation live here.

#![deny(clippy::derive_debug)]

pub mod kdf;
pub mod sm3_hash;
pub mod sm4_cbc;

pub use kdf::derive_machine_key;
pub use sm3_hash::{hash_sm3, HashOutput};
pub use sm4_cbc::{CipherError, KeyProvider, LocalCipher};
