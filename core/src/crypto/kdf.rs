//! §4.1 key derivation: PBKDF2 with SM3 as the PRF.
//!
//! TRUST LEVEL: Secure Core
//!
//! FORMAL INVARIANTS:
//! - Deterministic: same fingerprint always derives the same key.
//! - Output lives only in a GuardedKey16, never a bare stack array.
//! - No panics.

use crate::memory::GuardedKey16;
use hmac::Hmac;
use sm3::Sm3;

/// Build-time salt. Fixed so the derivation is reproducible across
/// restarts of the same binary without persisting a salt file.
const BUILD_SALT: &[u8] = b"classifyd-agent-key-salt-v1";

const ITERATIONS: u32 = 4096;
const KEY_LEN: usize = 16;

/// Derive the per-machine SM4 key from the hardware fingerprint string.
///
/// `fingerprint` is the hex-encoded SM3(machine_id + "|" + mac) string
/// computed by [`crate::identity::fingerprint`].
pub fn derive_machine_key(fingerprint: &str) -> GuardedKey16 {
    let mut out = GuardedKey16::zeroed();

    pbkdf2::pbkdf2::<Hmac<Sm3>>(
        fingerprint.as_bytes(),
        BUILD_SALT,
        ITERATIONS,
        out.borrow_mut(),
    )
    .expect("PBKDF2 output length fixed at compile time");

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_machine_key("abc123");
        let b = derive_machine_key("abc123");
        assert_eq!(a.borrow(), b.borrow());
    }

    #[test]
    fn different_fingerprints_diverge() {
        let a = derive_machine_key("abc123");
        let b = derive_machine_key("xyz789");
        assert_ne!(a.borrow(), b.borrow());
    }

    #[test]
    fn key_len_is_128_bits() {
        let k = derive_machine_key("abc123");
        assert_eq!(k.borrow().len(), KEY_LEN);
    }
}
