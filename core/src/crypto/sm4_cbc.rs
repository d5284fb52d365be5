//! §4.2 Local Cipher — SM4, 128-bit key, 16-byte blocks, CBC, PKCS#7.
//!
//! Output layout: `IV(16) || CBC-Encrypt(key, PKCS7(plaintext, 16))`.
//!
//! ENFORCED INVARIANTS:
//! - IV is fresh and random on every `encrypt` call.
//! - Decrypt rejects short, misaligned, or badly-padded input.
//! - The key is fetched lazily through a [`KeyProvider`] capability so
//!   construction ordering (identity → key → cipher) doesn't force the
//!   caller to have the key in hand at cipher-construction time.

use crate::memory::GuardedKey16;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand_core::{OsRng, RngCore};
use sm4::Sm4;

const BLOCK_LEN: usize = 16;

type Enc = cbc::Encryptor<Sm4>;
type Dec = cbc::Decryptor<Sm4>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherError {
    /// Ciphertext shorter than the 16-byte IV.
    IVShort,
    /// Ciphertext body length is not a multiple of the block size.
    BlockMisaligned,
    /// PKCS#7 padding failed to validate after decryption.
    PaddingInvalid,
    /// The key provider could not supply a key.
    KeyUnavailable,
    /// The OS CSPRNG could not supply a fresh IV.
    RandomUnavailable,
}

/// Lazily supplies the machine-bound SM4 key.
///
/// Lets [`LocalCipher`] be constructed before identity/key derivation
/// has necessarily completed, matching the required startup ordering.
pub trait KeyProvider: Send + Sync {
    fn key(&self) -> Result<GuardedKey16, CipherError>;
}

/// A [`KeyProvider`] that always holds a fixed key, for tests and for
/// callers that have already derived the key eagerly.
pub struct FixedKey(pub GuardedKey16);

impl KeyProvider for FixedKey {
    fn key(&self) -> Result<GuardedKey16, CipherError> {
        Ok(GuardedKey16::new(*self.0.borrow()))
    }
}

pub struct LocalCipher {
    provider: Box<dyn KeyProvider>,
}

impl LocalCipher {
    pub fn new(provider: Box<dyn KeyProvider>) -> Self {
        Self { provider }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let key = self.provider.key()?;

        let mut iv = [0u8; BLOCK_LEN];
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|_| CipherError::RandomUnavailable)?;

        let mut buf = plaintext.to_vec();
        let pt_len = buf.len();
        buf.resize(pt_len + BLOCK_LEN, 0);

        let ct_len = Enc::new_from_slices(key.borrow(), &iv)
            .expect("key and IV lengths are fixed at compile time")
            .encrypt_padded_mut::<Pkcs7>(&mut buf, pt_len)
            .map_err(|_| CipherError::BlockMisaligned)?
            .len();
        buf.truncate(ct_len);

        let mut out = Vec::with_capacity(BLOCK_LEN + buf.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&buf);
        Ok(out)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if ciphertext.len() < BLOCK_LEN {
            return Err(CipherError::IVShort);
        }

        let (iv, body) = ciphertext.split_at(BLOCK_LEN);
        if body.is_empty() || body.len() % BLOCK_LEN != 0 {
            return Err(CipherError::BlockMisaligned);
        }

        let key = self.provider.key()?;
        let mut buf = body.to_vec();
        let mut iv_arr = [0u8; BLOCK_LEN];
        iv_arr.copy_from_slice(iv);

        let pt = Dec::new_from_slices(key.borrow(), &iv_arr)
            .expect("key and IV lengths are fixed at compile time")
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| CipherError::PaddingInvalid)?;

        Ok(pt.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> LocalCipher {
        LocalCipher::new(Box::new(FixedKey(GuardedKey16::new([0x42; 16]))))
    }

    #[test]
    fn round_trip_empty() {
        let c = cipher();
        let ct = c.encrypt(b"").unwrap();
        assert_eq!(c.decrypt(&ct).unwrap(), b"");
    }

    #[test]
    fn round_trip_various_lengths() {
        let c = cipher();
        for len in [0usize, 1, 15, 16, 17, 100, 1000] {
            let pt = vec![0xABu8; len];
            let ct = c.encrypt(&pt).unwrap();
            assert_eq!(c.decrypt(&ct).unwrap(), pt);
        }
    }

    #[test]
    fn iv_is_randomized_per_call() {
        let c = cipher();
        let a = c.encrypt(b"same plaintext").unwrap();
        let b = c.encrypt(b"same plaintext").unwrap();
        assert_ne!(&a[..16], &b[..16], "IV must not repeat");
    }

    #[test]
    fn decrypt_rejects_short_input() {
        let c = cipher();
        assert_eq!(c.decrypt(&[0u8; 8]), Err(CipherError::IVShort));
    }

    #[test]
    fn decrypt_rejects_misaligned_body() {
        let c = cipher();
        let mut bad = vec![0u8; 16 + 5];
        bad[0] = 1;
        assert_eq!(c.decrypt(&bad), Err(CipherError::BlockMisaligned));
    }

    #[test]
    fn decrypt_rejects_bad_padding() {
        let c = cipher();
        let mut ct = c.encrypt(b"hello world").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xFF;
        assert_eq!(c.decrypt(&ct), Err(CipherError::PaddingInvalid));
    }
}
