//! Sealed SM3 hashing (NON-SECRET).
//!
//! Hash outputs are not secrets: they may be logged, compared, stored.

use sm3::{Digest, Sm3};
use std::io::{self, Read};

/// Opaque 256-bit SM3 digest.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HashOutput([u8; 32]);

impl HashOutput {
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl core::fmt::Debug for HashOutput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "HashOutput({})", self.to_hex())
    }
}

/// Compute the SM3 digest of an in-memory buffer.
pub fn hash_sm3(data: &[u8]) -> HashOutput {
    let mut h = Sm3::new();
    h.update(data);
    let out = h.finalize();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    HashOutput(buf)
}

/// Stream an arbitrary reader through SM3 without buffering it whole.
///
/// Used by the integrity monitor (self-hash of the running executable)
/// and available to the detection pipeline for large files.
pub fn hash_sm3_reader<R: Read>(mut reader: R) -> io::Result<HashOutput> {
    let mut h = Sm3::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        h.update(&buf[..n]);
    }
    let out = h.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&out);
    Ok(HashOutput(digest))
}
