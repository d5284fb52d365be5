//! §7 error taxonomy (kinds, not types) for the Secure Core.
//!
//! `core` stays dependency-light: these are plain enums, not
//! `thiserror`-derived, matching the teacher's `KeystoreError` /
//! `SessionError` shape. Higher layers (`detect`, `transport`, `agent`)
//! wrap these with `thiserror` where richer messages are useful.

pub use crate::crypto::sm4_cbc::CipherError;
pub use crate::identity::registry::IdentityError;
pub use crate::store::hybrid::StorageError;

/// Fatal at startup: config, identity, cipher setup, storage setup.
#[derive(Debug)]
pub enum FatalError {
    Config(String),
    Identity(IdentityError),
    Storage(StorageError),
}

impl core::fmt::Display for FatalError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FatalError::Config(msg) => write!(f, "config error: {msg}"),
            FatalError::Identity(e) => write!(f, "identity error: {e}"),
            FatalError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for FatalError {}

impl From<IdentityError> for FatalError {
    fn from(e: IdentityError) -> Self {
        FatalError::Identity(e)
    }
}

impl From<StorageError> for FatalError {
    fn from(e: StorageError) -> Self {
        FatalError::Storage(e)
    }
}
