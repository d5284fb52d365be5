//! §3/§4.1 Device identity subsystem (Secure Core).
//!
//! PURPOSE:
//! - Compute a stable, non-secret hardware fingerprint.
//! - Load/persist the server-assigned device id.
//! - Derive the per-machine SM4 key.
//!
//! This module is a root dependency for the cipher, the hybrid store,
//! and the transport layer's `User-Agent` construction.

#![deny(clippy::derive_debug)]

pub mod fingerprint;
pub mod registry;

pub use fingerprint::compute_fingerprint;
pub use registry::{DeviceIdentity, IdentityError};
