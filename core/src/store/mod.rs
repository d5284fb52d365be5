//! §4.3 Hybrid Store — bounded in-memory queue with encrypted spill to
//! a per-data-family table in an embedded relational database.

pub mod hybrid;
pub mod schema;

pub use hybrid::{HybridStore, StorageError};
