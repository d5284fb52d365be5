//! Connection bootstrap for the hybrid store's disk tier.
//!
//! Single-writer discipline: one connection per open database, WAL
//! journaling, synchronous=NORMAL, temp_store=MEMORY, foreign_keys on.

use libsql::{Builder, Connection, Database};
use std::path::Path;

use crate::store::hybrid::StorageError;

/// Open (creating if absent) the embedded database at `path`.
pub async fn open_database(path: &Path) -> Result<Database, StorageError> {
    let url = path.to_string_lossy().to_string();
    Builder::new_local(&url)
        .build()
        .await
        .map_err(|e| StorageError::Open(e.to_string()))
}

/// Acquire the single writer connection, applying the required pragmas.
pub async fn open_connection(db: &Database) -> Result<Connection, StorageError> {
    let conn = db
        .connect()
        .map_err(|e| StorageError::Open(e.to_string()))?;

    for pragma in [
        "PRAGMA journal_mode=WAL",
        "PRAGMA synchronous=NORMAL",
        "PRAGMA temp_store=MEMORY",
        "PRAGMA foreign_keys=ON",
    ] {
        conn.execute(pragma, ())
            .await
            .map_err(|e| StorageError::Open(e.to_string()))?;
    }

    Ok(conn)
}

/// Create the per-family table if it doesn't exist yet.
pub async fn ensure_table(conn: &Connection, table: &str) -> Result<(), StorageError> {
    let ddl = format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ciphertext BLOB NOT NULL,
            created_at INTEGER NOT NULL
        )"
    );
    conn.execute(&ddl, ())
        .await
        .map_err(|e| StorageError::Open(e.to_string()))?;
    Ok(())
}
