//! §4.3 Hybrid Store implementation.
//!
//! `push`, `pop_all`, and `flush_memory_to_disk` are mutually exclusive
//! on a given store — enforced by a single `tokio::sync::Mutex` guarding
//! both the in-memory buffer and the one disk connection this store
//! owns (single-writer discipline, §5).

use crate::crypto::sm4_cbc::{CipherError, LocalCipher};
use crate::store::schema;
use libsql::{Connection, Database};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

const DISK_BATCH_SIZE: usize = 100;

#[derive(Debug)]
pub enum StorageError {
    Open(String),
    Query(String),
    Cipher(CipherError),
    Serialize(String),
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            StorageError::Open(msg) => write!(f, "database open/migrate error: {msg}"),
            StorageError::Query(msg) => write!(f, "database query error: {msg}"),
            StorageError::Cipher(e) => write!(f, "cipher error during store op: {e:?}"),
            StorageError::Serialize(msg) => write!(f, "record (de)serialization error: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<CipherError> for StorageError {
    fn from(e: CipherError) -> Self {
        StorageError::Cipher(e)
    }
}

struct Inner<T> {
    memory: VecDeque<T>,
    conn: Connection,
}

/// A bounded in-memory queue of `T` with encrypted spill-to-disk.
pub struct HybridStore<T> {
    table: String,
    limit: usize,
    cipher: Arc<LocalCipher>,
    inner: Mutex<Inner<T>>,
}

impl<T> HybridStore<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub async fn new(
        db: &Database,
        table: &str,
        limit: usize,
        cipher: Arc<LocalCipher>,
    ) -> Result<Self, StorageError> {
        let conn = schema::open_connection(db).await?;
        schema::ensure_table(&conn, table).await?;

        Ok(Self {
            table: table.to_string(),
            limit,
            cipher,
            inner: Mutex::new(Inner {
                memory: VecDeque::new(),
                conn,
            }),
        })
    }

    /// §4.3 `push`: append to memory while under `limit`, otherwise
    /// encrypt and persist a single-row batch to disk.
    pub async fn push(&self, item: T) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;

        if inner.memory.len() < self.limit {
            inner.memory.push_back(item);
            return Ok(());
        }

        self.write_batch(&inner.conn, std::slice::from_ref(&item)).await
    }

    /// §4.3 `pop_all`: drain memory, then every disk row for this
    /// table in id-ascending order, hard-deleting drained disk rows.
    /// Corrupt/undecryptable rows are logged and skipped.
    pub async fn pop_all(&self) -> Result<Vec<T>, StorageError> {
        let mut inner = self.inner.lock().await;

        let mut out: Vec<T> = inner.memory.drain(..).collect();

        let query = format!("SELECT id, ciphertext FROM {} ORDER BY id ASC", self.table);
        let mut rows = inner
            .conn
            .query(&query, ())
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?;

        let mut drained_ids: Vec<i64> = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StorageError::Query(e.to_string()))?
        {
            let id: i64 = row.get(0).map_err(|e| StorageError::Query(e.to_string()))?;
            let ciphertext: Vec<u8> = row.get(1).map_err(|e| StorageError::Query(e.to_string()))?;
            drained_ids.push(id);

            match self.cipher.decrypt(&ciphertext) {
                Ok(plaintext) => match serde_json::from_slice::<T>(&plaintext) {
                    Ok(record) => out.push(record),
                    Err(e) => {
                        tracing::warn!(table = %self.table, id, error = %e, "skipping undecodable store row");
                    }
                },
                Err(e) => {
                    tracing::warn!(table = %self.table, id, error = ?e, "skipping undecryptable store row");
                }
            }
        }
        drop(rows);

        for chunk in drained_ids.chunks(DISK_BATCH_SIZE) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!("DELETE FROM {} WHERE id IN ({})", self.table, placeholders);
            let params: Vec<libsql::Value> = chunk.iter().map(|id| (*id).into()).collect();
            inner
                .conn
                .execute(&sql, params)
                .await
                .map_err(|e| StorageError::Query(e.to_string()))?;
        }

        Ok(out)
    }

    /// §4.3 `flush_memory_to_disk`: encrypt and persist the entire
    /// memory buffer as a single batch, then empty memory. Called on
    /// shutdown so no buffered alert/report is lost.
    pub async fn flush_memory_to_disk(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        if inner.memory.is_empty() {
            return Ok(());
        }

        let items: Vec<T> = inner.memory.drain(..).collect();
        self.write_batch(&inner.conn, &items).await
    }

    pub async fn memory_len(&self) -> usize {
        self.inner.lock().await.memory.len()
    }

    async fn write_batch(&self, conn: &Connection, items: &[T]) -> Result<(), StorageError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        for chunk in items.chunks(DISK_BATCH_SIZE) {
            for item in chunk {
                let plaintext = serde_json::to_vec(item)
                    .map_err(|e| StorageError::Serialize(e.to_string()))?;
                let ciphertext = self.cipher.encrypt(&plaintext)?;

                let sql = format!(
                    "INSERT INTO {} (ciphertext, created_at) VALUES (?, ?)",
                    self.table
                );
                conn.execute(&sql, (ciphertext, now))
                    .await
                    .map_err(|e| StorageError::Query(e.to_string()))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::GuardedKey16;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct Rec {
        val: String,
    }

    async fn store(limit: usize) -> HybridStore<Rec> {
        let db = schema::open_database(&std::path::PathBuf::from(":memory:"))
            .await
            .unwrap();
        let cipher = Arc::new(LocalCipher::new(Box::new(
            crate::crypto::sm4_cbc::FixedKey(GuardedKey16::new([7u8; 16])),
        )));
        HybridStore::new(&db, "test_records", limit, cipher)
            .await
            .unwrap()
    }

    fn rec(s: &str) -> Rec {
        Rec { val: s.to_string() }
    }

    #[tokio::test]
    async fn scenario_4_fifo_spill_and_drain() {
        let s = store(2).await;
        s.push(rec("a")).await.unwrap();
        s.push(rec("b")).await.unwrap();
        s.push(rec("c")).await.unwrap();
        s.push(rec("d")).await.unwrap();

        let out = s.pop_all().await.unwrap();
        assert_eq!(out, vec![rec("a"), rec("b"), rec("c"), rec("d")]);

        let empty = s.pop_all().await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn memory_never_exceeds_limit() {
        let s = store(3).await;
        for i in 0..10 {
            s.push(rec(&i.to_string())).await.unwrap();
            assert!(s.memory_len().await <= 3);
        }
    }

    #[tokio::test]
    async fn in_order_without_spill() {
        let s = store(10).await;
        s.push(rec("x")).await.unwrap();
        s.push(rec("y")).await.unwrap();
        let out = s.pop_all().await.unwrap();
        assert_eq!(out, vec![rec("x"), rec("y")]);
    }

    #[tokio::test]
    async fn flush_persists_and_empties_memory() {
        let s = store(10).await;
        s.push(rec("p")).await.unwrap();
        s.push(rec("q")).await.unwrap();
        s.flush_memory_to_disk().await.unwrap();
        assert_eq!(s.memory_len().await, 0);

        let out = s.pop_all().await.unwrap();
        assert_eq!(out, vec![rec("p"), rec("q")]);
    }
}
