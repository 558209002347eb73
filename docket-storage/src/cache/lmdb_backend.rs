//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store for analysis cache entries that survives process restarts
//! on a single host.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `load`, `entry_count`
//! - Write transactions for `store`, `remove`, `record_access` and `purge_expired`
//!
//! LMDB allows one writer at a time, so the read-modify-write in
//! `record_access` cannot lose increments.

use std::path::Path;

use async_trait::async_trait;
use docket_core::{
    AnalysisKey, CacheEntry, DocketError, DocketResult, RecordKind, StorageError, Timestamp,
};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use super::traits::CacheBackend;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for DocketError {
    fn from(e: LmdbCacheError) -> Self {
        let storage = match e {
            LmdbCacheError::Serialization(reason) | LmdbCacheError::Deserialization(reason) => {
                StorageError::Corrupt {
                    kind: RecordKind::CacheEntry,
                    reason,
                }
            }
            LmdbCacheError::EnvOpen(_) | LmdbCacheError::DbOpen(_) | LmdbCacheError::Io(_) => {
                StorageError::Unavailable {
                    reason: e.to_string(),
                }
            }
            LmdbCacheError::Transaction(reason) => StorageError::QueryFailed { reason },
        };
        DocketError::Storage(storage)
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

fn decode(bytes: &[u8]) -> Result<CacheEntry, LmdbCacheError> {
    serde_json::from_slice(bytes).map_err(|e| LmdbCacheError::Deserialization(e.to_string()))
}

fn encode(entry: &CacheEntry) -> Result<Vec<u8>, LmdbCacheError> {
    serde_json::to_vec(entry).map_err(|e| LmdbCacheError::Serialization(e.to_string()))
}

/// LMDB-backed analysis cache.
///
/// # Example
///
/// ```ignore
/// use docket_storage::cache::{CacheStore, LmdbCacheBackend};
///
/// let backend = Arc::new(LmdbCacheBackend::new("/var/lib/docket/cache", 256)?);
/// let cache = CacheStore::new(backend, oracle);
/// ```
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database), analysis key -> JSON entry.
    db: Database<Bytes, Bytes>,
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per directory by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self { env, db })
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn load(&self, key: &AnalysisKey) -> DocketResult<Option<CacheEntry>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self.db.get(&rtxn, key.as_str().as_bytes()).map_err(txn_err)? {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, entry: &CacheEntry) -> DocketResult<()> {
        let bytes = encode(entry)?;
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, entry.key.as_str().as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn remove(&self, key: &AnalysisKey) -> DocketResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = self
            .db
            .delete(&mut wtxn, key.as_str().as_bytes())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    async fn record_access(
        &self,
        key: &AnalysisKey,
        at: Timestamp,
    ) -> DocketResult<Option<CacheEntry>> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let current = match self.db.get(&wtxn, key.as_str().as_bytes()).map_err(txn_err)? {
            Some(bytes) => decode(bytes)?,
            None => return Ok(None),
        };

        let mut updated = current;
        updated.access_count += 1;
        updated.last_accessed_at = Some(at);

        let bytes = encode(&updated)?;
        self.db
            .put(&mut wtxn, key.as_str().as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(Some(updated))
    }

    async fn purge_expired(&self, now: Timestamp) -> DocketResult<u64> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;

        let mut expired = Vec::new();
        for result in self.db.iter(&wtxn).map_err(txn_err)? {
            let (key, bytes) = result.map_err(txn_err)?;
            match decode(bytes) {
                Ok(entry) if entry.is_expired(now) => expired.push(key.to_vec()),
                Ok(_) => {}
                // Unreadable entries can never produce a hit.
                Err(_) => expired.push(key.to_vec()),
            }
        }

        let mut deleted = 0u64;
        for key in &expired {
            if self.db.delete(&mut wtxn, key).map_err(txn_err)? {
                deleted += 1;
            }
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    async fn entry_count(&self) -> DocketResult<u64> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self.db.len(&rtxn).map_err(txn_err)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use docket_core::{derive_key, CaseId, EntityIdType, VersionId};
    use tempfile::TempDir;

    fn create_test_backend() -> (LmdbCacheBackend, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend =
            LmdbCacheBackend::new(temp_dir.path(), 10).expect("backend creation should succeed");
        (backend, temp_dir)
    }

    fn make_entry(seed: &str, ttl: Duration) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            key: derive_key(CaseId::nil(), [seed], "model-1", "CaseSummary@v1", Some(now)),
            case_id: CaseId::now_v7(),
            result_ref: VersionId::now_v7(),
            created_at: now,
            expires_at: now + ttl,
            access_count: 0,
            last_accessed_at: None,
            activity_at_creation: Some(now),
        }
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let (backend, _temp_dir) = create_test_backend();
        let entry = make_entry("doc-a", Duration::hours(1));

        backend.store(&entry).await.expect("store should succeed");

        let loaded = backend
            .load(&entry.key)
            .await
            .expect("load should succeed")
            .expect("entry should exist");
        assert_eq!(loaded, entry);
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (backend, _temp_dir) = create_test_backend();
        let key = derive_key(CaseId::nil(), ["missing"], "m", "p", None);
        assert!(backend.load(&key).await.expect("load should succeed").is_none());
    }

    #[tokio::test]
    async fn test_store_replaces_existing() {
        let (backend, _temp_dir) = create_test_backend();
        let entry = make_entry("doc-a", Duration::hours(1));
        backend.store(&entry).await.unwrap();

        let mut replacement = entry.clone();
        replacement.result_ref = VersionId::now_v7();
        backend.store(&replacement).await.unwrap();

        assert_eq!(backend.entry_count().await.unwrap(), 1);
        let loaded = backend.load(&entry.key).await.unwrap().unwrap();
        assert_eq!(loaded.result_ref, replacement.result_ref);
    }

    #[tokio::test]
    async fn test_remove() {
        let (backend, _temp_dir) = create_test_backend();
        let entry = make_entry("doc-a", Duration::hours(1));
        backend.store(&entry).await.unwrap();

        assert!(backend.remove(&entry.key).await.unwrap());
        assert!(!backend.remove(&entry.key).await.unwrap());
        assert_eq!(backend.entry_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_record_access_persists() {
        let (backend, _temp_dir) = create_test_backend();
        let entry = make_entry("doc-a", Duration::hours(1));
        backend.store(&entry).await.unwrap();

        let at = Utc::now();
        backend.record_access(&entry.key, at).await.unwrap();
        backend.record_access(&entry.key, at).await.unwrap();

        let loaded = backend.load(&entry.key).await.unwrap().unwrap();
        assert_eq!(loaded.access_count, 2);
        assert!(loaded.last_accessed_at.is_some());
    }

    #[tokio::test]
    async fn test_record_access_missing_key() {
        let (backend, _temp_dir) = create_test_backend();
        let key = derive_key(CaseId::nil(), ["missing"], "m", "p", None);
        assert!(backend.record_access(&key, Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (backend, _temp_dir) = create_test_backend();
        let stale = make_entry("stale", Duration::seconds(-5));
        let fresh = make_entry("fresh", Duration::hours(1));
        backend.store(&stale).await.unwrap();
        backend.store(&fresh).await.unwrap();

        let purged = backend.purge_expired(Utc::now()).await.unwrap();
        assert_eq!(purged, 1);
        assert!(backend.load(&stale.key).await.unwrap().is_none());
        assert!(backend.load(&fresh.key).await.unwrap().is_some());
    }
}
