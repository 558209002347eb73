//! PostgreSQL-backed persistence.
//!
//! One connection pool serves all three durable concerns: the version/job
//! repository, the analysis cache and the case activity log. Enabled with
//! the `postgres` feature.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, PoolError, RecyclingMethod, Runtime};
use docket_core::{
    AnalysisJob, AnalysisKey, AnalysisResult, AnalysisType, AnalysisVersion, CacheEntry, CaseId,
    DocketError, DocketResult, DocumentRef, EntityIdType, JobId, JobStatus, RecordKind,
    StorageError, Timestamp, VersionId, VersionStatus,
};
use std::time::Duration;
use tokio_postgres::types::FromSql;
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

use crate::activity::ActivityOracle;
use crate::cache::CacheBackend;
use crate::repository::{AnalysisRepository, NewVersion};

/// DDL for every table the store touches. Idempotent.
pub const SCHEMA_SQL: &str = include_str!("schema.sql");

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "docket".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    ///
    /// Reads `DOCKET_DB_HOST`, `DOCKET_DB_PORT`, `DOCKET_DB_NAME`,
    /// `DOCKET_DB_USER`, `DOCKET_DB_PASSWORD`, `DOCKET_DB_POOL_SIZE` and
    /// `DOCKET_DB_TIMEOUT` (seconds).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("DOCKET_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("DOCKET_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("DOCKET_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("DOCKET_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("DOCKET_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("DOCKET_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("DOCKET_DB_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    /// Create a connection pool from this configuration.
    ///
    /// No connection is opened until the first query.
    pub fn create_pool(&self) -> DocketResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.connect_timeout = Some(self.timeout);
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(self.max_size));

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            DocketError::Storage(StorageError::Unavailable {
                reason: format!("Failed to create pool: {}", e),
            })
        })
    }
}

// ============================================================================
// ERROR MAPPING
// ============================================================================

fn pool_err(err: PoolError) -> DocketError {
    tracing::error!(error = ?err, "Connection pool error");
    let reason = match err {
        PoolError::Timeout(_) => "connection pool exhausted".to_string(),
        PoolError::Closed => "connection pool is closed".to_string(),
        other => other.to_string(),
    };
    DocketError::Storage(StorageError::Unavailable { reason })
}

fn query_err(err: tokio_postgres::Error) -> DocketError {
    tracing::error!(error = ?err, "Database error");
    DocketError::Storage(StorageError::QueryFailed {
        reason: err.to_string(),
    })
}

fn corrupt(kind: RecordKind, reason: impl std::fmt::Display) -> DocketError {
    DocketError::Storage(StorageError::Corrupt {
        kind,
        reason: reason.to_string(),
    })
}

fn col<'a, T: FromSql<'a>>(row: &'a Row, kind: RecordKind, name: &str) -> DocketResult<T> {
    row.try_get(name).map_err(|e| corrupt(kind, format!("{}: {}", name, e)))
}

// ============================================================================
// ROW MAPPING
// ============================================================================

const VERSION_COLUMNS: &str = "version_id, case_id, version_number, analysis_type, model_used, \
     analysis_key, status, created_at, result, confidence, processing_time_ms";

const JOB_COLUMNS: &str = "job_id, case_id, analysis_key, status, lock_key, lock_token, \
     result_version_id, progress, documents, activity_snapshot, created_at, started_at, \
     finished_at, error";

const CACHE_COLUMNS: &str = "analysis_key, case_id, result_ref, created_at, expires_at, \
     access_count, last_accessed_at, activity_at_creation";

fn parse_key(kind: RecordKind, raw: &str) -> DocketResult<AnalysisKey> {
    AnalysisKey::parse(raw).map_err(|e| corrupt(kind, e))
}

fn version_from_row(row: &Row) -> DocketResult<AnalysisVersion> {
    const K: RecordKind = RecordKind::Version;
    let analysis_type: String = col(row, K, "analysis_type")?;
    let status: String = col(row, K, "status")?;
    let analysis_key: String = col(row, K, "analysis_key")?;
    let result: Option<serde_json::Value> = col(row, K, "result")?;

    Ok(AnalysisVersion {
        version_id: VersionId::new(col(row, K, "version_id")?),
        case_id: CaseId::new(col(row, K, "case_id")?),
        version_number: col(row, K, "version_number")?,
        analysis_type: AnalysisType::from_db_str(&analysis_type).map_err(|e| corrupt(K, e))?,
        model_used: col(row, K, "model_used")?,
        analysis_key: parse_key(K, &analysis_key)?,
        status: VersionStatus::from_db_str(&status).map_err(|e| corrupt(K, e))?,
        created_at: col(row, K, "created_at")?,
        result: result
            .map(serde_json::from_value::<AnalysisResult>)
            .transpose()
            .map_err(|e| corrupt(K, e))?,
        confidence: col(row, K, "confidence")?,
        processing_time_ms: col(row, K, "processing_time_ms")?,
    })
}

fn job_from_row(row: &Row) -> DocketResult<AnalysisJob> {
    const K: RecordKind = RecordKind::Job;
    let status: String = col(row, K, "status")?;
    let analysis_key: String = col(row, K, "analysis_key")?;
    let documents: serde_json::Value = col(row, K, "documents")?;
    let progress: i16 = col(row, K, "progress")?;

    Ok(AnalysisJob {
        job_id: JobId::new(col(row, K, "job_id")?),
        case_id: CaseId::new(col(row, K, "case_id")?),
        analysis_key: parse_key(K, &analysis_key)?,
        status: JobStatus::from_db_str(&status).map_err(|e| corrupt(K, e))?,
        lock_key: col(row, K, "lock_key")?,
        lock_token: col(row, K, "lock_token")?,
        result_version_id: VersionId::new(col(row, K, "result_version_id")?),
        progress: u8::try_from(progress.clamp(0, 100)).unwrap_or(0),
        documents: serde_json::from_value::<Vec<DocumentRef>>(documents)
            .map_err(|e| corrupt(K, e))?,
        activity_snapshot: col(row, K, "activity_snapshot")?,
        created_at: col(row, K, "created_at")?,
        started_at: col(row, K, "started_at")?,
        finished_at: col(row, K, "finished_at")?,
        error: col(row, K, "error")?,
    })
}

fn cache_entry_from_row(row: &Row) -> DocketResult<CacheEntry> {
    const K: RecordKind = RecordKind::CacheEntry;
    let key: String = col(row, K, "analysis_key")?;
    let access_count: i64 = col(row, K, "access_count")?;

    Ok(CacheEntry {
        key: parse_key(K, &key)?,
        case_id: CaseId::new(col(row, K, "case_id")?),
        result_ref: VersionId::new(col(row, K, "result_ref")?),
        created_at: col(row, K, "created_at")?,
        expires_at: col(row, K, "expires_at")?,
        access_count: u64::try_from(access_count).unwrap_or(0),
        last_accessed_at: col(row, K, "last_accessed_at")?,
        activity_at_creation: col(row, K, "activity_at_creation")?,
    })
}

fn to_json<T: serde::Serialize>(kind: RecordKind, value: &T) -> DocketResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| {
        DocketError::Storage(StorageError::InsertFailed {
            kind,
            reason: e.to_string(),
        })
    })
}

// ============================================================================
// STORE
// ============================================================================

/// PostgreSQL implementation of [`AnalysisRepository`], [`CacheBackend`] and
/// [`ActivityOracle`].
#[derive(Clone)]
pub struct PgAnalysisStore {
    pool: Pool,
}

impl PgAnalysisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a store from configuration.
    pub fn from_config(config: &DbConfig) -> DocketResult<Self> {
        Ok(Self::new(config.create_pool()?))
    }

    async fn conn(&self) -> DocketResult<Object> {
        self.pool.get().await.map_err(pool_err)
    }

    /// Create tables and indexes if missing.
    pub async fn apply_schema(&self) -> DocketResult<()> {
        let conn = self.conn().await?;
        conn.batch_execute(SCHEMA_SQL).await.map_err(query_err)?;
        Ok(())
    }

    /// Append a case activity event.
    pub async fn record_activity(
        &self,
        case_id: CaseId,
        kind: &str,
        occurred_at: Timestamp,
    ) -> DocketResult<()> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO docket_case_activity (case_id, kind, occurred_at) VALUES ($1, $2, $3)",
            &[&case_id.as_uuid(), &kind, &occurred_at],
        )
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn current_status(&self, table: &str, id_col: &str, id: Uuid) -> DocketResult<Option<String>> {
        let conn = self.conn().await?;
        let sql = format!("SELECT status FROM {} WHERE {} = $1", table, id_col);
        let row = conn.query_opt(&sql, &[&id]).await.map_err(query_err)?;
        row.map(|r| r.try_get::<_, String>(0).map_err(query_err))
            .transpose()
    }
}

#[async_trait]
impl AnalysisRepository for PgAnalysisStore {
    async fn version_create(&self, new: &NewVersion) -> DocketResult<AnalysisVersion> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(query_err)?;

        let row = tx
            .query_one(
                "INSERT INTO docket_version_counter (case_id, last_version) VALUES ($1, 1) \
                 ON CONFLICT (case_id) DO UPDATE \
                 SET last_version = docket_version_counter.last_version + 1 \
                 RETURNING last_version",
                &[&new.case_id.as_uuid()],
            )
            .await
            .map_err(query_err)?;
        let version_number: i32 = col(&row, RecordKind::Version, "last_version")?;

        let sql = format!(
            "INSERT INTO docket_analysis_version \
             (version_id, case_id, version_number, analysis_type, model_used, analysis_key, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, NOW()) RETURNING {}",
            VERSION_COLUMNS
        );
        let row = tx
            .query_one(
                &sql,
                &[
                    &VersionId::now_v7().as_uuid(),
                    &new.case_id.as_uuid(),
                    &version_number,
                    &new.analysis_type.as_db_str(),
                    &new.model_used,
                    &new.analysis_key.as_str(),
                    &VersionStatus::Pending.as_db_str(),
                ],
            )
            .await
            .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        version_from_row(&row)
    }

    async fn version_get(&self, id: VersionId) -> DocketResult<Option<AnalysisVersion>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM docket_analysis_version WHERE version_id = $1",
            VERSION_COLUMNS
        );
        let row = conn.query_opt(&sql, &[&id.as_uuid()]).await.map_err(query_err)?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn version_find_unclaimed(
        &self,
        case_id: CaseId,
        key: &AnalysisKey,
    ) -> DocketResult<Option<AnalysisVersion>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM docket_analysis_version v \
             WHERE v.case_id = $1 AND v.analysis_key = $2 AND v.status = $3 \
             AND NOT EXISTS (SELECT 1 FROM docket_analysis_job j WHERE j.result_version_id = v.version_id) \
             ORDER BY v.version_number DESC LIMIT 1",
            VERSION_COLUMNS
        );
        let row = conn
            .query_opt(
                &sql,
                &[
                    &case_id.as_uuid(),
                    &key.as_str(),
                    &VersionStatus::Pending.as_db_str(),
                ],
            )
            .await
            .map_err(query_err)?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn version_update(
        &self,
        version: &AnalysisVersion,
        expected: VersionStatus,
    ) -> DocketResult<bool> {
        let id = version.version_id.as_uuid();
        if expected.is_terminal() {
            return match self
                .current_status("docket_analysis_version", "version_id", id)
                .await?
            {
                None => Err(DocketError::Storage(StorageError::NotFound {
                    kind: RecordKind::Version,
                    id,
                })),
                Some(stored) if stored != expected.as_db_str() => Ok(false),
                Some(_) => Err(DocketError::Storage(StorageError::UpdateFailed {
                    kind: RecordKind::Version,
                    id,
                    reason: "terminal versions are immutable".to_string(),
                })),
            };
        }

        let result = version
            .result
            .as_ref()
            .map(|r| to_json(RecordKind::Version, r))
            .transpose()?;

        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE docket_analysis_version \
                 SET status = $3, model_used = $4, result = $5, confidence = $6, processing_time_ms = $7 \
                 WHERE version_id = $1 AND status = $2",
                &[
                    &id,
                    &expected.as_db_str(),
                    &version.status.as_db_str(),
                    &version.model_used,
                    &result,
                    &version.confidence,
                    &version.processing_time_ms,
                ],
            )
            .await
            .map_err(query_err)?;

        if updated > 0 {
            return Ok(true);
        }
        match self
            .current_status("docket_analysis_version", "version_id", id)
            .await?
        {
            None => Err(DocketError::Storage(StorageError::NotFound {
                kind: RecordKind::Version,
                id,
            })),
            Some(_) => Ok(false),
        }
    }

    async fn version_latest_completed(
        &self,
        case_id: CaseId,
        analysis_type: Option<AnalysisType>,
    ) -> DocketResult<Option<AnalysisVersion>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM docket_analysis_version \
             WHERE case_id = $1 AND status = $2 AND ($3::TEXT IS NULL OR analysis_type = $3) \
             ORDER BY version_number DESC LIMIT 1",
            VERSION_COLUMNS
        );
        let type_filter = analysis_type.map(|t| t.as_db_str());
        let row = conn
            .query_opt(
                &sql,
                &[
                    &case_id.as_uuid(),
                    &VersionStatus::Completed.as_db_str(),
                    &type_filter,
                ],
            )
            .await
            .map_err(query_err)?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn version_list_by_case(&self, case_id: CaseId) -> DocketResult<Vec<AnalysisVersion>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM docket_analysis_version WHERE case_id = $1 ORDER BY version_number",
            VERSION_COLUMNS
        );
        let rows = conn
            .query(&sql, &[&case_id.as_uuid()])
            .await
            .map_err(query_err)?;
        rows.iter().map(version_from_row).collect()
    }

    async fn job_insert(&self, job: &AnalysisJob) -> DocketResult<()> {
        let documents = to_json(RecordKind::Job, &job.documents)?;
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO docket_analysis_job \
             (job_id, case_id, analysis_key, status, lock_key, lock_token, result_version_id, \
              progress, documents, activity_snapshot, created_at, started_at, finished_at, error) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            &[
                &job.job_id.as_uuid(),
                &job.case_id.as_uuid(),
                &job.analysis_key.as_str(),
                &job.status.as_db_str(),
                &job.lock_key,
                &job.lock_token,
                &job.result_version_id.as_uuid(),
                &i16::from(job.progress),
                &documents,
                &job.activity_snapshot,
                &job.created_at,
                &job.started_at,
                &job.finished_at,
                &job.error,
            ],
        )
        .await
        .map_err(|e| {
            DocketError::Storage(StorageError::InsertFailed {
                kind: RecordKind::Job,
                reason: e.to_string(),
            })
        })?;
        Ok(())
    }

    async fn job_get(&self, id: JobId) -> DocketResult<Option<AnalysisJob>> {
        let conn = self.conn().await?;
        let sql = format!("SELECT {} FROM docket_analysis_job WHERE job_id = $1", JOB_COLUMNS);
        let row = conn.query_opt(&sql, &[&id.as_uuid()]).await.map_err(query_err)?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn job_update(&self, job: &AnalysisJob, expected: JobStatus) -> DocketResult<bool> {
        let id = job.job_id.as_uuid();
        let conn = self.conn().await?;
        let updated = conn
            .execute(
                "UPDATE docket_analysis_job \
                 SET status = $3, progress = $4, started_at = $5, finished_at = $6, error = $7 \
                 WHERE job_id = $1 AND status = $2",
                &[
                    &id,
                    &expected.as_db_str(),
                    &job.status.as_db_str(),
                    &i16::from(job.progress),
                    &job.started_at,
                    &job.finished_at,
                    &job.error,
                ],
            )
            .await
            .map_err(query_err)?;

        if updated > 0 {
            return Ok(true);
        }
        match self.current_status("docket_analysis_job", "job_id", id).await? {
            None => Err(DocketError::Storage(StorageError::NotFound {
                kind: RecordKind::Job,
                id,
            })),
            Some(_) => Ok(false),
        }
    }

    async fn job_finish(
        &self,
        job: &AnalysisJob,
        job_expected: JobStatus,
        version: Option<(&AnalysisVersion, VersionStatus)>,
    ) -> DocketResult<bool> {
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await.map_err(query_err)?;

        let updated = tx
            .execute(
                "UPDATE docket_analysis_job \
                 SET status = $3, progress = $4, started_at = $5, finished_at = $6, error = $7 \
                 WHERE job_id = $1 AND status = $2",
                &[
                    &job.job_id.as_uuid(),
                    &job_expected.as_db_str(),
                    &job.status.as_db_str(),
                    &i16::from(job.progress),
                    &job.started_at,
                    &job.finished_at,
                    &job.error,
                ],
            )
            .await
            .map_err(query_err)?;
        if updated == 0 {
            // Dropping the transaction rolls it back.
            return Ok(false);
        }

        if let Some((version, expected)) = version {
            if expected.is_terminal() {
                return Err(DocketError::Storage(StorageError::UpdateFailed {
                    kind: RecordKind::Version,
                    id: version.version_id.as_uuid(),
                    reason: "terminal versions are immutable".to_string(),
                }));
            }
            let result = version
                .result
                .as_ref()
                .map(|r| to_json(RecordKind::Version, r))
                .transpose()?;
            let updated = tx
                .execute(
                    "UPDATE docket_analysis_version \
                     SET status = $3, model_used = $4, result = $5, confidence = $6, processing_time_ms = $7 \
                     WHERE version_id = $1 AND status = $2",
                    &[
                        &version.version_id.as_uuid(),
                        &expected.as_db_str(),
                        &version.status.as_db_str(),
                        &version.model_used,
                        &result,
                        &version.confidence,
                        &version.processing_time_ms,
                    ],
                )
                .await
                .map_err(query_err)?;
            if updated == 0 {
                return Ok(false);
            }
        }

        tx.commit().await.map_err(query_err)?;
        Ok(true)
    }
}

#[async_trait]
impl CacheBackend for PgAnalysisStore {
    async fn load(&self, key: &AnalysisKey) -> DocketResult<Option<CacheEntry>> {
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT {} FROM docket_analysis_cache WHERE analysis_key = $1",
            CACHE_COLUMNS
        );
        let row = conn.query_opt(&sql, &[&key.as_str()]).await.map_err(query_err)?;
        row.as_ref().map(cache_entry_from_row).transpose()
    }

    async fn store(&self, entry: &CacheEntry) -> DocketResult<()> {
        let access_count = i64::try_from(entry.access_count).unwrap_or(i64::MAX);
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO docket_analysis_cache \
             (analysis_key, case_id, result_ref, created_at, expires_at, access_count, \
              last_accessed_at, activity_at_creation) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (analysis_key) DO UPDATE SET \
               case_id = EXCLUDED.case_id, result_ref = EXCLUDED.result_ref, \
               created_at = EXCLUDED.created_at, expires_at = EXCLUDED.expires_at, \
               access_count = EXCLUDED.access_count, last_accessed_at = EXCLUDED.last_accessed_at, \
               activity_at_creation = EXCLUDED.activity_at_creation",
            &[
                &entry.key.as_str(),
                &entry.case_id.as_uuid(),
                &entry.result_ref.as_uuid(),
                &entry.created_at,
                &entry.expires_at,
                &access_count,
                &entry.last_accessed_at,
                &entry.activity_at_creation,
            ],
        )
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn remove(&self, key: &AnalysisKey) -> DocketResult<bool> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM docket_analysis_cache WHERE analysis_key = $1",
                &[&key.as_str()],
            )
            .await
            .map_err(query_err)?;
        Ok(deleted > 0)
    }

    async fn record_access(
        &self,
        key: &AnalysisKey,
        at: Timestamp,
    ) -> DocketResult<Option<CacheEntry>> {
        let conn = self.conn().await?;
        let sql = format!(
            "UPDATE docket_analysis_cache \
             SET access_count = access_count + 1, last_accessed_at = $2 \
             WHERE analysis_key = $1 RETURNING {}",
            CACHE_COLUMNS
        );
        let row = conn
            .query_opt(&sql, &[&key.as_str(), &at])
            .await
            .map_err(query_err)?;
        row.as_ref().map(cache_entry_from_row).transpose()
    }

    async fn purge_expired(&self, now: Timestamp) -> DocketResult<u64> {
        let conn = self.conn().await?;
        conn.execute(
            "DELETE FROM docket_analysis_cache WHERE expires_at < $1",
            &[&now],
        )
        .await
        .map_err(query_err)
    }

    async fn entry_count(&self) -> DocketResult<u64> {
        let conn = self.conn().await?;
        let row = conn
            .query_one("SELECT COUNT(*) FROM docket_analysis_cache", &[])
            .await
            .map_err(query_err)?;
        let count: i64 = row.try_get(0).map_err(query_err)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl ActivityOracle for PgAnalysisStore {
    async fn last_activity_for(&self, case_id: CaseId) -> DocketResult<Option<Timestamp>> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                "SELECT MAX(occurred_at) FROM docket_case_activity WHERE case_id = $1",
                &[&case_id.as_uuid()],
            )
            .await
            .map_err(query_err)?;
        row.try_get::<_, Option<Timestamp>>(0).map_err(query_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docket_core::{derive_key, DocumentId};

    #[test]
    fn test_default_config() {
        let config = DbConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "docket");
        assert_eq!(config.max_size, 16);
    }

    #[test]
    fn test_schema_mentions_every_table() {
        for table in [
            "docket_version_counter",
            "docket_analysis_version",
            "docket_analysis_job",
            "docket_analysis_cache",
            "docket_case_activity",
        ] {
            assert!(SCHEMA_SQL.contains(table), "schema missing {}", table);
        }
    }

    #[tokio::test]
    async fn test_pool_creation_is_lazy() {
        // No server needed: deadpool opens connections on first use.
        assert!(PgAnalysisStore::from_config(&DbConfig::default()).is_ok());
    }

    async fn db_test_store() -> Option<PgAnalysisStore> {
        if std::env::var("DB_TESTS").ok().as_deref() != Some("1") {
            return None;
        }
        let store = PgAnalysisStore::from_config(&DbConfig::from_env()).ok()?;
        store.apply_schema().await.ok()?;
        Some(store)
    }

    #[tokio::test]
    async fn test_version_and_job_roundtrip_against_live_db() {
        let Some(store) = db_test_store().await else {
            return;
        };
        let case_id = CaseId::now_v7();
        let key = derive_key(case_id, ["abc"], "m", "CaseSummary@v1", None);
        let new = NewVersion {
            case_id,
            analysis_type: AnalysisType::CaseSummary,
            model_used: "m".to_string(),
            analysis_key: key.clone(),
        };

        let v1 = store.version_create(&new).await.unwrap();
        let v2 = store.version_create(&new).await.unwrap();
        assert_eq!(v1.version_number, 1);
        assert_eq!(v2.version_number, 2);

        let job = AnalysisJob {
            job_id: JobId::now_v7(),
            case_id,
            analysis_key: key.clone(),
            status: JobStatus::Queued,
            lock_key: Some(key.lock_key()),
            lock_token: Some("t".to_string()),
            result_version_id: v2.version_id,
            progress: 0,
            documents: vec![DocumentRef::new(DocumentId::now_v7(), "abc", 3)],
            activity_snapshot: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        };
        store.job_insert(&job).await.unwrap();
        let loaded = store.job_get(job.job_id).await.unwrap().unwrap();
        assert_eq!(loaded.documents, job.documents);

        let unclaimed = store.version_find_unclaimed(case_id, &key).await.unwrap();
        assert_eq!(unclaimed.map(|v| v.version_id), Some(v1.version_id));

        let mut failed_job = job.clone();
        failed_job.status = JobStatus::Failed;
        let mut failed_version = v2.clone();
        failed_version.status = VersionStatus::Failed;
        assert!(!store
            .job_finish(
                &failed_job,
                JobStatus::Running,
                Some((&failed_version, VersionStatus::Pending))
            )
            .await
            .unwrap());
        assert!(store
            .job_finish(
                &failed_job,
                JobStatus::Queued,
                Some((&failed_version, VersionStatus::Pending))
            )
            .await
            .unwrap());
        let stored = store.version_get(v2.version_id).await.unwrap().unwrap();
        assert_eq!(stored.status, VersionStatus::Failed);
    }
}
