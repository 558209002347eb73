//! Redis-backed [`KvStore`].
//!
//! Lock acquisition is a single `SET key token NX PX ttl`. Release and
//! extension run as Lua scripts so the token comparison and the mutation
//! happen atomically on the server.

use std::time::Duration;

use async_trait::async_trait;
use docket_core::LockError;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;
use tokio::time::timeout;

use crate::kv::KvStore;

const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

const COMPARE_AND_EXPIRE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Default bound on a single store round trip.
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_millis(500);

/// [`KvStore`] over a Redis server.
///
/// The connection is opened lazily on first use and shared by every caller.
/// Concurrent first calls wait on the same initialization rather than
/// opening several connections.
pub struct RedisKvStore {
    client: redis::Client,
    conn: OnceCell<ConnectionManager>,
    op_timeout: Duration,
    delete_script: redis::Script,
    expire_script: redis::Script,
}

impl RedisKvStore {
    /// Parse `url` (e.g. `redis://127.0.0.1:6379/0`). Does not connect.
    pub fn new(url: &str) -> Result<Self, LockError> {
        let client = redis::Client::open(url).map_err(|e| LockError::Unreachable {
            reason: format!("invalid redis url: {}", e),
        })?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            op_timeout: DEFAULT_OP_TIMEOUT,
            delete_script: redis::Script::new(COMPARE_AND_DELETE),
            expire_script: redis::Script::new(COMPARE_AND_EXPIRE),
        })
    }

    /// Override the per-operation timeout.
    pub fn with_op_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }

    async fn connection(&self) -> Result<ConnectionManager, LockError> {
        let conn = self
            .conn
            .get_or_try_init(|| async {
                let manager = timeout(self.op_timeout, ConnectionManager::new(self.client.clone()))
                    .await
                    .map_err(|_| LockError::Unreachable {
                        reason: "timed out connecting to redis".to_string(),
                    })?
                    .map_err(map_redis_err)?;
                tracing::info!("Connected to lock store");
                Ok::<_, LockError>(manager)
            })
            .await?;
        Ok(conn.clone())
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, LockError>
    where
        F: std::future::Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.op_timeout, op).await {
            Ok(result) => result.map_err(map_redis_err),
            Err(_) => Err(LockError::Unreachable {
                reason: format!("redis operation exceeded {}ms", self.op_timeout.as_millis()),
            }),
        }
    }
}

fn map_redis_err(err: redis::RedisError) -> LockError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        LockError::Unreachable {
            reason: err.to_string(),
        }
    } else {
        LockError::CommandFailed {
            reason: err.to_string(),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = self
            .bounded(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, LockError> {
        let mut conn = self.connection().await?;
        let millis: i64 = self
            .bounded(redis::cmd("PTTL").arg(key).query_async(&mut conn))
            .await?;
        // -2: no such key, -1: no expiry (never set by this crate).
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = self
            .bounded(
                self.delete_script
                    .key(key)
                    .arg(expected)
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(deleted == 1)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let mut conn = self.connection().await?;
        let updated: i64 = self
            .bounded(
                self.expire_script
                    .key(key)
                    .arg(expected)
                    .arg(ttl_millis(ttl))
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(updated == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_is_unreachable() {
        let err = RedisKvStore::new("not a url").err().expect("should fail");
        assert!(matches!(err, LockError::Unreachable { .. }));
    }

    #[test]
    fn test_io_errors_map_to_unreachable() {
        let io = redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(matches!(map_redis_err(io), LockError::Unreachable { .. }));

        let cmd = redis::RedisError::from((redis::ErrorKind::TypeError, "wrong type"));
        assert!(matches!(map_redis_err(cmd), LockError::CommandFailed { .. }));
    }

    #[test]
    fn test_ttl_millis_floor() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }

    async fn redis_test_store() -> Option<RedisKvStore> {
        if std::env::var("REDIS_TESTS").ok().as_deref() != Some("1") {
            return None;
        }
        let url =
            std::env::var("DOCKET_KV_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        RedisKvStore::new(&url).ok()
    }

    #[tokio::test]
    async fn test_lock_primitives_against_live_redis() {
        let Some(store) = redis_test_store().await else {
            return;
        };
        let key = format!("lock:test-{}", uuid::Uuid::new_v4());

        assert!(store.set_if_absent(&key, "a", Duration::from_secs(5)).await.unwrap());
        assert!(!store.set_if_absent(&key, "b", Duration::from_secs(5)).await.unwrap());
        assert!(store.ttl(&key).await.unwrap().is_some());
        assert!(!store.compare_and_delete(&key, "b").await.unwrap());
        assert!(store
            .compare_and_expire(&key, "a", Duration::from_secs(30))
            .await
            .unwrap());
        assert!(store.compare_and_delete(&key, "a").await.unwrap());
        assert!(store.ttl(&key).await.unwrap().is_none());
    }
}
