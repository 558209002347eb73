//! Lease-based distributed lock.
//!
//! One lock per analysis key, named `lock:<key>`. The value stored under the
//! lock is a random owner token; release and extension are compare-and-act on
//! that token, so a holder whose lease already expired can never remove or
//! prolong a lock that someone else has since acquired.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use docket_core::{AnalysisKey, Held, Lease, LeaseData, LeaseHandle, LockError};

use crate::kv::KvStore;

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone)]
pub enum LockAttempt {
    /// This caller now holds the lock.
    Acquired(Lease<Held>),
    /// Someone else holds it. `remaining` is the holder's lease time left,
    /// when the store could report it.
    Busy { remaining: Option<Duration> },
}

impl LockAttempt {
    pub fn is_acquired(&self) -> bool {
        matches!(self, LockAttempt::Acquired(_))
    }
}

/// Mutual exclusion over a shared [`KvStore`].
#[derive(Clone)]
pub struct DistributedLock {
    kv: Arc<dyn KvStore>,
}

impl DistributedLock {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Try once to take the lock guarding `key`.
    ///
    /// Never blocks waiting for the holder. If the set fails but the lock
    /// vanished before its TTL could be read, the set is retried once.
    pub async fn acquire(&self, key: &AnalysisKey, ttl: Duration) -> Result<LockAttempt, LockError> {
        let lock_key = key.lock_key();
        let token = uuid::Uuid::new_v4().to_string();

        for attempt in 0..2 {
            let acquired_at = Utc::now();
            if self.kv.set_if_absent(&lock_key, &token, ttl).await? {
                tracing::debug!(lock_key = %lock_key, ttl_ms = ttl.as_millis() as u64, "Lock acquired");
                return Ok(LockAttempt::Acquired(Lease::new(LeaseData {
                    lock_key,
                    token,
                    acquired_at,
                    expires_at: acquired_at + to_chrono(ttl),
                })));
            }

            match self.kv.ttl(&lock_key).await? {
                Some(remaining) => {
                    tracing::debug!(
                        lock_key = %lock_key,
                        remaining_ms = remaining.as_millis() as u64,
                        "Lock busy"
                    );
                    return Ok(LockAttempt::Busy {
                        remaining: Some(remaining),
                    });
                }
                None if attempt == 0 => continue,
                None => break,
            }
        }

        Ok(LockAttempt::Busy { remaining: None })
    }

    /// Release the lock if `handle` still owns it.
    ///
    /// Returns `false` when the lock is gone or now belongs to someone else;
    /// that is not an error.
    pub async fn release(&self, handle: &LeaseHandle) -> Result<bool, LockError> {
        let released = self
            .kv
            .compare_and_delete(&handle.lock_key, &handle.token)
            .await?;
        if released {
            tracing::debug!(lock_key = %handle.lock_key, "Lock released");
        } else {
            tracing::debug!(lock_key = %handle.lock_key, "Lock not owned at release");
        }
        Ok(released)
    }

    /// Reset the TTL of a lock still owned by `handle`.
    pub async fn extend(&self, handle: &LeaseHandle, ttl: Duration) -> Result<bool, LockError> {
        self.kv
            .compare_and_expire(&handle.lock_key, &handle.token, ttl)
            .await
    }

    /// Extend a held lease, returning the renewed lease, or `None` if it
    /// was lost.
    pub async fn renew(&self, lease: Lease<Held>, ttl: Duration) -> Result<Option<Lease<Held>>, LockError> {
        if self.extend(&lease.handle(), ttl).await? {
            Ok(Some(lease.extend(ttl, Utc::now())))
        } else {
            Ok(None)
        }
    }
}

fn to_chrono(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKvStore;
    use docket_core::{derive_key, CaseId, EntityIdType};

    fn lock() -> (DistributedLock, Arc<InMemoryKvStore>) {
        let kv = Arc::new(InMemoryKvStore::new());
        (DistributedLock::new(kv.clone()), kv)
    }

    fn key(seed: &str) -> AnalysisKey {
        derive_key(CaseId::nil(), [seed], "m", "p", None)
    }

    #[tokio::test]
    async fn test_acquire_then_busy() {
        let (lock, _) = lock();
        let k = key("a");

        let first = lock.acquire(&k, Duration::from_secs(30)).await.unwrap();
        let LockAttempt::Acquired(lease) = first else {
            panic!("first acquire should win");
        };
        assert_eq!(lease.lock_key(), k.lock_key());

        match lock.acquire(&k, Duration::from_secs(30)).await.unwrap() {
            LockAttempt::Busy { remaining } => {
                let remaining = remaining.expect("ttl should be reported");
                assert!(remaining <= Duration::from_secs(30));
                assert!(remaining > Duration::from_secs(25));
            }
            LockAttempt::Acquired(_) => panic!("second acquire must not win"),
        }
    }

    #[tokio::test]
    async fn test_release_then_reacquire() {
        let (lock, _) = lock();
        let k = key("a");
        let LockAttempt::Acquired(lease) = lock.acquire(&k, Duration::from_secs(30)).await.unwrap()
        else {
            panic!("should acquire");
        };

        assert!(lock.release(&lease.into_handle()).await.unwrap());
        assert!(lock.acquire(&k, Duration::from_secs(30)).await.unwrap().is_acquired());
    }

    #[tokio::test]
    async fn test_stale_release_keeps_new_owner() {
        let (lock, kv) = lock();
        let k = key("a");

        let LockAttempt::Acquired(old) = lock.acquire(&k, Duration::from_millis(20)).await.unwrap()
        else {
            panic!("should acquire");
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let LockAttempt::Acquired(new) = lock.acquire(&k, Duration::from_secs(30)).await.unwrap()
        else {
            panic!("expired lock should be re-acquirable");
        };

        assert!(!lock.release(&old.handle()).await.unwrap());
        assert_eq!(kv.get(&k.lock_key()).await.as_deref(), Some(new.token()));
    }

    #[tokio::test]
    async fn test_extend_only_for_owner() {
        let (lock, kv) = lock();
        let k = key("a");
        let LockAttempt::Acquired(lease) = lock.acquire(&k, Duration::from_secs(1)).await.unwrap()
        else {
            panic!("should acquire");
        };

        let impostor = LeaseHandle {
            lock_key: k.lock_key(),
            token: "not-the-owner".to_string(),
        };
        assert!(!lock.extend(&impostor, Duration::from_secs(60)).await.unwrap());

        let renewed = lock
            .renew(lease, Duration::from_secs(60))
            .await
            .unwrap()
            .expect("owner should renew");
        assert!(kv.ttl(renewed.lock_key()).await.unwrap().unwrap() > Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_unreachable_store_surfaces_error() {
        let (lock, kv) = lock();
        kv.set_available(false);
        let err = lock.acquire(&key("a"), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, LockError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn test_tokens_are_unique() {
        let (lock, _) = lock();
        let LockAttempt::Acquired(a) = lock.acquire(&key("a"), Duration::from_secs(5)).await.unwrap()
        else {
            panic!("should acquire");
        };
        let LockAttempt::Acquired(b) = lock.acquire(&key("b"), Duration::from_secs(5)).await.unwrap()
        else {
            panic!("should acquire");
        };
        assert_ne!(a.token(), b.token());
    }
}
