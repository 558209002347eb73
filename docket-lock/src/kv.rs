//! Shared key-value store seam.
//!
//! The lock needs exactly four atomic primitives from the store. Anything
//! that offers them (Redis, an in-process map) can back a [`DistributedLock`].
//!
//! [`DistributedLock`]: crate::DistributedLock

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use docket_core::LockError;
use tokio::sync::Mutex;

/// Atomic key-value primitives with per-key expiry.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Set `key` to `value` with a TTL only if `key` does not exist.
    /// Returns whether the value was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Remaining lifetime of `key`, or `None` when it does not exist.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, LockError>;

    /// Delete `key` only if its value equals `expected`, atomically.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, LockError>;

    /// Reset the TTL of `key` only if its value equals `expected`, atomically.
    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, LockError>;
}

#[derive(Debug)]
struct Slot {
    value: String,
    expires_at: Instant,
}

/// Process-local [`KvStore`] for tests and single-node deployments.
///
/// Expired slots are dropped when a read finds them and swept on every
/// insert, so the map holds roughly the live lock set. Can be switched
/// offline to exercise unreachable-store paths.
#[derive(Debug)]
pub struct InMemoryKvStore {
    slots: Mutex<HashMap<String, Slot>>,
    available: AtomicBool,
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Current value of a live key.
    pub async fn get(&self, key: &str) -> Option<String> {
        let mut slots = self.slots.lock().await;
        live(&mut slots, key, Instant::now()).map(|s| s.value.clone())
    }

    /// Number of slots held, expired or not.
    pub async fn slot_count(&self) -> usize {
        self.slots.lock().await.len()
    }

    fn check_available(&self) -> Result<(), LockError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LockError::Unreachable {
                reason: "in-memory store marked unavailable".to_string(),
            })
        }
    }
}

/// The slot under `key` if it has not expired. An expired slot is removed.
fn live<'a>(slots: &'a mut HashMap<String, Slot>, key: &str, now: Instant) -> Option<&'a mut Slot> {
    if slots.get(key).is_some_and(|s| s.expires_at <= now) {
        slots.remove(key);
        return None;
    }
    slots.get_mut(key)
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, LockError> {
        self.check_available()?;
        let mut slots = self.slots.lock().await;
        let now = Instant::now();
        slots.retain(|_, s| s.expires_at > now);
        if slots.contains_key(key) {
            return Ok(false);
        }
        slots.insert(
            key.to_string(),
            Slot {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, LockError> {
        self.check_available()?;
        let mut slots = self.slots.lock().await;
        let now = Instant::now();
        Ok(live(&mut slots, key, now).map(|s| s.expires_at.saturating_duration_since(now)))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, LockError> {
        self.check_available()?;
        let mut slots = self.slots.lock().await;
        let matches = live(&mut slots, key, Instant::now()).is_some_and(|s| s.value == expected);
        if matches {
            slots.remove(key);
        }
        Ok(matches)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        expected: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        self.check_available()?;
        let mut slots = self.slots.lock().await;
        let now = Instant::now();
        match live(&mut slots, key, now) {
            Some(slot) if slot.value == expected => {
                slot.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
