//! Lease typestate for compile-time safety of lock ownership.
//!
//! A lease is the proof that a caller won the mutual-exclusion lock for an
//! analysis key. It carries the full `(lock_key, token)` pair; releasing or
//! persisting a lease consumes it, so the pair is never inferred from a token.
//!
//! # State Transition Diagram
//!
//! ```text
//! (unlocked) ─── acquire() ──→ Held ─── into_handle() ──→ LeaseHandle ─── release()
//!                               │
//!                          extend() ↺
//! ```

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::time::Duration;

/// The `(lock_key, token)` pair needed to release a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseHandle {
    pub lock_key: String,
    pub token: String,
}

/// Lease data, independent of typestate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseData {
    pub lock_key: String,
    pub token: String,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
}

impl LeaseData {
    /// Check if the lease has expired based on current time.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Calculate remaining duration until expiry.
    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        if now >= self.expires_at {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }
}

// ============================================================================
// TYPESTATE MARKERS
// ============================================================================

/// Marker trait for lease states.
pub trait LeaseState: private::Sealed + Send + Sync {}

/// Lease is currently held by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Held;
impl LeaseState for Held {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Held {}
}

/// A lease with compile-time state tracking.
#[derive(Debug, Clone)]
pub struct Lease<S: LeaseState> {
    data: LeaseData,
    _state: PhantomData<S>,
}

impl<S: LeaseState> Lease<S> {
    /// Access the underlying lease data (read-only).
    pub fn data(&self) -> &LeaseData {
        &self.data
    }

    pub fn lock_key(&self) -> &str {
        &self.data.lock_key
    }

    pub fn token(&self) -> &str {
        &self.data.token
    }

    pub fn expires_at(&self) -> Timestamp {
        self.data.expires_at
    }
}

impl Lease<Held> {
    /// Create a held lease. Only the lock implementation should call this,
    /// right after an atomic set-if-absent succeeded.
    pub fn new(data: LeaseData) -> Self {
        Lease {
            data,
            _state: PhantomData,
        }
    }

    /// Record a successful renewal of the lease.
    pub fn extend(mut self, ttl: Duration, now: Timestamp) -> Self {
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::milliseconds(ttl.as_millis() as i64));
        self.data.expires_at = now + ttl;
        self
    }

    /// Check if the lease has expired.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.data.is_expired(now)
    }

    /// Get remaining duration until expiry.
    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        self.data.remaining_duration(now)
    }

    /// Borrow the release handle without giving up the lease.
    pub fn handle(&self) -> LeaseHandle {
        LeaseHandle {
            lock_key: self.data.lock_key.clone(),
            token: self.data.token.clone(),
        }
    }

    /// Consume the lease, keeping only what is needed to release it later.
    pub fn into_handle(self) -> LeaseHandle {
        LeaseHandle {
            lock_key: self.data.lock_key,
            token: self.data.token,
        }
    }
}
