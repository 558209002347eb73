//! Docket Lock - Distributed Mutual Exclusion
//!
//! Guarantees at most one in-flight computation per analysis key across every
//! process sharing a key-value store. Leases expire on their own, so a crashed
//! holder never blocks a key for longer than its TTL.

pub mod kv;
pub mod lock;
#[cfg(feature = "redis")]
pub mod redis_store;

pub use kv::{InMemoryKvStore, KvStore};
pub use lock::{DistributedLock, LockAttempt};
#[cfg(feature = "redis")]
pub use redis_store::RedisKvStore;
