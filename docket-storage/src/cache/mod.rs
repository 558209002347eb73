//! Analysis cache.
//!
//! Maps an analysis key to the version that answered it. Entries are
//! trusted only while their TTL holds and the case has seen no newer
//! activity; see [`CacheStore::get`].
//!
//! # Example
//!
//! ```ignore
//! let cache = CacheStore::new(Arc::new(InMemoryCacheBackend::new()), oracle);
//!
//! match cache.get(&key).await? {
//!     CacheLookup::Hit(entry) => load_version(entry.result_ref).await,
//!     CacheLookup::Miss(reason) => tracing::debug!(reason = reason.as_str(), "cache miss"),
//! }
//! ```

pub mod lmdb_backend;
pub mod memory;
pub mod store;
pub mod traits;

pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory::InMemoryCacheBackend;
pub use store::{CacheLookup, CacheStore, MissReason};
pub use traits::{CacheBackend, CacheStats};
