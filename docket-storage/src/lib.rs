//! Docket Storage - Persistence Traits and Implementations
//!
//! Defines the storage seams of the analysis engine:
//!
//! - [`ActivityOracle`]: latest case activity, owned by an external store
//! - [`CacheStore`] over a pluggable [`CacheBackend`]: key -> completed version
//! - [`AnalysisRepository`]: versions and jobs
//!
//! In-memory implementations of each are provided for tests and embedded use.
//! The `postgres` feature adds [`PgAnalysisStore`], which implements all three.

pub mod activity;
pub mod cache;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod repository;

pub use activity::{ActivityEvent, ActivityOracle, InMemoryActivityLog};
pub use cache::{
    CacheBackend, CacheLookup, CacheStats, CacheStore, InMemoryCacheBackend, LmdbCacheBackend,
    LmdbCacheError, MissReason,
};
#[cfg(feature = "postgres")]
pub use postgres::{DbConfig, PgAnalysisStore};
pub use repository::{AnalysisRepository, InMemoryAnalysisRepository, NewVersion};
