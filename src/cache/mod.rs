//! Best-effort response cache.
//!
//! This module provides an API-agnostic caching mechanism that:
//! - Builds deterministic keys from method, URL and sorted parameters
//! - Stores JSON payloads with a TTL in a pluggable [`CacheStore`]
//! - Invalidates entries by glob pattern after writes
//! - Never lets a cache failure abort the operation that used it

mod layer;
mod redis_store;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use redis_store::RedisStore;
pub use storage::{NoopStore, SqliteStore};
pub use traits::{CacheError, CacheStore};
