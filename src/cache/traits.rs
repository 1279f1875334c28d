//! Core traits and types for the caching system.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failure inside a cache backend.
///
/// These never leave the cache layer: [`super::CacheLayer`] logs them and
/// carries on as if the cache were empty.
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("sqlite cache error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("redis cache error: {0}")]
  Redis(#[from] redis::RedisError),

  #[error("cached value could not be (de)serialized: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("cache lock poisoned")]
  Poisoned,
}

/// Key/value backend with per-entry TTL and glob-pattern deletion.
///
/// Values are opaque JSON text; expiry is the backend's responsibility.
#[async_trait]
pub trait CacheStore: Send + Sync {
  /// Short backend name for log output.
  fn name(&self) -> &'static str;

  /// Get a live (non-expired) value.
  async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

  /// Store a value that expires after `ttl`.
  async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

  /// Remove a single key.
  async fn delete(&self, key: &str) -> Result<(), CacheError>;

  /// Remove every key matching a glob pattern (`*`, `?`, `[...]`).
  /// Returns the number of keys removed.
  async fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError>;
}
