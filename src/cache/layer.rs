//! Cache layer that sits between the request executor and a cache store.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::redis_store::RedisStore;
use super::storage::{NoopStore, SqliteStore};
use super::traits::CacheStore;

/// How long to wait for a cache server before giving up on caching.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Best-effort response cache.
///
/// The layer is strictly advisory: a missing, unreachable or failing store
/// never surfaces an error. Reads degrade to misses and writes to no-ops,
/// with a warning in the log.
#[derive(Clone)]
pub struct CacheLayer {
  store: Arc<dyn CacheStore>,
  namespace: String,
  default_ttl: Duration,
}

impl CacheLayer {
  /// Create a cache layer over the given store.
  pub fn new(store: Arc<dyn CacheStore>, namespace: impl Into<String>) -> Self {
    Self {
      store,
      namespace: namespace.into(),
      default_ttl: Duration::from_secs(300),
    }
  }

  /// Cache layer that never stores anything.
  pub fn disabled() -> Self {
    Self::new(Arc::new(NoopStore), "lp")
  }

  /// Set the TTL used when a caller doesn't give one.
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = ttl;
    self
  }

  /// Build a cache layer from an optional store URL.
  ///
  /// `redis://` and `rediss://` connect to Redis, `sqlite://<path>` opens a
  /// local database (an empty path means the default location). No URL, or
  /// a store that can't be opened, yields a disabled cache.
  pub async fn connect(url: Option<&str>, namespace: &str) -> Self {
    let Some(url) = url.filter(|u| !u.trim().is_empty()) else {
      info!("No cache URL configured, caching disabled");
      return Self::new(Arc::new(NoopStore), namespace);
    };

    let is_redis = url.starts_with("redis://") || url.starts_with("rediss://");

    let store: Arc<dyn CacheStore> = if is_redis {
      match RedisStore::connect(url, CONNECT_TIMEOUT).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
          warn!(error = %e, "Failed to connect to Redis, caching disabled");
          Arc::new(NoopStore)
        }
      }
    } else if let Some(path) = url.strip_prefix("sqlite://") {
      let opened = if path.is_empty() {
        SqliteStore::open_default()
      } else {
        SqliteStore::open(&PathBuf::from(path))
      };
      match opened {
        Ok(store) => {
          info!(path = %path, "Opened SQLite cache");
          Arc::new(store)
        }
        Err(e) => {
          warn!(error = %e, "Failed to open SQLite cache, caching disabled");
          Arc::new(NoopStore)
        }
      }
    } else {
      warn!(url = %url, "Unsupported cache URL scheme, caching disabled");
      Arc::new(NoopStore)
    };

    Self::new(store, namespace)
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  pub fn default_ttl(&self) -> Duration {
    self.default_ttl
  }

  /// Name of the backing store (`noop`, `sqlite`, `redis`).
  pub fn backend(&self) -> &'static str {
    self.store.name()
  }

  /// Build the cache key for a request.
  ///
  /// `"<namespace>:<METHOD>:<url>"`, followed by `":<params>"` with the
  /// parameters sorted and url-encoded when there are any, so equivalent
  /// parameter sets always map to the same key.
  pub fn build_key(
    &self,
    method: &str,
    url: &str,
    params: Option<&HashMap<String, String>>,
  ) -> String {
    let mut key = format!("{}:{}:{}", self.namespace, method.to_uppercase(), url);

    if let Some(params) = params.filter(|p| !p.is_empty()) {
      let mut sorted: Vec<(&String, &String)> = params.iter().collect();
      sorted.sort();
      let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(sorted)
        .finish();
      key.push(':');
      key.push_str(&encoded);
    }

    key
  }

  /// Look up a cached value. Any failure is a miss.
  pub async fn get(&self, key: &str) -> Option<Value> {
    let raw = match self.store.get(key).await {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(key = %key, error = %e, "Cache get failed");
        return None;
      }
    };

    match serde_json::from_str(&raw) {
      Ok(value) => {
        debug!(key = %key, "Cache hit");
        Some(value)
      }
      Err(e) => {
        warn!(key = %key, error = %e, "Discarding undecodable cache entry");
        None
      }
    }
  }

  /// Store a value, using the default TTL when `ttl` is `None`.
  pub async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) {
    let ttl = ttl.unwrap_or(self.default_ttl);

    let raw = match serde_json::to_string(value) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(key = %key, error = %e, "Cache set failed");
        return;
      }
    };

    if let Err(e) = self.store.set(key, &raw, ttl).await {
      warn!(key = %key, error = %e, "Cache set failed");
    }
  }

  pub async fn delete(&self, key: &str) {
    if let Err(e) = self.store.delete(key).await {
      warn!(key = %key, error = %e, "Cache delete failed");
    }
  }

  /// Remove every entry whose key matches a glob pattern.
  pub async fn invalidate_pattern(&self, pattern: &str) {
    match self.store.delete_matching(pattern).await {
      Ok(removed) => debug!(pattern = %pattern, removed, "Cache entries invalidated"),
      Err(e) => warn!(pattern = %pattern, error = %e, "Cache pattern invalidation failed"),
    }
  }
}
