use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::liquidplanner::BackoffPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub liquidplanner: LiquidPlannerConfig,
  #[serde(default)]
  pub rate_limit: RateLimitConfig,
  #[serde(default)]
  pub requests: RequestConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub bulk: BulkConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiquidPlannerConfig {
  /// API root, e.g. https://app.liquidplanner.com/api
  #[serde(default = "default_base_url")]
  pub base_url: String,
  pub email: String,
  pub workspace_id: u64,
}

fn default_base_url() -> String {
  "https://app.liquidplanner.com/api".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
  /// Requests allowed per period
  pub requests: u32,
  pub period_seconds: u64,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self {
      requests: 60,
      period_seconds: 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
  pub max_retries: u32,
  /// Per attempt
  pub timeout_seconds: u64,
  pub backoff_base_seconds: f64,
  /// Extra backoff factor after a 429
  pub rate_limit_backoff_multiplier: f64,
  /// Cap for a single retry delay; unset means uncapped
  pub max_backoff_seconds: Option<f64>,
}

impl Default for RequestConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      timeout_seconds: 30,
      backoff_base_seconds: 1.0,
      rate_limit_backoff_multiplier: 5.0,
      max_backoff_seconds: None,
    }
  }
}

impl RequestConfig {
  pub fn backoff_policy(&self) -> BackoffPolicy {
    let defaults = BackoffPolicy::default();
    BackoffPolicy {
      base: Duration::try_from_secs_f64(self.backoff_base_seconds).unwrap_or(defaults.base),
      rate_limit_multiplier: self.rate_limit_backoff_multiplier,
      max_delay: self
        .max_backoff_seconds
        .and_then(|s| Duration::try_from_secs_f64(s).ok()),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// redis://, rediss:// or sqlite://<path>; caching is off when unset
  pub url: Option<String>,
  pub namespace: String,
  pub ttl_seconds: u64,
  pub custom_fields_ttl_seconds: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      url: None,
      namespace: "lp".to_string(),
      ttl_seconds: 300,
      custom_fields_ttl_seconds: 3600,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
  pub batch_size: usize,
}

impl Default for BulkConfig {
  fn default() -> Self {
    Self { batch_size: 10 }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
  #[default]
  Text,
  Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// tracing filter directive; RUST_LOG wins when set
  pub level: String,
  pub format: LogFormat,
  /// Log file; stderr when unset
  pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      format: LogFormat::Text,
      file: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./lpx.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/lpx/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/lpx/config.yaml\n\
         See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("lpx.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("lpx").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  /// Parse and validate a YAML document.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  /// Use a different workspace than the configured one.
  pub fn with_workspace(self, workspace_id: u64) -> Self {
    Config {
      liquidplanner: LiquidPlannerConfig {
        workspace_id,
        ..self.liquidplanner
      },
      ..self
    }
  }

  pub fn validate(&self) -> Result<()> {
    let lp = &self.liquidplanner;
    if !(lp.base_url.starts_with("https://") || lp.base_url.starts_with("http://")) {
      return Err(eyre!("liquidplanner.base_url must start with http:// or https://"));
    }
    if lp.email.trim().is_empty() {
      return Err(eyre!("liquidplanner.email must not be empty"));
    }

    check_range("rate_limit.requests", self.rate_limit.requests as u64, 1, 1000)?;
    check_range("rate_limit.period_seconds", self.rate_limit.period_seconds, 1, 3600)?;
    check_range("requests.max_retries", self.requests.max_retries as u64, 0, 10)?;
    check_range("requests.timeout_seconds", self.requests.timeout_seconds, 1, 300)?;
    check_range("cache.ttl_seconds", self.cache.ttl_seconds, 0, 86400)?;
    check_range(
      "cache.custom_fields_ttl_seconds",
      self.cache.custom_fields_ttl_seconds,
      60,
      86400,
    )?;
    check_range("bulk.batch_size", self.bulk.batch_size as u64, 1, 100)?;

    let backoff = &self.requests;
    if !(backoff.backoff_base_seconds.is_finite() && backoff.backoff_base_seconds >= 0.0) {
      return Err(eyre!("requests.backoff_base_seconds must be a non-negative number"));
    }
    if !(backoff.rate_limit_backoff_multiplier.is_finite()
      && backoff.rate_limit_backoff_multiplier >= 1.0)
    {
      return Err(eyre!("requests.rate_limit_backoff_multiplier must be at least 1"));
    }
    if let Some(max) = backoff.max_backoff_seconds {
      if !(max.is_finite() && max >= 0.0) {
        return Err(eyre!("requests.max_backoff_seconds must be a non-negative number"));
      }
    }

    if let Some(url) = &self.cache.url {
      let supported = ["redis://", "rediss://", "sqlite://"];
      if !supported.iter().any(|scheme| url.starts_with(scheme)) {
        return Err(eyre!(
          "cache.url must start with one of: {}",
          supported.join(", ")
        ));
      }
    }
    if self.cache.namespace.is_empty() {
      return Err(eyre!("cache.namespace must not be empty"));
    }

    Ok(())
  }

  /// Get the LiquidPlanner password from environment variables.
  ///
  /// Checks LPX_PASSWORD first, then LIQUIDPLANNER_PASSWORD as fallback.
  pub fn get_password() -> Result<String> {
    password_from(|name| std::env::var(name).ok())
  }
}

fn password_from(lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
  ["LPX_PASSWORD", "LIQUIDPLANNER_PASSWORD"]
    .into_iter()
    .filter_map(lookup)
    .find(|p| !p.is_empty())
    .ok_or_else(|| {
      eyre!(
        "LiquidPlanner password not found. Set LPX_PASSWORD or LIQUIDPLANNER_PASSWORD environment variable."
      )
    })
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
  if (min..=max).contains(&value) {
    Ok(())
  } else {
    Err(eyre!("{} must be between {} and {} (got {})", name, min, max, value))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  const MINIMAL: &str = "
liquidplanner:
  email: pm@example.com
  workspace_id: 42
";

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml(MINIMAL).unwrap();

    assert_eq!(config.liquidplanner.base_url, "https://app.liquidplanner.com/api");
    assert_eq!(config.rate_limit.requests, 60);
    assert_eq!(config.requests.max_retries, 3);
    assert_eq!(config.cache.url, None);
    assert_eq!(config.cache.namespace, "lp");
    assert_eq!(config.bulk.batch_size, 10);
    assert_eq!(config.logging.format, LogFormat::Text);

    let backoff = config.requests.backoff_policy();
    assert_eq!(backoff.base, Duration::from_secs(1));
    assert_eq!(backoff.rate_limit_multiplier, 5.0);
    assert_eq!(backoff.max_delay, None);
  }

  #[test]
  fn test_full_config() {
    let config = Config::from_yaml(
      "
liquidplanner:
  base_url: https://lp.internal/api
  email: pm@example.com
  workspace_id: 7
rate_limit:
  requests: 30
  period_seconds: 15
requests:
  max_retries: 5
  max_backoff_seconds: 60
cache:
  url: sqlite:///tmp/lpx.db
  ttl_seconds: 120
logging:
  level: debug
  format: json
",
    )
    .unwrap();

    assert_eq!(config.rate_limit.period_seconds, 15);
    assert_eq!(config.requests.timeout_seconds, 30);
    assert_eq!(
      config.requests.backoff_policy().max_delay,
      Some(Duration::from_secs(60))
    );
    assert_eq!(config.cache.url.as_deref(), Some("sqlite:///tmp/lpx.db"));
    assert_eq!(config.logging.format, LogFormat::Json);
  }

  #[test]
  fn test_validation_rejects_out_of_range_values() {
    for extra in [
      "rate_limit:\n  requests: 0\n",
      "rate_limit:\n  period_seconds: 7200\n",
      "requests:\n  max_retries: 11\n",
      "requests:\n  timeout_seconds: 0\n",
      "bulk:\n  batch_size: 500\n",
      "cache:\n  url: memcached://localhost\n",
      "requests:\n  rate_limit_backoff_multiplier: 0.5\n",
    ] {
      let yaml = format!("{}{}", MINIMAL, extra);
      assert!(Config::from_yaml(&yaml).is_err(), "accepted: {}", extra);
    }
  }

  #[test]
  fn test_base_url_must_be_http() {
    let yaml = "
liquidplanner:
  base_url: ftp://example.com
  email: pm@example.com
  workspace_id: 1
";
    assert!(Config::from_yaml(yaml).is_err());
  }

  #[test]
  fn test_workspace_override() {
    let config = Config::from_yaml(MINIMAL).unwrap().with_workspace(99);
    assert_eq!(config.liquidplanner.workspace_id, 99);
    assert_eq!(config.liquidplanner.email, "pm@example.com");
  }

  #[test]
  fn test_password_lookup_order() {
    let both = |name: &str| match name {
      "LPX_PASSWORD" => Some("primary".to_string()),
      _ => Some("fallback".to_string()),
    };
    assert_eq!(password_from(both).unwrap(), "primary");

    let fallback_only =
      |name: &str| (name == "LIQUIDPLANNER_PASSWORD").then(|| "fallback".to_string());
    assert_eq!(password_from(fallback_only).unwrap(), "fallback");

    assert!(password_from(|_| None).is_err());
  }

  #[test]
  fn test_load_from_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(MINIMAL.as_bytes()).unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.liquidplanner.workspace_id, 42);

    assert!(Config::load(Some(Path::new("/nonexistent/lpx.yaml"))).is_err());
  }
}
