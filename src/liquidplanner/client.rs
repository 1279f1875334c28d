use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::cache::CacheLayer;
use crate::config::Config;
use crate::error::{extract_error_message, ApiError, ErrorKind};
use crate::ratelimit::RateLimiter;

use super::cache::ResourceKey;
use super::transport::{
  Credentials, HttpRequest, HttpResponse, Method, ReqwestTransport, Transport, TransportError,
};

/// Delay schedule between retry attempts.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
  /// Delay before the first retry; doubles on every attempt
  pub base: Duration,
  /// Extra factor applied when the server answered 429
  pub rate_limit_multiplier: f64,
  /// Upper bound for a single delay (`None` = uncapped)
  pub max_delay: Option<Duration>,
}

impl Default for BackoffPolicy {
  fn default() -> Self {
    Self {
      base: Duration::from_secs(1),
      rate_limit_multiplier: 5.0,
      max_delay: None,
    }
  }
}

impl BackoffPolicy {
  /// Delay after a failed zero-based `attempt` of the given kind.
  pub fn delay(&self, kind: ErrorKind, attempt: u32) -> Duration {
    let mut secs = self.base.as_secs_f64() * 2f64.powi(attempt.min(62) as i32);
    if kind == ErrorKind::RateLimited {
      secs *= self.rate_limit_multiplier;
    }

    let delay = Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX);
    match self.max_delay {
      Some(max) => delay.min(max),
      None => delay,
    }
  }
}

/// Connection settings for one workspace.
#[derive(Debug, Clone)]
pub struct ClientSettings {
  pub base_url: String,
  pub workspace_id: u64,
  pub credentials: Credentials,
  pub max_retries: u32,
  pub timeout: Duration,
  pub backoff: BackoffPolicy,
}

/// A single logical API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
  pub method: Method,
  pub endpoint: String,
  pub params: Option<HashMap<String, String>>,
  pub body: Option<Value>,
  pub workspace_scoped: bool,
  pub use_cache: bool,
  pub cache_ttl: Option<Duration>,
}

impl ApiRequest {
  pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
    Self {
      method,
      endpoint: endpoint.into(),
      params: None,
      body: None,
      workspace_scoped: true,
      use_cache: true,
      cache_ttl: None,
    }
  }

  pub fn get(endpoint: impl Into<String>) -> Self {
    Self::new(Method::Get, endpoint)
  }

  pub fn post(endpoint: impl Into<String>, body: Value) -> Self {
    Self::new(Method::Post, endpoint).with_body(body)
  }

  pub fn put(endpoint: impl Into<String>, body: Value) -> Self {
    Self::new(Method::Put, endpoint).with_body(body)
  }

  pub fn delete(endpoint: impl Into<String>) -> Self {
    Self::new(Method::Delete, endpoint)
  }

  pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self
      .params
      .get_or_insert_with(HashMap::new)
      .insert(key.into(), value.into());
    self
  }

  pub fn with_params(mut self, params: HashMap<String, String>) -> Self {
    self.params = Some(params);
    self
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  /// Don't prefix the endpoint with `/workspaces/{id}`.
  pub fn global(mut self) -> Self {
    self.workspace_scoped = false;
    self
  }

  pub fn without_cache(mut self) -> Self {
    self.use_cache = false;
    self
  }

  pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
    self.cache_ttl = Some(ttl);
    self
  }
}

/// LiquidPlanner API client: URL building, caching, rate limiting, retries
/// and response classification.
#[derive(Clone)]
pub struct LiquidPlannerClient {
  settings: Arc<ClientSettings>,
  transport: Arc<dyn Transport>,
  rate_limiter: Arc<RateLimiter>,
  cache: CacheLayer,
}

impl LiquidPlannerClient {
  pub fn new(
    settings: ClientSettings,
    transport: Arc<dyn Transport>,
    rate_limiter: Arc<RateLimiter>,
    cache: CacheLayer,
  ) -> Self {
    info!(
      email = %settings.credentials.email,
      workspace_id = settings.workspace_id,
      base_url = %settings.base_url,
      cache = cache.backend(),
      "LiquidPlanner client initialized"
    );

    Self {
      settings: Arc::new(settings),
      transport,
      rate_limiter,
      cache,
    }
  }

  /// Build a client with the reqwest transport, rate limiter and cache
  /// described by the configuration.
  pub async fn from_config(config: &Config) -> Result<Self> {
    let password = Config::get_password()?;

    let settings = ClientSettings {
      base_url: config.liquidplanner.base_url.clone(),
      workspace_id: config.liquidplanner.workspace_id,
      credentials: Credentials {
        email: config.liquidplanner.email.clone(),
        password,
      },
      max_retries: config.requests.max_retries,
      timeout: Duration::from_secs(config.requests.timeout_seconds),
      backoff: config.requests.backoff_policy(),
    };

    let rate_limiter = RateLimiter::new(
      config.rate_limit.requests,
      Duration::from_secs(config.rate_limit.period_seconds),
    );

    let cache = CacheLayer::connect(config.cache.url.as_deref(), &config.cache.namespace)
      .await
      .with_default_ttl(Duration::from_secs(config.cache.ttl_seconds));

    Ok(Self::new(
      settings,
      Arc::new(ReqwestTransport::new()?),
      Arc::new(rate_limiter),
      cache,
    ))
  }

  pub fn settings(&self) -> &ClientSettings {
    &self.settings
  }

  pub fn cache(&self) -> &CacheLayer {
    &self.cache
  }

  pub fn workspace_id(&self) -> u64 {
    self.settings.workspace_id
  }

  /// Absolute URL for an endpoint, optionally inside the workspace.
  pub fn build_url(&self, endpoint: &str, workspace_scoped: bool) -> String {
    let endpoint = endpoint.trim_start_matches('/');
    let base = self.settings.base_url.trim_end_matches('/');

    if workspace_scoped {
      format!("{}/workspaces/{}/{}", base, self.settings.workspace_id, endpoint)
    } else {
      format!("{}/{}", base, endpoint)
    }
  }

  /// Cache key the executor would use for a request.
  pub fn cache_key(&self, request: &ApiRequest) -> String {
    let url = self.build_url(&request.endpoint, request.workspace_scoped);
    self
      .cache
      .build_key(request.method.as_str(), &url, request.params.as_ref())
  }

  /// Execute an API call.
  ///
  /// Cacheable `GET`s are answered from the cache when possible. Otherwise
  /// the call makes at most `max_retries + 1` attempts, each gated by the
  /// rate limiter. Auth, not-found, validation and malformed-response
  /// failures are returned on first sight; rate limiting, server errors,
  /// timeouts and connection failures are retried with exponential backoff.
  ///
  /// Mutations never touch the cache. Invalidating cached reads of the
  /// resource they changed is up to the caller (see [`Self::invalidate`]).
  pub async fn execute(&self, request: ApiRequest) -> Result<Value, ApiError> {
    let url = self.build_url(&request.endpoint, request.workspace_scoped);

    let cache_key = (request.method == Method::Get && request.use_cache).then(|| {
      self
        .cache
        .build_key(request.method.as_str(), &url, request.params.as_ref())
    });

    if let Some(key) = &cache_key {
      if let Some(cached) = self.cache.get(key).await {
        debug!(method = %request.method, url = %url, "Serving response from cache");
        return Ok(cached);
      }
    }

    let mut query: Vec<(String, String)> = request
      .params
      .as_ref()
      .map(|p| p.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
      .unwrap_or_default();
    query.sort();

    let http_request = HttpRequest {
      method: request.method,
      url: url.clone(),
      query,
      body: request.body.clone(),
      credentials: self.settings.credentials.clone(),
      timeout: self.settings.timeout,
    };

    let max_attempts = self.settings.max_retries + 1;
    let mut attempt: u32 = 0;

    loop {
      self.rate_limiter.acquire().await;
      debug!(method = %request.method, url = %url, attempt = attempt + 1, "Sending request");

      let outcome = match self.transport.send(&http_request).await {
        Ok(response) => classify_response(response, &request.endpoint),
        Err(TransportError::Timeout) => Err(ApiError::Timeout {
          endpoint: request.endpoint.clone(),
          timeout: self.settings.timeout,
        }),
        Err(TransportError::Connection(message)) => Err(ApiError::Connection {
          endpoint: request.endpoint.clone(),
          message,
        }),
      };

      let error = match outcome {
        Ok(value) => {
          if let Some(key) = &cache_key {
            self.cache.set(key, &value, request.cache_ttl).await;
          }
          debug!(method = %request.method, url = %url, "Request succeeded");
          return Ok(value);
        }
        Err(error) => error,
      };

      if !error.is_retryable() {
        debug!(kind = %error.kind(), error = %error, "Request failed, not retrying");
        return Err(error);
      }

      attempt += 1;
      if attempt >= max_attempts {
        error!(
          method = %request.method,
          url = %url,
          attempts = attempt,
          error = %error,
          "Request failed after all retries"
        );
        return Err(ApiError::RetriesExhausted {
          method: request.method.to_string(),
          url,
          attempts: attempt,
          source: Box::new(error),
        });
      }

      let delay = self.settings.backoff.delay(error.kind(), attempt - 1);
      warn!(
        kind = %error.kind(),
        attempt,
        delay_seconds = delay.as_secs_f64(),
        "Transient failure, retrying"
      );
      tokio::time::sleep(delay).await;
    }
  }

  /// Drop cached reads of the given resources.
  pub async fn invalidate(&self, resources: &[ResourceKey]) {
    for resource in resources {
      for pattern in resource.invalidation_patterns(self.cache.namespace()) {
        self.cache.invalidate_pattern(&pattern).await;
      }
    }
  }

  /// Drop cached entries whose key matches a glob pattern.
  pub async fn invalidate_pattern(&self, pattern: &str) {
    self.cache.invalidate_pattern(pattern).await;
  }

  /// Account of the authenticated user (global endpoint).
  pub async fn account(&self) -> Result<Value, ApiError> {
    self.execute(ApiRequest::get("/account").global()).await
  }

  /// Check the credentials against `/account`, bypassing the cache.
  pub async fn verify_authentication(&self) -> Result<Value, ApiError> {
    match self
      .execute(ApiRequest::get("/account").global().without_cache())
      .await
    {
      Ok(account) => {
        info!(user = ?account.get("user_name"), "Authentication successful");
        Ok(account)
      }
      Err(e @ ApiError::Auth { .. }) => {
        error!(error = %e, "Authentication failed");
        Err(e)
      }
      Err(e) => {
        error!(error = %e, "Authentication failed");
        Err(ApiError::Auth {
          message: format!("could not verify credentials: {}", e),
          status: e.status_code(),
          body: None,
        })
      }
    }
  }

  /// Connectivity report; never fails.
  pub async fn health_check(&self) -> Value {
    match self.verify_authentication().await {
      Ok(account) => json!({
        "status": "healthy",
        "liquidplanner_api": "connected",
        "workspace_id": self.settings.workspace_id,
        "account": account.get("user_name").cloned().unwrap_or(Value::from("Unknown")),
        "cache": self.cache.backend(),
      }),
      Err(e) => json!({
        "status": "unhealthy",
        "workspace_id": self.settings.workspace_id,
        "error": e.to_payload(),
        "cache": self.cache.backend(),
      }),
    }
  }
}

/// Map a raw HTTP response onto a parsed body or a classified error.
fn classify_response(response: HttpResponse, endpoint: &str) -> Result<Value, ApiError> {
  let HttpResponse {
    status,
    headers,
    body,
  } = response;

  if (200..300).contains(&status) {
    if body.trim().is_empty() {
      return Ok(Value::Null);
    }
    return serde_json::from_str(&body).map_err(|e| ApiError::MalformedResponse {
      message: format!("invalid JSON in {} response: {}", status, e),
      body: Some(body),
    });
  }

  let message = extract_error_message(&body);
  let body = (!body.is_empty()).then_some(body);

  match status {
    401 => Err(ApiError::Auth {
      message,
      status: Some(status),
      body,
    }),
    403 => Err(ApiError::Auth {
      message: format!("access forbidden: {}", message),
      status: Some(status),
      body,
    }),
    404 => Err(ApiError::NotFound {
      message,
      endpoint: endpoint.to_string(),
      body,
    }),
    429 => {
      let retry_after = body
        .as_deref()
        .and_then(|b| serde_json::from_str::<Value>(b).ok())
        .and_then(|v| v.get("retry_after").and_then(Value::as_u64))
        .or_else(|| headers.get("retry-after").and_then(|h| h.trim().parse().ok()));
      Err(ApiError::RateLimited {
        message,
        retry_after,
        body,
      })
    }
    400..=499 => Err(ApiError::Validation {
      message,
      status: Some(status),
      body,
      field_errors: Default::default(),
    }),
    500..=599 => Err(ApiError::Server {
      status,
      message,
      body,
    }),
    _ => Err(ApiError::UnexpectedStatus {
      status,
      message,
      body,
    }),
  }
}
