//! Error taxonomy for LiquidPlanner API calls.
//!
//! Every error carries a stable machine-readable kind, a human message and a
//! structured detail payload so callers can render or forward it without
//! re-deriving the classification.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Stable classification tag for an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
  AuthFailure,
  NotFound,
  RateLimited,
  ClientValidation,
  ServerError,
  Timeout,
  ConnectionFailure,
  MalformedResponse,
  UnexpectedStatus,
  ApiFailure,
  BulkOperation,
}

impl ErrorKind {
  pub fn code(&self) -> &'static str {
    match self {
      Self::AuthFailure => "AUTH_FAILURE",
      Self::NotFound => "NOT_FOUND",
      Self::RateLimited => "RATE_LIMITED",
      Self::ClientValidation => "CLIENT_VALIDATION",
      Self::ServerError => "SERVER_ERROR",
      Self::Timeout => "TIMEOUT",
      Self::ConnectionFailure => "CONNECTION_FAILURE",
      Self::MalformedResponse => "MALFORMED_RESPONSE",
      Self::UnexpectedStatus => "UNEXPECTED_STATUS",
      Self::ApiFailure => "API_FAILURE",
      Self::BulkOperation => "BULK_OPERATION",
    }
  }

  /// Whether the request executor may retry a request that failed this way.
  pub fn is_retryable(&self) -> bool {
    matches!(
      self,
      Self::RateLimited | Self::ServerError | Self::Timeout | Self::ConnectionFailure
    )
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.code())
  }
}

/// Errors raised by the request executor and the custom field resolver.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("authentication failed: {message}")]
  Auth {
    message: String,
    status: Option<u16>,
    body: Option<String>,
  },

  #[error("resource not found: {message}")]
  NotFound {
    message: String,
    endpoint: String,
    body: Option<String>,
  },

  #[error("rate limit exceeded: {message}")]
  RateLimited {
    message: String,
    retry_after: Option<u64>,
    body: Option<String>,
  },

  #[error("validation failed: {message}")]
  Validation {
    message: String,
    status: Option<u16>,
    body: Option<String>,
    /// Offending field name -> reasons
    field_errors: BTreeMap<String, Vec<String>>,
  },

  #[error("server error ({status}): {message}")]
  Server {
    status: u16,
    message: String,
    body: Option<String>,
  },

  #[error("request to {endpoint} timed out after {timeout:?}")]
  Timeout { endpoint: String, timeout: Duration },

  #[error("connection to {endpoint} failed: {message}")]
  Connection { endpoint: String, message: String },

  #[error("malformed response: {message}")]
  MalformedResponse {
    message: String,
    body: Option<String>,
  },

  #[error("unexpected response status {status}: {message}")]
  UnexpectedStatus {
    status: u16,
    message: String,
    body: Option<String>,
  },

  #[error("{method} {url} failed after {attempts} attempts: {source}")]
  RetriesExhausted {
    method: String,
    url: String,
    attempts: u32,
    #[source]
    source: Box<ApiError>,
  },

  #[error("bulk {operation} failed for {} of {total} items", .failed.len())]
  BulkOperation {
    operation: String,
    total: usize,
    succeeded: Vec<Value>,
    failed: Vec<Value>,
  },
}

impl ApiError {
  /// Validation error for a request that never reached the network.
  pub fn validation(message: impl Into<String>) -> Self {
    Self::Validation {
      message: message.into(),
      status: None,
      body: None,
      field_errors: BTreeMap::new(),
    }
  }

  /// Validation error carrying per-field reasons.
  pub fn field_validation(
    message: impl Into<String>,
    field_errors: BTreeMap<String, Vec<String>>,
  ) -> Self {
    Self::Validation {
      message: message.into(),
      status: None,
      body: None,
      field_errors,
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Auth { .. } => ErrorKind::AuthFailure,
      Self::NotFound { .. } => ErrorKind::NotFound,
      Self::RateLimited { .. } => ErrorKind::RateLimited,
      Self::Validation { .. } => ErrorKind::ClientValidation,
      Self::Server { .. } => ErrorKind::ServerError,
      Self::Timeout { .. } => ErrorKind::Timeout,
      Self::Connection { .. } => ErrorKind::ConnectionFailure,
      Self::MalformedResponse { .. } => ErrorKind::MalformedResponse,
      Self::UnexpectedStatus { .. } => ErrorKind::UnexpectedStatus,
      Self::RetriesExhausted { .. } => ErrorKind::ApiFailure,
      Self::BulkOperation { .. } => ErrorKind::BulkOperation,
    }
  }

  pub fn is_retryable(&self) -> bool {
    self.kind().is_retryable()
  }

  /// HTTP status code of the response that produced this error, if any.
  pub fn status_code(&self) -> Option<u16> {
    match self {
      Self::Auth { status, .. } | Self::Validation { status, .. } => *status,
      Self::NotFound { .. } => Some(404),
      Self::RateLimited { .. } => Some(429),
      Self::Server { status, .. } | Self::UnexpectedStatus { status, .. } => Some(*status),
      Self::RetriesExhausted { source, .. } => source.status_code(),
      _ => None,
    }
  }

  /// Structured detail payload for this error.
  pub fn details(&self) -> Value {
    match self {
      Self::Auth { status, body, .. } => json!({ "status_code": status, "response": body }),
      Self::NotFound { endpoint, body, .. } => {
        json!({ "status_code": 404, "endpoint": endpoint, "response": body })
      }
      Self::RateLimited {
        retry_after, body, ..
      } => json!({ "status_code": 429, "retry_after": retry_after, "response": body }),
      Self::Validation {
        status,
        body,
        field_errors,
        ..
      } => json!({
        "status_code": status,
        "response": body,
        "field_errors": field_errors,
      }),
      Self::Server { status, body, .. } | Self::UnexpectedStatus { status, body, .. } => {
        json!({ "status_code": status, "response": body })
      }
      Self::Timeout { endpoint, timeout } => {
        json!({ "endpoint": endpoint, "timeout_seconds": timeout.as_secs_f64() })
      }
      Self::Connection { endpoint, .. } => json!({ "endpoint": endpoint }),
      Self::MalformedResponse { body, .. } => json!({ "response": body }),
      Self::RetriesExhausted {
        method,
        url,
        attempts,
        source,
      } => json!({
        "method": method,
        "url": url,
        "attempts": attempts,
        "status_code": source.status_code(),
        "last_error": source.to_payload(),
      }),
      Self::BulkOperation {
        operation,
        total,
        succeeded,
        failed,
      } => json!({
        "operation_type": operation,
        "total_count": total,
        "successful_count": succeeded.len(),
        "failed_count": failed.len(),
        "successful_items": succeeded,
        "failed_items": failed,
      }),
    }
  }

  /// `{"error", "message", "details"}` payload for the dispatch layer.
  pub fn to_payload(&self) -> Value {
    json!({
      "error": self.kind().code(),
      "message": self.to_string(),
      "details": self.details(),
    })
  }
}

/// Pull a human-readable message out of an error response body.
///
/// Looks at `errors` (list or scalar), then `error`, then `message`.
pub fn extract_error_message(body: &str) -> String {
  const FALLBACK: &str = "API request failed";

  let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) else {
    return FALLBACK.to_string();
  };

  if let Some(errors) = map.get("errors") {
    return match errors {
      Value::Array(items) => items
        .iter()
        .map(value_to_text)
        .collect::<Vec<_>>()
        .join("; "),
      other => value_to_text(other),
    };
  }

  map
    .get("error")
    .or_else(|| map.get("message"))
    .map(value_to_text)
    .unwrap_or_else(|| FALLBACK.to_string())
}

fn value_to_text(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}
