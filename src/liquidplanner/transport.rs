//! HTTP transport primitive used by the request executor.
//!
//! The executor only needs "send this request, give me status, headers and
//! body". Retries, auth policy and classification all live above this layer.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use thiserror::Error;

/// HTTP method of an API request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Get => "GET",
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Delete => "DELETE",
    }
  }

  /// Whether the method changes remote state.
  pub fn is_mutation(&self) -> bool {
    !matches!(self, Self::Get)
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for Method {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.trim().to_uppercase().as_str() {
      "GET" => Ok(Self::Get),
      "POST" => Ok(Self::Post),
      "PUT" => Ok(Self::Put),
      "DELETE" => Ok(Self::Delete),
      other => Err(format!("unsupported HTTP method '{}'", other)),
    }
  }
}

/// HTTP Basic credentials.
#[derive(Clone)]
pub struct Credentials {
  pub email: String,
  pub password: String,
}

impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Credentials")
      .field("email", &self.email)
      .field("password", &"***")
      .finish()
  }
}

/// A fully-resolved request ready to go on the wire.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  /// Absolute URL
  pub url: String,
  pub query: Vec<(String, String)>,
  pub body: Option<Value>,
  pub credentials: Credentials,
  /// Applies to this attempt only
  pub timeout: Duration,
}

/// Raw response: status, lowercase header names, body text.
#[derive(Debug, Clone)]
pub struct HttpResponse {
  pub status: u16,
  pub headers: HashMap<String, String>,
  pub body: String,
}

/// Transport-level failures, before any HTTP status exists.
#[derive(Debug, Error)]
pub enum TransportError {
  #[error("request timed out")]
  Timeout,

  #[error("connection failed: {0}")]
  Connection(String),
}

/// Opaque "send HTTP request, get status + body" primitive.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Production transport on top of `reqwest`.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new() -> Result<Self> {
    use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .user_agent(concat!("lpx/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
  if error.is_timeout() {
    TransportError::Timeout
  } else {
    TransportError::Connection(error.to_string())
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Delete => reqwest::Method::DELETE,
    };

    let mut builder = self
      .client
      .request(method, &request.url)
      .basic_auth(&request.credentials.email, Some(&request.credentials.password))
      .timeout(request.timeout);

    if !request.query.is_empty() {
      builder = builder.query(&request.query);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder.send().await.map_err(classify_reqwest_error)?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_lowercase(), v.to_string()))
      })
      .collect();
    let body = response.text().await.map_err(classify_reqwest_error)?;

    Ok(HttpResponse {
      status,
      headers,
      body,
    })
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_method_parsing() {
    assert_eq!("get".parse::<Method>(), Ok(Method::Get));
    assert_eq!("DELETE".parse::<Method>(), Ok(Method::Delete));
    assert!("PATCH".parse::<Method>().is_err());
    assert!(Method::Put.is_mutation());
    assert!(!Method::Get.is_mutation());
  }

  #[test]
  fn test_credentials_debug_hides_password() {
    let credentials = Credentials {
      email: "pm@example.com".to_string(),
      password: "hunter2".to_string(),
    };
    let rendered = format!("{:?}", credentials);
    assert!(rendered.contains("pm@example.com"));
    assert!(!rendered.contains("hunter2"));
  }
}
