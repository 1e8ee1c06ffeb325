//! URL patterns and the HTTP capability.
//!
//! [`UrlPattern`] drives `wait_for_url` and the stub client's routing.
//! [`HttpClient`] is the opaque capability API assertions go through: the
//! core only needs a status and a JSON body back.

use crate::result::{EnsayoError, EnsayoResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HttpMethod {
    /// GET request
    Get,
    /// POST request
    Post,
    /// PUT request
    Put,
    /// DELETE request
    Delete,
    /// PATCH request
    Patch,
    /// HEAD request
    Head,
}

impl HttpMethod {
    /// Convert to string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Head => "HEAD",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = EnsayoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "PATCH" => Ok(Self::Patch),
            "HEAD" => Ok(Self::Head),
            other => Err(EnsayoError::Http {
                message: format!("unsupported method '{other}'"),
            }),
        }
    }
}

/// URL pattern for matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UrlPattern {
    /// Exact URL match
    Exact(String),
    /// Prefix match
    Prefix(String),
    /// Contains substring
    Contains(String),
    /// Regex match
    Regex(String),
    /// Glob pattern (e.g., "**/api/users/*")
    Glob(String),
    /// Match any URL
    Any,
}

impl UrlPattern {
    /// Check if a URL matches this pattern
    #[must_use]
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Exact(pattern) => url == pattern,
            Self::Prefix(pattern) => url.starts_with(pattern),
            Self::Contains(pattern) => url.contains(pattern),
            Self::Regex(pattern) => regex::Regex::new(pattern)
                .map(|re| re.is_match(url))
                .unwrap_or(false),
            Self::Glob(pattern) => Self::glob_matches(pattern, url),
            Self::Any => true,
        }
    }

    /// Glob matching where `*` spans any run of characters
    fn glob_matches(pattern: &str, url: &str) -> bool {
        let parts: Vec<&str> = pattern.split('*').collect();
        let mut pos = 0;
        for (i, part) in parts.iter().enumerate() {
            if part.is_empty() {
                continue;
            }
            match url[pos..].find(part) {
                Some(found) if i == 0 && found != 0 => return false,
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
        pattern.ends_with('*') || pos == url.len()
    }
}

impl std::fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact(p) => write!(f, "{p}"),
            Self::Prefix(p) => write!(f, "{p}*"),
            Self::Contains(p) => write!(f, "*{p}*"),
            Self::Regex(p) => write!(f, "/{p}/"),
            Self::Glob(p) => write!(f, "{p}"),
            Self::Any => write!(f, "*"),
        }
    }
}

impl From<&str> for UrlPattern {
    /// Strings with `*` become globs, others exact matches
    fn from(pattern: &str) -> Self {
        if pattern.contains('*') {
            Self::Glob(pattern.to_string())
        } else {
            Self::Exact(pattern.to_string())
        }
    }
}

// =============================================================================
// HTTP CAPABILITY
// =============================================================================

/// Response of an API call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Requested URL
    pub url: String,
    /// HTTP status code
    pub status: u16,
    /// Parsed JSON body (`Null` when empty, a string when not JSON)
    pub body: Value,
}

impl ApiResponse {
    /// Response with the given status and body
    #[must_use]
    pub fn new(url: impl Into<String>, status: u16, body: Value) -> Self {
        Self {
            url: url.into(),
            status,
            body,
        }
    }

    /// Status in the 2xx range
    #[must_use]
    pub const fn ok(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Body as JSON
    #[must_use]
    pub const fn json(&self) -> &Value {
        &self.body
    }

    /// Body deserialized into `T`
    pub fn json_as<T: serde::de::DeserializeOwned>(&self) -> EnsayoResult<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// HTTP capability used by API assertions
#[async_trait]
pub trait HttpClient: Send + Sync + std::fmt::Debug {
    /// Perform a request
    async fn request(&self, method: HttpMethod, url: &str) -> EnsayoResult<ApiResponse>;

    /// GET `url`
    async fn get(&self, url: &str) -> EnsayoResult<ApiResponse> {
        self.request(HttpMethod::Get, url).await
    }
}

struct StubRoute {
    method: HttpMethod,
    pattern: UrlPattern,
    status: u16,
    body: Value,
}

/// Canned responses for tests; unmatched requests get a 404
#[derive(Default)]
pub struct StubHttpClient {
    routes: Vec<StubRoute>,
    requests: Mutex<Vec<(HttpMethod, String)>>,
}

impl std::fmt::Debug for StubHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubHttpClient")
            .field("routes", &self.routes.len())
            .field("requests", &self.request_count())
            .finish()
    }
}

impl StubHttpClient {
    /// Client with no routes
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method` requests matching `pattern`; first match wins
    #[must_use]
    pub fn with_route(
        mut self,
        method: HttpMethod,
        pattern: impl Into<UrlPattern>,
        status: u16,
        body: Value,
    ) -> Self {
        self.routes.push(StubRoute {
            method,
            pattern: pattern.into(),
            status,
            body,
        });
        self
    }

    /// Requests received so far
    #[must_use]
    pub fn requests(&self) -> Vec<(HttpMethod, String)> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of requests received
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl HttpClient for StubHttpClient {
    async fn request(&self, method: HttpMethod, url: &str) -> EnsayoResult<ApiResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((method, url.to_string()));
        }
        let response = self
            .routes
            .iter()
            .find(|r| r.method == method && r.pattern.matches(url))
            .map_or_else(
                || ApiResponse::new(url, 404, Value::Null),
                |r| ApiResponse::new(url, r.status, r.body.clone()),
            );
        tracing::debug!(%method, url, status = response.status, "stub http response");
        Ok(response)
    }
}

/// [`HttpClient`] backed by reqwest
#[cfg(feature = "http")]
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl ReqwestClient {
    /// Client with reqwest defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a configured reqwest client
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl HttpClient for ReqwestClient {
    async fn request(&self, method: HttpMethod, url: &str) -> EnsayoResult<ApiResponse> {
        let http_error = |e: reqwest::Error| EnsayoError::Http {
            message: format!("{method} {url}: {e}"),
        };
        let verb = reqwest::Method::from_bytes(method.as_str().as_bytes()).map_err(|e| {
            EnsayoError::Http {
                message: e.to_string(),
            }
        })?;
        let response = self
            .client
            .request(verb, url)
            .send()
            .await
            .map_err(http_error)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(http_error)?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(ApiResponse::new(url, status, body))
    }
}
