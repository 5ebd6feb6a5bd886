//! Realtime Database REST API client.
//!
//! Production-grade client with:
//! - Token caching with single-flight refresh
//! - HTTP client tuning (pooling, timeouts)
//! - Observability (tracing spans, metrics)

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info_span, Instrument};

use crate::credentials::ServiceAccountCredentials;
use crate::error::{FirekvError, FirekvResult};
use crate::metrics::record_request;
use crate::query::QueryOptions;
use crate::token::{TokenCache, TokenStore};

// =============================================================================
// Configuration
// =============================================================================

/// Domain appended to bare database identifiers.
const DEFAULT_DATABASE_DOMAIN: &str = "firebaseio.com";

/// Realtime Database client configuration.
#[derive(Debug, Clone)]
pub struct RtdbConfig {
    /// Database identifier or full database URL.
    ///
    /// A bare identifier is suffixed with `.firebaseio.com`; a full URL keeps
    /// its host (and an explicit `http://` scheme, for emulator use) with any
    /// trailing slash stripped.
    pub database: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
}

impl RtdbConfig {
    /// Create a config with default timeouts.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> FirekvResult<Self> {
        let database = std::env::var("FIREKV_DATABASE")
            .or_else(|_| std::env::var("FIREBASE_DATABASE_URL"))
            .map_err(|_| {
                FirekvError::request_failed(
                    "FIREKV_DATABASE or FIREBASE_DATABASE_URL must be set to reach the database",
                )
            })?;

        if database.is_empty() {
            return Err(FirekvError::request_failed(
                "FIREKV_DATABASE or FIREBASE_DATABASE_URL cannot be empty",
            ));
        }

        let timeout_secs: u64 = std::env::var("FIREKV_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        let connect_timeout_secs: u64 = std::env::var("FIREKV_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            database,
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
        })
    }
}

/// Normalize the configured database to an origin like
/// `https://demo.firebaseio.com`.
fn database_origin(database: &str) -> String {
    let (scheme, rest) = match database.split_once("://") {
        // Explicit http is honored so local emulators are reachable.
        Some(("http", rest)) => ("http", rest),
        Some((_, rest)) => ("https", rest),
        None => ("https", database),
    };

    let host = rest.trim_end_matches('/');
    if host.contains('.') || host.contains(':') {
        format!("{}://{}", scheme, host)
    } else {
        format!("{}://{}.{}", scheme, host, DEFAULT_DATABASE_DOMAIN)
    }
}

/// Compose the JSON-REST resource URL for a path plus pre-encoded query pairs.
fn compose_url(origin: &str, path: &str, pairs: &[(&str, String)]) -> String {
    let path = path.trim_matches('/');
    let mut url = format!("{}/{}.json", origin, path);

    if !pairs.is_empty() {
        let query: Vec<String> = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        url.push('?');
        url.push_str(&query.join("&"));
    }

    url
}

// =============================================================================
// Client
// =============================================================================

/// Realtime Database REST API client.
pub struct RtdbClient {
    http: Client,
    origin: String,
    tokens: Arc<TokenCache>,
}

impl Clone for RtdbClient {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            origin: self.origin.clone(),
            tokens: Arc::clone(&self.tokens),
        }
    }
}

#[derive(serde::Deserialize)]
struct PushedName {
    name: String,
}

impl RtdbClient {
    /// Create a new client.
    pub fn new(
        config: RtdbConfig,
        credentials: ServiceAccountCredentials,
    ) -> FirekvResult<Self> {
        Self::build(config, credentials, None)
    }

    /// Create a new client with an external token store, so several client
    /// instances (or restarts) can share one access token.
    pub fn with_token_store(
        config: RtdbConfig,
        credentials: ServiceAccountCredentials,
        store: Arc<dyn TokenStore>,
    ) -> FirekvResult<Self> {
        Self::build(config, credentials, Some(store))
    }

    /// Create from environment variables.
    pub fn from_env() -> FirekvResult<Self> {
        let config = RtdbConfig::from_env()?;
        let credentials = ServiceAccountCredentials::from_env()?;
        Self::new(config, credentials)
    }

    fn build(
        config: RtdbConfig,
        credentials: ServiceAccountCredentials,
        store: Option<Arc<dyn TokenStore>>,
    ) -> FirekvResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("firekv/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirekvError::Network)?;

        let origin = database_origin(&config.database);
        let tokens = Arc::new(TokenCache::new(http.clone(), credentials, store)?);

        Ok(Self {
            http,
            origin,
            tokens,
        })
    }

    /// Resource URL for a path with optional structured query options.
    pub(crate) fn build_url(
        &self,
        path: &str,
        options: Option<&QueryOptions>,
    ) -> FirekvResult<String> {
        let pairs = match options {
            Some(options) => options.to_pairs()?,
            None => Vec::new(),
        };
        Ok(compose_url(&self.origin, path, &pairs))
    }

    fn is_token_rejected(body: &str) -> bool {
        body.contains("expired") || body.contains("Invalid credential")
    }

    // =========================================================================
    // CRUD Operations
    // =========================================================================

    /// Read the value at a path.
    ///
    /// Returns `None` when the store reports no data (a JSON `null` body).
    /// Note that for `T = serde_json::Value` an absent node deserializes as
    /// `Some(Value::Null)` instead.
    pub async fn get<T>(&self, path: &str) -> FirekvResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let url = self.build_url(path, None)?;

        self.execute_request("get", path, async {
            let response = self.send(Method::GET, &url, None, &[]).await?;
            match response.status() {
                StatusCode::OK => Ok(response.json::<Option<T>>().await?),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Overwrite the entire subtree at a path.
    pub async fn set<T>(&self, path: &str, value: &T) -> FirekvResult<()>
    where
        T: Serialize,
    {
        let body = serde_json::to_value(value)?;
        let url = self.build_url(path, None)?;

        self.execute_request("set", path, async {
            let response = self.send(Method::PUT, &url, Some(&body), &[]).await?;
            match response.status() {
                StatusCode::OK => Ok(()),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Merge the provided top-level fields into the subtree at a path.
    pub async fn update<T>(&self, path: &str, value: &T) -> FirekvResult<()>
    where
        T: Serialize,
    {
        let body = serde_json::to_value(value)?;
        let url = self.build_url(path, None)?;

        self.execute_request("update", path, async {
            let response = self.send(Method::PATCH, &url, Some(&body), &[]).await?;
            match response.status() {
                StatusCode::OK => Ok(()),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Remove the subtree at a path.
    pub async fn delete(&self, path: &str) -> FirekvResult<()> {
        let url = self.build_url(path, None)?;

        self.execute_request("delete", path, async {
            let response = self.send(Method::DELETE, &url, None, &[]).await?;
            match response.status() {
                StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Append a value under a store-generated push key.
    ///
    /// Push keys are lexicographically monotonic with time, which is what
    /// makes key-ordered pagination over appended data chronological.
    pub async fn push<T>(&self, path: &str, value: &T) -> FirekvResult<String>
    where
        T: Serialize,
    {
        let body = serde_json::to_value(value)?;
        let url = self.build_url(path, None)?;

        self.execute_request("push", path, async {
            let response = self.send(Method::POST, &url, Some(&body), &[]).await?;
            match response.status() {
                StatusCode::OK => {
                    let pushed: PushedName = response.json().await?;
                    debug!("Appended {} under {}", pushed.name, path);
                    Ok(pushed.name)
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// List the immediate child keys of a path via a shallow query.
    ///
    /// Keys are sorted lexicographically ascending, or descending when
    /// `reverse` is set.
    pub async fn shallow_keys(&self, path: &str, reverse: bool) -> FirekvResult<Vec<String>> {
        let url = compose_url(&self.origin, path, &[("shallow", "true".to_string())]);

        self.execute_request("shallow_keys", path, async {
            let response = self.send(Method::GET, &url, None, &[]).await?;
            match response.status() {
                StatusCode::OK => {
                    let value: Value = response.json().await?;
                    let mut keys: Vec<String> = match value {
                        Value::Object(map) => map.into_iter().map(|(k, _)| k).collect(),
                        _ => Vec::new(),
                    };
                    keys.sort();
                    if reverse {
                        keys.reverse();
                    }
                    Ok(keys)
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Number of immediate children of a path.
    pub async fn count(&self, path: &str) -> FirekvResult<usize> {
        Ok(self.shallow_keys(path, false).await?.len())
    }

    /// Run a structured range query.
    ///
    /// Returns the key→value mapping in ascending key order; an absent or
    /// non-object result is an empty map.
    pub async fn query<T>(
        &self,
        path: &str,
        options: &QueryOptions,
    ) -> FirekvResult<BTreeMap<String, T>>
    where
        T: DeserializeOwned,
    {
        let url = self.build_url(path, Some(options))?;

        self.execute_request("query", path, async {
            let response = self.send(Method::GET, &url, None, &[]).await?;
            match response.status() {
                StatusCode::OK => {
                    let value: Value = response.json().await?;
                    let mut entries = BTreeMap::new();
                    if let Value::Object(map) = value {
                        for (key, value) in map {
                            entries.insert(key, serde_json::from_value(value)?);
                        }
                    }
                    Ok(entries)
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    // =========================================================================
    // Conditional Writes (native concurrency primitive)
    // =========================================================================

    /// Read a value together with its ETag for a later conditional write.
    pub async fn get_with_etag<T>(&self, path: &str) -> FirekvResult<(Option<T>, String)>
    where
        T: DeserializeOwned,
    {
        let url = self.build_url(path, None)?;

        self.execute_request("get_with_etag", path, async {
            let response = self
                .send(
                    Method::GET,
                    &url,
                    None,
                    &[("X-Firebase-ETag", "true".to_string())],
                )
                .await?;
            match response.status() {
                StatusCode::OK => {
                    let etag = response
                        .headers()
                        .get("ETag")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    if etag.is_empty() {
                        return Err(FirekvError::request_failed(format!(
                            "{} returned no ETag header",
                            url
                        )));
                    }
                    Ok((response.json::<Option<T>>().await?, etag))
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Overwrite a path only if its ETag still matches.
    ///
    /// A concurrent write in between surfaces as
    /// [`FirekvError::PreconditionFailed`]; rerunning the read-modify-write is
    /// the caller's decision.
    pub async fn set_if_match<T>(&self, path: &str, value: &T, etag: &str) -> FirekvResult<()>
    where
        T: Serialize,
    {
        let body = serde_json::to_value(value)?;
        let url = self.build_url(path, None)?;

        self.execute_request("set_if_match", path, async {
            let response = self
                .send(
                    Method::PUT,
                    &url,
                    Some(&body),
                    &[("if-match", etag.to_string())],
                )
                .await?;
            match response.status() {
                StatusCode::OK => Ok(()),
                StatusCode::PRECONDITION_FAILED => {
                    let text = response.text().await.unwrap_or_default();
                    Err(FirekvError::PreconditionFailed(format!(
                        "{} write conflicted: {}",
                        url, text
                    )))
                }
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    /// Send one authenticated request.
    ///
    /// A 401 whose body indicates a rejected token invalidates the cache and
    /// re-sends once with a fresh token. This is token recovery, not a retry
    /// policy; every other failure surfaces immediately.
    pub(crate) async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: &[(&'static str, String)],
    ) -> FirekvResult<Response> {
        let mut token = self.tokens.get_token().await?;
        let mut response = self
            .request(method.clone(), url, body, headers, &token)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let text = response.text().await.unwrap_or_default();
            if Self::is_token_rejected(&text) {
                self.tokens.invalidate().await;
                token = self.tokens.get_token().await?;
                response = self
                    .request(method, url, body, headers, &token)
                    .send()
                    .await?;
            } else {
                return Err(FirekvError::from_http_status(
                    401,
                    format!("{} failed: {}", url, text),
                ));
            }
        }

        Ok(response)
    }

    fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: &[(&'static str, String)],
        token: &str,
    ) -> reqwest::RequestBuilder {
        let mut request = self.http.request(method, url).bearer_auth(token);
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request
    }

    /// Execute a request with tracing and metrics.
    pub(crate) async fn execute_request<T, F>(
        &self,
        operation: &str,
        path: &str,
        fut: F,
    ) -> FirekvResult<T>
    where
        F: std::future::Future<Output = FirekvResult<T>>,
    {
        let span = info_span!("rtdb_request", operation = %operation, path = %path);

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }

    async fn handle_error_response(
        status: StatusCode,
        url: &str,
        response: Response,
    ) -> FirekvError {
        let body = response.text().await.unwrap_or_default();
        FirekvError::from_http_status(
            status.as_u16(),
            format!("{} failed: {} {}", url, status, body),
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
