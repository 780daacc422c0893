//! Graph Client module
//!
//! Authenticated HTTP client for Microsoft Graph. Handles bearer token
//! attachment, one-shot re-authentication on 401, and retry with backoff
//! for throttling, server errors and transport failures.

use crate::auth::{AuthError, AzureAdAuth};
use crate::config::RuntimeConfig;
use crate::graph::error::GraphError;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy for throttled, failing or unreachable requests
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry
    pub base_delay: Duration,
    /// Upper bound for both backoff delays and `Retry-After` hints
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).min(self.max_delay)
    }

    /// Wait requested by a `Retry-After` header, falling back to `backoff`
    fn wait_for(&self, headers: &HeaderMap, backoff: Duration) -> Duration {
        retry_after(headers)
            .map(|hint| hint.min(self.max_delay))
            .unwrap_or(backoff)
    }
}

/// Parse a delta-seconds `Retry-After` header
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// A single Graph call
#[derive(Debug, Clone)]
pub struct GraphRequest {
    pub method: Method,
    /// Path relative to the Graph base URL, or an absolute URL (nextLink)
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl GraphRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    /// Set a query parameter, replacing any previous value for `key`
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Absolute URL for this request, without the query string
    pub fn url(&self, base_url: &str) -> String {
        if self.path.starts_with("https://") || self.path.starts_with("http://") {
            self.path.clone()
        } else {
            format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                self.path.trim_start_matches('/')
            )
        }
    }
}

/// Body of a Graph response
#[derive(Debug, Clone, PartialEq)]
pub enum GraphBody {
    Json(Value),
    /// Body that did not parse as JSON, kept verbatim
    Text(String),
}

/// Successful Graph response
#[derive(Debug)]
pub struct GraphResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: GraphBody,
}

impl GraphResponse {
    async fn read(response: Response, attempts: u32) -> Result<Self, GraphError> {
        let status = response.status();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|source| GraphError::Network { attempts, source })?;

        let body = if text.trim().is_empty() {
            GraphBody::Json(Value::Null)
        } else {
            match serde_json::from_str(&text) {
                Ok(value) => GraphBody::Json(value),
                Err(_) => GraphBody::Text(text),
            }
        };

        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// JSON body, or a decode error if the service answered with plain text
    pub fn json(self) -> Result<Value, GraphError> {
        match self.body {
            GraphBody::Json(value) => Ok(value),
            GraphBody::Text(text) => Err(GraphError::Decode(format!(
                "Expected JSON from Graph, got: {}",
                text
            ))),
        }
    }
}

/// Client for Microsoft Graph
#[derive(Debug)]
pub struct GraphClient {
    auth: Arc<AzureAdAuth>,
    base_url: String,
    http_client: Client,
    retry: RetryPolicy,
}

impl GraphClient {
    /// Create a new Graph client
    ///
    /// # Arguments
    /// * `auth` - Azure AD auth helper shared by all requests
    /// * `base_url` - Graph root, e.g. "https://graph.microsoft.com/v1.0"
    /// * `retry` - Retry policy for throttling and transient failures
    /// * `request_timeout` - Overall per-attempt timeout
    pub fn new(
        auth: Arc<AzureAdAuth>,
        base_url: &str,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Self {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();

        Self {
            auth,
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            retry,
        }
    }

    /// Build auth and client from runtime configuration
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let retry = RetryPolicy {
            max_attempts: config.max_retries,
            base_delay: Duration::from_millis(config.retry_delay_ms),
            max_delay: Duration::from_millis(config.max_retry_delay_ms),
        };

        let auth = AzureAdAuth::new(
            config.tenant_id.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
            &config.authority_host,
            &config.graph_base_url,
        )
        .with_retry(retry.max_attempts, retry.base_delay);

        Self::new(
            Arc::new(auth),
            &config.graph_base_url,
            retry,
            config.request_timeout,
        )
    }

    /// Get Graph base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &Arc<AzureAdAuth> {
        &self.auth
    }

    /// Execute a request with authentication and retry
    ///
    /// Only the final outcome is visible to the caller: either the
    /// successful response or a classified `GraphError`.
    pub async fn request(&self, request: &GraphRequest) -> Result<GraphResponse, GraphError> {
        let url = self.resolve_url(request)?;
        let mut token = self.auth.get_token().await?;
        let mut reauthenticated = false;
        let mut attempt = 0;
        let mut delay = self.retry.base_delay;

        loop {
            attempt += 1;
            tracing::debug!("{} {} (attempt {})", request.method, url, attempt);

            let response = match self.build_request(request, &url, token.secret()).send().await {
                Ok(response) => response,
                Err(e) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(GraphError::Network {
                            attempts: attempt,
                            source: e,
                        });
                    }

                    tracing::warn!(
                        "Request failed ({}), attempt {}/{}, retrying...",
                        e,
                        attempt,
                        self.retry.max_attempts
                    );

                    sleep(delay).await;
                    delay = self.retry.next_delay(delay);
                    continue;
                }
            };

            match response.status() {
                status if status.is_success() => {
                    return GraphResponse::read(response, attempt).await;
                }
                StatusCode::UNAUTHORIZED => {
                    let body = response.text().await.unwrap_or_default();
                    if reauthenticated {
                        return Err(AuthError::Rejected(body).into());
                    }

                    reauthenticated = true;
                    token = self.auth.force_refresh(token.secret()).await?;
                    // The re-authenticated retry does not spend the transient budget
                    attempt -= 1;
                }
                status @ (StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE) => {
                    let wait = self.retry.wait_for(response.headers(), delay);
                    let body = response.text().await.unwrap_or_default();

                    if attempt >= self.retry.max_attempts {
                        return Err(GraphError::TransientService {
                            status: status.as_u16(),
                            attempts: attempt,
                            body,
                        });
                    }

                    tracing::warn!(
                        "Throttled ({}), attempt {}/{}, retrying after {:?}",
                        status,
                        attempt,
                        self.retry.max_attempts,
                        wait
                    );

                    sleep(wait).await;
                    delay = self.retry.next_delay(delay);
                }
                status if status.is_server_error() => {
                    let body = response.text().await.unwrap_or_default();

                    if attempt >= self.retry.max_attempts {
                        return Err(GraphError::Service {
                            status: status.as_u16(),
                            attempts: attempt,
                            body,
                        });
                    }

                    tracing::warn!(
                        "Server error ({}), attempt {}/{}, retrying...",
                        status,
                        attempt,
                        self.retry.max_attempts
                    );

                    sleep(delay).await;
                    delay = self.retry.next_delay(delay);
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(GraphError::Request {
                        status: status.as_u16(),
                        body,
                    });
                }
            }
        }
    }

    /// Resolve the request URL, refusing absolute URLs outside the Graph origin
    ///
    /// nextLink and status URLs come from response bodies; the bearer token
    /// is only ever sent to the host it was issued for.
    fn resolve_url(&self, request: &GraphRequest) -> Result<String, GraphError> {
        let url = request.url(&self.base_url);
        if !same_origin(&url, &self.base_url) {
            tracing::warn!("Refusing to follow {} outside {}", url, self.base_url);
            return Err(GraphError::validation(format!(
                "refusing to send credentials to '{}': not on {}",
                url, self.base_url
            )));
        }
        Ok(url)
    }

    fn build_request(
        &self,
        request: &GraphRequest,
        url: &str,
        token: &str,
    ) -> reqwest::RequestBuilder {
        let mut builder = self
            .http_client
            .request(request.method.clone(), url)
            .bearer_auth(token)
            .header("Accept", "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        builder
    }

    /// GET a path and return its JSON body
    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, GraphError> {
        let mut request = GraphRequest::get(path);
        for (key, value) in query {
            request = request.with_query(*key, *value);
        }
        self.request(&request).await?.json()
    }

    /// POST a JSON body and return the JSON response
    pub async fn post(&self, path: &str, body: Value) -> Result<Value, GraphError> {
        self.request(&GraphRequest::post(path, body)).await?.json()
    }
}

/// Scheme, host and port all match
fn same_origin(url: &str, base_url: &str) -> bool {
    match (Url::parse(url), Url::parse(base_url)) {
        (Ok(url), Ok(base)) => url.origin() == base.origin(),
        _ => false,
    }
}
