//! Azure AD Authentication module
//!
//! Implements the OAuth2 client credentials flow for app-only access to
//! Microsoft Graph. One token is cached per process and shared by every
//! in-flight tool call; refreshes are serialized so concurrent callers
//! never trigger more than one grant request at a time.

use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Tokens are treated as expired this long before their real expiry
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Token request failed ({status}): {body}")]
    TokenRequestFailed { status: u16, body: String },

    #[error("Token endpoint unreachable after {attempts} attempts: {source}")]
    Unreachable {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("Token parse error: {0}")]
    ParseError(String),

    #[error("Token rejected by Graph after refresh: {0}")]
    Rejected(String),
}

/// Token response from Azure AD
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[allow(dead_code)]
    #[serde(default)]
    token_type: String,
    expires_in: u64,
}

/// Bearer token with its absolute expiry
#[derive(Clone)]
pub struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// Valid when more than the safety margin remains
    pub fn is_valid(&self) -> bool {
        self.expires_at > Instant::now() + EXPIRY_MARGIN
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Azure AD authentication helper for client credentials flow
#[derive(Debug)]
pub struct AzureAdAuth {
    tenant_id: String,
    client_id: String,
    client_secret: String,
    authority_host: String,
    scope: String,
    http_client: Client,
    max_attempts: u32,
    retry_delay: Duration,
    token_cache: ArcSwapOption<AccessToken>,
    refresh_lock: Mutex<()>,
}

impl AzureAdAuth {
    /// Create a new Azure AD auth helper
    ///
    /// # Arguments
    /// * `tenant_id` - Directory (tenant) ID
    /// * `client_id` - Application (client) ID
    /// * `client_secret` - Client secret value
    /// * `authority_host` - Identity provider root, e.g. "https://login.microsoftonline.com"
    /// * `resource` - API the token is requested for, e.g. "https://graph.microsoft.com/v1.0"
    pub fn new(
        tenant_id: String,
        client_id: String,
        client_secret: String,
        authority_host: &str,
        resource: &str,
    ) -> Self {
        Self {
            tenant_id,
            client_id,
            client_secret,
            authority_host: authority_host.trim_end_matches('/').to_string(),
            scope: format!("{}/.default", Self::resource_from_endpoint(resource)),
            http_client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
            token_cache: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Override the transport retry policy for token requests
    pub fn with_retry(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Get the token endpoint URL for this tenant
    fn token_endpoint(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority_host, self.tenant_id
        )
    }

    /// Scope requested in the client credentials grant
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Return the last published token if still valid. Never blocks.
    fn cached(&self) -> Option<AccessToken> {
        self.token_cache
            .load()
            .as_deref()
            .filter(|t| t.is_valid())
            .cloned()
    }

    /// Acquire or return a cached access token
    pub async fn get_token(&self) -> Result<AccessToken, AuthError> {
        if let Some(token) = self.cached() {
            tracing::debug!("Using cached token");
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(token) = self.cached() {
            tracing::debug!("Token refreshed by concurrent caller");
            return Ok(token);
        }

        self.acquire_token().await
    }

    /// Replace a token the API rejected with 401
    ///
    /// If a concurrent caller already swapped the rejected token for a new
    /// one, that token is returned without another grant.
    pub async fn force_refresh(&self, rejected: &str) -> Result<AccessToken, AuthError> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(token) = self.cached() {
            if token.secret() != rejected {
                return Ok(token);
            }
        }

        tracing::info!("Graph rejected the cached token, refreshing");
        self.acquire_token().await
    }

    /// Acquire a new token from Azure AD. Callers hold `refresh_lock`.
    async fn acquire_token(&self) -> Result<AccessToken, AuthError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        tracing::info!("Acquiring new access token for scope: {}", self.scope);

        let mut attempt = 0;
        let mut delay = self.retry_delay;

        let response = loop {
            attempt += 1;
            match self
                .http_client
                .post(self.token_endpoint())
                .form(&params)
                .send()
                .await
            {
                Ok(response) => break response,
                Err(e) if attempt < self.max_attempts => {
                    tracing::warn!(
                        "Token endpoint unreachable, attempt {}/{}: {}",
                        attempt,
                        self.max_attempts,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(source) => {
                    return Err(AuthError::Unreachable {
                        attempts: attempt,
                        source,
                    })
                }
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            tracing::error!("Token request failed: {}", status);
            return Err(AuthError::TokenRequestFailed {
                status: status.as_u16(),
                body,
            });
        }

        let token_response: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::ParseError(format!("Failed to parse token response: {}", e))
        })?;

        let token = AccessToken::new(
            token_response.access_token,
            Instant::now() + Duration::from_secs(token_response.expires_in),
        );

        self.token_cache.store(Some(Arc::new(token.clone())));

        tracing::info!(
            "Token acquired successfully, expires in {} seconds",
            token_response.expires_in
        );

        Ok(token)
    }

    /// Seed the cache, bypassing Azure AD
    pub fn set_token(&self, token: AccessToken) {
        self.token_cache.store(Some(Arc::new(token)));
    }

    /// Clear the token cache
    pub fn clear_cache(&self) {
        self.token_cache.store(None);
    }

    /// Get resource URL from endpoint
    pub fn resource_from_endpoint(endpoint: &str) -> String {
        if let Ok(url) = Url::parse(endpoint) {
            match url.port() {
                Some(port) => format!(
                    "{}://{}:{}",
                    url.scheme(),
                    url.host_str().unwrap_or(""),
                    port
                ),
                None => format!("{}://{}", url.scheme(), url.host_str().unwrap_or("")),
            }
        } else {
            endpoint
                .split('/')
                .take(3)
                .collect::<Vec<_>>()
                .join("/")
        }
    }
}
