//! Bearer tokens for the routing registry.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

const TOKEN_PATH: &str = "/oauth/token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Supplies bearer tokens.
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    /// Return a token, bypassing any cache when `force_refresh` is set.
    async fn fetch_token(&self, force_refresh: bool) -> Result<String>;
}

/// Used when registry authentication is disabled. Yields an empty token,
/// which the registry client sends without an `Authorization` header.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTokenFetcher;

#[async_trait]
impl TokenFetcher for NoopTokenFetcher {
    async fn fetch_token(&self, _force_refresh: bool) -> Result<String> {
        Ok(String::new())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Lifetime in seconds.
    #[serde(default)]
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Usable for at least `buffer` more. A buffer reaching past the end of
    /// time counts as stale.
    fn is_fresh(&self, now: DateTime<Utc>, buffer: TimeDelta) -> bool {
        now.checked_add_signed(buffer)
            .is_some_and(|deadline| deadline < self.expires_at)
    }
}

fn expiry_from(now: DateTime<Utc>, expires_in: i64) -> Result<DateTime<Utc>> {
    TimeDelta::try_seconds(expires_in)
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .with_context(|| format!("oauth token expires_in out of range: {expires_in}"))
}

/// OAuth2 client-credentials token fetcher with an in-memory cache.
pub struct OAuthTokenFetcher {
    client: reqwest::Client,
    token_url: String,
    client_name: String,
    client_secret: String,
    /// Tokens are refreshed this long before they expire.
    expiration_buffer: TimeDelta,
    cached: Mutex<Option<CachedToken>>,
}

impl OAuthTokenFetcher {
    pub fn new(
        token_endpoint: &str,
        client_name: impl Into<String>,
        client_secret: impl Into<String>,
        expiration_buffer: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("tcp-router/0.1.0")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        let expiration_buffer = TimeDelta::from_std(expiration_buffer)
            .context("token expiration buffer out of range")?;

        Ok(Self {
            client,
            token_url: format!("{}{}", token_endpoint.trim_end_matches('/'), TOKEN_PATH),
            client_name: client_name.into(),
            client_secret: client_secret.into(),
            expiration_buffer,
            cached: Mutex::new(None),
        })
    }

    async fn request_token(&self) -> Result<TokenResponse> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_name, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .context("Failed to request oauth token")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("oauth token request failed (status={}): {}", status, body);
        }

        response
            .json()
            .await
            .context("Failed to parse oauth token response")
    }
}

#[async_trait]
impl TokenFetcher for OAuthTokenFetcher {
    async fn fetch_token(&self, force_refresh: bool) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if !force_refresh {
            if let Some(token) = cached.as_ref() {
                if token.is_fresh(now, self.expiration_buffer) {
                    return Ok(token.access_token.clone());
                }
            }
        }

        debug!(force_refresh, "fetching oauth token");
        let response = self.request_token().await?;
        let token = CachedToken {
            expires_at: expiry_from(now, response.expires_in)?,
            access_token: response.access_token,
        };
        let access_token = token.access_token.clone();
        *cached = Some(token);

        Ok(access_token)
    }
}
