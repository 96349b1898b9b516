//! Login-based token provider
//!
//! Obtains a bearer token for one datacenter via HTTP form login, caches it
//! and logs in again shortly before it expires.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use stratum_core::{TokenError, TokenProvider};
use tracing::{debug, warn};

/// Log in again this long before the cached token expires
const TOKEN_REFRESH_BUFFER_SECS: u64 = 300;

/// Lifetime assumed when the login response carries no `tokenTtl`
const DEFAULT_TOKEN_TTL_SECS: u64 = 18000;

#[derive(Clone, Debug)]
struct TokenInfo {
    access_token: String,
    expires_at: Instant,
}

/// Token provider backed by a username/password login endpoint.
pub struct LoginTokenProvider {
    http_client: Client,
    login_endpoint: String,
    username: String,
    password: String,
    token: RwLock<Option<TokenInfo>>,
    // serializes logins so concurrent attempts share one round trip
    login_lock: tokio::sync::Mutex<()>,
}

impl LoginTokenProvider {
    /// `login_endpoint` is the full login URL, e.g.
    /// `http://auth.dc1.internal:8080/v1/auth/login`.
    pub fn new(
        login_endpoint: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self::with_client(http_client, login_endpoint, username, password))
    }

    pub fn with_client(http_client: Client, login_endpoint: &str, username: &str, password: &str) -> Self {
        Self {
            http_client,
            login_endpoint: login_endpoint.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            token: RwLock::new(None),
            login_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Drop the cached token so the next request logs in again.
    pub fn invalidate(&self) {
        *self.token.write() = None;
    }

    fn cached(&self) -> Option<String> {
        let guard = self.token.read();
        guard.as_ref().and_then(|info| {
            let refresh_at = Instant::now() + Duration::from_secs(TOKEN_REFRESH_BUFFER_SECS);
            (info.expires_at > refresh_at).then(|| info.access_token.clone())
        })
    }

    async fn login(&self) -> Result<TokenInfo, TokenError> {
        debug!(endpoint = %self.login_endpoint, "Logging in for datacenter token");

        let response = self
            .http_client
            .post(&self.login_endpoint)
            .form(&[("username", &self.username), ("password", &self.password)])
            .send()
            .await
            .map_err(|e| TokenError::Unavailable(format!("login request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("login failed with status {}: {}", status, body);
            warn!(endpoint = %self.login_endpoint, status = status.as_u16(), "Login rejected");
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TokenError::Rejected(message),
                _ => TokenError::Unavailable(message),
            });
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TokenError::Unavailable(format!("invalid login response: {}", e)))?;
        parse_login_response(&result)
    }
}

/// Read `accessToken` and `tokenTtl`, either at the top level or under `data`.
fn parse_login_response(result: &serde_json::Value) -> Result<TokenInfo, TokenError> {
    let field = |name: &str| {
        result
            .get("data")
            .and_then(|d| d.get(name))
            .or_else(|| result.get(name))
    };

    let access_token = field("accessToken")
        .and_then(|v| v.as_str())
        .ok_or_else(|| TokenError::Unavailable(format!("no accessToken in login response: {}", result)))?;

    let ttl = field("tokenTtl")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_TOKEN_TTL_SECS);

    Ok(TokenInfo {
        access_token: access_token.to_string(),
        expires_at: Instant::now() + Duration::from_secs(ttl),
    })
}

#[async_trait]
impl TokenProvider for LoginTokenProvider {
    async fn token(&self) -> Result<String, TokenError> {
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let _guard = self.login_lock.lock().await;
        // another caller may have logged in while we waited
        if let Some(token) = self.cached() {
            return Ok(token);
        }

        let info = self.login().await?;
        let token = info.access_token.clone();
        debug!(
            endpoint = %self.login_endpoint,
            expires_in_secs = info.expires_at.saturating_duration_since(Instant::now()).as_secs(),
            "Login successful"
        );
        *self.token.write() = Some(info);
        Ok(token)
    }
}
