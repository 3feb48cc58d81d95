use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::config::CalendarConfig;
use cadence_core::errors::GatewayError;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Access credential as persisted in the token file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl IssuedToken {
    fn is_fresh(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at - skew > now,
            None => true,
        }
    }
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchanges a refresh token for a new access token. `stored` is the
    /// refresh token from the token file, if any.
    async fn refresh(&self, stored: Option<&str>) -> Result<IssuedToken, GatewayError>;
}

/// OAuth2 `refresh_token` grant against a token endpoint. The stored refresh
/// token is tried first; if the endpoint rejects it, the configured one is used.
pub struct OAuthRefresher {
    client: Client,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<SecretString>,
    refresh_token: Option<SecretString>,
}

impl OAuthRefresher {
    pub fn new(
        client: Client,
        token_url: impl Into<String>,
        client_id: Option<String>,
        client_secret: Option<SecretString>,
        refresh_token: Option<SecretString>,
    ) -> Self {
        Self { client, token_url: token_url.into(), client_id, client_secret, refresh_token }
    }

    pub fn from_config(client: Client, config: &CalendarConfig) -> Self {
        Self::new(
            client,
            config.token_url.clone(),
            config.client_id.clone(),
            config.client_secret.clone(),
            config.refresh_token.clone(),
        )
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, stored: Option<&str>) -> Result<IssuedToken, GatewayError> {
        let stored = stored.filter(|token| !token.trim().is_empty());
        let configured = self
            .refresh_token
            .as_ref()
            .map(|token| token.expose_secret())
            .filter(|token| !token.trim().is_empty());

        match (stored, configured) {
            (None, None) => Err(GatewayError::AuthExpired(
                "no refresh token available and interactive consent is not possible".to_string(),
            )),
            (Some(stored), Some(configured)) if stored != configured => {
                match self.exchange(stored).await {
                    Err(GatewayError::AuthExpired(reason)) => {
                        warn!(
                            event_name = "calendar.auth.stored_refresh_rejected",
                            reason = %reason,
                            "stored refresh token rejected, retrying with the configured one"
                        );
                        self.exchange(configured).await
                    }
                    other => other,
                }
            }
            (Some(token), _) | (None, Some(token)) => self.exchange(token).await,
        }
    }
}

impl OAuthRefresher {
    async fn exchange(&self, refresh_token: &str) -> Result<IssuedToken, GatewayError> {
        let mut form = vec![("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
        if let Some(client_id) = self.client_id.as_deref() {
            form.push(("client_id", client_id));
        }
        if let Some(client_secret) = self.client_secret.as_ref() {
            form.push(("client_secret", client_secret.expose_secret()));
        }

        let response =
            self.client.post(&self.token_url).form(&form).send().await.map_err(|error| {
                warn!(
                    event_name = "calendar.auth.refresh_transport_failed",
                    error = %error,
                    "token refresh request failed"
                );
                GatewayError::BackendUnavailable(format!("token endpoint unreachable: {error}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_refresh_failure(status, &body));
        }

        let token: TokenResponse = response.json().await.map_err(|error| {
            GatewayError::BackendUnavailable(format!("failed to decode token response: {error}"))
        })?;
        if token.access_token.is_empty() {
            return Err(GatewayError::AuthExpired(
                "token endpoint returned an empty access token".to_string(),
            ));
        }

        Ok(IssuedToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token.or_else(|| Some(refresh_token.to_string())),
            expires_at: token
                .expires_in
                .and_then(|seconds| Utc::now().checked_add_signed(chrono::Duration::seconds(seconds))),
        })
    }
}

fn classify_refresh_failure(status: StatusCode, body: &str) -> GatewayError {
    let detail = serde_json::from_str::<TokenErrorResponse>(body)
        .map(|error| match error.error_description {
            Some(description) => format!("{}: {description}", error.error),
            None => error.error,
        })
        .unwrap_or_else(|_| format!("token endpoint returned {status}"));

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        GatewayError::BackendUnavailable(detail)
    } else {
        GatewayError::AuthExpired(detail)
    }
}

/// Process-wide credential state. Refresh happens while the lock is held, so
/// concurrent callers that find the token stale wait for one refresh instead of
/// each starting their own.
pub struct CredentialStore {
    current: Mutex<Option<IssuedToken>>,
    refresher: Arc<dyn TokenRefresher>,
    token_path: Option<PathBuf>,
    skew: chrono::Duration,
    refreshes: AtomicUsize,
}

impl CredentialStore {
    pub fn new(refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            current: Mutex::new(None),
            refresher,
            token_path: None,
            skew: chrono::Duration::seconds(60),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub fn with_token(self, token: IssuedToken) -> Self {
        Self { current: Mutex::new(Some(token)), ..self }
    }

    pub fn with_expiry_skew(self, skew: Duration) -> Self {
        let skew = chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::zero());
        Self { skew, ..self }
    }

    /// Loads the persisted token, if any, and writes refreshed tokens back to `path`.
    pub async fn persisted(refresher: Arc<dyn TokenRefresher>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stored = read_token_file(&path).await;
        Self { current: Mutex::new(stored), token_path: Some(path), ..Self::new(refresher) }
    }

    pub async fn access_token(&self) -> Result<String, GatewayError> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref() {
            if token.is_fresh(Utc::now(), self.skew) {
                return Ok(token.access_token.clone());
            }
        }

        let stored_refresh = current.as_ref().and_then(|token| token.refresh_token.clone());
        debug!(event_name = "calendar.auth.refresh_started", "refreshing calendar access token");
        let mut issued = self.refresher.refresh(stored_refresh.as_deref()).await.map_err(|error| {
            warn!(
                event_name = "calendar.auth.refresh_failed",
                error_code = error.code(),
                error = %error,
                "calendar token refresh failed"
            );
            error
        })?;
        if issued.refresh_token.is_none() {
            issued.refresh_token = stored_refresh;
        }
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        info!(event_name = "calendar.auth.refreshed", "calendar access token refreshed");

        if let Some(path) = &self.token_path {
            write_token_file(path, &issued).await;
        }
        let access_token = issued.access_token.clone();
        *current = Some(issued);
        Ok(access_token)
    }

    /// Marks `rejected` as unusable. A token that was already replaced by a
    /// concurrent refresh is left alone.
    pub async fn invalidate(&self, rejected: &str) {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_mut() {
            if token.access_token == rejected {
                token.access_token.clear();
            }
        }
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub async fn has_usable_token(&self) -> bool {
        let current = self.current.lock().await;
        current.as_ref().is_some_and(|token| token.is_fresh(Utc::now(), self.skew))
    }
}

async fn read_token_file(path: &Path) -> Option<IssuedToken> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
        Err(error) => {
            warn!(
                event_name = "calendar.auth.token_file_unreadable",
                path = %path.display(),
                error = %error,
                "ignoring unreadable token file"
            );
            return None;
        }
    };

    match serde_json::from_slice::<IssuedToken>(&raw) {
        Ok(token) => Some(token),
        Err(error) => {
            warn!(
                event_name = "calendar.auth.token_file_invalid",
                path = %path.display(),
                error = %error,
                "ignoring malformed token file"
            );
            None
        }
    }
}

async fn write_token_file(path: &Path, token: &IssuedToken) {
    let encoded = match serde_json::to_vec_pretty(token) {
        Ok(encoded) => encoded,
        Err(error) => {
            warn!(event_name = "calendar.auth.token_encode_failed", error = %error);
            return;
        }
    };
    if let Err(error) = tokio::fs::write(path, encoded).await {
        warn!(
            event_name = "calendar.auth.token_write_failed",
            path = %path.display(),
            error = %error,
            "refreshed token could not be persisted"
        );
    }
}
