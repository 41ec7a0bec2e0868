//! Single-flight management of the Kiro access token.
//!
//! Every request asks `CredentialManager::get_valid_token` for a token. While
//! the cached token is outside the refresh margin this is a read-lock and a
//! clone. Once it is inside the margin, the first caller spawns one refresh
//! task and parks a shared handle to it in the in-flight slot; everybody else
//! who arrives before it finishes awaits that same handle. The refresh runs on
//! its own task so a caller that goes away (client disconnect) cannot cancel it
//! for the others.

use super::{AccessToken, KiroCredentials};
use crate::config::CredentialsConfig;
use crate::error::{ProxyError, Result};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

type RefreshOutcome = std::result::Result<AccessToken, String>;
type InFlightRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Owns the process-wide Kiro credential.
///
/// Cloning is cheap; all clones share the same credential and in-flight slot.
#[derive(Clone)]
pub struct CredentialManager {
    inner: Arc<Inner>,
}

struct Inner {
    credentials: RwLock<KiroCredentials>,
    /// Lock order: `in_flight` before `credentials`.
    in_flight: Mutex<Option<InFlightRefresh>>,
    source_path: Option<PathBuf>,
    config: CredentialsConfig,
    http_client: reqwest::Client,
}

/// Body returned by both refresh endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    profile_arn: Option<String>,
}

impl CredentialManager {
    /// Loads the credential file and builds a manager around it.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::InvalidCredentials` if the file is missing or is not
    /// a Kiro token cache.
    pub fn new(config: &CredentialsConfig, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let credentials = Self::load_credentials(path)?;

        debug!(
            "Loaded Kiro credentials from {} (expires in {}s)",
            path.display(),
            credentials.expires_in_seconds()
        );

        Self::with_credentials(config, credentials, Some(path.to_path_buf()))
    }

    /// Builds a manager around credentials that are already in memory.
    /// Without a `source_path` refreshed tokens are not persisted.
    pub fn with_credentials(
        config: &CredentialsConfig,
        credentials: KiroCredentials,
        source_path: Option<PathBuf>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProxyError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                credentials: RwLock::new(credentials),
                in_flight: Mutex::new(None),
                source_path,
                config: config.clone(),
                http_client,
            }),
        })
    }

    fn load_credentials(path: &Path) -> Result<KiroCredentials> {
        if !path.exists() {
            return Err(ProxyError::InvalidCredentials(format!(
                "Credentials file not found: {}",
                path.display()
            )));
        }

        Self::check_permissions(path);

        let contents = fs::read_to_string(path).map_err(|e| {
            ProxyError::InvalidCredentials(format!("Failed to read credentials: {}", e))
        })?;

        let credentials: KiroCredentials = serde_json::from_str(&contents).map_err(|e| {
            ProxyError::InvalidCredentials(format!("Invalid credentials JSON format: {}", e))
        })?;

        if credentials.access_token.is_empty() && credentials.refresh_token.is_empty() {
            return Err(ProxyError::InvalidCredentials(format!(
                "{} contains neither accessToken nor refreshToken",
                path.display()
            )));
        }

        Ok(credentials)
    }

    /// The IDE writes its cache with default permissions, so a loose mode is
    /// reported but not fatal.
    fn check_permissions(path: &Path) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            if let Ok(metadata) = fs::metadata(path) {
                let mode = metadata.permissions().mode() & 0o777;
                if mode & 0o077 != 0 {
                    warn!(
                        "Credentials file {} is accessible by other users ({:o}); consider chmod 600",
                        path.display(),
                        mode
                    );
                }
            }
        }
    }

    /// Returns a token valid for at least the configured margin, refreshing
    /// first if needed.
    ///
    /// Concurrent callers that find the token stale share one refresh. If that
    /// refresh fails they all receive `ProxyError::Refresh`; the old credential
    /// stays in place and the next call tries again.
    pub async fn get_valid_token(&self) -> Result<AccessToken> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        if !self.inner.config.auto_refresh {
            return Err(ProxyError::Refresh(
                "access token expired and auto_refresh is disabled".to_string(),
            ));
        }

        let refresh = {
            let mut slot = self.inner.in_flight.lock();

            // A refresh may have completed between the fast path and taking the slot.
            if let Some(token) = self.cached_token() {
                return Ok(token);
            }

            match slot.as_ref() {
                Some(existing) => {
                    debug!("Joining in-flight credential refresh");
                    existing.clone()
                }
                None => {
                    warn!("Kiro access token is inside the refresh margin; refreshing");
                    let refresh = self.spawn_refresh();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };

        refresh.await.map_err(ProxyError::Refresh)
    }

    fn cached_token(&self) -> Option<AccessToken> {
        let creds = self.inner.credentials.read();
        if creds.is_expired(self.inner.config.refresh_margin_seconds) {
            return None;
        }
        crate::metrics::update_credential_expiry(creds.expires_in_seconds());
        Some(creds.access_token())
    }

    fn spawn_refresh(&self) -> InFlightRefresh {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run_refresh().await });

        let inner = Arc::clone(&self.inner);
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // The task never reached its own cleanup.
                    inner.in_flight.lock().take();
                    Err(format!("refresh task failed: {}", e))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Seconds until expiry and whether the token is inside the refresh margin.
    pub fn token_info(&self) -> (i64, bool) {
        let creds = self.inner.credentials.read();
        (
            creds.expires_in_seconds(),
            creds.is_expired(self.inner.config.refresh_margin_seconds),
        )
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.inner.source_path.as_deref()
    }
}

impl Inner {
    async fn run_refresh(&self) -> RefreshOutcome {
        let snapshot = self.credentials.read().clone();
        let exchanged = self.exchange(&snapshot).await;

        let outcome = {
            let mut slot = self.in_flight.lock();
            let outcome = match exchanged {
                Ok(response) => {
                    let mut creds = self.credentials.write();
                    apply_refresh(&mut creds, response);
                    Ok(creds.access_token())
                }
                Err(reason) => Err(reason),
            };
            *slot = None;
            outcome
        };

        match &outcome {
            Ok(_) => {
                info!("Kiro access token refreshed");
                crate::metrics::record_credential_refresh(true);
                if let Err(e) = self.persist() {
                    error!("Failed to persist refreshed credentials: {}", e);
                }
            }
            Err(reason) => {
                error!("Kiro credential refresh failed: {}", reason);
                crate::metrics::record_credential_refresh(false);
            }
        }

        outcome
    }

    /// Calls the refresh endpoint. Errors are plain strings so the outcome can
    /// be cloned to every waiter.
    async fn exchange(&self, creds: &KiroCredentials) -> std::result::Result<RefreshResponse, String> {
        if creds.refresh_token.is_empty() {
            return Err("no refresh token available in the credential file".to_string());
        }

        let region = creds
            .region
            .clone()
            .unwrap_or_else(|| self.config.region.clone());

        let (url, body) = if creds.uses_oidc() {
            let url = self
                .config
                .oidc_url
                .clone()
                .unwrap_or_else(|| format!("https://oidc.{}.amazonaws.com/token", region));
            let body = serde_json::json!({
                "clientId": creds.client_id,
                "clientSecret": creds.client_secret,
                "grantType": "refresh_token",
                "refreshToken": creds.refresh_token,
            });
            (url, body)
        } else {
            let url = self.config.refresh_url.clone().unwrap_or_else(|| {
                format!("https://prod.{}.auth.desktop.kiro.dev/refreshToken", region)
            });
            let body = serde_json::json!({ "refreshToken": creds.refresh_token });
            (url, body)
        };

        debug!("Refreshing Kiro token via {}", url);

        let request_logic = || async {
            let response = self
                .http_client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| (500, format!("network error: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown".to_string());
                return Err((status.as_u16(), error_text));
            }

            response
                .json::<RefreshResponse>()
                .await
                .map_err(|e| (0, format!("malformed refresh response: {}", e)))
        };

        crate::utils::retry::with_retry(
            "Kiro token refresh",
            self.config.refresh_max_attempts,
            request_logic,
        )
        .await
        .map_err(|(status, body)| {
            let body = crate::utils::logging::sanitize(&body);
            if status == 0 {
                body
            } else {
                format!("HTTP {}: {}", status, body)
            }
        })
    }

    fn persist(&self) -> Result<()> {
        if !self.config.persist_refreshed {
            return Ok(());
        }
        let Some(path) = self.source_path.as_deref() else {
            return Ok(());
        };

        let json = {
            let creds = self.credentials.read();
            serde_json::to_string_pretty(&*creds)?
        };

        write_private(path, json.as_bytes())?;
        debug!("Persisted refreshed credentials to {}", path.display());
        Ok(())
    }
}

fn apply_refresh(creds: &mut KiroCredentials, response: RefreshResponse) {
    let expires_in = response.expires_in.unwrap_or(3600);
    creds.access_token = response.access_token;
    if let Some(refresh_token) = response.refresh_token {
        creds.refresh_token = refresh_token;
    }
    if response.profile_arn.is_some() {
        creds.profile_arn = response.profile_arn;
    }
    creds.expires_at = Some(Utc::now() + chrono::Duration::seconds(expires_in));
}

fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut file = fs::File::create(path)?;
    file.write_all(contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}
