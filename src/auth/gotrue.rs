//! GoTrue HTTP backend: password grant, sign-up, logout, token refresh.
//!
//! DESIGN
//! ======
//! The signed-in session is persisted as JSON in [`SessionFile`] so a later
//! run starts signed in. `current_session` refreshes a persisted session
//! that is about to expire, and [`GoTrueBackend::spawn_auto_refresh`] keeps
//! doing so for long-running processes. A refresh the server rejects clears
//! the file and reports `SignedOut`.
//!
//! ERROR HANDLING
//! ==============
//! Transport failures map to `AuthError::Network`. Non-2xx responses carry
//! the server's message: the password grant answers bad credentials with
//! 400, which maps to `InvalidCredentials`; everything else is `Rejected`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AuthBackend, ChangeFeed};
use crate::config::BackendConfig;
use crate::session::{AuthError, AuthEvent, Session, SessionChange, SignupReceipt, TokenMaterial, User, now_unix};

/// Refresh persisted sessions this close to expiry.
const REFRESH_MARGIN_SECS: i64 = 60;

// =============================================================================
// SESSION FILE
// =============================================================================

/// JSON file holding the persisted session.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted session. A missing file is "no session"; an
    /// unreadable one is discarded with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] on I/O failures other than not-found.
    pub async fn load(&self) -> Result<Option<Session>, AuthError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::Storage(format!("{}: {e}", self.path.display()))),
        };
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "discarding unreadable session file");
                Ok(None)
            }
        }
    }

    /// Write the session, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the file cannot be written.
    pub async fn save(&self, session: &Session) -> Result<(), AuthError> {
        let storage_err = |e: std::io::Error| AuthError::Storage(format!("{}: {e}", self.path.display()));
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(storage_err)?;
        }
        let json = serde_json::to_vec_pretty(session).map_err(|e| AuthError::Storage(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await.map_err(storage_err)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(storage_err)
    }

    /// Remove the persisted session. Already gone is fine.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Storage`] if the file exists but cannot be removed.
    pub async fn clear(&self) -> Result<(), AuthError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Storage(format!("{}: {e}", self.path.display()))),
        }
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: Uuid,
    #[serde(default)]
    email: Option<String>,
}

impl From<UserResponse> for User {
    fn from(u: UserResponse) -> Self {
        Self { id: u.id, email: u.email }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: UserResponse,
}

impl TokenResponse {
    fn into_session(self, now: i64) -> Session {
        Session {
            tokens: TokenMaterial {
                access_token: self.access_token,
                refresh_token: self.refresh_token,
                token_type: self.token_type.unwrap_or_else(|| "bearer".into()),
                expires_at: self
                    .expires_at
                    .or_else(|| self.expires_in.map(|secs| now.saturating_add(secs))),
            },
            user: self.user.into(),
        }
    }
}

/// Sign-up outcome: an immediate session, or a user awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SignupOutcome {
    Session(Session),
    Pending(User),
}

pub(crate) fn parse_session_response(body: &str, now: i64) -> Result<Session, AuthError> {
    serde_json::from_str::<TokenResponse>(body)
        .map(|t| t.into_session(now))
        .map_err(|e| AuthError::Parse(e.to_string()))
}

pub(crate) fn parse_signup_response(body: &str, now: i64) -> Result<SignupOutcome, AuthError> {
    let value: Value = serde_json::from_str(body).map_err(|e| AuthError::Parse(e.to_string()))?;
    if value.get("access_token").is_some() {
        let token = serde_json::from_value::<TokenResponse>(value).map_err(|e| AuthError::Parse(e.to_string()))?;
        return Ok(SignupOutcome::Session(token.into_session(now)));
    }
    // Some deployments nest the user; most return it at the top level.
    let user_value = value.get("user").cloned().unwrap_or(value);
    let user = serde_json::from_value::<UserResponse>(user_value).map_err(|e| AuthError::Parse(e.to_string()))?;
    Ok(SignupOutcome::Pending(user.into()))
}

/// Pull a human-readable message out of an error body.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_owned)
}

pub(crate) fn map_error(status: u16, body: &str, credential_check: bool) -> AuthError {
    let message = error_message(body).unwrap_or_else(|| {
        let trimmed = body.trim();
        if trimmed.is_empty() { format!("HTTP {status}") } else { trimmed.to_owned() }
    });
    if credential_check && matches!(status, 400 | 401) {
        AuthError::InvalidCredentials(message)
    } else {
        AuthError::Rejected { status, message }
    }
}

// =============================================================================
// BACKEND
// =============================================================================

/// Auth backend talking to a GoTrue server under `{url}/auth/v1`.
pub struct GoTrueBackend {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    storage: SessionFile,
    feed: ChangeFeed,
}

impl GoTrueBackend {
    /// Build from typed config.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Network`] if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| AuthError::Network(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            base_url: format!("{}/auth/v1", config.url),
            anon_key: config.anon_key.clone(),
            storage: SessionFile::new(config.session_file.clone()),
            feed: ChangeFeed::new(),
        })
    }

    #[must_use]
    pub fn storage(&self) -> &SessionFile {
        &self.storage
    }

    /// Exchange the persisted refresh token for a new session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Rejected`] when no session is persisted or the
    /// server refuses the refresh token.
    pub async fn refresh_session(&self) -> Result<Session, AuthError> {
        let Some(current) = self.storage.load().await? else {
            return Err(AuthError::Rejected { status: 401, message: "Auth session missing!".into() });
        };
        self.refresh_with(&current.tokens.refresh_token).await
    }

    async fn refresh_with(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let body = self
            .post("/token?grant_type=refresh_token", None, Some(&json!({ "refresh_token": refresh_token })), false)
            .await?;
        let session = parse_session_response(&body, now_unix())?;
        self.storage.save(&session).await?;
        info!(user_id = %session.user.id, "session refreshed");
        self.feed.emit(AuthEvent::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }

    /// Keep the persisted session fresh while the process runs. Every
    /// `tick` the session is reloaded and refreshed once it is within the
    /// refresh margin. The task ends when the backend is dropped.
    pub fn spawn_auto_refresh(self: &Arc<Self>, tick: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(backend) = weak.upgrade() else { break };
                let session = match backend.storage.load().await {
                    Ok(Some(session)) => session,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(error = %e, "auto-refresh could not read session");
                        continue;
                    }
                };
                if !session.tokens.expires_within(now_unix(), REFRESH_MARGIN_SECS) {
                    continue;
                }
                if let Err(e) = backend.refresh_or_sign_out(&session).await {
                    warn!(error = %e, "auto-refresh failed; retrying next tick");
                }
            }
            debug!("auto-refresh stopped");
        })
    }

    /// Refresh `session`. A refresh token the server refuses ends the
    /// session: the file is cleared and `SignedOut` is reported.
    async fn refresh_or_sign_out(&self, session: &Session) -> Result<Option<Session>, AuthError> {
        match self.refresh_with(&session.tokens.refresh_token).await {
            Ok(refreshed) => Ok(Some(refreshed)),
            Err(AuthError::Rejected { status, message }) => {
                warn!(status, %message, "session could not be refreshed; signing out");
                self.storage.clear().await?;
                self.feed.emit(AuthEvent::SignedOut, None);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn post(
        &self,
        endpoint: &str,
        bearer: Option<&str>,
        body: Option<&Value>,
        credential_check: bool,
    ) -> Result<String, AuthError> {
        let url = format!("{}{endpoint}", self.base_url);
        let mut req = self
            .http
            .post(&url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer.unwrap_or(&self.anon_key));
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;
        if status.is_success() {
            Ok(text)
        } else {
            Err(map_error(status.as_u16(), &text, credential_check))
        }
    }
}

#[async_trait]
impl AuthBackend for GoTrueBackend {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let Some(session) = self.storage.load().await? else {
            return Ok(None);
        };
        if !session.tokens.expires_within(now_unix(), REFRESH_MARGIN_SECS) {
            return Ok(Some(session));
        }
        self.refresh_or_sign_out(&session).await
    }

    fn session_changes(&self) -> broadcast::Receiver<SessionChange> {
        self.feed.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let body = self
            .post(
                "/token?grant_type=password",
                None,
                Some(&json!({ "email": email, "password": password })),
                true,
            )
            .await?;
        let session = parse_session_response(&body, now_unix())?;
        self.storage.save(&session).await?;
        info!(user_id = %session.user.id, "signed in");
        self.feed.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignupReceipt, AuthError> {
        let body = self
            .post("/signup", None, Some(&json!({ "email": email, "password": password })), false)
            .await?;
        match parse_signup_response(&body, now_unix())? {
            SignupOutcome::Session(session) => {
                self.storage.save(&session).await?;
                info!(user_id = %session.user.id, "signed up and signed in");
                let user = session.user.clone();
                self.feed.emit(AuthEvent::SignedIn, Some(session));
                Ok(SignupReceipt { user: Some(user), confirmation_required: false })
            }
            SignupOutcome::Pending(user) => {
                info!(user_id = %user.id, "signed up; confirmation pending");
                Ok(SignupReceipt { user: Some(user), confirmation_required: true })
            }
        }
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        if let Some(session) = self.storage.load().await? {
            match self
                .post("/logout", Some(&session.tokens.access_token), None, false)
                .await
            {
                Ok(_) => info!(user_id = %session.user.id, "signed out"),
                Err(AuthError::Rejected { status: 401 | 403 | 404, .. }) => {
                    info!(user_id = %session.user.id, "server session already gone; signing out locally");
                }
                Err(e) => return Err(e),
            }
            self.storage.clear().await?;
        }
        self.feed.emit(AuthEvent::SignedOut, None);
        Ok(())
    }
}

#[cfg(test)]
#[path = "gotrue_test.rs"]
mod tests;
