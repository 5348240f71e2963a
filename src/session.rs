//! Session model shared by the store, the route guard, and auth backends.
//!
//! DESIGN
//! ======
//! `SessionState` is a closed three-way enum rather than `Option<Session>`
//! plus a loading flag: "not looked up yet" (`Unknown`) and "looked up, no
//! user" (`Absent`) are different facts and the guard treats them
//! differently.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// USER + TOKENS
// =============================================================================

/// Identity of the authenticated user as reported by the auth backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Bearer credentials issued by the auth backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMaterial {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Expiry as unix seconds. `None` when the backend did not say.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

/// Current wall-clock time as unix seconds.
#[must_use]
pub fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

fn default_token_type() -> String {
    "bearer".to_owned()
}

impl TokenMaterial {
    /// True when the access token expires within `margin_secs` of `now`.
    #[must_use]
    pub fn expires_within(&self, now: i64, margin_secs: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= now.saturating_add(margin_secs))
    }
}

/// An authenticated session: who, plus the tokens proving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub tokens: TokenMaterial,
}

// =============================================================================
// SESSION STATE
// =============================================================================

/// Authentication state held by the session store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Initial lookup has not resolved yet.
    #[default]
    Unknown,
    /// No authenticated user.
    Absent,
    /// Authenticated.
    Present(Session),
}

impl SessionState {
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    #[must_use]
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Present(session) => Some(session),
            Self::Unknown | Self::Absent => None,
        }
    }

    #[must_use]
    pub fn user(&self) -> Option<&User> {
        self.session().map(|s| &s.user)
    }
}

impl From<Option<Session>> for SessionState {
    fn from(session: Option<Session>) -> Self {
        match session {
            Some(session) => Self::Present(session),
            None => Self::Absent,
        }
    }
}

// =============================================================================
// CHANGE EVENTS
// =============================================================================

/// Kind of session change reported by the auth backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
}

/// One notification on the backend's change feed. Always carries the full
/// resulting session so a consumer that missed earlier changes still ends up
/// in the right state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

impl SessionChange {
    #[must_use]
    pub fn new(event: AuthEvent, session: Option<Session>) -> Self {
        Self { event, session }
    }
}

// =============================================================================
// SIGN-UP RECEIPT
// =============================================================================

/// Outcome of a successful sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignupReceipt {
    pub user: Option<User>,
    /// The account must be confirmed by e-mail before sign-in succeeds.
    pub confirmation_required: bool,
}

impl SignupReceipt {
    /// User-facing confirmation text.
    #[must_use]
    pub fn message(&self) -> &'static str {
        if self.confirmation_required {
            "check your email to confirm your account"
        } else {
            "account created"
        }
    }
}

// =============================================================================
// ERROR
// =============================================================================

/// Failure reported by an auth backend. Surfaced to the initiating caller;
/// never retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("auth server rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("unexpected auth response: {0}")]
    Parse(String),

    #[error("session storage failed: {0}")]
    Storage(String),
}

impl AuthError {
    /// The collaborator's message, suitable for showing to the user.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidCredentials(msg) | Self::Network(msg) | Self::Parse(msg) | Self::Storage(msg) => msg,
            Self::Rejected { message, .. } => message,
        }
    }

    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials(_) => "E_INVALID_CREDENTIALS",
            Self::Network(_) => "E_NETWORK",
            Self::Rejected { .. } => "E_REJECTED",
            Self::Parse(_) => "E_PARSE",
            Self::Storage(_) => "E_STORAGE",
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
