//! In-process auth backend.
//!
//! Behaves like the hosted service from the store's point of view: same
//! failure messages, same change events, optional e-mail confirmation. Used
//! by the CLI when no backend is configured and by the test suites.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

use super::{AuthBackend, ChangeFeed, normalize_email};
use crate::session::{AuthError, AuthEvent, Session, SessionChange, SignupReceipt, TokenMaterial, User, now_unix};

pub const MIN_PASSWORD_LEN: usize = 6;
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

pub(crate) const INVALID_LOGIN: &str = "Invalid login credentials";

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    bytes_to_hex(&hasher.finalize())
}

struct Account {
    user: User,
    password_hash: String,
    confirmed: bool,
}

#[derive(Default)]
struct MemoryInner {
    accounts: HashMap<String, Account>,
    current: Option<Session>,
}

/// Accounts and the current session, all in memory.
pub struct MemoryAuthBackend {
    inner: Mutex<MemoryInner>,
    feed: ChangeFeed,
    require_confirmation: bool,
    token_ttl_secs: i64,
}

impl Default for MemoryAuthBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryAuthBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            feed: ChangeFeed::new(),
            require_confirmation: false,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }

    /// New sign-ups must be confirmed with [`MemoryAuthBackend::confirm_email`]
    /// before they can sign in.
    #[must_use]
    pub fn requiring_confirmation(mut self) -> Self {
        self.require_confirmation = true;
        self
    }

    /// Pre-register a confirmed account.
    #[must_use]
    pub fn with_account(self, email: &str, password: &str) -> Self {
        if let Some(email) = normalize_email(email) {
            let account = Account {
                user: User { id: Uuid::new_v4(), email: Some(email.clone()) },
                password_hash: hash_password(password),
                confirmed: true,
            };
            self.lock().accounts.insert(email, account);
        }
        self
    }

    /// Pre-register a confirmed account and treat it as the persisted
    /// session, as if the user had signed in on a previous run.
    #[must_use]
    pub fn signed_in_as(self, email: &str, password: &str) -> Self {
        let backend = self.with_account(email, password);
        if let Some(email) = normalize_email(email) {
            let mut inner = backend.lock();
            if let Some(user) = inner.accounts.get(&email).map(|a| a.user.clone()) {
                inner.current = Some(backend.issue(user));
            }
        }
        backend
    }

    /// Mark a pending sign-up as confirmed. Returns false for unknown e-mails.
    pub fn confirm_email(&self, email: &str) -> bool {
        let Some(email) = normalize_email(email) else {
            return false;
        };
        match self.lock().accounts.get_mut(&email) {
            Some(account) => {
                account.confirmed = true;
                true
            }
            None => false,
        }
    }

    /// Rotate the current session's tokens and report `TokenRefreshed`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Rejected`] when nobody is signed in.
    pub fn refresh_session(&self) -> Result<Session, AuthError> {
        let session = {
            let mut inner = self.lock();
            let Some(current) = inner.current.as_ref() else {
                return Err(AuthError::Rejected { status: 401, message: "Auth session missing!".into() });
            };
            let refreshed = self.issue(current.user.clone());
            inner.current = Some(refreshed.clone());
            refreshed
        };
        self.feed.emit(AuthEvent::TokenRefreshed, Some(session.clone()));
        Ok(session)
    }

    /// Current session without going through the async trait.
    #[must_use]
    pub fn current(&self) -> Option<Session> {
        self.lock().current.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn issue(&self, user: User) -> Session {
        let now = now_unix();
        Session {
            user,
            tokens: TokenMaterial {
                access_token: generate_token(),
                refresh_token: generate_token(),
                token_type: "bearer".into(),
                expires_at: Some(now + self.token_ttl_secs),
            },
        }
    }
}

#[async_trait]
impl AuthBackend for MemoryAuthBackend {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.current())
    }

    fn session_changes(&self) -> broadcast::Receiver<SessionChange> {
        self.feed.subscribe()
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = normalize_email(email).ok_or_else(|| AuthError::InvalidCredentials(INVALID_LOGIN.into()))?;
        let session = {
            let mut inner = self.lock();
            let account = inner
                .accounts
                .get(&email)
                .filter(|a| a.password_hash == hash_password(password))
                .ok_or_else(|| AuthError::InvalidCredentials(INVALID_LOGIN.into()))?;
            if !account.confirmed {
                return Err(AuthError::Rejected { status: 400, message: "Email not confirmed".into() });
            }
            let session = self.issue(account.user.clone());
            inner.current = Some(session.clone());
            session
        };
        info!(user_id = %session.user.id, "memory backend signed in");
        self.feed.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignupReceipt, AuthError> {
        let email = normalize_email(email).ok_or_else(|| AuthError::Rejected {
            status: 400,
            message: "Unable to validate email address: invalid format".into(),
        })?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Rejected {
                status: 422,
                message: format!("Password should be at least {MIN_PASSWORD_LEN} characters"),
            });
        }

        let (user, session) = {
            let mut inner = self.lock();
            if inner.accounts.contains_key(&email) {
                return Err(AuthError::Rejected { status: 422, message: "User already registered".into() });
            }
            let user = User { id: Uuid::new_v4(), email: Some(email.clone()) };
            let account = Account {
                user: user.clone(),
                password_hash: hash_password(password),
                confirmed: !self.require_confirmation,
            };
            inner.accounts.insert(email, account);
            let session = (!self.require_confirmation).then(|| self.issue(user.clone()));
            if session.is_some() {
                inner.current.clone_from(&session);
            }
            (user, session)
        };

        info!(user_id = %user.id, confirmation_required = self.require_confirmation, "memory backend signed up");
        if session.is_some() {
            self.feed.emit(AuthEvent::SignedIn, session);
        }
        Ok(SignupReceipt { user: Some(user), confirmation_required: self.require_confirmation })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let previous = self.lock().current.take();
        if let Some(previous) = previous {
            info!(user_id = %previous.user.id, "memory backend signed out");
        }
        self.feed.emit(AuthEvent::SignedOut, None);
        Ok(())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
