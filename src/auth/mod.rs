//! Auth collaborators.
//!
//! ARCHITECTURE
//! ============
//! The session store never talks HTTP. It drives an [`AuthBackend`], which
//! owns credential checks, token issuance, persistence and refresh, and
//! reports every resulting session change on a broadcast feed. Two backends
//! ship here: [`gotrue::GoTrueBackend`] for the hosted service and
//! [`memory::MemoryAuthBackend`] for offline use and tests.

pub mod gotrue;
pub mod memory;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::session::{AuthError, AuthEvent, Session, SessionChange, SignupReceipt};

/// Capacity of each backend's change feed. Changes carry the full session,
/// so a lagging receiver only loses intermediate states.
pub const CHANGE_FEED_CAPACITY: usize = 32;

/// External authentication service.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Look up a previously persisted session, if any.
    async fn current_session(&self) -> Result<Option<Session>, AuthError>;

    /// Subscribe to session changes. Dropping the receiver releases the
    /// subscription.
    fn session_changes(&self) -> broadcast::Receiver<SessionChange>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, AuthError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignupReceipt, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Sender half of a backend's change feed.
#[derive(Debug, Clone)]
pub(crate) struct ChangeFeed {
    tx: broadcast::Sender<SessionChange>,
}

impl ChangeFeed {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: AuthEvent, session: Option<Session>) {
        let receivers = self.tx.receiver_count();
        debug!(?event, receivers, "session change");
        // No receivers is fine: nobody is watching yet.
        let _ = self.tx.send(SessionChange::new(event, session));
    }
}

/// Trim and lowercase an e-mail address, rejecting obviously malformed ones.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let mut parts = normalized.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => Some(normalized),
        _ => None,
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
