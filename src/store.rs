//! Session store: the single source of truth for authentication state.
//!
//! ARCHITECTURE
//! ============
//! The store owns the receiving end of the backend's change feed. One task
//! applies changes serially; the resulting `(state, loading)` snapshot is
//! published on a `watch` channel for observers such as the route guard,
//! and each applied change is handed to registered listeners.
//!
//! `SessionStore` is a cheap handle (`Arc` inside). The application root
//! creates one and passes clones to whoever needs it.
//!
//! LISTENER RELEASE
//! ================
//! Dropping a [`Subscription`] waits for an in-flight invocation of its
//! listener and guarantees no invocation after the drop returns. A listener
//! must therefore not drop its own subscription from inside its callback.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::AuthBackend;
use crate::config::StoreConfig;
use crate::session::{AuthError, AuthEvent, Session, SessionChange, SessionState, SignupReceipt, User};

/// What observers see: the session state plus whether a decision should
/// wait (initial lookup or an auth call still in flight).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub loading: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self { state: SessionState::Unknown, loading: true }
    }
}

type Listener = Box<dyn Fn(&SessionChange) + Send + Sync>;

struct ListenerSlot {
    callback: Mutex<Option<Listener>>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    slots: BTreeMap<u64, Arc<ListenerSlot>>,
}

#[derive(Default)]
struct Progress {
    initialized: bool,
    pending_ops: usize,
    /// A change from the feed has been applied; a late initial lookup must
    /// not overwrite it.
    change_applied: bool,
}

struct StoreInner {
    backend: Arc<dyn AuthBackend>,
    config: StoreConfig,
    snapshot: watch::Sender<SessionSnapshot>,
    progress: Mutex<Progress>,
    listeners: Mutex<Registry>,
    feed: Mutex<Option<broadcast::Receiver<SessionChange>>>,
    init_started: AtomicBool,
    pump: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StoreInner {
    /// Mutate state and progress together, then republish `loading`.
    /// Observers are notified only if the snapshot actually changed.
    fn update(&self, f: impl FnOnce(&mut Progress, &mut SessionState)) {
        self.snapshot.send_if_modified(|snap| {
            let mut progress = lock(&self.progress);
            let before = snap.clone();
            f(&mut progress, &mut snap.state);
            snap.loading = !progress.initialized || progress.pending_ops > 0;
            *snap != before
        });
    }

    fn apply(&self, change: &SessionChange) {
        self.update(|progress, state| {
            progress.change_applied = true;
            *state = SessionState::from(change.session.clone());
        });
        debug!(event = ?change.event, present = change.session.is_some(), "session change applied");
        self.dispatch(change);
    }

    fn dispatch(&self, change: &SessionChange) {
        let slots: Vec<Arc<ListenerSlot>> = lock(&self.listeners).slots.values().cloned().collect();
        for slot in slots {
            if let Some(callback) = lock(&slot.callback).as_ref() {
                callback(change);
            }
        }
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
    }
}

async fn pump_changes(inner: Weak<StoreInner>, mut feed: broadcast::Receiver<SessionChange>) {
    loop {
        match feed.recv().await {
            Ok(change) => {
                let Some(store) = inner.upgrade() else { break };
                store.apply(&change);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "session change feed lagged; newest change still pending");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("session change feed closed");
                break;
            }
        }
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Registration of a session-change listener. Dropping it unregisters the
/// listener.
#[must_use = "dropping the subscription unregisters the listener immediately"]
pub struct Subscription {
    id: u64,
    slot: Arc<ListenerSlot>,
    store: Weak<StoreInner>,
}

impl Subscription {
    /// Explicit form of dropping.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            lock(&store.listeners).slots.remove(&self.id);
        }
        // Waits for an in-flight invocation, then disarms the slot.
        lock(&self.slot.callback).take();
    }
}

// =============================================================================
// PENDING OPERATION GUARD
// =============================================================================

/// Holds `loading` up while an auth call is in flight.
struct PendingOp {
    inner: Arc<StoreInner>,
}

impl PendingOp {
    fn begin(inner: &Arc<StoreInner>) -> Self {
        inner.update(|progress, _| progress.pending_ops += 1);
        Self { inner: Arc::clone(inner) }
    }
}

impl Drop for PendingOp {
    fn drop(&mut self) {
        self.inner
            .update(|progress, _| progress.pending_ops = progress.pending_ops.saturating_sub(1));
    }
}

// =============================================================================
// SESSION STORE
// =============================================================================

#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

impl SessionStore {
    /// Bind to `backend`'s change feed. Changes emitted before
    /// [`SessionStore::initialize`] are buffered, not lost.
    #[must_use]
    pub fn new(backend: Arc<dyn AuthBackend>, config: StoreConfig) -> Self {
        let feed = backend.session_changes();
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        Self {
            inner: Arc::new(StoreInner {
                backend,
                config,
                snapshot,
                progress: Mutex::new(Progress::default()),
                listeners: Mutex::new(Registry::default()),
                feed: Mutex::new(Some(feed)),
                init_started: AtomicBool::new(false),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Start applying backend changes and resolve the initial session.
    ///
    /// Only the first call does anything; callers arriving while it is in
    /// flight return at once and observe `Unknown` until it completes. A
    /// lookup that fails or outlives `init_timeout` settles on `Absent`.
    pub async fn initialize(&self) {
        if self.inner.init_started.swap(true, Ordering::SeqCst) {
            debug!("session store already initializing");
            return;
        }

        if let Some(feed) = lock(&self.inner.feed).take() {
            let handle = tokio::spawn(pump_changes(Arc::downgrade(&self.inner), feed));
            *lock(&self.inner.pump) = Some(handle);
        }

        let timeout = self.inner.config.init_timeout;
        let session = match tokio::time::timeout(timeout, self.inner.backend.current_session()).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!(error = %e, "initial session lookup failed; treating as signed out");
                None
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis(), "initial session lookup timed out; treating as signed out");
                None
            }
        };

        let mut applied = false;
        self.inner.update(|progress, state| {
            progress.initialized = true;
            if !progress.change_applied {
                *state = SessionState::from(session.clone());
                applied = true;
            }
        });

        if applied {
            info!(user_id = ?session.as_ref().map(|s| s.user.id), "session store initialized");
            self.inner
                .dispatch(&SessionChange::new(AuthEvent::InitialSession, session));
        } else {
            info!("session store initialized; newer change already applied");
        }
    }

    /// Wait until the session state is known and return the snapshot.
    pub async fn ready(&self) -> SessionSnapshot {
        let mut rx = self.watch();
        match rx.wait_for(|snap| !snap.state.is_unknown()).await {
            Ok(snap) => snap.clone(),
            // Sender lives in `self`, so the channel cannot close here.
            Err(_) => self.snapshot(),
        }
    }

    /// Register `listener` for every applied session change.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionChange) + Send + Sync + 'static,
    {
        let slot = Arc::new(ListenerSlot { callback: Mutex::new(Some(Box::new(listener))) });
        let mut registry = lock(&self.inner.listeners);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.slots.insert(id, Arc::clone(&slot));
        Subscription { id, slot, store: Arc::downgrade(&self.inner) }
    }

    /// Sign in with e-mail and password. The store turns `Present` when the
    /// backend reports the change, not when this returns.
    ///
    /// # Errors
    ///
    /// Propagates the backend's [`AuthError`] unchanged; nothing is retried.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let _op = PendingOp::begin(&self.inner);
        match self
            .inner
            .backend
            .sign_in_with_password(email, password)
            .await
        {
            Ok(session) => {
                info!(user_id = %session.user.id, "sign-in accepted");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "sign-in failed");
                Err(e)
            }
        }
    }

    /// Create an account.
    ///
    /// # Errors
    ///
    /// Propagates the backend's [`AuthError`] unchanged.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignupReceipt, AuthError> {
        let _op = PendingOp::begin(&self.inner);
        let result = self.inner.backend.sign_up(email, password).await;
        match &result {
            Ok(receipt) => info!(confirmation_required = receipt.confirmation_required, "sign-up accepted"),
            Err(e) => warn!(error = %e, code = e.error_code(), "sign-up failed"),
        }
        result
    }

    /// Sign out. The store turns `Absent` once the backend confirms.
    ///
    /// # Errors
    ///
    /// Propagates the backend's [`AuthError`] unchanged.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let _op = PendingOp::begin(&self.inner);
        let result = self.inner.backend.sign_out().await;
        if let Err(e) = &result {
            warn!(error = %e, code = e.error_code(), "sign-out failed");
        }
        result
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.inner.snapshot.borrow().state.clone()
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.inner.snapshot.borrow().state.session().cloned()
    }

    #[must_use]
    pub fn user(&self) -> Option<User> {
        self.inner.snapshot.borrow().state.user().cloned()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.inner.snapshot.borrow().loading
    }

    /// Receiver for snapshot changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
