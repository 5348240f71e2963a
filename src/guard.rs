//! Route guard: keeps signed-out users on the public screens and signed-in
//! users off them.
//!
//! DESIGN
//! ======
//! [`decide`] is a pure function of `(state, loading, location)`.
//! [`RouteGuard`] wraps it with the navigation side effect and a memo of the
//! last inputs it acted on, so re-evaluating unchanged inputs never issues a
//! second replace. [`spawn_route_guard`] re-evaluates on every change of the
//! session snapshot or the location.
//!
//! Redirects cannot loop. Both targets are fixed points of the rule
//! (`/login` is public, `/home` is private) and a replace to the location
//! already shown is skipped.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::nav::{Location, Navigator, Route};
use crate::session::SessionState;
use crate::store::{SessionSnapshot, SessionStore};

/// First segments reachable without a session.
pub const PUBLIC_SEGMENTS: [&str; 2] = ["login", "register"];

/// Whether a first segment belongs to the public set. No segment at all is
/// a private route.
#[must_use]
pub fn is_public_segment(segment: Option<&str>) -> bool {
    segment.is_some_and(|s| PUBLIC_SEGMENTS.contains(&s))
}

/// Redirect rule. `None` means stay.
#[must_use]
pub fn decide(state: &SessionState, loading: bool, location: &Location) -> Option<Route> {
    if loading {
        return None;
    }
    let public = is_public_segment(location.first_segment());
    match state {
        SessionState::Unknown => None,
        SessionState::Absent if !public => Some(Route::Login),
        SessionState::Present(_) if public => Some(Route::Home),
        SessionState::Absent | SessionState::Present(_) => None,
    }
}

/// Inputs the guard last evaluated. Token rotation does not matter to the
/// rule, so a present session is reduced to its user id.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Inputs {
    presence: Presence,
    loading: bool,
    location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    Unknown,
    Absent,
    Present(Uuid),
}

impl From<&SessionState> for Presence {
    fn from(state: &SessionState) -> Self {
        match state {
            SessionState::Unknown => Self::Unknown,
            SessionState::Absent => Self::Absent,
            SessionState::Present(session) => Self::Present(session.user.id),
        }
    }
}

/// The guard's navigation side effect.
pub struct RouteGuard {
    navigator: Arc<dyn Navigator>,
    last: Mutex<Option<Inputs>>,
}

impl RouteGuard {
    #[must_use]
    pub fn new(navigator: Arc<dyn Navigator>) -> Self {
        Self { navigator, last: Mutex::new(None) }
    }

    /// Evaluate against the navigator's current location.
    pub fn check(&self, snapshot: &SessionSnapshot) -> Option<Route> {
        let location = self.navigator.location();
        self.evaluate(snapshot, &location)
    }

    /// Apply the rule and replace the location if needed. Returns the
    /// redirect actually issued.
    pub fn evaluate(&self, snapshot: &SessionSnapshot, location: &Location) -> Option<Route> {
        let inputs = Inputs {
            presence: Presence::from(&snapshot.state),
            loading: snapshot.loading,
            location: location.clone(),
        };
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_ref() == Some(&inputs) {
            return None;
        }

        let Some(target) = decide(&snapshot.state, snapshot.loading, location) else {
            *last = Some(inputs);
            return None;
        };
        let destination = target.location();
        if &destination == location || destination == self.navigator.location() {
            *last = Some(inputs);
            return None;
        }

        info!(from = %location, to = %destination, "route guard redirect");
        self.navigator.replace(&destination);
        // Remember where we sent the user, so coming back to `location`
        // counts as a fresh input.
        *last = Some(Inputs { location: destination, ..inputs });
        Some(target)
    }
}

/// Running guard task. Dropping the handle stops it.
#[must_use = "dropping the handle stops the route guard"]
pub struct GuardHandle {
    task: JoinHandle<()>,
}

impl GuardHandle {
    /// Explicit form of dropping.
    pub fn stop(self) {}

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for GuardHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Run the guard until the handle is dropped or either input channel
/// closes.
pub fn spawn_route_guard(store: &SessionStore, navigator: Arc<dyn Navigator>) -> GuardHandle {
    let mut session_rx = store.watch();
    let mut location_rx = navigator.watch();
    let guard = RouteGuard::new(navigator);

    let task = tokio::spawn(async move {
        loop {
            let snapshot = session_rx.borrow_and_update().clone();
            let location = location_rx.borrow_and_update().clone();
            guard.evaluate(&snapshot, &location);

            tokio::select! {
                changed = session_rx.changed() => if changed.is_err() { break },
                changed = location_rx.changed() => if changed.is_err() { break },
            }
        }
        debug!("route guard stopped");
    });

    GuardHandle { task }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
