//! Navigation collaborator: locations, routes and the navigation stack.

use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::watch;
use tracing::debug;

// =============================================================================
// LOCATION
// =============================================================================

/// Ordered path segments of the screen currently shown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Location {
    segments: Vec<String>,
}

impl Location {
    /// Parse `/a/b` (leading, trailing and repeated slashes ignored).
    #[must_use]
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    #[must_use]
    pub fn first_segment(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    #[must_use]
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

impl FromStr for Location {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

// =============================================================================
// ROUTES
// =============================================================================

/// Screens the guard redirects between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    Register,
    Home,
}

impl Route {
    #[must_use]
    pub fn segment(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "register",
            Self::Home => "home",
        }
    }

    #[must_use]
    pub fn path(self) -> String {
        format!("/{}", self.segment())
    }

    #[must_use]
    pub fn location(self) -> Location {
        Location { segments: vec![self.segment().to_owned()] }
    }

    /// Reachable without a session, per [`crate::guard::PUBLIC_SEGMENTS`].
    #[must_use]
    pub fn is_public(self) -> bool {
        crate::guard::is_public_segment(Some(self.segment()))
    }
}

// =============================================================================
// NAVIGATOR
// =============================================================================

/// Navigation stack owned by the UI layer.
pub trait Navigator: Send + Sync {
    fn location(&self) -> Location;

    /// Receiver notified whenever the shown location changes.
    fn watch(&self) -> watch::Receiver<Location>;

    /// Overwrite the top of the stack. Never grows history.
    fn replace(&self, location: &Location);
}

/// In-memory navigation stack.
pub struct MemoryNavigator {
    history: Mutex<Vec<Location>>,
    current: watch::Sender<Location>,
    replacements: AtomicUsize,
}

impl MemoryNavigator {
    #[must_use]
    pub fn new(initial: Location) -> Self {
        let (current, _) = watch::channel(initial.clone());
        Self { history: Mutex::new(vec![initial]), current, replacements: AtomicUsize::new(0) }
    }

    #[must_use]
    pub fn at(path: &str) -> Self {
        Self::new(Location::parse(path))
    }

    /// Open a new screen on top of the stack.
    pub fn push(&self, location: Location) {
        let mut history = self.lock();
        history.push(location.clone());
        self.current.send_replace(location);
    }

    /// Pop the top screen. Returns false when already at the bottom.
    pub fn back(&self) -> bool {
        let mut history = self.lock();
        if history.len() <= 1 {
            return false;
        }
        history.pop();
        if let Some(top) = history.last() {
            self.current.send_replace(top.clone());
        }
        true
    }

    #[must_use]
    pub fn history(&self) -> Vec<Location> {
        self.lock().clone()
    }

    /// Number of `replace` calls that actually changed the location.
    #[must_use]
    pub fn replacements(&self) -> usize {
        self.replacements.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Location>> {
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Navigator for MemoryNavigator {
    fn location(&self) -> Location {
        self.current.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Location> {
        self.current.subscribe()
    }

    fn replace(&self, location: &Location) {
        let mut history = self.lock();
        match history.last_mut() {
            Some(top) if top == location => return,
            Some(top) => top.clone_from(location),
            None => history.push(location.clone()),
        }
        self.replacements.fetch_add(1, Ordering::SeqCst);
        debug!(to = %location, depth = history.len(), "navigation replaced");
        self.current.send_replace(location.clone());
    }
}

#[cfg(test)]
#[path = "nav_test.rs"]
mod tests;
