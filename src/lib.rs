//! Courtik: session-gated navigation core for a court booking app.
//!
//! [`store::SessionStore`] owns the authentication state fed by an
//! [`auth::AuthBackend`]; [`guard::spawn_route_guard`] keeps the
//! [`nav::Navigator`] on screens the current session may see.

pub mod auth;
pub mod config;
pub mod courts;
pub mod guard;
pub mod nav;
pub mod session;
pub mod store;

pub use auth::AuthBackend;
pub use guard::{GuardHandle, RouteGuard, decide, spawn_route_guard};
pub use nav::{Location, MemoryNavigator, Navigator, Route};
pub use session::{AuthError, Session, SessionState, User};
pub use store::{SessionSnapshot, SessionStore, Subscription};
