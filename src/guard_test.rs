use std::time::Duration;

use super::*;
use crate::auth::AuthBackend;
use crate::auth::memory::MemoryAuthBackend;
use crate::config::StoreConfig;
use crate::nav::MemoryNavigator;
use crate::session::{Session, TokenMaterial, User};

const WAIT: Duration = Duration::from_secs(2);
const SETTLE: Duration = Duration::from_millis(50);

fn present() -> SessionState {
    SessionState::Present(Session {
        user: User { id: Uuid::new_v4(), email: Some("ana@example.com".into()) },
        tokens: TokenMaterial {
            access_token: "a".into(),
            refresh_token: "r".into(),
            token_type: "bearer".into(),
            expires_at: None,
        },
    })
}

fn snap(state: SessionState, loading: bool) -> SessionSnapshot {
    SessionSnapshot { state, loading }
}

fn loc(path: &str) -> Location {
    Location::parse(path)
}

async fn wait_for_location(nav: &MemoryNavigator, expected: Location) {
    let mut rx = nav.watch();
    tokio::time::timeout(WAIT, rx.wait_for(|l| *l == expected))
        .await
        .expect("timed out waiting for navigation")
        .expect("navigator dropped");
}

// =============================================================================
// decide
// =============================================================================

#[test]
fn loading_never_redirects() {
    for state in [SessionState::Unknown, SessionState::Absent, present()] {
        for path in ["/", "/home", "/login", "/register", "/infocourt/2"] {
            assert_eq!(decide(&state, true, &loc(path)), None, "{state:?} {path}");
        }
    }
}

#[test]
fn absent_on_private_goes_to_login() {
    for path in ["/home", "/reservas", "/infocourt/2", "/loginx"] {
        assert_eq!(decide(&SessionState::Absent, false, &loc(path)), Some(Route::Login), "{path}");
    }
}

#[test]
fn absent_on_public_stays() {
    assert_eq!(decide(&SessionState::Absent, false, &loc("/login")), None);
    assert_eq!(decide(&SessionState::Absent, false, &loc("/register")), None);
}

#[test]
fn present_on_public_goes_home() {
    assert_eq!(decide(&present(), false, &loc("/login")), Some(Route::Home));
    assert_eq!(decide(&present(), false, &loc("/register/step2")), Some(Route::Home));
}

#[test]
fn present_on_private_stays() {
    assert_eq!(decide(&present(), false, &loc("/home")), None);
    assert_eq!(decide(&present(), false, &loc("/infocourt/1")), None);
}

#[test]
fn empty_location_is_private() {
    assert_eq!(decide(&SessionState::Absent, false, &Location::root()), Some(Route::Login));
    assert_eq!(decide(&present(), false, &Location::root()), None);
}

#[test]
fn unknown_without_loading_suspends() {
    assert_eq!(decide(&SessionState::Unknown, false, &loc("/home")), None);
}

#[test]
fn public_segment_match_is_literal() {
    assert!(is_public_segment(Some("login")));
    assert!(is_public_segment(Some("register")));
    assert!(!is_public_segment(Some("(auth)")));
    assert!(!is_public_segment(Some("Login")));
    assert!(!is_public_segment(None));
}

// =============================================================================
// RouteGuard::evaluate
// =============================================================================

#[test]
fn evaluate_twice_with_same_inputs_navigates_once() {
    let nav = Arc::new(MemoryNavigator::at("/home"));
    let guard = RouteGuard::new(nav.clone());
    let s = snap(SessionState::Absent, false);

    assert_eq!(guard.evaluate(&s, &loc("/home")), Some(Route::Login));
    assert_eq!(guard.evaluate(&s, &loc("/home")), None);
    assert_eq!(nav.replacements(), 1);
    assert_eq!(nav.location(), Route::Login.location());
}

#[test]
fn evaluate_skips_when_already_at_target() {
    let nav = Arc::new(MemoryNavigator::at("/login"));
    let guard = RouteGuard::new(nav.clone());
    // Stale location argument; navigator already shows the target.
    assert_eq!(guard.evaluate(&snap(SessionState::Absent, false), &loc("/home")), None);
    assert_eq!(nav.replacements(), 0);
}

#[test]
fn evaluate_redirects_again_when_user_returns() {
    let nav = Arc::new(MemoryNavigator::at("/home"));
    let guard = RouteGuard::new(nav.clone());
    let s = snap(SessionState::Absent, false);

    assert_eq!(guard.check(&s), Some(Route::Login));
    nav.push(loc("/home"));
    assert_eq!(guard.check(&s), Some(Route::Login));
    assert_eq!(nav.replacements(), 2);
}

#[test]
fn token_refresh_does_not_redirect_again() {
    let nav = Arc::new(MemoryNavigator::at("/login"));
    let guard = RouteGuard::new(nav.clone());
    let SessionState::Present(mut session) = present() else { unreachable!() };

    let first = snap(SessionState::Present(session.clone()), false);
    assert_eq!(guard.evaluate(&first, &loc("/login")), Some(Route::Home));

    session.tokens.access_token = "rotated".into();
    let refreshed = snap(SessionState::Present(session), false);
    assert_eq!(guard.evaluate(&refreshed, &loc("/login")), None);
    assert_eq!(nav.replacements(), 1);
}

#[test]
fn evaluate_while_loading_does_nothing() {
    let nav = Arc::new(MemoryNavigator::at("/home"));
    let guard = RouteGuard::new(nav.clone());
    assert_eq!(guard.check(&snap(SessionState::Unknown, true)), None);
    assert_eq!(guard.check(&snap(SessionState::Absent, true)), None);
    assert_eq!(nav.replacements(), 0);
}

// =============================================================================
// spawn_route_guard scenarios
// =============================================================================

fn store_with(backend: Arc<dyn AuthBackend>) -> SessionStore {
    SessionStore::new(backend, StoreConfig::default())
}

#[tokio::test]
async fn unknown_resolving_to_absent_on_home_redirects_to_login_once() {
    let store = store_with(Arc::new(MemoryAuthBackend::new()));
    let nav = Arc::new(MemoryNavigator::at("/home"));
    let _guard = spawn_route_guard(&store, nav.clone());

    tokio::time::sleep(SETTLE).await;
    assert_eq!(nav.replacements(), 0, "no redirect before initialization");

    store.initialize().await;
    wait_for_location(&nav, Route::Login.location()).await;
    tokio::time::sleep(SETTLE).await;
    assert_eq!(nav.replacements(), 1);
    assert_eq!(nav.history().len(), 1);
}

#[tokio::test]
async fn sign_in_on_login_redirects_home() {
    let backend = Arc::new(MemoryAuthBackend::new().with_account("ana@example.com", "secret1"));
    let store = store_with(backend);
    let nav = Arc::new(MemoryNavigator::at("/login"));
    let _guard = spawn_route_guard(&store, nav.clone());

    store.initialize().await;
    tokio::time::sleep(SETTLE).await;
    assert_eq!(nav.replacements(), 0);

    store.sign_in("ana@example.com", "secret1").await.unwrap();
    wait_for_location(&nav, Route::Home.location()).await;
    tokio::time::sleep(SETTLE).await;
    assert_eq!(nav.replacements(), 1);
}

#[tokio::test]
async fn present_on_register_redirects_home() {
    let backend = Arc::new(MemoryAuthBackend::new().signed_in_as("ana@example.com", "secret1"));
    let store = store_with(backend);
    let nav = Arc::new(MemoryNavigator::at("/register"));
    let _guard = spawn_route_guard(&store, nav.clone());

    store.initialize().await;
    wait_for_location(&nav, Route::Home.location()).await;
    tokio::time::sleep(SETTLE).await;
    assert_eq!(nav.replacements(), 1);
}

#[tokio::test]
async fn sign_out_on_home_redirects_to_login() {
    let backend = Arc::new(MemoryAuthBackend::new().signed_in_as("ana@example.com", "secret1"));
    let store = store_with(backend);
    let nav = Arc::new(MemoryNavigator::at("/home"));
    let _guard = spawn_route_guard(&store, nav.clone());

    store.initialize().await;
    tokio::time::sleep(SETTLE).await;
    assert_eq!(nav.replacements(), 0);

    store.sign_out().await.unwrap();
    wait_for_location(&nav, Route::Login.location()).await;
    tokio::time::sleep(SETTLE).await;
    assert_eq!(nav.replacements(), 1);
}

#[tokio::test]
async fn guard_catches_manual_navigation_to_private_screen() {
    let store = store_with(Arc::new(MemoryAuthBackend::new()));
    let nav = Arc::new(MemoryNavigator::at("/login"));
    let _guard = spawn_route_guard(&store, nav.clone());
    store.initialize().await;

    nav.push(loc("/reservas"));
    wait_for_location(&nav, Route::Login.location()).await;
    assert_eq!(nav.history(), vec![Route::Login.location(), Route::Login.location()]);
}

#[tokio::test]
async fn dropped_handle_stops_redirecting() {
    let backend = Arc::new(MemoryAuthBackend::new().signed_in_as("ana@example.com", "secret1"));
    let store = store_with(backend);
    let nav = Arc::new(MemoryNavigator::at("/home"));
    let guard = spawn_route_guard(&store, nav.clone());
    store.initialize().await;
    assert!(guard.is_running());

    guard.stop();
    store.sign_out().await.unwrap();
    tokio::time::sleep(SETTLE).await;
    assert_eq!(nav.location(), loc("/home"));
    assert_eq!(nav.replacements(), 0);
}
