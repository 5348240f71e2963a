use super::*;

// =============================================================================
// normalize_email
// =============================================================================

#[test]
fn normalize_email_accepts_basic_address() {
    assert_eq!(normalize_email("  Ana@Example.com "), Some("ana@example.com".to_owned()));
}

#[test]
fn normalize_email_rejects_invalid_values() {
    assert_eq!(normalize_email(""), None);
    assert_eq!(normalize_email("ana"), None);
    assert_eq!(normalize_email("@example.com"), None);
    assert_eq!(normalize_email("ana@"), None);
    assert_eq!(normalize_email("a@b@c"), None);
}

// =============================================================================
// ChangeFeed
// =============================================================================

#[test]
fn emit_without_receivers_is_silent() {
    let feed = ChangeFeed::new();
    feed.emit(AuthEvent::SignedOut, None);
}

#[tokio::test]
async fn emit_reaches_every_subscriber() {
    let feed = ChangeFeed::new();
    let mut a = feed.subscribe();
    let mut b = feed.subscribe();
    feed.emit(AuthEvent::SignedOut, None);
    assert_eq!(a.recv().await.unwrap().event, AuthEvent::SignedOut);
    assert_eq!(b.recv().await.unwrap().event, AuthEvent::SignedOut);
}
