use super::*;
use crate::config::HttpTimeouts;

fn court_with_coords(lat: Option<f64>, lng: Option<f64>) -> Court {
    Court { latitude: lat, longitude: lng, ..fallback_courts().remove(0) }
}

// =============================================================================
// Wire format
// =============================================================================

#[test]
fn parses_table_row() {
    let body = r#"[{
        "id": 7,
        "nombre": "Padel Norte",
        "direccion": "Av. Libertador 100",
        "precio": 15000,
        "tipo": "Outdoor",
        "latitude": -34.6037,
        "longitude": "-58.3816",
        "rating": 4.3,
        "reviews": 12,
        "descripcion": "Cuatro canchas",
        "images": ["https://cdn.example.com/a.jpg"],
        "created_at": "2024-01-01T00:00:00Z"
    }]"#;
    let courts = parse_courts(body).unwrap();
    assert_eq!(courts.len(), 1);
    let court = &courts[0];
    assert_eq!(court.id, 7);
    assert_eq!(court.name, "Padel Norte");
    assert_eq!(court.price, Some(15000.0));
    assert_eq!(court.coordinates(), Some((-34.6037, -58.3816)));
    assert_eq!(court.images.len(), 1);
    assert_eq!(court.venue(), Venue::Outdoor);
}

#[test]
fn missing_and_null_columns_default() {
    let courts = parse_courts(r#"[{"id": 1, "nombre": "X", "images": null, "latitude": null}]"#).unwrap();
    let court = &courts[0];
    assert!(court.images.is_empty());
    assert_eq!(court.latitude, None);
    assert_eq!(court.rating, None);
    assert_eq!(court.venue(), Venue::Indoor);
}

#[test]
fn non_numeric_coordinate_string_is_none() {
    let courts = parse_courts(r#"[{"id": 1, "nombre": "X", "latitude": "n/a", "longitude": "1.5"}]"#).unwrap();
    assert_eq!(courts[0].latitude, None);
    assert_eq!(courts[0].longitude, Some(1.5));
    assert_eq!(courts[0].coordinates(), None);
}

#[test]
fn malformed_body_is_parse_error() {
    assert!(matches!(parse_courts("{\"message\":\"nope\"}"), Err(CourtsError::Parse(_))));
}

// =============================================================================
// Fallback
// =============================================================================

#[test]
fn fallback_has_four_courts_in_id_order() {
    let courts = fallback_courts();
    let ids: Vec<i64> = courts.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_eq!(courts[0].name, "World Padel Center CABA");
    assert_eq!(courts[1].price, Some(1800.0));
    assert_eq!(courts[2].venue(), Venue::Indoor);
    assert_eq!(courts[3].venue(), Venue::Outdoor);
    assert!(courts.iter().all(|c| c.address.as_deref() == Some("Dr. Luis Beláustegui 3041")));
}

#[tokio::test]
async fn unreachable_catalog_falls_back() {
    let config = BackendConfig {
        url: "http://127.0.0.1:9".into(),
        anon_key: "anon".into(),
        session_file: std::env::temp_dir().join("courtik-courts-test.json"),
        timeouts: HttpTimeouts { request_secs: 2, connect_secs: 1 },
    };
    let client = CourtsClient::new(&config).unwrap();
    assert!(matches!(client.list().await, Err(CourtsError::Request(_))));
    assert_eq!(client.list_or_fallback().await, fallback_courts());
}

// =============================================================================
// Maps links
// =============================================================================

#[test]
fn apple_maps_url_carries_coordinates_and_name() {
    let court = court_with_coords(Some(-34.6), Some(-58.4));
    assert_eq!(
        court.maps_url(MapsPlatform::Apple).as_deref(),
        Some("http://maps.apple.com/?ll=-34.6,-58.4&q=World%20Padel%20Center%20CABA")
    );
}

#[test]
fn apple_maps_label_escapes_reserved_characters() {
    let court = Court { name: "Padel & Co".into(), ..court_with_coords(Some(1.5), Some(2.0)) };
    assert_eq!(
        court.maps_url(MapsPlatform::Apple).as_deref(),
        Some("http://maps.apple.com/?ll=1.5,2&q=Padel%20%26%20Co")
    );
    let unnamed = Court { name: String::new(), ..court };
    assert!(unnamed.maps_url(MapsPlatform::Apple).unwrap().ends_with("&q=Cancha"));
}

#[test]
fn google_maps_url_uses_search_api() {
    let court = court_with_coords(Some(-34.6), Some(-58.4));
    assert_eq!(
        court.maps_url(MapsPlatform::Google).as_deref(),
        Some("https://www.google.com/maps/search/?api=1&query=-34.6,-58.4")
    );
}

#[test]
fn no_maps_url_without_coordinates() {
    assert_eq!(court_with_coords(None, Some(1.0)).maps_url(MapsPlatform::Google), None);
    assert_eq!(court_with_coords(Some(f64::NAN), Some(1.0)).maps_url(MapsPlatform::Apple), None);
}

// =============================================================================
// Stars
// =============================================================================

#[test]
fn stars_round_to_nearest_half() {
    use Star::{Empty, Full, Half};
    assert_eq!(star_rating(Some(4.3)), [Full, Full, Full, Full, Half]);
    assert_eq!(star_rating(Some(4.2)), [Full, Full, Full, Full, Empty]);
    assert_eq!(star_rating(Some(2.75)), [Full, Full, Full, Empty, Empty]);
    assert_eq!(star_rating(Some(0.25)), [Half, Empty, Empty, Empty, Empty]);
    assert_eq!(star_rating(Some(5.0)), [Full; 5]);
}

#[test]
fn stars_without_rating_are_empty() {
    assert_eq!(star_rating(None), [Star::Empty; 5]);
    assert_eq!(star_rating(Some(f64::NAN)), [Star::Empty; 5]);
    assert_eq!(star_rating(Some(-1.0)), [Star::Empty; 5]);
    assert_eq!(star_rating(Some(9.0)), [Star::Full; 5]);
}
