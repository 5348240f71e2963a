//! Court catalog: the `courts` table read over PostgREST, with a built-in
//! fallback list for when the table cannot be reached.
//!
//! Rows use the table's own column names (`nombre`, `direccion`, ...). The
//! coordinate columns are loosely typed upstream, so both JSON numbers and
//! numeric strings are accepted.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::config::BackendConfig;

#[derive(Debug, thiserror::Error)]
pub enum CourtsError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("courts request returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unreadable courts response: {0}")]
    Parse(String),
}

// =============================================================================
// COURT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Court {
    pub id: i64,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "direccion", default)]
    pub address: Option<String>,
    #[serde(rename = "precio", default)]
    pub price: Option<f64>,
    #[serde(rename = "tipo", default)]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub reviews: Option<u32>,
    #[serde(rename = "descripcion", default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Venue {
    Indoor,
    Outdoor,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Indoor => "indoor",
            Self::Outdoor => "outdoor",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapsPlatform {
    Apple,
    Google,
}

impl Court {
    /// Both coordinates, when present and finite.
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite() => Some((lat, lng)),
            _ => None,
        }
    }

    /// Link that opens the court in the platform's maps app. The Apple
    /// label is percent-encoded (`%20` for spaces).
    #[must_use]
    pub fn maps_url(&self, platform: MapsPlatform) -> Option<String> {
        let (lat, lng) = self.coordinates()?;
        Some(match platform {
            MapsPlatform::Apple => {
                let label = if self.name.is_empty() { "Cancha" } else { self.name.as_str() };
                format!("http://maps.apple.com/?ll={lat},{lng}&q={}", urlencoding::encode(label))
            }
            MapsPlatform::Google => format!("https://www.google.com/maps/search/?api=1&query={lat},{lng}"),
        })
    }

    /// A missing `tipo` means indoor.
    #[must_use]
    pub fn venue(&self) -> Venue {
        match self.kind.as_deref() {
            None => Venue::Indoor,
            Some(kind) if kind.eq_ignore_ascii_case("indoor") => Venue::Indoor,
            Some(_) => Venue::Outdoor,
        }
    }

    #[must_use]
    pub fn stars(&self) -> [Star; 5] {
        star_rating(self.rating)
    }

    fn fallback(id: i64, name: &str, price: f64, kind: &str) -> Self {
        Self {
            id,
            name: name.to_owned(),
            address: Some("Dr. Luis Beláustegui 3041".to_owned()),
            price: Some(price),
            kind: Some(kind.to_owned()),
            latitude: None,
            longitude: None,
            rating: None,
            reviews: None,
            description: None,
            images: Vec::new(),
        }
    }
}

/// Courts shown when the catalog cannot be loaded.
#[must_use]
pub fn fallback_courts() -> Vec<Court> {
    vec![
        Court::fallback(1, "World Padel Center CABA", 20000.0, "Indoor"),
        Court::fallback(2, "Lasaigues Padel Sheraton", 1800.0, "Outdoor"),
        Court::fallback(3, "Padel Club Station", 3200.0, "Indoor"),
        Court::fallback(4, "Quality Padel Club", 2000.0, "Outdoor"),
    ]
}

// =============================================================================
// STARS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Star {
    Full,
    Half,
    Empty,
}

impl Star {
    #[must_use]
    pub fn glyph(self) -> char {
        match self {
            Self::Full => '★',
            Self::Half => '⯪',
            Self::Empty => '☆',
        }
    }
}

/// Five stars for `rating`, rounded to the nearest half. No rating is zero.
#[must_use]
pub fn star_rating(rating: Option<f64>) -> [Star; 5] {
    let r = rating
        .filter(|r| r.is_finite())
        .map_or(0.0, |r| ((r * 2.0).round() / 2.0).clamp(0.0, 5.0));
    [1.0_f64, 2.0, 3.0, 4.0, 5.0].map(|i| {
        if i <= r.floor() {
            Star::Full
        } else if (i - 0.5 - r).abs() < f64::EPSILON {
            Star::Half
        } else {
            Star::Empty
        }
    })
}

// =============================================================================
// WIRE HELPERS
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<NumberOrString>::deserialize(deserializer)? {
        Some(NumberOrString::Number(n)) => Some(n),
        Some(NumberOrString::Text(s)) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        None => None,
    })
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// CLIENT
// =============================================================================

/// PostgREST client for the `courts` table.
pub struct CourtsClient {
    http: reqwest::Client,
    endpoint: String,
    anon_key: String,
}

impl CourtsClient {
    /// # Errors
    ///
    /// Returns [`CourtsError::Request`] if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self, CourtsError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.request_secs))
            .connect_timeout(Duration::from_secs(config.timeouts.connect_secs))
            .build()
            .map_err(|e| CourtsError::Request(format!("http client build failed: {e}")))?;
        Ok(Self {
            http,
            endpoint: format!("{}/rest/v1/courts", config.url),
            anon_key: config.anon_key.clone(),
        })
    }

    /// All courts ordered by id.
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-2xx statuses and unparseable bodies.
    pub async fn list(&self) -> Result<Vec<Court>, CourtsError> {
        self.fetch(&[("select", "*"), ("order", "id.asc")]).await
    }

    /// [`CourtsClient::list`], falling back to [`fallback_courts`] on error or
    /// when the table is empty.
    pub async fn list_or_fallback(&self) -> Vec<Court> {
        match self.list().await {
            Ok(courts) if !courts.is_empty() => courts,
            Ok(_) => {
                info!("courts table empty; using fallback list");
                fallback_courts()
            }
            Err(e) => {
                warn!(error = %e, "courts unavailable; using fallback list");
                fallback_courts()
            }
        }
    }

    /// One court by id, `None` if no row matches.
    ///
    /// # Errors
    ///
    /// Same as [`CourtsClient::list`].
    pub async fn get(&self, id: i64) -> Result<Option<Court>, CourtsError> {
        let filter = format!("eq.{id}");
        let rows = self.fetch(&[("select", "*"), ("id", filter.as_str())]).await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch(&self, query: &[(&str, &str)]) -> Result<Vec<Court>, CourtsError> {
        let resp = self
            .http
            .get(&self.endpoint)
            .query(query)
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .send()
            .await
            .map_err(|e| CourtsError::Request(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| CourtsError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(CourtsError::Status { status: status.as_u16(), body });
        }
        parse_courts(&body)
    }
}

pub(crate) fn parse_courts(body: &str) -> Result<Vec<Court>, CourtsError> {
    serde_json::from_str(body).map_err(|e| CourtsError::Parse(e.to_string()))
}

#[cfg(test)]
#[path = "courts_test.rs"]
mod tests;
