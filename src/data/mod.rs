//! Core data models for the café finder
//!
//! Café records as returned by the IBeanThere API, plus the timestamped
//! wrapper the spatial cache stores them in.

pub mod cafes;

pub use cafes::{ApiError, CafeClient, NearbyQuery};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::geo::Coordinates;

/// A café as returned by the search endpoint
///
/// Coordinates and ratings are stored server-side as decimals, which the API
/// may serialize either as JSON numbers or as strings; both are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cafe {
    /// Unique identifier (UUID assigned by the backend)
    pub id: String,
    /// Display name
    pub name: String,
    /// URL slug, e.g. "midnight-run-cafe"
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    /// Latitude in decimal degrees
    #[serde(deserialize_with = "de_degrees")]
    pub latitude: f64,
    /// Longitude in decimal degrees
    #[serde(deserialize_with = "de_degrees")]
    pub longitude: f64,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Community verification state
    #[serde(default)]
    pub status: CafeStatus,
    /// Number of users who confirmed the café exists
    #[serde(default)]
    pub verification_count: u32,
    #[serde(default, deserialize_with = "de_opt_number")]
    pub google_rating: Option<f64>,
    /// Mean rating across public visit logs
    #[serde(default, deserialize_with = "de_opt_number")]
    pub average_rating: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_number")]
    pub trending_score: Option<f64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Cafe {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    /// Google rating when present, otherwise the community average
    pub fn rating(&self) -> Option<f64> {
        self.google_rating.or(self.average_rating)
    }
}

/// Verification status of a café
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CafeStatus {
    /// Registered by a user, awaiting confirmation
    #[default]
    Pending,
    /// Confirmed by enough visitors or an admin
    Verified,
    /// Any status this client does not know about
    #[serde(other)]
    Unknown,
}

impl CafeStatus {
    /// Parses a status name ("pending" or "verified")
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(CafeStatus::Pending),
            "verified" => Some(CafeStatus::Verified),
            _ => None,
        }
    }

    /// Name used by the API's `status_filter` parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            CafeStatus::Pending => "pending",
            CafeStatus::Verified => "verified",
            CafeStatus::Unknown => "unknown",
        }
    }
}

/// Result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// Closest first
    #[default]
    Distance,
    /// Highest trending score first
    Trending,
    /// Highest rating first
    Rating,
    /// Most recently registered first
    Newest,
}

impl SortBy {
    /// Parses a sort order name
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "distance" | "nearest" => Some(SortBy::Distance),
            "trending" => Some(SortBy::Trending),
            "rating" => Some(SortBy::Rating),
            "newest" => Some(SortBy::Newest),
            _ => None,
        }
    }

    /// Name used by the API's `sort_by` parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Distance => "distance",
            SortBy::Trending => "trending",
            SortBy::Rating => "rating",
            SortBy::Newest => "newest",
        }
    }

    /// Whether this order depends on rating fields the search payload omits
    pub fn needs_ratings(&self) -> bool {
        matches!(self, SortBy::Trending | SortBy::Rating)
    }
}

/// A café held by the spatial cache, stamped with its capture time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCafe {
    pub cafe: Cafe,
    /// When this record was written into the cache
    pub cached_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

impl NumberOrString {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            NumberOrString::Number(n) => Ok(n),
            NumberOrString::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid decimal: {}", s))),
        }
    }
}

fn de_degrees<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    NumberOrString::deserialize(deserializer)?.into_f64()
}

fn de_opt_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Option::<NumberOrString>::deserialize(deserializer)?
        .map(NumberOrString::into_f64)
        .transpose()
}

#[cfg(test)]
pub(crate) fn sample_cafe(id: &str, latitude: f64, longitude: f64) -> Cafe {
    Cafe {
        id: id.to_string(),
        name: format!("Cafe {}", id.to_uppercase()),
        slug: None,
        address: None,
        latitude,
        longitude,
        phone: None,
        website: None,
        description: None,
        status: CafeStatus::Verified,
        verification_count: 3,
        google_rating: None,
        average_rating: None,
        trending_score: None,
        created_at: None,
    }
}
