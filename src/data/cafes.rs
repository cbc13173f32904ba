//! IBeanThere café search API client
//!
//! Fetches cafés near a point from the backend's search endpoint. This is the
//! authoritative source the spatial cache sits in front of.

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use super::{Cafe, CafeStatus, SortBy};
use crate::config::ApiConfig;
use crate::geo::Coordinates;

/// Path of the nearby-café search endpoint
const SEARCH_PATH: &str = "/api/v1/cafes/search";

/// Errors that can occur when calling the café API
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("API returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    /// Failed to parse JSON response
    #[error("Failed to parse JSON response: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Search endpoint payload
#[derive(Debug, Deserialize)]
struct CafeSearchResponse {
    cafes: Vec<Cafe>,
    #[serde(default)]
    #[allow(dead_code)]
    total_count: usize,
}

/// Parameters of one call to the search endpoint
///
/// The endpoint takes the radius as whole meters, so it is kept as an integer
/// here; whatever region is recorded afterwards is exactly the one fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyQuery {
    pub center: Coordinates,
    pub radius_m: u32,
    /// Server-side ordering; omitted from the request when `Distance`
    pub sort_by: SortBy,
    /// Server-side rating filter
    pub min_rating: Option<f64>,
    /// Server-side status filter
    pub status: Option<CafeStatus>,
}

impl NearbyQuery {
    /// Every café in the circle, with no server-side filtering
    pub fn unfiltered(center: Coordinates, radius_m: u32) -> Self {
        Self {
            center,
            radius_m,
            sort_by: SortBy::Distance,
            min_rating: None,
            status: None,
        }
    }

    /// Whether the response holds the complete contents of the circle
    pub fn is_unfiltered(&self) -> bool {
        self.min_rating.is_none() && self.status.is_none()
    }

    /// Query string pairs in the form the endpoint expects
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("lat", self.center.latitude.to_string()),
            ("lng", self.center.longitude.to_string()),
            ("radius", self.radius_m.to_string()),
        ];
        if self.sort_by != SortBy::Distance {
            pairs.push(("sort_by", self.sort_by.as_str().to_string()));
        }
        if let Some(min) = self.min_rating {
            pairs.push(("min_rating", min.to_string()));
        }
        if let Some(status) = self.status {
            pairs.push(("status_filter", status.as_str().to_string()));
        }
        pairs
    }
}

/// Client for the café search endpoint
#[derive(Debug, Clone)]
pub struct CafeClient {
    client: Client,
    base_url: String,
}

impl Default for CafeClient {
    fn default() -> Self {
        Self::new(&ApiConfig::default())
    }
}

impl CafeClient {
    /// Create a new CafeClient from API settings
    pub fn new(config: &ApiConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(client, &config.base_url)
    }

    /// Create a new CafeClient with a custom HTTP client
    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Full URL of the search endpoint
    pub fn search_url(&self) -> String {
        format!("{}{}", self.base_url, SEARCH_PATH)
    }

    /// Fetch the cafés matching `query`
    ///
    /// # Returns
    /// * `Ok(Vec<Cafe>)` - Cafés in the circle, in the server's order
    /// * `Err(ApiError)` - If the request, the status or parsing fails
    pub async fn fetch_nearby(&self, query: &NearbyQuery) -> Result<Vec<Cafe>, ApiError> {
        debug!(
            lat = query.center.latitude,
            lng = query.center.longitude,
            radius = query.radius_m,
            sort_by = query.sort_by.as_str(),
            "requesting nearby cafés"
        );

        let response = self
            .client
            .get(self.search_url())
            .query(&query.query_pairs())
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ApiError::BadStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_search_response(&text)
    }
}

/// Parses the body of a search response
pub(crate) fn parse_search_response(text: &str) -> Result<Vec<Cafe>, ApiError> {
    let response: CafeSearchResponse = serde_json::from_str(text)?;
    Ok(response.cafes)
}
