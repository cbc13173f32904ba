//! Nearby-café search on top of the spatial cache
//!
//! [`CafeFinder`] drives the per-query flow: if the requested circle is
//! already covered, the answer comes from the cache; otherwise the café
//! source is queried and the result recorded as a new covered region. A
//! failed fetch leaves the cache untouched so the next search retries.
//!
//! The search payload carries no ratings or trending score, so a rating
//! filter or a rating/trending order is always delegated to the server and
//! the filtered answer is never cached. Status filtering and the distance and
//! newest orders work on fields the payload has and are applied locally, so
//! the cache always holds the unfiltered contents of a region.

use std::cmp::Ordering;
use std::future::Future;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::SpatialCache;
use crate::data::{ApiError, Cafe, CafeClient, CafeStatus, NearbyQuery};
use crate::geo::{haversine_m, Coordinates};

pub use crate::data::SortBy;

/// Smallest search radius the API accepts, in meters
pub const MIN_RADIUS_M: u32 = 100;

/// Largest search radius the API accepts, in meters
pub const MAX_RADIUS_M: u32 = 20_000;

/// Radius used when none is given, in meters
pub const DEFAULT_RADIUS_M: u32 = 2_000;

/// Errors that can occur during a search
#[derive(Debug, Error)]
pub enum SearchError {
    /// Search parameters out of range
    #[error("Invalid search parameters: {0}")]
    InvalidParams(String),

    /// The remote source failed; nothing was cached
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Parameters of a nearby search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub center: Coordinates,
    /// Whole meters, as the API takes them
    pub radius_m: u32,
    pub sort_by: SortBy,
    /// Cafés rated below this are dropped by the server; unrated cafés count as 0
    pub min_rating: Option<f64>,
    pub status: Option<CafeStatus>,
}

impl SearchParams {
    /// Distance-sorted, unfiltered search of the default radius
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            center: Coordinates::new(lat, lng),
            radius_m: DEFAULT_RADIUS_M,
            sort_by: SortBy::default(),
            min_rating: None,
            status: None,
        }
    }

    pub fn with_radius(mut self, radius_m: u32) -> Self {
        self.radius_m = radius_m;
        self
    }

    pub fn with_sort(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn with_min_rating(mut self, min_rating: f64) -> Self {
        self.min_rating = Some(min_rating);
        self
    }

    pub fn with_status(mut self, status: CafeStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether the answer depends on rating fields only the server sees
    pub fn needs_server_ranking(&self) -> bool {
        self.min_rating.is_some() || self.sort_by.needs_ratings()
    }

    /// The request sent to the API for these parameters
    ///
    /// Cacheable searches fetch the whole circle; searches that need
    /// server-side ranking carry their sort order and filters.
    pub fn to_query(&self) -> NearbyQuery {
        if self.needs_server_ranking() {
            NearbyQuery {
                center: self.center,
                radius_m: self.radius_m,
                sort_by: self.sort_by,
                min_rating: self.min_rating,
                status: self.status,
            }
        } else {
            NearbyQuery::unfiltered(self.center, self.radius_m)
        }
    }

    /// Checks the ranges the API enforces
    pub fn validate(&self) -> Result<(), SearchError> {
        let Coordinates {
            latitude,
            longitude,
        } = self.center;

        if !(-90.0..=90.0).contains(&latitude) {
            return Err(SearchError::InvalidParams(format!(
                "latitude {} must be between -90 and 90",
                latitude
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(SearchError::InvalidParams(format!(
                "longitude {} must be between -180 and 180",
                longitude
            )));
        }
        if !(MIN_RADIUS_M..=MAX_RADIUS_M).contains(&self.radius_m) {
            return Err(SearchError::InvalidParams(format!(
                "radius {} m must be between {} and {} m",
                self.radius_m, MIN_RADIUS_M, MAX_RADIUS_M
            )));
        }
        if let Some(min) = self.min_rating {
            if !(0.0..=5.0).contains(&min) {
                return Err(SearchError::InvalidParams(format!(
                    "minimum rating {} must be between 0 and 5",
                    min
                )));
            }
        }
        Ok(())
    }
}

/// A café in a search result with its distance from the search center
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyCafe {
    pub cafe: Cafe,
    pub distance_m: f64,
}

/// Outcome of a search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub cafes: Vec<NearbyCafe>,
    /// Whether the answer was served without a remote call
    pub cache_hit: bool,
}

/// The authoritative source of café data
pub trait CafeSource {
    /// Fetches the cafés matching `query`
    fn fetch_nearby(
        &self,
        query: &NearbyQuery,
    ) -> impl Future<Output = Result<Vec<Cafe>, ApiError>> + Send;
}

impl CafeSource for CafeClient {
    fn fetch_nearby(
        &self,
        query: &NearbyQuery,
    ) -> impl Future<Output = Result<Vec<Cafe>, ApiError>> + Send {
        CafeClient::fetch_nearby(self, query)
    }
}

/// Cache-first café search
#[derive(Debug)]
pub struct CafeFinder<S> {
    source: S,
    cache: SpatialCache,
}

impl<S: CafeSource> CafeFinder<S> {
    pub fn new(source: S, cache: SpatialCache) -> Self {
        Self { source, cache }
    }

    pub fn cache(&self) -> &SpatialCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut SpatialCache {
        &mut self.cache
    }

    /// Gives back the cache, e.g. to flush it before exit
    pub fn into_cache(self) -> SpatialCache {
        self.cache
    }

    /// Finds cafés matching `params`, from the cache when the area is covered
    pub async fn search(&mut self, params: &SearchParams) -> Result<SearchOutcome, SearchError> {
        params.validate()?;

        let Coordinates {
            latitude,
            longitude,
        } = params.center;
        let radius_m = f64::from(params.radius_m);
        let server_ranked = params.needs_server_ranking();

        if !server_ranked && self.cache.is_covered(latitude, longitude, radius_m) {
            let cached = self.cache.entities();
            let nearby = SpatialCache::filter_by_distance(&cached, latitude, longitude, radius_m);
            debug!(cafes = nearby.len(), "search served from cache");

            let cafes = nearby.into_iter().map(|entry| entry.cafe).collect();
            return Ok(SearchOutcome {
                cafes: rank(cafes, params),
                cache_hit: true,
            });
        }

        let query = params.to_query();
        let fetched = self.source.fetch_nearby(&query).await?;
        info!(
            cafes = fetched.len(),
            lat = latitude,
            lng = longitude,
            radius_m = query.radius_m,
            server_ranked,
            "fetched cafés from API"
        );

        if query.is_unfiltered() {
            self.cache
                .add_entities(fetched.clone(), query.center, f64::from(query.radius_m));
        }

        Ok(SearchOutcome {
            cafes: rank(fetched, params),
            cache_hit: false,
        })
    }
}

/// Applies the distance bound, status filter and sort order of `params`
///
/// The rating filter is left to the server. A missing score counts as 0, so
/// a server-ranked list without scores keeps the server's order.
pub fn rank(cafes: Vec<Cafe>, params: &SearchParams) -> Vec<NearbyCafe> {
    let radius_m = f64::from(params.radius_m);

    let mut nearby: Vec<NearbyCafe> = cafes
        .into_iter()
        .filter_map(|cafe| {
            let distance_m = haversine_m(params.center, cafe.coordinates());
            (distance_m <= radius_m).then_some(NearbyCafe { cafe, distance_m })
        })
        .filter(|hit| match params.status {
            Some(status) => hit.cafe.status == status,
            None => true,
        })
        .collect();

    // Stable sort: ties keep the incoming order
    match params.sort_by {
        SortBy::Distance => nearby.sort_by(|a, b| a.distance_m.total_cmp(&b.distance_m)),
        SortBy::Trending => nearby.sort_by(|a, b| {
            descending(a.cafe.trending_score.unwrap_or(0.0), b.cafe.trending_score.unwrap_or(0.0))
        }),
        SortBy::Rating => nearby.sort_by(|a, b| {
            descending(a.cafe.rating().unwrap_or(0.0), b.cafe.rating().unwrap_or(0.0))
        }),
        SortBy::Newest => nearby.sort_by(|a, b| b.cafe.created_at.cmp(&a.cafe.created_at)),
    }

    nearby
}

fn descending(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::CacheConfig;
    use crate::data::sample_cafe;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::{Arc, Mutex};

    /// Serves a fixed list of cafés, counting calls and recording queries
    struct FakeSource {
        cafes: Vec<Cafe>,
        calls: Arc<AtomicUsize>,
        queries: Mutex<Vec<NearbyQuery>>,
        fail: bool,
    }

    impl CafeSource for FakeSource {
        fn fetch_nearby(
            &self,
            query: &NearbyQuery,
        ) -> impl Future<Output = Result<Vec<Cafe>, ApiError>> + Send {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            self.queries.lock().unwrap().push(query.clone());
            let result = if self.fail {
                Err(ApiError::BadStatus {
                    status: 500,
                    body: "Failed to search cafes".to_string(),
                })
            } else {
                Ok(self.cafes.clone())
            };
            async move { result }
        }
    }

    fn finder_with(cafes: Vec<Cafe>, fail: bool) -> (CafeFinder<FakeSource>, Arc<AtomicUsize>, ManualClock) {
        let calls = Arc::new(AtomicUsize::new(0));
        let clock = ManualClock::new(Utc::now());
        let cache = SpatialCache::in_memory(&CacheConfig::default(), Arc::new(clock.clone()));
        let source = FakeSource {
            cafes,
            calls: calls.clone(),
            queries: Mutex::new(Vec::new()),
            fail,
        };
        (CafeFinder::new(source, cache), calls, clock)
    }

    fn waterloo_cafes() -> Vec<Cafe> {
        let mut a = sample_cafe("a", 43.4643, -80.5204);
        a.google_rating = Some(4.6);
        a.trending_score = Some(12.0);
        a.created_at = Some(Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap());

        let mut b = sample_cafe("b", 43.4700, -80.5204);
        b.average_rating = Some(3.9);
        b.trending_score = Some(30.0);
        b.status = CafeStatus::Pending;
        b.created_at = Some(Utc.with_ymd_and_hms(2025, 3, 2, 9, 0, 0).unwrap());

        let mut c = sample_cafe("c", 43.4660, -80.5230);
        c.google_rating = Some(4.1);
        c.created_at = Some(Utc.with_ymd_and_hms(2024, 11, 20, 9, 0, 0).unwrap());

        vec![a, b, c]
    }

    fn ids(outcome: &SearchOutcome) -> Vec<&str> {
        outcome.cafes.iter().map(|hit| hit.cafe.id.as_str()).collect()
    }

    /// Cafés in the shape the backend search returns: no ratings or trending
    /// score, already filtered and ordered by the server
    fn backend_payload() -> Vec<Cafe> {
        let body = r#"{
            "cafes": [
                {"id": "c", "name": "Cafe C", "latitude": "43.4660", "longitude": "-80.5230",
                 "status": "verified", "verification_count": 5, "vanguard_ids": []},
                {"id": "a", "name": "Cafe A", "latitude": "43.4643", "longitude": "-80.5204",
                 "status": "verified", "verification_count": 3, "vanguard_ids": []}
            ],
            "total_count": 2
        }"#;
        crate::data::cafes::parse_search_response(body).expect("backend payload parses")
    }

    #[tokio::test]
    async fn test_first_search_fetches_then_cache_serves() {
        let (mut finder, calls, _clock) = finder_with(waterloo_cafes(), false);
        let params = SearchParams::new(43.4643, -80.5204).with_radius(2000);

        let first = finder.search(&params).await.expect("first search");
        assert!(!first.cache_hit);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);

        let smaller = SearchParams::new(43.4643, -80.5204).with_radius(1000);
        let second = finder.search(&smaller).await.expect("second search");
        assert!(second.cache_hit);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(second.cafes.len(), 3);
    }

    #[tokio::test]
    async fn test_larger_radius_refetches() {
        let (mut finder, calls, _clock) = finder_with(waterloo_cafes(), false);

        finder
            .search(&SearchParams::new(43.4643, -80.5204).with_radius(500))
            .await
            .unwrap();
        let outcome = finder
            .search(&SearchParams::new(43.4643, -80.5204).with_radius(1500))
            .await
            .unwrap();

        assert!(!outcome.cache_hit);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_region_refetches() {
        let (mut finder, calls, clock) = finder_with(waterloo_cafes(), false);
        let params = SearchParams::new(43.4643, -80.5204);

        finder.search(&params).await.unwrap();
        clock.advance(Duration::minutes(5));
        let outcome = finder.search(&params).await.unwrap();

        assert!(!outcome.cache_hit);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_region_uncovered() {
        let (mut finder, calls, _clock) = finder_with(Vec::new(), true);
        let params = SearchParams::new(43.4643, -80.5204);

        let result = finder.search(&params).await;
        assert!(matches!(result, Err(SearchError::Api(_))));
        assert!(!finder.cache().is_covered(43.4643, -80.5204, 2000.0));

        let _ = finder.search(&params).await;
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_params_never_reach_source() {
        let (mut finder, calls, _clock) = finder_with(waterloo_cafes(), false);

        let result = finder.search(&SearchParams::new(91.0, 0.0)).await;

        assert!(matches!(result, Err(SearchError::InvalidParams(_))));
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_status_filter_is_served_from_cache() {
        let (mut finder, calls, _clock) = finder_with(waterloo_cafes(), false);
        finder
            .search(&SearchParams::new(43.4643, -80.5204))
            .await
            .unwrap();

        let verified = finder
            .search(&SearchParams::new(43.4643, -80.5204).with_status(CafeStatus::Verified))
            .await
            .unwrap();
        assert!(verified.cache_hit);
        assert_eq!(ids(&verified), vec!["a", "c"]);

        let newest = finder
            .search(&SearchParams::new(43.4643, -80.5204).with_sort(SortBy::Newest))
            .await
            .unwrap();
        assert!(newest.cache_hit);
        assert_eq!(ids(&newest), vec!["b", "a", "c"]);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_region_matches_fetched_radius() {
        let (mut finder, _calls, _clock) = finder_with(waterloo_cafes(), false);

        finder
            .search(&SearchParams::new(37.5, 127.03).with_radius(150))
            .await
            .unwrap();

        let sent = finder.source.queries.lock().unwrap()[0].radius_m;
        assert_eq!(sent, 150);
        assert_eq!(finder.cache().regions()[0].radius_m, f64::from(sent));
        assert!(finder.cache().is_covered(37.5, 127.03, 150.0));
        assert!(!finder.cache().is_covered(37.5, 127.03, 150.4));
    }

    #[tokio::test]
    async fn test_min_rating_is_delegated_to_server() {
        let (mut finder, calls, _clock) = finder_with(backend_payload(), false);
        finder
            .search(&SearchParams::new(43.4643, -80.5204))
            .await
            .unwrap();

        let params = SearchParams::new(43.4643, -80.5204).with_min_rating(4.0);
        let rated = finder.search(&params).await.unwrap();

        // Covered area, but the payload has no ratings to filter on
        assert!(!rated.cache_hit);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
        assert_eq!(ids(&rated), vec!["a", "c"]);

        let queries = finder.source.queries.lock().unwrap();
        assert!(queries[0].is_unfiltered());
        assert_eq!(queries[1].min_rating, Some(4.0));
        assert_eq!(finder.cache().regions().len(), 1);
    }

    #[tokio::test]
    async fn test_rating_sort_keeps_server_order() {
        let (mut finder, _calls, _clock) = finder_with(backend_payload(), false);

        let outcome = finder
            .search(&SearchParams::new(43.4643, -80.5204).with_sort(SortBy::Rating))
            .await
            .unwrap();

        assert_eq!(ids(&outcome), vec!["c", "a"]);
        let queries = finder.source.queries.lock().unwrap();
        assert_eq!(queries[0].sort_by, SortBy::Rating);
        // No filter was sent, so the whole circle came back and is cached
        assert!(queries[0].is_unfiltered());
        assert_eq!(finder.cache().regions().len(), 1);
    }

    #[test]
    fn test_to_query_carries_filters_only_when_server_ranked() {
        let plain = SearchParams::new(1.0, 2.0)
            .with_status(CafeStatus::Verified)
            .to_query();
        assert_eq!(plain, NearbyQuery::unfiltered(Coordinates::new(1.0, 2.0), 2000));

        let ranked = SearchParams::new(1.0, 2.0)
            .with_sort(SortBy::Trending)
            .with_status(CafeStatus::Verified)
            .to_query();
        assert_eq!(ranked.sort_by, SortBy::Trending);
        assert_eq!(ranked.status, Some(CafeStatus::Verified));
    }

    #[test]
    fn test_rank_keeps_cafes_across_antimeridian() {
        let cafes = vec![sample_cafe("east", 0.0, 179.999), sample_cafe("far", 0.0, 178.0)];

        let hits = rank(cafes, &SearchParams::new(0.0, -179.999).with_radius(1000));

        let found: Vec<&str> = hits.iter().map(|h| h.cafe.id.as_str()).collect();
        assert_eq!(found, vec!["east"]);
    }

    #[test]
    fn test_rank_sort_orders() {
        let base = SearchParams::new(43.4643, -80.5204);

        let by_distance = rank(waterloo_cafes(), &base);
        let order: Vec<&str> = by_distance.iter().map(|h| h.cafe.id.as_str()).collect();
        assert_eq!(order, vec!["a", "c", "b"]);
        assert_eq!(by_distance[0].distance_m, 0.0);

        let by_trending = rank(waterloo_cafes(), &base.clone().with_sort(SortBy::Trending));
        let order: Vec<&str> = by_trending.iter().map(|h| h.cafe.id.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);

        let by_rating = rank(waterloo_cafes(), &base.clone().with_sort(SortBy::Rating));
        let order: Vec<&str> = by_rating.iter().map(|h| h.cafe.id.as_str()).collect();
        assert_eq!(order, vec!["a", "c", "b"]);

        let by_newest = rank(waterloo_cafes(), &base.with_sort(SortBy::Newest));
        let order: Vec<&str> = by_newest.iter().map(|h| h.cafe.id.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_rank_drops_cafes_outside_radius() {
        let mut cafes = waterloo_cafes();
        cafes.push(sample_cafe("far", 43.5500, -80.5204));

        let hits = rank(cafes, &SearchParams::new(43.4643, -80.5204).with_radius(1000));

        assert!(hits.iter().all(|h| h.distance_m <= 1000.0));
        assert!(!hits.iter().any(|h| h.cafe.id == "far"));
    }

    #[test]
    fn test_validate_ranges() {
        assert!(SearchParams::new(0.0, 0.0).validate().is_ok());
        assert!(SearchParams::new(-90.0, 180.0).validate().is_ok());
        assert!(SearchParams::new(0.0, -180.5).validate().is_err());
        assert!(SearchParams::new(0.0, 0.0).with_radius(99).validate().is_err());
        assert!(SearchParams::new(0.0, 0.0).with_radius(20_001).validate().is_err());
        assert!(SearchParams::new(0.0, 0.0).with_min_rating(5.5).validate().is_err());

        let err = SearchParams::new(95.0, 0.0).validate().unwrap_err();
        assert!(err.to_string().contains("latitude"));
    }

    #[test]
    fn test_sort_by_from_str() {
        assert_eq!(SortBy::from_str("distance"), Some(SortBy::Distance));
        assert_eq!(SortBy::from_str("Trending"), Some(SortBy::Trending));
        assert_eq!(SortBy::from_str("rating"), Some(SortBy::Rating));
        assert_eq!(SortBy::from_str("newest"), Some(SortBy::Newest));
        assert_eq!(SortBy::from_str("random"), None);
    }
}
