//! Spatial cache manager for nearby-café search results
//!
//! Remembers which circular regions have already been fetched and the cafés
//! they returned. A new query whose circle lies entirely inside a fresh
//! region can be answered from memory instead of the API.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::flush::FlushHandle;
use super::store::{KeyValueStore, StoreError};
use crate::clock::Clock;
use crate::config::CacheConfig;
use crate::data::{Cafe, CachedCafe};
use crate::geo::{haversine_m, Coordinates};

/// Storage key holding the café index
pub const ENTITIES_KEY: &str = "ibeanthere.cafe_cache";

/// Storage key holding the covered region list
pub const REGIONS_KEY: &str = "ibeanthere.cafe_regions";

/// A circular area whose search results were fetched at `cached_at`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoveredRegion {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius of the fetched circle in meters
    pub radius_m: f64,
    pub cached_at: DateTime<Utc>,
}

impl CoveredRegion {
    pub fn center(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    /// Whether the circle (`center`, `radius_m`) lies entirely inside this region
    pub fn contains(&self, center: Coordinates, radius_m: f64) -> bool {
        haversine_m(self.center(), center) + radius_m <= self.radius_m
    }
}

/// Point-in-time counts for monitoring the cache
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_cafes: usize,
    pub fresh_cafes: usize,
    pub stale_cafes: usize,
    pub total_regions: usize,
    pub fresh_regions: usize,
    /// `fresh_cafes / total_cafes`, or 0 for an empty cache
    pub fresh_ratio: f64,
}

/// Errors reading or writing a persisted snapshot
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The stored JSON could not be encoded or decoded
    #[error("malformed cache snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Full copy of the cache contents as persisted
///
/// The index is stored as a flat array of `[id, entry]` pairs.
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
    pub(crate) entries: Vec<(String, CachedCafe)>,
    pub(crate) regions: Vec<CoveredRegion>,
}

impl Snapshot {
    pub(crate) fn save(&self, store: &dyn KeyValueStore) -> Result<(), SnapshotError> {
        let entries = serde_json::to_string(&self.entries)?;
        let regions = serde_json::to_string(&self.regions)?;
        store.set(ENTITIES_KEY, &entries)?;
        store.set(REGIONS_KEY, &regions)?;
        Ok(())
    }

    /// Reads both keys; `Ok(None)` when nothing was ever persisted
    ///
    /// Either key failing to parse rejects the whole snapshot.
    pub(crate) fn load(store: &dyn KeyValueStore) -> Result<Option<Self>, SnapshotError> {
        let entries = store.get(ENTITIES_KEY)?;
        let regions = store.get(REGIONS_KEY)?;
        if entries.is_none() && regions.is_none() {
            return Ok(None);
        }

        let entries = match entries {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        let regions = match regions {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };

        Ok(Some(Self { entries, regions }))
    }

    pub(crate) fn remove(store: &dyn KeyValueStore) -> Result<(), StoreError> {
        store.remove(ENTITIES_KEY)?;
        store.remove(REGIONS_KEY)
    }
}

/// In-memory spatial cache with optional debounced persistence
///
/// Cafés are keyed by id (latest write wins). Regions are kept in insertion
/// order and never merged. Both expire `ttl` after they were written: expired
/// cafés are dropped on the next [`entities`](Self::entities) read, expired
/// regions stop covering queries immediately.
pub struct SpatialCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: HashMap<String, CachedCafe>,
    regions: Vec<CoveredRegion>,
    flusher: Option<FlushHandle>,
}

impl fmt::Debug for SpatialCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.len())
            .field("regions", &self.regions.len())
            .field("persistent", &self.flusher.is_some())
            .finish()
    }
}

impl SpatialCache {
    /// Creates an empty cache that is never persisted
    pub fn in_memory(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: config.ttl,
            clock,
            entries: HashMap::new(),
            regions: Vec::new(),
            flusher: None,
        }
    }

    /// Creates a cache backed by `store`, restoring the last persisted snapshot
    ///
    /// A missing or malformed snapshot yields an empty cache. Expired records
    /// are dropped once on load. Persistence needs a tokio runtime; outside
    /// one the cache works in memory only.
    pub fn open(store: Arc<dyn KeyValueStore>, config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let mut cache = Self::in_memory(config, clock);

        match Snapshot::load(store.as_ref()) {
            Ok(Some(snapshot)) => cache.restore(snapshot),
            Ok(None) => debug!("no persisted cafe cache"),
            Err(e) => warn!(error = %e, "discarding unreadable cafe cache"),
        }

        if tokio::runtime::Handle::try_current().is_ok() {
            cache.flusher = Some(FlushHandle::spawn(store, config.debounce));
        } else {
            warn!("no async runtime, cafe cache will not be persisted");
        }

        // After the flusher is attached, so records pruned here leave disk too
        let removed = cache.cleanup_expired();
        info!(
            cafes = cache.entries.len(),
            regions = cache.regions.len(),
            removed,
            "loaded cafe cache"
        );

        cache
    }

    fn is_fresh(&self, now: DateTime<Utc>, cached_at: DateTime<Utc>) -> bool {
        now - cached_at < self.ttl
    }

    /// Returns every non-expired cached café
    ///
    /// Expired cafés found along the way are removed from the index.
    pub fn entities(&mut self) -> Vec<CachedCafe> {
        let now = self.clock.now();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| now - entry.cached_at < ttl);
        self.entries.values().cloned().collect()
    }

    /// Records the result of a completed fetch for (`center`, `radius_m`)
    ///
    /// Every café is inserted or overwritten with the current time, stale
    /// regions are pruned and the new region appended. The snapshot write is
    /// debounced and does not block.
    pub fn add_entities<I>(&mut self, cafes: I, center: Coordinates, radius_m: f64)
    where
        I: IntoIterator<Item = Cafe>,
    {
        let now = self.clock.now();

        let mut added = 0usize;
        for cafe in cafes {
            self.entries.insert(
                cafe.id.clone(),
                CachedCafe {
                    cafe,
                    cached_at: now,
                },
            );
            added += 1;
        }

        let ttl = self.ttl;
        self.regions.retain(|region| now - region.cached_at < ttl);
        self.regions.push(CoveredRegion {
            latitude: center.latitude,
            longitude: center.longitude,
            radius_m,
            cached_at: now,
        });

        debug!(
            added,
            lat = center.latitude,
            lng = center.longitude,
            radius_m,
            regions = self.regions.len(),
            "cached search region"
        );

        self.schedule_flush();
    }

    /// Whether a fresh region fully contains the circle (`lat`, `lng`, `radius_m`)
    ///
    /// Conservative: circles straddling a region edge report `false`.
    pub fn is_covered(&self, lat: f64, lng: f64, radius_m: f64) -> bool {
        let now = self.clock.now();
        let query = Coordinates::new(lat, lng);
        self.regions
            .iter()
            .any(|region| self.is_fresh(now, region.cached_at) && region.contains(query, radius_m))
    }

    /// Keeps the cafés within `radius_m` meters of (`lat`, `lng`)
    ///
    /// Pure; expiry is not checked.
    pub fn filter_by_distance(
        cafes: &[CachedCafe],
        lat: f64,
        lng: f64,
        radius_m: f64,
    ) -> Vec<CachedCafe> {
        let point = Coordinates::new(lat, lng);
        cafes
            .iter()
            .filter(|entry| haversine_m(point, entry.cafe.coordinates()) <= radius_m)
            .cloned()
            .collect()
    }

    /// Empties the cache and removes the persisted snapshot
    pub fn clear(&mut self) {
        self.entries.clear();
        self.regions.clear();
        if let Some(flusher) = &self.flusher {
            flusher.clear();
        }
        info!("cleared cafe cache");
    }

    /// Eagerly drops expired cafés and regions
    ///
    /// Returns the number of cafés removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let now = self.clock.now();
        let ttl = self.ttl;

        let before = self.entries.len();
        self.entries.retain(|_, entry| now - entry.cached_at < ttl);
        let removed = before - self.entries.len();

        let regions_before = self.regions.len();
        self.regions.retain(|region| now - region.cached_at < ttl);

        if removed > 0 || self.regions.len() != regions_before {
            self.schedule_flush();
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let total_cafes = self.entries.len();
        let fresh_cafes = self
            .entries
            .values()
            .filter(|entry| self.is_fresh(now, entry.cached_at))
            .count();
        let fresh_regions = self
            .regions
            .iter()
            .filter(|region| self.is_fresh(now, region.cached_at))
            .count();

        CacheStats {
            total_cafes,
            fresh_cafes,
            stale_cafes: total_cafes - fresh_cafes,
            total_regions: self.regions.len(),
            fresh_regions,
            fresh_ratio: if total_cafes > 0 {
                fresh_cafes as f64 / total_cafes as f64
            } else {
                0.0
            },
        }
    }

    /// Covered regions in insertion order, expired ones included
    pub fn regions(&self) -> &[CoveredRegion] {
        &self.regions
    }

    /// Waits for pending persistence work to finish
    ///
    /// Call before exiting so the last snapshot is not lost.
    pub async fn flush(&self) {
        if let Some(flusher) = &self.flusher {
            flusher.flush().await;
        }
    }

    fn schedule_flush(&self) {
        if let Some(flusher) = &self.flusher {
            flusher.schedule(self.snapshot());
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            entries: self
                .entries
                .iter()
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect(),
            regions: self.regions.clone(),
        }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.entries = snapshot.entries.into_iter().collect();
        self.regions = snapshot.regions;
    }
}
