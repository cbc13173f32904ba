//! Spatial result cache for nearby-café searches
//!
//! This module provides a cache that remembers which map regions were already
//! searched and the cafés they returned, so follow-up searches inside a
//! fresh region skip the network. Snapshots are persisted to a key-value
//! store with a debounced background writer; storage failures are logged and
//! never reach the caller.

mod flush;
mod manager;
pub mod store;

pub use manager::{
    CacheStats, CoveredRegion, SnapshotError, SpatialCache, ENTITIES_KEY, REGIONS_KEY,
};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
