//! Runtime configuration for the cache and the API client
//!
//! Defaults live here; the command line and the environment override them
//! (see [`crate::cli`]).

use std::path::PathBuf;
use std::time::Duration;

/// Default base URL of the IBeanThere API
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default lifetime of cached cafés and covered regions, in minutes
pub const DEFAULT_TTL_MINUTES: u32 = 5;

/// Configuration for the spatial cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long cached cafés and covered regions stay fresh
    pub ttl: chrono::Duration,
    /// Quiet period before a pending snapshot is written to storage
    pub debounce: Duration,
    /// Whether snapshots are persisted at all
    pub persist: bool,
    /// Override for the storage directory (platform cache dir when `None`)
    pub cache_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: chrono::Duration::minutes(i64::from(DEFAULT_TTL_MINUTES)),
            debounce: Duration::from_millis(500),
            persist: true,
            cache_dir: None,
        }
    }
}

/// Configuration for the remote café API
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl, chrono::Duration::minutes(5));
        assert_eq!(config.debounce, Duration::from_millis(500));
        assert!(config.persist);
        assert!(config.cache_dir.is_none());
    }

    #[test]
    fn test_api_config_default() {
        let config = ApiConfig::default();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.timeout, Duration::from_secs(10));
    }
}
