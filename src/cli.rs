//! Command-line interface parsing for the café finder
//!
//! This module handles parsing of CLI arguments using clap and turns them
//! into search parameters and cache/API configuration.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use crate::config::{ApiConfig, CacheConfig, DEFAULT_API_URL, DEFAULT_TTL_MINUTES};
use crate::data::CafeStatus;
use crate::geo::Coordinates;
use crate::search::{SearchParams, SortBy, DEFAULT_RADIUS_M};

/// Error types for CLI argument parsing
#[derive(Debug, Error)]
pub enum CliError {
    /// The specified sort order is not recognized
    #[error("Invalid sort order: '{0}'. Valid orders: distance, trending, rating, newest")]
    InvalidSort(String),

    /// The specified status is not recognized
    #[error("Invalid status: '{0}'. Valid statuses: pending, verified")]
    InvalidStatus(String),

    /// Only some of --lat, --lng were given
    #[error("--lat and --lng must be given together")]
    IncompleteLocation,
}

/// IBeanThere café finder - search cafés near a point with a local cache
#[derive(Parser, Debug)]
#[command(name = "beanthere")]
#[command(about = "Find cafés nearby, with a cache that skips repeat lookups")]
#[command(version)]
pub struct Cli {
    /// Base URL of the IBeanThere API
    #[arg(long, global = true, env = "IBEANTHERE_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,

    /// Directory for the persisted cache (defaults to the platform cache dir)
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Minutes before cached results go stale
    #[arg(long, global = true, default_value_t = DEFAULT_TTL_MINUTES, value_parser = clap::value_parser!(u32).range(1..))]
    pub ttl_minutes: u32,

    /// Keep the cache in memory only for this run
    #[arg(long, global = true)]
    pub no_persist: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search cafés around a point
    ///
    /// Examples:
    ///   beanthere search --lat 43.4643 --lng -80.5204
    ///   beanthere search --lat 37.50 --lng 127.03 --radius 500 --sort rating
    Search(SearchArgs),
    /// List cafés currently held in the cache
    Cached(CachedArgs),
    /// Show cache statistics
    Stats,
    /// Remove all cached cafés and regions
    Clear,
}

/// Arguments of `beanthere search`
#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Latitude of the search center
    #[arg(long, allow_negative_numbers = true)]
    pub lat: f64,

    /// Longitude of the search center
    #[arg(long, allow_negative_numbers = true)]
    pub lng: f64,

    /// Search radius in whole meters (100 to 20000)
    #[arg(long, default_value_t = DEFAULT_RADIUS_M)]
    pub radius: u32,

    /// Sort order: distance, trending, rating, newest
    #[arg(long, default_value = "distance")]
    pub sort: String,

    /// Only show cafés rated at least this much
    #[arg(long, value_name = "RATING")]
    pub min_rating: Option<f64>,

    /// Only show cafés with this status: pending, verified
    #[arg(long)]
    pub status: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments of `beanthere cached`
#[derive(Args, Debug)]
pub struct CachedArgs {
    /// Restrict to cafés near this latitude (requires --lng)
    #[arg(long, allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Restrict to cafés near this longitude (requires --lat)
    #[arg(long, allow_negative_numbers = true)]
    pub lng: Option<f64>,

    /// Radius in meters around --lat/--lng
    #[arg(long, default_value_t = f64::from(DEFAULT_RADIUS_M))]
    pub radius: f64,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

/// Parses a sort order argument.
///
/// # Returns
/// * `Ok(SortBy)` if the string names a sort order
/// * `Err(CliError::InvalidSort)` otherwise
pub fn parse_sort_arg(s: &str) -> Result<SortBy, CliError> {
    SortBy::from_str(s).ok_or_else(|| CliError::InvalidSort(s.to_string()))
}

/// Parses a café status argument.
pub fn parse_status_arg(s: &str) -> Result<CafeStatus, CliError> {
    CafeStatus::from_str(s).ok_or_else(|| CliError::InvalidStatus(s.to_string()))
}

impl SearchArgs {
    /// Builds search parameters; ranges are checked later by the search itself
    pub fn to_params(&self) -> Result<SearchParams, CliError> {
        let mut params = SearchParams::new(self.lat, self.lng)
            .with_radius(self.radius)
            .with_sort(parse_sort_arg(&self.sort)?);
        if let Some(min) = self.min_rating {
            params = params.with_min_rating(min);
        }
        if let Some(status) = &self.status {
            params = params.with_status(parse_status_arg(status)?);
        }
        Ok(params)
    }
}

impl CachedArgs {
    /// The point to filter around, if one was given
    pub fn location(&self) -> Result<Option<Coordinates>, CliError> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Ok(Some(Coordinates::new(lat, lng))),
            (None, None) => Ok(None),
            _ => Err(CliError::IncompleteLocation),
        }
    }
}

impl CacheConfig {
    /// Creates a CacheConfig from parsed CLI arguments.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            ttl: chrono::Duration::minutes(i64::from(cli.ttl_minutes)),
            persist: !cli.no_persist,
            cache_dir: cli.cache_dir.clone(),
            ..Self::default()
        }
    }
}

impl ApiConfig {
    /// Creates an ApiConfig from parsed CLI arguments.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            base_url: cli.api_url.clone(),
            ..Self::default()
        }
    }
}

/// Log filter directive for a `-v` count
pub fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}
