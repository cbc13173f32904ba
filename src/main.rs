//! IBeanThere café finder - find cafés near a point from the command line
//!
//! Searches go through a spatial cache persisted in the platform cache
//! directory, so repeated lookups inside an already searched area do not hit
//! the API until the cached results go stale.

use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use beanthere::cache::{CacheStats, FileStore, SpatialCache};
use beanthere::cli::{self, Cli, Command};
use beanthere::clock::{Clock, SystemClock};
use beanthere::config::{ApiConfig, CacheConfig};
use beanthere::data::{CachedCafe, CafeClient};
use beanthere::search::{CafeFinder, SearchOutcome};

/// Sets up logging to stderr; `RUST_LOG` overrides the `-v` level
fn init_tracing(verbose: u8) -> Result<(), Box<dyn Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli::log_level(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
}

/// Opens the cache described by `config`, falling back to memory only
fn open_cache(config: &CacheConfig) -> SpatialCache {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    if !config.persist {
        return SpatialCache::in_memory(config, clock);
    }

    let store = match &config.cache_dir {
        Some(dir) => Some(FileStore::with_dir(dir.clone())),
        None => FileStore::new(),
    };

    match store {
        Some(store) => SpatialCache::open(Arc::new(store), config, clock),
        None => {
            warn!("no cache directory available, cafe cache will not be persisted");
            SpatialCache::in_memory(config, clock)
        }
    }
}

fn rating_label(rating: Option<f64>) -> String {
    match rating {
        Some(r) => format!("★ {:.1}", r),
        None => "  -  ".to_string(),
    }
}

fn print_outcome(outcome: &SearchOutcome) {
    if outcome.cafes.is_empty() {
        println!("No cafés found");
    }
    for hit in &outcome.cafes {
        println!(
            "{:>7.0} m  {:<36} {}  {:?}",
            hit.distance_m,
            hit.cafe.name,
            rating_label(hit.cafe.rating()),
            hit.cafe.status
        );
    }
    println!(
        "{} cafés ({})",
        outcome.cafes.len(),
        if outcome.cache_hit {
            "from cache"
        } else {
            "from API"
        }
    );
}

fn print_cached(entries: &[CachedCafe]) {
    if entries.is_empty() {
        println!("No cached cafés");
        return;
    }
    for entry in entries {
        println!(
            "{:<36} {:>10.5}, {:>11.5}  cached {}",
            entry.cafe.name,
            entry.cafe.latitude,
            entry.cafe.longitude,
            entry.cached_at.format("%H:%M:%S")
        );
    }
}

fn print_stats(stats: &CacheStats) {
    println!(
        "Cached cafés:  {} ({} fresh, {} stale)",
        stats.total_cafes, stats.fresh_cafes, stats.stale_cafes
    );
    println!(
        "Regions:       {} ({} fresh)",
        stats.total_regions, stats.fresh_regions
    );
    println!("Fresh ratio:   {:.0}%", stats.fresh_ratio * 100.0);
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let cache_config = CacheConfig::from_cli(&cli);

    match &cli.command {
        Command::Search(args) => {
            let params = args.to_params()?;
            params.validate()?;

            let client = CafeClient::new(&ApiConfig::from_cli(&cli));
            let mut finder = CafeFinder::new(client, open_cache(&cache_config));
            let result = finder.search(&params).await;

            // Persist whatever was cached even if the search failed
            let cache = finder.into_cache();
            cache.flush().await;

            let outcome = result?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
        }
        Command::Cached(args) => {
            let location = args.location()?;
            let mut cache = open_cache(&cache_config);

            let mut entries = cache.entities();
            if let Some(point) = location {
                entries = SpatialCache::filter_by_distance(
                    &entries,
                    point.latitude,
                    point.longitude,
                    args.radius,
                );
            }
            entries.sort_by(|a, b| a.cafe.name.cmp(&b.cafe.name));
            cache.flush().await;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_cached(&entries);
            }
        }
        Command::Stats => {
            let cache = open_cache(&cache_config);
            print_stats(&cache.stats());
            cache.flush().await;
        }
        Command::Clear => {
            let mut cache = open_cache(&cache_config);
            cache.clear();
            cache.flush().await;
            println!("Cache cleared");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("warning: logging disabled: {}", e);
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
