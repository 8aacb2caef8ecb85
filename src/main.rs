//! respcache - fetch API responses through a local two-tier cache
//!
//! Serves payloads from the cache while they are fresh, revalidates them with
//! the origin once they expire, and falls back to the last stored copy when
//! the origin cannot be reached.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use respcache::cache::{CacheStatus, CacheTier, DiskStore, ResponseCache};
use respcache::cli::{Cli, Command};
use respcache::config::CacheConfig;
use respcache::fetch::SharedFetcher;
use respcache::http::{HttpFetcher, DEFAULT_TIMEOUT};

/// Installs a stderr logger honouring `RUST_LOG`
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("respcache=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = CacheConfig::from_env();
    if let Some(dir) = cli.dir {
        config = config.with_dir(dir);
    }
    let dir = config
        .resolve_dir()
        .ok_or("No cache directory: pass --dir or set RESPCACHE_DIR")?;
    let store = Arc::new(DiskStore::open(&dir, config.disk_limits)?);

    match cli.command {
        Command::Get {
            key,
            base_url,
            ttl,
            timeout,
        } => {
            let ttl = ttl.unwrap_or_else(|| config.ttl.ttl_for(&key));
            let fetcher: SharedFetcher = Arc::new(HttpFetcher::with_timeout(
                base_url,
                timeout.unwrap_or(DEFAULT_TIMEOUT),
            )?);
            let cache = ResponseCache::open(config, store);

            let response = cache.fetch(&key, ttl, &fetcher).await?;
            io::stdout().write_all(&response.payload)?;
            io::stdout().flush()?;

            let label = match response.status {
                CacheStatus::Fresh => "fresh",
                CacheStatus::Revalidated => "revalidated",
                CacheStatus::Degraded => "stale (origin unavailable)",
            };
            eprintln!("{} via {:?}, stored at {}", label, response.origin, response.stored_at);
            cache.close().await;
        }
        Command::Invalidate { key, prefix } => {
            let cache = ResponseCache::open(config, store);
            if prefix {
                let count = cache.invalidate_prefix(&key)?;
                eprintln!("Invalidated {} entries", count);
            } else {
                cache.invalidate(&key)?;
                eprintln!("Invalidated '{}'", key);
            }
        }
        Command::Purge => {
            let cache = ResponseCache::open(config, store);
            let count = cache.purge_expired()?;
            eprintln!("Purged {} expired entries", count);
        }
        Command::Clear => {
            let cache = ResponseCache::open(config, store);
            cache.invalidate_all()?;
            eprintln!("Cleared cache at {}", dir.display());
        }
        Command::Keys => {
            let mut keys = store.keys()?;
            keys.sort();
            let mut stdout = io::stdout().lock();
            for key in keys {
                writeln!(stdout, "{}", key)?;
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
