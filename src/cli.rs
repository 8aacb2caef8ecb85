//! Command-line interface parsing for respcache
//!
//! This module handles parsing of CLI arguments using clap. The binary drives
//! a disk-backed [`ResponseCache`](crate::cache::ResponseCache) against an
//! HTTP origin.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;

/// Error types for CLI argument parsing
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CliError {
    /// The duration string could not be understood
    #[error("Invalid duration: '{0}'. Use seconds (90), or a number with s, m or h (90s, 5m, 2h)")]
    InvalidDuration(String),
}

/// respcache - fetch API responses through a local two-tier cache
#[derive(Parser, Debug)]
#[command(name = "respcache")]
#[command(about = "Client-side response cache with TTL, revalidation and offline fallback")]
#[command(version)]
pub struct Cli {
    /// Cache directory (defaults to RESPCACHE_DIR, then the XDG cache directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Fetch a key through the cache and write the payload to stdout
    ///
    /// Examples:
    ///   respcache get items --base-url https://api.example.com/v1
    ///   respcache get "items?page=2" --base-url https://api.example.com/v1 --ttl 5m
    Get {
        /// Resource key, appended to the base URL
        key: String,
        /// Origin the key is fetched from
        #[arg(long, value_name = "URL")]
        base_url: String,
        /// How long a cached copy is served without revalidation
        #[arg(long, value_name = "DURATION", value_parser = parse_duration_arg)]
        ttl: Option<Duration>,
        /// Request timeout
        #[arg(long, value_name = "DURATION", value_parser = parse_duration_arg)]
        timeout: Option<Duration>,
    },
    /// Remove a key (or, with --prefix, every key starting with it)
    Invalidate {
        key: String,
        #[arg(long)]
        prefix: bool,
    },
    /// Remove entries whose TTL has run out
    Purge,
    /// Remove every cached entry
    Clear,
    /// List cached keys
    Keys,
}

/// Parses durations such as `90`, `90s`, `5m` or `2h`
pub fn parse_duration_arg(s: &str) -> Result<Duration, CliError> {
    let s = s.trim();
    let invalid = || CliError::InvalidDuration(s.to_string());

    let (number, unit_secs) = match s.char_indices().last() {
        Some((i, 's')) => (&s[..i], 1),
        Some((i, 'm')) => (&s[..i], 60),
        Some((i, 'h')) => (&s[..i], 3600),
        Some(_) => (s, 1),
        None => return Err(invalid()),
    };
    let value: u64 = number.parse().map_err(|_| invalid())?;
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_arg_plain_seconds() {
        assert_eq!(parse_duration_arg("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration_arg("90s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_duration_arg_minutes_and_hours() {
        assert_eq!(parse_duration_arg("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration_arg("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn test_parse_duration_arg_invalid() {
        for bad in ["", "m", "ten", "5d", "-3s"] {
            let err = parse_duration_arg(bad).unwrap_err();
            assert!(err.to_string().contains("Invalid duration"), "{bad}");
        }
    }

    #[test]
    fn test_cli_parse_get() {
        let cli = Cli::parse_from([
            "respcache",
            "get",
            "items?page=2",
            "--base-url",
            "https://api.example.com",
            "--ttl",
            "1m",
        ]);
        assert_eq!(
            cli.command,
            Command::Get {
                key: "items?page=2".into(),
                base_url: "https://api.example.com".into(),
                ttl: Some(Duration::from_secs(60)),
                timeout: None,
            }
        );
        assert!(cli.dir.is_none());
    }

    #[test]
    fn test_cli_parse_invalidate_prefix_with_global_dir() {
        let cli = Cli::parse_from(["respcache", "invalidate", "items", "--prefix", "--dir", "/tmp/c"]);
        assert_eq!(
            cli.command,
            Command::Invalidate {
                key: "items".into(),
                prefix: true,
            }
        );
        assert_eq!(cli.dir, Some(PathBuf::from("/tmp/c")));
    }

    #[test]
    fn test_cli_rejects_bad_ttl() {
        let result = Cli::try_parse_from([
            "respcache",
            "get",
            "items",
            "--base-url",
            "http://localhost",
            "--ttl",
            "soon",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["respcache"]).is_err());
    }
}
