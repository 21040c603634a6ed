use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::bluesky::client::{DEFAULT_PDS_HOST, DEFAULT_PLC_URL};
use crate::bluesky::session::DEFAULT_AUTH_FILE;
use crate::firehose::DEFAULT_RELAY_URL;
use crate::output::record::DEFAULT_WEB_HOST;

/// Records per `post_data_<n>.log` before rotating.
pub const DEFAULT_RECORDS_PER_FILE: u64 = 100_000;
pub const DEFAULT_SINK_BUFFER: usize = 1024;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded automatically at startup via dotenvy. CLI flags
/// cover per-run choices; everything here is deployment-level.
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay websocket for `com.atproto.sync.subscribeRepos`.
    pub relay_url: String,
    /// Host for session endpoints and authenticated profile reads.
    pub pds_host: String,
    pub plc_url: String,
    /// Host used in post permalinks.
    pub web_host: String,
    pub auth_file: PathBuf,
    /// Directory for `post_data_<n>.log` files.
    pub output_dir: PathBuf,
    pub records_per_file: u64,
    pub sink_buffer: usize,
    pub workers: usize,
    /// Concurrent repository snapshot fetches for like resolution.
    pub fetch_concurrency: usize,
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            pds_host: DEFAULT_PDS_HOST.to_string(),
            plc_url: DEFAULT_PLC_URL.to_string(),
            web_host: DEFAULT_WEB_HOST.to_string(),
            auth_file: PathBuf::from(DEFAULT_AUTH_FILE),
            output_dir: PathBuf::from("."),
            records_per_file: DEFAULT_RECORDS_PER_FILE,
            sink_buffer: DEFAULT_SINK_BUFFER,
            workers: DEFAULT_WORKERS,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Every variable is optional. Numbers that don't parse fall back to the
    /// default with a warning.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup (the environment, or a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let string = |key: &str, default: String| lookup(key).unwrap_or(default);

        let config = Self {
            relay_url: string("SKYHOSE_RELAY_URL", defaults.relay_url),
            pds_host: string("SKYHOSE_PDS_HOST", defaults.pds_host),
            plc_url: string("SKYHOSE_PLC_URL", defaults.plc_url),
            web_host: string("SKYHOSE_WEB_HOST", defaults.web_host),
            auth_file: lookup("SKYHOSE_AUTH_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.auth_file),
            output_dir: lookup("SKYHOSE_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            records_per_file: parse_or(
                &lookup,
                "SKYHOSE_RECORDS_PER_FILE",
                defaults.records_per_file,
            ),
            sink_buffer: parse_or(&lookup, "SKYHOSE_SINK_BUFFER", defaults.sink_buffer),
            workers: parse_or(&lookup, "SKYHOSE_WORKERS", defaults.workers),
            fetch_concurrency: parse_or(
                &lookup,
                "SKYHOSE_FETCH_CONCURRENCY",
                defaults.fetch_concurrency,
            ),
            http_timeout: Duration::from_secs(parse_or(
                &lookup,
                "SKYHOSE_HTTP_TIMEOUT_SECS",
                DEFAULT_HTTP_TIMEOUT_SECS,
            )),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would stall the pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.records_per_file == 0 {
            anyhow::bail!("SKYHOSE_RECORDS_PER_FILE must be at least 1");
        }
        if self.sink_buffer == 0 {
            anyhow::bail!("SKYHOSE_SINK_BUFFER must be at least 1");
        }
        if self.workers == 0 {
            anyhow::bail!("SKYHOSE_WORKERS must be at least 1");
        }
        if self.fetch_concurrency == 0 {
            anyhow::bail!("SKYHOSE_FETCH_CONCURRENCY must be at least 1");
        }
        if self.http_timeout.is_zero() {
            anyhow::bail!("SKYHOSE_HTTP_TIMEOUT_SECS must be at least 1");
        }
        Ok(())
    }
}

fn parse_or<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key = key, value = %raw, "Unparseable value, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.relay_url, DEFAULT_RELAY_URL);
        assert_eq!(config.auth_file, PathBuf::from("bsky.auth"));
        assert_eq!(config.records_per_file, 100_000);
        assert_eq!(config.workers, 4);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
    }

    #[test]
    fn overrides_are_read() {
        let config = load(&[
            ("SKYHOSE_WEB_HOST", "example.social"),
            ("SKYHOSE_WORKERS", "8"),
            ("SKYHOSE_OUTPUT_DIR", "/tmp/hose"),
        ])
        .unwrap();
        assert_eq!(config.web_host, "example.social");
        assert_eq!(config.workers, 8);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/hose"));
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let config = load(&[("SKYHOSE_SINK_BUFFER", "lots")]).unwrap();
        assert_eq!(config.sink_buffer, DEFAULT_SINK_BUFFER);
    }

    #[test]
    fn zero_counts_are_rejected() {
        let err = load(&[("SKYHOSE_WORKERS", "0")]).unwrap_err();
        assert!(err.to_string().contains("SKYHOSE_WORKERS"));
    }
}
