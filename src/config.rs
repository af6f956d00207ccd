//! Configuration loading from `.env` files.

use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use thiserror::Error;

use crate::{
    aggregator::DiscoveryConfig,
    event::is_hex64,
    pool::{normalize_relays, PoolOptions},
};

/// Discovery settings that are present but unusable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("CURATOR_PUBKEY must be 64 hex characters")]
    CuratorPubkey,
    #[error("CURATOR_RELAY must be a ws:// or wss:// URL")]
    CuratorRelay,
}

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory of the local event store.
    pub store_root: PathBuf,
    /// HTTP bind address, e.g. `127.0.0.1:7777`.
    pub bind_http: String,
    /// Verify event ids and signatures before storing.
    pub verify_sig: bool,
    pub curator_pubkey: String,
    pub curator_relay: String,
    /// Relays used for fan-out, live streams and fallback lookups.
    pub relays_general: Vec<String>,
    /// Optional Tor SOCKS proxy (host:port).
    pub tor_socks: Option<String>,
    pub query_timeout: Duration,
    pub stream_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_root = PathBuf::from(env::var("STORE_ROOT").context("STORE_ROOT not set")?);
        let bind_http = env::var("BIND_HTTP").context("BIND_HTTP not set")?;
        let verify_sig = env::var("VERIFY_SIG").unwrap_or_else(|_| "0".into()) == "1";
        let curator_pubkey = env::var("CURATOR_PUBKEY")
            .unwrap_or_default()
            .trim()
            .to_lowercase();
        let curator_relay = env::var("CURATOR_RELAY")
            .unwrap_or_default()
            .trim()
            .to_string();
        let relays_general = csv_strings(env::var("RELAYS_GENERAL").unwrap_or_default());
        let tor_socks = env::var("TOR_SOCKS").ok().filter(|s| !s.is_empty());
        Ok(Self {
            store_root,
            bind_http,
            verify_sig,
            curator_pubkey,
            curator_relay,
            relays_general,
            tor_socks,
            query_timeout: millis("QUERY_TIMEOUT_MS", 3000),
            stream_timeout: millis("STREAM_TIMEOUT_MS", 5000),
            connect_timeout: millis("CONNECT_TIMEOUT_MS", 5000),
        })
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            connect_timeout: self.connect_timeout,
            eose_timeout: self.stream_timeout,
            tor_socks: self.tor_socks.clone(),
        }
    }

    /// Curator identity and relays for the aggregator. Fails when the
    /// curator settings are missing or malformed.
    pub fn discovery(&self) -> Result<DiscoveryConfig, ConfigError> {
        if !is_hex64(&self.curator_pubkey) {
            return Err(ConfigError::CuratorPubkey);
        }
        let curator_relay = normalize_relays(&[self.curator_relay.clone()])
            .pop()
            .ok_or(ConfigError::CuratorRelay)?;
        Ok(DiscoveryConfig {
            curator_pubkey: self.curator_pubkey.clone(),
            curator_relay,
            general_relays: normalize_relays(&self.relays_general),
            query_timeout: self.query_timeout,
            stream_timeout: self.stream_timeout,
        })
    }
}

/// Read a millisecond duration, falling back to `default` when unset or
/// unparsable.
fn millis(var: &str, default: u64) -> Duration {
    let ms = env::var(var)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default);
    Duration::from_millis(ms)
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}
