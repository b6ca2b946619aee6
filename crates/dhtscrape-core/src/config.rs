//! Configuration system for dhtscrape.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $DHTSCRAPE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/dhtscrape/config.toml
//!   3. ~/.config/dhtscrape/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Public IPFS bootstrap peers.
pub const DEFAULT_BOOTSTRAP_ADDRS: &[&str] = &[
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmQCU2EcMqAqQPR2i9bChDtGNJchTbq5TbXJJ16u19uLTa",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmbLHAnMoJPWSCR5Zhtx6BHJX9KiKNN6tpvbUcqanj75Nb",
    "/dnsaddr/bootstrap.libp2p.io/p2p/QmcZf59bWwK5XFi76CZX8cbJ4BhTzzA3gU1ZjYZcYW3dwt",
    "/ip4/104.131.131.82/tcp/4001/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
];

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DhtScrapeConfig {
    pub network: NetworkConfig,
    pub scrape: ScrapeConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Multiaddrs dialled at the start of every session.
    pub bootstrap_addrs: Vec<String>,
    /// Multiaddrs the host listens on.
    pub listen_addrs: Vec<String>,
    /// How long session setup waits for bootstrap dials to settle.
    pub bootstrap_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    /// Rounds per network session before a fresh host is created.
    pub total_rounds: u32,
    /// Sleep between rounds.
    pub round_interval_secs: u64,
    /// Closest-peer lookups per round, one random key each.
    pub total_keys: u32,
    /// Max lookups in flight at once.
    pub lookup_concurrency: u32,
    /// Per-lookup deadline.
    pub lookup_timeout_secs: u64,
    /// Idle time after a peer update before it is reported.
    pub quiet_period_ms: u64,
    pub debounce_policy: DebouncePolicy,
    /// Buffered observations per scrape stream.
    pub channel_capacity: usize,
    /// Delay before restarting a failed session. 0 = immediately.
    pub restart_backoff_ms: u64,
    /// Cap for the exponential restart delay.
    pub restart_backoff_max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// TCP port for the HTTP API.
    pub port: u16,
    /// Share one scrape between all HTTP consumers.
    pub aggregate: bool,
    /// Buffered observations per shared subscription.
    pub subscription_capacity: usize,
}

/// What a further update does to a pending debounce timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebouncePolicy {
    /// The first update arms the timer; later updates only replace the callback.
    #[default]
    Fixed,
    /// Every update pushes the deadline out by a full quiet period.
    Trailing,
}

impl std::str::FromStr for DebouncePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "trailing" => Ok(Self::Trailing),
            other => Err(format!("unknown debounce policy: {other}")),
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bootstrap_addrs: DEFAULT_BOOTSTRAP_ADDRS.iter().map(|s| s.to_string()).collect(),
            listen_addrs: vec![
                "/ip4/0.0.0.0/tcp/0".to_string(),
                "/ip4/0.0.0.0/udp/0/quic-v1".to_string(),
            ],
            bootstrap_timeout_secs: 10,
        }
    }
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            total_rounds: 15,
            round_interval_secs: 10,
            total_keys: 15,
            lookup_concurrency: 10,
            lookup_timeout_secs: 30,
            quiet_period_ms: 3_000,
            debounce_policy: DebouncePolicy::Fixed,
            channel_capacity: 5,
            restart_backoff_ms: 0,
            restart_backoff_max_ms: 30_000,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            aggregate: false,
            subscription_capacity: 500,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("dhtscrape")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl DhtScrapeConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = Self::load_file(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse the file at `path`, or defaults if it does not exist.
    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("DHTSCRAPE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&DhtScrapeConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply DHTSCRAPE_* overrides. `lookup` resolves a variable name.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("DHTSCRAPE_API__PORT") {
            if let Ok(p) = v.parse() {
                self.api.port = p;
            }
        }
        if let Some(v) = lookup("DHTSCRAPE_API__AGGREGATE") {
            self.api.aggregate = v == "true" || v == "1";
        }
        if let Some(v) = lookup("DHTSCRAPE_NETWORK__BOOTSTRAP_ADDRS") {
            self.network.bootstrap_addrs = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("DHTSCRAPE_SCRAPE__TOTAL_ROUNDS") {
            if let Ok(n) = v.parse() {
                self.scrape.total_rounds = n;
            }
        }
        if let Some(v) = lookup("DHTSCRAPE_SCRAPE__QUIET_PERIOD_MS") {
            if let Ok(ms) = v.parse() {
                self.scrape.quiet_period_ms = ms;
            }
        }
        if let Some(v) = lookup("DHTSCRAPE_SCRAPE__DEBOUNCE_POLICY") {
            if let Ok(policy) = v.parse() {
                self.scrape.debounce_policy = policy;
            }
        }
    }
}
