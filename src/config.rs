//! Configuration Module
//!
//! Loads node and balancer configuration from a TOML file, with a few
//! environment variable overrides applied on top.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Cluster configuration. Every section is optional in the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub replica: ReplicaConfig,
    #[serde(default)]
    pub balancer: BalancerConfig,
    #[serde(default)]
    pub aof: AofConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Where the master listens; replicas and the balancer use the same values
/// to find it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterConfig {
    #[serde(default = "default_master_address")]
    pub address: String,
    /// Replication listener port
    #[serde(default = "default_master_port")]
    pub port: u16,
    #[serde(default = "default_master_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    #[serde(default = "default_replica_http_port")]
    pub http_port: u16,
    /// Delay between attempts to reach the master
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalancerConfig {
    #[serde(default = "default_balancer_port")]
    pub port: u16,
    /// Replica HTTP addresses (`host:port`) that serve reads
    #[serde(default)]
    pub replicas: Vec<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Append-only log settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AofConfig {
    #[serde(default = "default_aof_path")]
    pub path: PathBuf,
    /// How often the log is forced to disk
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Capacity before least recently used entries are evicted; 0 is unbounded
    #[serde(default)]
    pub max_entries: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            address: default_master_address(),
            port: default_master_port(),
            http_port: default_master_http_port(),
        }
    }
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            http_port: default_replica_http_port(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            port: default_balancer_port(),
            replicas: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for AofConfig {
    fn default() -> Self {
        Self {
            path: default_aof_path(),
            sync_interval_secs: default_sync_interval_secs(),
        }
    }
}

fn default_master_address() -> String {
    "127.0.0.1".to_string()
}

fn default_master_port() -> u16 {
    7070
}

fn default_master_http_port() -> u16 {
    8081
}

fn default_replica_http_port() -> u16 {
    8082
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_balancer_port() -> u16 {
    8888
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_aof_path() -> PathBuf {
    PathBuf::from("tmp/aof.log")
}

fn default_sync_interval_secs() -> u64 {
    60
}

impl Config {
    /// Loads the file at `path` if given, otherwise the defaults, then
    /// applies environment overrides.
    ///
    /// # Environment Variables
    /// - `CACHE_AOF_PATH` - Append-only log location
    /// - `CACHE_MASTER_ADDRESS` - Host of the master node
    /// - `CACHE_HTTP_PORT` - HTTP port for the node being started
    /// - `CACHE_MAX_ENTRIES` - Capacity before LRU eviction
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| env::var(name).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CacheError::Config(e.to_string()))
    }

    /// Applies overrides from `lookup`. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("CACHE_AOF_PATH") {
            self.aof.path = PathBuf::from(path);
        }
        if let Some(address) = lookup("CACHE_MASTER_ADDRESS") {
            self.master.address = address;
        }
        if let Some(port) = lookup("CACHE_HTTP_PORT").and_then(|v| v.parse().ok()) {
            self.master.http_port = port;
            self.replica.http_port = port;
        }
        if let Some(max) = lookup("CACHE_MAX_ENTRIES").and_then(|v| v.parse().ok()) {
            self.cache.max_entries = max;
        }
    }

    /// Address replicas dial for replication.
    pub fn replication_addr(&self) -> String {
        format!("{}:{}", self.master.address, self.master.port)
    }

    /// Address of the master's HTTP API.
    pub fn master_http_addr(&self) -> String {
        format!("{}:{}", self.master.address, self.master.http_port)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.replica.retry_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.balancer.request_timeout_secs)
    }
}
