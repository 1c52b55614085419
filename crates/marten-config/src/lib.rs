//! # Marten configuration
//!
//! Configuration model for the marten DNS forwarder: the serde-backed file
//! format, hosts and resolv.conf parsing, listen-spec parsing, and assembly
//! of the immutable [`Snapshot`] the resolver engine reads.
//!
//! A snapshot is built from disk at startup and again on every reload; the
//! tables inside it are never mutated after publication.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod hosts;
pub mod listeners;
pub mod resolv;

pub use hosts::HostTables;
pub use listeners::{ListenProtocol, ListenSpec};

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("file not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid listen spec: {0}")]
    InvalidListen(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid hosts entry at line {line}: {text}")]
    InvalidHostsLine { line: usize, text: String },

    #[error("no usable upstream nameservers after merging and filtering")]
    NoUpstreams,

    #[error("validation error: {0}")]
    Validation(String),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main configuration for the marten forwarder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// PID file location, written on startup and removed on clean shutdown.
    pub pid_file: Option<PathBuf>,

    /// Listen endpoints, `<net>://<addr>` with `net ∈ {udp, tcp}`
    /// (default udp) and the port defaulting to 53. At least one required.
    pub listens: Vec<String>,

    /// Per-step timeout of the upstream race, in milliseconds.
    pub timeout_ms: u64,

    /// resolv.conf-format files contributing upstream nameservers.
    pub resolv_files: Vec<PathBuf>,

    /// Upstream nameservers given directly, `host[:port]`.
    pub nameservers: Vec<String>,

    /// Hosts-format files contributing static overrides.
    pub hosts_files: Vec<PathBuf>,

    /// Inline hosts entries, appended after all hosts files.
    pub hosts: Vec<String>,

    /// Response cache sizing.
    pub cache: CacheConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pid_file: None,
            listens: vec![
                "udp://127.0.0.1:53".to_string(),
                "tcp://127.0.0.1:53".to_string(),
            ],
            timeout_ms: 1000,
            resolv_files: vec![PathBuf::from("/etc/resolv.conf")],
            nameservers: Vec::new(),
            hosts_files: vec![PathBuf::from("/etc/hosts")],
            hosts: Vec::new(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Response cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum cached responses. Zero disables caching.
    pub capacity: usize,

    /// Uniform lifetime of every cache entry, in seconds.
    pub lifetime_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            lifetime_secs: 300,
        }
    }
}

impl CacheConfig {
    /// Entry lifetime as a [`Duration`].
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (text, json).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from a file, selecting the parser by extension
    /// (YAML by default).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?,
        };
        Ok(config)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Serializes to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validates the static parts of the configuration. Upstream presence is
    /// checked at snapshot build time, once files have been read.
    pub fn validate(&self) -> Result<()> {
        if self.listens.is_empty() {
            return Err(ConfigError::Validation(
                "at least one listen endpoint is required".to_string(),
            ));
        }
        self.listen_specs()?;
        if self.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses every listen entry.
    pub fn listen_specs(&self) -> Result<Vec<ListenSpec>> {
        self.listens
            .iter()
            .map(|spec| listeners::parse_listen(spec))
            .collect()
    }

    /// Builds the immutable snapshot consumed by the resolver engine,
    /// reading hosts and resolv files from disk.
    pub fn load_snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            hosts: self.load_host_tables()?,
            upstreams: self.load_upstreams()?,
            timeout: Duration::from_millis(self.timeout_ms),
        })
    }

    fn load_host_tables(&self) -> Result<HostTables> {
        let mut lines = Vec::new();
        for path in &self.hosts_files {
            let content = fs::read_to_string(path)?;
            lines.extend(content.lines().map(str::to_owned));
        }
        lines.extend(self.hosts.iter().cloned());
        hosts::build_tables(&lines)
    }

    /// Merges direct nameservers with every resolv file, completes missing
    /// ports, deduplicates preserving first-seen order, and drops any
    /// endpoint equal to a listen address so the forwarder cannot loop onto
    /// itself.
    fn load_upstreams(&self) -> Result<Vec<SocketAddr>> {
        let listens: Vec<SocketAddr> = self
            .listen_specs()?
            .into_iter()
            .map(|spec| spec.addr)
            .collect();

        let mut servers = self.nameservers.clone();
        for path in &self.resolv_files {
            let content = fs::read_to_string(path)?;
            servers.extend(resolv::parse_resolv(&content));
        }

        let mut upstreams = Vec::new();
        for server in &servers {
            let addr = listeners::parse_endpoint(server)?;
            if listens.contains(&addr) || upstreams.contains(&addr) {
                continue;
            }
            upstreams.push(addr);
        }
        if upstreams.is_empty() {
            return Err(ConfigError::NoUpstreams);
        }
        Ok(upstreams)
    }
}

/// Immutable configuration snapshot referenced by the resolver engine.
///
/// Replaced wholesale on reload; in-flight queries that captured the prior
/// snapshot finish against it.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Static host overrides, split by address family.
    pub hosts: HostTables,

    /// Upstream endpoints in authoritative race order.
    pub upstreams: Vec<SocketAddr>,

    /// Per-step timeout of the upstream race.
    pub timeout: Duration,
}
