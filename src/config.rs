//! Configuration for the dispatch pipeline.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (DISPATCH_HOME, DISPATCH_ENDPOINT_DIR,
//!    DISPATCH_ENDPOINT_URL, DISPATCH_BIND, DISPATCH_SWEEP_SECONDS)
//! 2. Config file (.dispatch/config.yaml)
//! 3. Defaults (~/.dispatch-relay)
//!
//! Config file discovery:
//! - Searches current directory and parents for .dispatch/config.yaml
//! - Paths in config file are relative to the project root (parent of .dispatch/)

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

pub const ENV_HOME: &str = "DISPATCH_HOME";
pub const ENV_ENDPOINT_DIR: &str = "DISPATCH_ENDPOINT_DIR";
pub const ENV_ENDPOINT_URL: &str = "DISPATCH_ENDPOINT_URL";
pub const ENV_BIND: &str = "DISPATCH_BIND";
pub const ENV_SWEEP_SECONDS: &str = "DISPATCH_SWEEP_SECONDS";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub endpoint: Option<EndpointConfig>,
    #[serde(default)]
    pub delivery: Option<DeliveryConfig>,
    #[serde(default)]
    pub server: Option<ServerConfig>,
    /// Extra or overriding container-type mappings
    #[serde(default)]
    pub container_types: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to project root)
    pub home: Option<String>,
    pub raw_namespace: Option<String>,
    pub archive_namespace: Option<String>,
    pub dead_letter_namespace: Option<String>,
    pub skipped_namespace: Option<String>,
    pub abandoned_namespace: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub kind: Option<EndpointKind>,
    /// Drop directory for `kind: directory`
    pub root: Option<String>,
    /// Base URL for `kind: http`
    pub url: Option<String>,
    pub remote_folder: Option<String>,
    pub processed_namespace: Option<String>,
    pub failed_namespace: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    pub topic: Option<String>,
    pub sweep_interval_seconds: Option<u64>,
    pub lease_seconds: Option<u64>,
    pub max_attempts: Option<u32>,
    pub compact_after_lines: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
}

/// Which delivery endpoint implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Local or mounted drop directory
    Directory,
    /// HTTP PUT/HEAD file service
    Http,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to engine state (queue, blobs)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub namespaces: Namespaces,
    pub endpoint: EndpointSettings,
    pub delivery: DeliverySettings,
    pub server: ServerSettings,
    pub container_types: HashMap<String, String>,
}

/// Blob namespaces used by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
    pub raw: String,
    pub archive: String,
    pub dead_letter: String,
    /// Records of artifacts dequeued because the endpoint already had them
    pub skipped: String,
    /// Records of raw events that could not be converted
    pub abandoned: String,
}

impl Default for Namespaces {
    fn default() -> Self {
        Self {
            raw: "raw-json".to_string(),
            archive: "dispatch-archive".to_string(),
            dead_letter: "dead-letter".to_string(),
            skipped: "dispatch-skipped".to_string(),
            abandoned: "abandoned".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSettings {
    pub kind: EndpointKind,
    pub root: Option<PathBuf>,
    pub url: Option<String>,
    /// Folder artifacts are uploaded into
    pub remote_folder: String,
    /// Terminal namespace populated by the receiving side on success
    pub processed_namespace: String,
    /// Terminal namespace populated by the receiving side on rejection
    pub failed_namespace: String,
    pub timeout_seconds: u64,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            kind: EndpointKind::Directory,
            root: None,
            url: None,
            remote_folder: "inbound".to_string(),
            processed_namespace: "processed".to_string(),
            failed_namespace: "failed".to_string(),
            timeout_seconds: 30,
        }
    }
}

impl EndpointSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    pub topic: String,
    pub sweep_interval_seconds: u64,
    /// Lease entries before delivering (disabled when `None`)
    pub lease_seconds: Option<u64>,
    /// Dead-letter after this many failures (retry forever when `None`)
    pub max_attempts: Option<u32>,
    /// Rewrite the topic log after a sweep once this many of its lines are
    /// superseded (0 disables)
    pub compact_after_lines: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            topic: "processed-csv".to_string(),
            sweep_interval_seconds: 300,
            lease_seconds: None,
            max_attempts: None,
            compact_after_lines: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Outcome of the startup settings check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub missing: Vec<String>,
}

impl PreflightReport {
    pub fn passed(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn message(&self) -> String {
        if self.passed() {
            "All required settings are present".to_string()
        } else {
            format!("Missing settings: {}", self.missing.join(", "))
        }
    }
}

impl ResolvedConfig {
    /// Directory holding blob namespaces
    pub fn blob_dir(&self) -> PathBuf {
        self.home.join("blobs")
    }

    /// Directory holding queue topic logs
    pub fn queue_dir(&self) -> PathBuf {
        self.home.join("queue")
    }

    /// Report settings the configured endpoint cannot run without
    pub fn preflight(&self) -> PreflightReport {
        let mut missing = Vec::new();

        match self.endpoint.kind {
            EndpointKind::Directory if self.endpoint.root.is_none() => {
                missing.push(format!("endpoint.root ({})", ENV_ENDPOINT_DIR));
            }
            EndpointKind::Http if self.endpoint.url.is_none() => {
                missing.push(format!("endpoint.url ({})", ENV_ENDPOINT_URL));
            }
            _ => {}
        }

        if self.delivery.topic.trim().is_empty() {
            missing.push("delivery.topic".to_string());
        }

        PreflightReport { missing }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".dispatch").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Merge defaults, an optional config file and environment lookups.
///
/// `env` stands in for `std::env::var` so resolution can be exercised
/// without touching the process environment.
pub fn resolve_config<F>(
    default_home: PathBuf,
    file: Option<(PathBuf, ConfigFile)>,
    env: F,
) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let (config_file, file) = match file {
        Some((path, file)) => (Some(path), Some(file)),
        None => (None, None),
    };

    // Base directory is the parent of .dispatch/ (i.e., grandparent of config.yaml)
    let base_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .and_then(Path::parent)
        .unwrap_or(Path::new("."))
        .to_path_buf();

    let home = if let Some(env_home) = env(ENV_HOME) {
        PathBuf::from(env_home)
    } else if let Some(home) = file.as_ref().and_then(|f| f.paths.home.as_deref()) {
        resolve_path(&base_dir, home)
    } else {
        default_home
    };

    let mut namespaces = Namespaces::default();
    let mut endpoint = EndpointSettings::default();
    let mut delivery = DeliverySettings::default();
    let mut server = ServerSettings::default();
    let mut container_types = HashMap::new();

    if let Some(file) = file {
        let paths = file.paths;
        if let Some(raw) = paths.raw_namespace {
            namespaces.raw = raw;
        }
        if let Some(archive) = paths.archive_namespace {
            namespaces.archive = archive;
        }
        if let Some(dead_letter) = paths.dead_letter_namespace {
            namespaces.dead_letter = dead_letter;
        }
        if let Some(skipped) = paths.skipped_namespace {
            namespaces.skipped = skipped;
        }
        if let Some(abandoned) = paths.abandoned_namespace {
            namespaces.abandoned = abandoned;
        }

        if let Some(ep) = file.endpoint {
            endpoint.kind = ep.kind.unwrap_or(endpoint.kind);
            endpoint.root = ep.root.map(|r| resolve_path(&base_dir, &r));
            endpoint.url = ep.url;
            endpoint.remote_folder = ep.remote_folder.unwrap_or(endpoint.remote_folder);
            endpoint.processed_namespace = ep
                .processed_namespace
                .unwrap_or(endpoint.processed_namespace);
            endpoint.failed_namespace = ep.failed_namespace.unwrap_or(endpoint.failed_namespace);
            endpoint.timeout_seconds = ep.timeout_seconds.unwrap_or(endpoint.timeout_seconds);
        }

        if let Some(d) = file.delivery {
            delivery.topic = d.topic.unwrap_or(delivery.topic);
            delivery.sweep_interval_seconds = d
                .sweep_interval_seconds
                .unwrap_or(delivery.sweep_interval_seconds);
            delivery.lease_seconds = d.lease_seconds;
            delivery.max_attempts = d.max_attempts;
            delivery.compact_after_lines = d
                .compact_after_lines
                .unwrap_or(delivery.compact_after_lines);
        }

        if let Some(bind) = file.server.and_then(|s| s.bind) {
            server.bind = bind;
        }

        container_types = file.container_types;
    }

    if let Some(dir) = env(ENV_ENDPOINT_DIR) {
        endpoint.kind = EndpointKind::Directory;
        endpoint.root = Some(PathBuf::from(dir));
    } else if let Some(url) = env(ENV_ENDPOINT_URL) {
        endpoint.kind = EndpointKind::Http;
        endpoint.url = Some(url);
    }

    if let Some(bind) = env(ENV_BIND) {
        server.bind = bind;
    }

    if let Some(secs) = env(ENV_SWEEP_SECONDS) {
        delivery.sweep_interval_seconds = secs
            .parse()
            .with_context(|| format!("{} must be a number of seconds: {}", ENV_SWEEP_SECONDS, secs))?;
    }

    Ok(ResolvedConfig {
        home,
        config_file,
        namespaces,
        endpoint,
        delivery,
        server,
        container_types,
    })
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".dispatch-relay");

    let file = match find_config_file() {
        Some(path) => {
            let parsed = load_config_file(&path)?;
            Some((path, parsed))
        }
        None => None,
    };

    resolve_config(default_home, file, |key| std::env::var(key).ok())
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
