//! Configuration types for opslog.
//!
//! [`Config::load`] layers, in order: the embedded defaults, the user file
//! (`--config <path>` or `~/.config/opslog/config.toml`, optional), and
//! `OPSLOG__<SECTION>__<KEY>` environment variables. [`Config::defaults`]
//! returns the embedded defaults without touching the filesystem or the
//! environment (useful in tests).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Embedded defaults
// ---------------------------------------------------------------------------

const DEFAULT_CONFIG: &str = r#"
[server]
bind = "127.0.0.1:8080"

[storage]
logs_dir  = "logs"
extension = "csv"

[guard]
ceiling_bytes        = 1073741824
cooldown_secs        = 3600
webhook_timeout_secs = 10

[export]
columns = ["timestamp", "stream", "severity", "message"]

[arbiter]
max_concurrent = 6
freshness_ms   = 5000
debounce_ms    = 300
cache_ttl_secs = 300
"#;

const ENV_PREFIX: &str = "OPSLOG";

// ---------------------------------------------------------------------------
// Public config types
// ---------------------------------------------------------------------------

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub guard: GuardConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub arbiter: ArbiterSettings,
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String { "127.0.0.1:8080".to_string() }

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

/// `[storage]` section: where rotated log files live.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    #[serde(default = "default_extension")]
    pub extension: String,
}

fn default_logs_dir() -> PathBuf { PathBuf::from("logs") }
fn default_extension() -> String { "csv".to_string() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            logs_dir: default_logs_dir(),
            extension: default_extension(),
        }
    }
}

/// `[guard]` section: volume ceiling and alert webhook.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "default_ceiling_bytes")]
    pub ceiling_bytes: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Alerting is disabled when unset or empty.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout_secs")]
    pub webhook_timeout_secs: u64,
    /// Host identifier sent with alerts. Defaults to the machine hostname.
    #[serde(default)]
    pub hostname: Option<String>,
}

fn default_ceiling_bytes() -> u64 { 1024 * 1024 * 1024 }
fn default_cooldown_secs() -> u64 { 60 * 60 }
fn default_webhook_timeout_secs() -> u64 { 10 }

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            ceiling_bytes: default_ceiling_bytes(),
            cooldown_secs: default_cooldown_secs(),
            webhook_url: None,
            webhook_timeout_secs: default_webhook_timeout_secs(),
            hostname: None,
        }
    }
}

impl GuardConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    /// The webhook URL, treating an empty string as unset.
    pub fn webhook_url(&self) -> Option<&str> {
        self.webhook_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }

    pub fn resolved_hostname(&self) -> String {
        match self.hostname.as_deref().map(str::trim) {
            Some(h) if !h.is_empty() => h.to_string(),
            _ => gethostname::gethostname().to_string_lossy().into_owned(),
        }
    }
}

/// `[export]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Fixed header row of exported documents.
    #[serde(default = "default_export_columns")]
    pub columns: Vec<String>,
}

fn default_export_columns() -> Vec<String> {
    ["timestamp", "stream", "severity", "message"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { columns: default_export_columns() }
    }
}

/// `[arbiter]` section: client-side request arbitration.
#[derive(Debug, Clone, Deserialize)]
pub struct ArbiterSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_freshness_ms")]
    pub freshness_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_max_concurrent() -> usize { 6 }
fn default_freshness_ms() -> u64 { 5_000 }
fn default_debounce_ms() -> u64 { 300 }
fn default_cache_ttl_secs() -> u64 { 300 }

impl Default for ArbiterSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            freshness_ms: default_freshness_ms(),
            debounce_ms: default_debounce_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl ArbiterSettings {
    pub fn freshness(&self) -> Duration {
        Duration::from_millis(self.freshness_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Config {
    /// Load the layered configuration. `path` overrides the default user file
    /// location; a missing file is not an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);

        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .add_source(config::File::from(path.as_path()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("export.columns"),
            )
            .build()?
            .try_deserialize()
            .map_err(Into::into)
    }

    /// Return the built-in defaults without touching the filesystem.
    pub fn defaults() -> Self {
        config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()
            .expect("built-in default config must be valid TOML")
            .try_deserialize()
            .expect("built-in default config must deserialize correctly")
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

fn config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
                .join(".config")
        })
        .join("opslog")
        .join("config.toml")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
