// ABOUTME: Configuration for the fleet supervisor daemon and its workers.
// ABOUTME: Loaded from TOML file with sensible defaults for every section.

use crate::store::DEFAULT_TENANT_TABLES;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest phone identifier accepted as a registry key.
pub const MAX_PHONE_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database holding durable session status
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Tenant tables wiped on clear and logout, each keyed by a `sessionId` column
    #[serde(default = "default_tenant_tables")]
    pub tenant_tables: Vec<String>,

    /// Directory for per-worker sockets (defaults to the OS temp dir)
    #[serde(default)]
    pub socket_dir: Option<String>,

    /// Admin socket path (defaults to <socket_dir>/fleetd.sock)
    #[serde(default)]
    pub admin_socket: Option<String>,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub ephemeral: EphemeralConfig,
}

/// How the external worker process is launched.
///
/// The process receives `args..., <phone>, <socket path>` as its arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_worker_command")]
    pub command: String,

    #[serde(default = "default_worker_args")]
    pub args: Vec<String>,

    /// Working directory for the worker process
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Extra environment variables for the worker process
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Forward worker stdout/stderr lines into the log
    #[serde(default = "default_true")]
    pub forward_output: bool,
}

/// Timing and limits for the per-worker supervisor loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Delay before restarting a worker whose process exited
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// Delay before retrying a failed socket bind or process spawn
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// How long to let the event pipeline drain after the process exits
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Largest frame payload accepted from a worker
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// redis-cli binary used to clear session keys
    #[serde(default = "default_redis_cli")]
    pub redis_cli: String,

    /// Optional server URL passed as `redis-cli -u <url>`
    #[serde(default)]
    pub url: Option<String>,
}

fn default_database_path() -> String {
    "~/.local/share/fleet/fleet.db".to_string()
}

fn default_tenant_tables() -> Vec<String> {
    DEFAULT_TENANT_TABLES.iter().map(|t| t.to_string()).collect()
}

fn default_worker_command() -> String {
    "bun".to_string()
}

fn default_worker_args() -> Vec<String> {
    vec!["start".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_restart_delay_ms() -> u64 {
    2_000
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_drain_timeout_ms() -> u64 {
    2_000
}

fn default_max_frame_len() -> usize {
    16 * 1024 * 1024
}

fn default_redis_cli() -> String {
    "redis-cli".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            tenant_tables: default_tenant_tables(),
            socket_dir: None,
            admin_socket: None,
            worker: WorkerConfig::default(),
            supervisor: SupervisorConfig::default(),
            ephemeral: EphemeralConfig::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: default_worker_command(),
            args: default_worker_args(),
            working_dir: None,
            env: BTreeMap::new(),
            forward_output: true,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: default_restart_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl Default for EphemeralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_cli: default_redis_cli(),
            url: None,
        }
    }
}

impl SupervisorConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl WorkerConfig {
    pub fn working_dir_expanded(&self) -> Option<PathBuf> {
        self.working_dir.as_deref().map(expand)
    }
}

fn expand(path: &str) -> PathBuf {
    shellexpand::tilde(path).into_owned().into()
}

impl Config {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Load config from `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Get the default config file path (~/.config/fleet/fleet.toml)
    pub fn default_path() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("."))
            })
            .join("fleet")
            .join("fleet.toml")
    }

    pub fn database_path_expanded(&self) -> PathBuf {
        expand(&self.database_path)
    }

    pub fn socket_dir_expanded(&self) -> PathBuf {
        self.socket_dir
            .as_deref()
            .map(expand)
            .unwrap_or_else(std::env::temp_dir)
    }

    pub fn admin_socket_path(&self) -> PathBuf {
        self.admin_socket
            .as_deref()
            .map(expand)
            .unwrap_or_else(|| self.socket_dir_expanded().join("fleetd.sock"))
    }
}

/// Check that a phone identifier is safe to embed in socket paths and key patterns.
pub fn validate_phone(phone: &str) -> bool {
    !phone.is_empty()
        && phone.len() <= MAX_PHONE_LEN
        && phone
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '_'))
}
