//! Configuration resolution for Mirage.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/mirage/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//!
//! Command-line arguments are applied on top by the binaries themselves.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete Mirage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
}

/// Control server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub database_path: Option<PathBuf>,
    /// File holding the server's 32-byte X25519 secret key.
    pub private_key_path: Option<PathBuf>,
    pub log_level: String,
    pub log_json: bool,
    pub max_payload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            database_path: None,
            private_key_path: None,
            log_level: "info".to_string(),
            log_json: false,
            max_payload_bytes: 4 * 1024 * 1024, // 4 MB
        }
    }
}

/// Address space handed out to machines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ipv4_prefix: String,
    pub ipv6_prefix: String,
    /// A machine counts as online if seen within this many seconds.
    pub online_window_secs: i64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ipv4_prefix: "100.64.0.0/10".to_string(),
            ipv6_prefix: "fd7a:115c:a1e0::/48".to_string(),
            online_window_secs: 300,
        }
    }
}

/// Admin console configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Lifetime of a console session token (seconds). Not refreshed on use.
    pub session_ttl_secs: u64,
    /// How often expired session tokens are purged (seconds).
    pub session_purge_interval_secs: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 12 * 60 * 60, // 12 hours
            session_purge_interval_secs: 600,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// `explicit` is a config file named on the command line; it must exist.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            config = load_config_file(&global_path)?;
        }
    }

    if let Some(path) = explicit {
        config = load_config_file(path)?;
    }

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".mirage").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/mirage/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("mirage").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

/// Directory holding the control server's state (database, server key).
pub fn state_dir() -> Option<PathBuf> {
    global_config_path().and_then(|p| p.parent().map(Path::to_path_buf))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("MIRAGE_LISTEN_ADDR") {
        config.server.listen_addr = val;
    }
    if let Ok(val) = std::env::var("MIRAGE_DATABASE_PATH") {
        config.server.database_path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("MIRAGE_LOG_LEVEL") {
        config.server.log_level = val;
    }
    if let Ok(val) = std::env::var("MIRAGE_SESSION_TTL_SECS") {
        if let Ok(n) = val.parse() {
            config.console.session_ttl_secs = n;
        }
    }
}
