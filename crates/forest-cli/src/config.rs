//! Configuration file management for forest.
//!
//! Provides a TOML-based config file at `~/.config/forest/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use forest_store::StoreConfig;
use forest_store::config::timeout_from_ms;

/// Env var naming the provider command line.
pub const PROVIDER_COMMAND_ENV: &str = "FOREST_PROVIDER_COMMAND";
/// Env var with the provider timeout in seconds.
pub const PROVIDER_TIMEOUT_ENV: &str = "FOREST_PROVIDER_TIMEOUT_SECS";

pub const DEFAULT_PROVIDER_COMMAND: &str = "claude -p";
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(120);

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub provider: ProviderSection,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Lock wait limit in milliseconds; 0 waits forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSection {
    /// Command line run for `forest generate`, split on whitespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the forest config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/forest` or `~/.config/forest`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("forest");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("forest")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load the config file if there is one. A file that exists but does not
/// parse is an error.
pub fn load_config() -> Result<Option<ConfigFile>> {
    let path = config_path();
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read config file at {}", path.display()));
        }
    };
    let config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<PathBuf> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(path)
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Values given on the command line, if any.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub data_dir: Option<PathBuf>,
    pub lock_timeout_ms: Option<u64>,
    pub provider_command: Option<String>,
    pub provider_timeout_secs: Option<u64>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ForestConfig {
    pub store: StoreConfig,
    pub provider_command: String,
    pub provider_timeout: Duration,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ForestConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Data dir: `--data-dir` > `FOREST_DATA_DIR` > `store.data_dir` > `./.forest-data`
    /// - Lock timeout: `--lock-timeout-ms` > `FOREST_LOCK_TIMEOUT_MS` > `store.lock_timeout_ms`
    ///   > none (wait forever); 0 at any level means wait forever
    /// - Provider: `--provider` > `FOREST_PROVIDER_COMMAND` > `provider.command` > `claude -p`
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        let file = load_config()?.unwrap_or_default();

        let data_dir = cli
            .data_dir
            .clone()
            .or_else(StoreConfig::env_data_dir)
            .or(file.store.data_dir)
            .unwrap_or_else(|| PathBuf::from(StoreConfig::DEFAULT_DATA_DIR));

        let lock_timeout = match cli.lock_timeout_ms {
            Some(ms) => timeout_from_ms(ms),
            None => match StoreConfig::env_lock_timeout()? {
                Some(timeout) => timeout,
                None => file.store.lock_timeout_ms.and_then(timeout_from_ms),
            },
        };

        let provider_command = cli
            .provider_command
            .clone()
            .or_else(|| env_var(PROVIDER_COMMAND_ENV))
            .or(file.provider.command)
            .unwrap_or_else(|| DEFAULT_PROVIDER_COMMAND.to_owned());

        let provider_timeout_secs = match cli.provider_timeout_secs {
            Some(secs) => Some(secs),
            None => match env_var(PROVIDER_TIMEOUT_ENV) {
                Some(raw) => Some(raw.trim().parse().with_context(|| {
                    format!("{PROVIDER_TIMEOUT_ENV} is not a whole number: {raw:?}")
                })?),
                None => file.provider.timeout_secs,
            },
        };
        let provider_timeout = provider_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PROVIDER_TIMEOUT);

        Ok(Self {
            store: StoreConfig::new(data_dir).with_lock_timeout(lock_timeout),
            provider_command,
            provider_timeout,
        })
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
