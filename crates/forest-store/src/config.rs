use std::env;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Store configuration.
///
/// The data root comes from `FOREST_DATA_DIR`, falling back to
/// `.forest-data` relative to the process working directory.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory holding one sub-directory per project.
    pub data_dir: PathBuf,
    /// How long a save waits for its resource lock. `None` waits forever.
    pub lock_timeout: Option<Duration>,
}

impl StoreConfig {
    /// The data root used when no environment variable is set.
    pub const DEFAULT_DATA_DIR: &'static str = ".forest-data";

    /// Environment variable selecting the data root.
    pub const DATA_DIR_ENV: &'static str = "FOREST_DATA_DIR";

    /// Environment variable holding the lock timeout in milliseconds.
    pub const LOCK_TIMEOUT_ENV: &'static str = "FOREST_LOCK_TIMEOUT_MS";

    /// `FOREST_DATA_DIR`, if set to something non-blank.
    pub fn env_data_dir() -> Option<PathBuf> {
        env_value(Self::DATA_DIR_ENV).map(PathBuf::from)
    }

    /// `FOREST_LOCK_TIMEOUT_MS`, if set. The inner `None` means the variable
    /// asks for no timeout (`0`).
    pub fn env_lock_timeout() -> Result<Option<Option<Duration>>, InvalidTimeout> {
        env_value(Self::LOCK_TIMEOUT_ENV)
            .map(|raw| parse_timeout_ms(&raw))
            .transpose()
            .map_err(|source| InvalidTimeout {
                var: Self::LOCK_TIMEOUT_ENV,
                source,
            })
    }

    /// Build a config for an explicit data root (useful for tests and CLI flags).
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            lock_timeout: None,
        }
    }

    /// Replace the lock timeout.
    pub fn with_lock_timeout(mut self, lock_timeout: Option<Duration>) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

/// An environment variable that should hold a millisecond count.
#[derive(Debug, Error)]
#[error("{var} is not a whole number of milliseconds: {source}")]
pub struct InvalidTimeout {
    pub var: &'static str,
    #[source]
    pub source: ParseIntError,
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// A millisecond count as a lock timeout. Zero means "no timeout".
pub fn timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Parse a millisecond count. Zero means "no timeout".
pub fn parse_timeout_ms(raw: &str) -> Result<Option<Duration>, ParseIntError> {
    raw.trim().parse().map(timeout_from_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_new_has_no_timeout() {
        let cfg = StoreConfig::new("/tmp/forest");
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/forest"));
        assert!(cfg.lock_timeout.is_none());
    }

    #[test]
    fn with_lock_timeout_overrides() {
        let cfg = StoreConfig::new("data").with_lock_timeout(Some(Duration::from_millis(250)));
        assert_eq!(cfg.lock_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn parse_timeout_values() {
        assert_eq!(parse_timeout_ms("1500").unwrap(), Some(Duration::from_millis(1500)));
        assert_eq!(parse_timeout_ms(" 20 ").unwrap(), Some(Duration::from_millis(20)));
        assert_eq!(parse_timeout_ms("0").unwrap(), None);
        assert!(parse_timeout_ms("soon").is_err());
        assert!(parse_timeout_ms("-5").is_err());
    }

    #[test]
    fn invalid_timeout_names_the_variable() {
        let err = InvalidTimeout {
            var: StoreConfig::LOCK_TIMEOUT_ENV,
            source: parse_timeout_ms("soon").unwrap_err(),
        };
        assert!(err.to_string().starts_with("FOREST_LOCK_TIMEOUT_MS is not a whole number"));
    }
}
