//! Configuration file parser for ~/.config/gleaner/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

/// Service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path. `None` resolves to the default data directory.
    pub database_path: Option<PathBuf>,

    /// Seconds between scheduler sweeps.
    pub sync_interval_secs: u64,

    /// Default per-feed refresh interval for feeds added without one.
    pub default_feed_interval_secs: i64,

    /// How many feeds may sync concurrently during a sweep.
    pub max_concurrent_syncs: usize,

    /// Cap on idle keep-alive connections per host.
    pub max_connections_per_host: usize,

    /// Total request timeout (connect + transfer) in seconds.
    pub request_timeout_secs: u64,

    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Wall-clock budget for one feed's entire sync (fetch, parse, commit).
    pub sync_budget_secs: u64,

    /// Consecutive failures before a feed is automatically disabled.
    pub failure_threshold: i64,

    /// Maximum response body size in bytes.
    pub max_response_bytes: u64,

    /// Maximum redirect hops before a fetch is failed.
    pub redirect_limit: usize,

    /// Fetch error records older than this many days are pruned.
    pub error_retention_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            sync_interval_secs: 300,
            default_feed_interval_secs: 900,
            max_concurrent_syncs: 8,
            max_connections_per_host: 2,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            sync_budget_secs: 60,
            failure_threshold: 5,
            max_response_bytes: 10 * 1024 * 1024,
            redirect_limit: 5,
            error_retention_days: 30,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as a warning
    ///
    /// Zero values for the concurrency and threshold knobs would wedge the
    /// scheduler or disable feeds on their first failure, so they are clamped
    /// to 1 with a warning rather than rejected.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse as a raw table first to detect likely typos
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "database_path",
                "sync_interval_secs",
                "default_feed_interval_secs",
                "max_concurrent_syncs",
                "max_connections_per_host",
                "request_timeout_secs",
                "connect_timeout_secs",
                "sync_budget_secs",
                "failure_threshold",
                "max_response_bytes",
                "redirect_limit",
                "error_retention_days",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let mut config: Config = toml::from_str(&content)?;
        config.clamp_floors();
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    fn clamp_floors(&mut self) {
        if self.max_concurrent_syncs == 0 {
            tracing::warn!("max_concurrent_syncs = 0 would stall every sweep, using 1");
            self.max_concurrent_syncs = 1;
        }
        if self.max_connections_per_host == 0 {
            tracing::warn!("max_connections_per_host = 0 is not usable, using 1");
            self.max_connections_per_host = 1;
        }
        if self.failure_threshold < 1 {
            tracing::warn!("failure_threshold < 1 would disable feeds instantly, using 1");
            self.failure_threshold = 1;
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn sync_budget(&self) -> Duration {
        Duration::from_secs(self.sync_budget_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.database_path.is_none());
        assert_eq!(config.sync_interval_secs, 300);
        assert_eq!(config.default_feed_interval_secs, 900);
        assert_eq!(config.max_concurrent_syncs, 8);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.max_response_bytes, 10 * 1024 * 1024);
        assert_eq!(config.redirect_limit, 5);
        assert_eq!(config.error_retention_days, 30);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/gleaner_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.sync_interval_secs, 300);
    }

    #[test]
    fn test_empty_file_returns_default() {
        let dir = std::env::temp_dir().join("gleaner_config_test_empty");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_concurrent_syncs, 8);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let dir = std::env::temp_dir().join("gleaner_config_test_partial");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "sync_interval_secs = 60\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sync_interval_secs, 60);
        assert_eq!(config.failure_threshold, 5); // default
        assert_eq!(config.redirect_limit, 5); // default

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let dir = std::env::temp_dir().join("gleaner_config_test_full");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
database_path = "/var/lib/gleaner/feeds.db"
sync_interval_secs = 120
default_feed_interval_secs = 600
max_concurrent_syncs = 4
max_connections_per_host = 1
request_timeout_secs = 15
connect_timeout_secs = 5
sync_budget_secs = 45
failure_threshold = 3
max_response_bytes = 1048576
redirect_limit = 3
error_retention_days = 7
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.database_path.as_deref(),
            Some(Path::new("/var/lib/gleaner/feeds.db"))
        );
        assert_eq!(config.sync_interval_secs, 120);
        assert_eq!(config.default_feed_interval_secs, 600);
        assert_eq!(config.max_concurrent_syncs, 4);
        assert_eq!(config.max_connections_per_host, 1);
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.sync_budget(), Duration::from_secs(45));
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.max_response_bytes, 1_048_576);
        assert_eq!(config.redirect_limit, 3);
        assert_eq!(config.error_retention_days, 7);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = std::env::temp_dir().join("gleaner_config_test_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let result = Config::load(&path);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let dir = std::env::temp_dir().join("gleaner_config_test_unknown");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
sync_interval_secs = 90
totally_fake_key = "should not fail"
another_unknown = 42
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sync_interval_secs, 90);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let dir = std::env::temp_dir().join("gleaner_config_test_wrongtype");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        // sync_interval_secs should be an integer, not a string
        std::fs::write(&path, "sync_interval_secs = \"fast\"\n").unwrap();

        let result = Config::load(&path);
        assert!(result.is_err());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let dir = std::env::temp_dir().join("gleaner_config_test_whitespace");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "   \n  \n  ").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sync_interval_secs, 300);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_zero_knobs_clamped() {
        let dir = std::env::temp_dir().join("gleaner_config_test_clamp");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
max_concurrent_syncs = 0
max_connections_per_host = 0
failure_threshold = 0
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.max_concurrent_syncs, 1);
        assert_eq!(config.max_connections_per_host, 1);
        assert_eq!(config.failure_threshold, 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("gleaner_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        // Just over 1MB
        let content = "a".repeat(1_048_577);
        std::fs::write(&path, content).unwrap();

        let result = Config::load(&path);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_file_at_size_limit_accepted() {
        let dir = std::env::temp_dir().join("gleaner_config_test_at_limit");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let mut content = "sync_interval_secs = 300\n".to_string();
        while content.len() < 1_048_576 - 20 {
            content.push_str("# padding comment\n");
        }
        content.truncate(1_048_576);
        std::fs::write(&path, &content).unwrap();

        let result = Config::load(&path);
        assert!(result.is_ok());

        std::fs::remove_dir_all(&dir).ok();
    }
}
