//! Configuration module for Cirrus.
//!
//! Typed configuration structs mapping to the YAML configuration file,
//! with loading, defaults and a platform-appropriate default path.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Cirrus daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub sync: SyncConfig,
    pub jobs: JobsConfig,
    pub watchdog: WatchdogConfig,
    pub logging: LoggingConfig,
}

/// Filesystem locations owned by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// SQLite state store file.
    pub db_file: PathBuf,
    /// Unix socket the presentation process connects to.
    pub socket_file: PathBuf,
    /// Directory holding log files (archived for support uploads).
    pub log_dir: PathBuf,
}

/// Per-sync supervisor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between supervisor reconciliation ticks.
    pub tick_interval: u64,
    /// Seconds between status refresh pushes to the presentation process.
    pub status_interval: u64,
}

/// Job pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Initial worker capacity of the pool.
    pub pool_capacity: usize,
    /// Size of one log-upload chunk in KiB.
    pub upload_chunk_kib: u64,
}

/// Crash/self-restart watchdog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Two restarts within this window are treated as a crash loop.
    pub restart_window_secs: i64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/cirrus/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("cirrus")
            .join("config.yaml")
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cirrus")
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data = data_dir();
        Self {
            db_file: data.join("cirrus.db"),
            socket_file: dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("cirrusd.sock"),
            log_dir: data.join("logs"),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval: 30,
            status_interval: 1,
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 4,
            upload_chunk_kib: 512,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            restart_window_secs: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.watchdog.restart_window_secs, 60);
        assert_eq!(config.jobs.pool_capacity, 4);
        assert!(config.sync.tick_interval > 0);
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "watchdog:\n  restart_window_secs: 120\nsync:\n  tick_interval: 10\n  status_interval: 2\njobs:\n  pool_capacity: 2\n  upload_chunk_kib: 64\nlogging:\n  level: debug\npaths:\n  db_file: /tmp/c.db\n  socket_file: /tmp/c.sock\n  log_dir: /tmp/logs\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.watchdog.restart_window_secs, 120);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.jobs.pool_capacity, 2);
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/cirrus.yaml"));
        assert_eq!(config.watchdog.restart_window_secs, 60);
    }
}
