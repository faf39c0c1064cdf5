//! Run configuration.
//!
//! Read from `--config <path>` or `<config dir>/imap-migrator/config.toml`;
//! every key is optional and falls back to the defaults below.

use crate::catalog::display_path;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    pub retry: RetrySettings,
    pub network: NetworkSettings,
    pub run: RunSettings,
    pub folders: FolderSettings,
}

/// Bounded retry with exponential backoff, applied to every network operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts, including the first
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// Upper bound for one network operation
    pub timeout_seconds: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Mailbox pairs processed concurrently
    pub jobs: usize,
    /// Archive root
    pub output: PathBuf,
    /// Checkpoint directory; empty means `<output>/.checkpoints`
    pub state_dir: PathBuf,
    pub log_file: PathBuf,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            jobs: 1,
            output: PathBuf::from("backups"),
            state_dir: PathBuf::new(),
            log_file: PathBuf::from("imap_migrator.log"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderSettings {
    /// Display paths (with `/`) left out, together with their subfolders
    pub exclude: Vec<String>,
    /// Hierarchy separator to use on the destination; empty means ask the server
    pub destination_separator: String,
}

impl MigratorConfig {
    /// `<config dir>/imap-migrator/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("imap-migrator").join("config.toml"))
    }

    /// Load from an explicit path (which must exist) or from the default
    /// location (which may be absent).
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound && !required => {
                debug!("No config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };

        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate()?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "retry.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.network.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "network.timeout_seconds must be positive".to_string(),
            ));
        }
        if self.run.jobs == 0 {
            return Err(ConfigError::Invalid("run.jobs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn state_dir(&self) -> PathBuf {
        if self.run.state_dir.as_os_str().is_empty() {
            self.run.output.join(".checkpoints")
        } else {
            self.run.state_dir.clone()
        }
    }

    pub fn destination_separator(&self) -> Option<&str> {
        Some(self.folders.destination_separator.as_str()).filter(|s| !s.is_empty())
    }

    /// Whether a folder, or one of its ancestors, is excluded
    pub fn is_excluded(&self, path: &[String]) -> bool {
        let path = display_path(path);
        self.folders.exclude.iter().any(|excluded| {
            let excluded = excluded.trim_end_matches('/');
            path == excluded
                || (path.starts_with(excluded) && path[excluded.len()..].starts_with('/'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = MigratorConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.network.timeout_seconds, 60);
        assert_eq!(config.run.jobs, 1);
        assert_eq!(config.state_dir(), PathBuf::from("backups/.checkpoints"));
        assert_eq!(config.destination_separator(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("config.toml");
        fs::write(
            &file,
            r#"
[retry]
max_attempts = 5

[run]
jobs = 4
state_dir = "/var/lib/imap-migrator"

[folders]
exclude = ["Trash", "[Gmail]/All Mail"]
destination_separator = "."
"#,
        )
        .unwrap();

        let config = MigratorConfig::load(Some(&file)).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.max_delay_ms, 10_000);
        assert_eq!(config.run.jobs, 4);
        assert_eq!(config.run.output, PathBuf::from("backups"));
        assert_eq!(config.state_dir(), PathBuf::from("/var/lib/imap-migrator"));
        assert_eq!(config.destination_separator(), Some("."));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            MigratorConfig::load(Some(&dir.path().join("absent.toml"))),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("config.toml");
        fs::write(&file, "[run]\njobs = 0\n").unwrap();
        assert!(matches!(
            MigratorConfig::load(Some(&file)),
            Err(ConfigError::Invalid(_))
        ));

        fs::write(&file, "[retry\n").unwrap();
        assert!(matches!(
            MigratorConfig::load(Some(&file)),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_exclusion_covers_subfolders() {
        let mut config = MigratorConfig::default();
        config.folders.exclude = vec!["Trash".to_string(), "Archive/2019/".to_string()];

        assert!(config.is_excluded(&path(&["Trash"])));
        assert!(config.is_excluded(&path(&["Trash", "Old"])));
        assert!(!config.is_excluded(&path(&["Trash2"])));
        assert!(config.is_excluded(&path(&["Archive", "2019"])));
        assert!(!config.is_excluded(&path(&["Archive"])));
    }
}
