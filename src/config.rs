use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StateError;

fn default_casts_directory() -> PathBuf {
    PathBuf::from("./Podcasts")
}

fn default_user_agent() -> String {
    concat!("podkeep/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_network_timeout() -> u64 {
    10
}

fn default_refresh_interval() -> u64 {
    3600
}

fn default_concurrent_downloads() -> usize {
    3
}

fn default_descending() -> bool {
    true
}

/// Application configuration, persisted as its own JSON document.
///
/// Every field has a default so a partial document loads cleanly and a
/// missing one is created from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Root directory that cast directories are created under
    #[serde(default = "default_casts_directory")]
    pub casts_directory: PathBuf,

    /// User-Agent header sent with feed and enclosure requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Connect/read timeout for network requests, in seconds
    #[serde(default = "default_network_timeout")]
    pub network_timeout: u64,

    /// Feed refresh interval in seconds. Informational only.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Size of the download worker pool
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,

    /// Whether episode listings are shown newest-first
    #[serde(default = "default_descending")]
    pub descending: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            casts_directory: default_casts_directory(),
            user_agent: default_user_agent(),
            network_timeout: default_network_timeout(),
            refresh_interval: default_refresh_interval(),
            concurrent_downloads: default_concurrent_downloads(),
            descending: default_descending(),
        }
    }
}

impl Config {
    /// Load the config document, writing a default one if it doesn't exist yet
    pub fn load_or_init(path: &Path) -> Result<Self, StateError> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path).map_err(|e| StateError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_json::from_str(&content).map_err(|e| StateError::JsonParseFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| StateError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_document_takes_all_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert_eq!(config.casts_directory, PathBuf::from("./Podcasts"));
        assert_eq!(config.network_timeout, 10);
        assert_eq!(config.refresh_interval, 3600);
        assert_eq!(config.concurrent_downloads, 3);
        assert!(config.descending);
        assert!(config.user_agent.starts_with("podkeep/"));
    }

    #[test]
    fn partial_document_keeps_given_values() {
        let config: Config =
            serde_json::from_str(r#"{"network-timeout": 30, "descending": false}"#).unwrap();

        assert_eq!(config.network_timeout, 30);
        assert!(!config.descending);
        assert_eq!(config.concurrent_downloads, 3);
    }

    #[test]
    fn serializes_with_kebab_case_keys() {
        let json = serde_json::to_string(&Config::default()).unwrap();

        assert!(json.contains("\"casts-directory\""));
        assert!(json.contains("\"user-agent\""));
        assert!(json.contains("\"network-timeout\""));
        assert!(json.contains("\"concurrent-downloads\""));
    }

    #[test]
    fn load_or_init_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        assert!(!path.exists());
        let config = Config::load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.network_timeout, 10);

        // Second load reads the file it just wrote
        let reloaded = Config::load_or_init(&path).unwrap();
        assert_eq!(reloaded.user_agent, config.user_agent);
    }

    #[test]
    fn load_or_init_rejects_invalid_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(Config::load_or_init(&path).is_err());
    }
}
