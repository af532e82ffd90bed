use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StateError;

use super::{Cast, CastEpisodes};

const CASTS_FILENAME: &str = "casts.json";
const EPISODES_FILENAME: &str = "episodes.json";

/// Where subscription state comes from and goes to.
///
/// Store operations never persist on their own; the driver loads once,
/// mutates, and saves when it decides the session is done.
pub trait StatePort {
    fn load(
        &self,
    ) -> Result<(BTreeMap<String, Cast>, BTreeMap<String, CastEpisodes>), StateError>;

    fn save(
        &self,
        casts: &BTreeMap<String, Cast>,
        episodes: &BTreeMap<String, CastEpisodes>,
    ) -> Result<(), StateError>;
}

/// Pretty-printed JSON documents in the application data directory
pub struct JsonStatePort {
    dir: PathBuf,
}

impl JsonStatePort {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read_document<T: DeserializeOwned + Default>(&self, filename: &str) -> Result<T, StateError> {
        let path = self.dir.join(filename);
        if !path.exists() {
            return Ok(T::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| StateError::ReadFailed {
            path: path.clone(),
            source: e,
        })?;

        serde_json::from_str(&content).map_err(|e| StateError::JsonParseFailed { path, source: e })
    }

    fn write_document<T: Serialize>(&self, filename: &str, value: &T) -> Result<(), StateError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StateError::CreateDirectoryFailed {
            path: self.dir.clone(),
            source: e,
        })?;

        let path = self.dir.join(filename);
        let json = serde_json::to_string_pretty(value)?;

        std::fs::write(&path, json).map_err(|e| StateError::WriteFailed { path, source: e })
    }
}

impl StatePort for JsonStatePort {
    fn load(
        &self,
    ) -> Result<(BTreeMap<String, Cast>, BTreeMap<String, CastEpisodes>), StateError> {
        let casts = self.read_document(CASTS_FILENAME)?;
        let episodes = self.read_document(EPISODES_FILENAME)?;
        Ok((casts, episodes))
    }

    fn save(
        &self,
        casts: &BTreeMap<String, Cast>,
        episodes: &BTreeMap<String, CastEpisodes>,
    ) -> Result<(), StateError> {
        self.write_document(CASTS_FILENAME, casts)?;
        self.write_document(EPISODES_FILENAME, episodes)
    }
}
