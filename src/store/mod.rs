// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::episode::{TransferOutcome, sanitize_name};
use crate::error::{FeedError, StateError, StoreError};
use crate::feed::FetchedFeed;
use crate::scheduler::TransferCompletion;

mod persist;
mod reconcile;

pub use persist::{JsonStatePort, StatePort};
pub use reconcile::ReconcileStats;

/// A subscribed feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cast {
    pub url: String,
    /// Fixed on-disk filename for every episode of this cast, replacing the
    /// name resolved from episode metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Everything known about one episode.
///
/// Feed-derived fields are replaced wholesale on every reconcile; `localname`
/// and `listened` are local facts and survive feed changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    /// Playing time in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Enclosure URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    /// Enclosure-declared byte size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    /// Name of the downloaded file, relative to the cast directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub localname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listened: Option<DateTime<Utc>>,
}

/// The episode side of one subscription
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CastEpisodes {
    /// Publication date of the feed itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    pub items: BTreeMap<String, EpisodeRecord>,
}

/// In-memory registry of subscriptions and their episodes.
///
/// Both maps are keyed by cast uid and always carry the same key set; every
/// structural mutation re-checks that before returning. Persistence is the
/// caller's business via [`StatePort`].
pub struct CastStore {
    casts: BTreeMap<String, Cast>,
    episodes: BTreeMap<String, CastEpisodes>,
    casts_dir: PathBuf,
}

impl CastStore {
    pub fn new(casts_dir: impl Into<PathBuf>) -> Self {
        Self {
            casts: BTreeMap::new(),
            episodes: BTreeMap::new(),
            casts_dir: casts_dir.into(),
        }
    }

    pub fn with_state(
        casts: BTreeMap<String, Cast>,
        episodes: BTreeMap<String, CastEpisodes>,
        casts_dir: impl Into<PathBuf>,
    ) -> Self {
        let store = Self {
            casts,
            episodes,
            casts_dir: casts_dir.into(),
        };
        store.assert_consistent();
        store
    }

    pub fn load(port: &impl StatePort, casts_dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let (casts, episodes) = port.load()?;
        Ok(Self::with_state(casts, episodes, casts_dir))
    }

    pub fn save(&self, port: &impl StatePort) -> Result<(), StateError> {
        port.save(&self.casts, &self.episodes)
    }

    pub fn casts(&self) -> &BTreeMap<String, Cast> {
        &self.casts
    }

    pub fn episodes(&self) -> &BTreeMap<String, CastEpisodes> {
        &self.episodes
    }

    /// Directory this cast's files live in
    pub fn cast_directory(&self, cast_uid: &str) -> PathBuf {
        self.casts_dir.join(sanitize_name(cast_uid))
    }

    /// Register a new subscription and run the first reconcile.
    ///
    /// The registration only sticks if the feed reconciles cleanly and the
    /// cast directory can be created; any failure rolls it back completely.
    pub fn add_feed(
        &mut self,
        url: &str,
        cast_uid: &str,
        feed: &FetchedFeed,
    ) -> Result<ReconcileStats, StoreError> {
        if self.casts.contains_key(cast_uid) {
            return Err(StoreError::CastExists {
                cast_uid: cast_uid.to_string(),
            });
        }

        let directory = sanitize_name(cast_uid);
        if directory.is_empty() {
            return Err(StoreError::InvalidName {
                name: cast_uid.to_string(),
            });
        }
        for existing in self.casts.keys() {
            if sanitize_name(existing) == directory {
                return Err(StoreError::DirectoryCollision {
                    cast_uid: cast_uid.to_string(),
                    existing: existing.clone(),
                    directory,
                });
            }
        }

        self.casts.insert(
            cast_uid.to_string(),
            Cast {
                url: url.to_string(),
                filename: None,
            },
        );
        let entry = self.episodes.entry(cast_uid.to_string()).or_default();

        let stats = match reconcile::reconcile(cast_uid, entry, feed) {
            Ok(stats) => stats,
            Err(e) => {
                self.casts.remove(cast_uid);
                self.episodes.remove(cast_uid);
                return Err(e.into());
            }
        };

        let dir_path = self.cast_directory(cast_uid);
        if let Err(e) = std::fs::create_dir_all(&dir_path) {
            self.casts.remove(cast_uid);
            self.episodes.remove(cast_uid);
            return Err(StoreError::Io {
                path: dir_path,
                source: e,
            });
        }

        self.assert_consistent();
        Ok(stats)
    }

    /// Fold a freshly fetched feed into an existing subscription
    pub fn refresh_feed(
        &mut self,
        cast_uid: &str,
        feed: &FetchedFeed,
    ) -> Result<ReconcileStats, StoreError> {
        let entry = self
            .episodes
            .get_mut(cast_uid)
            .ok_or_else(|| StoreError::UnknownCast {
                cast_uid: cast_uid.to_string(),
            })?;

        Ok(reconcile::reconcile(cast_uid, entry, feed)?)
    }

    /// Drop a subscription from both registries.
    ///
    /// Downloaded files stay on disk; `delete_files` is refused loudly rather
    /// than silently ignored.
    pub fn remove_cast(&mut self, cast_uid: &str, delete_files: bool) -> Result<(), StoreError> {
        self.assert_consistent();

        if delete_files {
            return Err(StoreError::DeleteFilesUnsupported);
        }
        if self.casts.remove(cast_uid).is_none() {
            return Err(StoreError::UnknownCast {
                cast_uid: cast_uid.to_string(),
            });
        }
        self.episodes.remove(cast_uid);

        self.assert_consistent();
        Ok(())
    }

    /// Rename a cast, moving its directory along with the registry keys
    pub fn rename_cast(&mut self, old_uid: &str, new_uid: &str) -> Result<(), StoreError> {
        self.assert_consistent();

        if old_uid == new_uid {
            return Ok(());
        }
        if !self.casts.contains_key(old_uid) {
            return Err(StoreError::UnknownCast {
                cast_uid: old_uid.to_string(),
            });
        }
        if self.casts.contains_key(new_uid) {
            return Err(StoreError::CastExists {
                cast_uid: new_uid.to_string(),
            });
        }
        if sanitize_name(new_uid) != new_uid {
            return Err(StoreError::InvalidName {
                name: new_uid.to_string(),
            });
        }
        for existing in self.casts.keys() {
            if existing != old_uid && sanitize_name(existing) == new_uid {
                return Err(StoreError::InvalidName {
                    name: new_uid.to_string(),
                });
            }
        }

        let source = self.cast_directory(old_uid);
        let destination = self.cast_directory(new_uid);
        if !source.exists() {
            return Err(StoreError::CastDirMissing(source));
        }
        if destination.exists() {
            return Err(StoreError::CastDirExists(destination));
        }
        std::fs::rename(&source, &destination).map_err(|e| StoreError::Io {
            path: source,
            source: e,
        })?;

        if let Some(cast) = self.casts.remove(old_uid) {
            self.casts.insert(new_uid.to_string(), cast);
        }
        if let Some(entry) = self.episodes.remove(old_uid) {
            self.episodes.insert(new_uid.to_string(), entry);
        }

        self.assert_consistent();
        Ok(())
    }

    /// Point an existing subscription at a different feed URL
    pub fn set_feed_url(&mut self, cast_uid: &str, url: &str) -> Result<(), StoreError> {
        Url::parse(url).map_err(FeedError::from)?;

        let cast = self
            .casts
            .get_mut(cast_uid)
            .ok_or_else(|| StoreError::UnknownCast {
                cast_uid: cast_uid.to_string(),
            })?;
        cast.url = url.to_string();
        Ok(())
    }

    /// Stamp an episode as listened, returning the recorded time
    pub fn mark_listened(
        &mut self,
        cast_uid: &str,
        episode_uid: &str,
        when: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let record = self.episode_mut(cast_uid, episode_uid)?;
        let stamp = when.unwrap_or_else(Utc::now);
        record.listened = Some(stamp);
        Ok(stamp)
    }

    /// Clear the listened stamp, returning what was set before
    pub fn forget_listened(
        &mut self,
        cast_uid: &str,
        episode_uid: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let record = self.episode_mut(cast_uid, episode_uid)?;
        Ok(record.listened.take())
    }

    /// Forget that an episode was downloaded, returning the previous name.
    ///
    /// The file itself stays where it is; the caller decides what to do with
    /// it.
    pub fn remove_episode_file(
        &mut self,
        cast_uid: &str,
        episode_uid: &str,
    ) -> Result<Option<String>, StoreError> {
        let record = self.episode_mut(cast_uid, episode_uid)?;
        Ok(record.localname.take())
    }

    /// Record the terminal result of a transfer.
    ///
    /// Every outcome that left a file under its final name sets `localname`,
    /// a truncated one included, so a later run can pick it up again.
    pub fn apply_completion(&mut self, completion: &TransferCompletion) {
        let localname = match &completion.outcome {
            TransferOutcome::Success { localname, .. }
            | TransferOutcome::AlreadyExists { localname, .. }
            | TransferOutcome::PartialContent { localname, .. } => localname.clone(),
            TransferOutcome::Failure { .. } => return,
        };

        match self.episode_mut(&completion.cast_uid, &completion.episode_uid) {
            Ok(record) => record.localname = Some(localname),
            Err(_) => warn!(
                "Completed transfer for '{}' / '{}' no longer matches a known episode",
                completion.cast_uid, completion.episode_uid
            ),
        }
    }

    fn episode_mut(
        &mut self,
        cast_uid: &str,
        episode_uid: &str,
    ) -> Result<&mut EpisodeRecord, StoreError> {
        let entry = self
            .episodes
            .get_mut(cast_uid)
            .ok_or_else(|| StoreError::UnknownCast {
                cast_uid: cast_uid.to_string(),
            })?;

        entry
            .items
            .get_mut(episode_uid)
            .ok_or_else(|| StoreError::UnknownEpisode {
                cast_uid: cast_uid.to_string(),
                episode_uid: episode_uid.to_string(),
            })
    }

    fn assert_consistent(&self) {
        let cast_keys: Vec<&String> = self.casts.keys().collect();
        let episode_keys: Vec<&String> = self.episodes.keys().collect();
        assert_eq!(
            cast_keys, episode_keys,
            "cast registry and episode registry are out of step"
        );
    }
}
