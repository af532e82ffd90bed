use chrono::{DateTime, Utc};
use tracing::warn;

use crate::error::FeedError;
use crate::feed::{FetchedFeed, parse_itunes_duration};

use super::{CastEpisodes, EpisodeRecord};

/// What one reconcile run did
#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileStats {
    /// Entries in the fetched feed
    pub total_entries: usize,
    /// Entries not seen before
    pub new_episodes: usize,
    /// Entries dropped for lacking any usable identity
    pub skipped: usize,
}

/// Feed-derived state of one episode, validated but not yet applied
struct StagedEpisode {
    uid: String,
    title: Option<String>,
    date: Option<DateTime<Utc>>,
    duration: Option<u32>,
    description: Option<String>,
    href: Option<String>,
    length: Option<u64>,
    mimetype: Option<String>,
}

/// Fold a fetched feed into the episode registry of one cast.
///
/// Runs in two phases: every entry is validated and staged first, and only a
/// fully staged feed is committed. A validation error therefore leaves the
/// registry exactly as it was.
///
/// Feed-derived fields are replaced with whatever the feed says now, absent
/// values included. `localname` and `listened` are never touched.
pub(super) fn reconcile(
    cast_uid: &str,
    entry: &mut CastEpisodes,
    feed: &FetchedFeed,
) -> Result<ReconcileStats, FeedError> {
    if let Some(ref detail) = feed.malformed {
        warn!("Feed for '{cast_uid}' needed cleanup before it parsed: {detail}");
    }

    let mut staged: Vec<StagedEpisode> = Vec::with_capacity(feed.entries.len());
    let mut skipped = 0;

    for feed_entry in &feed.entries {
        let Some(uid) = feed_entry.uid() else {
            warn!("Skipping an entry of '{cast_uid}' that carries no identity at all");
            skipped += 1;
            continue;
        };

        let enclosure = match feed_entry.enclosures.len() {
            0 => None,
            1 => Some(&feed_entry.enclosures[0]),
            _ => {
                return Err(FeedError::MultipleEnclosures {
                    entry: uid.to_string(),
                });
            }
        };

        staged.push(StagedEpisode {
            uid: uid.to_string(),
            title: feed_entry.title.clone(),
            date: feed_entry.published,
            duration: feed_entry
                .itunes_duration
                .as_deref()
                .and_then(parse_itunes_duration),
            description: feed_entry.description.clone(),
            href: enclosure.and_then(|e| e.href.clone()),
            length: enclosure.and_then(|e| e.length),
            mimetype: enclosure.and_then(|e| e.mimetype.clone()),
        });
    }

    entry.date = feed.published;

    let mut new_episodes = 0;
    for staged_episode in staged {
        let record = entry.items.entry(staged_episode.uid).or_insert_with(|| {
            new_episodes += 1;
            EpisodeRecord::default()
        });

        record.title = staged_episode.title;
        record.date = staged_episode.date;
        record.duration = staged_episode.duration;
        record.description = staged_episode.description;
        record.href = staged_episode.href;
        record.length = staged_episode.length;
        record.mimetype = staged_episode.mimetype;
    }

    Ok(ReconcileStats {
        total_entries: feed.entries.len(),
        new_episodes,
        skipped,
    })
}
