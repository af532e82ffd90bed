// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::episode::{TransferJob, resolve_filename};
use crate::error::SyncError;
use crate::feed::{RetryPolicy, fetch_feed};
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter};
use crate::scheduler::{DownloadScheduler, TransferCompletion};
use crate::store::{CastStore, ReconcileStats};

/// Options for a batch feed refresh
#[derive(Debug, Clone)]
pub struct RefreshOptions {
    /// Maximum number of feeds fetched at the same time
    pub max_concurrent: usize,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self { max_concurrent: 3 }
    }
}

/// Result of a batch feed refresh
#[derive(Debug, Clone, Default)]
pub struct RefreshSummary {
    /// Casts whose feed reconciled cleanly
    pub refreshed: usize,
    /// Episodes seen for the first time, across all casts
    pub new_episodes: usize,
    /// Casts whose refresh failed
    pub failed: Vec<String>,
}

/// What an enqueue pass did
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueSummary {
    pub submitted: usize,
    pub skipped: usize,
}

/// Subscribe to a feed: fetch it, pick the cast name, register it.
///
/// The cast is named by `title` when given, otherwise by the feed's own
/// title. Returns the chosen uid along with the first reconcile's stats.
pub async fn add_feed<C: HttpClient>(
    client: &C,
    store: &mut CastStore,
    retry: &RetryPolicy,
    url: &str,
    title: Option<&str>,
) -> Result<(String, ReconcileStats), SyncError> {
    let feed = fetch_feed(client, url, retry).await?;

    let cast_uid = title
        .map(str::to_string)
        .or_else(|| feed.title.clone())
        .ok_or_else(|| SyncError::NoCastName {
            url: url.to_string(),
        })?;

    let stats = store.add_feed(url, &cast_uid, &feed)?;
    Ok((cast_uid, stats))
}

/// Refresh one subscription from its feed URL
pub async fn refresh_feed<C: HttpClient>(
    client: &C,
    store: &mut CastStore,
    retry: &RetryPolicy,
    cast_uid: &str,
    reporter: &SharedProgressReporter,
) -> Result<ReconcileStats, SyncError> {
    let url = store
        .casts()
        .get(cast_uid)
        .ok_or_else(|| {
            SyncError::Store(crate::error::StoreError::UnknownCast {
                cast_uid: cast_uid.to_string(),
            })
        })?
        .url
        .clone();

    reporter.report(ProgressEvent::FetchingFeed {
        cast_uid: cast_uid.to_string(),
        url: url.clone(),
    });

    let feed = fetch_feed(client, &url, retry).await?;
    let stats = store.refresh_feed(cast_uid, &feed)?;

    reporter.report(ProgressEvent::FeedReconciled {
        cast_uid: cast_uid.to_string(),
        total_episodes: store
            .episodes()
            .get(cast_uid)
            .map(|entry| entry.items.len())
            .unwrap_or(0),
        new_episodes: stats.new_episodes,
    });

    Ok(stats)
}

/// Refresh every subscription.
///
/// Feeds are fetched in parallel through a slot pool; reconciling happens on
/// this task as results come in. One broken feed never stops the others, it
/// just ends up in the summary's failed list.
pub async fn refresh_all_feeds<C: HttpClient + Clone + 'static>(
    client: &C,
    store: &mut CastStore,
    retry: &RetryPolicy,
    options: &RefreshOptions,
    reporter: &SharedProgressReporter,
) -> RefreshSummary {
    let targets: Vec<(String, String)> = store
        .casts()
        .iter()
        .map(|(uid, cast)| (uid.clone(), cast.url.clone()))
        .collect();

    let max_concurrent = options.max_concurrent.max(1);
    let (slot_tx, slot_rx) = mpsc::channel(max_concurrent);
    for slot in 0..max_concurrent {
        slot_tx.send(slot).await.unwrap();
    }
    let slot_rx = Arc::new(Mutex::new(slot_rx));

    let (result_tx, mut result_rx) = mpsc::unbounded_channel();

    for (cast_uid, url) in targets {
        // Take a slot from the pool before spawning, so feeds start in
        // registry order
        let slot = slot_rx.lock().await.recv().await.unwrap();

        let client = client.clone();
        let retry = retry.clone();
        let reporter = Arc::clone(reporter);
        let slot_tx = slot_tx.clone();
        let result_tx = result_tx.clone();

        tokio::spawn(async move {
            reporter.report(ProgressEvent::FetchingFeed {
                cast_uid: cast_uid.clone(),
                url: url.clone(),
            });

            let fetched = fetch_feed(&client, &url, &retry).await;
            let _ = result_tx.send((cast_uid, fetched));

            let _ = slot_tx.send(slot).await;
        });
    }
    drop(result_tx);

    let mut summary = RefreshSummary::default();

    while let Some((cast_uid, fetched)) = result_rx.recv().await {
        let reconciled = match fetched {
            Ok(feed) => store.refresh_feed(&cast_uid, &feed).map_err(SyncError::from),
            Err(e) => Err(e.into()),
        };

        match reconciled {
            Ok(stats) => {
                reporter.report(ProgressEvent::FeedReconciled {
                    cast_uid: cast_uid.clone(),
                    total_episodes: store
                        .episodes()
                        .get(&cast_uid)
                        .map(|entry| entry.items.len())
                        .unwrap_or(0),
                    new_episodes: stats.new_episodes,
                });
                summary.refreshed += 1;
                summary.new_episodes += stats.new_episodes;
            }
            Err(e) => {
                reporter.report(ProgressEvent::FeedFailed {
                    cast_uid: cast_uid.clone(),
                    error: e.to_string(),
                });
                summary.failed.push(cast_uid);
            }
        }
    }

    summary.failed.sort();
    summary
}

/// Hand every downloadable episode to the scheduler.
///
/// An episode is downloadable when it has an enclosure URL and no local file
/// yet; `force` re-submits episodes that already have one. Whether an
/// existing file is then reused or replaced is the transfer's `overwrite`
/// decision.
pub fn enqueue_pending<C: HttpClient + 'static>(
    store: &CastStore,
    scheduler: &DownloadScheduler<C>,
    force: bool,
    overwrite: bool,
) -> EnqueueSummary {
    let mut summary = EnqueueSummary::default();

    for (cast_uid, entry) in store.episodes() {
        let Some(cast) = store.casts().get(cast_uid) else {
            continue;
        };
        let directory = store.cast_directory(cast_uid);

        for (episode_uid, record) in &entry.items {
            if !force && record.localname.is_some() {
                summary.skipped += 1;
                continue;
            }
            let Some(href) = record.href.clone() else {
                summary.skipped += 1;
                continue;
            };

            let job = TransferJob {
                cast_uid: cast_uid.clone(),
                episode_uid: episode_uid.clone(),
                url: href,
                directory: directory.clone(),
                filename: resolve_filename(record.title.as_deref(), record.mimetype.as_deref()),
                filename_override: cast.filename.clone(),
                expected_length: record.length,
                overwrite,
            };

            if scheduler.submit(job) {
                summary.submitted += 1;
            } else {
                summary.skipped += 1;
            }
        }
    }

    summary
}

/// Apply every completion that has arrived so far, without blocking
pub fn drain_completions(
    store: &mut CastStore,
    completions: &mut mpsc::UnboundedReceiver<TransferCompletion>,
) -> usize {
    let mut applied = 0;
    while let Ok(completion) = completions.try_recv() {
        store.apply_completion(&completion);
        applied += 1;
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    use async_trait::async_trait;
    use bytes::Bytes;
    use tempfile::tempdir;

    use crate::episode::TransferOutcome;
    use crate::error::StoreError;
    use crate::feed::{FeedEnclosure, FeedEntry, FetchedFeed};
    use crate::http::{BufferedResponse, ByteStream, HttpResponse};
    use crate::progress::NoopReporter;

    #[derive(Clone)]
    struct MockHttpClient {
        feeds: HashMap<String, (u16, String)>,
        audio_data: Vec<u8>,
    }

    impl MockHttpClient {
        fn with_feed(url: &str, xml: &str) -> Self {
            let mut feeds = HashMap::new();
            feeds.insert(url.to_string(), (200, xml.to_string()));
            Self {
                feeds,
                audio_data: b"fake audio".to_vec(),
            }
        }

        fn add_feed_url(mut self, url: &str, status: u16, xml: &str) -> Self {
            self.feeds.insert(url.to_string(), (status, xml.to_string()));
            self
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get_bytes(&self, url: &str) -> Result<BufferedResponse, reqwest::Error> {
            let (status, body) = self
                .feeds
                .get(url)
                .cloned()
                .unwrap_or((404, String::new()));

            Ok(BufferedResponse {
                status,
                body: Bytes::from(body),
            })
        }

        async fn get_stream(&self, _url: &str) -> Result<HttpResponse, reqwest::Error> {
            let data = self.audio_data.clone();
            let len = data.len() as u64;

            let stream: ByteStream =
                Box::pin(futures::stream::once(async move { Ok(Bytes::from(data)) }));

            Ok(HttpResponse {
                status: 200,
                content_length: Some(len),
                body: stream,
            })
        }
    }

    const SAMPLE_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Test Podcast</title>
    <description>A test podcast</description>
    <item>
      <title>Episode 1</title>
      <guid>ep1-guid</guid>
      <enclosure url="https://example.com/ep1.mp3" length="10" type="audio/mpeg"/>
    </item>
    <item>
      <title>Episode 2</title>
      <guid>ep2-guid</guid>
      <enclosure url="https://example.com/ep2.mp3" length="10" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

    const UNTITLED_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <item>
      <title>Episode 1</title>
      <guid>ep1-guid</guid>
      <enclosure url="https://example.com/ep1.mp3" length="10" type="audio/mpeg"/>
    </item>
  </channel>
</rss>"#;

    fn entry(guid: &str, title: &str) -> FeedEntry {
        FeedEntry {
            guid: Some(guid.to_string()),
            link: None,
            title: Some(title.to_string()),
            description: None,
            published: None,
            itunes_duration: None,
            enclosures: vec![FeedEnclosure {
                href: Some(format!("https://example.com/{guid}.mp3")),
                length: Some(10),
                mimetype: Some("audio/mpeg".to_string()),
            }],
        }
    }

    fn feed_with(title: &str, entries: Vec<FeedEntry>) -> FetchedFeed {
        FetchedFeed {
            title: Some(title.to_string()),
            description: None,
            published: None,
            malformed: None,
            entries,
        }
    }

    #[tokio::test]
    async fn add_feed_registers_and_reconciles() {
        let dir = tempdir().unwrap();
        let mut store = CastStore::new(dir.path());
        let client = MockHttpClient::with_feed("https://example.com/feed.xml", SAMPLE_FEED);

        let (cast_uid, stats) = add_feed(
            &client,
            &mut store,
            &RetryPolicy::default(),
            "https://example.com/feed.xml",
            None,
        )
        .await
        .unwrap();

        assert_eq!(cast_uid, "Test Podcast");
        assert_eq!(stats.new_episodes, 2);
        assert!(
            store.episodes()["Test Podcast"]
                .items
                .contains_key("ep1-guid")
        );
        assert!(dir.path().join("Test-Podcast").is_dir());
    }

    #[tokio::test]
    async fn add_feed_honors_the_title_override() {
        let dir = tempdir().unwrap();
        let mut store = CastStore::new(dir.path());
        let client = MockHttpClient::with_feed("https://example.com/feed.xml", SAMPLE_FEED);

        let (cast_uid, _) = add_feed(
            &client,
            &mut store,
            &RetryPolicy::default(),
            "https://example.com/feed.xml",
            Some("My Name"),
        )
        .await
        .unwrap();

        assert_eq!(cast_uid, "My Name");
        assert!(store.casts().contains_key("My Name"));
    }

    #[tokio::test]
    async fn add_feed_without_any_title_is_an_error() {
        let dir = tempdir().unwrap();
        let mut store = CastStore::new(dir.path());
        let client = MockHttpClient::with_feed("https://example.com/feed.xml", UNTITLED_FEED);

        let result = add_feed(
            &client,
            &mut store,
            &RetryPolicy::default(),
            "https://example.com/feed.xml",
            None,
        )
        .await;

        assert!(matches!(result, Err(SyncError::NoCastName { .. })));
        assert!(store.casts().is_empty());
    }

    #[tokio::test]
    async fn refresh_feed_rejects_unknown_casts() {
        let dir = tempdir().unwrap();
        let mut store = CastStore::new(dir.path());
        let client = MockHttpClient::with_feed("https://example.com/feed.xml", SAMPLE_FEED);

        let result = refresh_feed(
            &client,
            &mut store,
            &RetryPolicy::default(),
            "Nobody",
            &NoopReporter::shared(),
        )
        .await;

        assert!(matches!(
            result,
            Err(SyncError::Store(StoreError::UnknownCast { .. }))
        ));
    }

    #[tokio::test]
    async fn refresh_all_continues_past_broken_feeds() {
        let dir = tempdir().unwrap();
        let mut store = CastStore::new(dir.path());
        store
            .add_feed(
                "https://example.com/good.xml",
                "Good Cast",
                &feed_with("Good Cast", vec![entry("ep-1", "One")]),
            )
            .unwrap();
        store
            .add_feed(
                "https://example.com/broken.xml",
                "Broken Cast",
                &feed_with("Broken Cast", vec![]),
            )
            .unwrap();

        let client = MockHttpClient::with_feed("https://example.com/good.xml", SAMPLE_FEED)
            .add_feed_url("https://example.com/broken.xml", 404, "");

        let summary = refresh_all_feeds(
            &client,
            &mut store,
            &RetryPolicy::default(),
            &RefreshOptions::default(),
            &NoopReporter::shared(),
        )
        .await;

        assert_eq!(summary.refreshed, 1);
        assert_eq!(summary.failed, vec!["Broken Cast".to_string()]);
        // The good cast picked up both feed episodes
        assert_eq!(store.episodes()["Good Cast"].items.len(), 3);
        // The broken cast kept its old state
        assert!(store.episodes()["Broken Cast"].items.is_empty());
    }

    #[tokio::test]
    async fn enqueue_submits_only_downloadable_episodes() {
        let dir = tempdir().unwrap();
        let mut store = CastStore::new(dir.path());

        let mut no_enclosure = entry("ep-3", "Three");
        no_enclosure.enclosures.clear();
        store
            .add_feed(
                "https://example.com/feed.xml",
                "Test Cast",
                &feed_with(
                    "Test Cast",
                    vec![entry("ep-1", "One"), entry("ep-2", "Two"), no_enclosure],
                ),
            )
            .unwrap();
        store.apply_completion(&TransferCompletion {
            cast_uid: "Test Cast".to_string(),
            episode_uid: "ep-2".to_string(),
            outcome: TransferOutcome::Success {
                localname: "Two.mp3".to_string(),
                length: 10,
            },
        });

        let client = Arc::new(MockHttpClient::with_feed("unused", ""));
        let (scheduler, mut completions) = DownloadScheduler::new(client, 2);

        let summary = enqueue_pending(&store, &scheduler, false, false);

        assert_eq!(summary.submitted, 1);
        assert_eq!(summary.skipped, 2);

        let completion = completions.recv().await.unwrap();
        assert_eq!(completion.episode_uid, "ep-1");
        assert!(matches!(
            completion.outcome,
            TransferOutcome::Success { .. }
        ));
    }

    #[tokio::test]
    async fn force_resubmits_episodes_that_have_files() {
        let dir = tempdir().unwrap();
        let mut store = CastStore::new(dir.path());
        store
            .add_feed(
                "https://example.com/feed.xml",
                "Test Cast",
                &feed_with("Test Cast", vec![entry("ep-1", "One")]),
            )
            .unwrap();
        store.apply_completion(&TransferCompletion {
            cast_uid: "Test Cast".to_string(),
            episode_uid: "ep-1".to_string(),
            outcome: TransferOutcome::Success {
                localname: "One.mp3".to_string(),
                length: 10,
            },
        });

        let client = Arc::new(MockHttpClient::with_feed("unused", ""));
        let (scheduler, _completions) = DownloadScheduler::new(client, 2);

        let skipped = enqueue_pending(&store, &scheduler, false, false);
        assert_eq!(skipped.submitted, 0);

        let forced = enqueue_pending(&store, &scheduler, true, false);
        assert_eq!(forced.submitted, 1);
    }

    #[tokio::test]
    async fn drained_completions_update_the_store() {
        let dir = tempdir().unwrap();
        let mut store = CastStore::new(dir.path());
        store
            .add_feed(
                "https://example.com/feed.xml",
                "Test Cast",
                &feed_with("Test Cast", vec![entry("ep-1", "One")]),
            )
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(TransferCompletion {
            cast_uid: "Test Cast".to_string(),
            episode_uid: "ep-1".to_string(),
            outcome: TransferOutcome::Success {
                localname: "One.mp3".to_string(),
                length: 10,
            },
        })
        .unwrap();

        let applied = drain_completions(&mut store, &mut rx);

        assert_eq!(applied, 1);
        assert_eq!(
            store.episodes()["Test Cast"].items["ep-1"].localname,
            Some("One.mp3".to_string())
        );
    }
}
