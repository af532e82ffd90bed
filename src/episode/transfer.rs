use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use url::Url;

use crate::error::TransferError;
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter};

/// Suffix for in-flight downloads; the file only takes its final name once
/// the body has been fully received
const TEMP_SUFFIX: &str = ".partial";

/// Everything needed to transfer one enclosure to disk
#[derive(Debug, Clone)]
pub struct TransferJob {
    pub cast_uid: String,
    pub episode_uid: String,
    /// Enclosure URL
    pub url: String,
    /// Directory the file lands in
    pub directory: PathBuf,
    /// Filename resolved from episode metadata, if any
    pub filename: Option<String>,
    /// Cast-level filename override, takes priority over everything else
    pub filename_override: Option<String>,
    /// Enclosure-advertised size, used for post-transfer verification
    pub expected_length: Option<u64>,
    pub overwrite: bool,
}

/// Terminal result of a transfer.
///
/// This is a closed set; callers match exhaustively and never see a partial
/// file under its final name without knowing it is partial.
#[derive(Debug)]
pub enum TransferOutcome {
    /// Body received in full
    Success { localname: String, length: u64 },

    /// File was already on disk; nothing was fetched
    AlreadyExists { localname: String, length: u64 },

    /// Server closed the body short of the announced length. The truncated
    /// file keeps its final name so the transfer can be repeated later.
    PartialContent {
        localname: String,
        received: u64,
        advertised: u64,
    },

    /// Nothing usable was written
    Failure { error: TransferError },
}

/// Transfer a single enclosure to disk.
///
/// Writes to a temporary name and renames into place once the body ends, so
/// a crash mid-transfer never leaves a truncated file under its final name.
pub async fn execute_transfer<C: HttpClient>(
    client: &C,
    job: &TransferJob,
    reporter: &SharedProgressReporter,
) -> TransferOutcome {
    // Parsing also percent-escapes characters feeds love to leave raw, like
    // spaces in enclosure paths
    let request_url = match Url::parse(&job.url) {
        Ok(url) => url,
        Err(e) => {
            return TransferOutcome::Failure {
                error: TransferError::InvalidUrl {
                    url: job.url.clone(),
                    source: e,
                },
            };
        }
    };

    let localname = resolve_local_name(job, &request_url);
    let final_path = job.directory.join(&localname);

    if !job.overwrite && final_path.exists() {
        return reuse_existing(job, &localname, &final_path);
    }

    let response = match client.get_stream(request_url.as_str()).await {
        Ok(response) => response,
        Err(e) => {
            return TransferOutcome::Failure {
                error: TransferError::HttpFailed {
                    url: job.url.clone(),
                    source: e,
                },
            };
        }
    };

    if response.status >= 400 {
        return TransferOutcome::Failure {
            error: TransferError::HttpStatus {
                url: job.url.clone(),
                status: response.status,
            },
        };
    }

    reporter.report(ProgressEvent::TransferStarting {
        content_length: response.content_length,
    });

    if let Err(e) = tokio::fs::create_dir_all(&job.directory).await {
        return TransferOutcome::Failure {
            error: TransferError::FileCreateFailed {
                path: job.directory.clone(),
                source: e,
            },
        };
    }

    let temp_path = job.directory.join(format!("{localname}{TEMP_SUFFIX}"));

    let received = match write_body(
        &job.url,
        &temp_path,
        response.body,
        response.content_length,
        reporter,
    )
    .await
    {
        Ok(received) => received,
        Err(error) => {
            remove_temp(&temp_path).await;
            return TransferOutcome::Failure { error };
        }
    };

    reporter.report(ProgressEvent::Finalizing);

    // A short body still gets renamed into place; the outcome records how
    // much actually arrived
    if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
        remove_temp(&temp_path).await;
        return TransferOutcome::Failure {
            error: TransferError::RenameFailed {
                path: temp_path,
                source: e,
            },
        };
    }

    // Only a short body is partial; a body longer than announced is a
    // server misdeclaration and the transfer itself is complete
    if let Some(advertised) = response.content_length
        && received < advertised
    {
        warn!("{localname} may be incomplete: received {received} of {advertised} bytes");
        return TransferOutcome::PartialContent {
            localname,
            received,
            advertised,
        };
    }

    if let Some(expected) = job.expected_length
        && expected != received
    {
        warn!("Download of {localname} succeeded, but size {received} does not match enclosure length {expected}");
    }

    TransferOutcome::Success {
        localname,
        length: received,
    }
}

fn reuse_existing(job: &TransferJob, localname: &str, final_path: &Path) -> TransferOutcome {
    let length = match std::fs::metadata(final_path) {
        Ok(metadata) => metadata.len(),
        Err(e) => {
            return TransferOutcome::Failure {
                error: TransferError::StatFailed {
                    path: final_path.to_path_buf(),
                    source: e,
                },
            };
        }
    };

    if let Some(expected) = job.expected_length
        && expected != length
    {
        warn!(
            "{} exists, but size {length} does not match enclosure length {expected}",
            final_path.display()
        );
    }

    TransferOutcome::AlreadyExists {
        localname: localname.to_string(),
        length,
    }
}

async fn write_body(
    url: &str,
    temp_path: &Path,
    mut stream: crate::http::ByteStream,
    content_length: Option<u64>,
    reporter: &SharedProgressReporter,
) -> Result<u64, TransferError> {
    let mut file = File::create(temp_path)
        .await
        .map_err(|e| TransferError::FileCreateFailed {
            path: temp_path.to_path_buf(),
            source: e,
        })?;

    let mut received: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| TransferError::StreamFailed {
            url: url.to_string(),
            source: e,
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| TransferError::FileWriteFailed {
                path: temp_path.to_path_buf(),
                source: e,
            })?;

        received += chunk.len() as u64;

        reporter.report(ProgressEvent::TransferProgress {
            bytes_downloaded: received,
            total_bytes: content_length,
        });
    }

    file.flush()
        .await
        .map_err(|e| TransferError::FileWriteFailed {
            path: temp_path.to_path_buf(),
            source: e,
        })?;

    Ok(received)
}

async fn remove_temp(temp_path: &Path) {
    if tokio::fs::remove_file(temp_path).await.is_err() {
        warn!("Could not remove temporary file {}", temp_path.display());
    }
}

/// Pick the on-disk name: cast override, then the metadata-resolved name,
/// then the last URL path segment, then a fixed fallback
fn resolve_local_name(job: &TransferJob, url: &Url) -> String {
    if let Some(ref name) = job.filename_override {
        return name.clone();
    }
    if let Some(ref name) = job.filename {
        return name.clone();
    }
    url_basename(url).unwrap_or_else(|| "download".to_string())
}

fn url_basename(url: &Url) -> Option<String> {
    let name = url.path_segments()?.next_back()?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{BufferedResponse, ByteStream, HttpResponse};
    use crate::progress::{NoopReporter, ProgressReporter};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct MockHttpClient {
        response_data: Vec<u8>,
        status: u16,
        content_length: Option<u64>,
        calls: AtomicUsize,
        requested_urls: Mutex<Vec<String>>,
    }

    impl MockHttpClient {
        fn new(data: &[u8], status: u16, content_length: Option<u64>) -> Self {
            Self {
                response_data: data.to_vec(),
                status,
                content_length,
                calls: AtomicUsize::new(0),
                requested_urls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get_bytes(&self, _url: &str) -> Result<BufferedResponse, reqwest::Error> {
            unimplemented!("transfers always stream")
        }

        async fn get_stream(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested_urls.lock().unwrap().push(url.to_string());
            let data = self.response_data.clone();

            let stream: ByteStream =
                Box::pin(futures::stream::once(async move { Ok(Bytes::from(data)) }));

            Ok(HttpResponse {
                status: self.status,
                content_length: self.content_length,
                body: stream,
            })
        }
    }

    struct RecordingReporter {
        events: Mutex<Vec<ProgressEvent>>,
    }

    impl ProgressReporter for RecordingReporter {
        fn report(&self, event: ProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn make_job(dir: &Path) -> TransferJob {
        TransferJob {
            cast_uid: "Test Cast".to_string(),
            episode_uid: "ep-1".to_string(),
            url: "https://example.com/files/episode.mp3".to_string(),
            directory: dir.to_path_buf(),
            filename: Some("episode.mp3".to_string()),
            filename_override: None,
            expected_length: Some(18),
            overwrite: false,
        }
    }

    #[tokio::test]
    async fn transfer_writes_file() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::new(b"test audio content", 200, Some(18));
        let job = make_job(dir.path());
        let reporter = NoopReporter::shared();

        let outcome = execute_transfer(&client, &job, &reporter).await;

        match outcome {
            TransferOutcome::Success { localname, length } => {
                assert_eq!(localname, "episode.mp3");
                assert_eq!(length, 18);
            }
            other => panic!("Expected Success, got {other:?}"),
        }

        let final_path = dir.path().join("episode.mp3");
        assert!(final_path.exists());
        assert_eq!(std::fs::read(&final_path).unwrap(), b"test audio content");
        assert!(!dir.path().join("episode.mp3.partial").exists());
    }

    #[tokio::test]
    async fn transfer_reports_progress_events() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::new(b"test audio content", 200, Some(18));
        let job = make_job(dir.path());

        let recording = std::sync::Arc::new(RecordingReporter {
            events: Mutex::new(Vec::new()),
        });
        let reporter: SharedProgressReporter = recording.clone();

        execute_transfer(&client, &job, &reporter).await;

        let events = recording.events.lock().unwrap();
        assert!(matches!(
            events.first(),
            Some(ProgressEvent::TransferStarting {
                content_length: Some(18)
            })
        ));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, ProgressEvent::TransferProgress { .. }))
        );
        assert!(events.iter().any(|e| matches!(e, ProgressEvent::Finalizing)));
    }

    #[tokio::test]
    async fn existing_file_is_reused_without_a_request() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("episode.mp3"), b"previously downloaded").unwrap();

        let client = MockHttpClient::new(b"new content", 200, Some(11));
        let job = make_job(dir.path());
        let reporter = NoopReporter::shared();

        let outcome = execute_transfer(&client, &job, &reporter).await;

        match outcome {
            TransferOutcome::AlreadyExists { localname, length } => {
                assert_eq!(localname, "episode.mp3");
                assert_eq!(length, 21);
            }
            other => panic!("Expected AlreadyExists, got {other:?}"),
        }

        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            std::fs::read(dir.path().join("episode.mp3")).unwrap(),
            b"previously downloaded"
        );
    }

    #[tokio::test]
    async fn overwrite_replaces_existing_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("episode.mp3"), b"old").unwrap();

        let client = MockHttpClient::new(b"test audio content", 200, Some(18));
        let mut job = make_job(dir.path());
        job.overwrite = true;
        let reporter = NoopReporter::shared();

        let outcome = execute_transfer(&client, &job, &reporter).await;

        assert!(matches!(outcome, TransferOutcome::Success { .. }));
        assert_eq!(
            std::fs::read(dir.path().join("episode.mp3")).unwrap(),
            b"test audio content"
        );
    }

    #[tokio::test]
    async fn short_body_is_reported_as_partial_content() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::new(b"test audio content", 200, Some(100));
        let job = make_job(dir.path());
        let reporter = NoopReporter::shared();

        let outcome = execute_transfer(&client, &job, &reporter).await;

        match outcome {
            TransferOutcome::PartialContent {
                localname,
                received,
                advertised,
            } => {
                assert_eq!(localname, "episode.mp3");
                assert_eq!(received, 18);
                assert_eq!(advertised, 100);
            }
            other => panic!("Expected PartialContent, got {other:?}"),
        }

        // The truncated file still takes its final name
        assert!(dir.path().join("episode.mp3").exists());
        assert!(!dir.path().join("episode.mp3.partial").exists());
    }

    #[tokio::test]
    async fn body_longer_than_advertised_is_still_a_success() {
        let dir = tempdir().unwrap();
        // 18 bytes arrive although the server announced 5
        let client = MockHttpClient::new(b"test audio content", 200, Some(5));
        let mut job = make_job(dir.path());
        job.expected_length = Some(5);
        let reporter = NoopReporter::shared();

        let outcome = execute_transfer(&client, &job, &reporter).await;

        match outcome {
            TransferOutcome::Success { localname, length } => {
                assert_eq!(localname, "episode.mp3");
                assert_eq!(length, 18);
            }
            other => panic!("Expected Success, got {other:?}"),
        }
        assert_eq!(
            std::fs::read(dir.path().join("episode.mp3")).unwrap(),
            b"test audio content"
        );
    }

    #[tokio::test]
    async fn http_error_yields_failure_and_no_file() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::new(b"Not Found", 404, None);
        let job = make_job(dir.path());
        let reporter = NoopReporter::shared();

        let outcome = execute_transfer(&client, &job, &reporter).await;

        match outcome {
            TransferOutcome::Failure { error } => match error {
                TransferError::HttpStatus { status, .. } => assert_eq!(status, 404),
                other => panic!("Expected HttpStatus, got {other:?}"),
            },
            other => panic!("Expected Failure, got {other:?}"),
        }

        assert!(!dir.path().join("episode.mp3").exists());
        assert!(!dir.path().join("episode.mp3.partial").exists());
    }

    #[tokio::test]
    async fn filename_override_takes_priority() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::new(b"test audio content", 200, Some(18));
        let mut job = make_job(dir.path());
        job.filename_override = Some("Custom Name.mp3".to_string());
        let reporter = NoopReporter::shared();

        let outcome = execute_transfer(&client, &job, &reporter).await;

        match outcome {
            TransferOutcome::Success { localname, .. } => {
                assert_eq!(localname, "Custom Name.mp3");
            }
            other => panic!("Expected Success, got {other:?}"),
        }
        assert!(dir.path().join("Custom Name.mp3").exists());
    }

    #[tokio::test]
    async fn url_basename_is_the_fallback_name() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::new(b"test audio content", 200, Some(18));
        let mut job = make_job(dir.path());
        job.filename = None;
        job.url = "https://example.com/files/show-42.mp3?token=abc".to_string();
        let reporter = NoopReporter::shared();

        let outcome = execute_transfer(&client, &job, &reporter).await;

        match outcome {
            TransferOutcome::Success { localname, .. } => {
                assert_eq!(localname, "show-42.mp3");
            }
            other => panic!("Expected Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn spaces_in_the_url_are_escaped_before_dispatch() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::new(b"test audio content", 200, Some(18));
        let mut job = make_job(dir.path());
        job.url = "https://example.com/files/episode one.mp3".to_string();
        let reporter = NoopReporter::shared();

        let outcome = execute_transfer(&client, &job, &reporter).await;

        assert!(matches!(outcome, TransferOutcome::Success { .. }));
        assert_eq!(
            client.requested_urls.lock().unwrap().as_slice(),
            ["https://example.com/files/episode%20one.mp3"]
        );
    }

    #[tokio::test]
    async fn malformed_url_is_a_failure() {
        let dir = tempdir().unwrap();
        let client = MockHttpClient::new(b"", 200, None);
        let mut job = make_job(dir.path());
        job.url = "not a url at all".to_string();
        let reporter = NoopReporter::shared();

        let outcome = execute_transfer(&client, &job, &reporter).await;

        match outcome {
            TransferOutcome::Failure { error } => {
                assert!(matches!(error, TransferError::InvalidUrl { .. }));
            }
            other => panic!("Expected Failure, got {other:?}"),
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn url_basename_handles_pathless_urls() {
        let pathless = Url::parse("https://example.com/").unwrap();
        assert_eq!(url_basename(&pathless), None);

        let with_file = Url::parse("https://example.com/a/b.mp3").unwrap();
        assert_eq!(url_basename(&with_file), Some("b.mp3".to_string()));
    }
}
