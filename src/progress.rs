use std::sync::Arc;

/// Events emitted during feed refresh and enclosure transfers
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A cast's feed is being fetched
    FetchingFeed { cast_uid: String, url: String },

    /// A cast's feed was fetched and reconciled into the store
    FeedReconciled {
        cast_uid: String,
        total_episodes: usize,
        new_episodes: usize,
    },

    /// Fetching or reconciling a cast's feed failed
    FeedFailed { cast_uid: String, error: String },

    /// A transfer is starting
    TransferStarting {
        /// Expected content length in bytes, if known
        content_length: Option<u64>,
    },

    /// Transfer progress update
    TransferProgress {
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
    },

    /// Transfer is being finalized (renamed from its temporary name)
    Finalizing,
}

/// Trait for reporting progress events.
///
/// Implementations can use this to display progress bars, log messages,
/// or collect statistics. Reports must be cheap and non-blocking; the
/// transfer loop calls them on every chunk.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress event
    fn report(&self, event: ProgressEvent);
}

/// A shared reference to a progress reporter
pub type SharedProgressReporter = Arc<dyn ProgressReporter>;

/// A no-op progress reporter that silently ignores all events.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: ProgressEvent) {
        // Intentionally empty
    }
}

impl NoopReporter {
    /// Create a new NoopReporter wrapped in an Arc
    pub fn shared() -> SharedProgressReporter {
        Arc::new(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_reporter_handles_all_events() {
        let reporter = NoopReporter;

        reporter.report(ProgressEvent::FetchingFeed {
            cast_uid: "Test Cast".to_string(),
            url: "https://example.com/feed.xml".to_string(),
        });

        reporter.report(ProgressEvent::FeedReconciled {
            cast_uid: "Test Cast".to_string(),
            total_episodes: 10,
            new_episodes: 5,
        });

        reporter.report(ProgressEvent::FeedFailed {
            cast_uid: "Test Cast".to_string(),
            error: "Connection timeout".to_string(),
        });

        reporter.report(ProgressEvent::TransferStarting {
            content_length: Some(1024),
        });

        reporter.report(ProgressEvent::TransferProgress {
            bytes_downloaded: 512,
            total_bytes: Some(1024),
        });

        reporter.report(ProgressEvent::Finalizing);
    }
}
