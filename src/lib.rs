pub mod config;
pub mod episode;
pub mod error;
pub mod feed;
pub mod http;
pub mod progress;
pub mod scheduler;
pub mod store;
pub mod sync;

// Re-export main types for convenience
pub use config::Config;
pub use episode::{TransferJob, TransferOutcome, resolve_filename, sanitize_name};
pub use error::{FeedError, StateError, StoreError, SyncError, TransferError};
pub use feed::{FetchedFeed, RetryPolicy, fetch_feed, parse_feed};
pub use http::{BufferedResponse, HttpClient, HttpResponse, ReqwestClient};
pub use progress::{NoopReporter, ProgressEvent, ProgressReporter, SharedProgressReporter};
pub use scheduler::{DownloadScheduler, SchedulerStatus, TaskKey, TransferCompletion};
pub use store::{Cast, CastEpisodes, CastStore, EpisodeRecord, JsonStatePort, StatePort};
pub use sync::{
    EnqueueSummary, RefreshOptions, RefreshSummary, add_feed, drain_completions, enqueue_pending,
    refresh_all_feeds, refresh_feed,
};
