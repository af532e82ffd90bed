use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur when fetching or parsing syndication feeds
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to fetch feed from {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for feed {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to parse feed: {0}")]
    ParseFailed(#[from] feed_rs::parser::ParseFeedError),

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Feed contains neither a description nor any entries")]
    Empty { url: String },

    #[error("Feed entry '{entry}' contains multiple enclosures")]
    MultipleEnclosures { entry: String },
}

/// Errors that can occur while transferring an enclosure to disk.
///
/// These are carried inside `TransferOutcome::Failure`; a size mismatch or a
/// short body is not an error here (see the outcome type).
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid enclosure URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("HTTP request failed for {url}: {source}")]
    HttpFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Stream error while downloading {url}: {source}")]
    StreamFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to create file {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to inspect file {path}: {source}")]
    StatFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to rename {path}: {source}")]
    RenameFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by cast store mutations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Cast '{cast_uid}' already exists")]
    CastExists { cast_uid: String },

    #[error("Unknown cast '{cast_uid}'")]
    UnknownCast { cast_uid: String },

    #[error("Unknown episode '{episode_uid}' in cast '{cast_uid}'")]
    UnknownEpisode {
        cast_uid: String,
        episode_uid: String,
    },

    #[error("Cast '{cast_uid}' would share directory '{directory}' with cast '{existing}'")]
    DirectoryCollision {
        cast_uid: String,
        existing: String,
        directory: String,
    },

    #[error("Invalid cast name '{name}'")]
    InvalidName { name: String },

    #[error("Cast directory not found: {0}")]
    CastDirMissing(PathBuf),

    #[error("Directory already exists: {0}")]
    CastDirExists(PathBuf),

    #[error("Deleting cast files is not implemented")]
    DeleteFilesUnsupported,

    #[error("Filesystem error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),
}

/// Errors that can occur in the persistence port
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to read state file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write state file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectoryFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse state JSON in {path}: {source}")]
    JsonParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize state: {0}")]
    JsonSerializeFailed(#[from] serde_json::Error),
}

/// Errors from the orchestration layer
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No cast name: feed at {url} carries no title and none was given")]
    NoCastName { url: String },

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
