mod duration;
mod fetch;
mod parse;

pub use duration::parse_itunes_duration;
pub use fetch::{RetryPolicy, fetch_feed};
pub use parse::{FeedEnclosure, FeedEntry, FetchedFeed, parse_feed};
