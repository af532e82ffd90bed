// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::error::FeedError;
use crate::http::HttpClient;

use super::parse::{FetchedFeed, parse_feed};

/// Retry configuration for transient fetch failures.
///
/// Delays double per attempt up to the cap. Definitive server answers and
/// parse failures are never retried; only transport-level errors are.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` includes the initial attempt and is
    /// clamped to at least 1
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay before the retry following the given failed attempt (1-indexed)
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

fn is_transient(error: &FeedError) -> bool {
    match error {
        FeedError::FetchFailed { source, .. } => {
            source.is_timeout() || source.is_connect() || source.is_body()
        }
        _ => false,
    }
}

/// Fetch and parse a feed from a URL, retrying transient transport failures
pub async fn fetch_feed<C: HttpClient>(
    client: &C,
    url: &str,
    retry: &RetryPolicy,
) -> Result<FetchedFeed, FeedError> {
    Url::parse(url)?;

    let mut attempt = 1;
    loop {
        match fetch_once(client, url).await {
            Ok(feed) => return Ok(feed),
            Err(error) if attempt < retry.max_attempts && is_transient(&error) => {
                let delay = retry.delay_for(attempt);
                warn!(
                    "Fetch attempt {attempt} for {url} failed ({error}), retrying in {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

async fn fetch_once<C: HttpClient>(client: &C, url: &str) -> Result<FetchedFeed, FeedError> {
    let response = client
        .get_bytes(url)
        .await
        .map_err(|e| FeedError::FetchFailed {
            url: url.to_string(),
            source: e,
        })?;

    if !(200..300).contains(&response.status) {
        return Err(FeedError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    parse_feed(&response.body, url)
}
