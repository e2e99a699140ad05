use std::{collections::HashMap, time::Duration};

use thiserror::Error;

/// Hosted score files from before the service existed, one per game family.
pub const LEGACY_FEED_URLS: [&str; 3] = [
    "https://sites.google.com/site/esundholm/test/breakoutHighScore.txt",
    "https://sites.google.com/site/esundholm/test/columnsHighScore.txt",
    "https://sites.google.com/site/esundholm/test/wordonwordHighScore.txt",
];

pub const DEFAULT_FEED_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("feed request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("feed body from {url} could not be read: {reason}")]
    Body { url: String, reason: String },
    #[error("no feed registered for {0}")]
    NotFound(String),
}

pub trait FeedSource: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String, FeedError>;
}

/// Fetches feeds over HTTP(S) with a blocking client.
pub struct HttpFeedSource {
    agent: ureq::Agent,
}

impl HttpFeedSource {
    pub fn new(timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent }
    }
}

impl Default for HttpFeedSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_FEED_TIMEOUT_SECS))
    }
}

impl FeedSource for HttpFeedSource {
    fn fetch(&self, url: &str) -> Result<String, FeedError> {
        let mut response = self.agent.get(url).call().map_err(|err| FeedError::Request {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        response
            .body_mut()
            .read_to_string()
            .map_err(|err| FeedError::Body {
                url: url.to_string(),
                reason: err.to_string(),
            })
    }
}

/// Serves feeds from memory. Used for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticFeedSource {
    feeds: HashMap<String, String>,
}

impl StaticFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_feed(mut self, url: impl Into<String>, body: impl Into<String>) -> Self {
        self.feeds.insert(url.into(), body.into());
        self
    }
}

impl FeedSource for StaticFeedSource {
    fn fetch(&self, url: &str) -> Result<String, FeedError> {
        self.feeds
            .get(url)
            .cloned()
            .ok_or_else(|| FeedError::NotFound(url.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_source_serves_registered_feeds_only() {
        let source = StaticFeedSource::new().with_feed("mem://a", "breakout\n");
        assert_eq!(source.fetch("mem://a").unwrap(), "breakout\n");
        assert_eq!(
            source.fetch("mem://b"),
            Err(FeedError::NotFound("mem://b".to_string()))
        );
    }

    #[test]
    fn http_source_reports_unreachable_host() {
        let source = HttpFeedSource::new(Duration::from_millis(200));
        let err = source.fetch("http://127.0.0.1:1/feed.txt").unwrap_err();
        assert!(matches!(err, FeedError::Request { .. }));
    }
}
