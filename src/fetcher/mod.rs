//! Video discovery sources.
//!
//! A [`VideoSource`] turns one configured [`Query`] into raw search results.
//! The pipeline only sees this trait, so the YouTube client can be swapped for
//! a fake in tests.
//!
//! # Submodules
//!
//! - [`youtube`]: YouTube Data API v3 client
//! - [`retry`]: Decorator retrying transient failures

pub mod retry;
pub mod youtube;

pub use retry::RetrySearch;
pub use youtube::YouTubeClient;

use crate::models::{Query, RawVideo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    RateLimited,
    Auth,
    Network,
    NotFound,
}

impl FetchErrorKind {
    /// Failures worth an immediate second attempt.
    pub fn is_transient(self) -> bool {
        matches!(self, FetchErrorKind::RateLimited | FetchErrorKind::Network)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FetchErrorKind::RateLimited => "rate_limited",
            FetchErrorKind::Auth => "auth",
            FetchErrorKind::Network => "network",
            FetchErrorKind::NotFound => "not_found",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::RateLimited, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Auth, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Network, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NotFound, message)
    }
}

/// Source of raw videos for a query.
pub trait VideoSource {
    /// Videos matching `query` published at or after `published_after`, at most `max_results`.
    async fn search(
        &self,
        query: &Query,
        published_after: DateTime<Utc>,
        max_results: u32,
    ) -> Result<Vec<RawVideo>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(FetchErrorKind::RateLimited.is_transient());
        assert!(FetchErrorKind::Network.is_transient());
        assert!(!FetchErrorKind::Auth.is_transient());
        assert!(!FetchErrorKind::NotFound.is_transient());
    }

    #[test]
    fn test_error_display() {
        let e = FetchError::rate_limited("quota exceeded");
        assert_eq!(e.to_string(), "rate_limited: quota exceeded");
        assert_eq!(serde_json::to_string(&e.kind).unwrap(), r#""rate_limited""#);
    }
}
