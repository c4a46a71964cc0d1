pub mod devto;
pub mod github_discussions;
pub mod hackernews;
pub mod reddit;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SourceError;
use crate::models::MentionCandidate;

/// One external system polled for mentions. Implementations must not retry
/// internally or apply their own second-guess on `since` beyond what their
/// upstream API already filters; the pipeline owns budget and backoff.
#[async_trait]
pub trait Source: Send + Sync {
    /// Returns at most `limit` mentions published at or after `since`.
    async fn search(
        &self,
        query: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<MentionCandidate>, SourceError>;
}

/// Collapses runs of whitespace to single spaces and trims the ends, the
/// normalization every adapter applies to excerpt text before truncating it.
pub(crate) fn normalize_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncates to at most `max_chars` characters, respecting char boundaries.
pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
