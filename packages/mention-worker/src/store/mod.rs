//! Data-access layer: the pipeline's only window onto persistent state.
//!
//! Kept as a trait (rather than a concrete `PgStore` threaded everywhere) so
//! the pipeline can be driven against an in-memory fake in tests without a
//! database, mirroring the teacher's `CrawlerStorage`/`Storage` seam.

pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::WorkerError;
use crate::ids::{BrandId, KeywordId, UserId};
use crate::models::{MentionCandidate, PendingAlert, RunStatus, SourceTask};

pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Cluster-wide, non-blocking advisory lock. Released when the
    /// connection holding it closes (on implementation drop, in `PgStore`).
    async fn try_acquire_singleton_lock(&self, key: i64) -> Result<bool, WorkerError>;

    async fn create_run(&self) -> Result<uuid::Uuid, WorkerError>;

    async fn finish_run(
        &self,
        run_id: uuid::Uuid,
        status: RunStatus,
        stats: Value,
        error: Option<&str>,
    ) -> Result<(), WorkerError>;

    async fn fetch_today_source_requests(
        &self,
        source_keys: &[&str],
    ) -> Result<HashMap<String, i64>, WorkerError>;

    async fn record_source_requests(
        &self,
        counts: &HashMap<String, i64>,
    ) -> Result<(), WorkerError>;

    async fn fetch_due_source_tasks(
        &self,
        enabled_sources: &[String],
        batch_size: i64,
    ) -> Result<Vec<SourceTask>, WorkerError>;

    async fn mark_source_task_success(
        &self,
        keyword_id: KeywordId,
        source: &str,
        checked_at: DateTime<Utc>,
        poll_interval_minutes: i64,
    ) -> Result<(), WorkerError>;

    async fn mark_source_task_error(
        &self,
        keyword_id: KeywordId,
        source: &str,
        error: &str,
        backoff_minutes: i64,
    ) -> Result<(), WorkerError>;

    async fn upsert_mention(&self, candidate: &MentionCandidate) -> Result<i64, WorkerError>;

    #[allow(clippy::too_many_arguments)]
    async fn insert_match(
        &self,
        user_id: UserId,
        keyword_id: KeywordId,
        brand_id: Option<BrandId>,
        mention_id: i64,
        matched_query: &str,
    ) -> Result<bool, WorkerError>;

    async fn enqueue_alert(
        &self,
        user_id: UserId,
        keyword_id: KeywordId,
        mention_id: i64,
    ) -> Result<bool, WorkerError>;

    async fn fetch_pending_alerts(
        &self,
        limit: i64,
        max_retries: i32,
    ) -> Result<Vec<PendingAlert>, WorkerError>;

    async fn mark_alert_sent(&self, alert_id: i64) -> Result<(), WorkerError>;

    async fn mark_alert_retry(
        &self,
        alert_id: i64,
        retry_count: i32,
        max_retries: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), WorkerError>;
}

/// Truncates an error string to the store's persisted column width. Shared by
/// `mark_source_task_error` and `mark_alert_retry` implementations.
pub(crate) fn truncate_error(message: &str) -> String {
    message.chars().take(800).collect()
}
