//! Plain data carried between the data-access layer, the source adapters,
//! and the pipeline. These are not `sqlx::FromRow` row-for-row mirrors of the
//! schema; they are the shapes the pipeline actually operates on, assembled
//! from joined queries in `store::postgres`.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::ids::{BrandId, KeywordId, UserId};

/// A (keyword, source) pair whose polling schedule is due.
#[derive(Debug, Clone)]
pub struct SourceTask {
    pub keyword_id: KeywordId,
    pub user_id: UserId,
    pub brand_id: Option<BrandId>,
    pub query: String,
    pub source: String,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// A mention candidate as returned by a source adapter, before it has a
/// surrogate id assigned by the store.
#[derive(Debug, Clone)]
pub struct MentionCandidate {
    pub platform: String,
    pub external_id: String,
    pub url: String,
    pub title: String,
    pub body_excerpt: String,
    pub author: Option<String>,
    pub community: Option<String>,
    pub published_at: DateTime<Utc>,
    pub raw_payload: Value,
}

/// An alert ready to attempt (or retry) delivery, with everything the
/// notifier needs already joined in.
#[derive(Debug, Clone)]
pub struct PendingAlert {
    pub alert_id: i64,
    pub retry_count: i32,
    pub user_id: UserId,
    pub keyword_id: KeywordId,
    pub webhook_url: Option<String>,
    pub query: String,
    pub brand_name: Option<String>,
    pub mention: MentionCandidate,
}

/// Terminal/in-flight state of a `worker_runs` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}
