//! Shared fixtures for the pipeline integration tests.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;

use mention_worker::config::Settings;
use mention_worker::models::MentionCandidate;

/// A `Settings` value with every source disabled except `hackernews`, and
/// batch sizes generous enough that tests never have to worry about paging.
pub fn base_settings() -> Settings {
    let mut source_enabled = HashMap::new();
    let mut source_poll_interval_minutes = HashMap::new();
    let mut source_daily_request_limit = HashMap::new();

    for key in ["hackernews", "devto", "github_discussions", "reddit", "google", "brave", "producthunt"] {
        source_enabled.insert(key, key == "hackernews");
        source_poll_interval_minutes.insert(key, 15);
        source_daily_request_limit.insert(key, None);
    }

    Settings {
        database_url: "postgres://unused/test".to_string(),
        worker_lock_key: 84_521_791,
        free_tier_mode: false,
        poll_interval_minutes: 15,
        overlap_minutes: 3,
        per_source_limit: 40,
        source_task_batch_size: 300,
        alert_batch_size: 250,
        max_alert_retries: 3,
        retry_base_seconds: 60,
        retry_max_seconds: 1800,
        reddit_client_id: None,
        reddit_client_secret: None,
        reddit_user_agent: "mention-worker/1.0".to_string(),
        devto_top_days: 7,
        google_api_key: None,
        google_cse_id: None,
        brave_api_key: None,
        github_token: None,
        request_timeout_seconds: 20,
        source_keys: vec![
            "hackernews",
            "devto",
            "github_discussions",
            "reddit",
            "google",
            "brave",
            "producthunt",
        ],
        source_enabled,
        source_poll_interval_minutes,
        source_daily_request_limit,
    }
}

/// A plausible mention candidate for a given platform/external id pair.
pub fn sample_mention(platform: &str, external_id: &str) -> MentionCandidate {
    MentionCandidate {
        platform: platform.to_string(),
        external_id: external_id.to_string(),
        url: format!("https://example.com/{external_id}"),
        title: "Acme launches a new thing".to_string(),
        body_excerpt: "We are excited to announce Acme's new thing.".to_string(),
        author: Some("alice".to_string()),
        community: Some("Hacker News".to_string()),
        published_at: Utc::now(),
        raw_payload: Value::Null,
    }
}
