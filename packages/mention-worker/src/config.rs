//! Typed configuration assembled from environment variables.

use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};

use crate::registry::SOURCE_DEFINITIONS;

/// Runtime configuration for one invocation of the worker.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub worker_lock_key: i64,
    pub free_tier_mode: bool,
    pub poll_interval_minutes: i64,
    pub overlap_minutes: i64,
    pub per_source_limit: u32,
    pub source_task_batch_size: i64,
    pub alert_batch_size: i64,
    pub max_alert_retries: i32,
    pub retry_base_seconds: i64,
    pub retry_max_seconds: i64,
    pub reddit_client_id: Option<String>,
    pub reddit_client_secret: Option<String>,
    pub reddit_user_agent: String,
    pub devto_top_days: u32,
    pub google_api_key: Option<String>,
    pub google_cse_id: Option<String>,
    pub brave_api_key: Option<String>,
    pub github_token: Option<String>,
    pub request_timeout_seconds: u64,
    pub source_keys: Vec<&'static str>,
    pub source_enabled: HashMap<&'static str, bool>,
    pub source_poll_interval_minutes: HashMap<&'static str, i64>,
    pub source_daily_request_limit: HashMap<&'static str, Option<i64>>,
}

impl Settings {
    /// Loads settings from the process environment, applying `.env`/`.env.local`
    /// if present (development convenience; production relies on the real
    /// environment already being populated).
    pub fn from_env() -> Result<Self> {
        let free_tier_mode = parse_bool(env::var("FREE_TIER_MODE").ok(), true);
        let poll_interval_minutes = parse_or_default("POLL_INTERVAL_MINUTES", 15)?;

        let mut source_enabled = HashMap::new();
        let mut source_poll_interval_minutes = HashMap::new();
        let mut source_daily_request_limit = HashMap::new();
        let mut source_keys = Vec::with_capacity(SOURCE_DEFINITIONS.len());

        for definition in SOURCE_DEFINITIONS {
            let enabled = parse_bool(
                env::var(format!("SOURCE_{}_ENABLED", definition.env_slug)).ok(),
                definition.default_enabled,
            );
            let poll_minutes: i64 = env::var(format!(
                "SOURCE_{}_POLL_INTERVAL_MINUTES",
                definition.env_slug
            ))
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(poll_interval_minutes)
            .max(1);
            let mut daily_limit = env::var(format!(
                "SOURCE_{}_DAILY_REQUEST_LIMIT",
                definition.env_slug
            ))
            .ok()
            .and_then(|raw| parse_optional_positive_int(&raw));
            if free_tier_mode && daily_limit.is_none() {
                daily_limit = definition.free_tier_daily_limit;
            }

            source_keys.push(definition.key);
            source_enabled.insert(definition.key, enabled);
            source_poll_interval_minutes.insert(definition.key, poll_minutes);
            source_daily_request_limit.insert(definition.key, daily_limit);
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            worker_lock_key: parse_or_default("WORKER_LOCK_KEY", 84_521_791)?,
            free_tier_mode,
            poll_interval_minutes,
            overlap_minutes: parse_or_default("SOURCE_OVERLAP_MINUTES", 3)?.max(0),
            per_source_limit: parse_or_default("PER_SOURCE_RESULT_LIMIT", 40)?,
            source_task_batch_size: parse_or_default("SOURCE_TASK_BATCH_SIZE", 300)?,
            alert_batch_size: parse_or_default("ALERT_BATCH_SIZE", 250)?,
            max_alert_retries: parse_or_default("MAX_ALERT_RETRIES", 3)?,
            retry_base_seconds: parse_or_default("ALERT_RETRY_BASE_SECONDS", 60)?,
            retry_max_seconds: parse_or_default("ALERT_RETRY_MAX_SECONDS", 1800)?,
            reddit_client_id: env::var("REDDIT_CLIENT_ID").ok(),
            reddit_client_secret: env::var("REDDIT_CLIENT_SECRET").ok(),
            reddit_user_agent: env::var("REDDIT_USER_AGENT")
                .unwrap_or_else(|_| "mention-worker/1.0".to_string()),
            devto_top_days: parse_or_default("DEVTO_TOP_DAYS", 7)?,
            google_api_key: env::var("GOOGLE_API_KEY").ok(),
            google_cse_id: env::var("GOOGLE_CSE_ID").ok(),
            brave_api_key: env::var("BRAVE_API_KEY").ok(),
            github_token: env::var("GITHUB_TOKEN").ok(),
            request_timeout_seconds: parse_or_default("REQUEST_TIMEOUT_SECONDS", 20)?,
            source_keys,
            source_enabled,
            source_poll_interval_minutes,
            source_daily_request_limit,
        })
    }

    pub fn is_source_enabled(&self, source: &str) -> bool {
        self.source_enabled.get(source).copied().unwrap_or(false)
    }

    pub fn poll_interval_for_source(&self, source: &str) -> i64 {
        self.source_poll_interval_minutes
            .get(source)
            .copied()
            .unwrap_or(self.poll_interval_minutes)
    }

    pub fn daily_request_limit_for_source(&self, source: &str) -> Option<i64> {
        self.source_daily_request_limit
            .get(source)
            .copied()
            .flatten()
    }
}

fn parse_bool(value: Option<String>, default: bool) -> bool {
    match value {
        Some(raw) => matches!(raw.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn parse_optional_positive_int(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed: i64 = trimmed.parse().ok()?;
    if parsed < 1 {
        None
    } else {
        Some(parsed)
    }
}

fn parse_or_default<T>(var: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|err| anyhow::anyhow!("{var} must be a valid number: {err}")),
        Err(_) => Ok(default),
    }
}
