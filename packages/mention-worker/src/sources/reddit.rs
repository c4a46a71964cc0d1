use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{normalize_whitespace, truncate_chars, Source};
use crate::error::SourceError;
use crate::models::MentionCandidate;

const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";
const SEARCH_URL: &str = "https://oauth.reddit.com/search";
const SOURCE_NAME: &str = "reddit";

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Computes the cache expiry for a freshly fetched token: 60 seconds earlier
/// than the provider's own `expires_in`, with a 60-second floor, so the
/// cached token is never handed out past the point Reddit actually expires
/// it. Split out from `access_token` so the margin math is testable without
/// a token endpoint round trip.
fn token_expiry(now: DateTime<Utc>, expires_in: i64) -> DateTime<Utc> {
    now + chrono::Duration::seconds((expires_in - 60).max(60))
}

/// Maps one `Listing` child (a `t1_`/`t3_` thing) to a [`MentionCandidate`],
/// applying the recency guard against `since`. Returns `None` for children
/// missing the fields the pipeline requires to build an identity/URL — split
/// out from `search` so the field-derivation logic (permalink vs. `url`
/// fallback, title/body fallbacks, subreddit-derived community) can be
/// unit-tested without an HTTP round trip.
fn map_child(child: &Value, since: DateTime<Utc>) -> Option<MentionCandidate> {
    let data = child.get("data")?;

    let created_utc = data.get("created_utc").and_then(Value::as_f64)?;
    let published_at = Utc
        .timestamp_opt(created_utc as i64, 0)
        .single()
        .unwrap_or_else(Utc::now);
    if published_at < since {
        return None;
    }

    let item_name = data.get("name").and_then(Value::as_str)?.to_string();

    let permalink = data
        .get("permalink")
        .and_then(Value::as_str)
        .or_else(|| data.get("link_permalink").and_then(Value::as_str));
    let url = match permalink {
        Some(permalink) => format!("https://reddit.com{permalink}"),
        None => data.get("url").and_then(Value::as_str)?.to_string(),
    };

    let title = data
        .get("title")
        .and_then(Value::as_str)
        .or_else(|| data.get("link_title").and_then(Value::as_str))
        .unwrap_or("Reddit mention")
        .trim()
        .to_string();
    let body = data
        .get("selftext")
        .and_then(Value::as_str)
        .or_else(|| data.get("body").and_then(Value::as_str))
        .unwrap_or("");

    let community = data
        .get("subreddit")
        .and_then(Value::as_str)
        .map(|subreddit| format!("r/{subreddit}"))
        .unwrap_or_else(|| "Reddit".to_string());

    Some(MentionCandidate {
        platform: SOURCE_NAME.to_string(),
        external_id: item_name,
        url,
        title,
        body_excerpt: truncate_chars(&normalize_whitespace(body), 500),
        author: data.get("author").and_then(Value::as_str).map(str::to_string),
        community: Some(community),
        published_at,
        raw_payload: data.clone(),
    })
}

pub struct RedditSource {
    client: Client,
    client_id: String,
    client_secret: String,
    user_agent: String,
    token: Mutex<Option<CachedToken>>,
}

impl RedditSource {
    pub fn new(client: Client, client_id: String, client_secret: String, user_agent: String) -> Self {
        Self {
            client,
            client_id,
            client_secret,
            user_agent,
            token: Mutex::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, SourceError> {
        let now = Utc::now();
        {
            let cached = self.token.lock().await;
            if let Some(cached) = cached.as_ref() {
                if now < cached.expires_at {
                    return Ok(cached.token.clone());
                }
            }
        }

        let response = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header("User-Agent", &self.user_agent)
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|error| SourceError::Http {
                source: SOURCE_NAME,
                error,
            })?
            .error_for_status()
            .map_err(|error| SourceError::Http {
                source: SOURCE_NAME,
                error,
            })?;

        let payload: Value = response.json().await.map_err(|error| SourceError::Http {
            source: SOURCE_NAME,
            error,
        })?;

        let token = payload
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::Remote {
                source: SOURCE_NAME,
                message: "token response missing access_token".to_string(),
            })?
            .to_string();

        let expires_in = payload
            .get("expires_in")
            .and_then(Value::as_i64)
            .unwrap_or(3600);
        let expires_at = token_expiry(now, expires_in);

        *self.token.lock().await = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });

        Ok(token)
    }
}

#[async_trait]
impl Source for RedditSource {
    async fn search(
        &self,
        query: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<MentionCandidate>, SourceError> {
        let token = self.access_token().await?;
        let limit = limit.clamp(1, 100);

        let response = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("q", query),
                ("sort", "new"),
                ("limit", &limit.to_string()),
                ("type", "link,comment"),
                ("t", "day"),
                ("restrict_sr", "false"),
            ])
            .header("Authorization", format!("Bearer {token}"))
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(|error| SourceError::Http {
                source: SOURCE_NAME,
                error,
            })?
            .error_for_status()
            .map_err(|error| SourceError::Http {
                source: SOURCE_NAME,
                error,
            })?;

        let payload: Value = response.json().await.map_err(|error| SourceError::Http {
            source: SOURCE_NAME,
            error,
        })?;

        let children = payload
            .pointer("/data/children")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let results = children
            .iter()
            .filter_map(|child| map_child(child, since))
            .collect();

        Ok(results)
    }
}
