use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;

use super::{normalize_whitespace, truncate_chars, Source};
use crate::error::SourceError;
use crate::models::MentionCandidate;

const ARTICLES_URL: &str = "https://dev.to/api/articles";
const SOURCE_NAME: &str = "devto";

/// Best-effort Dev.to polling against the public articles API.
///
/// Dev.to has no full-text query search across all posts, so this adapter
/// fetches recent top articles and applies local keyword matching against
/// title/description/tags.
pub struct DevToSource {
    client: Client,
    top_days: u32,
}

impl DevToSource {
    pub fn new(client: Client, top_days: u32) -> Self {
        Self {
            client,
            top_days: top_days.max(1),
        }
    }
}

#[async_trait]
impl Source for DevToSource {
    async fn search(
        &self,
        query: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<MentionCandidate>, SourceError> {
        let normalized_query = query.to_lowercase().trim().to_string();
        if normalized_query.is_empty() {
            return Ok(Vec::new());
        }

        let per_page = limit.clamp(1, 100);
        let response = self
            .client
            .get(ARTICLES_URL)
            .query(&[
                ("top", self.top_days.to_string()),
                ("per_page", per_page.to_string()),
                ("page", "1".to_string()),
            ])
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

        let payload: Vec<Value> = response.json().await.map_err(|error| SourceError::Http {
            source: SOURCE_NAME,
            error,
        })?;

        let mut results = Vec::new();
        for item in payload {
            let published_raw = item
                .get("published_at")
                .and_then(Value::as_str)
                .or_else(|| item.get("created_at").and_then(Value::as_str));
            let published_at = published_raw
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);

            if published_at < since {
                continue;
            }

            let title = item
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("Dev.to mention")
                .to_string();
            let description = item
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let tag_text = match item.get("tag_list") {
                Some(Value::Array(tags)) => tags
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" "),
                Some(Value::String(s)) => s.clone(),
                _ => String::new(),
            };

            let haystack = format!("{title} {description} {tag_text}").to_lowercase();
            if !haystack.contains(&normalized_query) {
                continue;
            }

            let article_id = item.get("id").and_then(Value::as_i64);
            let url = item.get("url").and_then(Value::as_str);
            let (Some(article_id), Some(url)) = (article_id, url) else {
                continue;
            };

            let user = item.get("user");
            let author = user
                .and_then(|u| u.get("name"))
                .and_then(Value::as_str)
                .or_else(|| user.and_then(|u| u.get("username")).and_then(Value::as_str))
                .map(str::to_string);

            results.push(MentionCandidate {
                platform: SOURCE_NAME.to_string(),
                external_id: article_id.to_string(),
                url: url.to_string(),
                title: title.trim().to_string(),
                body_excerpt: truncate_chars(&normalize_whitespace(&description), 500),
                author,
                community: Some("dev.to".to_string()),
                published_at,
                raw_payload: item,
            });
        }

        Ok(results)
    }
}
