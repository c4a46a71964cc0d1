use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;

use super::{normalize_whitespace, truncate_chars, Source};
use crate::error::SourceError;
use crate::models::MentionCandidate;

const ALGOLIA_URL: &str = "https://hn.algolia.com/api/v1/search_by_date";
const SOURCE_NAME: &str = "hackernews";

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"<[^>]+>").unwrap();
}

fn strip_html(value: Option<&str>) -> String {
    let Some(value) = value else {
        return String::new();
    };
    let without_tags = TAG_RE.replace_all(value, " ");
    unescape_entities(&normalize_whitespace(&without_tags))
}

/// Decodes the handful of HTML entities the Algolia API actually emits in
/// comment/story text (`&amp;`, `&lt;`, `&gt;`, `&quot;`, `&#39;`, numeric refs).
fn unescape_entities(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '&' {
            out.push(c);
            continue;
        }
        let mut entity = String::new();
        let mut consumed = Vec::new();
        while let Some(&next) = chars.peek() {
            if next == ';' || entity.len() > 10 {
                break;
            }
            entity.push(next);
            consumed.push(next);
            chars.next();
        }
        if chars.peek() == Some(&';') {
            chars.next();
            match entity.as_str() {
                "amp" => out.push('&'),
                "lt" => out.push('<'),
                "gt" => out.push('>'),
                "quot" => out.push('"'),
                "apos" | "#39" => out.push('\''),
                _ if entity.starts_with('#') => {
                    let code = entity
                        .strip_prefix("#x")
                        .or_else(|| entity.strip_prefix("#X"))
                        .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                        .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()));
                    match code.and_then(char::from_u32) {
                        Some(decoded) => out.push(decoded),
                        None => {
                            out.push('&');
                            out.push_str(&entity);
                            out.push(';');
                        }
                    }
                }
                _ => {
                    out.push('&');
                    out.push_str(&entity);
                    out.push(';');
                }
            }
        } else {
            out.push('&');
            out.push_str(&entity);
        }
    }
    out
}

pub struct HackerNewsSource {
    client: Client,
}

impl HackerNewsSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Source for HackerNewsSource {
    async fn search(
        &self,
        query: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<MentionCandidate>, SourceError> {
        let hits_per_page = limit.clamp(1, 100);
        let response = self
            .client
            .get(ALGOLIA_URL)
            .query(&[
                ("query", query.to_string()),
                ("tags", "story,comment".to_string()),
                ("hitsPerPage", hits_per_page.to_string()),
                (
                    "numericFilters",
                    format!("created_at_i>{}", since.timestamp()),
                ),
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

        let payload: Value = response.json().await.map_err(|error| SourceError::Http {
            source: SOURCE_NAME,
            error,
        })?;

        let hits = payload
            .get("hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(object_id) = hit.get("objectID").and_then(Value::as_str) else {
                continue;
            };

            let published_at = hit
                .get("created_at")
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now);

            let title = hit
                .get("title")
                .and_then(Value::as_str)
                .or_else(|| hit.get("story_title").and_then(Value::as_str))
                .unwrap_or("Hacker News mention")
                .trim()
                .to_string();

            let excerpt = strip_html(
                hit.get("comment_text")
                    .and_then(Value::as_str)
                    .or_else(|| hit.get("story_text").and_then(Value::as_str)),
            );

            let url = hit
                .get("url")
                .and_then(Value::as_str)
                .or_else(|| hit.get("story_url").and_then(Value::as_str))
                .map(str::to_string)
                .unwrap_or_else(|| format!("https://news.ycombinator.com/item?id={object_id}"));

            results.push(MentionCandidate {
                platform: SOURCE_NAME.to_string(),
                external_id: object_id.to_string(),
                url,
                title,
                body_excerpt: truncate_chars(&excerpt, 500),
                author: hit
                    .get("author")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                community: Some("Hacker News".to_string()),
                published_at,
                raw_payload: hit,
            });
        }

        Ok(results)
    }
}
