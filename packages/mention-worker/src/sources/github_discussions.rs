use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};

use super::{normalize_whitespace, truncate_chars, Source};
use crate::error::SourceError;
use crate::models::MentionCandidate;

const GRAPHQL_URL: &str = "https://api.github.com/graphql";
const SOURCE_NAME: &str = "github_discussions";
const USER_AGENT: &str = "signalze-mention-worker/1.0";

const SEARCH_QUERY: &str = r#"
query SearchDiscussions($query: String!, $first: Int!) {
  search(query: $query, type: DISCUSSION, first: $first) {
    nodes {
      ... on Discussion {
        id
        url
        title
        bodyText
        createdAt
        updatedAt
        author {
          login
        }
        repository {
          name
          owner {
            login
          }
        }
      }
    }
  }
}
"#;

fn parse_dt(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?;
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Maps one GraphQL `Discussion` node to a [`MentionCandidate`], applying the
/// recency guard against `since`. Returns `None` for nodes that are missing
/// an id/url or fall outside the recency window — split out from `search` so
/// the field-derivation logic (title/community/author fallbacks, excerpt
/// normalization) can be unit-tested without an HTTP round trip.
fn map_node(node: Value, since: DateTime<Utc>) -> Option<MentionCandidate> {
    let external_id = node
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    let url = node
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    if external_id.is_empty() || url.is_empty() {
        return None;
    }

    let created_at = parse_dt(node.get("createdAt").and_then(Value::as_str));
    let updated_at = parse_dt(node.get("updatedAt").and_then(Value::as_str));
    let effective_time = updated_at.or(created_at).unwrap_or_else(Utc::now);
    if effective_time < since {
        return None;
    }
    let published_at = created_at.unwrap_or(effective_time);

    let title = node
        .get("title")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("GitHub discussion mention")
        .trim()
        .to_string();
    let body = node.get("bodyText").and_then(Value::as_str).unwrap_or("");

    let author = node
        .get("author")
        .and_then(|a| a.get("login"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let repository = node.get("repository");
    let repo_name = repository
        .and_then(|r| r.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim();
    let owner_login = repository
        .and_then(|r| r.get("owner"))
        .and_then(|o| o.get("login"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim();
    let community = if !repo_name.is_empty() && !owner_login.is_empty() {
        format!("{owner_login}/{repo_name}")
    } else if !repo_name.is_empty() {
        repo_name.to_string()
    } else {
        "GitHub Discussions".to_string()
    };

    Some(MentionCandidate {
        platform: SOURCE_NAME.to_string(),
        external_id,
        url,
        title,
        body_excerpt: truncate_chars(&normalize_whitespace(body), 500),
        author,
        community: Some(community),
        published_at,
        raw_payload: node,
    })
}

/// GitHub GraphQL search against discussions; requires a personal access token.
pub struct GitHubDiscussionsSource {
    client: Client,
    token: String,
}

impl GitHubDiscussionsSource {
    pub fn new(client: Client, token: String) -> Self {
        Self { client, token }
    }
}

#[async_trait]
impl Source for GitHubDiscussionsSource {
    async fn search(
        &self,
        query: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<MentionCandidate>, SourceError> {
        let first = limit.clamp(1, 50);
        let search_query = format!("{query} sort:updated-desc");

        let response = self
            .client
            .post(GRAPHQL_URL)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .json(&json!({
                "query": SEARCH_QUERY,
                "variables": {
                    "query": search_query,
                    "first": first,
                },
            }))
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

        if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
            if let Some(first_error) = errors.first() {
                let message = first_error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("GitHub GraphQL error");
                return Err(SourceError::Remote {
                    source: SOURCE_NAME,
                    message: message.to_string(),
                });
            }
        }

        let nodes = payload
            .pointer("/data/search/nodes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let results = nodes
            .into_iter()
            .filter_map(|node| map_node(node, since))
            .collect();

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn iso(dt: DateTime<Utc>) -> String {
        dt.to_rfc3339()
    }

    #[test]
    fn maps_a_fully_populated_node() {
        let since = Utc::now() - Duration::hours(24);
        let created_at = since + Duration::hours(1);
        let node = json!({
            "id": "D_kwA_recent",
            "url": "https://github.com/acme/repo/discussions/1",
            "title": "Signalze mention in release thread",
            "bodyText": "Long body text with useful context.",
            "createdAt": iso(created_at),
            "updatedAt": iso(since + Duration::hours(2)),
            "author": {"login": "octocat"},
            "repository": {"name": "repo", "owner": {"login": "acme"}},
        });

        let mention = map_node(node, since).expect("recent node should map");
        assert_eq!(mention.external_id, "D_kwA_recent");
        assert_eq!(mention.title, "Signalze mention in release thread");
        assert_eq!(mention.author.as_deref(), Some("octocat"));
        assert_eq!(mention.community.as_deref(), Some("acme/repo"));
        assert_eq!(mention.body_excerpt, "Long body text with useful context.");
        assert_eq!(mention.published_at, created_at);
    }

    #[test]
    fn recency_guard_drops_nodes_updated_before_since() {
        let since = Utc::now() - Duration::hours(24);
        let node = json!({
            "id": "D_kwA_old",
            "url": "https://github.com/acme/repo/discussions/2",
            "title": "Old mention",
            "bodyText": "This should be filtered out by recency guard.",
            "createdAt": iso(since - Duration::days(5)),
            "updatedAt": iso(since - Duration::days(2)),
            "author": {"login": "archived-user"},
            "repository": {"name": "repo", "owner": {"login": "acme"}},
        });

        assert!(map_node(node, since).is_none());
    }

    #[test]
    fn falls_back_on_blank_title_missing_author_and_missing_repository() {
        let since = Utc::now() - Duration::hours(24);
        let node = json!({
            "id": "D_kwA_fallback",
            "url": "https://github.com/org/another/discussions/3",
            "title": "",
            "bodyText": "   body with   extra     spaces   ",
            "createdAt": iso(since + Duration::hours(3)),
            "updatedAt": Value::Null,
            "author": Value::Null,
            "repository": Value::Null,
        });

        let mention = map_node(node, since).expect("fallback node should map");
        assert_eq!(mention.title, "GitHub discussion mention");
        assert_eq!(mention.author, None);
        assert_eq!(mention.community.as_deref(), Some("GitHub Discussions"));
        assert_eq!(mention.body_excerpt, "body with extra spaces");
    }

    #[test]
    fn drops_nodes_missing_an_id_or_url() {
        let since = Utc::now() - Duration::hours(24);
        let node = json!({
            "id": "D_kwA_no_url",
            "title": "No URL",
            "createdAt": iso(since + Duration::hours(4)),
        });

        assert!(map_node(node, since).is_none());
    }
}
