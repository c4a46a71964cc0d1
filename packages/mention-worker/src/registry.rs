//! Static catalog of source kinds the pipeline knows how to poll.
//!
//! Adding a new source means adding one entry here; everything downstream
//! (config parsing, adapter construction, budget lookup, log labels) is
//! driven off this list rather than scattered per-source special-casing.

use std::sync::Arc;

use reqwest::Client;

use crate::config::Settings;
use crate::sources::{
    devto::DevToSource, github_discussions::GitHubDiscussionsSource,
    hackernews::HackerNewsSource, reddit::RedditSource, Source,
};

/// Reason a source has no constructed adapter this run.
pub type DisabledReason = &'static str;

pub type SourceBuilder = fn(&Client, &Settings) -> (Option<Arc<dyn Source>>, Option<DisabledReason>);

#[derive(Debug, Clone, Copy)]
pub struct SourceDefinition {
    pub key: &'static str,
    pub label: &'static str,
    pub env_slug: &'static str,
    pub default_enabled: bool,
    pub free_tier_daily_limit: Option<i64>,
    /// `None` means "recognized but not implemented as an adapter" (a
    /// reserved catalog entry such as `google`).
    pub builder: Option<SourceBuilder>,
}

fn build_hackernews(client: &Client, _settings: &Settings) -> (Option<Arc<dyn Source>>, Option<DisabledReason>) {
    (Some(Arc::new(HackerNewsSource::new(client.clone()))), None)
}

fn build_devto(client: &Client, settings: &Settings) -> (Option<Arc<dyn Source>>, Option<DisabledReason>) {
    (
        Some(Arc::new(DevToSource::new(
            client.clone(),
            settings.devto_top_days,
        ))),
        None,
    )
}

fn build_github_discussions(
    client: &Client,
    settings: &Settings,
) -> (Option<Arc<dyn Source>>, Option<DisabledReason>) {
    match &settings.github_token {
        Some(token) if !token.is_empty() => (
            Some(Arc::new(GitHubDiscussionsSource::new(
                client.clone(),
                token.clone(),
            ))),
            None,
        ),
        _ => (None, Some("missing_credentials")),
    }
}

fn build_reddit(client: &Client, settings: &Settings) -> (Option<Arc<dyn Source>>, Option<DisabledReason>) {
    match (&settings.reddit_client_id, &settings.reddit_client_secret) {
        (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => (
            Some(Arc::new(RedditSource::new(
                client.clone(),
                id.clone(),
                secret.clone(),
                settings.reddit_user_agent.clone(),
            ))),
            None,
        ),
        _ => (None, Some("missing_credentials")),
    }
}

pub static SOURCE_DEFINITIONS: &[SourceDefinition] = &[
    SourceDefinition {
        key: "hackernews",
        label: "Hacker News",
        env_slug: "HN",
        default_enabled: true,
        free_tier_daily_limit: Some(2_000),
        builder: Some(build_hackernews),
    },
    SourceDefinition {
        key: "devto",
        label: "Dev.to",
        env_slug: "DEVTO",
        default_enabled: true,
        free_tier_daily_limit: Some(1_000),
        builder: Some(build_devto),
    },
    SourceDefinition {
        key: "github_discussions",
        label: "GitHub Discussions",
        env_slug: "GITHUB_DISCUSSIONS",
        default_enabled: true,
        free_tier_daily_limit: Some(1_000),
        builder: Some(build_github_discussions),
    },
    SourceDefinition {
        key: "reddit",
        label: "Reddit",
        env_slug: "REDDIT",
        default_enabled: false,
        free_tier_daily_limit: Some(500),
        builder: Some(build_reddit),
    },
    SourceDefinition {
        key: "google",
        label: "Google",
        env_slug: "GOOGLE",
        default_enabled: false,
        free_tier_daily_limit: Some(100),
        builder: None,
    },
    SourceDefinition {
        key: "brave",
        label: "Brave",
        env_slug: "BRAVE",
        default_enabled: false,
        free_tier_daily_limit: Some(1_000),
        builder: None,
    },
    SourceDefinition {
        key: "producthunt",
        label: "Product Hunt",
        env_slug: "PRODUCTHUNT",
        default_enabled: false,
        free_tier_daily_limit: Some(500),
        builder: None,
    },
];

pub fn definition_by_key(key: &str) -> Option<&'static SourceDefinition> {
    SOURCE_DEFINITIONS.iter().find(|def| def.key == key)
}

/// Human label for a source key, falling back to the raw key for unknown
/// (e.g. stale/removed) sources so display code never has to special-case it.
pub fn source_label(key: &str) -> &str {
    match definition_by_key(key) {
        Some(definition) => definition.label,
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_label_falls_back_to_key() {
        assert_eq!(source_label("hackernews"), "Hacker News");
        assert_eq!(source_label("unknown_source"), "unknown_source");
    }

    #[test]
    fn reserved_entries_have_no_builder() {
        for key in ["google", "brave", "producthunt"] {
            let definition = definition_by_key(key).unwrap();
            assert!(definition.builder.is_none());
        }
    }
}
