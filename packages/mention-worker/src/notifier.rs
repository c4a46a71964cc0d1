//! Slack-compatible webhook renderer and sender. The only implemented
//! delivery channel; `AlertDelivery.channel` is always the literal `"slack"`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::NotifyError;
use crate::models::PendingAlert;
use crate::registry::source_label;
use crate::sources::normalize_whitespace;

pub const CHANNEL: &str = "slack";

/// One-method delivery capability, mirroring [`crate::sources::Source`]'s
/// single-capability shape. Lets the pipeline be driven by a fake sender in
/// tests without an HTTP round trip.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, endpoint: &str, alert: &PendingAlert) -> Result<(), NotifyError>;
}

/// Production notifier: POSTs the rendered Slack payload to the webhook.
pub struct HttpNotifier {
    client: Client,
}

impl HttpNotifier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, endpoint: &str, alert: &PendingAlert) -> Result<(), NotifyError> {
        send(&self.client, endpoint, alert).await
    }
}

/// Builds the Slack Block Kit payload for a pending alert.
pub fn render(alert: &PendingAlert) -> Value {
    let mention = &alert.mention;
    let brand = alert.brand_name.as_deref().unwrap_or("your brand");
    let platform = source_label(&mention.platform);
    let published = mention.published_at.format("%Y-%m-%d %H:%M UTC").to_string();

    let summary = normalize_whitespace(&mention.body_excerpt);
    let summary = if summary.is_empty() {
        "No preview text available.".to_string()
    } else {
        summary.chars().take(280).collect()
    };

    json!({
        "text": format!("New {platform} mention for '{}'", alert.query),
        "blocks": [
            {
                "type": "header",
                "text": { "type": "plain_text", "text": format!("New {platform} mention") },
            },
            {
                "type": "section",
                "fields": [
                    { "type": "mrkdwn", "text": format!("*Brand*\n{brand}") },
                    { "type": "mrkdwn", "text": format!("*Keyword*\n{}", alert.query) },
                    { "type": "mrkdwn", "text": format!("*Source*\n{platform}") },
                    { "type": "mrkdwn", "text": format!("*Published*\n{published}") },
                ],
            },
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("*{}*\n{summary}", mention.title) },
            },
            {
                "type": "actions",
                "elements": [
                    {
                        "type": "button",
                        "text": { "type": "plain_text", "text": "Open mention" },
                        "url": mention.url,
                    }
                ],
            },
        ],
    })
}

/// POSTs the rendered payload to the tenant's webhook; raises on non-2xx.
pub async fn send(client: &Client, endpoint: &str, alert: &PendingAlert) -> Result<(), NotifyError> {
    let payload = render(alert);
    client
        .post(endpoint)
        .json(&payload)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}
