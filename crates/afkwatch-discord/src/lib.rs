//! Discord webhook adapter.
//!
//! Posts each notification as a single embed. Delivery is fire-once: non-2xx
//! responses surface as `Error::Delivery` and are never retried here.

use std::time::Duration;

use afkwatch_core::{
    errors::Error,
    notify::{Notification, NotificationSink},
    Result,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

const USERNAME: &str = "MinecraftAFK Bot";
const FOOTER: &str = "MinecraftAFK Monitor";
const USER_AGENT: &str = "MinecraftAFK-Bot/1.0";

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    username: &'a str,
    embeds: Vec<Embed<'a>>,
}

#[derive(Debug, Serialize)]
struct Embed<'a> {
    title: &'a str,
    description: &'a str,
    color: u32,
    timestamp: String,
    footer: Footer<'a>,
}

#[derive(Debug, Serialize)]
struct Footer<'a> {
    text: &'a str,
}

fn build_payload(n: &Notification, at: DateTime<Utc>) -> WebhookPayload<'_> {
    WebhookPayload {
        username: USERNAME,
        embeds: vec![Embed {
            title: &n.title,
            description: &n.description,
            color: n.tone.color(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            footer: Footer { text: FOOTER },
        }],
    }
}

#[derive(Clone, Debug)]
pub struct DiscordWebhook {
    url: String,
    http: reqwest::Client,
}

impl DiscordWebhook {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::External(format!("http client build failed: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
        })
    }
}

#[async_trait]
impl NotificationSink for DiscordWebhook {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let payload = build_payload(notification, Utc::now());

        let resp = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("webhook request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Delivery(format!(
                "webhook returned {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        tracing::info!(title = %notification.title, "discord notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afkwatch_core::notify::Tone;

    #[test]
    fn payload_matches_webhook_shape() {
        let n = Notification::new("🟢 WebSocket Connected", "hello", Tone::Positive);
        let at = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap();
        let v = serde_json::to_value(build_payload(&n, at)).unwrap();

        assert_eq!(
            v,
            serde_json::json!({
              "username": "MinecraftAFK Bot",
              "embeds": [{
                "title": "🟢 WebSocket Connected",
                "description": "hello",
                "color": 3066993,
                "timestamp": "2023-11-14T22:13:20.000Z",
                "footer": {"text": "MinecraftAFK Monitor"}
              }]
            })
        );
    }

    #[test]
    fn builds_client() {
        assert!(DiscordWebhook::new("https://discord.com/api/webhooks/1/abc").is_ok());
    }
}
