//! Webhook channel: JSON POST to an arbitrary endpoint, with a Discord
//! variant that maps the alert onto an embed with a severity-colored stripe.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use sentinel_common::{Severity, WebhookConfig, WebhookFormat};

use crate::{AlertPayload, NotificationChannel};

pub struct WebhookChannel {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    pub fn build_body(&self, alert: &AlertPayload) -> serde_json::Value {
        match self.config.format {
            WebhookFormat::Plain => json!({
                "id": alert.alert_id,
                "severity": alert.severity.as_str(),
                "title": alert.title,
                "url": alert.url,
                "source_name": alert.source_name,
                "summary": alert.summary,
                "timestamp_iso": chrono::Utc::now().to_rfc3339(),
            }),
            WebhookFormat::Discord => json!({
                "embeds": [{
                    "title": alert.title,
                    "description": alert.summary,
                    "url": alert.url,
                    "color": severity_color(alert.severity),
                    "footer": {
                        "text": format!("{} · {}", alert.source_name,
                                        alert.filter_name.as_deref().unwrap_or("alerte")),
                    },
                    "timestamp": alert.published_at
                        .unwrap_or_else(chrono::Utc::now)
                        .to_rfc3339(),
                }]
            }),
        }
    }
}

/// Discord embed stripe colors per severity.
fn severity_color(severity: Severity) -> u32 {
    match severity {
        Severity::Info => 0x17a2b8,
        Severity::Notice => 0x007bff,
        Severity::Warning => 0xffc107,
        Severity::Critical => 0xdc3545,
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn enabled(&self) -> bool {
        self.config.enabled && self.config.url.as_deref().is_some_and(|u| !u.is_empty())
    }

    fn min_severity(&self) -> Severity {
        self.config.min_severity
    }

    fn aggregate(&self) -> bool {
        self.config.aggregate
    }

    async fn send(&self, alert: &AlertPayload) -> Result<()> {
        let url = self
            .config
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("no webhook url configured"))?;
        let response = self
            .client
            .post(url)
            .json(&self.build_body(alert))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow!("webhook returned HTTP {}", response.status()));
        }
        debug!(title = %alert.title, "Webhook delivered");
        Ok(())
    }
}
