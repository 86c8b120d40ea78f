//! Alert payloads, the channel contract, and the aggregating dispatcher.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sentinel_common::Severity;

pub mod desktop;
pub mod dispatcher;
pub mod email;
pub mod telegram;
pub mod webhook;

pub use desktop::DesktopChannel;
pub use dispatcher::{AggregatedAlert, AlertDispatcher, DeliveryRecord, DeliverySink};
pub use email::EmailChannel;
pub use telegram::TelegramChannel;
pub use webhook::WebhookChannel;

/// Everything a channel needs to render one alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    pub alert_id: String,
    pub severity: Severity,
    pub title: String,
    pub summary: Option<String>,
    pub url: Option<String>,
    pub source_name: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub filter_id: String,
    pub filter_name: Option<String>,
    /// What the filter matched, for observability in the message.
    pub matched_value: Option<String>,
    pub content: Option<String>,
    pub tags: Vec<String>,
}

impl AlertPayload {
    pub fn severity_emoji(&self) -> &'static str {
        self.severity.emoji()
    }

    pub fn severity_label(&self) -> &'static str {
        self.severity.label()
    }

    pub fn published_at_formatted(&self) -> String {
        self.published_at
            .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_default()
    }

    /// Human-readable age: "à l'instant", "il y a 5 min", "il y a 3 h", "il y a 2 j".
    pub fn published_at_relative(&self) -> String {
        let Some(published) = self.published_at else {
            return String::new();
        };
        relative_time(published, Utc::now())
    }
}

pub(crate) fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - then).num_seconds();
    if seconds < 60 {
        return "à l'instant".to_string();
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("il y a {minutes} min");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("il y a {hours} h");
    }
    format!("il y a {} j", hours / 24)
}

/// Contract every notification channel implements.
///
/// `send` must be idempotent with respect to replayed payloads — the
/// dispatcher keeps the `(alert_id, channel)` ledger, channels stay dumb.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &'static str;
    fn enabled(&self) -> bool;
    fn min_severity(&self) -> Severity;
    /// Whether this channel receives coalesced alerts (one message per
    /// aggregation group) or one message per alert.
    fn aggregate(&self) -> bool {
        true
    }
    async fn send(&self, alert: &AlertPayload) -> Result<()>;
}
