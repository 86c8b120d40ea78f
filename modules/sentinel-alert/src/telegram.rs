//! Telegram channel: plain HTTPS calls to the Bot API `sendMessage` method.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::debug;

use sentinel_common::{Severity, TelegramConfig};

use crate::{AlertPayload, NotificationChannel};

/// Telegram's hard message size limit.
const MAX_MESSAGE_LENGTH: usize = 4096;
const TRUNCATION_SUFFIX: &str = "\n\n_(message tronqué)_";

pub struct TelegramChannel {
    config: TelegramConfig,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// Markdown message: the configured template when present, otherwise the
    /// default layout.
    pub fn format_message(&self, alert: &AlertPayload) -> String {
        if let Some(template) = &self.config.format {
            return truncate_message(&self.render_template(template, alert));
        }

        let mut lines = vec![
            format!("{} *{}*", alert.severity_emoji(), alert.severity_label()),
            String::new(),
            format!("📰 *{}*", escape_markdown(&alert.title)),
        ];
        if !alert.source_name.is_empty() {
            lines.push(format!("📌 Source: {}", escape_markdown(&alert.source_name)));
        }
        if alert.published_at.is_some() {
            lines.push(format!("🕐 {}", alert.published_at_relative()));
        }
        if let Some(summary) = &alert.summary {
            lines.push(String::new());
            lines.push(escape_markdown(&sentinel_common::truncate_chars(summary, 500)));
        }
        if let Some(filter_name) = &alert.filter_name {
            lines.push(String::new());
            lines.push(format!("🎯 Filtre: {}", escape_markdown(filter_name)));
        }
        if let Some(url) = &alert.url {
            lines.push(String::new());
            lines.push(format!("🔗 [Lire l'article]({url})"));
        }

        truncate_message(&lines.join("\n"))
    }

    fn render_template(&self, template: &str, alert: &AlertPayload) -> String {
        template
            .replace("{severity}", alert.severity_label())
            .replace("{severity_emoji}", alert.severity_emoji())
            .replace("{title}", &escape_markdown(&alert.title))
            .replace("{url}", alert.url.as_deref().unwrap_or(""))
            .replace(
                "{summary}",
                &escape_markdown(alert.summary.as_deref().unwrap_or("")),
            )
            .replace("{source_name}", &escape_markdown(&alert.source_name))
            .replace("{published_at}", &alert.published_at_formatted())
            .replace(
                "{author}",
                &escape_markdown(alert.author.as_deref().unwrap_or("")),
            )
            .replace(
                "{filter_name}",
                &escape_markdown(alert.filter_name.as_deref().unwrap_or("")),
            )
            .replace(
                "{matched_value}",
                &escape_markdown(alert.matched_value.as_deref().unwrap_or("")),
            )
    }
}

fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_MESSAGE_LENGTH {
        return message.to_string();
    }
    let mut cut = MAX_MESSAGE_LENGTH - 100;
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{TRUNCATION_SUFFIX}", &message[..cut])
}

/// Escape Telegram Markdown control characters.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '='
                | '|' | '{' | '}' | '.' | '!'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn enabled(&self) -> bool {
        self.config.enabled
            && self.config.bot_token.as_deref().is_some_and(|t| !t.is_empty())
            && self.config.chat_id.as_deref().is_some_and(|c| !c.is_empty())
    }

    fn min_severity(&self) -> Severity {
        self.config.min_severity
    }

    fn aggregate(&self) -> bool {
        self.config.aggregate
    }

    async fn send(&self, alert: &AlertPayload) -> Result<()> {
        let token = self
            .config
            .bot_token
            .as_deref()
            .ok_or_else(|| anyhow!("no bot token configured"))?;
        let chat_id = self
            .config
            .chat_id
            .as_deref()
            .ok_or_else(|| anyhow!("no chat id configured"))?;

        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": self.format_message(alert),
            "parse_mode": "Markdown",
            "disable_web_page_preview": self.config.disable_web_preview,
            "disable_notification": self.config.silent,
        });

        let response = self
            .client
            .post(format!("https://api.telegram.org/bot{token}/sendMessage"))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("Bot API returned {status}: {detail}"));
        }
        debug!(title = %alert.title, "Telegram message sent");
        Ok(())
    }
}
