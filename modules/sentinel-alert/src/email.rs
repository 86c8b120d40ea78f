//! Email channel: SMTP (optionally STARTTLS) with multipart/alternative
//! plain-text + HTML bodies.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::message::MultiPart;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use sentinel_common::{EmailConfig, Severity};

use crate::{AlertPayload, NotificationChannel};

pub struct EmailChannel {
    config: EmailConfig,
}

impl EmailChannel {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn from_address(&self) -> Option<&str> {
        self.config
            .from_address
            .as_deref()
            .or(self.config.username.as_deref())
    }

    pub fn format_subject(&self, alert: &AlertPayload) -> String {
        let title = sentinel_common::truncate_chars(&alert.title, 60);
        self.config
            .subject_template
            .replace("{severity}", alert.severity_label())
            .replace("{severity_emoji}", alert.severity_emoji())
            .replace("{title}", &title)
            .replace("{source_name}", &alert.source_name)
    }

    pub fn format_text_body(&self, alert: &AlertPayload) -> String {
        let mut lines = vec![
            format!("{} {}", alert.severity_emoji(), alert.severity_label()),
            "=".repeat(50),
            String::new(),
            alert.title.clone(),
            String::new(),
        ];
        if !alert.source_name.is_empty() {
            lines.push(format!("Source: {}", alert.source_name));
        }
        if let Some(author) = &alert.author {
            lines.push(format!("Auteur: {author}"));
        }
        if alert.published_at.is_some() {
            lines.push(format!("Date: {}", alert.published_at_formatted()));
        }
        if let Some(filter_name) = &alert.filter_name {
            lines.push(format!("Filtre: {filter_name}"));
        }
        lines.push(String::new());
        if let Some(summary) = &alert.summary {
            lines.push(summary.clone());
            lines.push(String::new());
        }
        if let Some(url) = &alert.url {
            lines.push(format!("Lien: {url}"));
            lines.push(String::new());
        }
        lines.push("-".repeat(50));
        lines.push("SentinelPi - Station de veille automatisée".to_string());
        lines.join("\n")
    }

    pub fn format_html_body(&self, alert: &AlertPayload) -> String {
        let color = severity_color(alert.severity);
        let mut html = vec![
            "<!DOCTYPE html>".to_string(),
            r#"<html><head><meta charset="utf-8"></head>"#.to_string(),
            r#"<body style="font-family: -apple-system, 'Segoe UI', Roboto, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">"#.to_string(),
            format!(
                r#"<div style="background: {color}; color: white; padding: 15px 20px; border-radius: 8px 8px 0 0;">"#
            ),
            format!(
                "<h2 style=\"margin: 0;\">{} {}</h2>",
                alert.severity_emoji(),
                alert.severity_label()
            ),
            "</div>".to_string(),
            r#"<div style="border: 1px solid #ddd; border-top: none; padding: 20px; border-radius: 0 0 8px 8px;">"#.to_string(),
            format!(
                "<h3 style=\"margin-top: 0; color: #333;\">{}</h3>",
                escape_html(&alert.title)
            ),
            r#"<table style="width: 100%; border-collapse: collapse; margin-bottom: 15px;">"#.to_string(),
        ];

        let mut row = |label: &str, value: String| {
            html.push(format!(
                "<tr><td style=\"padding: 5px 0; color: #666;\">{label}</td>\
                 <td style=\"padding: 5px 0;\">{value}</td></tr>"
            ));
        };
        if !alert.source_name.is_empty() {
            row("Source:", escape_html(&alert.source_name));
        }
        if let Some(author) = &alert.author {
            row("Auteur:", escape_html(author));
        }
        if alert.published_at.is_some() {
            row(
                "Date:",
                format!(
                    "{} ({})",
                    alert.published_at_formatted(),
                    alert.published_at_relative()
                ),
            );
        }
        if let Some(filter_name) = &alert.filter_name {
            row("Filtre:", escape_html(filter_name));
        }
        html.push("</table>".to_string());

        let body_text = if self.config.include_full_content {
            alert.content.as_ref().or(alert.summary.as_ref())
        } else {
            alert.summary.as_ref()
        };
        if let Some(text) = body_text {
            let text = sentinel_common::truncate_chars(text, 2000);
            html.push(format!(
                r#"<div style="background: #f8f9fa; padding: 15px; border-radius: 4px; margin: 15px 0;">{}</div>"#,
                escape_html(&text)
            ));
        }

        if let Some(url) = &alert.url {
            html.push(format!(
                r#"<a href="{url}" style="display: inline-block; background: {color}; color: white; padding: 10px 20px; text-decoration: none; border-radius: 4px; margin-top: 10px;">Lire l'article</a>"#
            ));
        }

        html.push("</div>".to_string());
        html.push(
            r#"<div style="text-align: center; margin-top: 20px; color: #999; font-size: 12px;">"#
                .to_string(),
        );
        html.push("<p>Envoyé par SentinelPi - Station de veille automatisée</p>".to_string());
        html.push("</div></body></html>".to_string());
        html.join("\n")
    }

    fn build_transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let host = &self.config.smtp_host;
        let mut builder = if self.config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .with_context(|| format!("STARTTLS relay to {host}"))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };
        builder = builder.port(self.config.smtp_port);
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        Ok(builder.build())
    }
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "#17a2b8",
        Severity::Notice => "#007bff",
        Severity::Warning => "#ffc107",
        Severity::Critical => "#dc3545",
    }
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\n', "<br>")
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    fn enabled(&self) -> bool {
        self.config.enabled
            && !self.config.smtp_host.is_empty()
            && self.config.username.is_some()
            && self.config.password.is_some()
            && !self.config.to_addresses.is_empty()
    }

    fn min_severity(&self) -> Severity {
        self.config.min_severity
    }

    fn aggregate(&self) -> bool {
        self.config.aggregate
    }

    async fn send(&self, alert: &AlertPayload) -> Result<()> {
        let from_address = self
            .from_address()
            .ok_or_else(|| anyhow!("no from address configured"))?;
        let from = format!("{} <{}>", self.config.from_name, from_address)
            .parse()
            .context("invalid from address")?;

        let mut builder = Message::builder()
            .from(from)
            .subject(self.format_subject(alert));
        for recipient in &self.config.to_addresses {
            builder = builder.to(recipient
                .parse()
                .with_context(|| format!("invalid recipient {recipient}"))?);
        }

        let message = builder
            .multipart(MultiPart::alternative_plain_html(
                self.format_text_body(alert),
                self.format_html_body(alert),
            ))
            .context("building message")?;

        let transport = self.build_transport()?;
        transport.send(message).await.context("SMTP send")?;
        debug!(title = %alert.title, recipients = self.config.to_addresses.len(), "Email sent");
        Ok(())
    }
}
