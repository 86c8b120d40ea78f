//! Desktop channel: local notifications through `notify-send` (libnotify).
//! Unavailable — and therefore disabled — when the utility is not on PATH.

use std::path::Path;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use sentinel_common::{DesktopConfig, Severity};

use crate::{AlertPayload, NotificationChannel};

pub struct DesktopChannel {
    config: DesktopConfig,
    available: bool,
}

impl DesktopChannel {
    pub fn new(config: DesktopConfig) -> Self {
        let available = find_on_path("notify-send");
        if config.enabled && !available {
            warn!("Desktop notifications enabled but notify-send not found");
        }
        Self { config, available }
    }

    #[cfg(test)]
    fn with_availability(config: DesktopConfig, available: bool) -> Self {
        Self { config, available }
    }
}

/// Map severity onto libnotify urgency levels.
pub fn urgency(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "low",
        Severity::Notice | Severity::Warning => "normal",
        Severity::Critical => "critical",
    }
}

fn find_on_path(binary: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| Path::new(&dir).join(binary).is_file())
}

#[async_trait]
impl NotificationChannel for DesktopChannel {
    fn name(&self) -> &'static str {
        "desktop"
    }

    fn enabled(&self) -> bool {
        self.config.enabled && self.available
    }

    fn min_severity(&self) -> Severity {
        self.config.min_severity
    }

    fn aggregate(&self) -> bool {
        self.config.aggregate
    }

    async fn send(&self, alert: &AlertPayload) -> Result<()> {
        let title = format!(
            "{} SentinelPi - {}",
            alert.severity_emoji(),
            alert.severity_label()
        );
        let mut body = alert.title.clone();
        if !alert.source_name.is_empty() {
            body.push('\n');
            body.push_str(&alert.source_name);
        }
        if let Some(summary) = &alert.summary {
            body.push('\n');
            body.push_str(&sentinel_common::truncate_chars(summary, 200));
        }

        let status = tokio::process::Command::new("notify-send")
            .arg("--urgency")
            .arg(urgency(alert.severity))
            .arg("--expire-time")
            .arg(self.config.timeout_ms.to_string())
            .arg("--icon")
            .arg(&self.config.icon)
            .arg("--app-name")
            .arg("SentinelPi")
            .arg(&title)
            .arg(&body)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await?;

        if !status.success() {
            return Err(anyhow!("notify-send exited with {status}"));
        }
        debug!(title = %alert.title, "Desktop notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urgency_mapping() {
        assert_eq!(urgency(Severity::Info), "low");
        assert_eq!(urgency(Severity::Notice), "normal");
        assert_eq!(urgency(Severity::Warning), "normal");
        assert_eq!(urgency(Severity::Critical), "critical");
    }

    #[test]
    fn disabled_without_notify_send() {
        let channel = DesktopChannel::with_availability(
            DesktopConfig {
                enabled: true,
                ..Default::default()
            },
            false,
        );
        assert!(!channel.enabled());
    }

    #[test]
    fn disabled_when_config_says_so() {
        let channel = DesktopChannel::with_availability(DesktopConfig::default(), true);
        assert!(!channel.enabled());
    }
}
