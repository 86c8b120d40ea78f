use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::SentinelError;
use crate::types::Severity;

/// Application configuration, loaded from `config.yaml`.
/// A missing file falls back to defaults; a malformed file is a fatal
/// configuration error at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            timezone: default_timezone(),
        }
    }
}

/// How a cross-source content-hash collision is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CrossSourceDedup {
    /// Keep the colliding item, cross-referencing the original via `duplicate_of`.
    #[default]
    Flag,
    /// Drop the colliding item.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Cap on failure backoff (6h default).
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default)]
    pub cross_source_dedup: CrossSourceDedup,
    /// Hard deadline for in-flight jobs after stop() (seconds).
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Per-collector-cycle timeout (seconds).
    #[serde(default = "default_collector_timeout_secs")]
    pub collector_timeout_secs: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: default_tick_interval_secs(),
            max_parallel: default_max_parallel(),
            max_backoff_secs: default_max_backoff_secs(),
            cross_source_dedup: CrossSourceDedup::Flag,
            shutdown_grace_secs: default_shutdown_grace_secs(),
            collector_timeout_secs: default_collector_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SentinelError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SentinelError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, SentinelError> {
        let config: Self = serde_yaml::from_str(raw)
            .map_err(|e| SentinelError::Config(format!("invalid config.yaml: {e}")))?;
        if config.scheduler.max_parallel == 0 {
            return Err(SentinelError::Config(
                "scheduler.max_parallel must be >= 1".to_string(),
            ));
        }
        Ok(config)
    }
}

// --- Alert channel configuration (`alerts.yaml`) ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AlertsConfig {
    #[serde(default)]
    pub alerting: AlertingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingSection {
    /// Rolling aggregation window in seconds.
    #[serde(default = "default_aggregation_window_secs")]
    pub aggregation_window_secs: u64,
    /// Minimum gap between two sends on the same channel (milliseconds).
    #[serde(default = "default_send_gap_ms")]
    pub send_gap_ms: u64,
    /// Per-channel send timeout (seconds).
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default)]
    pub channels: ChannelsSection,
}

impl Default for AlertingSection {
    fn default() -> Self {
        Self {
            aggregation_window_secs: default_aggregation_window_secs(),
            send_gap_ms: default_send_gap_ms(),
            send_timeout_secs: default_send_timeout_secs(),
            channels: ChannelsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsSection {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub desktop: DesktopConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    #[serde(default = "default_min_severity_notice")]
    pub min_severity: Severity,
    #[serde(default)]
    pub disable_web_preview: bool,
    /// Send without notification sound.
    #[serde(default)]
    pub silent: bool,
    /// Optional message template with `{severity}`, `{title}`, `{url}`... variables.
    pub format: Option<String>,
    #[serde(default = "default_true")]
    pub aggregate: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: None,
            chat_id: None,
            min_severity: Severity::Notice,
            disable_web_preview: false,
            silent: false,
            format: None,
            aggregate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from_address: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default)]
    pub to_addresses: Vec<String>,
    #[serde(default = "default_subject_template")]
    pub subject_template: String,
    #[serde(default = "default_min_severity_warning")]
    pub min_severity: Severity,
    #[serde(default = "default_true")]
    pub include_full_content: bool,
    #[serde(default = "default_true")]
    pub aggregate: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            use_tls: true,
            username: None,
            password: None,
            from_address: None,
            from_name: default_from_name(),
            to_addresses: Vec::new(),
            subject_template: default_subject_template(),
            min_severity: Severity::Warning,
            include_full_content: true,
            aggregate: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WebhookFormat {
    #[default]
    Plain,
    Discord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    pub url: Option<String>,
    #[serde(default)]
    pub format: WebhookFormat,
    #[serde(default = "default_min_severity_notice")]
    pub min_severity: Severity,
    #[serde(default = "default_true")]
    pub aggregate: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            format: WebhookFormat::Plain,
            min_severity: Severity::Notice,
            aggregate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesktopConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default = "default_desktop_timeout_ms")]
    pub timeout_ms: u32,
    #[serde(default = "default_min_severity_info")]
    pub min_severity: Severity,
    #[serde(default)]
    pub aggregate: bool,
}

impl Default for DesktopConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            icon: default_icon(),
            timeout_ms: default_desktop_timeout_ms(),
            min_severity: Severity::Info,
            aggregate: false,
        }
    }
}

impl AlertsConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SentinelError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                SentinelError::Config(format!("cannot read {}: {e}", path.display()))
            })?;
            serde_yaml::from_str(&raw)
                .map_err(|e| SentinelError::Config(format!("invalid alerts.yaml: {e}")))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Secrets from the environment win over file values.
    pub fn apply_env_overrides(&mut self) {
        let channels = &mut self.alerting.channels;
        if let Ok(token) = env::var("TELEGRAM_BOT_TOKEN") {
            if !token.is_empty() {
                channels.telegram.bot_token = Some(token);
            }
        }
        if let Ok(chat_id) = env::var("TELEGRAM_CHAT_ID") {
            if !chat_id.is_empty() {
                channels.telegram.chat_id = Some(chat_id);
            }
        }
        if let Ok(user) = env::var("EMAIL_USER") {
            if !user.is_empty() {
                channels.email.username = Some(user);
            }
        }
        if let Ok(password) = env::var("EMAIL_PASSWORD") {
            if !password.is_empty() {
                channels.email.password = Some(password);
            }
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_app_name() -> String {
    "SentinelPi".to_string()
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_tick_interval_secs() -> u64 {
    30
}
fn default_max_parallel() -> usize {
    4
}
fn default_max_backoff_secs() -> u64 {
    21_600
}
fn default_shutdown_grace_secs() -> u64 {
    30
}
fn default_collector_timeout_secs() -> u64 {
    300
}
fn default_db_path() -> String {
    "data/sentinel.db".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_aggregation_window_secs() -> u64 {
    60
}
fn default_send_gap_ms() -> u64 {
    100
}
fn default_send_timeout_secs() -> u64 {
    15
}
fn default_min_severity_info() -> Severity {
    Severity::Info
}
fn default_min_severity_notice() -> Severity {
    Severity::Notice
}
fn default_min_severity_warning() -> Severity {
    Severity::Warning
}
fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}
fn default_smtp_port() -> u16 {
    587
}
fn default_from_name() -> String {
    "SentinelPi".to_string()
}
fn default_subject_template() -> String {
    "[SentinelPi] {severity_emoji} {severity}: {title}".to_string()
}
fn default_icon() -> String {
    "dialog-information".to_string()
}
fn default_desktop_timeout_ms() -> u32 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.scheduler.tick_interval_secs, 30);
        assert_eq!(config.scheduler.max_parallel, 4);
        assert_eq!(config.scheduler.max_backoff_secs, 21_600);
        assert_eq!(config.scheduler.cross_source_dedup, CrossSourceDedup::Flag);
        assert_eq!(config.app.name, "SentinelPi");
    }

    #[test]
    fn partial_yaml_overrides() {
        let yaml = r#"
scheduler:
  max_parallel: 2
  cross_source_dedup: reject
database:
  path: /tmp/test.db
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.scheduler.max_parallel, 2);
        assert_eq!(config.scheduler.cross_source_dedup, CrossSourceDedup::Reject);
        assert_eq!(config.database.path, "/tmp/test.db");
        // Untouched sections keep defaults
        assert_eq!(config.scheduler.tick_interval_secs, 30);
    }

    #[test]
    fn invalid_yaml_is_a_config_error() {
        let err = AppConfig::from_yaml("scheduler: [not, a, map]").unwrap_err();
        assert!(matches!(err, SentinelError::Config(_)));
    }

    #[test]
    fn zero_workers_rejected() {
        let err = AppConfig::from_yaml("scheduler:\n  max_parallel: 0\n").unwrap_err();
        assert!(matches!(err, SentinelError::Config(_)));
    }

    #[test]
    fn alerts_yaml_channel_parsing() {
        let yaml = r#"
alerting:
  aggregation_window_secs: 30
  channels:
    telegram:
      enabled: true
      bot_token: "123:abc"
      chat_id: "42"
      min_severity: warning
    email:
      enabled: true
      smtp_host: mail.example.org
      to_addresses: ["ops@example.org"]
"#;
        let config: AlertsConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.alerting.aggregation_window_secs, 30);
        let telegram = &config.alerting.channels.telegram;
        assert!(telegram.enabled);
        assert_eq!(telegram.min_severity, Severity::Warning);
        let email = &config.alerting.channels.email;
        assert_eq!(email.smtp_host, "mail.example.org");
        assert_eq!(email.smtp_port, 587);
        assert_eq!(email.to_addresses.len(), 1);
        // Desktop untouched → defaults
        assert!(!config.alerting.channels.desktop.enabled);
        assert_eq!(config.alerting.channels.desktop.timeout_ms, 10_000);
    }
}
