pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AlertsConfig, AppConfig, CrossSourceDedup, DesktopConfig, EmailConfig, TelegramConfig,
    WebhookConfig, WebhookFormat,
};
pub use error::SentinelError;
pub use types::*;

/// Truncate a string to at most `max` characters, appending `...` when cut.
/// Operates on char boundaries, so multi-byte text is safe.
///
/// ```
/// assert_eq!(sentinel_common::truncate_chars("hello world", 5), "hello...");
/// assert_eq!(sentinel_common::truncate_chars("hi", 5), "hi");
/// ```
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{cut}...")
}
