//! Mastodon account collector.
//!
//! Fetches an account's public statuses through the instance REST API:
//! first `/api/v1/accounts/lookup?acct=<acct>` to resolve the account id,
//! then `/api/v1/accounts/<id>/statuses`. The source URL is the profile URL,
//! e.g. `https://mastodon.social/@user`.
//!
//! Source config options:
//! - `access_token` — optional bearer token (needed on locked-down instances)
//! - `max_items` (default 20, API caps at 40)
//! - `exclude_replies` (default true)
//! - `exclude_reblogs` (default true)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::warn;
use url::Url;

use sentinel_common::{truncate_chars, CollectedItem, Source, SourceType};

use crate::text::strip_html;
use crate::{Collector, CollectorError, HttpClient};

const DEFAULT_MAX_ITEMS: u64 = 20;

#[derive(Debug, Deserialize)]
struct MastodonAccount {
    id: String,
    acct: String,
    #[serde(default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct MastodonStatus {
    id: String,
    uri: String,
    #[serde(default)]
    url: Option<String>,
    content: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    spoiler_text: String,
    #[serde(default)]
    language: Option<String>,
    account: MastodonAccount,
    #[serde(default)]
    media_attachments: Vec<MediaAttachment>,
    #[serde(default)]
    tags: Vec<StatusTag>,
}

#[derive(Debug, Deserialize)]
struct MediaAttachment {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusTag {
    name: String,
}

pub struct MastodonCollector {
    source: Source,
    http: HttpClient,
}

impl MastodonCollector {
    pub fn new(source: Source, http: HttpClient) -> Self {
        Self { source, http }
    }

    /// Split the profile URL into `(instance_base, acct)`.
    pub fn parse_profile_url(url: &str) -> Option<(String, String)> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?;
        let acct = parsed
            .path_segments()?
            .find(|s| s.starts_with('@'))?
            .trim_start_matches('@')
            .to_string();
        if acct.is_empty() {
            return None;
        }
        Some((format!("{}://{host}", parsed.scheme()), acct))
    }

    fn auth_headers(&self) -> Vec<(String, String)> {
        match self.source.config_str("access_token") {
            Some(token) => vec![("Authorization".to_string(), format!("Bearer {token}"))],
            None => Vec::new(),
        }
    }

    pub fn parse_statuses(&self, body: &str) -> Result<Vec<CollectedItem>, CollectorError> {
        let statuses: Vec<MastodonStatus> = serde_json::from_str(body).map_err(|e| {
            CollectorError::with_cause("Failed to parse statuses JSON", self.source.id.clone(), e)
        })?;

        let mut items = Vec::new();
        for status in statuses {
            let text = strip_html(&status.content);
            // A status has no title of its own: use the content warning when
            // present, otherwise the opening of the text.
            let title = if !status.spoiler_text.is_empty() {
                status.spoiler_text.clone()
            } else if !text.is_empty() {
                truncate_chars(&text, 120)
            } else {
                "Sans titre".to_string()
            };

            let mut item = CollectedItem::new(status.uri.clone(), title);
            item.url = status.url.clone().or(Some(status.uri.clone()));
            item.author = Some(if status.account.display_name.is_empty() {
                status.account.acct.clone()
            } else {
                status.account.display_name.clone()
            });
            item.content = Some(text.clone()).filter(|t| !t.is_empty());
            item.summary = Some(truncate_chars(&text, 500)).filter(|t| !t.is_empty());
            item.published_at = Some(status.created_at);
            item.language = status.language.clone();
            item.image_url = status
                .media_attachments
                .iter()
                .find(|a| a.kind == "image")
                .and_then(|a| a.url.clone());
            item.media_urls = status
                .media_attachments
                .iter()
                .filter_map(|a| a.url.clone())
                .collect();

            item.extra
                .insert("platform".to_string(), serde_json::json!("mastodon"));
            item.extra
                .insert("status_id".to_string(), serde_json::json!(status.id));
            item.extra
                .insert("acct".to_string(), serde_json::json!(status.account.acct));
            let tags: Vec<String> = status.tags.iter().map(|t| t.name.clone()).collect();
            if !tags.is_empty() {
                item.extra.insert("tags".to_string(), serde_json::json!(tags));
            }
            items.push(item);
        }
        Ok(items)
    }

    async fn lookup_account_id(&self, base: &str, acct: &str) -> Result<String, CollectorError> {
        let lookup_url = format!("{base}/api/v1/accounts/lookup?acct={acct}");
        let body = self
            .http
            .get_with_headers(&lookup_url, &self.auth_headers())
            .await
            .map_err(|e| {
                CollectorError::with_cause("Account lookup failed", self.source.id.clone(), e)
            })?;
        if !body.status().is_success() {
            return Err(CollectorError::new(
                format!("Account lookup failed: HTTP {}", body.status()),
                self.source.id.clone(),
            ));
        }
        let account: MastodonAccount = body.json().await.map_err(|e| {
            CollectorError::with_cause("Account lookup returned invalid JSON", self.source.id.clone(), e)
        })?;
        Ok(account.id)
    }
}

#[async_trait]
impl Collector for MastodonCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Mastodon
    }

    async fn collect(&self, tx: mpsc::Sender<CollectedItem>) -> Result<(), CollectorError> {
        let (base, acct) = Self::parse_profile_url(&self.source.url).ok_or_else(|| {
            CollectorError::new(
                format!("cannot parse profile URL {}", self.source.url),
                self.source.id.clone(),
            )
        })?;

        let account_id = self.lookup_account_id(&base, &acct).await?;

        let limit = self.source.config_u64("max_items", DEFAULT_MAX_ITEMS).min(40);
        let exclude_replies = self.source.config_bool("exclude_replies", true);
        let exclude_reblogs = self.source.config_bool("exclude_reblogs", true);
        let statuses_url = format!(
            "{base}/api/v1/accounts/{account_id}/statuses?limit={limit}\
             &exclude_replies={exclude_replies}&exclude_reblogs={exclude_reblogs}"
        );
        let body = self
            .http
            .get_with_headers(&statuses_url, &self.auth_headers())
            .await
            .map_err(|e| {
                CollectorError::with_cause("Failed to fetch statuses", self.source.id.clone(), e)
            })?;
        if !body.status().is_success() {
            return Err(CollectorError::new(
                format!("Failed to fetch statuses: HTTP {}", body.status()),
                self.source.id.clone(),
            ));
        }
        let text = body.text().await.map_err(|e| {
            CollectorError::with_cause("Failed to read statuses body", self.source.id.clone(), e)
        })?;

        for item in self.parse_statuses(&text)? {
            if tx.send(item).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn validate(&self) -> bool {
        let Some((base, _)) = Self::parse_profile_url(&self.source.url) else {
            warn!(source = %self.source.name, url = %self.source.url, "Invalid Mastodon profile URL");
            return false;
        };
        match self.http.head(&format!("{base}/api/v1/instance")).await {
            Ok(status) => status.is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> MastodonCollector {
        let source = Source::new(
            "Fediverse account",
            SourceType::Mastodon,
            "https://mastodon.social/@gargron",
        );
        MastodonCollector::new(source, HttpClient::with_defaults())
    }

    #[test]
    fn profile_url_parsing() {
        assert_eq!(
            MastodonCollector::parse_profile_url("https://mastodon.social/@gargron"),
            Some(("https://mastodon.social".to_string(), "gargron".to_string()))
        );
        assert_eq!(
            MastodonCollector::parse_profile_url("https://hachyderm.io/@user/12345"),
            Some(("https://hachyderm.io".to_string(), "user".to_string()))
        );
        assert_eq!(
            MastodonCollector::parse_profile_url("https://example.org/no-account"),
            None
        );
    }

    #[test]
    fn statuses_normalized_with_stripped_content() {
        let body = serde_json::json!([{
            "id": "111",
            "uri": "https://mastodon.social/users/gargron/statuses/111",
            "url": "https://mastodon.social/@gargron/111",
            "content": "<p>Hello <b>fediverse</b></p>",
            "created_at": "2025-01-06T08:00:00.000Z",
            "spoiler_text": "",
            "language": "en",
            "account": {"id": "1", "acct": "gargron", "display_name": "Eugen"},
            "media_attachments": [
                {"type": "image", "url": "https://files.example/1.png"}
            ],
            "tags": [{"name": "introduction"}]
        }])
        .to_string();

        let items = collector().parse_statuses(&body).unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.guid, "https://mastodon.social/users/gargron/statuses/111");
        assert_eq!(item.title, "Hello fediverse");
        assert_eq!(item.author.as_deref(), Some("Eugen"));
        assert_eq!(item.content.as_deref(), Some("Hello fediverse"));
        assert_eq!(item.image_url.as_deref(), Some("https://files.example/1.png"));
        assert_eq!(item.extra_tags(), vec!["introduction".to_string()]);
    }

    #[test]
    fn spoiler_text_becomes_title() {
        let body = serde_json::json!([{
            "id": "112",
            "uri": "https://mastodon.social/users/gargron/statuses/112",
            "content": "<p>Long body behind a warning</p>",
            "created_at": "2025-01-06T08:00:00.000Z",
            "spoiler_text": "CW: politics",
            "account": {"id": "1", "acct": "gargron"}
        }])
        .to_string();
        let items = collector().parse_statuses(&body).unwrap();
        assert_eq!(items[0].title, "CW: politics");
    }
}
