//! Generic collector for arbitrary JSON APIs.
//!
//! Fetches a JSON endpoint and maps fields onto [`CollectedItem`] through
//! configurable key mappings, with sensible fallback keys for common API
//! shapes.
//!
//! Source config options:
//! - `method` — GET (default) or POST
//! - `headers` — extra request headers (object)
//! - `body` — JSON body for POST
//! - `auth_token` — sent as `Authorization: Bearer <token>`
//! - `api_key` — sent as `X-API-Key`
//! - `items_path` — dotted path to the items array ("" = root is the array)
//! - `mapping` — object mapping item fields to JSON keys
//! - `max_items` (default 100)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use sentinel_common::{short_hash, CollectedItem, Source, SourceType};

use crate::text::strip_html;
use crate::{Collector, CollectorError, HttpClient};

const DEFAULT_MAX_ITEMS: u64 = 100;

pub struct CustomCollector {
    source: Source,
    http: HttpClient,
}

impl CustomCollector {
    pub fn new(source: Source, http: HttpClient) -> Self {
        Self { source, http }
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .source
            .config_value("headers")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(token) = self.source.config_str("auth_token") {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        if let Some(key) = self.source.config_str("api_key") {
            headers.push(("X-API-Key".to_string(), key.to_string()));
        }
        headers
    }

    /// Walk the dotted `items_path` into the document and map each entry.
    pub fn parse_document(&self, document: &Value) -> Result<Vec<CollectedItem>, CollectorError> {
        let items_path = self.source.config_str("items_path").unwrap_or("");
        let max_items = self.source.config_u64("max_items", DEFAULT_MAX_ITEMS) as usize;
        let mapping = self
            .source
            .config_value("mapping")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let mut node = document;
        if !items_path.is_empty() {
            for key in items_path.split('.') {
                match node.get(key) {
                    Some(next) => node = next,
                    None => break,
                }
            }
        }

        let entries = node.as_array().ok_or_else(|| {
            CollectorError::new(
                format!("expected an array at items_path '{items_path}'"),
                self.source.id.clone(),
            )
        })?;

        debug!(source = %self.source.name, entries = entries.len(), "Custom API document");

        let mut items = Vec::new();
        for entry in entries.iter().take(max_items) {
            match entry.as_object() {
                Some(obj) => items.push(parse_entry(obj, &mapping)),
                None => {
                    warn!(source = %self.source.name, "Skipping non-object entry");
                }
            }
        }
        Ok(items)
    }
}

/// Mapped key first, then the fallback keys in order.
fn get_field<'a>(
    entry: &'a serde_json::Map<String, Value>,
    mapping: &serde_json::Map<String, Value>,
    field: &str,
    fallbacks: &[&str],
) -> Option<&'a Value> {
    if let Some(key) = mapping.get(field).and_then(|v| v.as_str()) {
        if let Some(value) = entry.get(key) {
            return Some(value);
        }
    }
    fallbacks.iter().find_map(|key| entry.get(*key))
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_entry(
    entry: &serde_json::Map<String, Value>,
    mapping: &serde_json::Map<String, Value>,
) -> CollectedItem {
    let guid = get_field(entry, mapping, "guid", &["id", "guid", "uid", "_id"])
        .and_then(value_to_string)
        .unwrap_or_else(|| short_hash(&Value::Object(entry.clone()).to_string()));

    let title = get_field(entry, mapping, "title", &["title", "name", "headline"])
        .and_then(value_to_string)
        .unwrap_or_else(|| "Sans titre".to_string());

    let mut item = CollectedItem::new(guid, title);

    item.url = get_field(entry, mapping, "url", &["url", "link", "href"]).and_then(value_to_string);

    item.author = match get_field(entry, mapping, "author", &["author", "creator", "by", "user"]) {
        Some(Value::Object(author)) => author
            .get("name")
            .or_else(|| author.get("username"))
            .and_then(value_to_string),
        Some(other) => value_to_string(other),
        None => None,
    };

    item.content = get_field(entry, mapping, "content", &["content", "body", "text", "html"])
        .and_then(value_to_string)
        .map(|c| if c.contains('<') { strip_html(&c) } else { c });

    item.summary = get_field(
        entry,
        mapping,
        "summary",
        &["summary", "description", "excerpt", "abstract"],
    )
    .and_then(value_to_string);

    item.published_at = get_field(
        entry,
        mapping,
        "published_at",
        &["published_at", "date", "created_at", "pubDate", "timestamp"],
    )
    .and_then(parse_date);

    item.image_url = get_field(
        entry,
        mapping,
        "image_url",
        &["image_url", "image", "thumbnail", "cover", "og_image"],
    )
    .and_then(value_to_string);

    item.extra
        .insert("platform".to_string(), serde_json::json!("custom"));
    // Keep the scalar fields of the raw entry for downstream inspection
    let raw: serde_json::Map<String, Value> = entry
        .iter()
        .filter(|(_, v)| matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    item.extra.insert("raw".to_string(), Value::Object(raw));

    item
}

/// Numbers are epoch seconds; strings are RFC 3339 / RFC 2822.
fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => {
            let secs = n.as_f64()?;
            DateTime::from_timestamp(secs as i64, 0)
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|_| DateTime::parse_from_rfc2822(s).map(|dt| dt.with_timezone(&Utc)))
            .ok(),
        _ => None,
    }
}

#[async_trait]
impl Collector for CustomCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Custom
    }

    async fn collect(&self, tx: mpsc::Sender<CollectedItem>) -> Result<(), CollectorError> {
        let method = self
            .source
            .config_str("method")
            .unwrap_or("GET")
            .to_uppercase();
        let headers = self.headers();

        let response = if method == "POST" {
            let body = self
                .source
                .config_value("body")
                .cloned()
                .unwrap_or(Value::Null);
            self.http
                .post_json(&self.source.url, &body, &headers)
                .await
        } else {
            self.http.get_with_headers(&self.source.url, &headers).await
        }
        .map_err(|e| {
            CollectorError::with_cause("Failed to fetch custom API", self.source.id.clone(), e)
        })?;

        if !response.status().is_success() {
            return Err(CollectorError::new(
                format!("Custom API error: HTTP {}", response.status()),
                self.source.id.clone(),
            ));
        }

        let document: Value = response.json().await.map_err(|e| {
            CollectorError::with_cause(
                "Failed to parse custom API response as JSON",
                self.source.id.clone(),
                e,
            )
        })?;

        for item in self.parse_document(&document)? {
            if tx.send(item).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn validate(&self) -> bool {
        match self.http.head(&self.source.url).await {
            Ok(status) => status.is_success() || status.is_redirection(),
            Err(_) => false,
        }
    }
}
