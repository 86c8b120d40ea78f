//! RSS/Atom collector.
//!
//! Handles RSS 2.0, RSS 1.0 (RDF), and Atom 1.0 through feed-rs, which also
//! folds Media RSS and Dublin Core extensions into its unified model.
//!
//! Source config options:
//! - `max_items` (default 100)
//! - `include_content` (default true)
//! - `strip_html` (default false)

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use feed_rs::model::{Entry, Feed};
use sentinel_common::{short_hash, CollectedItem, Source, SourceType};

use crate::text::{cap_summary, first_img_src, strip_html};
use crate::{Collector, CollectorError, HttpClient};

const DEFAULT_MAX_ITEMS: u64 = 100;

pub struct RssCollector {
    source: Source,
    http: HttpClient,
}

impl RssCollector {
    pub fn new(source: Source, http: HttpClient) -> Self {
        Self { source, http }
    }

    /// Parse a fetched feed document into normalized items.
    /// A document that fails to parse entirely is fatal to the cycle.
    pub fn parse_feed(&self, body: &[u8]) -> Result<Vec<CollectedItem>, CollectorError> {
        // Entries without an id get a deterministic one from title+link, so
        // the same entry dedups across cycles.
        let parser = feed_rs::parser::Builder::new()
            .id_generator(|links, title, _uri| {
                let link = links.first().map(|l| l.href.as_str()).unwrap_or("");
                let title = title.as_ref().map(|t| t.content.as_str()).unwrap_or("");
                short_hash(&format!("{title}:{link}"))
            })
            .build();
        let feed = parser.parse(body).map_err(|e| {
            CollectorError::with_cause("Failed to parse feed", self.source.id.clone(), e)
        })?;

        let max_items = self.source.config_u64("max_items", DEFAULT_MAX_ITEMS) as usize;
        let include_content = self.source.config_bool("include_content", true);
        let strip = self.source.config_bool("strip_html", false);

        let feed_link = feed_base_link(&feed).unwrap_or_else(|| self.source.url.clone());
        let language = feed.language.clone();

        debug!(
            source = %self.source.name,
            entries = feed.entries.len(),
            "Parsed feed"
        );

        Ok(feed
            .entries
            .iter()
            .take(max_items)
            .map(|entry| parse_entry(entry, &feed_link, include_content, strip, language.as_deref()))
            .collect())
    }
}

#[async_trait]
impl Collector for RssCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Rss
    }

    async fn collect(&self, tx: mpsc::Sender<CollectedItem>) -> Result<(), CollectorError> {
        let body = self.http.get_bytes(&self.source.url).await.map_err(|e| {
            CollectorError::with_cause("Failed to fetch feed", self.source.id.clone(), e)
        })?;
        for item in self.parse_feed(&body)? {
            if tx.send(item).await.is_err() {
                break; // consumer went away — cancelled
            }
        }
        Ok(())
    }

    async fn validate(&self) -> bool {
        match self.http.head(&self.source.url).await {
            Ok(status) => status.is_success() || status.is_redirection(),
            Err(e) => {
                warn!(source = %self.source.name, error = %e, "Validation failed");
                false
            }
        }
    }
}

/// The feed's own alternate link, used as base for resolving relative entry links.
fn feed_base_link(feed: &Feed) -> Option<String> {
    feed.links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| feed.links.first())
        .map(|l| l.href.clone())
}

fn parse_entry(
    entry: &Entry,
    feed_link: &str,
    include_content: bool,
    strip: bool,
    language: Option<&str>,
) -> CollectedItem {
    let link = extract_link(entry, feed_link);

    let raw_title = entry
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "Sans titre".to_string());
    let title = if strip { strip_html(&raw_title) } else { raw_title };

    let guid = extract_guid(entry, &title, link.as_deref());

    let mut content = None;
    let mut summary = None;
    if include_content {
        content = extract_content(entry, strip);
        summary = extract_summary(entry, strip);
        if summary.is_none() {
            summary = content.as_deref().map(|c| cap_summary(c, 500));
        }
    }

    let mut item = CollectedItem::new(guid, title);
    item.url = link;
    item.author = extract_author(entry);
    item.content = content;
    item.summary = summary;
    item.published_at = entry.published.or(entry.updated);
    item.image_url = extract_image(entry);
    item.media_urls = extract_media(entry);
    item.language = language.map(|l| l.to_string());

    let tags: Vec<String> = entry
        .categories
        .iter()
        .map(|c| c.label.clone().unwrap_or_else(|| c.term.clone()))
        .filter(|t| !t.is_empty())
        .collect();
    if !tags.is_empty() {
        item.extra.insert("tags".to_string(), serde_json::json!(tags));
    }
    item.extra
        .insert("feed_entry_id".to_string(), serde_json::json!(entry.id));

    item
}

/// Entry guid: the upstream id (feed-rs synthesizes our deterministic hash
/// when the source supplies none), else the link. Never empty.
fn extract_guid(entry: &Entry, title: &str, link: Option<&str>) -> String {
    if !entry.id.trim().is_empty() {
        return entry.id.clone();
    }
    match link {
        Some(link) => link.to_string(),
        None => short_hash(&format!("{title}:")),
    }
}

fn extract_link(entry: &Entry, feed_link: &str) -> Option<String> {
    let href = entry
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| entry.links.first())
        .map(|l| l.href.as_str())?;
    Some(resolve_link(href, feed_link))
}

/// Resolve a possibly-relative href against the feed's base link.
fn resolve_link(href: &str, base: &str) -> String {
    if Url::parse(href).is_ok() {
        return href.to_string();
    }
    match Url::parse(base).and_then(|b| b.join(href)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => href.to_string(),
    }
}

fn extract_author(entry: &Entry) -> Option<String> {
    let names: Vec<&str> = entry
        .authors
        .iter()
        .map(|p| p.name.as_str())
        .filter(|n| !n.trim().is_empty())
        .collect();
    if names.is_empty() {
        None
    } else {
        Some(names.join(", "))
    }
}

fn extract_content(entry: &Entry, strip: bool) -> Option<String> {
    let raw = entry
        .content
        .as_ref()
        .and_then(|c| c.body.clone())
        .or_else(|| entry.summary.as_ref().map(|s| s.content.clone()))?;
    Some(if strip { strip_html(&raw) } else { raw })
}

fn extract_summary(entry: &Entry, strip: bool) -> Option<String> {
    let raw = entry.summary.as_ref().map(|s| s.content.clone())?;
    let text = if strip { strip_html(&raw) } else { raw };
    Some(cap_summary(&text, 1000))
}

/// Main image: media thumbnail, then image-typed media content, then the
/// first `<img>` in the summary markup.
fn extract_image(entry: &Entry) -> Option<String> {
    for media in &entry.media {
        if let Some(thumbnail) = media.thumbnails.first() {
            return Some(thumbnail.image.uri.clone());
        }
    }
    for media in &entry.media {
        for content in &media.content {
            let is_image = content
                .content_type
                .as_ref()
                .map(|ct| ct.to_string().starts_with("image"))
                .unwrap_or(false);
            if is_image {
                if let Some(url) = &content.url {
                    return Some(url.to_string());
                }
            }
        }
    }
    entry
        .summary
        .as_ref()
        .and_then(|s| first_img_src(&s.content))
}

fn extract_media(entry: &Entry) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut urls = Vec::new();
    for media in &entry.media {
        for content in &media.content {
            if let Some(url) = &content.url {
                let url = url.to_string();
                if seen.insert(url.clone()) {
                    urls.push(url);
                }
            }
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector(config: serde_json::Value) -> RssCollector {
        let mut source = Source::new("Test Feed", SourceType::Rss, "https://example.org/feed.xml");
        source.config = config;
        RssCollector::new(source, HttpClient::with_defaults())
    }

    const RSS2: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Example</title>
    <link>https://example.org/</link>
    <item>
      <guid>https://example.org/a</guid>
      <title>First story</title>
      <link>/articles/a</link>
      <author>jane@example.org (Jane)</author>
      <description>&lt;p&gt;A &lt;b&gt;bold&lt;/b&gt; summary&lt;/p&gt;</description>
      <pubDate>Mon, 06 Jan 2025 08:00:00 GMT</pubDate>
      <category>tech</category>
      <media:thumbnail url="https://example.org/thumb.jpg"/>
    </item>
    <item>
      <title>No guid story</title>
      <link>https://example.org/b</link>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <link rel="alternate" href="https://example.org/"/>
  <entry>
    <id>urn:entry:1</id>
    <title>Atom entry</title>
    <link rel="alternate" href="https://example.org/atom-1"/>
    <author><name>Ada</name></author>
    <published>2025-01-06T08:00:00Z</published>
    <summary>Short summary</summary>
    <content type="html">&lt;p&gt;Full body&lt;/p&gt;</content>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss2_entries() {
        let items = collector(serde_json::json!({}))
            .parse_feed(RSS2.as_bytes())
            .unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.guid, "https://example.org/a");
        assert_eq!(first.title, "First story");
        assert!(first.published_at.is_some());
        assert_eq!(first.image_url.as_deref(), Some("https://example.org/thumb.jpg"));
        assert_eq!(first.extra_tags(), vec!["tech".to_string()]);
    }

    #[test]
    fn relative_links_resolved_against_feed_base() {
        let items = collector(serde_json::json!({}))
            .parse_feed(RSS2.as_bytes())
            .unwrap();
        assert_eq!(
            items[0].url.as_deref(),
            Some("https://example.org/articles/a")
        );
    }

    #[test]
    fn every_item_has_nonempty_guid_and_title() {
        let items = collector(serde_json::json!({}))
            .parse_feed(RSS2.as_bytes())
            .unwrap();
        for item in &items {
            assert!(!item.guid.is_empty());
            assert!(!item.title.is_empty());
        }
        // The guid-less entry gets the synthesized deterministic id
        assert_eq!(
            items[1].guid,
            short_hash("No guid story:https://example.org/b")
        );
    }

    #[test]
    fn parses_atom_entries() {
        let items = collector(serde_json::json!({}))
            .parse_feed(ATOM.as_bytes())
            .unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.guid, "urn:entry:1");
        assert_eq!(item.author.as_deref(), Some("Ada"));
        assert_eq!(item.url.as_deref(), Some("https://example.org/atom-1"));
        assert!(item.content.as_deref().unwrap().contains("Full body"));
        assert_eq!(item.summary.as_deref(), Some("Short summary"));
    }

    #[test]
    fn strip_html_cleans_content() {
        let items = collector(serde_json::json!({"strip_html": true}))
            .parse_feed(ATOM.as_bytes())
            .unwrap();
        assert_eq!(items[0].content.as_deref(), Some("Full body"));
    }

    #[test]
    fn max_items_caps_output() {
        let items = collector(serde_json::json!({"max_items": 1}))
            .parse_feed(RSS2.as_bytes())
            .unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn whole_document_failure_is_fatal() {
        let err = collector(serde_json::json!({}))
            .parse_feed(b"this is not a feed")
            .unwrap_err();
        assert!(err.message.contains("parse"));
    }

    #[test]
    fn summary_derived_from_content_is_capped() {
        let long_body = "word ".repeat(400);
        let feed = format!(
            r#"<?xml version="1.0"?><feed xmlns="http://www.w3.org/2005/Atom">
            <title>t</title>
            <entry><id>e1</id><title>Long</title>
            <content type="text">{long_body}</content></entry></feed>"#
        );
        let items = collector(serde_json::json!({}))
            .parse_feed(feed.as_bytes())
            .unwrap();
        let summary = items[0].summary.as_deref().unwrap();
        assert!(summary.chars().count() <= 503, "summary must be capped");
        assert!(summary.ends_with("..."));
    }
}
