//! YouTube channel collector.
//!
//! YouTube publishes an Atom feed per channel at
//! `https://www.youtube.com/feeds/videos.xml?channel_id=<id>`; this collector
//! normalizes those entries. `@handle` URLs cannot be resolved to a channel
//! id without the Data API and are rejected at validation.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;
use url::Url;

use sentinel_common::{CollectedItem, Source, SourceType};

use crate::{Collector, CollectorError, HttpClient};

const DEFAULT_MAX_ITEMS: u64 = 50;

pub struct YoutubeCollector {
    source: Source,
    http: HttpClient,
}

impl YoutubeCollector {
    pub fn new(source: Source, http: HttpClient) -> Self {
        Self { source, http }
    }

    /// Channel id from the configured URL: the `channel_id` query parameter
    /// of a feed URL, or the `/channel/<id>` path segment. `@handle` URLs
    /// yield `None`.
    pub fn extract_channel_id(url: &str) -> Option<String> {
        let parsed = Url::parse(url).ok()?;
        if let Some((_, id)) = parsed.query_pairs().find(|(k, _)| k == "channel_id") {
            return Some(id.into_owned());
        }
        let mut segments = parsed.path_segments()?;
        while let Some(segment) = segments.next() {
            if segment == "channel" {
                return segments.next().map(|s| s.to_string());
            }
        }
        None
    }

    fn feed_url(&self) -> Result<String, CollectorError> {
        let channel_id = Self::extract_channel_id(&self.source.url).ok_or_else(|| {
            CollectorError::new(
                format!("cannot derive channel id from {}", self.source.url),
                self.source.id.clone(),
            )
        })?;
        Ok(format!(
            "https://www.youtube.com/feeds/videos.xml?channel_id={channel_id}"
        ))
    }

    pub fn parse_feed(&self, body: &[u8]) -> Result<Vec<CollectedItem>, CollectorError> {
        let feed = feed_rs::parser::parse(body).map_err(|e| {
            CollectorError::with_cause("Failed to parse channel feed", self.source.id.clone(), e)
        })?;

        let max_items = self.source.config_u64("max_items", DEFAULT_MAX_ITEMS) as usize;
        let mut items = Vec::new();
        for entry in feed.entries.iter().take(max_items) {
            let title = match &entry.title {
                Some(t) if !t.content.trim().is_empty() => t.content.clone(),
                _ => continue, // no usable title — skip the entry
            };

            let mut item = CollectedItem::new(entry.id.clone(), title);
            item.url = entry.links.first().map(|l| l.href.clone());
            item.author = entry.authors.first().map(|p| p.name.clone());
            item.published_at = entry.published.or(entry.updated);
            item.summary = entry.summary.as_ref().map(|s| s.content.clone());
            // yt:videoId is folded into the entry id as `yt:video:<id>`
            let video_id = entry.id.rsplit(':').next().unwrap_or("").to_string();
            for media in &entry.media {
                if item.image_url.is_none() {
                    item.image_url = media.thumbnails.first().map(|t| t.image.uri.clone());
                }
                if item.summary.is_none() {
                    item.summary = media
                        .description
                        .as_ref()
                        .map(|d| crate::text::cap_summary(&d.content, 1000));
                }
            }
            item.extra
                .insert("platform".to_string(), serde_json::json!("youtube"));
            if !video_id.is_empty() {
                item.extra
                    .insert("video_id".to_string(), serde_json::json!(video_id));
            }
            items.push(item);
        }
        Ok(items)
    }
}

#[async_trait]
impl Collector for YoutubeCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Youtube
    }

    async fn collect(&self, tx: mpsc::Sender<CollectedItem>) -> Result<(), CollectorError> {
        let feed_url = self.feed_url()?;
        let body = self.http.get_bytes(&feed_url).await.map_err(|e| {
            CollectorError::with_cause("Failed to fetch channel feed", self.source.id.clone(), e)
        })?;
        for item in self.parse_feed(&body)? {
            if tx.send(item).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn validate(&self) -> bool {
        let feed_url = match self.feed_url() {
            Ok(url) => url,
            Err(e) => {
                warn!(source = %self.source.name, error = %e, "Invalid YouTube source URL");
                return false;
            }
        };
        match self.http.head(&feed_url).await {
            Ok(status) => status.is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> YoutubeCollector {
        let source = Source::new(
            "Test Channel",
            SourceType::Youtube,
            "https://www.youtube.com/feeds/videos.xml?channel_id=UCtest123",
        );
        YoutubeCollector::new(source, HttpClient::with_defaults())
    }

    #[test]
    fn channel_id_from_feed_url() {
        assert_eq!(
            YoutubeCollector::extract_channel_id(
                "https://www.youtube.com/feeds/videos.xml?channel_id=UCtest123"
            )
            .as_deref(),
            Some("UCtest123")
        );
    }

    #[test]
    fn channel_id_from_channel_url() {
        assert_eq!(
            YoutubeCollector::extract_channel_id("https://www.youtube.com/channel/UCtest123")
                .as_deref(),
            Some("UCtest123")
        );
    }

    #[test]
    fn handle_urls_have_no_channel_id() {
        assert_eq!(
            YoutubeCollector::extract_channel_id("https://www.youtube.com/@testchannel"),
            None
        );
    }

    #[test]
    fn parses_channel_feed() {
        let atom = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom"
      xmlns:media="http://search.yahoo.com/mrss/"
      xmlns:yt="http://www.youtube.com/xml/schemas/2015">
  <title>Test Channel</title>
  <entry>
    <id>yt:video:abc123</id>
    <yt:videoId>abc123</yt:videoId>
    <title>Test Video</title>
    <link rel="alternate" href="https://www.youtube.com/watch?v=abc123"/>
    <author><name>Test Channel</name></author>
    <published>2025-01-01T00:00:00+00:00</published>
    <media:group>
      <media:thumbnail url="https://i.ytimg.com/vi/abc123/hqdefault.jpg"/>
      <media:description>Video description</media:description>
    </media:group>
  </entry>
</feed>"#;
        let items = collector().parse_feed(atom.as_bytes()).unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.guid, "yt:video:abc123");
        assert_eq!(item.title, "Test Video");
        assert_eq!(
            item.url.as_deref(),
            Some("https://www.youtube.com/watch?v=abc123")
        );
        assert_eq!(item.extra["platform"], "youtube");
        assert_eq!(item.extra["video_id"], "abc123");
    }
}
