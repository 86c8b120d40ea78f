//! Reddit collector.
//!
//! Reads the public JSON listing of a subreddit (no authentication needed;
//! Reddit only requires a descriptive User-Agent). The source URL is either
//! `https://www.reddit.com/r/<sub>` or a bare subreddit name in config.
//!
//! Source config options:
//! - `subreddit` — overrides the URL-derived name
//! - `listing` — `new` (default), `hot`, `top`, `rising`
//! - `min_score` (default 0) — posts below are skipped
//! - `include_nsfw` (default false)
//! - `max_items` (default 50, Reddit caps at 100)

use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use sentinel_common::{CollectedItem, Source, SourceType};

use crate::{Collector, CollectorError, HttpClient};

const REDDIT_BASE: &str = "https://www.reddit.com";
const DEFAULT_MAX_ITEMS: u64 = 50;

#[derive(Debug, Deserialize)]
struct RedditListing {
    data: RedditListingData,
}

#[derive(Debug, Deserialize)]
struct RedditListingData {
    children: Vec<RedditChild>,
}

#[derive(Debug, Deserialize)]
struct RedditChild {
    data: RedditPost,
}

#[derive(Debug, Deserialize)]
struct RedditPost {
    id: String,
    #[serde(default)]
    name: Option<String>,
    title: String,
    #[serde(default)]
    selftext: Option<String>,
    #[serde(default)]
    author: Option<String>,
    subreddit: String,
    permalink: String,
    #[serde(default)]
    url: Option<String>,
    created_utc: f64,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
    #[serde(default)]
    link_flair_text: Option<String>,
    #[serde(default)]
    over_18: bool,
    #[serde(default)]
    thumbnail: Option<String>,
}

pub struct RedditCollector {
    source: Source,
    http: HttpClient,
}

impl RedditCollector {
    pub fn new(source: Source, http: HttpClient) -> Self {
        Self { source, http }
    }

    /// Subreddit name, from config or the `/r/<sub>` path of the source URL.
    pub fn subreddit(&self) -> Option<String> {
        if let Some(sub) = self.source.config_str("subreddit") {
            return Some(sub.trim_start_matches("r/").to_string());
        }
        let url = &self.source.url;
        let idx = url.find("/r/")?;
        let rest = &url[idx + 3..];
        let sub = rest.split(['/', '?']).next()?;
        if sub.is_empty() {
            None
        } else {
            Some(sub.to_string())
        }
    }

    fn listing_url(&self) -> Result<String, CollectorError> {
        let sub = self.subreddit().ok_or_else(|| {
            CollectorError::new(
                format!("cannot derive subreddit from {}", self.source.url),
                self.source.id.clone(),
            )
        })?;
        let listing = self.source.config_str("listing").unwrap_or("new");
        let limit = self
            .source
            .config_u64("max_items", DEFAULT_MAX_ITEMS)
            .min(100);
        Ok(format!(
            "{REDDIT_BASE}/r/{sub}/{listing}.json?limit={limit}&raw_json=1"
        ))
    }

    pub fn parse_listing(&self, body: &str) -> Result<Vec<CollectedItem>, CollectorError> {
        let listing: RedditListing = serde_json::from_str(body).map_err(|e| {
            CollectorError::with_cause("Failed to parse listing JSON", self.source.id.clone(), e)
        })?;

        let min_score = self.source.config_value("min_score").and_then(|v| v.as_i64()).unwrap_or(0);
        let include_nsfw = self.source.config_bool("include_nsfw", false);

        let mut items = Vec::new();
        for child in listing.data.children {
            let post = child.data;
            if post.score < min_score {
                continue;
            }
            if post.over_18 && !include_nsfw {
                continue;
            }

            // Fullname (`t3_<id>`) is Reddit's stable identifier
            let guid = post
                .name
                .clone()
                .unwrap_or_else(|| format!("t3_{}", post.id));

            let mut item = CollectedItem::new(guid, post.title.clone());
            item.url = Some(format!("{REDDIT_BASE}{}", post.permalink));
            item.author = post.author.clone();
            item.content = post.selftext.clone().filter(|s| !s.is_empty());
            item.published_at = DateTime::from_timestamp(post.created_utc as i64, 0);
            item.image_url = post
                .thumbnail
                .clone()
                .filter(|t| t.starts_with("http"));
            if let Some(link) = &post.url {
                // External link posts: the linked page is the media
                if !link.contains(&post.permalink) {
                    item.media_urls.push(link.clone());
                }
            }

            item.extra
                .insert("platform".to_string(), serde_json::json!("reddit"));
            item.extra
                .insert("subreddit".to_string(), serde_json::json!(post.subreddit));
            item.extra
                .insert("score".to_string(), serde_json::json!(post.score));
            item.extra.insert(
                "num_comments".to_string(),
                serde_json::json!(post.num_comments),
            );
            if let Some(flair) = &post.link_flair_text {
                item.extra
                    .insert("tags".to_string(), serde_json::json!([flair]));
            }
            items.push(item);
        }
        debug!(source = %self.source.name, posts = items.len(), "Parsed subreddit listing");
        Ok(items)
    }
}

#[async_trait]
impl Collector for RedditCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Reddit
    }

    async fn collect(&self, tx: mpsc::Sender<CollectedItem>) -> Result<(), CollectorError> {
        let url = self.listing_url()?;
        let body = self.http.get_text(&url).await.map_err(|e| {
            CollectorError::with_cause("Failed to fetch subreddit listing", self.source.id.clone(), e)
        })?;
        for item in self.parse_listing(&body)? {
            if tx.send(item).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn validate(&self) -> bool {
        let url = match self.listing_url() {
            Ok(url) => url,
            Err(e) => {
                warn!(source = %self.source.name, error = %e, "Invalid Reddit source");
                return false;
            }
        };
        match self.http.head(&url).await {
            Ok(status) => status.is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector(config: serde_json::Value) -> RedditCollector {
        let mut source = Source::new(
            "r/rust",
            SourceType::Reddit,
            "https://www.reddit.com/r/rust",
        );
        source.config = config;
        RedditCollector::new(source, HttpClient::with_defaults())
    }

    fn listing_json() -> String {
        serde_json::json!({
            "data": {
                "children": [
                    {"data": {
                        "id": "abc",
                        "name": "t3_abc",
                        "title": "Announcing release",
                        "selftext": "Full changelog inside",
                        "author": "ferris",
                        "subreddit": "rust",
                        "permalink": "/r/rust/comments/abc/announcing/",
                        "url": "https://blog.example.org/release",
                        "created_utc": 1736150400.0,
                        "score": 250,
                        "num_comments": 12,
                        "link_flair_text": "release",
                        "over_18": false,
                        "thumbnail": "https://b.thumbs.example/1.jpg"
                    }},
                    {"data": {
                        "id": "low",
                        "title": "Low score post",
                        "subreddit": "rust",
                        "permalink": "/r/rust/comments/low/x/",
                        "created_utc": 1736150400.0,
                        "score": 1,
                        "over_18": false
                    }},
                    {"data": {
                        "id": "nsfw",
                        "title": "NSFW post",
                        "subreddit": "rust",
                        "permalink": "/r/rust/comments/nsfw/x/",
                        "created_utc": 1736150400.0,
                        "score": 900,
                        "over_18": true
                    }}
                ]
            }
        })
        .to_string()
    }

    #[test]
    fn subreddit_derived_from_url() {
        assert_eq!(collector(serde_json::json!({})).subreddit().as_deref(), Some("rust"));
    }

    #[test]
    fn subreddit_config_wins() {
        assert_eq!(
            collector(serde_json::json!({"subreddit": "r/programming"}))
                .subreddit()
                .as_deref(),
            Some("programming")
        );
    }

    #[test]
    fn parses_posts_with_fullname_guid() {
        let items = collector(serde_json::json!({"min_score": 100}))
            .parse_listing(&listing_json())
            .unwrap();
        assert_eq!(items.len(), 1, "low-score and NSFW posts filtered out");
        let item = &items[0];
        assert_eq!(item.guid, "t3_abc");
        assert_eq!(item.title, "Announcing release");
        assert_eq!(
            item.url.as_deref(),
            Some("https://www.reddit.com/r/rust/comments/abc/announcing/")
        );
        assert_eq!(item.content.as_deref(), Some("Full changelog inside"));
        assert_eq!(item.extra["subreddit"], "rust");
        assert_eq!(item.extra_tags(), vec!["release".to_string()]);
        assert!(item.published_at.is_some());
    }

    #[test]
    fn nsfw_included_when_configured() {
        let items = collector(serde_json::json!({"include_nsfw": true}))
            .parse_listing(&listing_json())
            .unwrap();
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn malformed_listing_is_fatal() {
        let err = collector(serde_json::json!({}))
            .parse_listing("not json")
            .unwrap_err();
        assert!(err.message.contains("parse"));
    }
}
