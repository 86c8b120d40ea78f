//! Web page collector.
//!
//! Extracts a listing from an arbitrary HTML page with CSS selectors, or —
//! when the selectors match nothing — watches the page itself as a single
//! item (title tag + meta description).
//!
//! Source config options:
//! - `item_selector` (default `article`)
//! - `title_selector` (default `h1, h2, h3`)
//! - `link_selector` (default `a[href]`)
//! - `summary_selector` (default `p`)
//! - `max_items` (default 50)

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use sentinel_common::{short_hash, truncate_chars, CollectedItem, Source, SourceType};

use crate::text::collapse_whitespace;
use crate::{Collector, CollectorError, HttpClient};

const DEFAULT_MAX_ITEMS: u64 = 50;

pub struct WebCollector {
    source: Source,
    http: HttpClient,
}

impl WebCollector {
    pub fn new(source: Source, http: HttpClient) -> Self {
        Self { source, http }
    }

    fn selector(&self, key: &str, default: &str) -> Result<Selector, CollectorError> {
        let raw = self.source.config_str(key).unwrap_or(default);
        Selector::parse(raw).map_err(|e| {
            CollectorError::new(
                format!("invalid {key} '{raw}': {e}"),
                self.source.id.clone(),
            )
        })
    }

    pub fn parse_page(&self, html: &str) -> Result<Vec<CollectedItem>, CollectorError> {
        let item_selector = self.selector("item_selector", "article")?;
        let title_selector = self.selector("title_selector", "h1, h2, h3")?;
        let link_selector = self.selector("link_selector", "a[href]")?;
        let summary_selector = self.selector("summary_selector", "p")?;
        let max_items = self.source.config_u64("max_items", DEFAULT_MAX_ITEMS) as usize;

        let document = Html::parse_document(html);
        let mut items = Vec::new();

        for element in document.select(&item_selector).take(max_items) {
            let title = element
                .select(&title_selector)
                .next()
                .map(element_text)
                .filter(|t| !t.is_empty());
            let Some(title) = title else {
                continue; // a listing block without a heading is navigation noise
            };

            let link = element
                .select(&link_selector)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|href| resolve_href(href, &self.source.url));

            let summary = element
                .select(&summary_selector)
                .next()
                .map(element_text)
                .filter(|s| !s.is_empty())
                .map(|s| truncate_chars(&s, 500));

            let guid = short_hash(&format!(
                "{title}:{}",
                link.as_deref().unwrap_or(&self.source.url)
            ));
            let mut item = CollectedItem::new(guid, title);
            item.url = link.or_else(|| Some(self.source.url.clone()));
            item.summary = summary;
            item.extra
                .insert("platform".to_string(), serde_json::json!("web"));
            items.push(item);
        }

        // No listing matched: treat the whole page as one monitored item.
        if items.is_empty() {
            if let Some(item) = self.parse_single_page(&document) {
                items.push(item);
            }
        }

        debug!(source = %self.source.name, items = items.len(), "Parsed web page");
        Ok(items)
    }

    fn parse_single_page(&self, document: &Html) -> Option<CollectedItem> {
        let title_selector = Selector::parse("title").ok()?;
        let title = document
            .select(&title_selector)
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty())?;

        let description = Selector::parse("meta[name=description]")
            .ok()
            .and_then(|sel| {
                document
                    .select(&sel)
                    .next()
                    .and_then(|m| m.value().attr("content"))
                    .map(|s| s.to_string())
            });

        let guid = short_hash(&format!("{title}:{}", self.source.url));
        let mut item = CollectedItem::new(guid, title);
        item.url = Some(self.source.url.clone());
        item.summary = description;
        item.extra
            .insert("platform".to_string(), serde_json::json!("web"));
        Some(item)
    }
}

fn element_text(element: ElementRef) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn resolve_href(href: &str, base: &str) -> String {
    if Url::parse(href).is_ok() {
        return href.to_string();
    }
    match Url::parse(base).and_then(|b| b.join(href)) {
        Ok(resolved) => resolved.to_string(),
        Err(_) => href.to_string(),
    }
}

#[async_trait]
impl Collector for WebCollector {
    fn source_type(&self) -> SourceType {
        SourceType::Web
    }

    async fn collect(&self, tx: mpsc::Sender<CollectedItem>) -> Result<(), CollectorError> {
        let html = self.http.get_text(&self.source.url).await.map_err(|e| {
            CollectorError::with_cause("Failed to fetch page", self.source.id.clone(), e)
        })?;
        for item in self.parse_page(&html)? {
            if tx.send(item).await.is_err() {
                break;
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

#[cfg(test)]
mod tests {
    use super::*;

    fn collector(config: serde_json::Value) -> WebCollector {
        let mut source = Source::new("News page", SourceType::Web, "https://example.org/news");
        source.config = config;
        WebCollector::new(source, HttpClient::with_defaults())
    }

    const LISTING: &str = r#"<html><body>
      <article>
        <h2>First headline</h2>
        <p>First teaser paragraph.</p>
        <a href="/articles/first">Read</a>
      </article>
      <article>
        <h2>Second headline</h2>
        <a href="https://other.example/second">Read</a>
      </article>
      <article><span>no heading here</span></article>
    </body></html>"#;

    #[test]
    fn extracts_listing_items() {
        let items = collector(serde_json::json!({})).parse_page(LISTING).unwrap();
        assert_eq!(items.len(), 2, "block without heading is skipped");
        assert_eq!(items[0].title, "First headline");
        assert_eq!(
            items[0].url.as_deref(),
            Some("https://example.org/articles/first")
        );
        assert_eq!(
            items[0].summary.as_deref(),
            Some("First teaser paragraph.")
        );
        assert_eq!(
            items[1].url.as_deref(),
            Some("https://other.example/second")
        );
    }

    #[test]
    fn guids_are_deterministic() {
        let a = collector(serde_json::json!({})).parse_page(LISTING).unwrap();
        let b = collector(serde_json::json!({})).parse_page(LISTING).unwrap();
        assert_eq!(a[0].guid, b[0].guid);
        assert_ne!(a[0].guid, a[1].guid);
    }

    #[test]
    fn falls_back_to_single_page_watch() {
        let html = r#"<html><head>
          <title>Status page</title>
          <meta name="description" content="All systems operational">
        </head><body><p>hello</p></body></html>"#;
        let items = collector(serde_json::json!({})).parse_page(html).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Status page");
        assert_eq!(items[0].summary.as_deref(), Some("All systems operational"));
        assert_eq!(items[0].url.as_deref(), Some("https://example.org/news"));
    }

    #[test]
    fn custom_selectors_respected() {
        let html = r#"<html><body>
          <div class="card"><span class="t">Card title</span></div>
        </body></html>"#;
        let items = collector(serde_json::json!({
            "item_selector": "div.card",
            "title_selector": "span.t"
        }))
        .parse_page(html)
        .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Card title");
    }

    #[test]
    fn invalid_selector_is_fatal() {
        let err = collector(serde_json::json!({"item_selector": "???"}))
            .parse_page(LISTING)
            .unwrap_err();
        assert!(err.message.contains("item_selector"));
    }
}
