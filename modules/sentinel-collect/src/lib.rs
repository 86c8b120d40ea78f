//! Per-source-type collectors.
//!
//! Every collector implements the same contract: fetch one source, normalize
//! whatever the wire format is into [`CollectedItem`]s, and push them — in
//! emission order — into a bounded channel owned by the consumer. A fatal
//! failure (network error, HTTP >= 400, whole-document parse failure) returns
//! a [`CollectorError`]; a malformed individual entry is logged and skipped.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use sentinel_common::{CollectedItem, Source, SourceType};

pub mod custom;
pub mod http;
pub mod mastodon;
pub mod reddit;
pub mod rss;
pub mod text;
pub mod web;
pub mod youtube;

pub use http::HttpClient;

/// Fatal collector failure for one cycle.
#[derive(Debug, Error)]
#[error("[{source_id}] {message}")]
pub struct CollectorError {
    pub message: String,
    pub source_id: String,
    pub cause: Option<anyhow::Error>,
}

impl CollectorError {
    pub fn new(message: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source_id: source_id.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        message: impl Into<String>,
        source_id: impl Into<String>,
        cause: impl Into<anyhow::Error>,
    ) -> Self {
        Self {
            message: message.into(),
            source_id: source_id.into(),
            cause: Some(cause.into()),
        }
    }
}

#[async_trait]
pub trait Collector: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Collect items for one cycle into `tx`. The producer closes the channel
    /// by dropping the sender; the consumer owns the drain and cancellation.
    async fn collect(&self, tx: mpsc::Sender<CollectedItem>) -> Result<(), CollectorError>;

    /// Lightweight reachability probe (typically HEAD).
    async fn validate(&self) -> bool;
}

/// Drain a collector through a bounded channel, preserving emission order.
/// Returns whatever was produced before the outcome, so partial batches from
/// a mid-cycle failure are still visible to the caller.
pub async fn drain(
    collector: Arc<dyn Collector>,
    channel_capacity: usize,
) -> (Vec<CollectedItem>, Result<(), CollectorError>) {
    let (tx, mut rx) = mpsc::channel(channel_capacity.max(1));
    let producer = {
        let collector = Arc::clone(&collector);
        tokio::spawn(async move { collector.collect(tx).await })
    };

    let mut items = Vec::new();
    while let Some(item) = rx.recv().await {
        items.push(item);
    }

    let outcome = match producer.await {
        Ok(result) => result,
        Err(join_err) => Err(CollectorError::new(
            format!("collector task aborted: {join_err}"),
            "",
        )),
    };
    (items, outcome)
}

type ConstructorFn = fn(Source, HttpClient) -> Arc<dyn Collector>;

/// Explicit mapping from source type to collector constructor, populated at
/// startup. No reflection, no global registry.
pub struct CollectorRegistry {
    constructors: HashMap<SourceType, ConstructorFn>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with all built-in collectors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(SourceType::Rss, |source, http| {
            Arc::new(rss::RssCollector::new(source, http))
        });
        registry.register(SourceType::Reddit, |source, http| {
            Arc::new(reddit::RedditCollector::new(source, http))
        });
        registry.register(SourceType::Youtube, |source, http| {
            Arc::new(youtube::YoutubeCollector::new(source, http))
        });
        registry.register(SourceType::Web, |source, http| {
            Arc::new(web::WebCollector::new(source, http))
        });
        registry.register(SourceType::Mastodon, |source, http| {
            Arc::new(mastodon::MastodonCollector::new(source, http))
        });
        registry.register(SourceType::Custom, |source, http| {
            Arc::new(custom::CustomCollector::new(source, http))
        });
        registry
    }

    pub fn register(&mut self, source_type: SourceType, constructor: ConstructorFn) {
        debug!(%source_type, "Registered collector");
        self.constructors.insert(source_type, constructor);
    }

    pub fn create(
        &self,
        source: &Source,
        http: &HttpClient,
    ) -> Result<Arc<dyn Collector>, CollectorError> {
        let constructor = self.constructors.get(&source.source_type).ok_or_else(|| {
            CollectorError::new(
                format!("no collector registered for source type: {}", source.source_type),
                source.id.clone(),
            )
        })?;
        Ok(constructor(source.clone(), http.clone()))
    }

    pub fn registered_types(&self) -> Vec<SourceType> {
        self.constructors.keys().copied().collect()
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
