//! Application context: every shared component, constructed once in `main`
//! and threaded through explicitly. Shutdown is a single close sequence —
//! scheduler first, then the dispatcher drain, then storage.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;

use sentinel_alert::{
    AlertDispatcher, DeliveryRecord, DeliverySink, DesktopChannel, EmailChannel,
    NotificationChannel, TelegramChannel, WebhookChannel,
};
use sentinel_collect::{CollectorRegistry, HttpClient};
use sentinel_engine::dedup::DedupIndex;
use sentinel_engine::preferences::extract_features;
use sentinel_engine::{LearningConfig, PreferenceLearner, Scorer};
use sentinel_common::{ActionKind, AlertsConfig, AppConfig, ItemStatus, UserAction};
use sentinel_store::Store;

pub struct App {
    pub config: AppConfig,
    pub store: Store,
    pub http: HttpClient,
    pub registry: CollectorRegistry,
    pub dispatcher: Arc<AlertDispatcher>,
    pub learner: Mutex<PreferenceLearner>,
    pub scorer: Scorer,
}

impl App {
    pub async fn build(config: AppConfig, alerts_config: AlertsConfig) -> Result<Self> {
        let store = Store::connect(&config.database.path).await?;
        let http = HttpClient::new(Duration::from_secs(30))?;

        let channels = build_channels(&alerts_config, &http);
        let alerting = &alerts_config.alerting;
        let dispatcher = Arc::new(AlertDispatcher::new(
            channels,
            Duration::from_secs(alerting.aggregation_window_secs),
            Duration::from_millis(alerting.send_gap_ms),
            Duration::from_secs(alerting.send_timeout_secs),
        ));

        let preferences = store.load_preferences().await?;
        let total_actions = store.count_actions().await?;
        let learner =
            PreferenceLearner::with_state(LearningConfig::default(), preferences, total_actions);

        info!(database = %config.database.path, "Application context ready");
        Ok(Self {
            config,
            store,
            http,
            registry: CollectorRegistry::with_defaults(),
            dispatcher,
            learner: Mutex::new(learner),
            scorer: Scorer::default(),
        })
    }

    /// Record a user action on an item: append it, mirror it onto the item
    /// row, and feed the preference learner (persisting whatever weights it
    /// releases past its activation gate).
    pub async fn record_user_action(
        &self,
        user: &str,
        item_id: &str,
        kind: ActionKind,
    ) -> Result<()> {
        let item = self
            .store
            .get_item(item_id)
            .await?
            .ok_or_else(|| anyhow!("unknown item {item_id}"))?;
        let source = self.store.get_source(&item.source_id).await?;

        self.store
            .record_action(&UserAction {
                user: user.to_string(),
                item_id: item_id.to_string(),
                kind,
                at: Utc::now(),
            })
            .await?;

        match kind {
            ActionKind::Star => self.store.set_item_starred(item_id, true).await?,
            ActionKind::Archive => {
                self.store
                    .set_item_status(item_id, ItemStatus::Archived)
                    .await?
            }
            ActionKind::Read => self.store.set_item_status(item_id, ItemStatus::Read).await?,
            ActionKind::Delete => {
                self.store
                    .set_item_status(item_id, ItemStatus::Deleted)
                    .await?
            }
            ActionKind::Ignore => {}
        }

        let updates = {
            let mut learner = self.learner.lock().await;
            let features = extract_features(
                &item.keywords,
                &item.source_id,
                item.author.as_deref(),
                source.as_ref().and_then(|s| s.category.as_deref()),
                learner.config().max_features_per_action,
            );
            learner.record_action(kind, &features, Utc::now())
        };
        if !updates.is_empty() {
            self.store.upsert_preferences(&updates).await?;
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.store.close().await;
        info!("Application context closed");
    }
}

fn build_channels(
    alerts_config: &AlertsConfig,
    http: &HttpClient,
) -> Vec<Arc<dyn NotificationChannel>> {
    let channels = &alerts_config.alerting.channels;
    vec![
        Arc::new(TelegramChannel::new(channels.telegram.clone(), http.raw())),
        Arc::new(EmailChannel::new(channels.email.clone())),
        Arc::new(WebhookChannel::new(channels.webhook.clone(), http.raw())),
        Arc::new(DesktopChannel::new(channels.desktop.clone())),
    ]
}

/// Adapter: the repository as the dedup lookup index.
pub struct StoreIndex<'a>(pub &'a Store);

#[async_trait]
impl DedupIndex for StoreIndex<'_> {
    async fn guid_exists(&self, source_id: &str, guid: &str) -> Result<bool> {
        Ok(self.0.guid_exists(source_id, guid).await?)
    }

    async fn find_by_content_hash(&self, hash: &str) -> Result<Option<String>> {
        Ok(self.0.find_item_by_content_hash(hash).await?)
    }
}

/// Adapter: delivery outcomes land on the alert rows.
pub struct StoreSink(pub Store);

#[async_trait]
impl DeliverySink for StoreSink {
    async fn record(&self, record: &DeliveryRecord) {
        if let Err(e) = self
            .0
            .record_alert_delivery(
                &record.alert_id,
                &record.channel,
                record.delivered,
                record.at,
            )
            .await
        {
            tracing::warn!(alert_id = %record.alert_id, error = %e, "Failed to record delivery");
        }
    }
}
