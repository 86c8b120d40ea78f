//! Aggregating alert dispatcher.
//!
//! Alerts sharing `(filter_id, severity)` within the rolling window are
//! coalesced into one [`AggregatedAlert`]; each enabled channel is invoked
//! once per group (or once per alert for channels that opt out of
//! aggregation). Deliveries are recorded per `(alert_id, channel)` — that
//! ledger is also the idempotency key, so a replayed payload is never sent
//! twice to the same channel. One channel failing never affects the others.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use sentinel_common::Severity;

use crate::{AlertPayload, NotificationChannel};

/// Alerts coalesced within one aggregation window.
#[derive(Debug, Clone)]
pub struct AggregatedAlert {
    pub filter_id: String,
    pub severity: Severity,
    /// Arrival order is preserved.
    pub items: Vec<AlertPayload>,
}

impl AggregatedAlert {
    /// Collapse the group into a single payload for aggregating channels.
    pub fn to_payload(&self) -> AlertPayload {
        if self.items.len() == 1 {
            return self.items[0].clone();
        }
        let first = &self.items[0];
        let titles: Vec<String> = self
            .items
            .iter()
            .map(|p| format!("• {}", p.title))
            .collect();
        AlertPayload {
            alert_id: first.alert_id.clone(),
            severity: self.severity,
            title: format!(
                "{} alertes: {}",
                self.items.len(),
                first.filter_name.as_deref().unwrap_or("filtre")
            ),
            summary: Some(titles.join("\n")),
            url: None,
            source_name: self
                .items
                .iter()
                .map(|p| p.source_name.as_str())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect::<Vec<_>>()
                .join(", "),
            author: None,
            published_at: first.published_at,
            filter_id: self.filter_id.clone(),
            filter_name: first.filter_name.clone(),
            matched_value: None,
            content: None,
            tags: vec![],
        }
    }
}

/// Where delivery outcomes go (the storage layer, in production).
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn record(&self, record: &DeliveryRecord);
}

#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    pub alert_id: String,
    pub channel: String,
    pub delivered: bool,
    pub at: chrono::DateTime<Utc>,
}

struct PendingGroup {
    items: Vec<AlertPayload>,
    window_started: Instant,
}

pub struct AlertDispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
    window: Duration,
    send_gap: Duration,
    send_timeout: Duration,
    pending: Mutex<HashMap<(String, Severity), PendingGroup>>,
    /// `(alert_id, channel)` pairs already delivered — the idempotency ledger.
    ledger: Mutex<HashSet<(String, String)>>,
}

impl AlertDispatcher {
    pub fn new(
        channels: Vec<Arc<dyn NotificationChannel>>,
        window: Duration,
        send_gap: Duration,
        send_timeout: Duration,
    ) -> Self {
        let enabled: Vec<&str> = channels
            .iter()
            .filter(|c| c.enabled())
            .map(|c| c.name())
            .collect();
        info!(channels = ?enabled, "Alert dispatcher ready");
        Self {
            channels,
            window,
            send_gap,
            send_timeout,
            pending: Mutex::new(HashMap::new()),
            ledger: Mutex::new(HashSet::new()),
        }
    }

    /// Queue one alert payload into its aggregation group.
    pub async fn enqueue(&self, payload: AlertPayload) {
        let key = (payload.filter_id.clone(), payload.severity);
        let mut pending = self.pending.lock().await;
        let group = pending.entry(key).or_insert_with(|| PendingGroup {
            items: Vec::new(),
            window_started: Instant::now(),
        });
        group.items.push(payload);
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.values().map(|g| g.items.len()).sum()
    }

    /// Deliver every group whose window has elapsed (all of them when
    /// `force` is set, e.g. at shutdown).
    pub async fn flush(&self, force: bool) -> Vec<DeliveryRecord> {
        let due: Vec<AggregatedAlert> = {
            let mut pending = self.pending.lock().await;
            let keys: Vec<_> = pending
                .iter()
                .filter(|(_, group)| force || group.window_started.elapsed() >= self.window)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| {
                    pending.remove(&key).map(|group| AggregatedAlert {
                        filter_id: key.0,
                        severity: key.1,
                        items: group.items,
                    })
                })
                .collect()
        };

        let mut records = Vec::new();
        for group in due {
            records.extend(self.deliver_group(&group).await);
        }
        records
    }

    async fn deliver_group(&self, group: &AggregatedAlert) -> Vec<DeliveryRecord> {
        debug!(
            filter_id = %group.filter_id,
            severity = %group.severity,
            items = group.items.len(),
            "Delivering aggregated alert"
        );
        let mut records = Vec::new();

        for channel in &self.channels {
            if !channel.enabled() {
                continue;
            }
            if group.severity < channel.min_severity() {
                debug!(channel = channel.name(), severity = %group.severity, "Below channel severity gate");
                continue;
            }

            // Replay protection: only alerts not yet delivered on this channel
            let fresh: Vec<&AlertPayload> = {
                let ledger = self.ledger.lock().await;
                group
                    .items
                    .iter()
                    .filter(|p| {
                        !ledger.contains(&(p.alert_id.clone(), channel.name().to_string()))
                    })
                    .collect()
            };
            if fresh.is_empty() {
                continue;
            }

            if channel.aggregate() {
                let subgroup = AggregatedAlert {
                    filter_id: group.filter_id.clone(),
                    severity: group.severity,
                    items: fresh.iter().map(|p| (*p).clone()).collect(),
                };
                let payload = subgroup.to_payload();
                let delivered = self.send_one(channel.as_ref(), &payload).await;
                for item in &subgroup.items {
                    records.push(self.close_out(channel.name(), &item.alert_id, delivered).await);
                }
            } else {
                for (i, payload) in fresh.iter().enumerate() {
                    if i > 0 {
                        // Respect upstream rate limits within a batch
                        tokio::time::sleep(self.send_gap).await;
                    }
                    let delivered = self.send_one(channel.as_ref(), payload).await;
                    records.push(self.close_out(channel.name(), &payload.alert_id, delivered).await);
                }
            }
        }
        records
    }

    async fn send_one(&self, channel: &dyn NotificationChannel, payload: &AlertPayload) -> bool {
        match tokio::time::timeout(self.send_timeout, channel.send(payload)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(channel = channel.name(), error = %e, "Channel send failed");
                false
            }
            Err(_) => {
                warn!(channel = channel.name(), "Channel send timed out");
                false
            }
        }
    }

    async fn close_out(&self, channel: &str, alert_id: &str, delivered: bool) -> DeliveryRecord {
        if delivered {
            self.ledger
                .lock()
                .await
                .insert((alert_id.to_string(), channel.to_string()));
        }
        DeliveryRecord {
            alert_id: alert_id.to_string(),
            channel: channel.to_string(),
            delivered,
            at: Utc::now(),
        }
    }

    /// Window-timer loop: periodically flush expired groups, reporting
    /// outcomes to the sink; a final forced flush runs at shutdown.
    pub async fn run(&self, sink: Arc<dyn DeliverySink>, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    for record in self.flush(false).await {
                        sink.record(&record).await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        for record in self.flush(true).await {
                            sink.record(&record).await;
                        }
                        info!("Alert dispatcher drained");
                        return;
                    }
                }
            }
        }
    }
}
