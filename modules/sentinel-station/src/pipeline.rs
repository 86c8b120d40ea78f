//! Per-source collection cycle: collect → dedup → filter → score → persist →
//! enqueue alerts. Emission order is preserved end to end; the items, their
//! alerts, and the source bookkeeping commit in one transaction.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use sentinel_alert::AlertPayload;
use sentinel_collect::drain;
use sentinel_common::{Alert, CollectedItem, CollectionResult, Item, Source};
use sentinel_engine::{
    preferences::extract_features, DedupOutcome, Deduplicator, FilterEngine, ScoreContext,
};
use sentinel_store::SourceStatusUpdate;

use crate::app::{App, StoreIndex};

/// Run one full cycle for one source. Never panics the scheduler: every
/// failure mode is folded into the returned [`CollectionResult`].
pub async fn run_source_cycle(
    app: &App,
    source: &Source,
    filter_engine: &FilterEngine,
) -> CollectionResult {
    let started = std::time::Instant::now();
    let now = Utc::now();

    let outcome = collect_and_process(app, source, filter_engine).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(stats) => {
            info!(
                source = %source.name,
                collected = stats.collected,
                new_items = stats.new_items,
                duplicates = stats.duplicates,
                excluded = stats.excluded,
                alerts = stats.alerts,
                duration_ms,
                "Cycle complete"
            );
            CollectionResult {
                source_id: source.id.clone(),
                source_name: source.name.clone(),
                success: true,
                items_collected: stats.collected,
                items_new: stats.new_items,
                error: None,
                duration_ms,
                timestamp: now,
            }
        }
        Err(message) => {
            warn!(source = %source.name, error = %message, duration_ms, "Cycle failed");
            if let Err(e) = app.store.record_source_failure(&source.id, now).await {
                warn!(source = %source.name, error = %e, "Failed to record source failure");
            }
            CollectionResult {
                source_id: source.id.clone(),
                source_name: source.name.clone(),
                success: false,
                items_collected: 0,
                items_new: 0,
                error: Some(message),
                duration_ms,
                timestamp: now,
            }
        }
    }
}

struct CycleStats {
    collected: usize,
    new_items: usize,
    duplicates: usize,
    excluded: usize,
    alerts: usize,
}

async fn collect_and_process(
    app: &App,
    source: &Source,
    filter_engine: &FilterEngine,
) -> Result<CycleStats, String> {
    let collector = app
        .registry
        .create(source, &app.http)
        .map_err(|e| e.to_string())?;

    let cycle_timeout = Duration::from_secs(app.config.scheduler.collector_timeout_secs);
    let (collected, outcome) =
        match tokio::time::timeout(cycle_timeout, drain(collector, 64)).await {
            Ok(result) => result,
            Err(_) => return Err(format!("collector timed out after {cycle_timeout:?}")),
        };
    outcome.map_err(|e| e.to_string())?;

    let deduplicator = Deduplicator::new(app.config.scheduler.cross_source_dedup);
    let index = StoreIndex(&app.store);

    let mut stats = CycleStats {
        collected: collected.len(),
        new_items: 0,
        duplicates: 0,
        excluded: 0,
        alerts: 0,
    };
    let mut batch_guids: HashSet<String> = HashSet::new();
    let mut items: Vec<Item> = Vec::new();
    let mut alerts: Vec<Alert> = Vec::new();
    let mut payloads: Vec<AlertPayload> = Vec::new();

    for collected_item in &collected {
        let verdict = deduplicator
            .assess(&index, &source.id, collected_item, &mut batch_guids)
            .await
            .map_err(|e| e.to_string())?;

        let duplicate_of = match verdict {
            DedupOutcome::SeenGuid => {
                stats.duplicates += 1;
                continue;
            }
            DedupOutcome::DuplicateContent { rejected: true, .. } => {
                stats.duplicates += 1;
                continue;
            }
            DedupOutcome::DuplicateContent { of, rejected: false } => {
                stats.duplicates += 1;
                Some(of)
            }
            DedupOutcome::Fresh => None,
        };

        let filter_result = filter_engine.process_item(collected_item);
        if filter_result.excluded {
            stats.excluded += 1;
            continue;
        }

        let preference_score = {
            let learner = app.learner.lock().await;
            let features = item_features(collected_item, source, learner.config().max_features_per_action);
            learner.preference_score(&features, Utc::now())
        };
        let scored = app.scorer.score_item(
            collected_item,
            &ScoreContext {
                source_priority: source.priority,
                filter_result: Some(&filter_result),
                preference_score,
            },
        );

        let mut item = Item::from_collected(&source.id, collected_item);
        item.relevance_score = scored.score;
        item.tags = filter_result.tags.clone();
        item.duplicate_of = duplicate_of;

        for filter_match in &filter_result.alerts {
            let severity = filter_match
                .severity
                .unwrap_or(sentinel_common::Severity::Notice);
            let alert = Alert::new(item.id.clone(), filter_match.filter_id.clone(), severity);
            payloads.push(AlertPayload {
                alert_id: alert.id.clone(),
                severity,
                title: collected_item.title.clone(),
                summary: collected_item.summary.clone(),
                url: collected_item.url.clone(),
                source_name: source.name.clone(),
                author: collected_item.author.clone(),
                published_at: collected_item.published_at,
                filter_id: filter_match.filter_id.clone(),
                filter_name: Some(filter_match.filter_name.clone()),
                matched_value: filter_match.matched_value.clone(),
                content: collected_item.content.clone(),
                tags: item.tags.clone(),
            });
            alerts.push(alert);
            stats.alerts += 1;
        }

        stats.new_items += 1;
        items.push(item);
    }

    let now = Utc::now();
    let status = SourceStatusUpdate {
        source_id: source.id.clone(),
        last_check: now,
        last_success: Some(now),
        consecutive_errors: 0,
    };
    app.store
        .persist_cycle(&status, &items, &alerts)
        .await
        .map_err(|e| e.to_string())?;

    // Alerts enter the aggregation window only once their rows are durable
    for payload in payloads {
        app.dispatcher.enqueue(payload).await;
    }

    Ok(stats)
}

/// Preference features of an in-flight item.
pub fn item_features(
    item: &CollectedItem,
    source: &Source,
    max: usize,
) -> Vec<(sentinel_common::FeatureType, String)> {
    extract_features(
        &item.extra_tags(),
        &source.id,
        item.author.as_deref(),
        source.category.as_deref(),
        max,
    )
}
