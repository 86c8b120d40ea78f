//! Collection scheduler.
//!
//! A single driver loop ticks every `tick_interval`, computes which enabled
//! sources are due — cadence plus failure backoff, recomputed from
//! `(last_check, consecutive_errors)` on every tick — and submits them to a
//! bounded worker pool. At most one job runs per source at any instant.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{debug, info, warn};

use sentinel_common::{CollectionResult, Source};
use sentinel_engine::FilterEngine;

use crate::app::App;
use crate::pipeline::run_source_cycle;

/// Effective wait before a source is due again: the configured cadence,
/// doubled per consecutive error, capped at `max_backoff_secs`.
pub fn effective_interval_secs(source: &Source, max_backoff_secs: u64) -> u64 {
    let base = source.interval_minutes as u64 * 60;
    let shift = source.consecutive_errors.min(16);
    base.saturating_mul(1u64 << shift).min(max_backoff_secs.max(base))
}

/// Due = `now >= (last_check ?? epoch) + effective_interval`.
pub fn is_due(source: &Source, max_backoff_secs: u64, now: DateTime<Utc>) -> bool {
    let Some(last_check) = source.last_check else {
        return true;
    };
    let wait = chrono::Duration::seconds(effective_interval_secs(source, max_backoff_secs) as i64);
    now >= last_check + wait
}

/// Submission order: priority ascending, then least-recently-checked first
/// (never-checked sources lead).
pub fn order_due(mut sources: Vec<Source>) -> Vec<Source> {
    sources.sort_by(|a, b| {
        a.priority.cmp(&b.priority).then_with(|| {
            match (a.last_check, b.last_check) {
                (None, None) => std::cmp::Ordering::Equal,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (Some(_), None) => std::cmp::Ordering::Greater,
                (Some(x), Some(y)) => x.cmp(&y),
            }
        })
    });
    sources
}

pub struct Scheduler {
    app: Arc<App>,
    /// Source ids with a job in flight — re-submission is a no-op.
    active: Arc<Mutex<HashSet<String>>>,
    workers: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(app: Arc<App>, shutdown: watch::Sender<bool>) -> Self {
        let max_parallel = app.config.scheduler.max_parallel;
        Self {
            app,
            active: Arc::new(Mutex::new(HashSet::new())),
            workers: Arc::new(Semaphore::new(max_parallel)),
            shutdown,
        }
    }

    /// Driver loop. Returns when `stop()` is called.
    pub async fn run(&self) {
        let tick_interval = Duration::from_secs(self.app.config.scheduler.tick_interval_secs);
        let mut shutdown = self.shutdown.subscribe();
        let mut tick = tokio::time::interval(tick_interval);
        info!(
            tick_secs = tick_interval.as_secs(),
            max_parallel = self.app.config.scheduler.max_parallel,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler stopping, draining in-flight jobs");
                        self.drain().await;
                        return;
                    }
                }
            }
        }
    }

    /// One scheduling pass: submit every due source.
    async fn tick(&self) {
        let sources = match self.app.store.load_enabled_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                warn!(error = %e, "Failed to load sources");
                return;
            }
        };

        let now = Utc::now();
        let max_backoff = self.app.config.scheduler.max_backoff_secs;
        let due: Vec<Source> = sources
            .into_iter()
            .filter(|s| is_due(s, max_backoff, now))
            .collect();
        if due.is_empty() {
            return;
        }

        let filter_engine = match self.filter_engine().await {
            Some(engine) => engine,
            None => return,
        };

        let due = order_due(due);
        debug!(due = due.len(), "Submitting due sources");
        for source in due {
            self.submit(source, Arc::clone(&filter_engine)).await;
        }
    }

    async fn filter_engine(&self) -> Option<Arc<FilterEngine>> {
        match self.app.store.load_filters().await {
            Ok(filters) => Some(Arc::new(FilterEngine::new(filters))),
            Err(e) => {
                warn!(error = %e, "Failed to load filters");
                None
            }
        }
    }

    /// Spawn one job unless this source already has one in flight.
    async fn submit(&self, source: Source, filter_engine: Arc<FilterEngine>) {
        {
            let mut active = self.active.lock().await;
            if !active.insert(source.id.clone()) {
                debug!(source = %source.name, "Job already in flight, skipping");
                return;
            }
        }

        let app = Arc::clone(&self.app);
        let active = Arc::clone(&self.active);
        let workers = Arc::clone(&self.workers);
        tokio::spawn(async move {
            let _permit = match workers.acquire().await {
                Ok(permit) => permit,
                Err(_) => return, // semaphore closed at shutdown
            };
            let result = run_source_cycle(&app, &source, &filter_engine).await;
            debug!(source = %source.name, success = result.success, "{result}");
            active.lock().await.remove(&source.id);
        });
    }

    /// One-shot execution for tests and `--once`: bypasses cadence, honors
    /// the concurrency limits, and waits for completion.
    pub async fn run_now(&self, source_id: Option<&str>) -> Vec<CollectionResult> {
        let sources = match self.app.store.load_enabled_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                warn!(error = %e, "Failed to load sources");
                return Vec::new();
            }
        };
        let selected: Vec<Source> = order_due(
            sources
                .into_iter()
                .filter(|s| source_id.map_or(true, |id| s.id == id))
                .collect(),
        );
        let Some(filter_engine) = self.filter_engine().await else {
            return Vec::new();
        };

        let jobs = selected.into_iter().map(|source| {
            let app = Arc::clone(&self.app);
            let active = Arc::clone(&self.active);
            let workers = Arc::clone(&self.workers);
            let filter_engine = Arc::clone(&filter_engine);
            async move {
                {
                    let mut active = active.lock().await;
                    if !active.insert(source.id.clone()) {
                        return None;
                    }
                }
                let result = match workers.acquire().await {
                    Ok(_permit) => run_source_cycle(&app, &source, &filter_engine).await,
                    Err(_) => {
                        active.lock().await.remove(&source.id);
                        return None;
                    }
                };
                active.lock().await.remove(&source.id);
                info!("{result}");
                Some(result)
            }
        });
        futures::future::join_all(jobs)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Signal shutdown to the driver loop (and anyone else on the channel).
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for in-flight jobs to finish, up to the configured grace period.
    async fn drain(&self) {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.app.config.scheduler.shutdown_grace_secs);
        loop {
            if self.active.lock().await.is_empty() {
                info!("All jobs drained");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                let stuck = self.active.lock().await.len();
                warn!(stuck, "Drain deadline reached, abandoning jobs");
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
