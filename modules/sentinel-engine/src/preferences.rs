//! Engagement-based preference learning.
//!
//! User actions carry fixed signals (star +1.0 ... ignore −0.2). Each action
//! nudges the weights of the item's features — keywords, source, author,
//! category — by `learning_rate · signal`, clamped to ±max. Weights decay at
//! read time with a 30-day half-life; there is no decay sweep.
//!
//! The learner stays inactive until enough actions have accumulated. Below
//! the threshold, updates are staged in memory only and the preference score
//! is 0; the staged weights are materialized to storage the moment the gate
//! opens, so the transition is continuous.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use sentinel_common::{ActionKind, FeatureType, UserPreference};

#[derive(Debug, Clone)]
pub struct LearningConfig {
    pub enabled: bool,
    pub learning_rate: f64,
    pub decay_half_life_days: f64,
    pub min_actions_required: u64,
    pub max_preference_score: f64,
    pub max_features_per_action: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            learning_rate: 0.1,
            decay_half_life_days: 30.0,
            min_actions_required: 20,
            max_preference_score: 25.0,
            max_features_per_action: 10,
        }
    }
}

pub type Feature = (FeatureType, String);

/// Feature extraction from an item's facets. Text features are lower-cased;
/// at most `max` features are returned, keywords first.
pub fn extract_features(
    keywords: &[String],
    source_id: &str,
    author: Option<&str>,
    category: Option<&str>,
    max: usize,
) -> Vec<Feature> {
    let mut features: Vec<Feature> = Vec::new();
    for keyword in keywords {
        let keyword = keyword.trim().to_lowercase();
        if !keyword.is_empty() {
            features.push((FeatureType::Keyword, keyword));
        }
    }
    features.push((FeatureType::Source, source_id.to_string()));
    if let Some(author) = author {
        let author = author.trim().to_lowercase();
        if !author.is_empty() {
            features.push((FeatureType::Author, author));
        }
    }
    if let Some(category) = category {
        let category = category.trim().to_lowercase();
        if !category.is_empty() {
            features.push((FeatureType::Category, category));
        }
    }
    features.truncate(max);
    features
}

pub struct PreferenceLearner {
    config: LearningConfig,
    weights: HashMap<Feature, UserPreference>,
    total_actions: u64,
    /// Set once the gate opened and the staged weights were handed out.
    materialized: bool,
}

impl PreferenceLearner {
    pub fn new(config: LearningConfig) -> Self {
        Self {
            config,
            weights: HashMap::new(),
            total_actions: 0,
            materialized: false,
        }
    }

    /// Restore learner state from storage.
    pub fn with_state(
        config: LearningConfig,
        preferences: Vec<UserPreference>,
        total_actions: u64,
    ) -> Self {
        let materialized = total_actions >= config.min_actions_required;
        let weights = preferences
            .into_iter()
            .map(|p| ((p.feature_type, p.feature_value.clone()), p))
            .collect();
        Self {
            config,
            weights,
            total_actions,
            materialized,
        }
    }

    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    pub fn total_actions(&self) -> u64 {
        self.total_actions
    }

    /// The activation gate: enough actions recorded to trust the signal.
    pub fn is_active(&self) -> bool {
        self.config.enabled && self.total_actions >= self.config.min_actions_required
    }

    /// Apply one user action to the given item features. Returns the
    /// preference rows that should be persisted — empty while the gate is
    /// closed, the full staged table the first time it opens.
    pub fn record_action(
        &mut self,
        kind: ActionKind,
        features: &[Feature],
        now: DateTime<Utc>,
    ) -> Vec<UserPreference> {
        if !self.config.enabled {
            return Vec::new();
        }
        self.total_actions += 1;

        let signal = kind.signal();
        let max = self.config.max_preference_score;
        let half_life = self.config.decay_half_life_days;
        let mut touched: Vec<Feature> = Vec::new();

        for feature in features.iter().take(self.config.max_features_per_action) {
            let entry = self
                .weights
                .entry(feature.clone())
                .or_insert_with(|| UserPreference {
                    feature_type: feature.0,
                    feature_value: feature.1.clone(),
                    weight: 0.0,
                    updated_at: now,
                    decay_anchor_at: now,
                });
            // Fold the pending decay into the stored weight, then re-anchor
            let effective = entry.effective_weight(now, half_life);
            entry.weight = (effective + self.config.learning_rate * signal).clamp(-max, max);
            entry.updated_at = now;
            entry.decay_anchor_at = now;
            touched.push(feature.clone());
        }

        debug!(kind = %kind, features = touched.len(), total_actions = self.total_actions,
               "Recorded preference action");

        if !self.is_active() {
            return Vec::new();
        }
        if !self.materialized {
            // Gate just opened: persist everything staged so far
            self.materialized = true;
            info!(
                total_actions = self.total_actions,
                preferences = self.weights.len(),
                "Preference learning activated"
            );
            return self.weights.values().cloned().collect();
        }
        touched
            .iter()
            .filter_map(|f| self.weights.get(f).cloned())
            .collect()
    }

    /// Sum of decayed weights over the item's features. Zero while the gate
    /// is closed.
    pub fn preference_score(&self, features: &[Feature], now: DateTime<Utc>) -> f64 {
        if !self.is_active() {
            return 0.0;
        }
        features
            .iter()
            .filter_map(|f| self.weights.get(f))
            .map(|p| p.effective_weight(now, self.config.decay_half_life_days))
            .sum()
    }

    /// Strongest current preferences, for the dashboard's summary view.
    pub fn top_preferences(&self, now: DateTime<Utc>, limit: usize) -> Vec<(Feature, f64)> {
        let mut all: Vec<(Feature, f64)> = self
            .weights
            .iter()
            .map(|(k, p)| {
                (
                    k.clone(),
                    p.effective_weight(now, self.config.decay_half_life_days),
                )
            })
            .collect();
        all.sort_by(|a, b| {
            b.1.abs()
                .partial_cmp(&a.1.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        all.truncate(limit);
        all
    }
}
