//! Relevance scoring and ranking.
//!
//! `score = base + recency + priority + quality + filter + highlight +
//! preference + custom`, with each contribution kept in the breakdown for
//! observability. Recency decays exponentially with a 24h half-life.

use chrono::{DateTime, Utc};

use sentinel_common::CollectedItem;

use crate::filter::FilterResult;

const RECENCY_HALF_LIFE_HOURS: f64 = 24.0;
/// Factor used when an item has no publication date.
const MISSING_DATE_FACTOR: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct ScoringWeights {
    pub base_score: f64,
    pub recency_weight: f64,
    pub priority_weight: f64,
    pub quality_weight: f64,
    pub highlight_bonus: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            base_score: 50.0,
            recency_weight: 20.0,
            priority_weight: 10.0,
            quality_weight: 10.0,
            highlight_bonus: 30.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoreBreakdown {
    pub base: f64,
    pub recency: f64,
    pub priority: f64,
    pub quality: f64,
    pub filter: f64,
    pub highlight: f64,
    pub preference: f64,
    pub custom: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.base
            + self.recency
            + self.priority
            + self.quality
            + self.filter
            + self.highlight
            + self.preference
            + self.custom
    }
}

#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub item: CollectedItem,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
}

/// Everything beyond the item itself that feeds the score.
#[derive(Default)]
pub struct ScoreContext<'a> {
    pub source_priority: u8,
    pub filter_result: Option<&'a FilterResult>,
    pub preference_score: f64,
}

type CustomScorer = Box<dyn Fn(&CollectedItem, &ScoreContext) -> f64 + Send + Sync>;

pub struct Scorer {
    weights: ScoringWeights,
    custom_scorers: Vec<CustomScorer>,
}

impl Scorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self {
            weights,
            custom_scorers: Vec::new(),
        }
    }

    pub fn register_custom_scorer(
        &mut self,
        scorer: impl Fn(&CollectedItem, &ScoreContext) -> f64 + Send + Sync + 'static,
    ) {
        self.custom_scorers.push(Box::new(scorer));
    }

    pub fn score_item(&self, item: &CollectedItem, context: &ScoreContext<'_>) -> ScoredItem {
        self.score_item_at(item, context, Utc::now())
    }

    /// Like [`score_item`](Self::score_item) with an explicit clock, so tests
    /// are deterministic.
    pub fn score_item_at(
        &self,
        item: &CollectedItem,
        context: &ScoreContext<'_>,
        now: DateTime<Utc>,
    ) -> ScoredItem {
        let mut breakdown = ScoreBreakdown {
            base: self.weights.base_score,
            recency: self.weights.recency_weight * recency_factor(item.published_at, now),
            priority: self.weights.priority_weight * priority_factor(context.source_priority),
            quality: self.weights.quality_weight * quality_factor(item),
            preference: context.preference_score,
            ..Default::default()
        };

        if let Some(filter_result) = context.filter_result {
            breakdown.filter = filter_result.total_score_modifier;
            if filter_result.highlighted {
                breakdown.highlight = self.weights.highlight_bonus;
            }
        }

        for scorer in &self.custom_scorers {
            breakdown.custom += scorer(item, context);
        }

        ScoredItem {
            item: item.clone(),
            score: breakdown.total(),
            breakdown,
        }
    }
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new(ScoringWeights::default())
    }
}

/// Exponential decay with a 24h half-life, clamped to [0, 1].
/// Items without a date sit in the middle rather than at either extreme.
pub fn recency_factor(published_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(published) = published_at else {
        return MISSING_DATE_FACTOR;
    };
    let age_hours = (now - published).num_seconds() as f64 / 3600.0;
    if age_hours <= 0.0 {
        return 1.0;
    }
    (-std::f64::consts::LN_2 * age_hours / RECENCY_HALF_LIFE_HOURS)
        .exp()
        .clamp(0.0, 1.0)
}

/// Priority 1 (highest) → 1.0, 2 → 0.5, 3 → 0.2.
pub fn priority_factor(priority: u8) -> f64 {
    match priority {
        0 | 1 => 1.0,
        2 => 0.5,
        _ => 0.2,
    }
}

/// Content-length heuristic blended with presence of image / author / summary.
pub fn quality_factor(item: &CollectedItem) -> f64 {
    let length_factor = match item.content.as_deref().map(|c| c.len()).unwrap_or(0) {
        0 => 0.0,
        1..=99 => 0.1,
        100..=499 => 0.4,
        500..=1999 => 0.7,
        _ => 1.0,
    };
    let mut factor: f64 = 0.6 * length_factor;
    if item.image_url.is_some() {
        factor += 0.15;
    }
    if item.author.is_some() {
        factor += 0.1;
    }
    if item.summary.is_some() {
        factor += 0.15;
    }
    factor.clamp(0.0, 1.0)
}

/// Stable rank: score descending, then newest first (undated items last),
/// then guid ascending for a total order.
pub fn rank(mut scored: Vec<ScoredItem>) -> Vec<ScoredItem> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.item.published_at.cmp(&a.item.published_at))
            .then_with(|| a.item.guid.cmp(&b.item.guid))
    });
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn rich_item(published_hours_ago: i64) -> CollectedItem {
        let mut item = CollectedItem::new("rich-item", "Recent News Article");
        item.content = Some("This is a recent article with good content. ".repeat(50));
        item.author = Some("Author Name".to_string());
        item.image_url = Some("https://example.com/image.jpg".to_string());
        item.summary = Some("summary".to_string());
        item.published_at = Some(Utc::now() - Duration::hours(published_hours_ago));
        item
    }

    fn minimal_item() -> CollectedItem {
        CollectedItem::new("minimal-item", "Minimal")
    }

    #[test]
    fn basic_item_scores_above_base_components() {
        let scorer = Scorer::default();
        let scored = scorer.score_item(&rich_item(1), &ScoreContext::default());
        assert!(scored.score > 0.0);
        assert_eq!(scored.breakdown.base, 50.0);
        assert!(scored.breakdown.recency > 0.0);
        assert!(scored.breakdown.quality > 0.0);
    }

    #[test]
    fn newer_items_score_higher() {
        let scorer = Scorer::default();
        let recent = scorer.score_item(&rich_item(1), &ScoreContext::default());
        let old = scorer.score_item(&rich_item(24 * 7), &ScoreContext::default());
        assert!(recent.breakdown.recency > old.breakdown.recency);
        assert!(recent.score > old.score);
    }

    #[test]
    fn recency_halves_at_half_life() {
        let now = Utc::now();
        let fresh = recency_factor(Some(now), now);
        let day_old = recency_factor(Some(now - Duration::hours(24)), now);
        assert!((fresh - 1.0).abs() < 1e-9);
        assert!((day_old - 0.5).abs() < 0.01, "got {day_old}");
    }

    #[test]
    fn missing_date_sits_in_the_middle() {
        let now = Utc::now();
        assert_eq!(recency_factor(None, now), 0.5);
    }

    #[test]
    fn quality_rewards_rich_items() {
        let rich = quality_factor(&rich_item(1));
        let minimal = quality_factor(&minimal_item());
        assert!(rich > minimal);
        assert!(minimal < 0.1);
    }

    #[test]
    fn priority_factors_ordered() {
        assert!(priority_factor(1) > priority_factor(2));
        assert!(priority_factor(2) > priority_factor(3));
        let scorer = Scorer::default();
        let item = rich_item(1);
        let high = scorer.score_item(
            &item,
            &ScoreContext {
                source_priority: 1,
                ..Default::default()
            },
        );
        let low = scorer.score_item(
            &item,
            &ScoreContext {
                source_priority: 3,
                ..Default::default()
            },
        );
        assert!(high.breakdown.priority > low.breakdown.priority);
    }

    #[test]
    fn filter_result_feeds_score_and_highlight() {
        let scorer = Scorer::default();
        let item = rich_item(1);
        let filter_result = FilterResult {
            total_score_modifier: 50.0,
            highlighted: true,
            ..Default::default()
        };
        let with = scorer.score_item(
            &item,
            &ScoreContext {
                filter_result: Some(&filter_result),
                ..Default::default()
            },
        );
        let without = scorer.score_item(&item, &ScoreContext::default());
        assert_eq!(with.breakdown.filter, 50.0);
        assert_eq!(with.breakdown.highlight, 30.0);
        assert!(with.score > without.score);
    }

    #[test]
    fn custom_scorer_contributes() {
        let mut scorer = Scorer::default();
        scorer.register_custom_scorer(|item, _ctx| {
            if item.title.to_lowercase().contains("ai") {
                25.0
            } else {
                0.0
            }
        });
        let plain = scorer.score_item(&rich_item(1), &ScoreContext::default());
        assert_eq!(plain.breakdown.custom, 0.0);

        let mut ai_item = rich_item(1);
        ai_item.title = "AI Revolution".to_string();
        let boosted = scorer.score_item(&ai_item, &ScoreContext::default());
        assert_eq!(boosted.breakdown.custom, 25.0);
    }

    #[test]
    fn custom_weights_respected() {
        let scorer = Scorer::new(ScoringWeights {
            recency_weight: 100.0,
            priority_weight: 0.0,
            quality_weight: 0.0,
            ..Default::default()
        });
        let scored = scorer.score_item(&rich_item(1), &ScoreContext::default());
        assert!(scored.breakdown.recency > 50.0);
        assert_eq!(scored.breakdown.priority, 0.0);
    }

    #[test]
    fn ranking_is_a_strict_weak_order() {
        let scorer = Scorer::default();
        let ctx = ScoreContext::default();
        let scored = vec![
            scorer.score_item(&rich_item(24 * 7), &ctx),
            scorer.score_item(&minimal_item(), &ctx),
            scorer.score_item(&rich_item(1), &ctx),
        ];
        let ranked = rank(scored);
        assert_eq!(ranked[0].item.guid, "rich-item");
        for pair in ranked.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn ties_break_on_published_then_guid() {
        let now = Utc::now();
        let mut a = CollectedItem::new("aaa", "Same");
        let mut b = CollectedItem::new("bbb", "Same");
        a.published_at = Some(now - Duration::hours(2));
        b.published_at = Some(now - Duration::hours(2));
        let scorer = Scorer::default();
        let ctx = ScoreContext::default();
        let ranked = rank(vec![
            scorer.score_item_at(&b, &ctx, now),
            scorer.score_item_at(&a, &ctx, now),
        ]);
        assert_eq!(ranked[0].item.guid, "aaa", "guid ascending breaks the tie");

        let mut newer = CollectedItem::new("zzz", "Same");
        newer.published_at = Some(now - Duration::hours(1));
        let ranked = rank(vec![
            scorer.score_item_at(&a, &ctx, now),
            scorer.score_item_at(&newer, &ctx, now),
        ]);
        // Same recency bucket would differ slightly; compare only when scores tie
        if (ranked[0].score - ranked[1].score).abs() < f64::EPSILON {
            assert_eq!(ranked[0].item.guid, "zzz");
        }
    }

    #[test]
    fn breakdown_total_sums_components() {
        let breakdown = ScoreBreakdown {
            base: 50.0,
            filter: 25.0,
            recency: 15.0,
            priority: 10.0,
            quality: 5.0,
            highlight: 30.0,
            preference: 0.0,
            custom: 10.0,
        };
        assert_eq!(breakdown.total(), 145.0);
    }
}
