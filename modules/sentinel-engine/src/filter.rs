//! Filter engine.
//!
//! Rules are evaluated in ascending priority order (ties broken by id).
//! Each rule carries a condition tree — keywords, regex, or boolean
//! combinators — compiled once at load time. A rule whose condition schema
//! or regex is invalid is disabled in memory and skipped; the rest of the
//! ruleset keeps working.

use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use tracing::warn;

use sentinel_common::{CollectedItem, Filter, FilterAction, SentinelError, Severity};

// --- Condition tree (wire form) ---

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Keywords {
        #[serde(default = "default_field")]
        field: String,
        #[serde(default)]
        operator: KeywordOperator,
        value: Vec<String>,
        #[serde(default)]
        case_sensitive: bool,
    },
    Regex {
        #[serde(default = "default_field")]
        field: String,
        value: String,
    },
    Compound {
        logic: CompoundLogic,
        conditions: Vec<Condition>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeywordOperator {
    #[default]
    Contains,
    NotContains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompoundLogic {
    And,
    Or,
    Not,
}

fn default_field() -> String {
    "all".to_string()
}

// --- Compiled form ---

enum CompiledCondition {
    Keywords {
        field: String,
        operator: KeywordOperator,
        values: Vec<String>,
        case_sensitive: bool,
    },
    Regex {
        field: String,
        regex: Regex,
    },
    Compound {
        logic: CompoundLogic,
        children: Vec<CompiledCondition>,
    },
}

/// Outcome of evaluating one condition: whether it matched, and what matched
/// (kept for observability in alerts).
struct Evaluation {
    matched: bool,
    field: Option<String>,
    value: Option<String>,
}

impl Evaluation {
    fn no() -> Self {
        Self {
            matched: false,
            field: None,
            value: None,
        }
    }
}

impl CompiledCondition {
    fn compile(condition: &Condition) -> Result<Self, SentinelError> {
        match condition {
            Condition::Keywords {
                field,
                operator,
                value,
                case_sensitive,
            } => {
                if value.is_empty() {
                    return Err(SentinelError::Filter(
                        "keywords condition has no values".to_string(),
                    ));
                }
                let values = if *case_sensitive {
                    value.clone()
                } else {
                    value.iter().map(|v| v.to_lowercase()).collect()
                };
                Ok(Self::Keywords {
                    field: field.clone(),
                    operator: *operator,
                    values,
                    case_sensitive: *case_sensitive,
                })
            }
            Condition::Regex { field, value } => {
                let regex = RegexBuilder::new(value)
                    .size_limit(1 << 20)
                    .build()
                    .map_err(|e| SentinelError::Filter(format!("invalid regex '{value}': {e}")))?;
                Ok(Self::Regex {
                    field: field.clone(),
                    regex,
                })
            }
            Condition::Compound { logic, conditions } => {
                if *logic == CompoundLogic::Not && conditions.len() != 1 {
                    return Err(SentinelError::Filter(
                        "'not' takes exactly one child condition".to_string(),
                    ));
                }
                if conditions.is_empty() {
                    return Err(SentinelError::Filter(
                        "compound condition has no children".to_string(),
                    ));
                }
                let children = conditions
                    .iter()
                    .map(Self::compile)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Compound {
                    logic: *logic,
                    children,
                })
            }
        }
    }

    fn evaluate(&self, item: &CollectedItem) -> Evaluation {
        match self {
            Self::Keywords {
                field,
                operator,
                values,
                case_sensitive,
            } => {
                let haystack = field_text(item, field);
                let haystack = if *case_sensitive {
                    haystack
                } else {
                    haystack.to_lowercase()
                };
                let hit = values.iter().find(|v| haystack.contains(v.as_str()));
                match operator {
                    KeywordOperator::Contains => Evaluation {
                        matched: hit.is_some(),
                        field: Some(field.clone()),
                        value: hit.cloned(),
                    },
                    KeywordOperator::NotContains => Evaluation {
                        matched: hit.is_none(),
                        field: Some(field.clone()),
                        value: None,
                    },
                }
            }
            Self::Regex { field, regex } => {
                let haystack = field_text(item, field);
                match regex.find(&haystack) {
                    Some(found) => Evaluation {
                        matched: true,
                        field: Some(field.clone()),
                        value: Some(found.as_str().to_string()),
                    },
                    None => Evaluation::no(),
                }
            }
            Self::Compound { logic, children } => match logic {
                CompoundLogic::And => {
                    let mut last = Evaluation::no();
                    for child in children {
                        let eval = child.evaluate(item);
                        if !eval.matched {
                            return Evaluation::no();
                        }
                        last = eval;
                    }
                    last
                }
                CompoundLogic::Or => {
                    for child in children {
                        let eval = child.evaluate(item);
                        if eval.matched {
                            return eval;
                        }
                    }
                    Evaluation::no()
                }
                CompoundLogic::Not => {
                    let inner = children[0].evaluate(item);
                    Evaluation {
                        matched: !inner.matched,
                        field: None,
                        value: None,
                    }
                }
            },
        }
    }
}

/// Resolve a condition field to the item text. `all` concatenates
/// title, content, summary, and author.
fn field_text(item: &CollectedItem, field: &str) -> String {
    match field {
        "title" => item.title.clone(),
        "content" => item.content.clone().unwrap_or_default(),
        "summary" => item.summary.clone().unwrap_or_default(),
        "author" => item.author.clone().unwrap_or_default(),
        "url" => item.url.clone().unwrap_or_default(),
        _ => [
            Some(item.title.as_str()),
            item.content.as_deref(),
            item.summary.as_deref(),
            item.author.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("\n"),
    }
}

// --- Results ---

/// One rule that matched one item.
#[derive(Debug, Clone)]
pub struct FilterMatch {
    pub filter_id: String,
    pub filter_name: String,
    pub action: FilterAction,
    pub severity: Option<Severity>,
    pub matched_field: Option<String>,
    pub matched_value: Option<String>,
    pub score_modifier: f64,
    pub tag: Option<String>,
}

/// Accumulated outcome of running the whole ruleset over one item.
#[derive(Debug, Clone, Default)]
pub struct FilterResult {
    pub matches: Vec<FilterMatch>,
    pub highlighted: bool,
    pub excluded: bool,
    pub excluded_by: Option<String>,
    pub tags: Vec<String>,
    pub alerts: Vec<FilterMatch>,
    pub total_score_modifier: f64,
    pub should_alert: bool,
}

// --- Engine ---

struct CompiledRule {
    filter: Filter,
    /// None when the rule was disabled in memory (invalid schema or regex).
    condition: Option<CompiledCondition>,
}

pub struct FilterEngine {
    rules: Vec<CompiledRule>,
}

impl FilterEngine {
    /// Build the engine from the configured ruleset. Order is fixed here:
    /// ascending priority, ties broken by id.
    pub fn new(mut filters: Vec<Filter>) -> Self {
        filters.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.id.cmp(&b.id)));
        let rules = filters
            .into_iter()
            .map(|filter| {
                let condition = match serde_json::from_value::<Condition>(filter.conditions.clone())
                {
                    Ok(tree) => match CompiledCondition::compile(&tree) {
                        Ok(compiled) => Some(compiled),
                        Err(e) => {
                            warn!(filter = %filter.name, error = %e, "Disabling filter rule");
                            None
                        }
                    },
                    Err(e) => {
                        warn!(filter = %filter.name, error = %e, "Disabling filter rule: bad condition schema");
                        None
                    }
                };
                CompiledRule { filter, condition }
            })
            .collect();
        Self { rules }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Evaluate all rules against one item. An `exclude` match short-circuits:
    /// the item is not persisted, scored, or alerted.
    pub fn process_item(&self, item: &CollectedItem) -> FilterResult {
        let mut result = FilterResult::default();

        for rule in &self.rules {
            if !rule.filter.enabled {
                continue;
            }
            let Some(condition) = &rule.condition else {
                continue; // disabled in memory
            };
            let evaluation = condition.evaluate(item);
            if !evaluation.matched {
                continue;
            }

            let severity = rule
                .filter
                .param_str("severity")
                .and_then(|s| s.parse::<Severity>().ok());
            let tag = rule.filter.param_str("tag").map(|t| t.to_string());
            let matched = FilterMatch {
                filter_id: rule.filter.id.clone(),
                filter_name: rule.filter.name.clone(),
                action: rule.filter.action,
                severity,
                matched_field: evaluation.field,
                matched_value: evaluation.value,
                score_modifier: rule.filter.score_modifier,
                tag: tag.clone(),
            };

            match rule.filter.action {
                FilterAction::Exclude => {
                    result.excluded = true;
                    result.excluded_by = Some(rule.filter.name.clone());
                    result.matches.push(matched);
                    return result;
                }
                FilterAction::Highlight => {
                    result.highlighted = true;
                    result.total_score_modifier += rule.filter.score_modifier;
                }
                FilterAction::Tag => {
                    if let Some(tag) = tag {
                        if !result.tags.contains(&tag) {
                            result.tags.push(tag);
                        }
                    }
                    result.total_score_modifier += rule.filter.score_modifier;
                }
                FilterAction::Alert => {
                    result.should_alert = true;
                    result.total_score_modifier += rule.filter.score_modifier;
                    result.alerts.push(matched.clone());
                }
            }
            result.matches.push(matched);
        }
        result
    }

    /// Batch convenience: results plus included/excluded counts.
    pub fn process_items(&self, items: &[CollectedItem]) -> (Vec<FilterResult>, usize, usize) {
        let results: Vec<FilterResult> = items.iter().map(|i| self.process_item(i)).collect();
        let excluded = results.iter().filter(|r| r.excluded).count();
        let included = results.len() - excluded;
        (results, included, excluded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_item() -> CollectedItem {
        let mut item = CollectedItem::new(
            "test-guid-123",
            "Breaking News: AI Startup Raises $50M in Series A",
        );
        item.content =
            Some("A new artificial intelligence company has secured funding...".to_string());
        item.summary = Some("AI startup funding news".to_string());
        item.author = Some("John Reporter".to_string());
        item.url = Some("https://example.com/ai-startup-funding".to_string());
        item
    }

    fn make_filter(
        name: &str,
        priority: i32,
        action: FilterAction,
        conditions: serde_json::Value,
    ) -> Filter {
        let mut filter = Filter::new(name, action, conditions);
        filter.priority = priority;
        filter
    }

    #[test]
    fn keywords_contains_matches_any() {
        let engine = FilterEngine::new(vec![make_filter(
            "AI",
            10,
            FilterAction::Highlight,
            json!({"type": "keywords", "field": "title", "value": ["AI", "startup"]}),
        )]);
        let result = engine.process_item(&sample_item());
        assert!(result.highlighted);
        assert_eq!(result.matches.len(), 1);
    }

    #[test]
    fn keywords_case_insensitive_by_default() {
        let engine = FilterEngine::new(vec![make_filter(
            "breaking",
            10,
            FilterAction::Highlight,
            json!({"type": "keywords", "field": "title", "value": ["breaking news"]}),
        )]);
        assert!(engine.process_item(&sample_item()).highlighted);
    }

    #[test]
    fn keywords_case_sensitive_respected() {
        let engine = FilterEngine::new(vec![make_filter(
            "breaking",
            10,
            FilterAction::Highlight,
            json!({"type": "keywords", "field": "title", "value": ["breaking news"],
                   "case_sensitive": true}),
        )]);
        assert!(!engine.process_item(&sample_item()).highlighted);
    }

    #[test]
    fn keywords_not_contains_inverts() {
        let engine = FilterEngine::new(vec![make_filter(
            "no blockchain",
            10,
            FilterAction::Highlight,
            json!({"type": "keywords", "field": "title", "operator": "not_contains",
                   "value": ["blockchain"]}),
        )]);
        assert!(engine.process_item(&sample_item()).highlighted);
    }

    #[test]
    fn regex_reports_matched_substring() {
        let engine = FilterEngine::new(vec![make_filter(
            "funding amounts",
            10,
            FilterAction::Alert,
            json!({"type": "regex", "field": "title", "value": r"\$\d+M"}),
        )]);
        let result = engine.process_item(&sample_item());
        assert!(result.should_alert);
        assert_eq!(result.alerts[0].matched_value.as_deref(), Some("$50M"));
    }

    #[test]
    fn compound_and_needs_all_children() {
        let both = json!({"type": "compound", "logic": "and", "conditions": [
            {"type": "keywords", "field": "title", "value": ["AI"]},
            {"type": "keywords", "field": "title", "value": ["Series A"]}
        ]});
        let engine = FilterEngine::new(vec![make_filter("and", 10, FilterAction::Highlight, both)]);
        assert!(engine.process_item(&sample_item()).highlighted);

        let partial = json!({"type": "compound", "logic": "and", "conditions": [
            {"type": "keywords", "field": "title", "value": ["AI"]},
            {"type": "keywords", "field": "title", "value": ["Series B"]}
        ]});
        let engine =
            FilterEngine::new(vec![make_filter("and", 10, FilterAction::Highlight, partial)]);
        assert!(!engine.process_item(&sample_item()).highlighted);
    }

    #[test]
    fn compound_or_needs_any_child() {
        let conditions = json!({"type": "compound", "logic": "or", "conditions": [
            {"type": "keywords", "field": "title", "value": ["blockchain"]},
            {"type": "keywords", "field": "title", "value": ["AI"]}
        ]});
        let engine =
            FilterEngine::new(vec![make_filter("or", 10, FilterAction::Highlight, conditions)]);
        assert!(engine.process_item(&sample_item()).highlighted);
    }

    #[test]
    fn compound_not_requires_single_child() {
        let bad = json!({"type": "compound", "logic": "not", "conditions": [
            {"type": "keywords", "value": ["a"]},
            {"type": "keywords", "value": ["b"]}
        ]});
        let engine = FilterEngine::new(vec![make_filter("bad not", 10, FilterAction::Exclude, bad)]);
        // Invalid rule is disabled in memory: nothing is excluded
        assert!(!engine.process_item(&sample_item()).excluded);
    }

    #[test]
    fn field_all_searches_content_too() {
        let engine = FilterEngine::new(vec![make_filter(
            "funding anywhere",
            10,
            FilterAction::Highlight,
            json!({"type": "keywords", "field": "all", "value": ["funding"]}),
        )]);
        assert!(engine.process_item(&sample_item()).highlighted);
    }

    #[test]
    fn exclude_short_circuits_later_rules() {
        // Spec scenario: an exclude at priority 1 beats an alert at priority 10
        let engine = FilterEngine::new(vec![
            make_filter(
                "alert funding",
                10,
                FilterAction::Alert,
                json!({"type": "regex", "field": "title", "value": r"\$\d+M"}),
            ),
            make_filter(
                "exclude spam",
                1,
                FilterAction::Exclude,
                json!({"type": "keywords", "field": "title", "value": ["breaking news"]}),
            ),
        ]);
        let result = engine.process_item(&sample_item());
        assert!(result.excluded);
        assert!(!result.should_alert, "excluded item must not alert");
        assert!(result.alerts.is_empty());
        assert_eq!(result.excluded_by.as_deref(), Some("exclude spam"));
    }

    #[test]
    fn highlight_accumulates_score_modifier() {
        let mut filter = make_filter(
            "AI highlight",
            100,
            FilterAction::Highlight,
            json!({"type": "keywords", "field": "title", "value": ["AI"]}),
        );
        filter.score_modifier = 50.0;
        let engine = FilterEngine::new(vec![filter]);
        let result = engine.process_item(&sample_item());
        assert!(result.highlighted);
        assert_eq!(result.total_score_modifier, 50.0);
    }

    #[test]
    fn tag_action_adds_tag() {
        let mut filter = make_filter(
            "tag funding",
            100,
            FilterAction::Tag,
            json!({"type": "keywords", "field": "all", "value": ["funding", "Series A"]}),
        );
        filter.action_params = json!({"tag": "funding"});
        let engine = FilterEngine::new(vec![filter]);
        let result = engine.process_item(&sample_item());
        assert_eq!(result.tags, vec!["funding".to_string()]);
    }

    #[test]
    fn alert_severity_from_action_params() {
        let mut filter = make_filter(
            "critical breach",
            100,
            FilterAction::Alert,
            json!({"type": "keywords", "field": "title", "value": ["AI"]}),
        );
        filter.action_params = json!({"severity": "critical"});
        let engine = FilterEngine::new(vec![filter]);
        let result = engine.process_item(&sample_item());
        assert_eq!(result.alerts[0].severity, Some(Severity::Critical));
    }

    #[test]
    fn disabled_filter_has_no_effect() {
        let mut filter = make_filter(
            "disabled exclude",
            100,
            FilterAction::Exclude,
            json!({"type": "keywords", "field": "title", "value": ["AI"]}),
        );
        filter.enabled = false;
        let engine = FilterEngine::new(vec![filter]);
        let result = engine.process_item(&sample_item());
        assert!(!result.excluded);
        assert!(result.matches.is_empty());
    }

    #[test]
    fn invalid_regex_disables_only_that_rule() {
        let engine = FilterEngine::new(vec![
            make_filter(
                "broken",
                1,
                FilterAction::Exclude,
                json!({"type": "regex", "field": "title", "value": "(unclosed"}),
            ),
            make_filter(
                "working",
                2,
                FilterAction::Highlight,
                json!({"type": "keywords", "field": "title", "value": ["AI"]}),
            ),
        ]);
        let result = engine.process_item(&sample_item());
        assert!(!result.excluded);
        assert!(result.highlighted, "other rules keep working");
    }

    #[test]
    fn batch_processing_counts() {
        let engine = FilterEngine::new(vec![make_filter(
            "exclude spam",
            1,
            FilterAction::Exclude,
            json!({"type": "keywords", "field": "title", "value": ["spam"]}),
        )]);
        let spam = CollectedItem::new("g-spam", "Pure spam offer");
        let fine = sample_item();
        let (results, included, excluded) = engine.process_items(&[spam, fine]);
        assert_eq!(results.len(), 2);
        assert_eq!(included, 1);
        assert_eq!(excluded, 1);
    }
}
