use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// --- Source Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Rss,
    Reddit,
    Youtube,
    Web,
    Mastodon,
    Custom,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceType::Rss => write!(f, "rss"),
            SourceType::Reddit => write!(f, "reddit"),
            SourceType::Youtube => write!(f, "youtube"),
            SourceType::Web => write!(f, "web"),
            SourceType::Mastodon => write!(f, "mastodon"),
            SourceType::Custom => write!(f, "custom"),
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "rss" => Ok(Self::Rss),
            "reddit" => Ok(Self::Reddit),
            "youtube" => Ok(Self::Youtube),
            "web" => Ok(Self::Web),
            "mastodon" => Ok(Self::Mastodon),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown SourceType: {other}")),
        }
    }
}

/// A configured source to collect from.
/// Identity is `id` = `hex(sha256(name ":" url))[..32]`, so re-importing the
/// same feed list never creates duplicate rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub source_type: SourceType,
    pub url: String,
    pub enabled: bool,
    /// Polling cadence in minutes (>= 1).
    pub interval_minutes: u32,
    /// 1 = highest, 3 = lowest.
    pub priority: u8,
    pub category: Option<String>,
    /// Type-specific configuration bag (selectors, field mappings, tokens...).
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
}

impl Source {
    pub fn new(name: impl Into<String>, source_type: SourceType, url: impl Into<String>) -> Self {
        let name = name.into();
        let url = url.into();
        Self {
            id: source_id(&name, &url),
            name,
            source_type,
            url,
            enabled: true,
            interval_minutes: 60,
            priority: 2,
            category: None,
            config: serde_json::Value::Object(serde_json::Map::new()),
            created_at: Utc::now(),
            last_check: None,
            last_success: None,
            consecutive_errors: 0,
        }
    }

    /// Read a config value out of the type-specific bag.
    pub fn config_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.config.as_object().and_then(|m| m.get(key))
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config_value(key).and_then(|v| v.as_str())
    }

    pub fn config_u64(&self, key: &str, default: u64) -> u64 {
        self.config_value(key)
            .and_then(|v| v.as_u64())
            .unwrap_or(default)
    }

    pub fn config_bool(&self, key: &str, default: bool) -> bool {
        self.config_value(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }
}

/// Deterministic source id from `(name, url)` — stable across imports.
pub fn source_id(name: &str, url: &str) -> String {
    short_hash(&format!("{name}:{url}"))
}

/// First 32 hex chars of sha256, the id shape used for sources, items, and
/// synthesized guids.
pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex = format!("{digest:x}");
    hex[..32].to_string()
}

/// Content hash for cross-source deduplication: sha256 over `title + "\n" + content`.
pub fn content_hash(title: &str, content: Option<&str>) -> String {
    let text = format!("{title}\n{}", content.unwrap_or(""));
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

// --- Collected Items (transport, pre-persistence) ---

/// A normalized item emitted by a collector, before persistence.
/// `guid` is source-scoped and never empty — collectors synthesize one from
/// a hash of title+link when the upstream does not supply it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectedItem {
    pub guid: String,
    pub title: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    pub image_url: Option<String>,
    pub media_urls: Vec<String>,
    pub language: Option<String>,
    /// Free-form metadata bag (platform, tags, raw fields...).
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CollectedItem {
    pub fn new(guid: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            guid: guid.into(),
            title: title.into(),
            url: None,
            author: None,
            content: None,
            summary: None,
            published_at: None,
            collected_at: Utc::now(),
            image_url: None,
            media_urls: Vec::new(),
            language: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn content_hash(&self) -> String {
        content_hash(&self.title, self.content.as_deref())
    }

    /// Tags carried by the collector (feed categories, flairs...), if any.
    pub fn extra_tags(&self) -> Vec<String> {
        self.extra
            .get("tags")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Outcome of one collection cycle for one source.
#[derive(Debug, Clone)]
pub struct CollectionResult {
    pub source_id: String,
    pub source_name: String,
    pub success: bool,
    pub items_collected: usize,
    pub items_new: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl std::fmt::Display for CollectionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.success {
            write!(
                f,
                "[{}] Collected {} items ({} new) in {}ms",
                self.source_name, self.items_collected, self.items_new, self.duration_ms
            )
        } else {
            write!(
                f,
                "[{}] Failed: {}",
                self.source_name,
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

// --- Persisted Items ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    New,
    Read,
    Archived,
    Deleted,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemStatus::New => write!(f, "new"),
            ItemStatus::Read => write!(f, "read"),
            ItemStatus::Archived => write!(f, "archived"),
            ItemStatus::Deleted => write!(f, "deleted"),
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "read" => Ok(Self::Read),
            "archived" => Ok(Self::Archived),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown ItemStatus: {other}")),
        }
    }
}

/// A persisted item. Secondary uniqueness: `(source_id, guid)` and `content_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub source_id: String,
    pub guid: String,
    pub content_hash: String,
    pub title: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
    pub image_url: Option<String>,
    pub media_urls: Vec<String>,
    pub language: Option<String>,
    pub status: ItemStatus,
    pub starred: bool,
    pub relevance_score: f64,
    pub keywords: Vec<String>,
    pub tags: Vec<String>,
    /// Set when a cross-source content-hash collision was flagged (not rejected).
    pub duplicate_of: Option<String>,
}

impl Item {
    /// Build the persisted form of a collected item.
    /// The row id is deterministic in `(source_id, guid)` so re-collection
    /// upserts instead of duplicating.
    pub fn from_collected(source_id: &str, collected: &CollectedItem) -> Self {
        Self {
            id: short_hash(&format!("{source_id}:{}", collected.guid)),
            source_id: source_id.to_string(),
            guid: collected.guid.clone(),
            content_hash: collected.content_hash(),
            title: collected.title.clone(),
            url: collected.url.clone(),
            author: collected.author.clone(),
            content: collected.content.clone(),
            summary: collected.summary.clone(),
            published_at: collected.published_at,
            collected_at: collected.collected_at,
            image_url: collected.image_url.clone(),
            media_urls: collected.media_urls.clone(),
            language: collected.language.clone(),
            status: ItemStatus::New,
            starred: false,
            relevance_score: 0.0,
            keywords: collected.extra_tags(),
            tags: Vec::new(),
            duplicate_of: None,
        }
    }
}

// --- Filters ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    Highlight,
    Exclude,
    Tag,
    Alert,
}

impl std::fmt::Display for FilterAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterAction::Highlight => write!(f, "highlight"),
            FilterAction::Exclude => write!(f, "exclude"),
            FilterAction::Tag => write!(f, "tag"),
            FilterAction::Alert => write!(f, "alert"),
        }
    }
}

impl std::str::FromStr for FilterAction {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "highlight" => Ok(Self::Highlight),
            "exclude" => Ok(Self::Exclude),
            "tag" => Ok(Self::Tag),
            "alert" => Ok(Self::Alert),
            other => Err(format!("unknown FilterAction: {other}")),
        }
    }
}

/// A filter rule. Lower `priority` evaluates first; ties break on `id` so the
/// evaluation order is total. `conditions` stays a raw JSON tree here — the
/// filter engine parses and compiles it, and disables the rule in memory if
/// the schema or a regex is invalid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filter {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub priority: i32,
    pub action: FilterAction,
    pub conditions: serde_json::Value,
    /// Signed value added to the item score when the rule matches.
    pub score_modifier: f64,
    /// Action parameters: `severity` for alert rules, `tag` for tag rules.
    pub action_params: serde_json::Value,
}

impl Filter {
    pub fn new(name: impl Into<String>, action: FilterAction, conditions: serde_json::Value) -> Self {
        let name = name.into();
        Self {
            id: short_hash(&format!("filter:{name}")),
            name,
            enabled: true,
            priority: 100,
            action,
            conditions,
            score_modifier: 0.0,
            action_params: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.action_params.as_object().and_then(|m| m.get(key)).and_then(|v| v.as_str())
    }
}

// --- Severity ---

/// Alert severity. Variant order defines the gate order:
/// `info < notice < warning < critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Notice,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Notice => "notice",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Info => "ℹ️",
            Severity::Notice => "🔔",
            Severity::Warning => "⚠️",
            Severity::Critical => "🚨",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "Info",
            Severity::Notice => "Notice",
            Severity::Warning => "Warning",
            Severity::Critical => "Critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "notice" => Ok(Self::Notice),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown Severity: {other}")),
        }
    }
}

// --- Alerts ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    #[default]
    Pending,
    Delivered,
    Suppressed,
    Failed,
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertState::Pending => write!(f, "pending"),
            AlertState::Delivered => write!(f, "delivered"),
            AlertState::Suppressed => write!(f, "suppressed"),
            AlertState::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for AlertState {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "suppressed" => Ok(Self::Suppressed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown AlertState: {other}")),
        }
    }
}

/// Per-channel delivery record for one alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDelivery {
    pub channel: String,
    pub delivered: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub item_id: String,
    pub filter_id: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
    pub delivered_channels: Vec<ChannelDelivery>,
    pub state: AlertState,
}

impl Alert {
    pub fn new(item_id: impl Into<String>, filter_id: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            item_id: item_id.into(),
            filter_id: filter_id.into(),
            severity,
            created_at: Utc::now(),
            delivered_channels: Vec::new(),
            state: AlertState::Pending,
        }
    }
}

// --- User Actions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Star,
    Archive,
    Read,
    Delete,
    Ignore,
}

impl ActionKind {
    /// Fixed engagement signal fed into preference learning.
    pub fn signal(&self) -> f64 {
        match self {
            ActionKind::Star => 1.0,
            ActionKind::Archive => 0.5,
            ActionKind::Read => 0.3,
            ActionKind::Delete => -0.8,
            ActionKind::Ignore => -0.2,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Star => write!(f, "star"),
            ActionKind::Archive => write!(f, "archive"),
            ActionKind::Read => write!(f, "read"),
            ActionKind::Delete => write!(f, "delete"),
            ActionKind::Ignore => write!(f, "ignore"),
        }
    }
}

impl std::str::FromStr for ActionKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "star" => Ok(Self::Star),
            "archive" => Ok(Self::Archive),
            "read" => Ok(Self::Read),
            "delete" => Ok(Self::Delete),
            "ignore" => Ok(Self::Ignore),
            other => Err(format!("unknown ActionKind: {other}")),
        }
    }
}

/// Append-only record of a user engaging with an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAction {
    pub user: String,
    pub item_id: String,
    pub kind: ActionKind,
    pub at: DateTime<Utc>,
}

// --- User Preferences ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    Keyword,
    Source,
    Author,
    Category,
}

impl std::fmt::Display for FeatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureType::Keyword => write!(f, "keyword"),
            FeatureType::Source => write!(f, "source"),
            FeatureType::Author => write!(f, "author"),
            FeatureType::Category => write!(f, "category"),
        }
    }
}

impl std::str::FromStr for FeatureType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "keyword" => Ok(Self::Keyword),
            "source" => Ok(Self::Source),
            "author" => Ok(Self::Author),
            "category" => Ok(Self::Category),
            other => Err(format!("unknown FeatureType: {other}")),
        }
    }
}

/// A learned weighted preference. `(feature_type, feature_value)` is unique;
/// the stored weight is raw — decay is applied at read time from
/// `decay_anchor_at`, never by a background sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreference {
    pub feature_type: FeatureType,
    pub feature_value: String,
    pub weight: f64,
    pub updated_at: DateTime<Utc>,
    pub decay_anchor_at: DateTime<Utc>,
}

impl UserPreference {
    /// Weight after time decay: `w · 2^(-Δdays / half_life)`.
    pub fn effective_weight(&self, now: DateTime<Utc>, half_life_days: f64) -> f64 {
        let days = (now - self.decay_anchor_at).num_seconds() as f64 / 86_400.0;
        if days <= 0.0 || half_life_days <= 0.0 {
            return self.weight;
        }
        self.weight * 2f64.powf(-days / half_life_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn source_id_is_deterministic() {
        let a = source_id("Hacker News", "https://news.ycombinator.com/rss");
        let b = source_id("Hacker News", "https://news.ycombinator.com/rss");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn source_id_differs_on_name_or_url() {
        let base = source_id("Feed", "https://a.example/rss");
        assert_ne!(base, source_id("Feed 2", "https://a.example/rss"));
        assert_ne!(base, source_id("Feed", "https://b.example/rss"));
    }

    #[test]
    fn content_hash_covers_title_and_content() {
        let a = content_hash("Title", Some("body"));
        let b = content_hash("Title", Some("body"));
        assert_eq!(a, b);
        assert_ne!(a, content_hash("Title", Some("other body")));
        assert_ne!(a, content_hash("Other title", Some("body")));
        // Missing content hashes like empty content
        assert_eq!(content_hash("T", None), content_hash("T", Some("")));
    }

    #[test]
    fn item_id_deterministic_in_source_and_guid() {
        let ci = CollectedItem::new("guid-1", "A title");
        let a = Item::from_collected("src-1", &ci);
        let b = Item::from_collected("src-1", &ci);
        assert_eq!(a.id, b.id);
        let c = Item::from_collected("src-2", &ci);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn severity_order_matches_gate() {
        assert!(Severity::Info < Severity::Notice);
        assert!(Severity::Notice < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn severity_serde_roundtrip() {
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
        let back: Severity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Severity::Warning);
    }

    #[test]
    fn action_signals_fixed() {
        assert_eq!(ActionKind::Star.signal(), 1.0);
        assert_eq!(ActionKind::Archive.signal(), 0.5);
        assert_eq!(ActionKind::Read.signal(), 0.3);
        assert_eq!(ActionKind::Delete.signal(), -0.8);
        assert_eq!(ActionKind::Ignore.signal(), -0.2);
    }

    #[test]
    fn preference_decay_halves_at_half_life() {
        let now = Utc::now();
        let pref = UserPreference {
            feature_type: FeatureType::Keyword,
            feature_value: "python".to_string(),
            weight: 10.0,
            updated_at: now - Duration::days(30),
            decay_anchor_at: now - Duration::days(30),
        };
        let w = pref.effective_weight(now, 30.0);
        assert!((w - 5.0).abs() < 0.01, "expected ~5.0, got {w}");
    }

    #[test]
    fn preference_no_decay_for_fresh_weight() {
        let now = Utc::now();
        let pref = UserPreference {
            feature_type: FeatureType::Source,
            feature_value: "src".to_string(),
            weight: 3.0,
            updated_at: now,
            decay_anchor_at: now,
        };
        assert!((pref.effective_weight(now, 30.0) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn extra_tags_read_from_bag() {
        let mut ci = CollectedItem::new("g", "t");
        ci.extra
            .insert("tags".to_string(), serde_json::json!(["rust", "news"]));
        assert_eq!(ci.extra_tags(), vec!["rust".to_string(), "news".to_string()]);
    }
}
