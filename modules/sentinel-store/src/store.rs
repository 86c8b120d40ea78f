use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::info;

use sentinel_common::{
    Alert, Filter, FilterAction, Item, ItemStatus, Severity, SentinelError, Source, SourceType,
    UserAction, UserPreference,
};

type Result<T> = std::result::Result<T, SentinelError>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    source_type TEXT NOT NULL,
    url TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    interval_minutes INTEGER NOT NULL DEFAULT 60,
    priority INTEGER NOT NULL DEFAULT 2,
    category TEXT,
    config TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    last_check TEXT,
    last_success TEXT,
    consecutive_errors INTEGER NOT NULL DEFAULT 0,
    UNIQUE (name, url)
);

CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
    guid TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    title TEXT NOT NULL,
    url TEXT,
    author TEXT,
    content TEXT,
    summary TEXT,
    published_at TEXT,
    collected_at TEXT NOT NULL,
    image_url TEXT,
    media_urls TEXT NOT NULL DEFAULT '[]',
    language TEXT,
    status TEXT NOT NULL DEFAULT 'new',
    starred INTEGER NOT NULL DEFAULT 0,
    relevance_score REAL NOT NULL DEFAULT 0,
    keywords TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    duplicate_of TEXT,
    UNIQUE (source_id, guid)
);
CREATE INDEX IF NOT EXISTS idx_items_content_hash ON items(content_hash);
CREATE INDEX IF NOT EXISTS idx_items_collected_at ON items(collected_at);

CREATE TABLE IF NOT EXISTS filters (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    priority INTEGER NOT NULL DEFAULT 100,
    action TEXT NOT NULL,
    conditions TEXT NOT NULL,
    score_modifier REAL NOT NULL DEFAULT 0,
    action_params TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    item_id TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    filter_id TEXT NOT NULL,
    severity TEXT NOT NULL,
    created_at TEXT NOT NULL,
    delivered_channels TEXT NOT NULL DEFAULT '[]',
    state TEXT NOT NULL DEFAULT 'pending'
);

CREATE TABLE IF NOT EXISTS user_actions (
    user TEXT NOT NULL,
    item_id TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_preferences (
    feature_type TEXT NOT NULL,
    feature_value TEXT NOT NULL,
    weight REAL NOT NULL,
    updated_at TEXT NOT NULL,
    decay_anchor_at TEXT NOT NULL,
    PRIMARY KEY (feature_type, feature_value)
);
"#;

/// Bookkeeping written back to a source row together with its cycle's items.
#[derive(Debug, Clone)]
pub struct SourceStatusUpdate {
    pub source_id: String,
    pub last_check: DateTime<Utc>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_errors: u32,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `path` and run migrations.
    pub async fn connect(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SentinelError::Storage(format!("create {parent:?}: {e}")))?;
            }
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(storage_err)?;
        let store = Self { pool };
        store.migrate().await?;
        info!(path, "Database ready");
        Ok(store)
    }

    /// In-memory database, used by tests. A single connection keeps the
    /// database alive for the pool's lifetime.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(storage_err)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(storage_err)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // --- Sources ---

    pub async fn upsert_source(&self, source: &Source) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO sources
               (id, name, source_type, url, enabled, interval_minutes, priority,
                category, config, created_at, last_check, last_success, consecutive_errors)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 source_type = excluded.source_type,
                 url = excluded.url,
                 enabled = excluded.enabled,
                 interval_minutes = excluded.interval_minutes,
                 priority = excluded.priority,
                 category = excluded.category,
                 config = excluded.config"#,
        )
        .bind(&source.id)
        .bind(&source.name)
        .bind(source.source_type.to_string())
        .bind(&source.url)
        .bind(source.enabled)
        .bind(source.interval_minutes as i64)
        .bind(source.priority as i64)
        .bind(&source.category)
        .bind(source.config.to_string())
        .bind(source.created_at)
        .bind(source.last_check)
        .bind(source.last_success)
        .bind(source.consecutive_errors as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    pub async fn load_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT * FROM sources ORDER BY category, name")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(source_from_row).collect()
    }

    pub async fn load_enabled_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT * FROM sources WHERE enabled = 1")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(source_from_row).collect()
    }

    pub async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(source_from_row).transpose()
    }

    /// Explicit user delete — cascades to items, alerts, and actions.
    pub async fn delete_source(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sources WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    // --- Cycle commit ---

    /// Persist one cycle atomically: items (upsert on `(source_id, guid)`,
    /// preserving user-owned fields), their alerts, and the source's
    /// bookkeeping columns. Returns the number of item rows written.
    pub async fn persist_cycle(
        &self,
        status: &SourceStatusUpdate,
        items: &[Item],
        alerts: &[Alert],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        for item in items {
            sqlx::query(
                r#"INSERT INTO items
                   (id, source_id, guid, content_hash, title, url, author, content,
                    summary, published_at, collected_at, image_url, media_urls,
                    language, status, starred, relevance_score, keywords, tags, duplicate_of)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT (source_id, guid) DO UPDATE SET
                     content_hash = excluded.content_hash,
                     title = excluded.title,
                     url = excluded.url,
                     author = excluded.author,
                     content = excluded.content,
                     summary = excluded.summary,
                     published_at = excluded.published_at,
                     image_url = excluded.image_url,
                     media_urls = excluded.media_urls,
                     language = excluded.language,
                     relevance_score = excluded.relevance_score,
                     keywords = excluded.keywords,
                     tags = excluded.tags"#,
            )
            .bind(&item.id)
            .bind(&item.source_id)
            .bind(&item.guid)
            .bind(&item.content_hash)
            .bind(&item.title)
            .bind(&item.url)
            .bind(&item.author)
            .bind(&item.content)
            .bind(&item.summary)
            .bind(item.published_at)
            .bind(item.collected_at)
            .bind(&item.image_url)
            .bind(json_string(&item.media_urls)?)
            .bind(&item.language)
            .bind(item.status.to_string())
            .bind(item.starred)
            .bind(item.relevance_score)
            .bind(json_string(&item.keywords)?)
            .bind(json_string(&item.tags)?)
            .bind(&item.duplicate_of)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        for alert in alerts {
            sqlx::query(
                r#"INSERT INTO alerts
                   (id, item_id, filter_id, severity, created_at, delivered_channels, state)
                   VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&alert.id)
            .bind(&alert.item_id)
            .bind(&alert.filter_id)
            .bind(alert.severity.to_string())
            .bind(alert.created_at)
            .bind(json_string(&alert.delivered_channels)?)
            .bind(alert.state.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        sqlx::query(
            r#"UPDATE sources SET last_check = ?, last_success = ?, consecutive_errors = ?
               WHERE id = ?"#,
        )
        .bind(status.last_check)
        .bind(status.last_success)
        .bind(status.consecutive_errors as i64)
        .bind(&status.source_id)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(items.len())
    }

    /// Failed cycle: advance `last_check` and bump the error counter.
    pub async fn record_source_failure(
        &self,
        source_id: &str,
        last_check: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"UPDATE sources
               SET last_check = ?, consecutive_errors = consecutive_errors + 1
               WHERE id = ?"#,
        )
        .bind(last_check)
        .bind(source_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    // --- Dedup queries ---

    pub async fn guid_exists(&self, source_id: &str, guid: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM items WHERE source_id = ? AND guid = ?")
            .bind(source_id)
            .bind(guid)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.is_some())
    }

    /// Id of the first item carrying this content hash, if any.
    pub async fn find_item_by_content_hash(&self, hash: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT id FROM items WHERE content_hash = ? ORDER BY collected_at LIMIT 1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;
        row.map(|r| r.try_get::<String, _>("id").map_err(storage_err))
            .transpose()
    }

    // --- Items ---

    pub async fn get_item(&self, id: &str) -> Result<Option<Item>> {
        let row = sqlx::query("SELECT * FROM items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(item_from_row).transpose()
    }

    pub async fn set_item_status(&self, id: &str, status: ItemStatus) -> Result<()> {
        sqlx::query("UPDATE items SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn set_item_starred(&self, id: &str, starred: bool) -> Result<()> {
        sqlx::query("UPDATE items SET starred = ? WHERE id = ?")
            .bind(starred)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Range scan for reporting: items collected within `[from, to)`.
    pub async fn items_collected_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            r#"SELECT * FROM items WHERE collected_at >= ? AND collected_at < ?
               ORDER BY collected_at"#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(item_from_row).collect()
    }

    // --- Filters ---

    pub async fn upsert_filter(&self, filter: &Filter) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO filters
               (id, name, enabled, priority, action, conditions, score_modifier, action_params)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (id) DO UPDATE SET
                 name = excluded.name,
                 enabled = excluded.enabled,
                 priority = excluded.priority,
                 action = excluded.action,
                 conditions = excluded.conditions,
                 score_modifier = excluded.score_modifier,
                 action_params = excluded.action_params"#,
        )
        .bind(&filter.id)
        .bind(&filter.name)
        .bind(filter.enabled)
        .bind(filter.priority as i64)
        .bind(filter.action.to_string())
        .bind(filter.conditions.to_string())
        .bind(filter.score_modifier)
        .bind(filter.action_params.to_string())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    pub async fn load_filters(&self) -> Result<Vec<Filter>> {
        let rows = sqlx::query("SELECT * FROM filters ORDER BY priority, id")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(filter_from_row).collect()
    }

    // --- Alerts ---

    pub async fn update_alert(&self, alert: &Alert) -> Result<()> {
        sqlx::query("UPDATE alerts SET delivered_channels = ?, state = ? WHERE id = ?")
            .bind(json_string(&alert.delivered_channels)?)
            .bind(alert.state.to_string())
            .bind(&alert.id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Fold one channel delivery outcome into the alert row. State becomes
    /// `delivered` on the first success, `failed` once every recorded channel
    /// attempt has failed.
    pub async fn record_alert_delivery(
        &self,
        alert_id: &str,
        channel: &str,
        delivered: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let row = sqlx::query("SELECT delivered_channels, state FROM alerts WHERE id = ?")
            .bind(alert_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        let Some(row) = row else {
            return Err(SentinelError::Storage(format!("unknown alert {alert_id}")));
        };
        let raw: String = row.try_get("delivered_channels").map_err(storage_err)?;
        let mut deliveries: Vec<sentinel_common::ChannelDelivery> =
            serde_json::from_str(&raw).map_err(|e| SentinelError::Storage(e.to_string()))?;
        deliveries.push(sentinel_common::ChannelDelivery {
            channel: channel.to_string(),
            delivered,
            at,
        });
        let state = if deliveries.iter().any(|d| d.delivered) {
            sentinel_common::AlertState::Delivered
        } else {
            sentinel_common::AlertState::Failed
        };
        sqlx::query("UPDATE alerts SET delivered_channels = ?, state = ? WHERE id = ?")
            .bind(json_string(&deliveries)?)
            .bind(state.to_string())
            .bind(alert_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Reporting hook: alert counts per severity within `[from, to)`.
    pub async fn alert_counts_by_severity(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<(Severity, i64)>> {
        let rows = sqlx::query(
            r#"SELECT severity, COUNT(*) AS n FROM alerts
               WHERE created_at >= ? AND created_at < ?
               GROUP BY severity"#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter()
            .map(|row| {
                let severity: String = row.try_get("severity").map_err(storage_err)?;
                let n: i64 = row.try_get("n").map_err(storage_err)?;
                Ok((parse_enum::<Severity>(&severity)?, n))
            })
            .collect()
    }

    // --- User actions & preferences ---

    pub async fn record_action(&self, action: &UserAction) -> Result<()> {
        sqlx::query("INSERT INTO user_actions (user, item_id, kind, at) VALUES (?, ?, ?, ?)")
            .bind(&action.user)
            .bind(&action.item_id)
            .bind(action.kind.to_string())
            .bind(action.at)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn count_actions(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM user_actions")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        let n: i64 = row.try_get("n").map_err(storage_err)?;
        Ok(n as u64)
    }

    pub async fn load_preferences(&self) -> Result<Vec<UserPreference>> {
        let rows = sqlx::query("SELECT * FROM user_preferences")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter()
            .map(|row| {
                let feature_type: String = row.try_get("feature_type").map_err(storage_err)?;
                Ok(UserPreference {
                    feature_type: parse_enum(&feature_type)?,
                    feature_value: row.try_get("feature_value").map_err(storage_err)?,
                    weight: row.try_get("weight").map_err(storage_err)?,
                    updated_at: row.try_get("updated_at").map_err(storage_err)?,
                    decay_anchor_at: row.try_get("decay_anchor_at").map_err(storage_err)?,
                })
            })
            .collect()
    }

    /// Row-level upsert on the `(feature_type, feature_value)` key.
    pub async fn upsert_preferences(&self, preferences: &[UserPreference]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for pref in preferences {
            sqlx::query(
                r#"INSERT INTO user_preferences
                   (feature_type, feature_value, weight, updated_at, decay_anchor_at)
                   VALUES (?, ?, ?, ?, ?)
                   ON CONFLICT (feature_type, feature_value) DO UPDATE SET
                     weight = excluded.weight,
                     updated_at = excluded.updated_at,
                     decay_anchor_at = excluded.decay_anchor_at"#,
            )
            .bind(pref.feature_type.to_string())
            .bind(&pref.feature_value)
            .bind(pref.weight)
            .bind(pref.updated_at)
            .bind(pref.decay_anchor_at)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)
    }
}

// --- Row mapping ---

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    let source_type: String = row.try_get("source_type").map_err(storage_err)?;
    let config: String = row.try_get("config").map_err(storage_err)?;
    Ok(Source {
        id: row.try_get("id").map_err(storage_err)?,
        name: row.try_get("name").map_err(storage_err)?,
        source_type: parse_enum::<SourceType>(&source_type)?,
        url: row.try_get("url").map_err(storage_err)?,
        enabled: row.try_get("enabled").map_err(storage_err)?,
        interval_minutes: row.try_get::<i64, _>("interval_minutes").map_err(storage_err)? as u32,
        priority: row.try_get::<i64, _>("priority").map_err(storage_err)? as u8,
        category: row.try_get("category").map_err(storage_err)?,
        config: serde_json::from_str(&config)
            .map_err(|e| SentinelError::Storage(format!("source config column: {e}")))?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
        last_check: row.try_get("last_check").map_err(storage_err)?,
        last_success: row.try_get("last_success").map_err(storage_err)?,
        consecutive_errors: row
            .try_get::<i64, _>("consecutive_errors")
            .map_err(storage_err)? as u32,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<Item> {
    let status: String = row.try_get("status").map_err(storage_err)?;
    let media_urls: String = row.try_get("media_urls").map_err(storage_err)?;
    let keywords: String = row.try_get("keywords").map_err(storage_err)?;
    let tags: String = row.try_get("tags").map_err(storage_err)?;
    Ok(Item {
        id: row.try_get("id").map_err(storage_err)?,
        source_id: row.try_get("source_id").map_err(storage_err)?,
        guid: row.try_get("guid").map_err(storage_err)?,
        content_hash: row.try_get("content_hash").map_err(storage_err)?,
        title: row.try_get("title").map_err(storage_err)?,
        url: row.try_get("url").map_err(storage_err)?,
        author: row.try_get("author").map_err(storage_err)?,
        content: row.try_get("content").map_err(storage_err)?,
        summary: row.try_get("summary").map_err(storage_err)?,
        published_at: row.try_get("published_at").map_err(storage_err)?,
        collected_at: row.try_get("collected_at").map_err(storage_err)?,
        image_url: row.try_get("image_url").map_err(storage_err)?,
        media_urls: json_vec(&media_urls)?,
        language: row.try_get("language").map_err(storage_err)?,
        status: parse_enum::<ItemStatus>(&status)?,
        starred: row.try_get("starred").map_err(storage_err)?,
        relevance_score: row.try_get("relevance_score").map_err(storage_err)?,
        keywords: json_vec(&keywords)?,
        tags: json_vec(&tags)?,
        duplicate_of: row.try_get("duplicate_of").map_err(storage_err)?,
    })
}

fn filter_from_row(row: &SqliteRow) -> Result<Filter> {
    let action: String = row.try_get("action").map_err(storage_err)?;
    let conditions: String = row.try_get("conditions").map_err(storage_err)?;
    let action_params: String = row.try_get("action_params").map_err(storage_err)?;
    Ok(Filter {
        id: row.try_get("id").map_err(storage_err)?,
        name: row.try_get("name").map_err(storage_err)?,
        enabled: row.try_get("enabled").map_err(storage_err)?,
        priority: row.try_get::<i64, _>("priority").map_err(storage_err)? as i32,
        action: parse_enum::<FilterAction>(&action)?,
        conditions: serde_json::from_str(&conditions)
            .map_err(|e| SentinelError::Storage(format!("filter conditions column: {e}")))?,
        score_modifier: row.try_get("score_modifier").map_err(storage_err)?,
        action_params: serde_json::from_str(&action_params)
            .map_err(|e| SentinelError::Storage(format!("filter action_params column: {e}")))?,
    })
}

fn parse_enum<T: FromStr<Err = String>>(raw: &str) -> Result<T> {
    raw.parse::<T>().map_err(SentinelError::Storage)
}

fn json_string<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| SentinelError::Storage(e.to_string()))
}

fn json_vec(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| SentinelError::Storage(e.to_string()))
}

fn storage_err(e: impl std::fmt::Display) -> SentinelError {
    SentinelError::Storage(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use sentinel_common::{AlertState, ChannelDelivery, CollectedItem, SourceType};

    fn test_source(name: &str, url: &str) -> Source {
        let mut source = Source::new(name, SourceType::Rss, url);
        source.category = Some("tech".to_string());
        source
    }

    fn test_item(source_id: &str, guid: &str, title: &str) -> Item {
        let mut ci = CollectedItem::new(guid, title);
        ci.content = Some(format!("content of {title}"));
        Item::from_collected(source_id, &ci)
    }

    #[tokio::test]
    async fn upsert_source_is_idempotent() {
        let store = Store::in_memory().await.unwrap();
        let source = test_source("Feed", "https://example.org/rss");
        store.upsert_source(&source).await.unwrap();
        store.upsert_source(&source).await.unwrap();
        let all = store.load_sources().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, source.id);
        assert_eq!(all[0].category.as_deref(), Some("tech"));
    }

    #[tokio::test]
    async fn disabled_sources_not_loaded_as_enabled() {
        let store = Store::in_memory().await.unwrap();
        let mut source = test_source("Feed", "https://example.org/rss");
        source.enabled = false;
        store.upsert_source(&source).await.unwrap();
        assert!(store.load_enabled_sources().await.unwrap().is_empty());
        assert_eq!(store.load_sources().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn persist_cycle_writes_items_and_status() {
        let store = Store::in_memory().await.unwrap();
        let source = test_source("Feed", "https://example.org/rss");
        store.upsert_source(&source).await.unwrap();

        let now = Utc::now();
        let items = vec![
            test_item(&source.id, "g1", "First"),
            test_item(&source.id, "g2", "Second"),
        ];
        let status = SourceStatusUpdate {
            source_id: source.id.clone(),
            last_check: now,
            last_success: Some(now),
            consecutive_errors: 0,
        };
        let written = store.persist_cycle(&status, &items, &[]).await.unwrap();
        assert_eq!(written, 2);

        let reloaded = store.get_source(&source.id).await.unwrap().unwrap();
        assert!(reloaded.last_check.is_some());
        assert!(reloaded.last_success.is_some());
        assert_eq!(reloaded.consecutive_errors, 0);
        assert!(store.guid_exists(&source.id, "g1").await.unwrap());
        assert!(!store.guid_exists(&source.id, "missing").await.unwrap());
    }

    #[tokio::test]
    async fn reupsert_same_guid_keeps_user_state() {
        let store = Store::in_memory().await.unwrap();
        let source = test_source("Feed", "https://example.org/rss");
        store.upsert_source(&source).await.unwrap();

        let item = test_item(&source.id, "g1", "Original title");
        let status = SourceStatusUpdate {
            source_id: source.id.clone(),
            last_check: Utc::now(),
            last_success: Some(Utc::now()),
            consecutive_errors: 0,
        };
        store
            .persist_cycle(&status, &[item.clone()], &[])
            .await
            .unwrap();
        store.set_item_starred(&item.id, true).await.unwrap();
        store
            .set_item_status(&item.id, ItemStatus::Read)
            .await
            .unwrap();

        // Same guid arrives again with an updated title
        let mut updated = test_item(&source.id, "g1", "Updated title");
        updated.relevance_score = 77.0;
        store.persist_cycle(&status, &[updated], &[]).await.unwrap();

        let reloaded = store.get_item(&item.id).await.unwrap().unwrap();
        assert_eq!(reloaded.title, "Updated title");
        assert_eq!(reloaded.relevance_score, 77.0);
        assert!(reloaded.starred, "user star must survive re-collection");
        assert_eq!(reloaded.status, ItemStatus::Read);
    }

    #[tokio::test]
    async fn content_hash_lookup_finds_first_sighting() {
        let store = Store::in_memory().await.unwrap();
        let source = test_source("Feed", "https://example.org/rss");
        store.upsert_source(&source).await.unwrap();
        let item = test_item(&source.id, "g1", "Shared story");
        let status = SourceStatusUpdate {
            source_id: source.id.clone(),
            last_check: Utc::now(),
            last_success: Some(Utc::now()),
            consecutive_errors: 0,
        };
        store
            .persist_cycle(&status, &[item.clone()], &[])
            .await
            .unwrap();

        let found = store
            .find_item_by_content_hash(&item.content_hash)
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some(item.id.as_str()));
        assert!(store
            .find_item_by_content_hash("no-such-hash")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn record_failure_bumps_error_counter() {
        let store = Store::in_memory().await.unwrap();
        let source = test_source("Feed", "https://example.org/rss");
        store.upsert_source(&source).await.unwrap();

        store
            .record_source_failure(&source.id, Utc::now())
            .await
            .unwrap();
        store
            .record_source_failure(&source.id, Utc::now())
            .await
            .unwrap();
        let reloaded = store.get_source(&source.id).await.unwrap().unwrap();
        assert_eq!(reloaded.consecutive_errors, 2);
        assert!(reloaded.last_check.is_some());
        assert!(reloaded.last_success.is_none());
    }

    #[tokio::test]
    async fn delete_source_cascades_to_items() {
        let store = Store::in_memory().await.unwrap();
        let source = test_source("Feed", "https://example.org/rss");
        store.upsert_source(&source).await.unwrap();
        let item = test_item(&source.id, "g1", "Story");
        let status = SourceStatusUpdate {
            source_id: source.id.clone(),
            last_check: Utc::now(),
            last_success: Some(Utc::now()),
            consecutive_errors: 0,
        };
        store
            .persist_cycle(&status, &[item.clone()], &[])
            .await
            .unwrap();

        store.delete_source(&source.id).await.unwrap();
        assert!(store.get_item(&item.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn filters_roundtrip() {
        let store = Store::in_memory().await.unwrap();
        let mut filter = Filter::new(
            "AI highlight",
            FilterAction::Highlight,
            serde_json::json!({"type": "keywords", "field": "title", "value": ["ai"]}),
        );
        filter.priority = 5;
        filter.score_modifier = 25.0;
        store.upsert_filter(&filter).await.unwrap();

        let loaded = store.load_filters().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "AI highlight");
        assert_eq!(loaded[0].priority, 5);
        assert_eq!(loaded[0].action, FilterAction::Highlight);
        assert_eq!(loaded[0].conditions["type"], "keywords");
    }

    #[tokio::test]
    async fn preferences_upsert_on_feature_key() {
        let store = Store::in_memory().await.unwrap();
        let now = Utc::now();
        let pref = UserPreference {
            feature_type: sentinel_common::FeatureType::Keyword,
            feature_value: "python".to_string(),
            weight: 0.5,
            updated_at: now,
            decay_anchor_at: now,
        };
        store.upsert_preferences(&[pref.clone()]).await.unwrap();

        let bumped = UserPreference {
            weight: 0.7,
            updated_at: now + Duration::minutes(1),
            ..pref
        };
        store.upsert_preferences(&[bumped]).await.unwrap();

        let loaded = store.load_preferences().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!((loaded[0].weight - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn actions_are_append_only_and_counted() {
        let store = Store::in_memory().await.unwrap();
        let source = test_source("Feed", "https://example.org/rss");
        store.upsert_source(&source).await.unwrap();
        let item = test_item(&source.id, "g1", "Story");
        let status = SourceStatusUpdate {
            source_id: source.id.clone(),
            last_check: Utc::now(),
            last_success: Some(Utc::now()),
            consecutive_errors: 0,
        };
        store
            .persist_cycle(&status, &[item.clone()], &[])
            .await
            .unwrap();

        for _ in 0..3 {
            store
                .record_action(&UserAction {
                    user: "default".to_string(),
                    item_id: item.id.clone(),
                    kind: sentinel_common::ActionKind::Star,
                    at: Utc::now(),
                })
                .await
                .unwrap();
        }
        assert_eq!(store.count_actions().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn range_scan_respects_window() {
        let store = Store::in_memory().await.unwrap();
        let source = test_source("Feed", "https://example.org/rss");
        store.upsert_source(&source).await.unwrap();

        let now = Utc::now();
        let mut old_item = test_item(&source.id, "old", "Old story");
        old_item.collected_at = now - Duration::days(10);
        let mut new_item = test_item(&source.id, "new", "New story");
        new_item.collected_at = now;

        let status = SourceStatusUpdate {
            source_id: source.id.clone(),
            last_check: now,
            last_success: Some(now),
            consecutive_errors: 0,
        };
        store
            .persist_cycle(&status, &[old_item, new_item], &[])
            .await
            .unwrap();

        let recent = store
            .items_collected_between(now - Duration::days(1), now + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].guid, "new");
    }

    #[tokio::test]
    async fn alert_delivery_roundtrip() {
        let store = Store::in_memory().await.unwrap();
        let source = test_source("Feed", "https://example.org/rss");
        store.upsert_source(&source).await.unwrap();
        let item = test_item(&source.id, "g1", "Story");
        let mut alert = Alert::new(item.id.clone(), "filter-1", Severity::Warning);
        let status = SourceStatusUpdate {
            source_id: source.id.clone(),
            last_check: Utc::now(),
            last_success: Some(Utc::now()),
            consecutive_errors: 0,
        };
        store
            .persist_cycle(&status, &[item], std::slice::from_ref(&alert))
            .await
            .unwrap();

        alert.delivered_channels.push(ChannelDelivery {
            channel: "telegram".to_string(),
            delivered: true,
            at: Utc::now(),
        });
        alert.state = AlertState::Delivered;
        store.update_alert(&alert).await.unwrap();

        let counts = store
            .alert_counts_by_severity(Utc::now() - Duration::hours(1), Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(counts, vec![(Severity::Warning, 1)]);
    }
}
