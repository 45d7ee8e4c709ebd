// SQLite-backed moderation store.
//
// Tables:
// - automod_config: Per-guild moderation settings (whitelists as JSON)
// - automod_user_votes: When each user last cast a feedback vote
// - automod_violations: Capped per-user violation history
// - automod_warnings: Warning counts per member
// - automod_stats / automod_stat_categories / automod_stat_users: counters,
//   scope 0 is the global scope
//
// Counter updates are `x = x + excluded.x` upserts inside one transaction,
// so concurrent merges never overwrite each other.

use crate::core::moderation::{
    GuildConfigStore, GuildModerationConfig, StatCounters, StatScope, StatsStore, StoreError,
    ViolationRecord, ViolationStore, VoteTally, Whitelists,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

fn storage_err(e: sqlx::Error) -> StoreError {
    StoreError::StorageError(e.to_string())
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[derive(Clone)]
pub struct SqliteModerationStore {
    pool: SqlitePool,
}

impl SqliteModerationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file and run migrations.
    pub async fn connect(database_path: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite://{}?mode=rwc", database_path))
            .await
            .map_err(storage_err)?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS automod_config (
                guild_id INTEGER PRIMARY KEY,
                threshold REAL NOT NULL,
                timeout_minutes INTEGER NOT NULL DEFAULT 0,
                log_channel_id INTEGER,
                debug_mode BOOLEAN NOT NULL DEFAULT 0,
                delete_violatory_messages BOOLEAN NOT NULL DEFAULT 1,
                bypass_nsfw BOOLEAN NOT NULL DEFAULT 0,
                moderation_enabled BOOLEAN NOT NULL DEFAULT 1,
                monitoring_warning_enabled BOOLEAN NOT NULL DEFAULT 0,
                whitelist TEXT NOT NULL DEFAULT '{}',
                last_vote_time TEXT,
                votes_too_weak INTEGER NOT NULL DEFAULT 0,
                votes_too_tough INTEGER NOT NULL DEFAULT 0,
                votes_just_right INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS automod_user_votes (
                user_id INTEGER PRIMARY KEY,
                last_vote INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS automod_violations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                content TEXT NOT NULL,
                categories TEXT NOT NULL,
                channel_id INTEGER NOT NULL,
                channel_name TEXT NOT NULL,
                author_name TEXT NOT NULL,
                attachments TEXT NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_automod_violations_member
                ON automod_violations(guild_id, user_id, id)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_automod_violations_message
                ON automod_violations(guild_id, message_id)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS automod_warnings (
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                warning_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (guild_id, user_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS automod_stats (
                scope_id INTEGER PRIMARY KEY,
                message_count INTEGER NOT NULL DEFAULT 0,
                moderated_count INTEGER NOT NULL DEFAULT 0,
                image_count INTEGER NOT NULL DEFAULT 0,
                moderated_image_count INTEGER NOT NULL DEFAULT 0,
                timeout_count INTEGER NOT NULL DEFAULT 0,
                total_timeout_minutes INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS automod_stat_categories (
                scope_id INTEGER NOT NULL,
                category TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (scope_id, category)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS automod_stat_users (
                scope_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (scope_id, user_id)
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl GuildConfigStore for SqliteModerationStore {
    async fn load_config(&self, guild_id: u64) -> Result<Option<GuildModerationConfig>, StoreError> {
        let row = sqlx::query("SELECT * FROM automod_config WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let whitelist: Whitelists = serde_json::from_str(&row.get::<String, _>("whitelist"))?;
        let last_vote_time = row
            .get::<Option<String>, _>("last_vote_time")
            .as_deref()
            .and_then(parse_time);

        Ok(Some(GuildModerationConfig {
            guild_id,
            threshold: row.get("threshold"),
            timeout_minutes: row.get::<i64, _>("timeout_minutes") as u32,
            log_channel_id: row.get::<Option<i64>, _>("log_channel_id").map(|id| id as u64),
            debug_mode: row.get("debug_mode"),
            delete_violatory_messages: row.get("delete_violatory_messages"),
            bypass_nsfw: row.get("bypass_nsfw"),
            moderation_enabled: row.get("moderation_enabled"),
            whitelist,
            monitoring_warning_enabled: row.get("monitoring_warning_enabled"),
            last_vote_time,
            votes: VoteTally {
                too_weak: row.get::<i64, _>("votes_too_weak") as u64,
                too_tough: row.get::<i64, _>("votes_too_tough") as u64,
                just_right: row.get::<i64, _>("votes_just_right") as u64,
            },
        }))
    }

    async fn save_config(&self, config: &GuildModerationConfig) -> Result<(), StoreError> {
        let whitelist = serde_json::to_string(&config.whitelist)?;
        sqlx::query(
            r#"
            INSERT INTO automod_config (
                guild_id, threshold, timeout_minutes, log_channel_id, debug_mode,
                delete_violatory_messages, bypass_nsfw, moderation_enabled,
                monitoring_warning_enabled, whitelist, last_vote_time,
                votes_too_weak, votes_too_tough, votes_just_right
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET
                threshold = excluded.threshold,
                timeout_minutes = excluded.timeout_minutes,
                log_channel_id = excluded.log_channel_id,
                debug_mode = excluded.debug_mode,
                delete_violatory_messages = excluded.delete_violatory_messages,
                bypass_nsfw = excluded.bypass_nsfw,
                moderation_enabled = excluded.moderation_enabled,
                monitoring_warning_enabled = excluded.monitoring_warning_enabled,
                whitelist = excluded.whitelist,
                last_vote_time = excluded.last_vote_time,
                votes_too_weak = excluded.votes_too_weak,
                votes_too_tough = excluded.votes_too_tough,
                votes_just_right = excluded.votes_just_right
            "#,
        )
        .bind(config.guild_id as i64)
        .bind(config.threshold)
        .bind(i64::from(config.timeout_minutes))
        .bind(config.log_channel_id.map(|id| id as i64))
        .bind(config.debug_mode)
        .bind(config.delete_violatory_messages)
        .bind(config.bypass_nsfw)
        .bind(config.moderation_enabled)
        .bind(config.monitoring_warning_enabled)
        .bind(whitelist)
        .bind(config.last_vote_time.map(|t| t.to_rfc3339()))
        .bind(config.votes.too_weak as i64)
        .bind(config.votes.too_tough as i64)
        .bind(config.votes.just_right as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn all_guild_ids(&self) -> Result<Vec<u64>, StoreError> {
        let rows = sqlx::query("SELECT guild_id FROM automod_config")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(rows
            .iter()
            .map(|row| row.get::<i64, _>("guild_id") as u64)
            .collect())
    }

    async fn user_last_vote(&self, user_id: u64) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query("SELECT last_vote FROM automod_user_votes WHERE user_id = ?")
            .bind(user_id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.and_then(|r| DateTime::from_timestamp(r.get::<i64, _>("last_vote"), 0)))
    }

    async fn claim_user_vote(
        &self,
        user_id: u64,
        at: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // The conditional upsert touches no row while the cooldown runs.
        let result = sqlx::query(
            r#"
            INSERT INTO automod_user_votes (user_id, last_vote)
            VALUES (?, ?)
            ON CONFLICT(user_id) DO UPDATE SET last_vote = excluded.last_vote
            WHERE automod_user_votes.last_vote <= ?
            "#,
        )
        .bind(user_id as i64)
        .bind(at.timestamp())
        .bind(cutoff.timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(result.rows_affected() == 1)
    }
}

fn violation_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ViolationRecord, StoreError> {
    Ok(ViolationRecord {
        message_id: row.get::<i64, _>("message_id") as u64,
        timestamp: row.get("timestamp"),
        content: row.get("content"),
        categories: serde_json::from_str(&row.get::<String, _>("categories"))?,
        channel_id: row.get::<i64, _>("channel_id") as u64,
        channel_name: row.get("channel_name"),
        author_id: row.get::<i64, _>("user_id") as u64,
        author_name: row.get("author_name"),
        attachments: serde_json::from_str(&row.get::<String, _>("attachments"))?,
    })
}

#[async_trait]
impl ViolationStore for SqliteModerationStore {
    async fn append_violation(
        &self,
        guild_id: u64,
        user_id: u64,
        record: ViolationRecord,
        cap: usize,
    ) -> Result<(), StoreError> {
        let categories = serde_json::to_string(&record.categories)?;
        let attachments = serde_json::to_string(&record.attachments)?;

        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        sqlx::query(
            r#"
            INSERT INTO automod_violations (
                guild_id, user_id, message_id, timestamp, content, categories,
                channel_id, channel_name, author_name, attachments
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(record.message_id as i64)
        .bind(record.timestamp)
        .bind(&record.content)
        .bind(categories)
        .bind(record.channel_id as i64)
        .bind(&record.channel_name)
        .bind(&record.author_name)
        .bind(attachments)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        // Evict everything but the newest `cap` rows for this member.
        sqlx::query(
            r#"
            DELETE FROM automod_violations
            WHERE guild_id = ? AND user_id = ? AND id NOT IN (
                SELECT id FROM automod_violations
                WHERE guild_id = ? AND user_id = ?
                ORDER BY id DESC
                LIMIT ?
            )
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(cap as i64)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn violations(&self, guild_id: u64, user_id: u64) -> Result<Vec<ViolationRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM automod_violations
            WHERE guild_id = ? AND user_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(violation_from_row).collect()
    }

    async fn find_violation(
        &self,
        guild_id: u64,
        message_id: u64,
    ) -> Result<Option<ViolationRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT * FROM automod_violations
            WHERE guild_id = ? AND message_id = ?
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(guild_id as i64)
        .bind(message_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(violation_from_row).transpose()
    }

    async fn increment_warnings(&self, guild_id: u64, user_id: u64) -> Result<u32, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO automod_warnings (guild_id, user_id, warning_count)
            VALUES (?, ?, 1)
            ON CONFLICT(guild_id, user_id) DO UPDATE SET
                warning_count = warning_count + 1
            RETURNING warning_count
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.get::<i64, _>("warning_count") as u32)
    }

    async fn warnings(&self, guild_id: u64, user_id: u64) -> Result<u32, StoreError> {
        let row = sqlx::query(
            "SELECT warning_count FROM automod_warnings WHERE guild_id = ? AND user_id = ?",
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row
            .map(|r| r.get::<i64, _>("warning_count") as u32)
            .unwrap_or(0))
    }

    async fn reset_violations(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for table in ["automod_violations", "automod_warnings"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl StatsStore for SqliteModerationStore {
    async fn merge_counters(&self, scope: StatScope, delta: &StatCounters) -> Result<(), StoreError> {
        let scope_id = scope.key() as i64;
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query(
            r#"
            INSERT INTO automod_stats (
                scope_id, message_count, moderated_count, image_count,
                moderated_image_count, timeout_count, total_timeout_minutes
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(scope_id) DO UPDATE SET
                message_count = message_count + excluded.message_count,
                moderated_count = moderated_count + excluded.moderated_count,
                image_count = image_count + excluded.image_count,
                moderated_image_count = moderated_image_count + excluded.moderated_image_count,
                timeout_count = timeout_count + excluded.timeout_count,
                total_timeout_minutes = total_timeout_minutes + excluded.total_timeout_minutes
            "#,
        )
        .bind(scope_id)
        .bind(delta.message_count as i64)
        .bind(delta.moderated_count as i64)
        .bind(delta.image_count as i64)
        .bind(delta.moderated_image_count as i64)
        .bind(delta.timeout_count as i64)
        .bind(delta.total_timeout_minutes as i64)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?;

        for (category, count) in &delta.categories {
            sqlx::query(
                r#"
                INSERT INTO automod_stat_categories (scope_id, category, count)
                VALUES (?, ?, ?)
                ON CONFLICT(scope_id, category) DO UPDATE SET count = count + excluded.count
                "#,
            )
            .bind(scope_id)
            .bind(category)
            .bind(*count as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        for (user_id, count) in &delta.moderated_users {
            sqlx::query(
                r#"
                INSERT INTO automod_stat_users (scope_id, user_id, count)
                VALUES (?, ?, ?)
                ON CONFLICT(scope_id, user_id) DO UPDATE SET count = count + excluded.count
                "#,
            )
            .bind(scope_id)
            .bind(*user_id as i64)
            .bind(*count as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }

    async fn counters(&self, scope: StatScope) -> Result<StatCounters, StoreError> {
        let scope_id = scope.key() as i64;
        let mut counters = StatCounters::default();

        let row = sqlx::query("SELECT * FROM automod_stats WHERE scope_id = ?")
            .bind(scope_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        if let Some(row) = row {
            counters.message_count = row.get::<i64, _>("message_count") as u64;
            counters.moderated_count = row.get::<i64, _>("moderated_count") as u64;
            counters.image_count = row.get::<i64, _>("image_count") as u64;
            counters.moderated_image_count = row.get::<i64, _>("moderated_image_count") as u64;
            counters.timeout_count = row.get::<i64, _>("timeout_count") as u64;
            counters.total_timeout_minutes = row.get::<i64, _>("total_timeout_minutes") as u64;
        }

        let rows = sqlx::query("SELECT category, count FROM automod_stat_categories WHERE scope_id = ?")
            .bind(scope_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        for row in rows {
            counters
                .categories
                .insert(row.get("category"), row.get::<i64, _>("count") as u64);
        }

        let rows = sqlx::query("SELECT user_id, count FROM automod_stat_users WHERE scope_id = ?")
            .bind(scope_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        for row in rows {
            counters.moderated_users.insert(
                row.get::<i64, _>("user_id") as u64,
                row.get::<i64, _>("count") as u64,
            );
        }

        Ok(counters)
    }

    async fn reset_counters(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for table in ["automod_stats", "automod_stat_categories", "automod_stat_users"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
        }
        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::{ScoreMap, WhitelistKind};
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteModerationStore) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("automod.db");
        let store = SqliteModerationStore::connect(path.to_str().unwrap())
            .await
            .unwrap();
        (dir, store)
    }

    fn record(message_id: u64) -> ViolationRecord {
        let mut categories = ScoreMap::new();
        categories.insert("hate".into(), 0.9);
        ViolationRecord {
            message_id,
            timestamp: 1_700_000_000 + message_id as i64,
            content: format!("message {message_id}"),
            categories,
            channel_id: 500,
            channel_name: "general".into(),
            author_id: 7,
            author_name: "offender".into(),
            attachments: vec!["https://cdn/a.png".into()],
        }
    }

    #[tokio::test]
    async fn config_round_trips_through_sqlite() {
        let (_dir, store) = store().await;
        assert_eq!(store.load_config(1).await.unwrap(), None);

        let mut config = GuildModerationConfig::new(1);
        config.threshold = 0.6;
        config.timeout_minutes = 15;
        config.log_channel_id = Some(600);
        config.whitelist.toggle(WhitelistKind::Role, 70);
        config.last_vote_time = parse_time("2024-05-01T12:00:00+00:00");
        config.votes.too_weak = 3;
        store.save_config(&config).await.unwrap();

        assert_eq!(store.load_config(1).await.unwrap(), Some(config));
        assert_eq!(store.all_guild_ids().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn violations_are_capped_oldest_first() {
        let (_dir, store) = store().await;
        for id in 1..=55 {
            store.append_violation(1, 7, record(id), 50).await.unwrap();
        }

        let records = store.violations(1, 7).await.unwrap();
        assert_eq!(records.len(), 50);
        assert_eq!(records.first().unwrap().message_id, 6);
        assert_eq!(records.last().unwrap(), &record(55));

        assert_eq!(store.find_violation(1, 3).await.unwrap(), None);
        assert_eq!(store.find_violation(1, 30).await.unwrap(), Some(record(30)));
    }

    #[tokio::test]
    async fn warnings_increment_atomically() {
        let (_dir, store) = store().await;
        assert_eq!(store.warnings(1, 7).await.unwrap(), 0);
        assert_eq!(store.increment_warnings(1, 7).await.unwrap(), 1);
        assert_eq!(store.increment_warnings(1, 7).await.unwrap(), 2);

        store.reset_violations().await.unwrap();
        assert_eq!(store.warnings(1, 7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn counter_merges_add_up() {
        let (_dir, store) = store().await;
        let mut delta = StatCounters {
            message_count: 2,
            timeout_count: 1,
            total_timeout_minutes: 10,
            ..Default::default()
        };
        delta.categories.insert("hate".into(), 1);
        delta.moderated_users.insert(7, 1);

        store.merge_counters(StatScope::Guild(1), &delta).await.unwrap();
        store.merge_counters(StatScope::Guild(1), &delta).await.unwrap();

        let counters = store.counters(StatScope::Guild(1)).await.unwrap();
        assert_eq!(counters.message_count, 4);
        assert_eq!(counters.total_timeout_minutes, 20);
        assert_eq!(counters.categories.get("hate"), Some(&2));
        assert_eq!(counters.moderated_users.get(&7), Some(&2));
        assert!(store.counters(StatScope::Global).await.unwrap().is_empty());

        store.reset_counters().await.unwrap();
        assert!(store.counters(StatScope::Guild(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn user_votes_persist() {
        let (_dir, store) = store().await;
        let at = parse_time("2024-05-01T12:00:00+00:00").unwrap();
        let cutoff = at - chrono::Duration::hours(24);
        assert!(store.claim_user_vote(9, at, cutoff).await.unwrap());
        assert_eq!(store.user_last_vote(9).await.unwrap(), Some(at));
        assert_eq!(store.user_last_vote(10).await.unwrap(), None);

        let soon = at + chrono::Duration::hours(1);
        assert!(!store
            .claim_user_vote(9, soon, soon - chrono::Duration::hours(24))
            .await
            .unwrap());
        assert_eq!(store.user_last_vote(9).await.unwrap(), Some(at));

        let next_day = at + chrono::Duration::hours(24);
        assert!(store
            .claim_user_vote(9, next_day, next_day - chrono::Duration::hours(24))
            .await
            .unwrap());
        assert_eq!(store.user_last_vote(9).await.unwrap(), Some(next_day));
    }
}
