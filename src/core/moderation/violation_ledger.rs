// Violation ledger - per-user history of flagged messages plus warning counts.
//
// Records are appended in chronological order and capped per user; the
// oldest entry is evicted first once the cap is exceeded.

use super::moderation_models::{ModeratedMessage, ScoreMap, StoreError, ViolationRecord};
use super::threshold::noteworthy;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};

/// How many records are kept per (guild, user).
pub const MAX_RECORDS_PER_USER: usize = 50;

/// Stored content is cut to this many characters.
pub const SNIPPET_CHARS: usize = 1000;

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

#[async_trait]
pub trait ViolationStore: Send + Sync {
    /// Append a record and drop the oldest ones beyond `cap`, in one step.
    async fn append_violation(
        &self,
        guild_id: u64,
        user_id: u64,
        record: ViolationRecord,
        cap: usize,
    ) -> Result<(), StoreError>;

    /// All records for a user, oldest first.
    async fn violations(&self, guild_id: u64, user_id: u64) -> Result<Vec<ViolationRecord>, StoreError>;

    /// Look up the record created for a specific message.
    async fn find_violation(
        &self,
        guild_id: u64,
        message_id: u64,
    ) -> Result<Option<ViolationRecord>, StoreError>;

    /// Increment and return the user's warning count.
    async fn increment_warnings(&self, guild_id: u64, user_id: u64) -> Result<u32, StoreError>;

    async fn warnings(&self, guild_id: u64, user_id: u64) -> Result<u32, StoreError>;

    /// Drop every record and warning count in every guild.
    async fn reset_violations(&self) -> Result<(), StoreError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// What `/automod history` shows for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationHistory {
    /// Most recent first.
    pub records: Vec<ViolationRecord>,
    pub warnings: u32,
}

pub struct ViolationLedger<S: ViolationStore> {
    store: S,
}

impl<S: ViolationStore> ViolationLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Record a violation for `message`. Only categories above the noise floor
    /// are stored; returns `false` (and writes nothing) if none are.
    pub async fn record(
        &self,
        message: &ModeratedMessage,
        scores: &ScoreMap,
        attachments: &[String],
    ) -> Result<bool, StoreError> {
        let categories = noteworthy(scores);
        if categories.is_empty() {
            tracing::debug!(
                message_id = message.message_id,
                "No category above the noise floor, skipping violation record"
            );
            return Ok(false);
        }

        let record = ViolationRecord {
            message_id: message.message_id,
            timestamp: message.sent_at.timestamp(),
            content: message.content.chars().take(SNIPPET_CHARS).collect(),
            categories,
            channel_id: message.channel_id,
            channel_name: message.channel_name.clone(),
            author_id: message.author.id,
            author_name: message.author.name.clone(),
            attachments: attachments.to_vec(),
        };

        self.store
            .append_violation(message.guild_id, message.author.id, record, MAX_RECORDS_PER_USER)
            .await?;
        Ok(true)
    }

    pub async fn history(&self, guild_id: u64, user_id: u64) -> Result<ViolationHistory, StoreError> {
        let mut records = self.store.violations(guild_id, user_id).await?;
        records.reverse();
        let warnings = self.store.warnings(guild_id, user_id).await?;
        Ok(ViolationHistory { records, warnings })
    }

    pub async fn find(&self, guild_id: u64, message_id: u64) -> Result<Option<ViolationRecord>, StoreError> {
        self.store.find_violation(guild_id, message_id).await
    }

    /// Increment the warning counter. Only the staff Warn action calls this.
    pub async fn warn(&self, guild_id: u64, user_id: u64) -> Result<u32, StoreError> {
        self.store.increment_warnings(guild_id, user_id).await
    }

    pub async fn warnings(&self, guild_id: u64, user_id: u64) -> Result<u32, StoreError> {
        self.store.warnings(guild_id, user_id).await
    }

    pub async fn reset_all(&self) -> Result<(), StoreError> {
        self.store.reset_violations().await
    }
}

/// Violations per day for the last `days` days ending at `now`, oldest day
/// first. Days without violations are present with a count of 0.
pub fn daily_trend(records: &[ViolationRecord], now: DateTime<Utc>, days: u32) -> Vec<(NaiveDate, u32)> {
    if days == 0 {
        return Vec::new();
    }
    let today = now.date_naive();
    let first = today - Duration::days(i64::from(days) - 1);

    let mut trend: Vec<(NaiveDate, u32)> = (0..days)
        .map(|offset| (first + Duration::days(i64::from(offset)), 0))
        .collect();

    for record in records {
        let Some(when) = DateTime::from_timestamp(record.timestamp, 0) else {
            continue;
        };
        let day = when.date_naive();
        if day < first || day > today {
            continue;
        }
        let index = (day - first).num_days() as usize;
        trend[index].1 += 1;
    }
    trend
}
