// Statistics aggregation for the moderation pipeline.
//
// Two sinks implement `StatisticsSink`:
// - `DirectStatisticsSink` writes every event straight to the store.
// - `BufferedStatisticsSink` accumulates deltas in memory and merges them into
//   the store on `flush()` (every 5 minutes from main).
//
// Stores only ever receive deltas and must apply them as atomic merges.

use super::moderation_models::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// How often the buffered sink is flushed.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Phrase the owner must type to wipe all statistics.
pub const RESET_CONFIRMATION_PHRASE: &str = "RESET ALL STATISTICS";
/// How long the owner has to type it.
pub const RESET_CONFIRMATION_WINDOW: Duration = Duration::from_secs(30);

/// Whose counters an update applies to. Global is accumulated per event,
/// never derived from the guild counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatScope {
    Global,
    Guild(u64),
}

impl StatScope {
    /// Storage key: 0 is reserved for the global scope (no guild has id 0).
    pub fn key(self) -> u64 {
        match self {
            StatScope::Global => 0,
            StatScope::Guild(id) => id,
        }
    }
}

/// Counter set for one scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatCounters {
    pub message_count: u64,
    pub moderated_count: u64,
    pub image_count: u64,
    pub moderated_image_count: u64,
    pub timeout_count: u64,
    pub total_timeout_minutes: u64,
    /// Category -> number of times it crossed the threshold.
    pub categories: BTreeMap<String, u64>,
    /// User id -> number of their messages removed by the pipeline.
    pub moderated_users: BTreeMap<u64, u64>,
}

impl StatCounters {
    pub fn merge(&mut self, other: &StatCounters) {
        self.message_count += other.message_count;
        self.moderated_count += other.moderated_count;
        self.image_count += other.image_count;
        self.moderated_image_count += other.moderated_image_count;
        self.timeout_count += other.timeout_count;
        self.total_timeout_minutes += other.total_timeout_minutes;
        for (category, count) in &other.categories {
            *self.categories.entry(category.clone()).or_insert(0) += count;
        }
        for (user, count) in &other.moderated_users {
            *self.moderated_users.entry(*user).or_insert(0) += count;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == StatCounters::default()
    }

    /// Most frequent categories, highest first.
    pub fn top_categories(&self, limit: usize) -> Vec<(String, u64)> {
        let mut sorted: Vec<_> = self
            .categories
            .iter()
            .map(|(c, n)| (c.clone(), *n))
            .collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted.truncate(limit);
        sorted
    }

    /// Users with the most removed messages, highest first.
    pub fn top_users(&self, limit: usize) -> Vec<(u64, u64)> {
        let mut sorted: Vec<_> = self.moderated_users.iter().map(|(u, n)| (*u, *n)).collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted.truncate(limit);
        sorted
    }
}

/// Something the pipeline observed.
#[derive(Debug, Clone, PartialEq)]
pub enum StatEvent {
    MessageSeen { images: u64 },
    TextModerated,
    ImagesModerated(u64),
    CategoriesFlagged(Vec<String>),
    MessageRemoved { user_id: u64 },
    TimeoutIssued { minutes: u64 },
}

impl StatEvent {
    pub fn to_delta(&self) -> StatCounters {
        let mut delta = StatCounters::default();
        match self {
            StatEvent::MessageSeen { images } => {
                delta.message_count = 1;
                delta.image_count = *images;
            }
            StatEvent::TextModerated => delta.moderated_count = 1,
            StatEvent::ImagesModerated(n) => delta.moderated_image_count = *n,
            StatEvent::CategoriesFlagged(categories) => {
                for category in categories {
                    *delta.categories.entry(category.clone()).or_insert(0) += 1;
                }
            }
            StatEvent::MessageRemoved { user_id } => {
                delta.moderated_users.insert(*user_id, 1);
            }
            StatEvent::TimeoutIssued { minutes } => {
                delta.timeout_count = 1;
                delta.total_timeout_minutes = *minutes;
            }
        }
        delta
    }
}

/// Persistence port for counters.
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Add `delta` to the stored counters for `scope` in one atomic step.
    async fn merge_counters(&self, scope: StatScope, delta: &StatCounters) -> Result<(), StoreError>;

    async fn counters(&self, scope: StatScope) -> Result<StatCounters, StoreError>;

    /// Wipe every scope.
    async fn reset_counters(&self) -> Result<(), StoreError>;
}

/// Where the pipeline reports what it observed.
#[async_trait]
pub trait StatisticsSink: Send + Sync {
    /// Record an event for the guild and the global scope. Never fails the
    /// caller; storage problems are logged.
    async fn record(&self, guild_id: u64, event: StatEvent);

    /// Persist anything still buffered.
    async fn flush(&self) -> Result<(), StoreError>;

    /// Current counters, including anything not yet flushed.
    async fn snapshot(&self, scope: StatScope) -> Result<StatCounters, StoreError>;

    async fn reset_all(&self) -> Result<(), StoreError>;
}

/// Whether the reply typed during a reset confirmation is the exact phrase.
pub fn reset_confirmed(reply: Option<&str>) -> bool {
    reply.is_some_and(|r| r.trim() == RESET_CONFIRMATION_PHRASE)
}

// ============================================================================
// DIRECT SINK
// ============================================================================

pub struct DirectStatisticsSink<S: StatsStore> {
    store: S,
}

impl<S: StatsStore> DirectStatisticsSink<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: StatsStore> StatisticsSink for DirectStatisticsSink<S> {
    async fn record(&self, guild_id: u64, event: StatEvent) {
        let delta = event.to_delta();
        for scope in [StatScope::Guild(guild_id), StatScope::Global] {
            if let Err(e) = self.store.merge_counters(scope, &delta).await {
                tracing::warn!(guild_id, ?scope, "Failed to record statistics: {e}");
            }
        }
    }

    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn snapshot(&self, scope: StatScope) -> Result<StatCounters, StoreError> {
        self.store.counters(scope).await
    }

    async fn reset_all(&self) -> Result<(), StoreError> {
        self.store.reset_counters().await
    }
}

// ============================================================================
// BUFFERED SINK
// ============================================================================

pub struct BufferedStatisticsSink<S: StatsStore> {
    store: S,
    pending: Mutex<HashMap<StatScope, StatCounters>>,
}

impl<S: StatsStore> BufferedStatisticsSink<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            pending: Mutex::new(HashMap::new()),
        }
    }

    // Never held across an await.
    fn pending(&self) -> MutexGuard<'_, HashMap<StatScope, StatCounters>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn buffer(&self, scope: StatScope, delta: &StatCounters) {
        self.pending().entry(scope).or_default().merge(delta);
    }
}

#[async_trait]
impl<S: StatsStore> StatisticsSink for BufferedStatisticsSink<S> {
    async fn record(&self, guild_id: u64, event: StatEvent) {
        let delta = event.to_delta();
        let mut pending = self.pending();
        pending.entry(StatScope::Guild(guild_id)).or_default().merge(&delta);
        pending.entry(StatScope::Global).or_default().merge(&delta);
    }

    /// Swap the buffer out in one step, then merge it into the store.
    /// Increments that race with the flush land in the fresh buffer and go out
    /// with the next flush; deltas whose merge fails are folded back in.
    async fn flush(&self) -> Result<(), StoreError> {
        let drained = std::mem::take(&mut *self.pending());
        if drained.is_empty() {
            return Ok(());
        }

        let mut first_error = None;
        for (scope, delta) in drained {
            if delta.is_empty() {
                continue;
            }
            if let Err(e) = self.store.merge_counters(scope, &delta).await {
                tracing::warn!(?scope, "Statistics flush failed, keeping delta buffered: {e}");
                self.buffer(scope, &delta);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::debug!("Statistics flushed");
                Ok(())
            }
        }
    }

    async fn snapshot(&self, scope: StatScope) -> Result<StatCounters, StoreError> {
        let mut counters = self.store.counters(scope).await?;
        if let Some(pending) = self.pending().get(&scope) {
            counters.merge(pending);
        }
        Ok(counters)
    }

    async fn reset_all(&self) -> Result<(), StoreError> {
        self.pending().clear();
        self.store.reset_counters().await
    }
}
