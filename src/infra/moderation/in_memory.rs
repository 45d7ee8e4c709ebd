// In-memory implementation of the moderation stores.
//
// Backs the unit tests of the core services.
// Every DashMap operation below completes before the next await point, so
// each trait call is applied atomically.

use crate::core::moderation::{
    GuildConfigStore, GuildModerationConfig, StatCounters, StatScope, StatsStore, StoreError,
    ViolationRecord, ViolationStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// (guild_id, user_id)
type MemberKey = (u64, u64);

/// Cloning shares the underlying maps.
#[derive(Clone, Default)]
pub struct InMemoryModerationStore {
    configs: Arc<DashMap<u64, GuildModerationConfig>>,
    user_votes: Arc<DashMap<u64, DateTime<Utc>>>,
    violations: Arc<DashMap<MemberKey, VecDeque<ViolationRecord>>>,
    warnings: Arc<DashMap<MemberKey, u32>>,
    counters: Arc<DashMap<StatScope, StatCounters>>,
}

impl InMemoryModerationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GuildConfigStore for InMemoryModerationStore {
    async fn load_config(&self, guild_id: u64) -> Result<Option<GuildModerationConfig>, StoreError> {
        Ok(self.configs.get(&guild_id).map(|c| c.clone()))
    }

    async fn save_config(&self, config: &GuildModerationConfig) -> Result<(), StoreError> {
        self.configs.insert(config.guild_id, config.clone());
        Ok(())
    }

    async fn all_guild_ids(&self) -> Result<Vec<u64>, StoreError> {
        Ok(self.configs.iter().map(|entry| *entry.key()).collect())
    }

    async fn user_last_vote(&self, user_id: u64) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.user_votes.get(&user_id).map(|v| *v))
    }

    async fn claim_user_vote(
        &self,
        user_id: u64,
        at: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.user_votes.entry(user_id) {
            Entry::Occupied(mut last) => {
                if *last.get() > cutoff {
                    return Ok(false);
                }
                last.insert(at);
            }
            Entry::Vacant(slot) => {
                slot.insert(at);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl ViolationStore for InMemoryModerationStore {
    async fn append_violation(
        &self,
        guild_id: u64,
        user_id: u64,
        record: ViolationRecord,
        cap: usize,
    ) -> Result<(), StoreError> {
        let mut records = self.violations.entry((guild_id, user_id)).or_default();
        records.push_back(record);
        while records.len() > cap {
            records.pop_front();
        }
        Ok(())
    }

    async fn violations(&self, guild_id: u64, user_id: u64) -> Result<Vec<ViolationRecord>, StoreError> {
        Ok(self
            .violations
            .get(&(guild_id, user_id))
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn find_violation(
        &self,
        guild_id: u64,
        message_id: u64,
    ) -> Result<Option<ViolationRecord>, StoreError> {
        Ok(self
            .violations
            .iter()
            .filter(|entry| entry.key().0 == guild_id)
            .find_map(|entry| {
                entry
                    .value()
                    .iter()
                    .find(|r| r.message_id == message_id)
                    .cloned()
            }))
    }

    async fn increment_warnings(&self, guild_id: u64, user_id: u64) -> Result<u32, StoreError> {
        let mut count = self.warnings.entry((guild_id, user_id)).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn warnings(&self, guild_id: u64, user_id: u64) -> Result<u32, StoreError> {
        Ok(self.warnings.get(&(guild_id, user_id)).map(|c| *c).unwrap_or(0))
    }

    async fn reset_violations(&self) -> Result<(), StoreError> {
        self.violations.clear();
        self.warnings.clear();
        Ok(())
    }
}

#[async_trait]
impl StatsStore for InMemoryModerationStore {
    async fn merge_counters(&self, scope: StatScope, delta: &StatCounters) -> Result<(), StoreError> {
        self.counters.entry(scope).or_default().merge(delta);
        Ok(())
    }

    async fn counters(&self, scope: StatScope) -> Result<StatCounters, StoreError> {
        Ok(self
            .counters
            .get(&scope)
            .map(|c| c.clone())
            .unwrap_or_default())
    }

    async fn reset_counters(&self) -> Result<(), StoreError> {
        self.counters.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_state() {
        let store = InMemoryModerationStore::new();
        let other = store.clone();

        store.increment_warnings(1, 2).await.unwrap();
        assert_eq!(other.warnings(1, 2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn all_guild_ids_lists_saved_configs() {
        let store = InMemoryModerationStore::new();
        store.save_config(&GuildModerationConfig::new(5)).await.unwrap();
        store.save_config(&GuildModerationConfig::new(6)).await.unwrap();

        let mut ids = store.all_guild_ids().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec![5, 6]);
    }
}
