// Guild moderation settings and the feedback-driven threshold auto-tuner.
//
// All mutations go through a single write lock, so a read-modify-write of
// a guild's config can't interleave with another one at an await point.

use super::moderation_models::{
    ConfigError, ConfigFlag, GuildModerationConfig, StoreError, VoteType, WhitelistKind,
};
use super::threshold::validate_threshold;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

/// Size of the threshold nudge applied by one feedback vote.
pub const VOTE_STEP: f64 = 0.01;

/// Minimum time between two threshold shifts in one guild, and between two
/// votes from the same user.
pub fn vote_window() -> Duration {
    Duration::hours(24)
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

#[async_trait]
pub trait GuildConfigStore: Send + Sync {
    /// Stored config, or `None` for a guild that was never configured.
    async fn load_config(&self, guild_id: u64) -> Result<Option<GuildModerationConfig>, StoreError>;

    async fn save_config(&self, config: &GuildModerationConfig) -> Result<(), StoreError>;

    async fn all_guild_ids(&self) -> Result<Vec<u64>, StoreError>;

    async fn user_last_vote(&self, user_id: u64) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Record a vote at `at` unless the user's last vote is later than
    /// `cutoff`. Check and write happen as one step; returns whether the
    /// vote was recorded.
    async fn claim_user_vote(
        &self,
        user_id: u64,
        at: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Invalid(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of one feedback vote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoteResult {
    /// Whether this vote moved the threshold.
    pub shifted: bool,
    /// Threshold after the vote.
    pub threshold: f64,
}

// ============================================================================
// CORE SERVICE
// ============================================================================

pub struct ModerationConfigService<S: GuildConfigStore> {
    store: S,
    write_lock: Mutex<()>,
}

impl<S: GuildConfigStore> ModerationConfigService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn get_config(&self, guild_id: u64) -> Result<GuildModerationConfig, StoreError> {
        Ok(self
            .store
            .load_config(guild_id)
            .await?
            .unwrap_or_else(|| GuildModerationConfig::new(guild_id)))
    }

    /// Load, mutate and save a guild config while holding the write lock.
    async fn update<T>(
        &self,
        guild_id: u64,
        mutate: impl FnOnce(&mut GuildModerationConfig) -> T + Send,
    ) -> Result<(GuildModerationConfig, T), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut config = self.get_config(guild_id).await?;
        let value = mutate(&mut config);
        self.store.save_config(&config).await?;
        Ok((config, value))
    }

    pub async fn set_threshold(&self, guild_id: u64, threshold: f64) -> Result<f64, SettingsError> {
        let threshold = validate_threshold(threshold)?;
        self.update(guild_id, |c| c.threshold = threshold).await?;
        tracing::info!(guild_id, threshold, "Moderation threshold updated");
        Ok(threshold)
    }

    pub async fn set_timeout_minutes(&self, guild_id: u64, minutes: u32) -> Result<(), StoreError> {
        self.update(guild_id, |c| c.timeout_minutes = minutes).await?;
        Ok(())
    }

    pub async fn set_log_channel(&self, guild_id: u64, channel_id: Option<u64>) -> Result<(), StoreError> {
        self.update(guild_id, |c| c.log_channel_id = channel_id).await?;
        Ok(())
    }

    /// Flip a boolean setting and return its new value.
    pub async fn toggle_flag(&self, guild_id: u64, flag: ConfigFlag) -> Result<bool, StoreError> {
        let (_, enabled) = self
            .update(guild_id, |c| {
                let next = !flag.get(c);
                flag.set(c, next);
                next
            })
            .await?;
        tracing::info!(guild_id, %flag, enabled, "Moderation setting toggled");
        Ok(enabled)
    }

    /// Add the id to the whitelist if absent, remove it if present.
    /// Returns `true` if it is now whitelisted.
    pub async fn toggle_whitelist(
        &self,
        guild_id: u64,
        kind: WhitelistKind,
        id: u64,
    ) -> Result<bool, StoreError> {
        let (_, added) = self.update(guild_id, |c| c.whitelist.toggle(kind, id)).await?;
        Ok(added)
    }

    /// Register a feedback vote. The tally always counts it; the threshold
    /// only moves if the guild hasn't shifted within the last 24 hours.
    pub async fn cast_vote(
        &self,
        guild_id: u64,
        vote: VoteType,
        now: DateTime<Utc>,
    ) -> Result<VoteResult, StoreError> {
        let (config, shifted) = self
            .update(guild_id, |c| {
                match vote {
                    VoteType::TooWeak => c.votes.too_weak += 1,
                    VoteType::TooStrict => c.votes.too_tough += 1,
                    VoteType::JustRight => c.votes.just_right += 1,
                }

                let window_open = c.last_vote_time.map_or(true, |last| now - last > vote_window());
                let delta = match vote {
                    VoteType::TooWeak => -VOTE_STEP,
                    VoteType::TooStrict => VOTE_STEP,
                    VoteType::JustRight => return false,
                };
                if !window_open {
                    return false;
                }

                c.threshold = round_threshold((c.threshold + delta).clamp(0.0, 1.0));
                c.last_vote_time = Some(now);
                true
            })
            .await?;

        if shifted {
            tracing::info!(guild_id, threshold = config.threshold, ?vote, "Threshold auto-tuned");
        }
        Ok(VoteResult {
            shifted,
            threshold: config.threshold,
        })
    }

    /// Take the user's vote slot for `now`. `None` if the vote may go ahead,
    /// otherwise when the user may vote again.
    pub async fn claim_vote(
        &self,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        if self
            .store
            .claim_user_vote(user_id, now, now - vote_window())
            .await?
        {
            return Ok(None);
        }
        let last = self.store.user_last_vote(user_id).await?.unwrap_or(now);
        Ok(Some(last + vote_window()))
    }

    /// Clear the vote tally and tuning timestamp in every guild.
    pub async fn reset_feedback(&self) -> Result<(), StoreError> {
        for guild_id in self.store.all_guild_ids().await? {
            self.update(guild_id, |c| {
                c.votes = Default::default();
                c.last_vote_time = None;
            })
            .await?;
        }
        Ok(())
    }
}

fn round_threshold(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
