// Moderation domain models - data structures shared by the AI moderation pipeline.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts platform messages into `ModeratedMessage` and
// renders the results back into embeds and buttons.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Category name -> score in [0, 1], as returned by the classifier.
///
/// A `BTreeMap` keeps categories sorted so embeds, audit reasons and
/// webhook payloads are stable between runs.
pub type ScoreMap = BTreeMap<String, f64>;

/// Threshold a fresh guild starts with.
pub const DEFAULT_THRESHOLD: f64 = 0.75;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Threshold must be between 0.0 and 1.0, got {0}")]
    ThresholdOutOfRange(f64),
}

// ============================================================================
// GUILD CONFIGURATION
// ============================================================================

/// Which whitelist a toggle applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhitelistKind {
    Channel,
    Role,
    User,
    Category,
}

impl std::fmt::Display for WhitelistKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WhitelistKind::Channel => write!(f, "channel"),
            WhitelistKind::Role => write!(f, "role"),
            WhitelistKind::User => write!(f, "user"),
            WhitelistKind::Category => write!(f, "category"),
        }
    }
}

/// Ids that are never sent to the classifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Whitelists {
    pub channels: BTreeSet<u64>,
    pub roles: BTreeSet<u64>,
    pub users: BTreeSet<u64>,
    pub categories: BTreeSet<u64>,
}

impl Whitelists {
    fn set_mut(&mut self, kind: WhitelistKind) -> &mut BTreeSet<u64> {
        match kind {
            WhitelistKind::Channel => &mut self.channels,
            WhitelistKind::Role => &mut self.roles,
            WhitelistKind::User => &mut self.users,
            WhitelistKind::Category => &mut self.categories,
        }
    }

    /// Add the id if it is absent, remove it if present.
    /// Returns `true` when the id ended up on the list.
    pub fn toggle(&mut self, kind: WhitelistKind, id: u64) -> bool {
        let set = self.set_mut(kind);
        if set.remove(&id) {
            false
        } else {
            set.insert(id);
            true
        }
    }

    /// Whether any whitelist covers this message.
    pub fn exempts(&self, message: &ModeratedMessage) -> bool {
        self.channels.contains(&message.channel_id)
            || self.users.contains(&message.author.id)
            || message
                .category_id
                .is_some_and(|id| self.categories.contains(&id))
            || message.author.role_ids.iter().any(|r| self.roles.contains(r))
    }
}

/// Feedback vote tally for a guild.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteTally {
    pub too_weak: u64,
    pub too_tough: u64,
    pub just_right: u64,
}

/// Per-guild AI moderation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildModerationConfig {
    pub guild_id: u64,
    /// A category score strictly above this flags the content.
    pub threshold: f64,
    /// Timeout length in minutes, 0 disables timeouts.
    pub timeout_minutes: u32,
    pub log_channel_id: Option<u64>,
    pub debug_mode: bool,
    pub delete_violatory_messages: bool,
    pub bypass_nsfw: bool,
    pub moderation_enabled: bool,
    pub whitelist: Whitelists,
    pub monitoring_warning_enabled: bool,
    /// Last time a feedback vote moved the threshold.
    pub last_vote_time: Option<DateTime<Utc>>,
    pub votes: VoteTally,
}

impl GuildModerationConfig {
    pub fn new(guild_id: u64) -> Self {
        Self {
            guild_id,
            threshold: DEFAULT_THRESHOLD,
            timeout_minutes: 0,
            log_channel_id: None,
            debug_mode: false,
            delete_violatory_messages: true,
            bypass_nsfw: false,
            moderation_enabled: true,
            whitelist: Whitelists::default(),
            monitoring_warning_enabled: false,
            last_vote_time: None,
            votes: VoteTally::default(),
        }
    }
}

/// Boolean settings that admins flip with a single command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFlag {
    ModerationEnabled,
    DeleteMessages,
    BypassNsfw,
    DebugMode,
    MonitoringWarning,
}

impl ConfigFlag {
    pub fn get(self, config: &GuildModerationConfig) -> bool {
        match self {
            ConfigFlag::ModerationEnabled => config.moderation_enabled,
            ConfigFlag::DeleteMessages => config.delete_violatory_messages,
            ConfigFlag::BypassNsfw => config.bypass_nsfw,
            ConfigFlag::DebugMode => config.debug_mode,
            ConfigFlag::MonitoringWarning => config.monitoring_warning_enabled,
        }
    }

    pub fn set(self, config: &mut GuildModerationConfig, value: bool) {
        match self {
            ConfigFlag::ModerationEnabled => config.moderation_enabled = value,
            ConfigFlag::DeleteMessages => config.delete_violatory_messages = value,
            ConfigFlag::BypassNsfw => config.bypass_nsfw = value,
            ConfigFlag::DebugMode => config.debug_mode = value,
            ConfigFlag::MonitoringWarning => config.monitoring_warning_enabled = value,
        }
    }
}

impl std::fmt::Display for ConfigFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigFlag::ModerationEnabled => write!(f, "AI moderation"),
            ConfigFlag::DeleteMessages => write!(f, "Message deletion"),
            ConfigFlag::BypassNsfw => write!(f, "NSFW bypass"),
            ConfigFlag::DebugMode => write!(f, "Debug mode"),
            ConfigFlag::MonitoringWarning => write!(f, "Monitoring warning"),
        }
    }
}

/// Feedback a member can give about how strict moderation feels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteType {
    TooWeak,
    TooStrict,
    JustRight,
}

// ============================================================================
// MESSAGES AND RECORDS
// ============================================================================

/// Author details the pipeline needs; extracted from the platform message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageAuthor {
    pub id: u64,
    pub name: String,
    pub avatar_url: Option<String>,
    pub role_ids: Vec<u64>,
}

/// A chat message as seen by the moderation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeratedMessage {
    pub guild_id: u64,
    pub guild_name: String,
    pub channel_id: u64,
    pub channel_name: String,
    /// Parent category of the channel, if any.
    pub category_id: Option<u64>,
    pub channel_nsfw: bool,
    pub message_id: u64,
    pub author: MessageAuthor,
    pub content: String,
    pub image_urls: Vec<String>,
    pub sent_at: DateTime<Utc>,
    /// True when this run was triggered by an edit of an earlier message.
    pub edited: bool,
}

/// One entry of a user's violation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub message_id: u64,
    /// Epoch seconds.
    pub timestamp: i64,
    pub content: String,
    /// Only categories above the noise floor.
    pub categories: ScoreMap,
    pub channel_id: u64,
    pub channel_name: String,
    pub author_id: u64,
    pub author_name: String,
    pub attachments: Vec<String>,
}

/// Copy of a message taken right before the pipeline deletes it, so staff can
/// restore it later.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedMessageSnapshot {
    pub message_id: u64,
    pub guild_id: u64,
    pub channel_id: u64,
    pub content: String,
    pub author_id: u64,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub image_urls: Vec<String>,
    pub sent_at: DateTime<Utc>,
}

impl DeletedMessageSnapshot {
    pub fn capture(message: &ModeratedMessage) -> Self {
        Self {
            message_id: message.message_id,
            guild_id: message.guild_id,
            channel_id: message.channel_id,
            content: message.content.clone(),
            author_id: message.author.id,
            author_name: message.author.name.clone(),
            author_avatar: message.author.avatar_url.clone(),
            image_urls: message.image_urls.clone(),
            sent_at: message.sent_at,
        }
    }
}

/// Combined classification result for one message that crossed the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Text scores (when the text was flagged) merged with the scores of every
    /// flagged image, keeping the highest score per category.
    pub scores: ScoreMap,
    pub text_flagged: bool,
    pub flagged_images: Vec<String>,
}
