// Ports to the outside world used by enforcement and review:
// the chat platform and the audit webhook.
//
// The Discord layer implements `ModerationPlatform` with serenity; the infra
// layer implements `AuditSink` with reqwest.

use super::moderation_models::{DeletedMessageSnapshot, ScoreMap};
use super::review::ReviewPanel;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlatformError {
    #[error("Missing permissions for this action")]
    Forbidden,

    #[error("The target no longer exists")]
    NotFound,

    #[error("Platform request failed: {0}")]
    Request(String),
}

/// Content of the warning DM sent by the Warn review action.
#[derive(Debug, Clone, PartialEq)]
pub struct WarningNotice {
    pub guild_name: String,
    /// The offending message, if it can still be found.
    pub quoted_content: Option<String>,
    pub warning_count: u32,
}

/// Everything the log embed shows about one enforcement event.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewLogEntry {
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub author_id: u64,
    pub author_name: String,
    pub author_avatar: Option<String>,
    pub content: String,
    pub scores: ScoreMap,
    pub threshold: f64,
    pub flagged_images: Vec<String>,
    pub action_taken: String,
    pub sent_at: DateTime<Utc>,
}

/// Per-message classification details posted when debug mode is on.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugReport {
    pub message_id: u64,
    pub channel_id: u64,
    pub author_id: u64,
    pub normalized_text: String,
    pub text_scores: ScoreMap,
    pub image_scores: Vec<(String, ScoreMap)>,
    pub error_codes: Vec<String>,
    pub threshold: f64,
    pub flagged: bool,
}

/// Chat platform operations needed by the moderation core.
///
/// Every method is a suspension point; callers must not hold locks across it.
#[async_trait]
pub trait ModerationPlatform: Send + Sync {
    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), PlatformError>;

    async fn timeout_member(
        &self,
        guild_id: u64,
        user_id: u64,
        until: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), PlatformError>;

    async fn clear_timeout(&self, guild_id: u64, user_id: u64) -> Result<(), PlatformError>;

    async fn is_timed_out(&self, guild_id: u64, user_id: u64) -> Result<bool, PlatformError>;

    async fn kick_member(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), PlatformError>;

    async fn ban_member(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), PlatformError>;

    async fn send_warning(&self, user_id: u64, notice: &WarningNotice) -> Result<(), PlatformError>;

    /// Repost a deleted message in its original channel, attributed to its author.
    async fn resend_message(&self, snapshot: &DeletedMessageSnapshot) -> Result<u64, PlatformError>;

    /// Post the review log with its button panel; returns the log message id.
    async fn send_review_log(
        &self,
        log_channel_id: u64,
        entry: &ReviewLogEntry,
        panel: &ReviewPanel,
    ) -> Result<u64, PlatformError>;

    /// Replace the buttons on an existing review log message.
    async fn update_review_panel(
        &self,
        log_channel_id: u64,
        log_message_id: u64,
        panel: &ReviewPanel,
    ) -> Result<(), PlatformError>;

    /// Post `text` as a reply to the review log message.
    async fn send_followup(
        &self,
        log_channel_id: u64,
        log_message_id: u64,
        title: &str,
        text: &str,
    ) -> Result<(), PlatformError>;

    async fn send_debug_log(&self, log_channel_id: u64, report: &DebugReport) -> Result<(), PlatformError>;

    /// Tell the author, in channel, that messages here are moderated automatically.
    async fn send_monitoring_notice(&self, channel_id: u64, user_id: u64) -> Result<(), PlatformError>;
}

// ============================================================================
// AUDIT WEBHOOK
// ============================================================================

/// Payload of the external audit webhook.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditReport {
    pub server_id: u64,
    pub server_name: String,
    pub channel_id: u64,
    pub channel_name: String,
    pub sender_id: u64,
    pub sender_username: String,
    pub message_id: u64,
    pub message_content: String,
    pub abuse_scores: ScoreMap,
    pub action_taken: String,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit webhook request failed: {0}")]
    Request(String),

    #[error("Audit webhook rejected the report with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn send(&self, report: &AuditReport) -> Result<(), AuditError>;
}
