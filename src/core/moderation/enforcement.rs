// Enforcement engine - what happens to a message once it's been flagged.
//
// Flagged -> delete (optional) -> timeout (optional) -> audit report -> review log.
// Every step is best-effort: a platform refusal degrades that step only.

use super::moderation_models::{DeletedMessageSnapshot, GuildModerationConfig, ModeratedMessage, Verdict};
use super::platform::{AuditReport, AuditSink, ModerationPlatform, ReviewLogEntry};
use super::review::ReviewPanel;
use super::review_cache::ReviewCache;
use super::statistics::{StatEvent, StatisticsSink};
use super::threshold::noteworthy;
use chrono::{Duration, Utc};
use std::sync::Arc;

/// Discord rejects audit log reasons longer than this.
pub const MAX_AUDIT_REASON_CHARS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    NotAttempted,
    Deleted,
    DeleteFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    NotAttempted,
    TimedOut,
    TimeoutSkipped,
}

/// What enforcement actually managed to do.
#[derive(Debug, Clone, PartialEq)]
pub struct EnforcementReport {
    pub delete: DeleteOutcome,
    pub timeout: TimeoutOutcome,
    pub action_taken: String,
    /// Id of the review log message, if one was posted.
    pub log_message_id: Option<u64>,
}

/// Human readable summary of the actions that succeeded.
pub fn describe_actions(delete: DeleteOutcome, timeout: TimeoutOutcome) -> &'static str {
    match (delete == DeleteOutcome::Deleted, timeout == TimeoutOutcome::TimedOut) {
        (true, true) => "Message deleted\nTimeout issued",
        (true, false) => "Message deleted",
        (false, true) => "User timed out",
        (false, false) => "No action taken",
    }
}

/// Reason attached to the timeout: every noteworthy category as a percentage
/// plus the message itself, cut to the platform limit.
pub fn audit_reason(verdict: &Verdict, content: &str) -> String {
    let categories = noteworthy(&verdict.scores)
        .iter()
        .map(|(category, score)| format!("{category} {:.0}%", score * 100.0))
        .collect::<Vec<_>>()
        .join(", ");
    let reason = format!("AutoMod: {categories} | Message: {content}");
    reason.chars().take(MAX_AUDIT_REASON_CHARS).collect()
}

pub struct EnforcementEngine {
    cache: Arc<ReviewCache>,
    stats: Arc<dyn StatisticsSink>,
    audit: Arc<dyn AuditSink>,
}

impl EnforcementEngine {
    pub fn new(cache: Arc<ReviewCache>, stats: Arc<dyn StatisticsSink>, audit: Arc<dyn AuditSink>) -> Self {
        Self { cache, stats, audit }
    }

    pub async fn enforce(
        &self,
        platform: &dyn ModerationPlatform,
        config: &GuildModerationConfig,
        message: &ModeratedMessage,
        verdict: &Verdict,
    ) -> EnforcementReport {
        let delete = self.delete(platform, config, message).await;
        let timeout = self.timeout(platform, config, message, verdict).await;
        let action_taken = describe_actions(delete, timeout).to_string();

        tracing::info!(
            guild_id = message.guild_id,
            message_id = message.message_id,
            user_id = message.author.id,
            ?delete,
            ?timeout,
            "Enforcement finished"
        );

        self.report(message, verdict, &action_taken).await;

        let log_message_id = match config.log_channel_id {
            Some(log_channel_id) => {
                self.post_review_log(platform, log_channel_id, config, message, verdict, delete, timeout, &action_taken)
                    .await
            }
            None => None,
        };

        if config.monitoring_warning_enabled && delete == DeleteOutcome::Deleted {
            if let Err(e) = platform
                .send_monitoring_notice(message.channel_id, message.author.id)
                .await
            {
                tracing::warn!(channel_id = message.channel_id, "Failed to post monitoring notice: {e}");
            }
        }

        EnforcementReport {
            delete,
            timeout,
            action_taken,
            log_message_id,
        }
    }

    async fn delete(
        &self,
        platform: &dyn ModerationPlatform,
        config: &GuildModerationConfig,
        message: &ModeratedMessage,
    ) -> DeleteOutcome {
        if !config.delete_violatory_messages {
            return DeleteOutcome::NotAttempted;
        }

        // Snapshot first so the content survives even if the delete races.
        self.cache.store_snapshot(DeletedMessageSnapshot::capture(message));

        match platform.delete_message(message.channel_id, message.message_id).await {
            Ok(()) => {
                self.stats
                    .record(
                        message.guild_id,
                        StatEvent::MessageRemoved {
                            user_id: message.author.id,
                        },
                    )
                    .await;
                DeleteOutcome::Deleted
            }
            Err(e) => {
                tracing::warn!(message_id = message.message_id, "Could not delete flagged message: {e}");
                self.cache.discard_snapshot(message.message_id);
                DeleteOutcome::DeleteFailed
            }
        }
    }

    async fn timeout(
        &self,
        platform: &dyn ModerationPlatform,
        config: &GuildModerationConfig,
        message: &ModeratedMessage,
        verdict: &Verdict,
    ) -> TimeoutOutcome {
        if config.timeout_minutes == 0 {
            return TimeoutOutcome::NotAttempted;
        }

        let until = Utc::now() + Duration::minutes(i64::from(config.timeout_minutes));
        let reason = audit_reason(verdict, &message.content);
        match platform
            .timeout_member(message.guild_id, message.author.id, until, &reason)
            .await
        {
            Ok(()) => {
                self.cache.mark_timeout_issued(message.message_id);
                self.stats
                    .record(
                        message.guild_id,
                        StatEvent::TimeoutIssued {
                            minutes: u64::from(config.timeout_minutes),
                        },
                    )
                    .await;
                TimeoutOutcome::TimedOut
            }
            Err(e) => {
                tracing::warn!(user_id = message.author.id, "Could not time out member: {e}");
                TimeoutOutcome::TimeoutSkipped
            }
        }
    }

    async fn report(&self, message: &ModeratedMessage, verdict: &Verdict, action_taken: &str) {
        let report = AuditReport {
            server_id: message.guild_id,
            server_name: message.guild_name.clone(),
            channel_id: message.channel_id,
            channel_name: message.channel_name.clone(),
            sender_id: message.author.id,
            sender_username: message.author.name.clone(),
            message_id: message.message_id,
            message_content: message.content.clone(),
            abuse_scores: verdict.scores.clone(),
            action_taken: action_taken.to_string(),
        };
        if let Err(e) = self.audit.send(&report).await {
            tracing::warn!(message_id = message.message_id, "Audit webhook failed: {e}");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn post_review_log(
        &self,
        platform: &dyn ModerationPlatform,
        log_channel_id: u64,
        config: &GuildModerationConfig,
        message: &ModeratedMessage,
        verdict: &Verdict,
        delete: DeleteOutcome,
        timeout: TimeoutOutcome,
        action_taken: &str,
    ) -> Option<u64> {
        let entry = ReviewLogEntry {
            guild_id: message.guild_id,
            channel_id: message.channel_id,
            message_id: message.message_id,
            author_id: message.author.id,
            author_name: message.author.name.clone(),
            author_avatar: message.author.avatar_url.clone(),
            content: message.content.clone(),
            scores: verdict.scores.clone(),
            threshold: config.threshold,
            flagged_images: self.cache.flagged_images(message.message_id),
            action_taken: action_taken.to_string(),
            sent_at: message.sent_at,
        };
        let panel = ReviewPanel::initial(
            message.message_id,
            message.author.id,
            timeout == TimeoutOutcome::TimedOut,
            delete == DeleteOutcome::Deleted,
        );

        match platform.send_review_log(log_channel_id, &entry, &panel).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(log_channel_id, "Failed to post moderation log: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::moderation_models::test_support::{message, scores};
    use crate::core::moderation::platform::test_support::{RecordingAudit, RecordingPlatform};
    use crate::core::moderation::review::ReviewAction;
    use crate::core::moderation::statistics::{DirectStatisticsSink, StatScope, StatsStore};
    use crate::infra::moderation::InMemoryModerationStore;

    struct Fixture {
        store: InMemoryModerationStore,
        cache: Arc<ReviewCache>,
        audit: Arc<RecordingAudit>,
        engine: EnforcementEngine,
    }

    fn fixture_with(audit: RecordingAudit) -> Fixture {
        let store = InMemoryModerationStore::new();
        let cache = Arc::new(ReviewCache::default());
        let audit = Arc::new(audit);
        let engine = EnforcementEngine::new(
            cache.clone(),
            Arc::new(DirectStatisticsSink::new(store.clone())),
            audit.clone(),
        );
        Fixture {
            store,
            cache,
            audit,
            engine,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingAudit::default())
    }

    fn verdict() -> Verdict {
        Verdict {
            scores: scores(&[("harassment", 0.82), ("sexual", 0.1)]),
            text_flagged: true,
            flagged_images: Vec::new(),
        }
    }

    #[test]
    fn action_summary_covers_every_combination() {
        use DeleteOutcome::{DeleteFailed, Deleted};
        use TimeoutOutcome::{TimedOut, TimeoutSkipped};
        assert_eq!(describe_actions(Deleted, TimedOut), "Message deleted\nTimeout issued");
        assert_eq!(describe_actions(Deleted, TimeoutSkipped), "Message deleted");
        assert_eq!(describe_actions(DeleteFailed, TimedOut), "User timed out");
        assert_eq!(
            describe_actions(DeleteOutcome::NotAttempted, TimeoutOutcome::NotAttempted),
            "No action taken"
        );
    }

    #[test]
    fn audit_reason_lists_noteworthy_categories_and_is_bounded() {
        let reason = audit_reason(&verdict(), "you are awful");
        assert_eq!(reason, "AutoMod: harassment 82% | Message: you are awful");

        let long = "x".repeat(2_000);
        assert_eq!(audit_reason(&verdict(), &long).chars().count(), MAX_AUDIT_REASON_CHARS);
    }

    #[tokio::test]
    async fn default_config_deletes_and_snapshots() {
        let f = fixture();
        let config = GuildModerationConfig::new(1);
        let platform = RecordingPlatform::default();
        let msg = message(1, 100, 7, "you are awful");

        let report = f.engine.enforce(&platform, &config, &msg, &verdict()).await;

        assert_eq!(report.delete, DeleteOutcome::Deleted);
        assert_eq!(report.timeout, TimeoutOutcome::NotAttempted);
        assert_eq!(report.action_taken, "Message deleted");
        assert!(f.cache.has_snapshot(100));
        // No log channel configured: silent enforcement.
        assert_eq!(report.log_message_id, None);
        assert!(!platform.called("send_review_log"));

        let stats = f.store.counters(StatScope::Guild(1)).await.unwrap();
        assert_eq!(stats.moderated_users.get(&7), Some(&1));
    }

    #[tokio::test]
    async fn timeout_without_delete_leaves_no_snapshot() {
        let f = fixture();
        let mut config = GuildModerationConfig::new(1);
        config.delete_violatory_messages = false;
        config.timeout_minutes = 10;
        let platform = RecordingPlatform::default();
        let msg = message(1, 100, 7, "you are awful");

        let report = f.engine.enforce(&platform, &config, &msg, &verdict()).await;

        assert_eq!(report.action_taken, "User timed out");
        assert!(!platform.called("delete_message"));
        assert!(!f.cache.has_snapshot(100));
        assert!(f.cache.timeout_issued(100));
        let reasons = platform.timeout_reasons.lock().unwrap();
        assert!(reasons[0].contains("harassment 82%"));
        assert!(reasons[0].contains("you are awful"));
    }

    #[tokio::test]
    async fn forbidden_steps_degrade_without_aborting() {
        let f = fixture();
        let mut config = GuildModerationConfig::new(1);
        config.timeout_minutes = 5;
        config.log_channel_id = Some(600);
        let platform = RecordingPlatform::failing(&["delete_message", "timeout_member"]);
        let msg = message(1, 100, 7, "you are awful");

        let report = f.engine.enforce(&platform, &config, &msg, &verdict()).await;

        assert_eq!(report.delete, DeleteOutcome::DeleteFailed);
        assert_eq!(report.timeout, TimeoutOutcome::TimeoutSkipped);
        assert_eq!(report.action_taken, "No action taken");
        assert!(!f.cache.has_snapshot(100));
        // Reporting and logging still happen.
        assert_eq!(f.audit.reports.lock().unwrap().len(), 1);
        assert!(report.log_message_id.is_some());
    }

    #[tokio::test]
    async fn audit_report_carries_full_scores_and_action() {
        let f = fixture();
        let config = GuildModerationConfig::new(1);
        let platform = RecordingPlatform::default();
        let msg = message(1, 100, 7, "you are awful");

        f.engine.enforce(&platform, &config, &msg, &verdict()).await;

        let report = f.audit.reports.lock().unwrap()[0].clone();
        assert_eq!(report.server_id, 1);
        assert_eq!(report.sender_id, 7);
        assert_eq!(report.abuse_scores, verdict().scores);
        assert_eq!(report.action_taken, "Message deleted");
    }

    #[tokio::test]
    async fn audit_failure_is_swallowed() {
        let f = fixture_with(RecordingAudit {
            reject: true,
            ..Default::default()
        });
        let platform = RecordingPlatform::default();
        let report = f
            .engine
            .enforce(&platform, &GuildModerationConfig::new(1), &message(1, 100, 7, "x"), &verdict())
            .await;
        assert_eq!(report.delete, DeleteOutcome::Deleted);
    }

    #[tokio::test]
    async fn review_panel_reflects_what_happened() {
        let f = fixture();
        let mut config = GuildModerationConfig::new(1);
        config.timeout_minutes = 5;
        config.log_channel_id = Some(600);
        config.monitoring_warning_enabled = true;
        let platform = RecordingPlatform::default();

        let report = f
            .engine
            .enforce(&platform, &config, &message(1, 100, 7, "x"), &verdict())
            .await;

        assert_eq!(report.log_message_id, Some(9_100));
        let panel = platform.last_panel().unwrap();
        assert!(panel.button(ReviewAction::Untimeout).is_some());
        assert!(panel.button(ReviewAction::Resend).is_some());
        assert!(platform.called("send_monitoring_notice"));
    }

    #[tokio::test]
    async fn review_log_lists_the_images_associated_with_the_message() {
        let f = fixture();
        let mut config = GuildModerationConfig::new(1);
        config.log_channel_id = Some(600);
        let platform = RecordingPlatform::default();
        let image = "https://cdn.example/flagged.png".to_string();
        f.cache.set_flagged_images(100, vec![image.clone()]);

        f.engine
            .enforce(&platform, &config, &message(1, 100, 7, "x"), &verdict())
            .await;

        let logs = platform.logs.lock().unwrap();
        assert_eq!(logs[0].flagged_images, vec![image]);
    }
}
