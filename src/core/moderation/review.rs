// Review workflow - the buttons attached to a moderation log entry.
//
// Handlers are stateless: everything they need comes from the button's
// custom id, the panel currently shown on the log message, and the
// ledger/config/caches looked up on each click.

use super::classifier::{CompletionProvider, ModerationClient, ModerationProvider, ProviderError};
use super::config_service::{GuildConfigStore, ModerationConfigService};
use super::moderation_models::StoreError;
use super::platform::{ModerationPlatform, PlatformError, WarningNotice};
use super::review_cache::ReviewCache;
use super::statistics::{StatEvent, StatisticsSink};
use super::violation_ledger::{ViolationLedger, ViolationStore};
use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Prefix of every review button custom id.
pub const CUSTOM_ID_PREFIX: &str = "automod";

const TRANSLATING_LABEL: &str = "AI working...";
const TRANSLATED_LABEL: &str = "Translation below";
const TIMEOUT_LIFTED_LABEL: &str = "Timeout lifted";

// ============================================================================
// BUTTONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReviewAction {
    Warn,
    Timeout,
    Untimeout,
    Kick,
    Ban,
    Resend,
    Translate,
    Dismiss,
}

impl ReviewAction {
    /// Display order on the panel.
    pub const ALL: [ReviewAction; 8] = [
        ReviewAction::Warn,
        ReviewAction::Timeout,
        ReviewAction::Untimeout,
        ReviewAction::Kick,
        ReviewAction::Ban,
        ReviewAction::Resend,
        ReviewAction::Translate,
        ReviewAction::Dismiss,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ReviewAction::Warn => "warn",
            ReviewAction::Timeout => "timeout",
            ReviewAction::Untimeout => "untimeout",
            ReviewAction::Kick => "kick",
            ReviewAction::Ban => "ban",
            ReviewAction::Resend => "resend",
            ReviewAction::Translate => "translate",
            ReviewAction::Dismiss => "dismiss",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.key() == key)
    }

    /// Restoring a message is the only action that doesn't need
    /// administrator or manage-guild.
    pub fn requires_staff(self) -> bool {
        !matches!(self, ReviewAction::Resend)
    }

    pub fn default_label(self) -> &'static str {
        match self {
            ReviewAction::Warn => "Warn",
            ReviewAction::Timeout => "Timeout",
            ReviewAction::Untimeout => "Untimeout",
            ReviewAction::Kick => "Kick",
            ReviewAction::Ban => "Ban",
            ReviewAction::Resend => "Restore message",
            ReviewAction::Translate => "Translate",
            ReviewAction::Dismiss => "Dismiss",
        }
    }

    fn order(self) -> usize {
        Self::ALL.iter().position(|a| *a == self).unwrap_or(Self::ALL.len())
    }
}

/// Identifies one button: `automod:<action>:<message_id>:<user_id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewButtonId {
    pub action: ReviewAction,
    /// The moderated message.
    pub message_id: u64,
    /// The moderated user.
    pub user_id: u64,
}

impl ReviewButtonId {
    pub fn to_custom_id(&self) -> String {
        format!(
            "{CUSTOM_ID_PREFIX}:{}:{}:{}",
            self.action.key(),
            self.message_id,
            self.user_id
        )
    }

    /// `None` for custom ids that don't belong to the review panel.
    pub fn parse(custom_id: &str) -> Option<Self> {
        let mut parts = custom_id.split(':');
        if parts.next()? != CUSTOM_ID_PREFIX {
            return None;
        }
        let action = ReviewAction::parse(parts.next()?)?;
        let message_id = parts.next()?.parse().ok()?;
        let user_id = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            action,
            message_id,
            user_id,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ButtonState {
    pub action: ReviewAction,
    pub label: String,
    pub disabled: bool,
}

impl ButtonState {
    pub fn fresh(action: ReviewAction) -> Self {
        Self {
            action,
            label: action.default_label().to_string(),
            disabled: false,
        }
    }
}

/// The button set on one review log message.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewPanel {
    pub message_id: u64,
    pub user_id: u64,
    pub buttons: Vec<ButtonState>,
}

impl ReviewPanel {
    /// Panel posted with a new log entry. Untimeout only shows up if a
    /// timeout was issued, Resend only if the message was deleted.
    pub fn initial(message_id: u64, user_id: u64, timeout_issued: bool, can_resend: bool) -> Self {
        let buttons = ReviewAction::ALL
            .into_iter()
            .filter(|action| match action {
                ReviewAction::Untimeout => timeout_issued,
                ReviewAction::Resend => can_resend,
                _ => true,
            })
            .map(ButtonState::fresh)
            .collect();
        Self {
            message_id,
            user_id,
            buttons,
        }
    }

    pub fn button(&self, action: ReviewAction) -> Option<&ButtonState> {
        self.buttons.iter().find(|b| b.action == action)
    }

    pub fn button_id(&self, action: ReviewAction) -> ReviewButtonId {
        ReviewButtonId {
            action,
            message_id: self.message_id,
            user_id: self.user_id,
        }
    }

    /// Relabel and enable/disable a button. No-op if it isn't on the panel.
    pub fn set(&mut self, action: ReviewAction, label: &str, disabled: bool) {
        if let Some(button) = self.buttons.iter_mut().find(|b| b.action == action) {
            button.label = label.to_string();
            button.disabled = disabled;
        }
    }

    /// Add a fresh button in its display position unless already present.
    pub fn ensure(&mut self, action: ReviewAction) {
        if self.button(action).is_some() {
            return;
        }
        let index = self
            .buttons
            .iter()
            .position(|b| b.action.order() > action.order())
            .unwrap_or(self.buttons.len());
        self.buttons.insert(index, ButtonState::fresh(action));
    }
}

// ============================================================================
// WORKFLOW
// ============================================================================

/// One button click.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRequest {
    pub guild_id: u64,
    pub guild_name: String,
    pub action: ReviewAction,
    pub message_id: u64,
    pub moderated_user_id: u64,
    pub actor_id: u64,
    /// Administrator or manage-guild.
    pub actor_is_staff: bool,
    pub log_channel_id: u64,
    pub log_message_id: u64,
    /// The panel as currently shown on the log message.
    pub panel: ReviewPanel,
}

/// Ephemeral confirmation shown to the clicking staff member.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewOutcome {
    pub reply: String,
}

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("You can't take action on your own moderation case.")]
    SelfAction,

    #[error("You need Administrator or Manage Server to do that.")]
    NotStaff,

    #[error("That action has already been taken.")]
    AlreadyHandled,

    #[error("Timeouts are disabled for this server.")]
    TimeoutDisabled,

    #[error("That user is already timed out.")]
    AlreadyTimedOut,

    #[error("There is no deleted message to restore.")]
    NothingToRestore,

    #[error("There is no message content to translate.")]
    NothingToTranslate,

    #[error("Discord refused the action: {0}")]
    Platform(#[from] PlatformError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Translation failed: {0}")]
    Translation(ProviderError),
}

pub struct ReviewWorkflow<V: ViolationStore, G: GuildConfigStore, P> {
    ledger: Arc<ViolationLedger<V>>,
    config: Arc<ModerationConfigService<G>>,
    client: Arc<ModerationClient<P>>,
    cache: Arc<ReviewCache>,
    stats: Arc<dyn StatisticsSink>,
    translate_language: String,
}

impl<V, G, P> ReviewWorkflow<V, G, P>
where
    V: ViolationStore,
    G: GuildConfigStore,
    P: ModerationProvider + CompletionProvider,
{
    pub fn new(
        ledger: Arc<ViolationLedger<V>>,
        config: Arc<ModerationConfigService<G>>,
        client: Arc<ModerationClient<P>>,
        cache: Arc<ReviewCache>,
        stats: Arc<dyn StatisticsSink>,
        translate_language: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            config,
            client,
            cache,
            stats,
            translate_language: translate_language.into(),
        }
    }

    /// Run one button click. Guards run before anything is mutated; a
    /// rejected click leaves every piece of state untouched.
    pub async fn handle(
        &self,
        platform: &dyn ModerationPlatform,
        mut request: ReviewRequest,
    ) -> Result<ReviewOutcome, ReviewError> {
        if request.actor_id == request.moderated_user_id {
            return Err(ReviewError::SelfAction);
        }
        if request.action.requires_staff() && !request.actor_is_staff {
            return Err(ReviewError::NotStaff);
        }
        match request.panel.button(request.action) {
            Some(button) if !button.disabled => {}
            _ => return Err(ReviewError::AlreadyHandled),
        }
        // A panel rebuilt from a stale log message may have lost the button.
        if self.cache.timeout_issued(request.message_id) {
            request.panel.ensure(ReviewAction::Untimeout);
        }

        tracing::info!(
            guild_id = request.guild_id,
            message_id = request.message_id,
            actor_id = request.actor_id,
            action = request.action.key(),
            "Review action"
        );

        match request.action {
            ReviewAction::Warn => self.warn(platform, request).await,
            ReviewAction::Timeout => self.timeout(platform, request).await,
            ReviewAction::Untimeout => self.untimeout(platform, request).await,
            ReviewAction::Kick | ReviewAction::Ban => self.remove_member(platform, request).await,
            ReviewAction::Resend => self.resend(platform, request).await,
            ReviewAction::Translate => self.translate(platform, request).await,
            ReviewAction::Dismiss => self.dismiss(platform, request).await,
        }
    }

    async fn warn(
        &self,
        platform: &dyn ModerationPlatform,
        mut request: ReviewRequest,
    ) -> Result<ReviewOutcome, ReviewError> {
        // Two staff clicking at once both see an enabled button.
        if !self.cache.claim_warning(request.message_id) {
            return Err(ReviewError::AlreadyHandled);
        }
        let count = match self
            .ledger
            .warn(request.guild_id, request.moderated_user_id)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                self.cache.release_warning(request.message_id);
                return Err(e.into());
            }
        };
        let quoted_content = self.original_content(&request).await;

        let notice = WarningNotice {
            guild_name: request.guild_name.clone(),
            quoted_content,
            warning_count: count,
        };
        let delivered = match platform.send_warning(request.moderated_user_id, &notice).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(user_id = request.moderated_user_id, "Could not DM warning: {e}");
                false
            }
        };

        request.panel.set(ReviewAction::Warn, "Warned", true);
        self.publish_panel(platform, &request).await;

        let reply = if delivered {
            format!("Warned <@{}> (warning #{count}).", request.moderated_user_id)
        } else {
            format!(
                "Warning #{count} recorded for <@{}>, but their DMs are closed.",
                request.moderated_user_id
            )
        };
        Ok(ReviewOutcome { reply })
    }

    async fn timeout(
        &self,
        platform: &dyn ModerationPlatform,
        mut request: ReviewRequest,
    ) -> Result<ReviewOutcome, ReviewError> {
        let config = self.config.get_config(request.guild_id).await?;
        if config.timeout_minutes == 0 {
            return Err(ReviewError::TimeoutDisabled);
        }
        if platform
            .is_timed_out(request.guild_id, request.moderated_user_id)
            .await?
        {
            return Err(ReviewError::AlreadyTimedOut);
        }

        let minutes = config.timeout_minutes;
        let until = Utc::now() + Duration::minutes(i64::from(minutes));
        let reason = format!("AutoMod review: timed out over message {}", request.message_id);
        platform
            .timeout_member(request.guild_id, request.moderated_user_id, until, &reason)
            .await?;

        self.cache.mark_timeout_issued(request.message_id);
        self.stats
            .record(
                request.guild_id,
                StatEvent::TimeoutIssued {
                    minutes: u64::from(minutes),
                },
            )
            .await;

        request.panel.ensure(ReviewAction::Untimeout);
        request.panel.set(
            ReviewAction::Untimeout,
            ReviewAction::Untimeout.default_label(),
            false,
        );
        self.publish_panel(platform, &request).await;

        Ok(ReviewOutcome {
            reply: format!(
                "Timed out <@{}> for {minutes} minutes.",
                request.moderated_user_id
            ),
        })
    }

    async fn untimeout(
        &self,
        platform: &dyn ModerationPlatform,
        mut request: ReviewRequest,
    ) -> Result<ReviewOutcome, ReviewError> {
        platform
            .clear_timeout(request.guild_id, request.moderated_user_id)
            .await?;
        self.cache.clear_timeout(request.message_id);

        request
            .panel
            .set(ReviewAction::Untimeout, TIMEOUT_LIFTED_LABEL, true);
        self.publish_panel(platform, &request).await;

        Ok(ReviewOutcome {
            reply: format!("Lifted the timeout for <@{}>.", request.moderated_user_id),
        })
    }

    async fn remove_member(
        &self,
        platform: &dyn ModerationPlatform,
        request: ReviewRequest,
    ) -> Result<ReviewOutcome, ReviewError> {
        let mut reason = format!("AutoMod review of message {}", request.message_id);
        if let Some(content) = self.original_content(&request).await {
            let snippet: String = content.chars().take(200).collect();
            reason.push_str(&format!(": \"{snippet}\""));
        }

        let verb = if request.action == ReviewAction::Kick {
            platform
                .kick_member(request.guild_id, request.moderated_user_id, &reason)
                .await?;
            "Kicked"
        } else {
            platform
                .ban_member(request.guild_id, request.moderated_user_id, &reason)
                .await?;
            "Banned"
        };

        Ok(ReviewOutcome {
            reply: format!("{verb} <@{}>.", request.moderated_user_id),
        })
    }

    async fn resend(
        &self,
        platform: &dyn ModerationPlatform,
        mut request: ReviewRequest,
    ) -> Result<ReviewOutcome, ReviewError> {
        let snapshot = self
            .cache
            .take_snapshot(request.message_id)
            .ok_or(ReviewError::NothingToRestore)?;

        if let Err(e) = platform.resend_message(&snapshot).await {
            self.cache.store_snapshot(snapshot);
            return Err(e.into());
        }

        request.panel.set(ReviewAction::Resend, "Restored", true);
        self.publish_panel(platform, &request).await;

        Ok(ReviewOutcome {
            reply: format!("Restored the message in <#{}>.", snapshot.channel_id),
        })
    }

    async fn translate(
        &self,
        platform: &dyn ModerationPlatform,
        mut request: ReviewRequest,
    ) -> Result<ReviewOutcome, ReviewError> {
        let content = self
            .original_content(&request)
            .await
            .filter(|c| !c.trim().is_empty())
            .ok_or(ReviewError::NothingToTranslate)?;

        request
            .panel
            .set(ReviewAction::Translate, TRANSLATING_LABEL, true);
        self.publish_panel(platform, &request).await;

        let posted = match self.client.translate(&content, &self.translate_language).await {
            Ok(translation) => platform
                .send_followup(
                    request.log_channel_id,
                    request.log_message_id,
                    &format!("Translation ({})", self.translate_language),
                    &translation,
                )
                .await
                .map_err(ReviewError::from),
            Err(e) => Err(ReviewError::Translation(e)),
        };

        match posted {
            Ok(()) => {
                request
                    .panel
                    .set(ReviewAction::Translate, TRANSLATED_LABEL, true);
                self.publish_panel(platform, &request).await;
                Ok(ReviewOutcome {
                    reply: "Translation posted below the log.".to_string(),
                })
            }
            Err(e) => {
                request.panel.set(
                    ReviewAction::Translate,
                    ReviewAction::Translate.default_label(),
                    false,
                );
                self.publish_panel(platform, &request).await;
                Err(e)
            }
        }
    }

    async fn dismiss(
        &self,
        platform: &dyn ModerationPlatform,
        request: ReviewRequest,
    ) -> Result<ReviewOutcome, ReviewError> {
        platform
            .delete_message(request.log_channel_id, request.log_message_id)
            .await?;
        // Nothing can restore it once the log is gone.
        self.cache.discard_snapshot(request.message_id);
        self.cache.set_flagged_images(request.message_id, Vec::new());

        Ok(ReviewOutcome {
            reply: "Log dismissed.".to_string(),
        })
    }

    /// Content of the moderated message, from the ledger or the deletion
    /// snapshot.
    async fn original_content(&self, request: &ReviewRequest) -> Option<String> {
        match self.ledger.find(request.guild_id, request.message_id).await {
            Ok(Some(record)) => return Some(record.content),
            Ok(None) => {}
            Err(e) => tracing::warn!(message_id = request.message_id, "Ledger lookup failed: {e}"),
        }
        self.cache.snapshot(request.message_id).map(|s| s.content)
    }

    async fn publish_panel(&self, platform: &dyn ModerationPlatform, request: &ReviewRequest) {
        if let Err(e) = platform
            .update_review_panel(request.log_channel_id, request.log_message_id, &request.panel)
            .await
        {
            tracing::warn!(
                log_message_id = request.log_message_id,
                "Failed to update review panel: {e}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::classifier::test_support::ScriptedProvider;
    use crate::core::moderation::moderation_models::test_support::{message, scores};
    use crate::core::moderation::moderation_models::{DeletedMessageSnapshot, GuildModerationConfig};
    use crate::core::moderation::platform::test_support::RecordingPlatform;
    use crate::core::moderation::statistics::{DirectStatisticsSink, StatScope, StatsStore};
    use crate::infra::moderation::InMemoryModerationStore;

    const GUILD: u64 = 1;
    const MESSAGE: u64 = 100;
    const OFFENDER: u64 = 7;
    const STAFF: u64 = 8;

    type Workflow = ReviewWorkflow<InMemoryModerationStore, InMemoryModerationStore, ScriptedProvider>;

    struct Fixture {
        store: InMemoryModerationStore,
        cache: Arc<ReviewCache>,
        provider_completion: Option<Result<String, ProviderError>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: InMemoryModerationStore::new(),
                cache: Arc::new(ReviewCache::default()),
                provider_completion: None,
            }
        }

        async fn with_timeout(self, minutes: u32) -> Self {
            let mut config = GuildModerationConfig::new(GUILD);
            config.timeout_minutes = minutes;
            self.store.save_config(&config).await.unwrap();
            self
        }

        fn workflow(&self) -> Workflow {
            let mut provider = ScriptedProvider::always(Ok(scores(&[])));
            if let Some(completion) = &self.provider_completion {
                provider.completion = completion.clone();
            }
            ReviewWorkflow::new(
                Arc::new(ViolationLedger::new(self.store.clone())),
                Arc::new(ModerationConfigService::new(self.store.clone())),
                Arc::new(ModerationClient::new(provider)),
                self.cache.clone(),
                Arc::new(DirectStatisticsSink::new(self.store.clone())),
                "English",
            )
        }
    }

    fn request(action: ReviewAction, actor_id: u64, actor_is_staff: bool) -> ReviewRequest {
        ReviewRequest {
            guild_id: GUILD,
            guild_name: "Test Guild".into(),
            action,
            message_id: MESSAGE,
            moderated_user_id: OFFENDER,
            actor_id,
            actor_is_staff,
            log_channel_id: 600,
            log_message_id: 9_100,
            panel: ReviewPanel::initial(MESSAGE, OFFENDER, true, true),
        }
    }

    #[test]
    fn custom_id_round_trips_and_rejects_foreign_ids() {
        let id = ReviewButtonId {
            action: ReviewAction::Untimeout,
            message_id: 123,
            user_id: 456,
        };
        assert_eq!(id.to_custom_id(), "automod:untimeout:123:456");
        assert_eq!(ReviewButtonId::parse(&id.to_custom_id()), Some(id));

        assert_eq!(ReviewButtonId::parse("leaderboard_next"), None);
        assert_eq!(ReviewButtonId::parse("automod:explode:1:2"), None);
        assert_eq!(ReviewButtonId::parse("automod:warn:1:2:3"), None);
    }

    #[test]
    fn initial_panel_shows_conditional_buttons_only_when_relevant() {
        let plain = ReviewPanel::initial(1, 2, false, false);
        assert!(plain.button(ReviewAction::Untimeout).is_none());
        assert!(plain.button(ReviewAction::Resend).is_none());
        assert_eq!(plain.buttons.len(), 6);

        let full = ReviewPanel::initial(1, 2, true, true);
        let order: Vec<_> = full.buttons.iter().map(|b| b.action).collect();
        assert_eq!(order, ReviewAction::ALL.to_vec());
    }

    #[test]
    fn ensure_inserts_in_display_order() {
        let mut panel = ReviewPanel::initial(1, 2, false, false);
        panel.ensure(ReviewAction::Untimeout);
        assert_eq!(panel.buttons[2].action, ReviewAction::Untimeout);
        panel.ensure(ReviewAction::Untimeout);
        assert_eq!(panel.buttons.len(), 7);
    }

    #[tokio::test]
    async fn moderated_user_can_never_act_on_own_case() {
        let fixture = Fixture::new().with_timeout(10).await;
        fixture
            .cache
            .store_snapshot(DeletedMessageSnapshot::capture(&message(GUILD, MESSAGE, OFFENDER, "hi")));
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::default();

        for action in ReviewAction::ALL {
            // Staff status elsewhere doesn't matter.
            let result = workflow.handle(&platform, request(action, OFFENDER, true)).await;
            assert!(matches!(result, Err(ReviewError::SelfAction)), "{action:?}");
        }

        assert!(platform.calls().is_empty());
        assert!(fixture.cache.has_snapshot(MESSAGE));
        assert_eq!(fixture.store.warnings(GUILD, OFFENDER).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn non_staff_can_only_resend() {
        let fixture = Fixture::new();
        fixture
            .cache
            .store_snapshot(DeletedMessageSnapshot::capture(&message(GUILD, MESSAGE, OFFENDER, "hi")));
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::default();

        for action in ReviewAction::ALL.into_iter().filter(|a| *a != ReviewAction::Resend) {
            let result = workflow.handle(&platform, request(action, 99, false)).await;
            assert!(matches!(result, Err(ReviewError::NotStaff)), "{action:?}");
        }

        workflow
            .handle(&platform, request(ReviewAction::Resend, 99, false))
            .await
            .unwrap();
        assert_eq!(platform.resent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn warn_increments_counter_dms_and_disables_button() {
        let fixture = Fixture::new();
        let ledger = ViolationLedger::new(fixture.store.clone());
        ledger
            .record(
                &message(GUILD, MESSAGE, OFFENDER, "offending text"),
                &scores(&[("harassment", 0.9)]),
                &[],
            )
            .await
            .unwrap();
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::default();

        let outcome = workflow
            .handle(&platform, request(ReviewAction::Warn, STAFF, true))
            .await
            .unwrap();

        assert!(outcome.reply.contains("warning #1"));
        assert_eq!(fixture.store.warnings(GUILD, OFFENDER).await.unwrap(), 1);
        let warnings = platform.warnings.lock().unwrap();
        assert_eq!(warnings[0].1.quoted_content.as_deref(), Some("offending text"));
        let panel = platform.last_panel().unwrap();
        assert!(panel.button(ReviewAction::Warn).unwrap().disabled);
    }

    #[tokio::test]
    async fn warn_with_closed_dms_still_counts() {
        let fixture = Fixture::new();
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::failing(&["send_warning"]);

        let outcome = workflow
            .handle(&platform, request(ReviewAction::Warn, STAFF, true))
            .await
            .unwrap();
        assert!(outcome.reply.contains("DMs are closed"));
        assert_eq!(fixture.store.warnings(GUILD, OFFENDER).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_warn_clicks_count_once() {
        let fixture = Fixture::new();
        let first = fixture.workflow();
        let second = fixture.workflow();
        let platform = RecordingPlatform::default();

        let (a, b) = tokio::join!(
            first.handle(&platform, request(ReviewAction::Warn, STAFF, true)),
            second.handle(&platform, request(ReviewAction::Warn, STAFF + 1, true)),
        );

        let results = [a, b];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ReviewError::AlreadyHandled))));
        assert_eq!(fixture.store.warnings(GUILD, OFFENDER).await.unwrap(), 1);
        assert_eq!(platform.warnings.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn panel_regains_untimeout_while_timeout_is_marked() {
        let fixture = Fixture::new();
        fixture.cache.mark_timeout_issued(MESSAGE);
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::default();
        let mut warn = request(ReviewAction::Warn, STAFF, true);
        warn.panel = ReviewPanel::initial(MESSAGE, OFFENDER, false, true);
        assert!(warn.panel.button(ReviewAction::Untimeout).is_none());

        workflow.handle(&platform, warn).await.unwrap();

        let panel = platform.last_panel().unwrap();
        assert!(!panel.button(ReviewAction::Untimeout).unwrap().disabled);
    }

    #[tokio::test]
    async fn disabled_button_is_rejected_as_already_handled() {
        let fixture = Fixture::new();
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::default();

        let mut req = request(ReviewAction::Warn, STAFF, true);
        req.panel.set(ReviewAction::Warn, "Warned", true);
        assert!(matches!(
            workflow.handle(&platform, req).await,
            Err(ReviewError::AlreadyHandled)
        ));
        assert_eq!(fixture.store.warnings(GUILD, OFFENDER).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn timeout_requires_configured_duration() {
        let fixture = Fixture::new();
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::default();

        let result = workflow
            .handle(&platform, request(ReviewAction::Timeout, STAFF, true))
            .await;
        assert!(matches!(result, Err(ReviewError::TimeoutDisabled)));
        assert!(!platform.called("timeout_member"));
    }

    #[tokio::test]
    async fn timeout_then_untimeout_updates_panel_and_cache() {
        let fixture = Fixture::new().with_timeout(10).await;
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::default();

        let mut req = request(ReviewAction::Timeout, STAFF, true);
        req.panel = ReviewPanel::initial(MESSAGE, OFFENDER, false, false);
        workflow.handle(&platform, req).await.unwrap();

        assert!(fixture.cache.timeout_issued(MESSAGE));
        let panel = platform.last_panel().unwrap();
        assert!(!panel.button(ReviewAction::Untimeout).unwrap().disabled);
        assert!(!panel.button(ReviewAction::Timeout).unwrap().disabled);
        let stats = fixture.store.counters(StatScope::Guild(GUILD)).await.unwrap();
        assert_eq!(stats.total_timeout_minutes, 10);

        // Already timed out on the platform.
        let mut again = request(ReviewAction::Timeout, STAFF, true);
        again.panel = panel.clone();
        assert!(matches!(
            workflow.handle(&platform, again).await,
            Err(ReviewError::AlreadyTimedOut)
        ));

        let mut lift = request(ReviewAction::Untimeout, STAFF, true);
        lift.panel = panel;
        workflow.handle(&platform, lift).await.unwrap();

        assert!(!fixture.cache.timeout_issued(MESSAGE));
        let panel = platform.last_panel().unwrap();
        let untimeout = panel.button(ReviewAction::Untimeout).unwrap();
        assert_eq!(untimeout.label, TIMEOUT_LIFTED_LABEL);
        assert!(untimeout.disabled);
    }

    #[tokio::test]
    async fn failed_platform_call_leaves_state_untouched() {
        let fixture = Fixture::new().with_timeout(10).await;
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::failing(&["timeout_member"]);

        let result = workflow
            .handle(&platform, request(ReviewAction::Timeout, STAFF, true))
            .await;
        assert!(matches!(result, Err(ReviewError::Platform(PlatformError::Forbidden))));
        assert!(!fixture.cache.timeout_issued(MESSAGE));
        assert!(!platform.called("update_review_panel"));
    }

    #[tokio::test]
    async fn resend_restores_content_and_all_images_once() {
        let fixture = Fixture::new();
        let mut original = message(GUILD, MESSAGE, OFFENDER, "original words");
        original.image_urls = vec!["https://cdn/a.png".into(), "https://cdn/b.png".into()];
        fixture.cache.store_snapshot(DeletedMessageSnapshot::capture(&original));
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::default();

        workflow
            .handle(&platform, request(ReviewAction::Resend, STAFF, true))
            .await
            .unwrap();

        let resent = platform.resent.lock().unwrap()[0].clone();
        assert_eq!(resent.content, "original words");
        assert_eq!(resent.image_urls, original.image_urls);
        assert_eq!(resent.author_id, OFFENDER);
        assert_eq!(resent.author_name, original.author.name);
        assert!(!fixture.cache.has_snapshot(MESSAGE));
        assert!(platform.last_panel().unwrap().button(ReviewAction::Resend).unwrap().disabled);

        // The snapshot is gone, a second click has nothing to restore.
        let result = workflow
            .handle(&platform, request(ReviewAction::Resend, STAFF, true))
            .await;
        assert!(matches!(result, Err(ReviewError::NothingToRestore)));
    }

    #[tokio::test]
    async fn failed_resend_keeps_snapshot() {
        let fixture = Fixture::new();
        fixture
            .cache
            .store_snapshot(DeletedMessageSnapshot::capture(&message(GUILD, MESSAGE, OFFENDER, "hi")));
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::failing(&["resend_message"]);

        assert!(workflow
            .handle(&platform, request(ReviewAction::Resend, STAFF, true))
            .await
            .is_err());
        assert!(fixture.cache.has_snapshot(MESSAGE));
    }

    #[tokio::test]
    async fn translate_posts_followup_and_ends_disabled() {
        let mut fixture = Fixture::new();
        fixture.provider_completion = Some(Ok("hello there".into()));
        fixture
            .cache
            .store_snapshot(DeletedMessageSnapshot::capture(&message(GUILD, MESSAGE, OFFENDER, "hola")));
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::default();

        workflow
            .handle(&platform, request(ReviewAction::Translate, STAFF, true))
            .await
            .unwrap();

        let panels = platform.panels.lock().unwrap().clone();
        let labels: Vec<_> = panels
            .iter()
            .map(|p| p.button(ReviewAction::Translate).unwrap().label.clone())
            .collect();
        assert_eq!(labels, vec![TRANSLATING_LABEL, TRANSLATED_LABEL]);
        assert!(panels.last().unwrap().button(ReviewAction::Translate).unwrap().disabled);
        assert_eq!(platform.followups.lock().unwrap()[0].1, "hello there");
    }

    #[tokio::test]
    async fn failed_translation_reenables_button() {
        let mut fixture = Fixture::new();
        fixture.provider_completion = Some(Err(ProviderError::Status(500)));
        fixture
            .cache
            .store_snapshot(DeletedMessageSnapshot::capture(&message(GUILD, MESSAGE, OFFENDER, "hola")));
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::default();

        let result = workflow
            .handle(&platform, request(ReviewAction::Translate, STAFF, true))
            .await;
        assert!(matches!(result, Err(ReviewError::Translation(_))));
        let translate = platform.last_panel().unwrap();
        let button = translate.button(ReviewAction::Translate).unwrap();
        assert_eq!(button.label, "Translate");
        assert!(!button.disabled);
    }

    #[tokio::test]
    async fn undeliverable_translation_never_claims_success() {
        let mut fixture = Fixture::new();
        fixture.provider_completion = Some(Ok("hello there".into()));
        fixture
            .cache
            .store_snapshot(DeletedMessageSnapshot::capture(&message(GUILD, MESSAGE, OFFENDER, "hola")));
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::failing(&["send_followup"]);

        let result = workflow
            .handle(&platform, request(ReviewAction::Translate, STAFF, true))
            .await;

        assert!(matches!(result, Err(ReviewError::Platform(PlatformError::Forbidden))));
        let panels = platform.panels.lock().unwrap().clone();
        assert!(panels
            .iter()
            .all(|p| p.button(ReviewAction::Translate).unwrap().label != TRANSLATED_LABEL));
        let button = panels.last().unwrap().button(ReviewAction::Translate).unwrap().clone();
        assert_eq!(button.label, "Translate");
        assert!(!button.disabled);
    }

    #[tokio::test]
    async fn dismiss_deletes_log_and_forgets_snapshot() {
        let fixture = Fixture::new();
        fixture
            .cache
            .store_snapshot(DeletedMessageSnapshot::capture(&message(GUILD, MESSAGE, OFFENDER, "hi")));
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::default();

        workflow
            .handle(&platform, request(ReviewAction::Dismiss, STAFF, true))
            .await
            .unwrap();
        assert_eq!(platform.calls(), vec!["delete_message"]);
        assert!(!fixture.cache.has_snapshot(MESSAGE));
    }

    #[tokio::test]
    async fn kick_and_ban_do_not_disable_buttons() {
        let fixture = Fixture::new();
        let workflow = fixture.workflow();
        let platform = RecordingPlatform::default();

        workflow
            .handle(&platform, request(ReviewAction::Kick, STAFF, true))
            .await
            .unwrap();
        workflow
            .handle(&platform, request(ReviewAction::Ban, STAFF, true))
            .await
            .unwrap();
        assert_eq!(platform.calls(), vec!["kick_member", "ban_member"]);
    }
}
