// Moderation pipeline - normalize, classify, evaluate, record, enforce.
//
// One call handles one message from start to finish; steps run strictly in
// order and images are classified one after another.

use super::classifier::{
    ClassificationError, ClassificationOutcome, CompletionProvider, ContentPart, ModerationClient,
    ModerationProvider,
};
use super::config_service::{GuildConfigStore, ModerationConfigService};
use super::enforcement::{EnforcementEngine, EnforcementReport};
use super::moderation_models::{GuildModerationConfig, ModeratedMessage, ScoreMap, StoreError, Verdict};
use super::normalizer::{normalize, NormalizationError};
use super::platform::{DebugReport, ModerationPlatform};
use super::review_cache::ReviewCache;
use super::statistics::{StatEvent, StatisticsSink};
use super::threshold::{above, apply_nsfw_bypass, is_flagged, merge_max};
use super::violation_ledger::{ViolationLedger, ViolationStore};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Normalization(#[from] NormalizationError),

    #[error(transparent)]
    Classification(#[from] ClassificationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    Whitelisted,
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// No classifier credential; moderation is silently off.
    Inactive,
    Skipped(SkipReason),
    Clean,
    Enforced(EnforcementReport),
}

/// Classification results for one message before enforcement.
struct Evaluation {
    text_scores: ScoreMap,
    text_flagged: bool,
    image_scores: Vec<(String, ScoreMap)>,
    flagged_images: Vec<String>,
    error_codes: Vec<String>,
}

pub struct ModerationPipeline<V: ViolationStore, G: GuildConfigStore, P> {
    config: Arc<ModerationConfigService<G>>,
    client: Arc<ModerationClient<P>>,
    ledger: Arc<ViolationLedger<V>>,
    stats: Arc<dyn StatisticsSink>,
    cache: Arc<ReviewCache>,
    enforcement: EnforcementEngine,
}

impl<V, G, P> ModerationPipeline<V, G, P>
where
    V: ViolationStore,
    G: GuildConfigStore,
    P: ModerationProvider + CompletionProvider,
{
    pub fn new(
        config: Arc<ModerationConfigService<G>>,
        client: Arc<ModerationClient<P>>,
        ledger: Arc<ViolationLedger<V>>,
        stats: Arc<dyn StatisticsSink>,
        cache: Arc<ReviewCache>,
        enforcement: EnforcementEngine,
    ) -> Self {
        Self {
            config,
            client,
            ledger,
            stats,
            cache,
            enforcement,
        }
    }

    pub async fn process(
        &self,
        platform: &dyn ModerationPlatform,
        message: &ModeratedMessage,
    ) -> Result<PipelineOutcome, PipelineError> {
        if !self.client.is_configured() {
            return Ok(PipelineOutcome::Inactive);
        }

        let config = self.config.get_config(message.guild_id).await?;
        if !config.moderation_enabled {
            return Ok(PipelineOutcome::Skipped(SkipReason::Disabled));
        }
        if config.whitelist.exempts(message) {
            return Ok(PipelineOutcome::Skipped(SkipReason::Whitelisted));
        }

        let normalized = normalize(&message.content)?;
        if normalized.is_empty() && message.image_urls.is_empty() {
            return Ok(PipelineOutcome::Skipped(SkipReason::Empty));
        }

        if !message.edited {
            self.stats
                .record(
                    message.guild_id,
                    StatEvent::MessageSeen {
                        images: message.image_urls.len() as u64,
                    },
                )
                .await;
        }

        let evaluation = self.evaluate(&config, message, &normalized).await?;

        // Replaces whatever an earlier run (e.g. before an edit) associated.
        self.cache
            .set_flagged_images(message.message_id, evaluation.flagged_images.clone());

        let flagged = evaluation.text_flagged || !evaluation.flagged_images.is_empty();
        if config.debug_mode {
            self.send_debug(platform, &config, message, &normalized, &evaluation, flagged)
                .await;
        }
        if !flagged {
            return Ok(PipelineOutcome::Clean);
        }

        let verdict = Self::verdict(evaluation);
        self.record(&config, message, &verdict).await;

        let report = self
            .enforcement
            .enforce(platform, &config, message, &verdict)
            .await;
        Ok(PipelineOutcome::Enforced(report))
    }

    async fn evaluate(
        &self,
        config: &GuildModerationConfig,
        message: &ModeratedMessage,
        normalized: &str,
    ) -> Result<Evaluation, PipelineError> {
        let mut error_codes = Vec::new();
        let mut note_error = |outcome: &ClassificationOutcome| {
            if let Some(code) = &outcome.error_code {
                tracing::warn!(message_id = message.message_id, error_code = %code, "Moderation degraded to empty scores");
                error_codes.push(code.clone());
            }
        };

        let text_scores = if normalized.is_empty() {
            ScoreMap::new()
        } else {
            let outcome = self
                .client
                .classify(&[ContentPart::Text(normalized.to_string())])
                .await?;
            note_error(&outcome);
            apply_nsfw_bypass(outcome.scores, config.bypass_nsfw, message.channel_nsfw)
        };
        let text_flagged = is_flagged(&text_scores, config.threshold);

        let mut image_scores = Vec::with_capacity(message.image_urls.len());
        let mut flagged_images = Vec::new();
        for (url, outcome) in self.client.classify_images(&message.image_urls).await? {
            note_error(&outcome);
            let scores = apply_nsfw_bypass(outcome.scores, config.bypass_nsfw, message.channel_nsfw);
            if is_flagged(&scores, config.threshold) {
                flagged_images.push(url.clone());
            }
            image_scores.push((url, scores));
        }

        Ok(Evaluation {
            text_scores,
            text_flagged,
            image_scores,
            flagged_images,
            error_codes,
        })
    }

    /// Text scores count only when the text itself was flagged; each flagged
    /// image contributes its scores, highest per category wins.
    fn verdict(evaluation: Evaluation) -> Verdict {
        let mut scores = if evaluation.text_flagged {
            evaluation.text_scores
        } else {
            ScoreMap::new()
        };
        for (url, image) in &evaluation.image_scores {
            if evaluation.flagged_images.contains(url) {
                merge_max(&mut scores, image);
            }
        }
        Verdict {
            scores,
            text_flagged: evaluation.text_flagged,
            flagged_images: evaluation.flagged_images,
        }
    }

    async fn record(&self, config: &GuildModerationConfig, message: &ModeratedMessage, verdict: &Verdict) {
        if verdict.text_flagged {
            self.stats.record(message.guild_id, StatEvent::TextModerated).await;
        }
        if !verdict.flagged_images.is_empty() {
            self.stats
                .record(
                    message.guild_id,
                    StatEvent::ImagesModerated(verdict.flagged_images.len() as u64),
                )
                .await;
        }
        let categories: Vec<String> = above(&verdict.scores, config.threshold).into_keys().collect();
        self.stats
            .record(message.guild_id, StatEvent::CategoriesFlagged(categories))
            .await;

        if let Err(e) = self
            .ledger
            .record(message, &verdict.scores, &verdict.flagged_images)
            .await
        {
            tracing::error!(message_id = message.message_id, "Failed to record violation: {e}");
        }
    }

    async fn send_debug(
        &self,
        platform: &dyn ModerationPlatform,
        config: &GuildModerationConfig,
        message: &ModeratedMessage,
        normalized: &str,
        evaluation: &Evaluation,
        flagged: bool,
    ) {
        let Some(log_channel_id) = config.log_channel_id else {
            return;
        };
        let report = DebugReport {
            message_id: message.message_id,
            channel_id: message.channel_id,
            author_id: message.author.id,
            normalized_text: normalized.to_string(),
            text_scores: evaluation.text_scores.clone(),
            image_scores: evaluation.image_scores.clone(),
            error_codes: evaluation.error_codes.clone(),
            threshold: config.threshold,
            flagged,
        };
        if let Err(e) = platform.send_debug_log(log_channel_id, &report).await {
            tracing::warn!(log_channel_id, "Failed to post debug log: {e}");
        }
    }
}
