// Discord layer - commands, event handlers and the serenity platform adapter.

#[path = "moderation/mod.rs"]
pub mod moderation;

use crate::core::moderation::{
    ModerationClient, ModerationConfigService, ModerationPipeline, ReviewWorkflow, StatisticsSink,
    ViolationLedger,
};
use crate::infra::moderation::{OpenAiClient, SqliteModerationStore};
use std::sync::Arc;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

pub type Pipeline = ModerationPipeline<SqliteModerationStore, SqliteModerationStore, OpenAiClient>;
pub type Review = ReviewWorkflow<SqliteModerationStore, SqliteModerationStore, OpenAiClient>;

/// Shared state handed to every command and event.
pub struct Data {
    pub pipeline: Arc<Pipeline>,
    pub review: Arc<Review>,
    pub config: Arc<ModerationConfigService<SqliteModerationStore>>,
    pub ledger: Arc<ViolationLedger<SqliteModerationStore>>,
    pub stats: Arc<dyn StatisticsSink>,
    pub client: Arc<ModerationClient<OpenAiClient>>,
}
