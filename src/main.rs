// This is the entry point of the moderation bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases, APIs)
// - `discord/` = Discord-specific adapters (commands, events)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::moderation::{
    BufferedStatisticsSink, DirectStatisticsSink, EnforcementEngine, ModerationClient,
    ModerationConfigService, ModerationPipeline, ReviewCache, ReviewCacheConfig, ReviewWorkflow,
    StatisticsSink, ViolationLedger, FLUSH_INTERVAL,
};
use crate::discord::moderation::{message_handler, review_buttons};
use crate::discord::{Data, Error};
use crate::infra::moderation::openai_client::{
    DEFAULT_BASE_URL, DEFAULT_CHAT_MODEL, DEFAULT_MODERATION_MODEL,
};
use crate::infra::moderation::{AuditWebhook, OpenAiClient, SqliteModerationStore};
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Event handler for non-command Discord events.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            if let Err(e) = message_handler::handle_message(ctx, data, new_message, false).await {
                tracing::error!(message_id = new_message.id.get(), "Error moderating message: {}", e);
            }
        }
        serenity::FullEvent::MessageUpdate { new, event, .. } => {
            if let Err(e) =
                message_handler::handle_message_update(ctx, data, new.as_ref(), event).await
            {
                tracing::error!(message_id = event.id.get(), "Error moderating edited message: {}", e);
            }
        }
        serenity::FullEvent::InteractionCreate {
            interaction: serenity::Interaction::Component(component),
        } => {
            if let Err(e) = review_buttons::handle_component(ctx, data, component).await {
                tracing::error!("Error handling review button: {}", e);
            }
        }
        _ => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let token = std::env::var("DISCORD_TOKEN")
        .context("Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.")?;

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    let data_dir = env_or("AUTOMOD_DATA_DIR", "data");
    std::fs::create_dir_all(&data_dir).context("Failed to create data directory for SQLite files")?;
    let db_path = format!("{}/automod.db", data_dir);

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================

    let store = SqliteModerationStore::connect(&db_path)
        .await
        .context("Failed to initialize SQLite store")?;

    let api_key = std::env::var("OPENAI_API_KEY").ok();
    if api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
        tracing::warn!("OPENAI_API_KEY is not set; AI moderation is inactive");
    }
    let client = Arc::new(ModerationClient::new(OpenAiClient::new(
        api_key,
        env_or("OPENAI_BASE_URL", DEFAULT_BASE_URL),
        env_or("OPENAI_MODERATION_MODEL", DEFAULT_MODERATION_MODEL),
        env_or("OPENAI_CHAT_MODEL", DEFAULT_CHAT_MODEL),
    )));

    let stats: Arc<dyn StatisticsSink> = match env_or("AUTOMOD_STATS_MODE", "buffered").as_str() {
        "direct" => Arc::new(DirectStatisticsSink::new(store.clone())),
        "buffered" => Arc::new(BufferedStatisticsSink::new(store.clone())),
        other => anyhow::bail!("AUTOMOD_STATS_MODE must be `direct` or `buffered`, got `{}`", other),
    };

    let audit = Arc::new(AuditWebhook::new(
        std::env::var("AUDIT_WEBHOOK_URL").ok(),
        std::env::var("AUDIT_WEBHOOK_SECRET").unwrap_or_default(),
    ));

    let config = Arc::new(ModerationConfigService::new(store.clone()));
    let ledger = Arc::new(ViolationLedger::new(store));
    let cache = Arc::new(ReviewCache::new(ReviewCacheConfig::default()));

    let enforcement = EnforcementEngine::new(Arc::clone(&cache), Arc::clone(&stats), audit);
    let pipeline = Arc::new(ModerationPipeline::new(
        Arc::clone(&config),
        Arc::clone(&client),
        Arc::clone(&ledger),
        Arc::clone(&stats),
        Arc::clone(&cache),
        enforcement,
    ));
    let review = Arc::new(ReviewWorkflow::new(
        Arc::clone(&ledger),
        Arc::clone(&config),
        Arc::clone(&client),
        cache,
        Arc::clone(&stats),
        env_or("TRANSLATE_TARGET_LANGUAGE", "English"),
    ));

    let data = Data {
        pipeline,
        review,
        config,
        ledger,
        stats: Arc::clone(&stats),
        client,
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![discord::moderation::commands::automod()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("Bot is starting up...");

                // Register slash commands globally (can take up to an hour to propagate)
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("Commands registered, bot is ready");

                // Background statistics flush. A no-op for the direct sink.
                let stats = Arc::clone(&data.stats);
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(FLUSH_INTERVAL);
                    interval.tick().await;
                    loop {
                        interval.tick().await;
                        if let Err(e) = stats.flush().await {
                            tracing::warn!("Statistics flush failed: {}", e);
                        }
                    }
                });

                Ok(data)
            })
        })
        .build();

    let mut settings = serenity::cache::Settings::default();
    settings.max_messages = 10000;

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .cache_settings(settings)
        .await
        .context("Error creating client")?;

    // Flush buffered statistics before exiting on Ctrl+C.
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
            if let Err(e) = stats.flush().await {
                tracing::warn!("Final statistics flush failed: {}", e);
            }
            shard_manager.shutdown_all().await;
        }
    });

    client.start().await.context("Error running bot")?;
    Ok(())
}
