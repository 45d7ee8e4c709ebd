// AI moderation slash commands.

use super::embeds;
use crate::core::moderation::{
    is_flagged, normalize, noteworthy, reset_confirmed, ConfigFlag, ContentPart, SettingsError, StatScope,
    VoteType, WhitelistKind, RESET_CONFIRMATION_PHRASE, RESET_CONFIRMATION_WINDOW,
};
use crate::discord::{Context, Error};
use chrono::Utc;
use poise::serenity_prelude as serenity;

/// Discord caps member timeouts at 28 days.
const MAX_TIMEOUT_MINUTES: u32 = 28 * 24 * 60;

/// AI moderation settings, statistics and history.
#[poise::command(
    slash_command,
    subcommands(
        "status",
        "threshold",
        "timeout",
        "logchannel",
        "toggle",
        "deletion",
        "nsfwbypass",
        "debug",
        "monitoring",
        "whitelist_channel",
        "whitelist_role",
        "whitelist_user",
        "whitelist_category",
        "stats",
        "history",
        "feedback",
        "explain",
        "resetstats"
    ),
    guild_only
)]
pub async fn automod(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show the current AI moderation settings.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let config = ctx.data().config.get_config(guild_id.get()).await?;

    let mut embed = embeds::status_embed(&config);
    if !ctx.data().client.is_configured() {
        embed = embed.description("⚠️ No classifier API key is configured; moderation is inactive.");
    }
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Set the score above which messages are moderated.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn threshold(
    ctx: Context<'_>,
    #[description = "Threshold between 0.0 and 1.0"]
    #[min = 0.0]
    #[max = 1.0]
    value: f64,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    match ctx.data().config.set_threshold(guild_id.get(), value).await {
        Ok(threshold) => {
            ctx.say(format!("✅ Moderation threshold set to **{:.2}**.", threshold))
                .await?;
        }
        Err(SettingsError::Invalid(e)) => {
            ctx.send(poise::CreateReply::default().content(format!("❌ {}", e)).ephemeral(true))
                .await?;
        }
        Err(SettingsError::Store(e)) => return Err(e.into()),
    }
    Ok(())
}

/// Set the timeout applied to moderated members (0 disables timeouts).
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn timeout(
    ctx: Context<'_>,
    #[description = "Timeout length in minutes"]
    #[max = 40320]
    minutes: u32,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let minutes = minutes.min(MAX_TIMEOUT_MINUTES);

    ctx.data()
        .config
        .set_timeout_minutes(guild_id.get(), minutes)
        .await?;

    if minutes == 0 {
        ctx.say("✅ Automatic timeouts are now **disabled**.").await?;
    } else {
        ctx.say(format!("✅ Moderated members will be timed out for **{} minutes**.", minutes))
            .await?;
    }
    Ok(())
}

/// Set or clear the channel that receives moderation logs.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn logchannel(
    ctx: Context<'_>,
    #[description = "Log channel (leave empty to disable logging)"] channel: Option<serenity::GuildChannel>,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let channel_id = channel.as_ref().map(|c| c.id.get());

    ctx.data()
        .config
        .set_log_channel(guild_id.get(), channel_id)
        .await?;

    match channel_id {
        Some(id) => ctx.say(format!("✅ Moderation logs will be posted in <#{}>.", id)).await?,
        None => ctx.say("✅ Moderation logging disabled.").await?,
    };
    Ok(())
}

async fn toggle_setting(ctx: Context<'_>, flag: ConfigFlag) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let enabled = ctx.data().config.toggle_flag(guild_id.get(), flag).await?;

    ctx.say(format!(
        "{} {} is now **{}**.",
        if enabled { "✅" } else { "❌" },
        flag,
        if enabled { "enabled" } else { "disabled" }
    ))
    .await?;
    Ok(())
}

/// Turn AI moderation on or off for this server.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn toggle(ctx: Context<'_>) -> Result<(), Error> {
    toggle_setting(ctx, ConfigFlag::ModerationEnabled).await
}

/// Toggle deleting messages that cross the threshold.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn deletion(ctx: Context<'_>) -> Result<(), Error> {
    toggle_setting(ctx, ConfigFlag::DeleteMessages).await
}

/// Toggle ignoring sexual content in NSFW channels.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn nsfwbypass(ctx: Context<'_>) -> Result<(), Error> {
    toggle_setting(ctx, ConfigFlag::BypassNsfw).await
}

/// Toggle posting classification details for every message.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn debug(ctx: Context<'_>) -> Result<(), Error> {
    toggle_setting(ctx, ConfigFlag::DebugMode).await
}

/// Toggle telling members their messages are checked after a removal.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn monitoring(ctx: Context<'_>) -> Result<(), Error> {
    toggle_setting(ctx, ConfigFlag::MonitoringWarning).await
}

async fn toggle_whitelist(
    ctx: Context<'_>,
    kind: WhitelistKind,
    id: u64,
    mention: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let added = ctx
        .data()
        .config
        .toggle_whitelist(guild_id.get(), kind, id)
        .await?;

    if added {
        ctx.say(format!("✅ Whitelisted {} {}; it will no longer be moderated.", kind, mention))
            .await?;
    } else {
        ctx.say(format!("❌ Removed {} {} from the whitelist.", kind, mention))
            .await?;
    }
    Ok(())
}

/// Add or remove a channel from the moderation whitelist.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn whitelist_channel(
    ctx: Context<'_>,
    #[description = "Channel to exempt"] channel: serenity::GuildChannel,
) -> Result<(), Error> {
    toggle_whitelist(ctx, WhitelistKind::Channel, channel.id.get(), format!("<#{}>", channel.id)).await
}

/// Add or remove a role from the moderation whitelist.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn whitelist_role(
    ctx: Context<'_>,
    #[description = "Role to exempt"] role: serenity::Role,
) -> Result<(), Error> {
    toggle_whitelist(ctx, WhitelistKind::Role, role.id.get(), format!("<@&{}>", role.id)).await
}

/// Add or remove a member from the moderation whitelist.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn whitelist_user(
    ctx: Context<'_>,
    #[description = "Member to exempt"] user: serenity::User,
) -> Result<(), Error> {
    toggle_whitelist(ctx, WhitelistKind::User, user.id.get(), format!("<@{}>", user.id)).await
}

/// Add or remove a channel category from the moderation whitelist.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn whitelist_category(
    ctx: Context<'_>,
    #[description = "Category to exempt"] category: serenity::GuildChannel,
) -> Result<(), Error> {
    if category.kind != serenity::ChannelType::Category {
        ctx.send(
            poise::CreateReply::default()
                .content("❌ That channel is not a category.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }
    toggle_whitelist(ctx, WhitelistKind::Category, category.id.get(), category.name.clone()).await
}

/// Show moderation statistics for this server and across all servers.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn stats(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let stats = &ctx.data().stats;

    let guild = stats.snapshot(StatScope::Guild(guild_id.get())).await?;
    let global = stats.snapshot(StatScope::Global).await?;

    ctx.send(
        poise::CreateReply::default()
            .embed(embeds::stats_embed("📊 This server", &guild))
            .embed(embeds::stats_embed("🌐 All servers", &global)),
    )
    .await?;
    Ok(())
}

fn history_buttons(page: usize, total_pages: usize) -> Vec<serenity::CreateActionRow> {
    vec![serenity::CreateActionRow::Buttons(vec![
        serenity::CreateButton::new("history_prev")
            .label("◀ Previous")
            .style(serenity::ButtonStyle::Primary)
            .disabled(page == 0),
        serenity::CreateButton::new("history_next")
            .label("Next ▶")
            .style(serenity::ButtonStyle::Primary)
            .disabled(page + 1 >= total_pages),
    ])]
}

/// Show a member's moderation history.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn history(
    ctx: Context<'_>,
    #[description = "Member to look up"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let history = ctx.data().ledger.history(guild_id.get(), user.id.get()).await?;

    let total_pages = embeds::history_page_count(&history);
    let mut page = 0;

    let msg = ctx
        .send(
            poise::CreateReply::default()
                .embed(embeds::history_embed(&user, &history, page, Utc::now()))
                .components(history_buttons(page, total_pages)),
        )
        .await?;

    if total_pages == 1 {
        return Ok(());
    }

    let msg_id = msg.message().await?.id;

    while let Some(mci) = serenity::ComponentInteractionCollector::new(ctx)
        .author_id(ctx.author().id)
        .channel_id(ctx.channel_id())
        .timeout(std::time::Duration::from_secs(60 * 2))
        .filter(move |mci| mci.message.id == msg_id)
        .await
    {
        match mci.data.custom_id.as_str() {
            "history_prev" => page = page.saturating_sub(1),
            "history_next" => page = (page + 1).min(total_pages - 1),
            _ => continue,
        }

        if let Err(e) = mci.defer(ctx.http()).await {
            tracing::warn!("Error deferring history interaction: {:?}", e);
            continue;
        }

        if let Err(e) = msg
            .edit(
                ctx,
                poise::CreateReply::default()
                    .embed(embeds::history_embed(&user, &history, page, Utc::now()))
                    .components(history_buttons(page, total_pages)),
            )
            .await
        {
            tracing::warn!("Error updating history page: {:?}", e);
        }
    }

    let _ = msg
        .edit(ctx, poise::CreateReply::default().components(vec![]))
        .await;
    Ok(())
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum FeedbackVote {
    #[name = "Too weak"]
    TooWeak,
    #[name = "Too strict"]
    TooStrict,
    #[name = "Just right"]
    JustRight,
}

impl From<FeedbackVote> for VoteType {
    fn from(vote: FeedbackVote) -> Self {
        match vote {
            FeedbackVote::TooWeak => VoteType::TooWeak,
            FeedbackVote::TooStrict => VoteType::TooStrict,
            FeedbackVote::JustRight => VoteType::JustRight,
        }
    }
}

/// Tell the moderators how strict moderation feels.
#[poise::command(slash_command, guild_only)]
pub async fn feedback(
    ctx: Context<'_>,
    #[description = "How does moderation feel?"] vote: FeedbackVote,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let user_id = ctx.author().id.get();
    let config = &ctx.data().config;
    let now = Utc::now();

    if let Some(next) = config.claim_vote(user_id, now).await? {
        ctx.send(
            poise::CreateReply::default()
                .content(format!(
                    "⏳ You already voted recently. You can vote again <t:{}:R>.",
                    next.timestamp()
                ))
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }

    let result = config.cast_vote(guild_id.get(), vote.into(), now).await?;

    let detail = if result.shifted {
        format!("The threshold is now **{:.2}**.", result.threshold)
    } else {
        "Your vote was counted.".to_string()
    };
    ctx.send(
        poise::CreateReply::default()
            .content(format!("🗳️ Thanks for your feedback! {}", detail))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Classify a piece of text and explain the scores.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn explain(
    ctx: Context<'_>,
    #[description = "Text to classify"] text: String,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;
    let data = ctx.data();

    if !data.client.is_configured() {
        ctx.say("❌ No classifier API key is configured.").await?;
        return Ok(());
    }

    ctx.defer().await?;

    let normalized = normalize(&text)?;
    let outcome = data
        .client
        .classify(&[ContentPart::Text(normalized.clone())])
        .await?;
    if let Some(code) = outcome.error_code {
        ctx.say(format!("❌ Classification failed ({}).", code)).await?;
        return Ok(());
    }

    let threshold = data.config.get_config(guild_id.get()).await?.threshold;
    let flagged = is_flagged(&outcome.scores, threshold);
    let explanation = match data.client.explain(&normalized, &outcome.scores).await {
        Ok(explanation) => explanation,
        Err(e) => {
            tracing::warn!(guild_id = guild_id.get(), "Explanation request failed: {e}");
            "No explanation available.".to_string()
        }
    };

    let mut scores = embeds::format_scores(&noteworthy(&outcome.scores));
    if scores.is_empty() {
        scores = "Nothing above the noise floor".to_string();
    }

    let embed = serenity::CreateEmbed::new()
        .title("🔎 Moderation explanation")
        .description(explanation)
        .color(if flagged { 0xFF0000 } else { 0x00FF00 })
        .field("Scores", scores, true)
        .field(
            "Result",
            format!(
                "{} at threshold {:.2}",
                if flagged { "Would be moderated" } else { "Would pass" },
                threshold
            ),
            true,
        );
    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Wipe all moderation statistics, violation history and feedback.
#[poise::command(slash_command, owners_only)]
pub async fn resetstats(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say(format!(
        "⚠️ This permanently deletes statistics, violation history and feedback for **every** server.\n\
         Type `{}` within {} seconds to confirm.",
        RESET_CONFIRMATION_PHRASE,
        RESET_CONFIRMATION_WINDOW.as_secs()
    ))
    .await?;

    let reply = serenity::MessageCollector::new(ctx)
        .author_id(ctx.author().id)
        .channel_id(ctx.channel_id())
        .timeout(RESET_CONFIRMATION_WINDOW)
        .await;

    if !reset_confirmed(reply.as_ref().map(|m| m.content.as_str())) {
        ctx.say("Reset cancelled.").await?;
        return Ok(());
    }

    let data = ctx.data();
    data.stats.reset_all().await?;
    data.ledger.reset_all().await?;
    data.config.reset_feedback().await?;

    tracing::warn!(user_id = ctx.author().id.get(), "All moderation statistics reset");
    ctx.say("✅ All statistics, violation history and feedback have been reset.")
        .await?;
    Ok(())
}
