// Message create/update events -> moderation pipeline.

use super::SerenityPlatform;
use crate::core::moderation::{MessageAuthor, ModeratedMessage, PipelineOutcome};
use crate::discord::{Data, Error};
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "gif", "webp", "bmp"];

/// Attachments count as images by MIME type, falling back to the extension.
pub fn looks_like_image(content_type: Option<&str>, filename: &str) -> bool {
    if let Some(content_type) = content_type {
        return content_type.starts_with("image/");
    }
    filename
        .rsplit_once('.')
        .is_some_and(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

async fn to_moderated_message(
    ctx: &serenity::Context,
    guild_id: serenity::GuildId,
    message: &serenity::Message,
    edited: bool,
) -> ModeratedMessage {
    let guild_name = guild_id.name(&ctx.cache).unwrap_or_default();

    let channel = match message.channel(ctx).await {
        Ok(channel) => channel.guild(),
        Err(e) => {
            tracing::warn!(channel_id = message.channel_id.get(), "Failed to resolve channel: {e}");
            None
        }
    };
    let (channel_name, category_id, channel_nsfw) = match &channel {
        Some(c) => (c.name.clone(), c.parent_id.map(|id| id.get()), c.nsfw),
        None => (String::new(), None, false),
    };

    // Gateway messages carry the member; fetched ones (edits) don't.
    let role_ids = match &message.member {
        Some(member) => member.roles.iter().map(|r| r.get()).collect(),
        None => match guild_id.member(ctx, message.author.id).await {
            Ok(member) => member.roles.iter().map(|r| r.get()).collect(),
            Err(e) => {
                tracing::debug!(user_id = message.author.id.get(), "Member lookup failed: {e}");
                Vec::new()
            }
        },
    };

    let image_urls = message
        .attachments
        .iter()
        .filter(|a| looks_like_image(a.content_type.as_deref(), &a.filename))
        .map(|a| a.url.clone())
        .collect();

    ModeratedMessage {
        guild_id: guild_id.get(),
        guild_name,
        channel_id: message.channel_id.get(),
        channel_name,
        category_id,
        channel_nsfw,
        message_id: message.id.get(),
        author: MessageAuthor {
            id: message.author.id.get(),
            name: message.author.name.clone(),
            avatar_url: Some(message.author.face()),
            role_ids,
        },
        content: message.content.clone(),
        image_urls,
        sent_at: DateTime::from_timestamp(message.timestamp.unix_timestamp(), 0).unwrap_or_else(Utc::now),
        edited,
    }
}

pub async fn handle_message(
    ctx: &serenity::Context,
    data: &Data,
    message: &serenity::Message,
    edited: bool,
) -> Result<(), Error> {
    if message.author.bot {
        return Ok(());
    }
    let Some(guild_id) = message.guild_id else {
        return Ok(());
    };

    let moderated = to_moderated_message(ctx, guild_id, message, edited).await;
    let platform = SerenityPlatform::new(ctx.http.clone());

    match data.pipeline.process(&platform, &moderated).await? {
        PipelineOutcome::Enforced(report) => tracing::info!(
            guild_id = guild_id.get(),
            message_id = moderated.message_id,
            user_id = moderated.author.id,
            edited,
            ?report,
            "Message moderated"
        ),
        outcome => tracing::debug!(message_id = moderated.message_id, ?outcome, "Message processed"),
    }
    Ok(())
}

/// Re-run edited messages. Updates that only add link previews are ignored.
pub async fn handle_message_update(
    ctx: &serenity::Context,
    data: &Data,
    new: Option<&serenity::Message>,
    event: &serenity::MessageUpdateEvent,
) -> Result<(), Error> {
    if event.content.is_none() && event.attachments.is_none() {
        return Ok(());
    }
    if event.guild_id.is_none() || event.author.as_ref().is_some_and(|a| a.bot) {
        return Ok(());
    }

    let mut message = match new {
        Some(message) => message.clone(),
        None => event.channel_id.message(ctx, event.id).await?,
    };
    if message.guild_id.is_none() {
        message.guild_id = event.guild_id;
    }
    handle_message(ctx, data, &message, true).await
}
