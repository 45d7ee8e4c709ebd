// Serenity implementation of the moderation platform port.

use super::embeds;
use crate::core::moderation::{
    DebugReport, DeletedMessageSnapshot, ModerationPlatform, PlatformError, ReviewLogEntry,
    ReviewPanel, WarningNotice,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use poise::serenity_prelude as serenity;
use std::sync::Arc;

pub struct SerenityPlatform {
    http: Arc<serenity::Http>,
}

impl SerenityPlatform {
    pub fn new(http: Arc<serenity::Http>) -> Self {
        Self { http }
    }

    fn http(&self) -> &serenity::Http {
        &self.http
    }
}

/// 403 and 404 get their own variants; everything else is a generic failure.
fn platform_err(e: serenity::Error) -> PlatformError {
    if let serenity::Error::Http(http_err) = &e {
        match http_err.status_code().map(|s| s.as_u16()) {
            Some(403) => return PlatformError::Forbidden,
            Some(404) => return PlatformError::NotFound,
            _ => {}
        }
    }
    PlatformError::Request(e.to_string())
}

fn timestamp(at: DateTime<Utc>) -> Result<serenity::Timestamp, PlatformError> {
    serenity::Timestamp::from_unix_timestamp(at.timestamp())
        .map_err(|e| PlatformError::Request(format!("invalid timestamp: {e}")))
}

#[async_trait]
impl ModerationPlatform for SerenityPlatform {
    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), PlatformError> {
        serenity::ChannelId::new(channel_id)
            .delete_message(self.http(), serenity::MessageId::new(message_id))
            .await
            .map_err(platform_err)
    }

    async fn timeout_member(
        &self,
        guild_id: u64,
        user_id: u64,
        until: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), PlatformError> {
        let until = timestamp(until)?;
        serenity::GuildId::new(guild_id)
            .edit_member(
                self.http(),
                serenity::UserId::new(user_id),
                serenity::EditMember::new()
                    .disable_communication_until_datetime(until)
                    .audit_log_reason(reason),
            )
            .await
            .map(|_| ())
            .map_err(platform_err)
    }

    async fn clear_timeout(&self, guild_id: u64, user_id: u64) -> Result<(), PlatformError> {
        serenity::GuildId::new(guild_id)
            .edit_member(
                self.http(),
                serenity::UserId::new(user_id),
                serenity::EditMember::new().enable_communication(),
            )
            .await
            .map(|_| ())
            .map_err(platform_err)
    }

    async fn is_timed_out(&self, guild_id: u64, user_id: u64) -> Result<bool, PlatformError> {
        let member = serenity::GuildId::new(guild_id)
            .member(self.http(), serenity::UserId::new(user_id))
            .await
            .map_err(platform_err)?;
        Ok(member
            .communication_disabled_until
            .is_some_and(|until| until.unix_timestamp() > Utc::now().timestamp()))
    }

    async fn kick_member(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), PlatformError> {
        serenity::GuildId::new(guild_id)
            .kick_with_reason(self.http(), serenity::UserId::new(user_id), reason)
            .await
            .map_err(platform_err)
    }

    async fn ban_member(&self, guild_id: u64, user_id: u64, reason: &str) -> Result<(), PlatformError> {
        serenity::GuildId::new(guild_id)
            .ban_with_reason(self.http(), serenity::UserId::new(user_id), 0, reason)
            .await
            .map_err(platform_err)
    }

    async fn send_warning(&self, user_id: u64, notice: &WarningNotice) -> Result<(), PlatformError> {
        let dm = serenity::UserId::new(user_id)
            .create_dm_channel(self.http())
            .await
            .map_err(platform_err)?;
        dm.send_message(
            self.http(),
            serenity::CreateMessage::new().embed(embeds::warning_embed(notice)),
        )
        .await
        .map(|_| ())
        .map_err(platform_err)
    }

    async fn resend_message(&self, snapshot: &DeletedMessageSnapshot) -> Result<u64, PlatformError> {
        let message = serenity::ChannelId::new(snapshot.channel_id)
            .send_message(
                self.http(),
                serenity::CreateMessage::new().embeds(embeds::restored_embeds(snapshot)),
            )
            .await
            .map_err(platform_err)?;
        Ok(message.id.get())
    }

    async fn send_review_log(
        &self,
        log_channel_id: u64,
        entry: &ReviewLogEntry,
        panel: &ReviewPanel,
    ) -> Result<u64, PlatformError> {
        let message = serenity::ChannelId::new(log_channel_id)
            .send_message(
                self.http(),
                serenity::CreateMessage::new()
                    .embed(embeds::review_log_embed(entry))
                    .components(embeds::panel_components(panel)),
            )
            .await
            .map_err(platform_err)?;
        Ok(message.id.get())
    }

    async fn update_review_panel(
        &self,
        log_channel_id: u64,
        log_message_id: u64,
        panel: &ReviewPanel,
    ) -> Result<(), PlatformError> {
        serenity::ChannelId::new(log_channel_id)
            .edit_message(
                self.http(),
                serenity::MessageId::new(log_message_id),
                serenity::EditMessage::new().components(embeds::panel_components(panel)),
            )
            .await
            .map(|_| ())
            .map_err(platform_err)
    }

    async fn send_followup(
        &self,
        log_channel_id: u64,
        log_message_id: u64,
        title: &str,
        text: &str,
    ) -> Result<(), PlatformError> {
        let channel = serenity::ChannelId::new(log_channel_id);
        channel
            .send_message(
                self.http(),
                serenity::CreateMessage::new()
                    .embed(embeds::followup_embed(title, text))
                    .reference_message((channel, serenity::MessageId::new(log_message_id))),
            )
            .await
            .map(|_| ())
            .map_err(platform_err)
    }

    async fn send_debug_log(&self, log_channel_id: u64, report: &DebugReport) -> Result<(), PlatformError> {
        serenity::ChannelId::new(log_channel_id)
            .send_message(
                self.http(),
                serenity::CreateMessage::new().embed(embeds::debug_embed(report)),
            )
            .await
            .map(|_| ())
            .map_err(platform_err)
    }

    async fn send_monitoring_notice(&self, channel_id: u64, user_id: u64) -> Result<(), PlatformError> {
        serenity::ChannelId::new(channel_id)
            .say(
                self.http(),
                format!(
                    "<@{user_id}> Messages in this server are checked by automated moderation. \
                     Please keep it friendly."
                ),
            )
            .await
            .map(|_| ())
            .map_err(platform_err)
    }
}
