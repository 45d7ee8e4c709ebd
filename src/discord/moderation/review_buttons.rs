// Review panel button clicks -> review workflow.

use super::SerenityPlatform;
use crate::core::moderation::{ButtonState, ReviewButtonId, ReviewError, ReviewPanel, ReviewRequest};
use crate::discord::{Data, Error};
use poise::serenity_prelude as serenity;

/// Rebuild the panel shown on a log message from its buttons.
///
/// Buttons that belong to another case or aren't review buttons are ignored.
pub fn panel_from_buttons<'a>(
    clicked: &ReviewButtonId,
    buttons: impl IntoIterator<Item = (&'a str, Option<&'a str>, bool)>,
) -> ReviewPanel {
    let buttons = buttons
        .into_iter()
        .filter_map(|(custom_id, label, disabled)| {
            let id = ReviewButtonId::parse(custom_id)?;
            if id.message_id != clicked.message_id || id.user_id != clicked.user_id {
                return None;
            }
            Some(ButtonState {
                action: id.action,
                label: label.unwrap_or(id.action.default_label()).to_string(),
                disabled,
            })
        })
        .collect();

    ReviewPanel {
        message_id: clicked.message_id,
        user_id: clicked.user_id,
        buttons,
    }
}

fn panel_from_message(clicked: &ReviewButtonId, message: &serenity::Message) -> ReviewPanel {
    let buttons = message
        .components
        .iter()
        .flat_map(|row| row.components.iter())
        .filter_map(|component| match component {
            serenity::ActionRowComponent::Button(button) => match &button.data {
                serenity::ButtonKind::NonLink { custom_id, .. } => {
                    Some((custom_id.as_str(), button.label.as_deref(), button.disabled))
                }
                _ => None,
            },
            _ => None,
        });
    panel_from_buttons(clicked, buttons)
}

fn is_staff(interaction: &serenity::ComponentInteraction) -> bool {
    interaction
        .member
        .as_ref()
        .and_then(|m| m.permissions)
        .is_some_and(|p| p.administrator() || p.manage_guild())
}

pub async fn handle_component(
    ctx: &serenity::Context,
    data: &Data,
    interaction: &serenity::ComponentInteraction,
) -> Result<(), Error> {
    let Some(clicked) = ReviewButtonId::parse(&interaction.data.custom_id) else {
        return Ok(());
    };
    let Some(guild_id) = interaction.guild_id else {
        return Ok(());
    };

    interaction.defer_ephemeral(ctx).await?;

    let request = ReviewRequest {
        guild_id: guild_id.get(),
        guild_name: guild_id.name(&ctx.cache).unwrap_or_default(),
        action: clicked.action,
        message_id: clicked.message_id,
        moderated_user_id: clicked.user_id,
        actor_id: interaction.user.id.get(),
        actor_is_staff: is_staff(interaction),
        log_channel_id: interaction.channel_id.get(),
        log_message_id: interaction.message.id.get(),
        panel: panel_from_message(&clicked, &interaction.message),
    };

    let platform = SerenityPlatform::new(ctx.http.clone());
    let reply = match data.review.handle(&platform, request).await {
        Ok(outcome) => outcome.reply,
        Err(e) => {
            match &e {
                ReviewError::Platform(_) | ReviewError::Store(_) | ReviewError::Translation(_) => {
                    tracing::warn!(
                        guild_id = guild_id.get(),
                        message_id = clicked.message_id,
                        action = clicked.action.key(),
                        "Review action failed: {e}"
                    )
                }
                _ => tracing::debug!(action = clicked.action.key(), "Review action rejected: {e}"),
            }
            e.to_string()
        }
    };

    interaction
        .edit_response(ctx, serenity::EditInteractionResponse::new().content(reply))
        .await?;
    Ok(())
}
