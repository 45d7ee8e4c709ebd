// Embed and component builders for moderation output.

use crate::core::moderation::{
    daily_trend, ButtonState, DebugReport, DeletedMessageSnapshot, GuildModerationConfig,
    ReviewAction, ReviewLogEntry, ReviewPanel, ScoreMap, StatCounters, ViolationHistory,
    WarningNotice,
};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{self as serenity, CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter};

const DESCRIPTION_LIMIT: usize = 4000;
const FIELD_LIMIT: usize = 1000;
const BUTTONS_PER_ROW: usize = 5;
/// Discord rejects messages with more embeds than this.
const MAX_EMBEDS: usize = 10;
pub const HISTORY_PAGE_SIZE: usize = 5;
pub const TREND_DAYS: u32 = 14;

const SPARK_BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

fn or_placeholder(text: String, placeholder: &str) -> String {
    if text.trim().is_empty() {
        placeholder.to_string()
    } else {
        text
    }
}

fn timestamp(at: DateTime<Utc>) -> serenity::Timestamp {
    serenity::Timestamp::from_unix_timestamp(at.timestamp()).unwrap_or_else(|_| serenity::Timestamp::now())
}

fn on_off(value: bool) -> &'static str {
    if value {
        "On"
    } else {
        "Off"
    }
}

/// One line per category, highest score first.
pub fn format_scores(scores: &ScoreMap) -> String {
    let mut sorted: Vec<_> = scores.iter().collect();
    sorted.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));
    sorted
        .into_iter()
        .map(|(category, score)| format!("`{}` {:.0}%", category, score * 100.0))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text sparkline scaled to the largest value; zero renders as the lowest bar.
pub fn sparkline(values: &[u32]) -> String {
    let max = values.iter().copied().max().unwrap_or(0);
    values
        .iter()
        .map(|&v| {
            if max == 0 {
                SPARK_BARS[0]
            } else {
                SPARK_BARS[(v as usize * 7) / max as usize]
            }
        })
        .collect()
}

// ============================================================================
// REVIEW LOG
// ============================================================================

fn button_style(action: ReviewAction) -> serenity::ButtonStyle {
    match action {
        ReviewAction::Kick | ReviewAction::Ban => serenity::ButtonStyle::Danger,
        ReviewAction::Untimeout | ReviewAction::Resend => serenity::ButtonStyle::Success,
        ReviewAction::Dismiss => serenity::ButtonStyle::Secondary,
        _ => serenity::ButtonStyle::Primary,
    }
}

fn create_button(panel: &ReviewPanel, state: &ButtonState) -> serenity::CreateButton {
    serenity::CreateButton::new(panel.button_id(state.action).to_custom_id())
        .label(state.label.clone())
        .style(button_style(state.action))
        .disabled(state.disabled)
}

/// Lay the panel's buttons out in rows of five, in panel order.
pub fn panel_components(panel: &ReviewPanel) -> Vec<serenity::CreateActionRow> {
    panel
        .buttons
        .chunks(BUTTONS_PER_ROW)
        .map(|row| {
            serenity::CreateActionRow::Buttons(
                row.iter().map(|state| create_button(panel, state)).collect(),
            )
        })
        .collect()
}

pub fn review_log_embed(entry: &ReviewLogEntry) -> CreateEmbed {
    let mut author = CreateEmbedAuthor::new(&entry.author_name);
    if let Some(avatar) = &entry.author_avatar {
        author = author.icon_url(avatar);
    }

    let mut embed = CreateEmbed::new()
        .title("AI moderation")
        .author(author)
        .description(or_placeholder(
            truncate(&entry.content, DESCRIPTION_LIMIT),
            "*No text content*",
        ))
        .color(serenity::Color::RED)
        .field("Author", format!("<@{}>", entry.author_id), true)
        .field("Channel", format!("<#{}>", entry.channel_id), true)
        .field("Action taken", &entry.action_taken, true)
        .field(
            "Scores",
            or_placeholder(truncate(&format_scores(&entry.scores), FIELD_LIMIT), "-"),
            true,
        )
        .field("Threshold", format!("{:.0}%", entry.threshold * 100.0), true)
        .footer(CreateEmbedFooter::new(format!(
            "Message ID: {} | User ID: {}",
            entry.message_id, entry.author_id
        )))
        .timestamp(timestamp(entry.sent_at));

    if !entry.flagged_images.is_empty() {
        let links = entry
            .flagged_images
            .iter()
            .enumerate()
            .map(|(i, url)| format!("[Image {}]({})", i + 1, url))
            .collect::<Vec<_>>()
            .join(" ");
        embed = embed
            .field("Flagged images", truncate(&links, FIELD_LIMIT), false)
            .image(&entry.flagged_images[0]);
    }
    embed
}

pub fn followup_embed(title: &str, text: &str) -> CreateEmbed {
    CreateEmbed::new()
        .title(title)
        .description(or_placeholder(truncate(text, DESCRIPTION_LIMIT), "*Empty*"))
        .color(serenity::Color::BLUE)
}

pub fn debug_embed(report: &DebugReport) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title("AI moderation debug")
        .description(format!(
            "Message {} by <@{}> in <#{}>\n```\n{}\n```",
            report.message_id,
            report.author_id,
            report.channel_id,
            truncate(&report.normalized_text, 1500)
        ))
        .color(if report.flagged {
            serenity::Color::ORANGE
        } else {
            serenity::Color::DARK_GREY
        })
        .field(
            "Text scores",
            or_placeholder(truncate(&format_scores(&report.text_scores), FIELD_LIMIT), "-"),
            false,
        )
        .field("Threshold", format!("{:.2}", report.threshold), true)
        .field("Flagged", if report.flagged { "Yes" } else { "No" }, true);

    for (index, (_, scores)) in report.image_scores.iter().enumerate() {
        embed = embed.field(
            format!("Image {}", index + 1),
            or_placeholder(truncate(&format_scores(scores), FIELD_LIMIT), "-"),
            true,
        );
    }
    if !report.error_codes.is_empty() {
        embed = embed.field("Errors", report.error_codes.join(", "), false);
    }
    embed
}

// ============================================================================
// MEMBER FACING
// ============================================================================

pub fn warning_embed(notice: &WarningNotice) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(format!("Warning from {}", notice.guild_name))
        .description(
            "A moderator reviewed one of your messages and issued a warning. \
             Please follow the server rules.",
        )
        .color(serenity::Color::GOLD)
        .field("Warnings so far", notice.warning_count.to_string(), true);
    if let Some(content) = &notice.quoted_content {
        embed = embed.field("Your message", truncate(content, FIELD_LIMIT), false);
    }
    embed
}

/// The restored message plus one extra embed per additional image.
pub fn restored_embeds(snapshot: &DeletedMessageSnapshot) -> Vec<CreateEmbed> {
    let mut author = CreateEmbedAuthor::new(&snapshot.author_name);
    if let Some(avatar) = &snapshot.author_avatar {
        author = author.icon_url(avatar);
    }

    let mut main = CreateEmbed::new()
        .author(author)
        .description(or_placeholder(
            truncate(&snapshot.content, DESCRIPTION_LIMIT),
            "*No text content*",
        ))
        .color(serenity::Color::BLURPLE)
        .footer(CreateEmbedFooter::new("Restored by the moderation team"))
        .timestamp(timestamp(snapshot.sent_at));

    let mut images = snapshot.image_urls.iter();
    if let Some(first) = images.next() {
        main = main.image(first);
    }

    let mut embeds = vec![main];
    embeds.extend(
        images
            .take(MAX_EMBEDS - 1)
            .map(|url| CreateEmbed::new().color(serenity::Color::BLURPLE).image(url)),
    );
    embeds
}

// ============================================================================
// COMMAND OUTPUT
// ============================================================================

pub fn status_embed(config: &GuildModerationConfig) -> CreateEmbed {
    let whitelist = &config.whitelist;
    let mentions = |ids: &std::collections::BTreeSet<u64>, fmt: fn(u64) -> String| {
        if ids.is_empty() {
            "-".to_string()
        } else {
            truncate(
                &ids.iter().map(|id| fmt(*id)).collect::<Vec<_>>().join(" "),
                FIELD_LIMIT,
            )
        }
    };

    CreateEmbed::new()
        .title("AI moderation settings")
        .color(serenity::Color::BLUE)
        .field("Moderation", on_off(config.moderation_enabled), true)
        .field("Threshold", format!("{:.2}", config.threshold), true)
        .field(
            "Timeout",
            if config.timeout_minutes == 0 {
                "Disabled".to_string()
            } else {
                format!("{} min", config.timeout_minutes)
            },
            true,
        )
        .field(
            "Log channel",
            config
                .log_channel_id
                .map_or_else(|| "Not set".to_string(), |id| format!("<#{}>", id)),
            true,
        )
        .field("Delete messages", on_off(config.delete_violatory_messages), true)
        .field("NSFW bypass", on_off(config.bypass_nsfw), true)
        .field("Debug mode", on_off(config.debug_mode), true)
        .field("Monitoring warning", on_off(config.monitoring_warning_enabled), true)
        .field(
            "Feedback",
            format!(
                "Too weak: {} | Too strict: {} | Just right: {}",
                config.votes.too_weak, config.votes.too_tough, config.votes.just_right
            ),
            false,
        )
        .field("Whitelisted channels", mentions(&whitelist.channels, |id| format!("<#{id}>")), false)
        .field("Whitelisted categories", mentions(&whitelist.categories, |id| format!("<#{id}>")), false)
        .field("Whitelisted roles", mentions(&whitelist.roles, |id| format!("<@&{id}>")), false)
        .field("Whitelisted users", mentions(&whitelist.users, |id| format!("<@{id}>")), false)
}

pub fn stats_embed(title: &str, counters: &StatCounters) -> CreateEmbed {
    let categories = counters
        .top_categories(5)
        .into_iter()
        .map(|(category, count)| format!("`{}` {}", category, count))
        .collect::<Vec<_>>()
        .join("\n");
    let users = counters
        .top_users(5)
        .into_iter()
        .map(|(user_id, count)| format!("<@{}> {}", user_id, count))
        .collect::<Vec<_>>()
        .join("\n");

    CreateEmbed::new()
        .title(title)
        .color(serenity::Color::DARK_BLUE)
        .field("Messages scanned", counters.message_count.to_string(), true)
        .field("Messages moderated", counters.moderated_count.to_string(), true)
        .field("Images scanned", counters.image_count.to_string(), true)
        .field("Images moderated", counters.moderated_image_count.to_string(), true)
        .field("Timeouts", counters.timeout_count.to_string(), true)
        .field("Timeout minutes", counters.total_timeout_minutes.to_string(), true)
        .field("Top categories", or_placeholder(categories, "-"), false)
        .field("Most moderated users", or_placeholder(users, "-"), false)
}

pub fn history_page_count(history: &ViolationHistory) -> usize {
    history.records.len().div_ceil(HISTORY_PAGE_SIZE).max(1)
}

pub fn history_embed(
    user: &serenity::User,
    history: &ViolationHistory,
    page: usize,
    now: DateTime<Utc>,
) -> CreateEmbed {
    let trend: Vec<u32> = daily_trend(&history.records, now, TREND_DAYS)
        .into_iter()
        .map(|(_, count)| count)
        .collect();

    let mut embed = CreateEmbed::new()
        .title(format!("Moderation history for {}", user.name))
        .thumbnail(user.face())
        .color(serenity::Color::DARK_RED)
        .description(format!(
            "**Warnings:** {}\n**Violations on record:** {}\n**Last {} days:** `{}`",
            history.warnings,
            history.records.len(),
            TREND_DAYS,
            sparkline(&trend)
        ))
        .footer(CreateEmbedFooter::new(format!(
            "Page {}/{}",
            page + 1,
            history_page_count(history)
        )));

    for record in history
        .records
        .iter()
        .skip(page * HISTORY_PAGE_SIZE)
        .take(HISTORY_PAGE_SIZE)
    {
        let mut value = format_scores(&record.categories);
        if !record.content.is_empty() {
            value.push_str(&format!("\n> {}", truncate(&record.content, 300).replace('\n', " ")));
        }
        if !record.attachments.is_empty() {
            value.push_str(&format!("\n{} attachment(s)", record.attachments.len()));
        }
        embed = embed.field(
            format!("<t:{}:f> in #{}", record.timestamp, record.channel_name),
            or_placeholder(truncate(&value, FIELD_LIMIT), "-"),
            false,
        );
    }
    embed
}
