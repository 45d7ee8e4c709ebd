// Discord side of AI moderation: slash commands, message and button events,
// embeds, and the serenity platform adapter.

pub mod commands;
pub mod embeds;
pub mod message_handler;
pub mod review_buttons;
pub mod serenity_platform;

pub use serenity_platform::SerenityPlatform;
