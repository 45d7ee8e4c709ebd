// Implementations of the moderation ports.

pub mod audit_webhook;
#[cfg(test)]
pub mod in_memory;
pub mod openai_client;
pub mod sqlite_store;

pub use audit_webhook::AuditWebhook;
#[cfg(test)]
pub use in_memory::InMemoryModerationStore;
pub use openai_client::OpenAiClient;
pub use sqlite_store::SqliteModerationStore;
