// Core moderation module - the AI moderation pipeline and review workflow.
// Pure domain logic; the platform, HTTP API and storage are reached through
// the traits defined here.

pub mod classifier;
pub mod config_service;
pub mod enforcement;
pub mod moderation_models;
pub mod normalizer;
pub mod pipeline;
pub mod platform;
pub mod review;
pub mod review_cache;
pub mod statistics;
pub mod threshold;
pub mod violation_ledger;

pub use classifier::*;
pub use config_service::*;
pub use enforcement::*;
pub use moderation_models::*;
pub use normalizer::*;
pub use pipeline::*;
pub use platform::*;
pub use review::*;
pub use review_cache::*;
pub use statistics::*;
pub use threshold::*;
pub use violation_ledger::*;
