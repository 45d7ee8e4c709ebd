// Threshold evaluation - decides whether a set of category scores is flagged.

use super::moderation_models::{ConfigError, ScoreMap};

/// Scores at or below this are not worth keeping in violation history.
/// Independent of the (configurable) enforcement threshold.
pub const NOISE_FLOOR: f64 = 0.2;

/// Category dropped in NSFW channels when the guild enables the bypass.
const NSFW_BYPASS_CATEGORY: &str = "sexual";

/// True iff any score strictly exceeds `threshold`.
pub fn is_flagged(scores: &ScoreMap, threshold: f64) -> bool {
    scores.values().any(|score| *score > threshold)
}

/// Scores strictly above the noise floor.
pub fn noteworthy(scores: &ScoreMap) -> ScoreMap {
    above(scores, NOISE_FLOOR)
}

/// Scores strictly above `threshold`.
pub fn above(scores: &ScoreMap, threshold: f64) -> ScoreMap {
    scores
        .iter()
        .filter(|(_, score)| **score > threshold)
        .map(|(category, score)| (category.clone(), *score))
        .collect()
}

/// Merge `other` into `into`, keeping the higher score per category.
pub fn merge_max(into: &mut ScoreMap, other: &ScoreMap) {
    for (category, score) in other {
        let entry = into.entry(category.clone()).or_insert(*score);
        if *score > *entry {
            *entry = *score;
        }
    }
}

/// Drop the plain `sexual` category for NSFW channels in guilds that opted in.
/// `sexual/minors` is always kept.
pub fn apply_nsfw_bypass(mut scores: ScoreMap, bypass_nsfw: bool, channel_nsfw: bool) -> ScoreMap {
    if bypass_nsfw && channel_nsfw {
        scores.remove(NSFW_BYPASS_CATEGORY);
    }
    scores
}

pub fn validate_threshold(threshold: f64) -> Result<f64, ConfigError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(ConfigError::ThresholdOutOfRange(threshold))
    }
}
