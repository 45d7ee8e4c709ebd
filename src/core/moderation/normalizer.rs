// Text normalizer - canonicalizes message text before it is classified.
//
// Pure function, no I/O: NFKD decomposition, strip everything that is not a
// letter or number, rewrite a few evasion spellings, collapse whitespace.

use thiserror::Error;
use unicode_general_category::{get_general_category, GeneralCategory};
use unicode_normalization::UnicodeNormalization;

/// Evasion spelling -> canonical term. Case-sensitive substring replacement.
const SUBSTITUTIONS: &[(&str, &str)] = &[
    ("fvck", "fuck"),
    ("fck", "fuck"),
    ("phuck", "fuck"),
    ("sh1t", "shit"),
    ("b1tch", "bitch"),
    ("azz", "ass"),
    ("stfu", "shut the fuck up"),
    ("kys", "kill yourself"),
];

/// Substitution passes before we give up on reaching a fixed point.
const MAX_SUBSTITUTION_PASSES: usize = 8;

#[derive(Debug, Error, PartialEq)]
pub enum NormalizationError {
    #[error("Substitutions did not settle after {0} passes")]
    Unsettled(usize),
}

/// Canonicalize `text` for the classifier.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> Result<String, NormalizationError> {
    let stripped: String = text
        .nfkd()
        .map(|c| if is_letter_or_number(c) { c } else { ' ' })
        .collect();

    let substituted = apply_substitutions(stripped)?;

    Ok(substituted.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// General categories L* and N*. Marks left over from NFKD and symbols
/// such as the negative squared letters fall outside both.
fn is_letter_or_number(c: char) -> bool {
    matches!(
        get_general_category(c),
        GeneralCategory::UppercaseLetter
            | GeneralCategory::LowercaseLetter
            | GeneralCategory::TitlecaseLetter
            | GeneralCategory::ModifierLetter
            | GeneralCategory::OtherLetter
            | GeneralCategory::DecimalNumber
            | GeneralCategory::LetterNumber
            | GeneralCategory::OtherNumber
    )
}

/// Replace until nothing changes, so a replacement that forms a new match with
/// its neighbours is handled in this call instead of the next one.
fn apply_substitutions(mut text: String) -> Result<String, NormalizationError> {
    for _ in 0..MAX_SUBSTITUTION_PASSES {
        let mut changed = false;
        for (from, to) in SUBSTITUTIONS {
            if text.contains(from) {
                text = text.replace(from, to);
                changed = true;
            }
        }
        if !changed {
            return Ok(text);
        }
    }
    Err(NormalizationError::Unsettled(MAX_SUBSTITUTION_PASSES))
}
