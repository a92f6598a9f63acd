// Routes a moderation result to approval, hard rejection, or a language-only
// soft rejection that waits for translation.

use super::moderation_models::{ModerationResult, Verdict};

const LANGUAGE_REASON: &str = "LANGUAGE";

/// Classify one successful moderation result.
///
/// A soft rejection needs a detected non-English language AND `LANGUAGE` as
/// the only rejection reason. Language combined with anything else (spam,
/// injection, relevance) is a hard rejection.
pub fn classify(result: &ModerationResult) -> Verdict {
    if result.approved {
        return Verdict::Approved;
    }

    if is_language_only_rejection(result) {
        return Verdict::LanguageSoftRejected {
            language: result.language_detected.clone(),
        };
    }

    Verdict::HardRejected
}

fn is_language_only_rejection(result: &ModerationResult) -> bool {
    if result.language_detected.is_empty() {
        return false;
    }

    let language = result.language_detected.to_lowercase();
    if language == "en" || language == "english" {
        return false;
    }

    matches!(
        result.rejection_reasons.as_slice(),
        [only] if only.to_uppercase() == LANGUAGE_REASON
    )
}
