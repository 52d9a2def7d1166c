//! Advisory ban category heuristics.
//!
//! Two independent suggestions are offered to administrators:
//!
//! - a keyword dictionary maps a free-text reason to a category
//! - the number of prior bans maps to an escalated category
//!
//! Neither gates the state machine. An explicit category from the
//! administrator always wins over both.

use serde::Serialize;
use vigil_types::{BanCategory, config::EscalationThresholds};

/// Reason keywords and the category each implies.
const REASON_KEYWORDS: &[(&str, BanCategory)] = &[
    ("spam", BanCategory::Normal),
    ("advertising", BanCategory::Normal),
    ("flood", BanCategory::Normal),
    ("flooding", BanCategory::Normal),
    ("off-topic", BanCategory::Normal),
    ("inappropriate", BanCategory::Medium),
    ("bot", BanCategory::Medium),
    ("trolling", BanCategory::Medium),
    ("impersonation", BanCategory::Medium),
    ("harassment", BanCategory::Danger),
    ("scam", BanCategory::Danger),
    ("fraud", BanCategory::Danger),
    ("phishing", BanCategory::Danger),
    ("threat", BanCategory::Danger),
    ("threats", BanCategory::Danger),
    ("hate", BanCategory::Severe),
    ("illegal", BanCategory::Severe),
    ("abuse", BanCategory::Severe),
    ("doxxing", BanCategory::Severe),
    ("violence", BanCategory::Severe),
];

/// Maps a free-text reason to a category by keyword.
///
/// When several keywords match, the most severe category wins. Returns
/// `None` when no keyword matches.
#[must_use]
pub fn suggest_category(reason: &str) -> Option<BanCategory> {
    let lowered = reason.to_lowercase();
    lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '-'))
        .filter(|word| !word.is_empty())
        .filter_map(|word| {
            REASON_KEYWORDS.iter().find(|(keyword, _)| *keyword == word).map(|(_, c)| *c)
        })
        .max()
}

/// Suggests an escalated category from the number of prior bans.
#[must_use]
pub fn suggest_escalation(prior_bans: usize, thresholds: &EscalationThresholds) -> Option<BanCategory> {
    if prior_bans >= thresholds.severe_after {
        Some(BanCategory::Severe)
    } else if prior_bans >= thresholds.danger_after {
        Some(BanCategory::Danger)
    } else if prior_bans >= thresholds.medium_after {
        Some(BanCategory::Medium)
    } else {
        None
    }
}

/// Advisory output for an administrator about to ban.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BanAdvice {
    /// Category implied by the reason text.
    pub from_reason: Option<BanCategory>,
    /// Category implied by the ban history.
    pub from_history: Option<BanCategory>,
    /// Fresh bans already in the visitor's history.
    pub prior_bans: usize,
}

impl BanAdvice {
    /// Computes both suggestions.
    #[must_use]
    pub fn new(reason: &str, prior_bans: usize, thresholds: &EscalationThresholds) -> Self {
        Self {
            from_reason: suggest_category(reason),
            from_history: suggest_escalation(prior_bans, thresholds),
            prior_bans,
        }
    }

    /// The more severe of the two suggestions.
    #[must_use]
    pub fn recommended(&self) -> Option<BanCategory> {
        self.from_reason.max(self.from_history)
    }
}

/// Resolves the category to ban under: explicit input, else the reason
/// suggestion, else `normal`.
#[must_use]
pub fn effective_category(explicit: Option<BanCategory>, reason: &str) -> BanCategory {
    explicit.or_else(|| suggest_category(reason)).unwrap_or(BanCategory::Normal)
}
