//! Proptest strategies for Vigil domain types.
//!
//! Reusable generators for property-based testing across crates. Strategies
//! produce well-formed domain values while exploring edge cases through
//! random variation.
//!
//! # Usage
//!
//! ```no_run
//! use vigil_test_utils::strategies;
//! use proptest::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_property(ops in proptest::collection::vec(strategies::arb_policy_op(), 1..20)) {
//!         // apply ops and check invariants
//!     }
//! }
//! ```

use proptest::prelude::*;
use vigil_types::{AppealDecision, BanCategory, DeviceFingerprint};

/// An admin action against a single visitor, for state-machine properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOp {
    /// Ban with a category and reason.
    Ban {
        /// Category to ban under.
        category: BanCategory,
        /// Ban reason.
        reason: String,
    },
    /// Lift the ban.
    Unban,
    /// Change the category of an active ban.
    Recategorize {
        /// New category.
        category: BanCategory,
    },
}

/// Generates one of the four ban categories.
pub fn arb_ban_category() -> impl Strategy<Value = BanCategory> {
    prop::sample::select(BanCategory::ALL.to_vec())
}

/// Generates a non-blank ban reason, sometimes containing a dictionary keyword.
pub fn arb_reason() -> impl Strategy<Value = String> {
    prop_oneof![
        prop::sample::select(vec![
            "spam".to_string(),
            "harassment in comments".to_string(),
            "running a scam".to_string(),
            "bot traffic".to_string(),
            "hate speech".to_string(),
        ]),
        "[a-z]{3,12}( [a-z]{2,10}){0,4}",
    ]
}

/// Generates a device fingerprint with a small value space so collisions occur.
pub fn arb_fingerprint() -> impl Strategy<Value = DeviceFingerprint> {
    (
        prop::sample::select(vec!["Mozilla/5.0 (X11)", "Mozilla/5.0 (Macintosh)", "curl/8.0"]),
        prop::sample::select(vec!["en-US", "de-DE", "ja-JP"]),
        prop::sample::select(vec!["1920x1080", "1440x900"]),
        1u32..=16,
        any::<bool>(),
        proptest::option::of("[a-f0-9]{8}"),
    )
        .prop_map(|(user_agent, language, screen, cores, touch, canvas)| DeviceFingerprint {
            user_agent: user_agent.to_string(),
            language: language.to_string(),
            platform: "Linux x86_64".to_string(),
            screen: screen.to_string(),
            timezone: "UTC".to_string(),
            hardware_concurrency: cores,
            color_depth: 24,
            touch_support: touch,
            canvas_hash: canvas,
            client_signal: None,
        })
}

/// Generates an admin action for state-machine properties.
pub fn arb_policy_op() -> impl Strategy<Value = PolicyOp> {
    prop_oneof![
        (arb_ban_category(), arb_reason())
            .prop_map(|(category, reason)| PolicyOp::Ban { category, reason }),
        Just(PolicyOp::Unban),
        arb_ban_category().prop_map(|category| PolicyOp::Recategorize { category }),
    ]
}

/// Generates a terminal appeal decision.
pub fn arb_appeal_decision() -> impl Strategy<Value = AppealDecision> {
    prop_oneof![Just(AppealDecision::Approved), Just(AppealDecision::Rejected)]
}
