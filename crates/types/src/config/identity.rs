//! Identity resolution configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How aggressively visitors sharing a fingerprint are merged.
///
/// The digest has a non-zero false-positive rate: two distinct people on
/// identical devices produce the same fingerprint. This policy decides what
/// counts as "the same fingerprint" when deduplicating identities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Merge on the first device-component hash match.
    #[default]
    HashMatch,
    /// Also require the client-held signal to match before merging.
    HashAndClientSignal,
}

/// Identity resolver configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema, bon::Builder)]
pub struct ResolverConfig {
    /// Fingerprint merge policy.
    #[serde(default)]
    #[builder(default)]
    pub merge_policy: MergePolicy,
}
