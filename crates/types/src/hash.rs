//! Fingerprint digests.
//!
//! A device fingerprint is reduced to a SHA-256 digest over a canonical,
//! length-prefixed encoding of its components. The encoding is stable across
//! releases: changing it would split every existing visitor from its future
//! visits.
//!
//! The digest is a correlation key, not a cryptographic identity. Distinct
//! devices with identical characteristics share a digest, and the configured
//! [`MergePolicy`] decides how much client-held state is folded in to tell
//! them apart.

use std::fmt::Write;

use sha2::{Digest, Sha256};

use crate::{
    config::MergePolicy,
    types::{DeviceFingerprint, FingerprintHash},
};

/// Domain separator so fingerprint digests never collide with other SHA-256 uses.
const FINGERPRINT_DOMAIN: &[u8] = b"vigil.fingerprint.v1";

/// Computes the digest of a device fingerprint under the given merge policy.
#[must_use]
pub fn fingerprint_digest(fingerprint: &DeviceFingerprint, policy: MergePolicy) -> FingerprintHash {
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_DOMAIN);

    hash_length_prefixed_str(&mut hasher, &fingerprint.user_agent);
    hash_length_prefixed_str(&mut hasher, &fingerprint.language);
    hash_length_prefixed_str(&mut hasher, &fingerprint.platform);
    hash_length_prefixed_str(&mut hasher, &fingerprint.screen);
    hash_length_prefixed_str(&mut hasher, &fingerprint.timezone);
    hasher.update(fingerprint.hardware_concurrency.to_le_bytes());
    hasher.update(fingerprint.color_depth.to_le_bytes());
    hasher.update([u8::from(fingerprint.touch_support)]);
    hash_optional_str(&mut hasher, fingerprint.canvas_hash.as_deref());

    if policy == MergePolicy::HashAndClientSignal {
        hash_optional_str(&mut hasher, fingerprint.client_signal.as_deref());
    }

    FingerprintHash::new(hex_encode(&hasher.finalize()))
}

/// Hash a length-prefixed string.
#[inline]
fn hash_length_prefixed_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u32).to_le_bytes());
    hasher.update(s.as_bytes());
}

/// Hash an optional string with a presence marker so `None` and `Some("")` differ.
#[inline]
fn hash_optional_str(hasher: &mut Sha256, s: Option<&str>) {
    match s {
        Some(value) => {
            hasher.update([1u8]);
            hash_length_prefixed_str(hasher, value);
        },
        None => hasher.update([0u8]),
    }
}

fn hex_encode(data: &[u8]) -> String {
    data.iter().fold(String::with_capacity(data.len() * 2), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn laptop() -> DeviceFingerprint {
        DeviceFingerprint {
            user_agent: "Mozilla/5.0 (Macintosh)".to_string(),
            language: "en-US".to_string(),
            platform: "MacIntel".to_string(),
            screen: "1440x900".to_string(),
            timezone: "Europe/Berlin".to_string(),
            hardware_concurrency: 8,
            color_depth: 24,
            touch_support: false,
            canvas_hash: Some("c4nv4s".to_string()),
            client_signal: None,
        }
    }

    #[test]
    fn test_digest_is_deterministic_hex() {
        let a = fingerprint_digest(&laptop(), MergePolicy::HashMatch);
        let b = fingerprint_digest(&laptop(), MergePolicy::HashMatch);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_digest_changes_with_any_component() {
        let base = fingerprint_digest(&laptop(), MergePolicy::HashMatch);

        let mut other = laptop();
        other.timezone = "America/New_York".to_string();
        assert_ne!(fingerprint_digest(&other, MergePolicy::HashMatch), base);

        let mut other = laptop();
        other.touch_support = true;
        assert_ne!(fingerprint_digest(&other, MergePolicy::HashMatch), base);
    }

    #[test]
    fn test_length_prefix_prevents_concatenation_ambiguity() {
        let mut a = laptop();
        a.language = "en".to_string();
        a.platform = "-USMacIntel".to_string();
        let mut b = laptop();
        b.language = "en-US".to_string();
        b.platform = "MacIntel".to_string();
        assert_ne!(
            fingerprint_digest(&a, MergePolicy::HashMatch),
            fingerprint_digest(&b, MergePolicy::HashMatch)
        );
    }

    #[test]
    fn test_client_signal_only_counts_under_strict_policy() {
        let mut with_signal = laptop();
        with_signal.client_signal = Some("local-storage-seed".to_string());

        assert_eq!(
            fingerprint_digest(&with_signal, MergePolicy::HashMatch),
            fingerprint_digest(&laptop(), MergePolicy::HashMatch)
        );
        assert_ne!(
            fingerprint_digest(&with_signal, MergePolicy::HashAndClientSignal),
            fingerprint_digest(&laptop(), MergePolicy::HashAndClientSignal)
        );
    }

    proptest! {
        #[test]
        fn prop_digest_equal_iff_inputs_equal(ua_a in "[a-z]{0,12}", ua_b in "[a-z]{0,12}") {
            let mut a = laptop();
            a.user_agent = ua_a.clone();
            let mut b = laptop();
            b.user_agent = ua_b.clone();
            let equal = fingerprint_digest(&a, MergePolicy::HashMatch)
                == fingerprint_digest(&b, MergePolicy::HashMatch);
            prop_assert_eq!(equal, ua_a == ua_b);
        }
    }
}
