// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `leader.rs`

#[cfg(test)]
mod tests {
    use crate::constants::{LEASE_DURATION_SECS, LEASE_RENEW_SECS};
    use crate::leader::{detect_identity, detect_namespace, renew_grace_secs};

    #[test]
    fn test_explicit_namespace_wins() {
        assert_eq!(detect_namespace(Some("cloudplane-system")), "cloudplane-system");
    }

    #[test]
    fn test_empty_namespace_falls_back() {
        assert!(!detect_namespace(Some("")).is_empty());
        assert!(!detect_namespace(None).is_empty());
    }

    #[test]
    fn test_renewal_happens_at_renew_interval() {
        assert_eq!(renew_grace_secs(), 15);
        assert_eq!(LEASE_DURATION_SECS - renew_grace_secs(), LEASE_RENEW_SECS);
    }

    #[test]
    fn test_identity_is_never_empty() {
        assert!(!detect_identity().is_empty());
    }
}
