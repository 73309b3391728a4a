// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `registry.rs`

#[cfg(test)]
mod tests {
    use crate::registry::AdapterRegistry;
    use std::collections::BTreeSet;

    #[test]
    fn test_builtin_registry_covers_every_kind() {
        let registry = AdapterRegistry::with_builtin();
        assert_eq!(registry.resources().count(), 19);
        assert_eq!(registry.clouds().count(), 6);
        assert_eq!(registry.hosts().count(), 1);

        let composites: BTreeSet<String> =
            registry.clouds().map(|a| a.api_resource().kind).collect();
        assert!(composites.contains("Cluster"));
        assert!(composites.contains("Cpod"));
    }

    #[test]
    fn test_primitive_lookup_by_kind() {
        let registry = AdapterRegistry::with_builtin();
        let subnet = registry.resource("Subnet").expect("subnet adapter");
        assert_eq!(subnet.api_resource().group, "oci.cloudplane.io");
        // The primitive LoadBalancer shadows nothing: composites are not indexed by kind
        let lb = registry.resource("LoadBalancer").expect("lb adapter");
        assert_eq!(lb.api_resource().group, "oci.cloudplane.io");
        assert!(registry.resource("Network").is_none());
    }

    #[test]
    fn test_owned_kinds_are_distinct_resources() {
        let registry = AdapterRegistry::with_builtin();
        let owned: BTreeSet<String> = registry
            .owned_kinds()
            .iter()
            .map(|ar| format!("{}/{}", ar.group, ar.plural))
            .collect();
        assert_eq!(owned.len(), 25);
        assert!(owned.contains("cloud.cloudplane.io/loadbalancers"));
        assert!(owned.contains("oci.cloudplane.io/loadbalancers"));
    }
}
