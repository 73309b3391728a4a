// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all adapters.
//!
//! Children synthesized by cloud adapters carry these labels so that they can
//! be enumerated with label selectors instead of cloud-side queries.

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

/// Value for `app.kubernetes.io/managed-by` on every synthesized record
pub const MANAGED_BY_CLOUDPLANE: &str = "cloudplane";

// ============================================================================
// Cloudplane Labels
// ============================================================================

/// Names the Network a record belongs to. Network records stamp it on themselves.
pub const NETWORK_LABEL: &str = "cloudplane.io/network";

/// Names the Security composite that produced a rule set
pub const SECURITY_LABEL: &str = "cloudplane.io/security";

/// Names the Compute composite that produced an instance or subnet
pub const COMPUTE_LABEL: &str = "cloudplane.io/compute";

/// Ordinal of an instance within its Compute
pub const ORDINAL_LABEL: &str = "cloudplane.io/ordinal";

/// Names the LoadBalancer composite that produced a child
pub const LOADBALANCER_LABEL: &str = "cloudplane.io/loadbalancer";

/// Names the Cluster composite that produced a child
pub const CLUSTER_LABEL: &str = "cloudplane.io/cluster";

/// Role of a cluster node group (`master` / `worker`)
pub const ROLE_LABEL: &str = "cloudplane.io/role";

/// Names the Cpod composite that produced an instance
pub const CPOD_LABEL: &str = "cloudplane.io/cpod";

/// Namespaces carrying `cloudplane.io/compartment=enabled` get a compartment
pub const COMPARTMENT_LABEL: &str = "cloudplane.io/compartment";

/// Value of [`COMPARTMENT_LABEL`] that opts a namespace in
pub const COMPARTMENT_ENABLED: &str = "enabled";

