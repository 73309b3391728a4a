// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the cloudplane control plane.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

use std::time::Duration;

// ============================================================================
// API Constants
// ============================================================================

/// API group for primitive (one-to-one with a cloud object) kinds
pub const RESOURCE_API_GROUP: &str = "oci.cloudplane.io";

/// API group for composite kinds decomposed by cloud adapters
pub const CLOUD_API_GROUP: &str = "cloud.cloudplane.io";

/// API version shared by both groups
pub const API_VERSION: &str = "v1alpha1";

/// Finalizer placed on every primitive record
pub const RESOURCE_FINALIZER: &str = "oci.cloudplane.io/finalizer";

/// Finalizer placed on every composite record
pub const CLOUD_FINALIZER: &str = "cloud.cloudplane.io/finalizer";

/// Finalizer placed on host-system records (namespaces)
pub const HOST_FINALIZER: &str = "cloudplane.io/compartment";

/// Field manager / event reporter name
pub const CONTROLLER_NAME: &str = "cloudplane";

// ============================================================================
// Controller Retry Constants
// ============================================================================

/// Maximum `AddAfter` retries for a primitive key before it is forgotten
pub const RESOURCE_RETRY_CAP: u32 = 50;

/// Maximum `AddAfter` retries for a host-kind key
pub const HOST_RETRY_CAP: u32 = 30;

/// Maximum `AddAfter` retries for a composite key
pub const CLOUD_RETRY_CAP: u32 = 50;

/// Delay before a primitive key is retried (pending cloud state, waiting on parents)
pub const RESOURCE_RETRY_BACKOFF: Duration = Duration::from_secs(3);

/// Delay before a host-kind key is retried
pub const HOST_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Delay before a composite key is retried (children still converging)
pub const CLOUD_RETRY_BACKOFF: Duration = Duration::from_secs(3);

/// Rate-limited requeues tolerated before an error is treated as fatal for the key
pub const CONTROLLER_ERROR_CAP: u32 = 5;

/// Rate-limited requeues tolerated on composite controllers
pub const CLOUD_MAX_REQUEUES: u32 = 5;

/// Optimistic-concurrency retries for compare-and-set writes on another record
pub const CAS_RETRY_LIMIT: u32 = 5;

/// Maximum depth followed when checking transitive parent readiness
pub const MAX_PARENT_DEPTH: usize = 8;

// ============================================================================
// Work Queue Rate Limiter Constants
// ============================================================================

/// Per-item exponential backoff base delay
pub const QUEUE_BASE_DELAY: Duration = Duration::from_secs(2);

/// Per-item exponential backoff cap
pub const QUEUE_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Global token bucket refill rate (tokens per second)
pub const QUEUE_BUCKET_QPS: f64 = 10.0;

/// Global token bucket burst size
pub const QUEUE_BUCKET_BURST: f64 = 100.0;

// ============================================================================
// Informer Constants
// ============================================================================

/// Default informer resync period in seconds
pub const DEFAULT_RESYNC_SECS: u64 = 60;

/// Delay before an informer re-lists after its watch stream failed
pub const INFORMER_RELIST_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// Schema Registration Constants
// ============================================================================

/// Poll interval while waiting for a schema to report `Established`
pub const SCHEMA_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Maximum time to wait for a schema to report `Established`
pub const SCHEMA_ESTABLISH_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Name of the coordination lease
pub const LEASE_NAME: &str = "cloudplane-leader";

/// Lease duration (45 seconds)
pub const LEASE_DURATION_SECS: u64 = 45;

/// Lease renew interval (30 seconds)
pub const LEASE_RENEW_SECS: u64 = 30;

/// Lease acquire retry period (10 seconds)
pub const LEASE_RETRY_SECS: u64 = 10;

// ============================================================================
// Subnet Allocation Constants
// ============================================================================

/// Lowest subnet octet handed out by the allocator
pub const SUBNET_OCTET_MIN: u8 = 10;

/// Highest subnet octet handed out by the allocator
pub const SUBNET_OCTET_MAX: u8 = 250;

/// Stride between allocations
pub const SUBNET_OCTET_STRIDE: u8 = 10;

/// Largest AZ count that fits inside one allocation stride
pub const MAX_AVAILABILITY_ZONES: usize = 9;

// ============================================================================
// Load Balancer Defaults
// ============================================================================

/// Health check port used when `spec` leaves it at 0
pub const DEFAULT_HEALTH_CHECK_PORT: i32 = 80;

/// Health check protocol used when `spec` leaves it empty
pub const DEFAULT_HEALTH_CHECK_PROTOCOL: &str = "HTTP";

/// Health check URL path used for HTTP checks when `spec` leaves it empty
pub const DEFAULT_HEALTH_CHECK_PATH: &str = "/";

/// Balancing policy used when `spec` leaves it empty
pub const DEFAULT_BALANCE_MODE: &str = "ROUND_ROBIN";

/// Load balancer shape (bandwidth) used when `spec` leaves it empty
pub const DEFAULT_BANDWIDTH: &str = "100Mbps";

/// Backend weight used when no label-weight entry matches
pub const DEFAULT_BACKEND_WEIGHT: i32 = 1;

// ============================================================================
// Cluster Constants
// ============================================================================

/// How long a self-managed cluster waits for its load balancer IP
pub const LB_READY_TIMEOUT: Duration = Duration::from_secs(600);

/// Poll interval while waiting for the load balancer IP
pub const LB_READY_POLL: Duration = Duration::from_secs(30);

/// Kubernetes API server port behind the cluster load balancer
pub const APISERVER_PORT: i32 = 6443;

/// Port exposed by the cluster load balancer listener
pub const APISERVER_LISTENER_PORT: i32 = 443;

/// Key holding the kubeconfig inside generated secrets
pub const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";

/// Default network CIDR for self-managed clusters
pub const DEFAULT_CLUSTER_CIDR: &str = "10.0.0.0/16";

/// Default compute shape
pub const DEFAULT_SHAPE: &str = "VM.Standard2.1";

/// Default instance image
pub const DEFAULT_IMAGE: &str = "Oracle-Linux-8";

/// Server type of DHCP options produced by a Network
pub const DEFAULT_DHCP_SERVER_TYPE: &str = "VcnLocalPlusInternet";

/// CIDR meaning "anywhere"
pub const ANYWHERE_CIDR: &str = "0.0.0.0/0";

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Bind address for metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";
