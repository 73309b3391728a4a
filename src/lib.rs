// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # Cloudplane - declarative cloud infrastructure for Kubernetes
//!
//! Cloudplane reconciles custom resources describing cloud infrastructure
//! against a cloud provider. Users declare high-level composites (networks,
//! compute groups, load balancers, clusters) and the control plane decomposes
//! them into primitive records, one per cloud object, then drives each
//! primitive to match its cloud counterpart.
//!
//! ## Overview
//!
//! - Every kind is served by a controller: an informer cache, a rate-limited
//!   work queue and a reconciler
//! - Primitive kinds are reconciled by resource adapters that create, poll,
//!   update and delete one cloud object each
//! - Composite kinds are reconciled by cloud adapters that synthesize and
//!   prune their children
//! - Parents track their children in `status.dependents`; creates wait for
//!   parents and deletes wait for dependents
//!
//! ## Modules
//!
//! - [`crd`] - Custom resource types and status shapes
//! - [`adapters`] - Resource, cloud and host adapters
//! - [`controller`] - The controller loop and the per-family reconcilers
//! - [`manager`] - Wiring of every controller in one process
//! - [`store`] - Object store abstraction over the API server
//! - [`cloud`] - Cloud provider client abstraction
//! - [`workqueue`] - Rate-limited work queue
//! - [`informer`] - Shared informer cache
//!
//! ## Example
//!
//! ```rust,no_run
//! use cloudplane::crd::cloud::{Network, NetworkSpec};
//!
//! let network = Network::new(
//!     "net-a",
//!     NetworkSpec {
//!         cidr_block: "10.0.0.0/16".to_string(),
//!         ..Default::default()
//!     },
//! );
//! ```

pub mod adapters;
pub mod allocator;
pub mod cloud;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod dependency;
pub mod errors;
pub mod events;
pub mod informer;
pub mod labels;
pub mod leader;
pub mod manager;
pub mod metrics;
pub mod pki;
pub mod registry;
pub mod retry;
pub mod schema;
pub mod selector;
pub mod store;
pub mod userdata;
pub mod validation;
pub mod workqueue;
