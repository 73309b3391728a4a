// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Adapters for kinds owned by the host system.

pub mod namespace;

pub use namespace::NamespaceAdapter;
