// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for the object store, the cloud provider and reconciliation.
//!
//! Errors never cross a kind boundary: an adapter returns a [`ReconcileError`]
//! and the controller template uses [`ReconcileError::disposition`] to choose
//! between a rate-limited requeue, an immediate requeue or giving up on the key.

use thiserror::Error;

/// Errors surfaced by the object store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The record does not exist
    #[error("{kind} '{key}' not found")]
    NotFound {
        /// Kind of the missing record
        kind: String,
        /// Namespaced key of the missing record
        key: String,
    },

    /// A record with the same name already exists
    #[error("{kind} '{key}' already exists")]
    AlreadyExists {
        /// Kind of the conflicting record
        kind: String,
        /// Namespaced key of the conflicting record
        key: String,
    },

    /// The write carried a stale resourceVersion
    #[error("conflict writing {kind} '{key}': the object has been modified")]
    Conflict {
        /// Kind of the record
        kind: String,
        /// Namespaced key of the record
        key: String,
    },

    /// The record was rejected by validation
    #[error("{kind} '{key}' is invalid: {reason}")]
    Invalid {
        /// Kind of the record
        kind: String,
        /// Namespaced key of the record
        key: String,
        /// Which field failed and why
        reason: String,
    },

    /// The server did not answer in time
    #[error("server timeout: {0}")]
    ServerTimeout(String),

    /// Anything else
    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    /// `true` for [`StoreError::NotFound`]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// `true` for [`StoreError::Conflict`]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// `true` for [`StoreError::AlreadyExists`]
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    /// Map a `kube::Error` into the store taxonomy using the HTTP status code.
    #[must_use]
    pub fn from_kube(err: kube::Error, kind: &str, key: &str) -> Self {
        match err {
            kube::Error::Api(ae) => match ae.code {
                404 => StoreError::NotFound {
                    kind: kind.to_string(),
                    key: key.to_string(),
                },
                409 if ae.reason == "AlreadyExists" => StoreError::AlreadyExists {
                    kind: kind.to_string(),
                    key: key.to_string(),
                },
                409 => StoreError::Conflict {
                    kind: kind.to_string(),
                    key: key.to_string(),
                },
                422 | 400 => StoreError::Invalid {
                    kind: kind.to_string(),
                    key: key.to_string(),
                    reason: ae.message.clone(),
                },
                504 => StoreError::ServerTimeout(ae.message.clone()),
                _ => StoreError::Other(ae.message.clone()),
            },
            other => StoreError::Other(other.to_string()),
        }
    }
}

/// Errors surfaced by the cloud provider client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// The cloud object does not exist (or finished terminating)
    #[error("cloud {resource} '{id}' not found")]
    NotFound {
        /// Cloud resource type
        resource: String,
        /// Cloud identifier
        id: String,
    },

    /// The cloud refused the call because of the object's current state
    #[error("cloud conflict on {resource}: {reason}")]
    Conflict {
        /// Cloud resource type
        resource: String,
        /// Provider explanation
        reason: String,
    },

    /// The provider throttled the call
    #[error("cloud request throttled: {0}")]
    Throttled(String),

    /// Credentials were rejected
    #[error("cloud authentication failed: {0}")]
    Unauthorized(String),

    /// The provider rejected the request body
    #[error("cloud rejected request: {0}")]
    Invalid(String),

    /// Network or 5xx failure
    #[error("transient cloud error: {0}")]
    Transient(String),

    /// Anything else
    #[error("cloud error: {0}")]
    Other(String),
}

impl CloudError {
    /// Map an HTTP status code and body into the cloud taxonomy.
    #[must_use]
    pub fn from_status(status: u16, resource: &str, id: &str, body: String) -> Self {
        match status {
            404 => CloudError::NotFound {
                resource: resource.to_string(),
                id: id.to_string(),
            },
            409 | 412 => CloudError::Conflict {
                resource: resource.to_string(),
                reason: body,
            },
            429 => CloudError::Throttled(body),
            401 | 403 => CloudError::Unauthorized(body),
            400 | 422 => CloudError::Invalid(body),
            500..=599 => CloudError::Transient(body),
            _ => CloudError::Other(format!("HTTP {status}: {body}")),
        }
    }

    /// `true` for [`CloudError::NotFound`]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }
}

/// How the controller template reacts to a failed reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Requeue with per-item exponential backoff
    RateLimited,
    /// Drop the in-hand object and requeue at once
    Immediate,
    /// Record an Error status and stop retrying
    Terminal,
    /// Exit the process
    Fatal,
}

/// Reconciliation failures.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Retry with backoff; no state mutation beyond conditions
    #[error("transient error: {0}")]
    Transient(String),

    /// Optimistic-concurrency conflict; re-read on next reconcile
    #[error("conflict: {0}")]
    Conflict(String),

    /// The desired state is invalid
    #[error("invalid field '{field}': {reason}")]
    Validation {
        /// Offending field path
        field: String,
        /// Explanation
        reason: String,
    },

    /// A finite pool ran out
    #[error("exhausted: {0}")]
    Exhausted(String),

    /// Unrecoverable; the process exits
    #[error("fatal: {0}")]
    Fatal(String),

    /// Object store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Cloud provider failure
    #[error(transparent)]
    Cloud(#[from] CloudError),

    /// (De)serialization of a record failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReconcileError {
    /// Shorthand for a validation failure
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ReconcileError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Decide how the controller reacts to this error.
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        match self {
            ReconcileError::Conflict(_) => Disposition::Immediate,
            ReconcileError::Store(e) if e.is_conflict() => Disposition::Immediate,
            ReconcileError::Validation { .. } | ReconcileError::Exhausted(_) => {
                Disposition::Terminal
            }
            ReconcileError::Store(StoreError::Invalid { .. }) => Disposition::Terminal,
            ReconcileError::Cloud(CloudError::Invalid(_)) => Disposition::Terminal,
            ReconcileError::Fatal(_) => Disposition::Fatal,
            _ => Disposition::RateLimited,
        }
    }

    /// CamelCase reason used in status conditions and events.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::Transient(_) => "TransientError",
            ReconcileError::Conflict(_) => "Conflict",
            ReconcileError::Validation { .. } => "ValidationFailed",
            ReconcileError::Exhausted(_) => "Exhausted",
            ReconcileError::Fatal(_) => "Fatal",
            ReconcileError::Store(_) => "StoreError",
            ReconcileError::Cloud(_) => "CloudError",
            ReconcileError::Serialization(_) => "SerializationError",
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
