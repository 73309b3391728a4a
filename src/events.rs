// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! User-visible events emitted on every reconcile transition.
//!
//! `ResourceUpdate` (Normal) follows a successful write, `ResourceError`
//! (Warning) a failed reconcile. The message names the kind and the
//! namespaced key.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{ApiResource, DynamicObject};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use std::sync::Mutex;
use tracing::warn;

/// Reason of the Normal event emitted after a successful write
pub const REASON_RESOURCE_UPDATE: &str = "ResourceUpdate";

/// Reason of the Warning event emitted after a failed reconcile
pub const REASON_RESOURCE_ERROR: &str = "ResourceError";

/// A published event, as seen by tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub kind: String,
    pub key: String,
    pub note: String,
}

/// Destination of controller events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
        warning: bool,
        reason: &str,
        note: String,
    );
}

/// Publishes `events.k8s.io/v1` events.
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    #[must_use]
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
        warning: bool,
        reason: &str,
        note: String,
    ) {
        let reference: ObjectReference = obj.object_ref(ar);
        let event = Event {
            type_: if warning {
                EventType::Warning
            } else {
                EventType::Normal
            },
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        // Events are best effort; a failure must not fail the reconcile
        if let Err(e) = self.recorder.publish(&event, &reference).await {
            warn!(kind = %ar.kind, reason = %reason, error = %e, "failed to publish event");
        }
    }
}

/// Keeps events in memory.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(
        &self,
        ar: &ApiResource,
        obj: &DynamicObject,
        warning: bool,
        reason: &str,
        note: String,
    ) {
        let event = RecordedEvent {
            warning,
            reason: reason.to_string(),
            kind: ar.kind.clone(),
            key: crate::store::object_key(obj),
            note,
        };
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod events_tests;
