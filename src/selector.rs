// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Label selector matching utilities.
//!
//! Composites enumerate their children (and primitives their label-selected
//! parents) from the object store rather than from the cloud. This module
//! provides the local matching used by the in-memory store and the informer
//! cache, plus conversion to the API-server `labelSelector` query string.
//!
//! # Example
//!
//! ```rust
//! use cloudplane::crd::LabelSelector;
//! use std::collections::BTreeMap;
//!
//! let selector = LabelSelector::from_labels([("cloudplane.io/network", "net-a")]);
//! let labels = BTreeMap::from([("cloudplane.io/network".to_string(), "net-a".to_string())]);
//! assert!(selector.matches(&labels));
//! assert_eq!(selector.to_selector_string(), "cloudplane.io/network=net-a");
//! ```

use crate::crd::{LabelSelector, LabelSelectorRequirement};
use std::collections::BTreeMap;

impl LabelSelector {
    /// Build a selector made only of `matchLabels` equality terms.
    pub fn from_labels<K, V>(labels: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        LabelSelector {
            match_labels: Some(
                labels
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
            match_expressions: None,
        }
    }

    /// `true` when the selector carries no requirement at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.match_labels.as_ref().is_none_or(BTreeMap::is_empty)
            && self.match_expressions.as_ref().is_none_or(Vec::is_empty)
    }

    /// Check whether a label map satisfies every requirement of the selector.
    ///
    /// An empty selector matches everything. Unknown operators never match.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        if let Some(match_labels) = &self.match_labels {
            for (key, value) in match_labels {
                if labels.get(key) != Some(value) {
                    return false;
                }
            }
        }

        if let Some(expressions) = &self.match_expressions {
            for expr in expressions {
                if !expr.matches(labels) {
                    return false;
                }
            }
        }

        true
    }

    /// Render the selector in API-server query syntax (`a=b,c in (d,e),!f`).
    ///
    /// Terms are emitted in key order so the string is stable.
    #[must_use]
    pub fn to_selector_string(&self) -> String {
        let mut terms = Vec::new();
        if let Some(match_labels) = &self.match_labels {
            terms.extend(match_labels.iter().map(|(k, v)| format!("{k}={v}")));
        }
        if let Some(expressions) = &self.match_expressions {
            terms.extend(expressions.iter().filter_map(LabelSelectorRequirement::to_term));
        }
        terms.join(",")
    }
}

impl LabelSelectorRequirement {
    fn values(&self) -> &[String] {
        self.values.as_deref().unwrap_or_default()
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let actual = labels.get(&self.key);
        match self.operator.as_str() {
            "In" => actual.is_some_and(|v| self.values().contains(v)),
            "NotIn" => actual.is_none_or(|v| !self.values().contains(v)),
            "Exists" => actual.is_some(),
            "DoesNotExist" => actual.is_none(),
            _ => false,
        }
    }

    fn to_term(&self) -> Option<String> {
        let values = self.values().join(",");
        match self.operator.as_str() {
            "In" => Some(format!("{} in ({values})", self.key)),
            "NotIn" => Some(format!("{} notin ({values})", self.key)),
            "Exists" => Some(self.key.clone()),
            "DoesNotExist" => Some(format!("!{}", self.key)),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod selector_tests;
