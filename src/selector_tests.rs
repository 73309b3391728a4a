// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `selector.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{LabelSelector, LabelSelectorRequirement};
    use std::collections::BTreeMap;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn expr(key: &str, operator: &str, values: &[&str]) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: key.to_string(),
            operator: operator.to_string(),
            values: if values.is_empty() {
                None
            } else {
                Some(values.iter().map(|v| (*v).to_string()).collect())
            },
        }
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = LabelSelector::default();
        assert!(selector.is_empty());
        assert!(selector.matches(&labels(&[])));
        assert!(selector.matches(&labels(&[("role", "c")])));
    }

    #[test]
    fn test_match_labels_requires_every_pair() {
        let selector = LabelSelector::from_labels([("role", "c"), ("tier", "web")]);
        assert!(selector.matches(&labels(&[("role", "c"), ("tier", "web"), ("x", "y")])));
        assert!(!selector.matches(&labels(&[("role", "c")])));
        assert!(!selector.matches(&labels(&[("role", "d"), ("tier", "web")])));
    }

    #[test]
    fn test_match_expressions() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![
                expr("env", "In", &["prod", "staging"]),
                expr("legacy", "DoesNotExist", &[]),
            ]),
        };
        assert!(selector.matches(&labels(&[("env", "prod")])));
        assert!(!selector.matches(&labels(&[("env", "dev")])));
        assert!(!selector.matches(&labels(&[("env", "prod"), ("legacy", "1")])));
    }

    #[test]
    fn test_not_in_matches_missing_key() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![expr("env", "NotIn", &["prod"])]),
        };
        assert!(selector.matches(&labels(&[])));
        assert!(selector.matches(&labels(&[("env", "dev")])));
        assert!(!selector.matches(&labels(&[("env", "prod")])));
    }

    #[test]
    fn test_unknown_operator_never_matches() {
        let selector = LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![expr("env", "Gt", &["1"])]),
        };
        assert!(!selector.matches(&labels(&[("env", "2")])));
    }

    #[test]
    fn test_selector_string() {
        let selector = LabelSelector {
            match_labels: Some(labels(&[("b", "2"), ("a", "1")])),
            match_expressions: Some(vec![
                expr("env", "In", &["prod", "qa"]),
                expr("gone", "DoesNotExist", &[]),
                expr("here", "Exists", &[]),
            ]),
        };
        assert_eq!(
            selector.to_selector_string(),
            "a=1,b=2,env in (prod,qa),!gone,here"
        );
    }
}
