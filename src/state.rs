//! Accumulated run state and the merges that build it.
//!
//! State is a map keyed by test name. Each entry records what the test's
//! actions produced ([`ActionData`]) and the latest status of every assert
//! ([`AssertStatus`]), and is finalized with a [`TestSummary`] when the test
//! ends. The engine never mutates incoming state; it clones, folds shard
//! results in with the associative merges below, and returns the new map.
//!
//! Two rules govern the merges:
//!
//! - an assert status that has `passed == true` is never displaced by a
//!   later unsatisfied status under the same name;
//! - action outputs merge per key, most recent write wins.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Assert;

/// Opaque outputs returned by an action, keyed for template consumption.
pub type Outputs = serde_json::Map<String, Value>;

/// Latest statuses of a set of asserts, keyed by assert name.
pub type Statuses = HashMap<String, AssertStatus>;

/// Per-action state: outputs plus the statuses of its inner asserts.
pub type ActionsData = HashMap<String, ActionData>;

/// Result of evaluating one assert on a runner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertStatus {
    pub passed: bool,
    pub actual: Option<String>,
    pub expected: Option<String>,
    pub description: Option<String>,
}

/// What one action has produced so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionData {
    #[serde(default)]
    pub outputs: Outputs,
    #[serde(default)]
    pub asserts: Statuses,
}

/// Final record of one test's execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub description: Option<String>,
    pub completed_cycles: u32,
    /// Names of top-level asserts that never passed.
    pub remaining_asserts: Vec<String>,
    /// Set when the test ended on a fatal error instead of running.
    pub error: Option<String>,
    /// Wall-clock duration in whole seconds.
    pub duration: u64,
    pub filename: Option<String>,
}

/// One test's entry in the run state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestState {
    #[serde(default)]
    pub actions: ActionsData,
    #[serde(default)]
    pub asserts: Statuses,
    #[serde(default)]
    pub summary: Option<TestSummary>,
}

/// Accumulated state across a sequence of tests, keyed by test name.
pub type State = HashMap<String, TestState>;

/// Merges assert statuses by name; a satisfied status sticks.
pub fn combine_statuses(base: Statuses, update: Statuses) -> Statuses {
    let mut merged = base;

    for (name, status) in update {
        match merged.get(&name) {
            Some(existing) if existing.passed && !status.passed => {}
            _ => {
                merged.insert(name, status);
            }
        }
    }

    merged
}

/// Merges per-action data by action name.
///
/// Outputs merge per key with the most recent write winning; inner assert
/// statuses merge via [`combine_statuses`]. The merge is associative, so
/// shard results can fold in any grouping.
pub fn combine_action_data(base: ActionsData, update: ActionsData) -> ActionsData {
    let mut merged = base;

    for (name, data) in update {
        let entry = merged.entry(name).or_default();
        entry.outputs.extend(data.outputs);
        entry.asserts = combine_statuses(std::mem::take(&mut entry.asserts), data.asserts);
    }

    merged
}

/// Returns the asserts not yet satisfied: those whose recorded status is
/// absent or has `passed == false`.
pub fn get_remaining_asserts<'a>(asserts: &'a [Assert], statuses: &Statuses) -> Vec<&'a Assert> {
    asserts
        .iter()
        .filter(|asrt| {
            asrt.name
                .as_deref()
                .and_then(|name| statuses.get(name))
                .is_none_or(|status| !status.passed)
        })
        .collect()
}

/// Returns the smallest name derived from `base` that does not collide with
/// `existing`: `base`, then `base1`, `base2`, ...
pub fn create_item_name(base: &str, existing: &[String]) -> String {
    if !existing.iter().any(|name| name == base) {
        return base.to_string();
    }

    let mut suffix = 1u32;
    loop {
        let candidate = format!("{base}{suffix}");
        if !existing.iter().any(|name| *name == candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(passed: bool, description: &str) -> AssertStatus {
        AssertStatus {
            passed,
            actual: None,
            expected: None,
            description: Some(description.to_string()),
        }
    }

    fn named_assert(name: &str) -> Assert {
        serde_json::from_value(serde_json::json!({"type": "JSON", "name": name})).unwrap()
    }

    #[test]
    fn satisfied_status_sticks_over_later_failure() {
        let base = Statuses::from([("a".to_string(), status(true, "first"))]);
        let update = Statuses::from([("a".to_string(), status(false, "second"))]);

        let merged = combine_statuses(base, update);
        assert!(merged["a"].passed);
        assert_eq!(merged["a"].description.as_deref(), Some("first"));
    }

    #[test]
    fn unsatisfied_status_is_displaced_by_pass() {
        let base = Statuses::from([("a".to_string(), status(false, "first"))]);
        let update = Statuses::from([("a".to_string(), status(true, "second"))]);

        let merged = combine_statuses(base, update);
        assert!(merged["a"].passed);
    }

    #[test]
    fn action_outputs_merge_last_write_wins() {
        let mut first = ActionData::default();
        first.outputs.insert("status".to_string(), 200.into());
        first.outputs.insert("id".to_string(), 1.into());
        let mut second = ActionData::default();
        second.outputs.insert("status".to_string(), 503.into());

        let merged = combine_action_data(
            ActionsData::from([("a1".to_string(), first)]),
            ActionsData::from([("a1".to_string(), second)]),
        );

        assert_eq!(merged["a1"].outputs["status"], 503);
        assert_eq!(merged["a1"].outputs["id"], 1);
    }

    #[test]
    fn combine_action_data_is_associative() {
        let shard = |passed: bool, key: &str, value: i64| {
            let mut data = ActionData::default();
            data.outputs.insert(key.to_string(), value.into());
            data.asserts
                .insert("Assert0".to_string(), status(passed, key));
            ActionsData::from([("a1".to_string(), data)])
        };

        let (a, b, c) = (shard(false, "x", 1), shard(true, "y", 2), shard(false, "z", 3));

        let left = combine_action_data(combine_action_data(a.clone(), b.clone()), c.clone());
        let right = combine_action_data(a, combine_action_data(b, c));

        assert_eq!(left, right);
        assert!(left["a1"].asserts["Assert0"].passed);
    }

    #[test]
    fn remaining_asserts_filters_satisfied_names() {
        let asserts = vec![named_assert("a"), named_assert("b"), named_assert("c")];
        let statuses = Statuses::from([
            ("a".to_string(), status(true, "ok")),
            ("b".to_string(), status(false, "not yet")),
        ]);

        let remaining = get_remaining_asserts(&asserts, &statuses);
        let names: Vec<_> = remaining
            .iter()
            .map(|asrt| asrt.name.as_deref().unwrap())
            .collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn item_names_pick_smallest_free_suffix() {
        assert_eq!(create_item_name("POST", &[]), "POST");

        let taken = vec!["POST".to_string(), "POST1".to_string()];
        assert_eq!(create_item_name("POST", &taken), "POST2");
    }
}
