//! Per-hostname sequenced execution of actions and asserts.
//!
//! A shard is one hostname's list of work within one cycle. Items in a
//! shard run in input order with an optional pacing delay between them;
//! concurrency only exists across shards (see
//! [`strategy`](crate::engine::strategy)).

use std::time::Duration;

use tracing::debug;

use crate::config::{Action, Assert};
use crate::messaging::RunnerTransport;
use crate::state::{ActionsData, Statuses, combine_statuses, get_remaining_asserts};

/// Runs `actions` in order against one hostname.
///
/// Each action's outputs are recorded under its name and its inner asserts
/// are evaluated against the same hostname right after it, skipping any
/// already satisfied in `existing`. The returned map carries the new data
/// merged over the matching `existing` entries.
pub async fn run_actions(
    transport: &dyn RunnerTransport,
    actions: &[Action],
    existing: &ActionsData,
    hostname: &str,
    seconds_between: f64,
) -> ActionsData {
    let mut results = ActionsData::new();

    for (index, action) in actions.iter().enumerate() {
        if index > 0 {
            pace(seconds_between).await;
        }

        let name = action
            .name
            .clone()
            .unwrap_or_else(|| action.action_type.clone());

        debug!(hostname, action = name, "sending action");
        let outputs = transport.send_action(hostname, action).await;

        let mut statuses = Statuses::new();
        let satisfied = existing
            .get(&name)
            .map(|data| data.asserts.clone())
            .unwrap_or_default();

        for asrt in get_remaining_asserts(&action.asserts, &satisfied) {
            let assert_name = asrt
                .name
                .clone()
                .unwrap_or_else(|| asrt.assert_type.clone());
            let status = transport.send_assert(hostname, asrt).await;
            statuses.insert(assert_name, status);
        }

        let mut entry = existing.get(&name).cloned().unwrap_or_default();
        entry.outputs.extend(outputs);
        entry.asserts = combine_statuses(entry.asserts, statuses);
        results.insert(name, entry);
    }

    results
}

/// Runs `asserts` in order against one hostname and records each status
/// under the assert's name.
///
/// Callers pass only the asserts still unsatisfied for this cycle.
pub async fn run_asserts(
    transport: &dyn RunnerTransport,
    asserts: &[Assert],
    hostname: &str,
    seconds_between: f64,
) -> Statuses {
    let mut statuses = Statuses::new();

    for (index, asrt) in asserts.iter().enumerate() {
        if index > 0 {
            pace(seconds_between).await;
        }

        let name = asrt
            .name
            .clone()
            .unwrap_or_else(|| asrt.assert_type.clone());

        debug!(hostname, assert = name, "sending assert");
        let status = transport.send_assert(hostname, asrt).await;
        statuses.insert(name, status);
    }

    statuses
}

async fn pace(seconds: f64) {
    if seconds > 0.0 && seconds.is_finite() {
        tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ActionData, AssertStatus};
    use crate::testutil::MockTransport;

    fn action(name: &str) -> Action {
        serde_json::from_value(serde_json::json!({"type": "POST", "name": name})).unwrap()
    }

    fn action_with_asserts(name: &str, asserts: serde_json::Value) -> Action {
        serde_json::from_value(serde_json::json!({
            "type": "POST",
            "name": name,
            "asserts": asserts,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn actions_run_in_input_order() {
        let transport = MockTransport::new();
        let actions = vec![action("a1"), action("a2"), action("a3")];

        run_actions(&transport, &actions, &ActionsData::new(), "h1:50051", 0.0).await;

        let log = transport.action_log();
        let names: Vec<_> = log.iter().map(|(_, name)| name.as_str()).collect();
        assert_eq!(names, vec!["a1", "a2", "a3"]);
    }

    #[tokio::test]
    async fn outputs_merge_over_existing_entry() {
        let transport =
            MockTransport::new().with_outputs(serde_json::json!({"status": 200}));
        let actions = vec![action("a1")];

        let mut previous = ActionData::default();
        previous.outputs.insert("status".to_string(), 500.into());
        previous.outputs.insert("attempt".to_string(), 1.into());
        let existing = ActionsData::from([("a1".to_string(), previous)]);

        let data = run_actions(&transport, &actions, &existing, "h1:50051", 0.0).await;

        assert_eq!(data["a1"].outputs["status"], 200);
        assert_eq!(data["a1"].outputs["attempt"], 1);
    }

    #[tokio::test]
    async fn satisfied_inner_asserts_are_not_rerun() {
        let transport = MockTransport::new();
        let actions = vec![action_with_asserts(
            "a1",
            serde_json::json!([
                {"type": "JSON", "name": "Assert0"},
                {"type": "JSON", "name": "Assert1"},
            ]),
        )];

        let mut previous = ActionData::default();
        previous.asserts.insert(
            "Assert0".to_string(),
            AssertStatus {
                passed: true,
                ..Default::default()
            },
        );
        let existing = ActionsData::from([("a1".to_string(), previous)]);

        let data = run_actions(&transport, &actions, &existing, "h1:50051", 0.0).await;

        let log = transport.assert_log();
        let names: Vec<_> = log.iter().map(|(_, name)| name.as_str()).collect();
        assert_eq!(names, vec!["Assert1"]);
        // The sticky pass survives the merge.
        assert!(data["a1"].asserts["Assert0"].passed);
    }

    #[tokio::test]
    async fn asserts_record_status_per_name() {
        let transport = MockTransport::new().failing_asserts();
        let asserts: Vec<Assert> = serde_json::from_value(serde_json::json!([
            {"type": "JSON", "name": "found"},
            {"type": "JSON", "name": "count"},
        ]))
        .unwrap();

        let statuses = run_asserts(&transport, &asserts, "h1:50051", 0.0).await;

        assert_eq!(statuses.len(), 2);
        assert!(!statuses["found"].passed);
        assert!(!statuses["count"].passed);
    }
}
