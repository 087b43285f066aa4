//! Schema of the declarative test document.
//!
//! A test lists **actions** (operations performed against the system under
//! test) and **asserts** (observations that must hold), plus the knobs that
//! control how they are driven: runner image, runner count, pacing delays,
//! cycle budget, timeout, and distribution strategies.
//!
//! Parsing test documents from disk and template substitution happen outside
//! the engine; this module only defines the shape the engine consumes.
//! Field names follow the document convention (`secondsBetweenActions`,
//! `runnerCount`, ...) via camelCase renaming.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single test: the primary input boundary of the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConfig {
    /// Unique test name; keys the test's entry in the run state.
    pub name: String,

    /// Human-readable description, carried into the summary.
    #[serde(default)]
    pub description: Option<String>,

    /// Source file the test was loaded from, carried into the summary.
    #[serde(default)]
    pub filename: Option<String>,

    /// Well-known runner name (`rest-runner`, `sql-runner`, ...).
    ///
    /// Resolved to an image via the runner catalog. Either this or
    /// [`image`](Self::image) must be set.
    #[serde(default)]
    pub runner: Option<String>,

    /// Explicit container image, used when [`runner`](Self::runner) is unset.
    #[serde(default)]
    pub image: Option<String>,

    /// Runner configuration, exported to the container as
    /// `RUNNER_<UPPERCASE_KEY>` environment variables.
    #[serde(default)]
    pub config: HashMap<String, String>,

    /// Number of runner containers to provision for this test.
    ///
    /// Default: 1
    #[serde(default = "default_runner_count")]
    pub runner_count: u32,

    /// Host directories shared with the runner containers.
    #[serde(default)]
    pub volumes: Vec<Volume>,

    /// Cycle budget. Unset derives a default from the test contents;
    /// a negative value means unlimited.
    #[serde(default)]
    pub cycles: Option<i64>,

    /// Seconds to pause between consecutive actions on one hostname.
    ///
    /// Default: 0
    #[serde(default)]
    pub seconds_between_actions: f64,

    /// Seconds to pause between consecutive asserts on one hostname.
    ///
    /// Default: 0
    #[serde(default)]
    pub seconds_between_asserts: f64,

    /// Seconds to pause between cycles while the test keeps running.
    ///
    /// Also paces the timeout supervisor's deadline checks.
    ///
    /// Default: 1
    #[serde(default = "default_seconds_between_cycles")]
    pub seconds_between_cycles: f64,

    /// Test timeout in seconds. Explicit `null` (or a negative value)
    /// disables the timeout entirely.
    ///
    /// Default: 15
    #[serde(default = "default_timeout")]
    pub timeout: Option<i64>,

    /// How actions are spread across the runner pool each cycle:
    /// `"parallel"` (every hostname runs the full list) or `"series"`
    /// (round-robin, each action runs once).
    ///
    /// Kept as a string because templating may substitute it; validated
    /// before the cycle loop starts.
    ///
    /// Default: `"parallel"`
    #[serde(default = "default_action_strategy")]
    pub action_distribution_strategy: String,

    /// How asserts are spread across the runner pool each cycle.
    ///
    /// Default: `"series"`
    #[serde(default = "default_assert_strategy")]
    pub assert_distribution_strategy: String,

    /// Operations to perform each cycle.
    #[serde(default)]
    pub actions: Vec<Action>,

    /// Observations that must eventually hold.
    #[serde(default)]
    pub asserts: Vec<Assert>,
}

/// An operation dispatched to a runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    /// Action type, interpreted by the runner (e.g. `POST`, `Statement`).
    #[serde(rename = "type")]
    pub action_type: String,

    /// Action name; auto-assigned during validation when absent.
    /// Unique within a test.
    #[serde(default)]
    pub name: Option<String>,

    /// Opaque payload forwarded to the runner as UTF-8 JSON.
    #[serde(default = "empty_params")]
    pub params: Value,

    /// Asserts evaluated against the same hostname right after the action.
    #[serde(default)]
    pub asserts: Vec<Assert>,

    /// Runner-type-specific fields, preserved but not interpreted.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// An observation dispatched to a runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assert {
    /// Assert type, interpreted by the runner (e.g. `JSON`, `RowCount`).
    #[serde(rename = "type")]
    pub assert_type: String,

    /// Assert name; auto-assigned during validation when absent.
    /// Unique within its scope (test or parent action).
    #[serde(default)]
    pub name: Option<String>,

    /// Opaque payload forwarded to the runner as UTF-8 JSON.
    #[serde(default = "empty_params")]
    pub params: Value,

    /// Runner-type-specific fields, preserved but not interpreted.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A host directory mounted read-write into a runner container.
///
/// On Kubernetes, `source` names a PersistentVolumeClaim instead of a host
/// path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub source: String,
    pub destination: String,
}

fn default_runner_count() -> u32 {
    1
}

fn default_seconds_between_cycles() -> f64 {
    1.0
}

fn default_timeout() -> Option<i64> {
    Some(15)
}

fn default_action_strategy() -> String {
    "parallel".to_string()
}

fn default_assert_strategy() -> String {
    "series".to_string()
}

fn empty_params() -> Value {
    Value::Object(serde_json::Map::new())
}
