//! Test execution engine.
//!
//! The engine drives a test's actions and asserts against a pool of runner
//! hostnames in cycles. One cycle dispatches all actions, then the asserts
//! still unsatisfied, across the pool; the loop continues until the cycle
//! budget runs out, every assert is satisfied, or the cooperative
//! cancellation token fires.
//!
//! # Components
//!
//! - [`dispatch`] - per-hostname sequenced execution (one shard)
//! - [`strategy`] - `parallel` / `series` fan-out across the pool
//! - [`timeout`] - races [`run_test`] against a deadline
//!
//! [`run_test`] owns a clone of the incoming state; shard results fold back
//! in between cycles, so cycle *k+1* always observes cycle *k*'s merged
//! data. Incoming state is never mutated.

pub mod dispatch;
pub mod strategy;
pub mod timeout;

use std::collections::HashSet;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{Action, Assert, TestConfig};
use crate::error::{EngineError, EngineResult};
use crate::messaging::RunnerTransport;
use crate::state::{
    ActionsData, State, Statuses, TestSummary, create_item_name, get_remaining_asserts,
};
use strategy::{DistributionStrategy, distribute_actions, distribute_asserts};

pub use timeout::run_test_with_timeout;

/// Remaining cycles for a test.
///
/// The unlimited case is explicit rather than a negative sentinel so the
/// loop predicate cannot terminate on it by accident; a negative configured
/// `cycles` value maps to [`Unlimited`](Self::Unlimited).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleBudget {
    /// Run until every assert is satisfied (or a timeout intervenes).
    Unlimited,
    /// Run at most this many more cycles.
    Finite(i64),
}

impl CycleBudget {
    /// Budget for a test: the configured `cycles` if present, otherwise
    /// derived from the test contents via [`get_default_cycles`].
    pub fn for_test(config: &TestConfig) -> Self {
        match config.cycles {
            Some(cycles) if cycles < 0 => Self::Unlimited,
            Some(cycles) => Self::Finite(cycles),
            None => get_default_cycles(&config.actions, &config.asserts),
        }
    }

    /// Whether the budget allows no further cycles.
    pub fn is_exhausted(self) -> bool {
        self == Self::Finite(0)
    }

    fn decrement(self) -> Self {
        match self {
            Self::Unlimited => Self::Unlimited,
            Self::Finite(cycles) => Self::Finite(cycles - 1),
        }
    }
}

fn action_has_asserts(action: &Action) -> bool {
    !action.asserts.is_empty()
}

fn actions_have_asserts(actions: &[Action]) -> bool {
    actions.iter().any(action_has_asserts)
}

/// Default cycle budget for a test without an explicit `cycles` value.
///
/// Asserts anywhere mean "run until they all pass"; bare actions run one
/// cycle; an empty test does not run at all.
pub fn get_default_cycles(actions: &[Action], asserts: &[Assert]) -> CycleBudget {
    if !asserts.is_empty() || actions_have_asserts(actions) {
        CycleBudget::Unlimited
    } else if !actions.is_empty() {
        CycleBudget::Finite(1)
    } else {
        CycleBudget::Finite(0)
    }
}

/// Whether the cycle loop should keep going.
///
/// A test with no assertions of any kind runs while cycles remain. A test
/// with assertions additionally stops once nothing remains unsatisfied,
/// at top level or inside any action.
pub fn continue_running(
    actions: &[Action],
    asserts: &[Assert],
    remaining_cycles: CycleBudget,
    actions_data: &ActionsData,
    assert_statuses: &Statuses,
) -> bool {
    if remaining_cycles.is_exhausted() {
        return false;
    }

    if asserts.is_empty() && !actions_have_asserts(actions) {
        return true;
    }

    !get_remaining_asserts(asserts, assert_statuses).is_empty()
        || actions.iter().any(|action| {
            match action
                .name
                .as_deref()
                .and_then(|name| actions_data.get(name))
            {
                Some(data) => !get_remaining_asserts(&action.asserts, &data.asserts).is_empty(),
                None => !action.asserts.is_empty(),
            }
        })
}

/// Assigns default action/assert names and enforces uniqueness.
pub fn verify_action_names(actions: &mut [Action], test_name: &str) -> EngineResult<()> {
    let mut action_names: Vec<String> = Vec::new();

    for action in actions.iter_mut() {
        if action.action_type.is_empty() {
            return Err(EngineError::InvalidConfig(format!(
                "Action in test '{test_name}' is missing property 'type'"
            )));
        }

        let name = action
            .name
            .clone()
            .unwrap_or_else(|| create_item_name(&action.action_type, &action_names));
        action.name = Some(name.clone());
        action_names.push(name.clone());

        let mut assert_names: Vec<String> = Vec::new();

        for (index, asrt) in action.asserts.iter_mut().enumerate() {
            let assert_name = asrt.name.clone().unwrap_or_else(|| format!("Assert{index}"));
            asrt.name = Some(assert_name.clone());
            assert_names.push(assert_name);
        }

        if assert_names.iter().collect::<HashSet<_>>().len() != assert_names.len() {
            return Err(EngineError::InvalidConfig(format!(
                "Assert names for action {name} if specified must be unique"
            )));
        }
    }

    if action_names.iter().collect::<HashSet<_>>().len() != action_names.len() {
        return Err(EngineError::InvalidConfig(
            "Action names if specified must be unique".to_string(),
        ));
    }

    Ok(())
}

/// Assigns default top-level assert names and enforces uniqueness.
pub fn verify_assert_names(asserts: &mut [Assert], test_name: &str) -> EngineResult<()> {
    let mut assert_names: Vec<String> = Vec::new();

    for asrt in asserts.iter_mut() {
        if asrt.assert_type.is_empty() {
            return Err(EngineError::InvalidConfig(format!(
                "Assert in test '{test_name}' is missing property 'type'"
            )));
        }

        let name = asrt
            .name
            .clone()
            .unwrap_or_else(|| create_item_name(&asrt.assert_type, &assert_names));
        asrt.name = Some(name.clone());
        assert_names.push(name);
    }

    if assert_names.iter().collect::<HashSet<_>>().len() != assert_names.len() {
        return Err(EngineError::InvalidConfig(
            "Assert names if specified must be unique".to_string(),
        ));
    }

    Ok(())
}

fn verify_pacing(config: &TestConfig) -> EngineResult<()> {
    for (field, value) in [
        ("secondsBetweenActions", config.seconds_between_actions),
        ("secondsBetweenAsserts", config.seconds_between_asserts),
        ("secondsBetweenCycles", config.seconds_between_cycles),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "{field} must be a non-negative number, got {value}"
            )));
        }
    }

    Ok(())
}

/// Runs the test's cycle loop and returns the new state, summary included.
///
/// Incoming state is cloned, never mutated. When `cancellation` is set, the
/// token is polled at the top of each cycle so a timeout supervisor can end
/// the test at the next cycle boundary; in-flight work is never interrupted.
pub async fn run_test(
    transport: &dyn RunnerTransport,
    test_config: &TestConfig,
    incoming_state: &State,
    hostnames: &[String],
    cancellation: Option<&CancellationToken>,
) -> EngineResult<State> {
    let mut actions = test_config.actions.clone();
    let mut asserts = test_config.asserts.clone();

    if hostnames.is_empty() {
        return Err(EngineError::InvalidConfig(
            "Must have at least one host to run tests".to_string(),
        ));
    }

    verify_action_names(&mut actions, &test_config.name)?;
    verify_assert_names(&mut asserts, &test_config.name)?;
    verify_pacing(test_config)?;

    let action_strategy = DistributionStrategy::parse_field(
        "actionDistributionStrategy",
        &test_config.action_distribution_strategy,
    )?;
    let assert_strategy = DistributionStrategy::parse_field(
        "assertDistributionStrategy",
        &test_config.assert_distribution_strategy,
    )?;

    let mut remaining_cycles = CycleBudget::for_test(test_config);
    let mut completed_cycles = 0u32;

    let mut state = incoming_state.clone();
    let mut test_state = state.remove(&test_config.name).unwrap_or_default();

    let start = tokio::time::Instant::now();

    while continue_running(
        &actions,
        &asserts,
        remaining_cycles,
        &test_state.actions,
        &test_state.asserts,
    ) {
        if let Some(token) = cancellation {
            if token.is_cancelled() {
                debug!(test = %test_config.name, "cancellation observed, stopping");
                break;
            }
        }

        if !actions.is_empty() {
            test_state.actions = distribute_actions(
                action_strategy,
                transport,
                &actions,
                test_state.actions.clone(),
                hostnames,
                test_config.seconds_between_actions,
            )
            .await;
        }

        if !asserts.is_empty() {
            let remaining: Vec<Assert> = get_remaining_asserts(&asserts, &test_state.asserts)
                .into_iter()
                .cloned()
                .collect();

            test_state.asserts = distribute_asserts(
                assert_strategy,
                transport,
                &remaining,
                test_state.asserts.clone(),
                hostnames,
                test_config.seconds_between_asserts,
            )
            .await;
        }

        remaining_cycles = remaining_cycles.decrement();
        completed_cycles += 1;

        if continue_running(
            &actions,
            &asserts,
            remaining_cycles,
            &test_state.actions,
            &test_state.asserts,
        ) {
            tokio::time::sleep(Duration::from_secs_f64(test_config.seconds_between_cycles)).await;
        }
    }

    let remaining_asserts = get_remaining_asserts(&asserts, &test_state.asserts)
        .into_iter()
        .filter_map(|asrt| asrt.name.clone())
        .collect();

    test_state.summary = Some(TestSummary {
        description: test_config.description.clone(),
        completed_cycles,
        remaining_asserts,
        error: None,
        duration: start.elapsed().as_secs(),
        filename: test_config.filename.clone(),
    });

    state.insert(test_config.name.clone(), test_state);
    Ok(state)
}
