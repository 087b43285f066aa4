//! Timeout supervision for test execution.
//!
//! Timeouts are cooperative: the supervisor races the test task against a
//! deadline task and cancels a shared token when either finishes. The cycle
//! engine observes the token at cycle boundaries, so in-flight RPCs and
//! intra-cycle sleeps are never interrupted; runner-side work is assumed
//! bounded by the pacing delays and individual RPC latency.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::TestConfig;
use crate::engine::run_test;
use crate::error::{EngineError, EngineResult};
use crate::messaging::RunnerTransport;
use crate::state::State;

/// Runs [`run_test`] bounded by `duration` seconds.
///
/// A `None` or negative duration runs the test inline with no timeout.
/// Otherwise the test runs as its own task alongside a deadline task that
/// wakes every `secondsBetweenCycles` to check the clock; whichever
/// finishes first, the shared token is cancelled so the other stops. When
/// the deadline fires first the supervisor still waits for the test to
/// reach its next cycle boundary and return its state, but bounds that wait
/// by `duration` plus one cycle; a test that stays unresponsive past the
/// bound is aborted and surfaced as an execution error.
pub async fn run_test_with_timeout(
    transport: Arc<dyn RunnerTransport>,
    test_config: &TestConfig,
    incoming_state: &State,
    hostnames: &[String],
    duration: Option<i64>,
) -> EngineResult<State> {
    let Some(duration) = duration.filter(|secs| *secs >= 0) else {
        return run_test(transport.as_ref(), test_config, incoming_state, hostnames, None).await;
    };

    debug!(test = %test_config.name, duration, "test duration config");

    let token = CancellationToken::new();
    let pace = cycle_pace(test_config);
    let deadline = Duration::from_secs(duration as u64);

    let mut test_task = tokio::spawn({
        let transport = Arc::clone(&transport);
        let test_config = test_config.clone();
        let incoming_state = incoming_state.clone();
        let hostnames = hostnames.to_vec();
        let token = token.clone();

        async move {
            run_test(
                transport.as_ref(),
                &test_config,
                &incoming_state,
                &hostnames,
                Some(&token),
            )
            .await
        }
    });

    let deadline_task = tokio::spawn(watch_deadline(deadline, pace, token.clone()));

    tokio::select! {
        result = &mut test_task => {
            token.cancel();
            flatten(result)
        }
        _ = deadline_task => {
            info!(test = %test_config.name, "test timed out");
            token.cancel();

            // The test exits at its next cycle boundary after observing the
            // token; bound the wait in case it never gets there.
            let grace = deadline + pace;
            match tokio::time::timeout(grace, &mut test_task).await {
                Ok(result) => flatten(result),
                Err(_) => {
                    test_task.abort();
                    Err(EngineError::Execution(format!(
                        "Test {} did not stop within {:?} of its timeout",
                        test_config.name, grace
                    )))
                }
            }
        }
    }
}

/// Sleeps in cycle-sized increments until the deadline passes or the token
/// is cancelled by a finished test.
async fn watch_deadline(duration: Duration, pace: Duration, token: CancellationToken) {
    let end = tokio::time::Instant::now() + duration;

    while tokio::time::Instant::now() <= end && !token.is_cancelled() {
        tokio::time::sleep(pace).await;
    }
}

fn cycle_pace(test_config: &TestConfig) -> Duration {
    let seconds = test_config.seconds_between_cycles;

    if seconds.is_finite() && seconds >= 0.0 {
        Duration::from_secs_f64(seconds)
    } else {
        // Invalid pacing fails validation inside run_test; any positive
        // pace keeps the deadline task well-behaved until then.
        Duration::from_secs(1)
    }
}

fn flatten(result: Result<EngineResult<State>, tokio::task::JoinError>) -> EngineResult<State> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(EngineError::Execution(err.to_string())),
    }
}
