//! Per-test orchestration: provision, run, reap, summarize.
//!
//! [`TestOrchestrator`] wires one test's full lifecycle into a single
//! state-to-state step: render the test config against the incoming state,
//! resolve the runner image, provision and health-gate the runner pool,
//! drive the cycle engine under its timeout, reap the runners, and merge
//! the test's new entry over the incoming state.
//!
//! [`run`](TestOrchestrator::run) is total: every fatal error (invalid
//! config, provisioning, execution) becomes a [`TestSummary`] with its
//! `error` field set, and the incoming state is returned with that entry
//! merged in. Runners are reaped on every exit path; reap failures are
//! logged and never change the outcome.

use std::sync::Arc;

use tracing::{error, warn};

use crate::config::TestConfig;
use crate::engine::run_test_with_timeout;
use crate::error::{EngineError, EngineResult};
use crate::messaging::RunnerTransport;
use crate::provisioner::{DynRunner, RunnerProvisioner, resolve_image, runner_env};
use crate::state::{State, TestState, TestSummary};

/// Template substitution over a test config, applied against the state
/// accumulated by earlier tests.
///
/// Templating itself lives outside the engine; implementations plug in
/// here. [`IdentityRenderer`] is the default for callers that pre-render.
pub trait Renderer: Send + Sync {
    fn render(&self, config: &TestConfig, state: &State) -> EngineResult<TestConfig>;
}

/// A [`Renderer`] that returns the config unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityRenderer;

impl Renderer for IdentityRenderer {
    fn render(&self, config: &TestConfig, _state: &State) -> EngineResult<TestConfig> {
        Ok(config.clone())
    }
}

/// Runs one test against freshly provisioned runners.
pub struct TestOrchestrator {
    provisioner: Arc<dyn RunnerProvisioner>,
    transport: Arc<dyn RunnerTransport>,
    renderer: Arc<dyn Renderer>,
    test_config: TestConfig,
    run_id: String,
}

impl TestOrchestrator {
    pub fn new(
        provisioner: Arc<dyn RunnerProvisioner>,
        transport: Arc<dyn RunnerTransport>,
        test_config: TestConfig,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            provisioner,
            transport,
            renderer: Arc::new(IdentityRenderer),
            test_config,
            run_id: run_id.into(),
        }
    }

    /// Replaces the template renderer.
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Runs the test and returns the incoming state with this test's entry
    /// merged in. Never fails: fatal errors become an error summary.
    pub async fn run(&self, incoming_state: &State) -> State {
        let new_state = match self.execute(incoming_state).await {
            Ok(new_state) => new_state,
            Err(err) => {
                error!(
                    test = %self.test_config.name,
                    error = %err,
                    "error creating test"
                );
                error_state(&self.test_config, &err)
            }
        };

        let mut merged = incoming_state.clone();
        merged.extend(new_state);
        merged
    }

    async fn execute(&self, incoming_state: &State) -> EngineResult<State> {
        let rendered = self.renderer.render(&self.test_config, incoming_state)?;

        let image = resolve_image(&rendered)?;
        let env = runner_env(&rendered.config);

        let mut runners: Vec<DynRunner> = Vec::new();

        for _ in 0..rendered.runner_count {
            match self
                .provisioner
                .create_runner(&image, &env, &self.run_id, &rendered.volumes)
                .await
            {
                Ok(runner) => runners.push(runner),
                Err(err) => {
                    // Reap the already-provisioned prefix before surfacing.
                    self.reap(&runners).await;
                    return Err(err.into());
                }
            }
        }

        let hostnames: Vec<String> = runners.iter().map(|runner| runner.hostname()).collect();

        let result = run_test_with_timeout(
            Arc::clone(&self.transport),
            &rendered,
            incoming_state,
            &hostnames,
            rendered.timeout,
        )
        .await;

        self.reap(&runners).await;

        match result {
            Ok(new_state) => Ok(new_state),
            Err(err) => {
                error!(test = %rendered.name, error = %err, "error running test");
                Ok(error_state(&rendered, &err))
            }
        }
    }

    async fn reap(&self, runners: &[DynRunner]) {
        for runner in runners {
            if let Err(err) = runner.remove().await {
                warn!(
                    hostname = %runner.hostname(),
                    backend = self.provisioner.name(),
                    error = %err,
                    "failed to remove runner"
                );
            }
        }
    }
}

/// A state entry carrying only an error summary for `config`.
fn error_state(config: &TestConfig, err: &EngineError) -> State {
    State::from([(
        config.name.clone(),
        TestState {
            summary: Some(TestSummary {
                description: config.description.clone(),
                completed_cycles: 0,
                remaining_asserts: Vec::new(),
                error: Some(err.to_string()),
                duration: 0,
                filename: config.filename.clone(),
            }),
            ..Default::default()
        },
    )])
}
