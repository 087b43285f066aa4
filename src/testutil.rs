//! Scripted transport and provisioner doubles shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{Action, Assert, Volume};
use crate::messaging::RunnerTransport;
use crate::provisioner::{
    DynRunner, ProvisionError, ProvisionResult, Runner, RunnerProvisioner,
};
use crate::state::{AssertStatus, Outputs};

/// A [`RunnerTransport`] that records every call and answers from a script.
///
/// Asserts pass by default; [`failing_asserts`](Self::failing_asserts) makes
/// them all fail and [`pass_assert_after`](Self::pass_assert_after) scripts
/// a per-name flip from failing to passing on the nth evaluation.
pub(crate) struct MockTransport {
    outputs: Outputs,
    healthy: bool,
    asserts_pass: bool,
    pass_after: HashMap<String, usize>,
    action_log: Mutex<Vec<(String, String)>>,
    assert_log: Mutex<Vec<(String, String)>>,
    assert_calls: Mutex<HashMap<String, usize>>,
    healthcheck_count: AtomicUsize,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            outputs: Outputs::new(),
            healthy: true,
            asserts_pass: true,
            pass_after: HashMap::new(),
            action_log: Mutex::new(Vec::new()),
            assert_log: Mutex::new(Vec::new()),
            assert_calls: Mutex::new(HashMap::new()),
            healthcheck_count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn unhealthy() -> Self {
        Self {
            healthy: false,
            ..Self::new()
        }
    }

    /// Outputs returned for every action; must be a JSON object.
    pub(crate) fn with_outputs(mut self, outputs: Value) -> Self {
        if let Value::Object(map) = outputs {
            self.outputs = map;
        }
        self
    }

    /// Every assert evaluates to failed.
    pub(crate) fn failing_asserts(mut self) -> Self {
        self.asserts_pass = false;
        self
    }

    /// The named assert fails until its `nth` evaluation (1-based), then
    /// passes. Other asserts keep the default behavior.
    pub(crate) fn pass_assert_after(mut self, name: &str, nth: usize) -> Self {
        self.pass_after.insert(name.to_string(), nth);
        self
    }

    pub(crate) fn action_log(&self) -> Vec<(String, String)> {
        self.action_log.lock().unwrap().clone()
    }

    pub(crate) fn assert_log(&self) -> Vec<(String, String)> {
        self.assert_log.lock().unwrap().clone()
    }

    pub(crate) fn healthchecks(&self) -> usize {
        self.healthcheck_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunnerTransport for MockTransport {
    async fn send_action(&self, address: &str, action: &Action) -> Outputs {
        let name = action
            .name
            .clone()
            .unwrap_or_else(|| action.action_type.clone());
        self.action_log
            .lock()
            .unwrap()
            .push((address.to_string(), name));

        self.outputs.clone()
    }

    async fn send_assert(&self, address: &str, asrt: &Assert) -> AssertStatus {
        let name = asrt
            .name
            .clone()
            .unwrap_or_else(|| asrt.assert_type.clone());
        self.assert_log
            .lock()
            .unwrap()
            .push((address.to_string(), name.clone()));

        let calls = {
            let mut counts = self.assert_calls.lock().unwrap();
            let entry = counts.entry(name.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        let passed = match self.pass_after.get(&name) {
            Some(nth) => calls >= *nth,
            None => self.asserts_pass,
        };

        AssertStatus {
            passed,
            actual: Some("observed".to_string()),
            expected: Some("expected".to_string()),
            description: Some(format!("{name} evaluation {calls}")),
        }
    }

    async fn healthcheck(&self, _address: &str) -> bool {
        self.healthcheck_count.fetch_add(1, Ordering::SeqCst);
        self.healthy
    }
}

/// A [`RunnerProvisioner`] handing out in-memory runners, optionally
/// failing at a scripted creation index.
pub(crate) struct MockProvisioner {
    fail_at: Option<usize>,
    created: AtomicUsize,
    removed: Arc<Mutex<Vec<String>>>,
}

impl MockProvisioner {
    pub(crate) fn new() -> Self {
        Self {
            fail_at: None,
            created: AtomicUsize::new(0),
            removed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail the creation with this zero-based index, as an unhealthy runner
    /// would.
    pub(crate) fn fail_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunnerProvisioner for MockProvisioner {
    async fn create_runner(
        &self,
        _image: &str,
        _env: &HashMap<String, String>,
        _run_id: &str,
        _volumes: &[Volume],
    ) -> ProvisionResult<DynRunner> {
        let index = self.created.load(Ordering::SeqCst);

        if self.fail_at == Some(index) {
            return Err(ProvisionError::Unhealthy(
                "Unable to successfully contact container".to_string(),
            ));
        }

        self.created.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockRunner {
            name: format!("runner-{index}"),
            removed: Arc::clone(&self.removed),
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

pub(crate) struct MockRunner {
    name: String,
    removed: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Runner for MockRunner {
    fn hostname(&self) -> String {
        format!("{}:50051", self.name)
    }

    async fn remove(&self) -> ProvisionResult<()> {
        self.removed.lock().unwrap().push(self.name.clone());
        Ok(())
    }
}
