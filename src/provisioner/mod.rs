//! Runner provisioning: trait seams and shared lifecycle helpers.
//!
//! A runner is an ephemeral container speaking the runner gRPC contract.
//! Two backends implement [`RunnerProvisioner`]:
//!
//! - [`docker::DockerProvisioner`] - containers on a local Docker daemon
//! - [`kube::KubeProvisioner`] - Pod/Service pairs in a Kubernetes cluster
//!
//! Both follow the same lifecycle: create the container, gate on the gRPC
//! healthcheck with exponential backoff, hand back a [`Runner`] handle whose
//! hostname the engine dispatches to, and tear the container down when the
//! test ends. A runner that never gates healthy is torn back down before
//! the provisioning error surfaces.

pub mod docker;
pub mod kube;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::TestConfig;
use crate::error::{EngineError, EngineResult};
use crate::messaging::RunnerTransport;

/// Result type for provisioner operations.
pub type ProvisionResult<T> = Result<T, ProvisionError>;

/// Errors that can occur while provisioning or reaping runners.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("{0}")]
    InvalidConfig(String),

    #[error("Failed to create runner: {0}")]
    CreateFailed(String),

    #[error("{0}")]
    Unhealthy(String),

    #[error("Failed to remove runner: {0}")]
    RemoveFailed(String),

    #[error("Provisioner error: {0}")]
    Other(#[from] anyhow::Error),
}

/// A provisioned runner container.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Address the runner's gRPC service is reachable at (`host:50051`).
    fn hostname(&self) -> String;

    /// Tears the runner down. Callers treat failures as non-fatal.
    async fn remove(&self) -> ProvisionResult<()>;
}

/// A type-erased runner handle.
pub type DynRunner = Box<dyn Runner>;

/// Creates runners on some container backend.
#[async_trait]
pub trait RunnerProvisioner: Send + Sync {
    /// Provisions one runner and health-gates it.
    ///
    /// `env` is the runner's full environment; `run_id` is attached as a
    /// label so a bulk reaper can find leftovers from one orchestration.
    async fn create_runner(
        &self,
        image: &str,
        env: &HashMap<String, String>,
        run_id: &str,
        volumes: &[crate::config::Volume],
    ) -> ProvisionResult<DynRunner>;

    /// Backend name, for logging.
    fn name(&self) -> &'static str;
}

/// Maps a well-known runner name to its published image.
pub fn runner_to_image(runner_name: &str) -> Option<&'static str> {
    match runner_name {
        "rest-runner" => Some("cicadatesting/cicada-2-rest-runner"),
        "sql-runner" => Some("cicadatesting/cicada-2-sql-runner"),
        "kafka-runner" => Some("cicadatesting/cicada-2-kafka-runner"),
        "s3-runner" => Some("cicadatesting/cicada-2-s3-runner"),
        "grpc-runner" => Some("cicadatesting/cicada-2-grpc-runner"),
        _ => None,
    }
}

/// Resolves the image for a test: the runner catalog first, then the
/// explicit image field.
pub fn resolve_image(config: &TestConfig) -> EngineResult<String> {
    config
        .runner
        .as_deref()
        .and_then(runner_to_image)
        .map(str::to_string)
        .or_else(|| config.image.clone())
        .ok_or_else(|| {
            EngineError::InvalidConfig("Must specify a valid 'runner' or 'image'".to_string())
        })
}

/// Converts a test's `config` block into the runner environment contract:
/// each key becomes `RUNNER_<UPPERCASE_KEY>`.
pub fn runner_env(config: &HashMap<String, String>) -> HashMap<String, String> {
    config
        .iter()
        .map(|(key, value)| (format!("RUNNER_{}", key.to_uppercase()), value.clone()))
        .collect()
}

/// Derives a unique container name from an image: the last path segment
/// before the tag, suffixed with 8 hex characters.
pub fn runner_container_name(image: &str) -> String {
    let runner_type = image
        .rsplit('/')
        .next()
        .unwrap_or(image)
        .split(':')
        .next()
        .unwrap_or(image);
    let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];

    format!("{runner_type}-{suffix}")
}

/// Probes a runner until it reports ready, backing off exponentially.
///
/// Sleeps `initial_wait` before the first probe and doubles the wait after
/// every failed one, for at most `max_retries` probes. Returns `true` on the
/// first successful probe.
pub async fn runner_is_healthy(
    transport: &dyn RunnerTransport,
    hostname: &str,
    initial_wait: Duration,
    max_retries: u32,
) -> bool {
    let mut wait = initial_wait;

    for attempt in 0..max_retries {
        tokio::time::sleep(wait).await;

        if transport.healthcheck(hostname).await {
            return true;
        }

        debug!(hostname, attempt, "runner not ready yet");
        wait *= 2;
    }

    false
}
