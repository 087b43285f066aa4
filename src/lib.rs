//! # cicada-engine
//!
//! The test execution engine of a distributed integration-test
//! orchestrator. A test is a declarative document listing **actions**
//! (operations performed against an external system) and **asserts**
//! (observations that must hold). The engine provisions ephemeral
//! **runners** - containerized gRPC workers that each speak one protocol
//! family (REST, SQL, Kafka, S3, gRPC) - drives actions and asserts
//! against them in cycles, aggregates the results, and produces a summary.
//!
//! ## Architecture
//!
//! The crate is organized into five subsystems:
//!
//! ### Provisioners ([`provisioner`])
//!
//! Provisioners create and reap runner containers. Each backend implements
//! the [`RunnerProvisioner`] trait:
//!
//! - [`provisioner::docker::DockerProvisioner`] - containers on a Docker daemon
//! - [`provisioner::kube::KubeProvisioner`] - Pod/Service pairs in-cluster
//!
//! Both health-gate new runners over gRPC with exponential backoff before
//! handing them to the engine.
//!
//! ### Messaging ([`messaging`])
//!
//! [`RunnerTransport`] isolates the engine from the wire protocol. The
//! production implementation, [`GrpcTransport`], speaks the runner gRPC
//! contract over insecure channels; transport failures become sentinel
//! results so runner flakiness looks like a failing assertion rather than
//! an error.
//!
//! ### Engine ([`engine`])
//!
//! The cycle loop: each cycle distributes actions, then the asserts still
//! unsatisfied, across the runner pool using the `parallel` or `series`
//! strategy, and folds the shard results into the test's state.
//! [`engine::run_test_with_timeout`] layers a cooperative deadline on top.
//!
//! ### Orchestration ([`orchestrator`])
//!
//! [`TestOrchestrator`] composes a whole test: render, provision, execute
//! under the timeout, reap on every exit path, and merge the result into
//! the accumulated [`State`].
//!
//! ### State ([`state`])
//!
//! The accumulating record of what every test produced, with the
//! associative merges that combine shard results.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cicada_engine::config::{Settings, TestConfig};
//! use cicada_engine::messaging::GrpcTransport;
//! use cicada_engine::orchestrator::TestOrchestrator;
//! use cicada_engine::provisioner::docker::DockerProvisioner;
//! use cicada_engine::state::State;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Arc::new(GrpcTransport::new());
//!     let provisioner = Arc::new(DockerProvisioner::new(
//!         transport.clone(),
//!         Settings::from_env(),
//!     )?);
//!
//!     let test_config: TestConfig = serde_json::from_str(r#"{
//!         "name": "api-smoke",
//!         "runner": "rest-runner",
//!         "config": {"base_url": "http://api:8080"},
//!         "actions": [{"type": "GET", "params": {"path": "/health"}}]
//!     }"#)?;
//!
//!     let orchestrator = TestOrchestrator::new(
//!         provisioner,
//!         transport,
//!         test_config,
//!         uuid::Uuid::new_v4().to_string(),
//!     );
//!
//!     let state = orchestrator.run(&State::new()).await;
//!     println!("{:#?}", state["api-smoke"].summary);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod messaging;
pub mod orchestrator;
pub mod provisioner;
pub mod state;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export the types most consumers need.

pub use config::{Settings, TestConfig};
pub use engine::{run_test, run_test_with_timeout};
pub use error::{EngineError, EngineResult};
pub use messaging::{GrpcTransport, RunnerTransport};
pub use orchestrator::{Renderer, TestOrchestrator};
pub use provisioner::{Runner, RunnerProvisioner};
pub use state::{State, TestSummary};
