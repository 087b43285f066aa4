//! gRPC messaging shim between the engine and runner containers.
//!
//! Runners implement the `Runner` service (Action / Assert / Healthcheck)
//! on port 50051 over plaintext TCP; runners are ephemeral and co-located
//! on a private cluster network, so channels are deliberately insecure.
//!
//! The engine talks to runners exclusively through [`RunnerTransport`].
//! The trait's surface is infallible: transport failures map to sentinel
//! results (empty outputs, a failing [`AssertStatus`], `ready == false`)
//! so the cycle engine can treat runner flakiness as an ordinary failing
//! assertion that may recover on the next cycle, instead of leaking wire
//! errors into the driver.

use async_trait::async_trait;
use serde_json::Value;
use tonic::transport::Channel;
use tracing::warn;

use crate::config::{Action, Assert};
use crate::state::{AssertStatus, Outputs};

/// Generated protobuf types and gRPC stubs for the `Runner` service.
///
/// The server stub is generated too so tests can stand up an in-process
/// stub runner.
pub mod proto {
    tonic::include_proto!("runner");
}

use proto::runner_client::RunnerClient;
use proto::{ActionRequest, AssertRequest, Empty};

/// Messaging operations the engine needs from a runner at a given address.
///
/// Implemented by [`GrpcTransport`] for real runners; tests substitute
/// scripted mocks.
#[async_trait]
pub trait RunnerTransport: Send + Sync {
    /// Executes `action` on the runner and returns its outputs.
    ///
    /// Transport failures return the empty mapping.
    async fn send_action(&self, address: &str, action: &Action) -> Outputs;

    /// Evaluates `asrt` on the runner and returns its status.
    ///
    /// Transport failures return a failing status carrying the error details
    /// in `description`.
    async fn send_assert(&self, address: &str, asrt: &Assert) -> AssertStatus;

    /// Returns whether the runner reports itself ready. Any transport
    /// failure counts as not ready.
    async fn healthcheck(&self, address: &str) -> bool;
}

/// [`RunnerTransport`] over tonic insecure channels, one connection per call.
#[derive(Debug, Clone, Default)]
pub struct GrpcTransport;

impl GrpcTransport {
    pub fn new() -> Self {
        Self
    }

    async fn connect(address: &str) -> Result<RunnerClient<Channel>, tonic::transport::Error> {
        RunnerClient::connect(format!("http://{address}")).await
    }
}

#[async_trait]
impl RunnerTransport for GrpcTransport {
    async fn send_action(&self, address: &str, action: &Action) -> Outputs {
        let request = ActionRequest {
            r#type: action.action_type.clone(),
            params: serde_json::to_vec(&action.params).unwrap_or_default(),
        };

        let mut client = match Self::connect(address).await {
            Ok(client) => client,
            Err(err) => {
                warn!(address, error = %err, "failed to reach runner during send_action");
                return Outputs::new();
            }
        };

        match client.action(request).await {
            Ok(response) => parse_outputs(address, &response.into_inner().outputs),
            Err(status) => {
                warn!(
                    address,
                    code = ?status.code(),
                    "received error during send_action: {}",
                    status.message()
                );
                Outputs::new()
            }
        }
    }

    async fn send_assert(&self, address: &str, asrt: &Assert) -> AssertStatus {
        let request = AssertRequest {
            r#type: asrt.assert_type.clone(),
            params: serde_json::to_vec(&asrt.params).unwrap_or_default(),
        };

        let failed = |details: String| AssertStatus {
            passed: false,
            actual: None,
            expected: None,
            description: Some(details),
        };

        let mut client = match Self::connect(address).await {
            Ok(client) => client,
            Err(err) => {
                warn!(address, error = %err, "failed to reach runner during send_assert");
                return failed(err.to_string());
            }
        };

        match client.assert(request).await {
            Ok(response) => {
                let reply = response.into_inner();
                AssertStatus {
                    passed: reply.passed,
                    actual: Some(reply.actual),
                    expected: Some(reply.expected),
                    description: Some(reply.description),
                }
            }
            Err(status) => {
                warn!(
                    address,
                    code = ?status.code(),
                    "received error during send_assert: {}",
                    status.message()
                );
                failed(status.message().to_string())
            }
        }
    }

    async fn healthcheck(&self, address: &str) -> bool {
        let mut client = match Self::connect(address).await {
            Ok(client) => client,
            Err(err) => {
                warn!(address, error = %err, "failed to reach runner during healthcheck");
                return false;
            }
        };

        match client.healthcheck(Empty {}).await {
            Ok(response) => response.into_inner().ready,
            Err(status) => {
                warn!(
                    address,
                    code = ?status.code(),
                    "received error during healthcheck: {}",
                    status.message()
                );
                false
            }
        }
    }
}

/// Parses a runner's UTF-8 JSON outputs into a mapping.
///
/// A runner returning anything other than a JSON object has broken its
/// contract; the outputs are dropped with a warning rather than failing the
/// test, consistent with how transport errors are absorbed.
fn parse_outputs(address: &str, outputs: &str) -> Outputs {
    if outputs.is_empty() {
        return Outputs::new();
    }

    match serde_json::from_str::<Value>(outputs) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(address, "runner returned non-object outputs: {other}");
            Outputs::new()
        }
        Err(err) => {
            warn!(address, error = %err, "runner returned unparseable outputs");
            Outputs::new()
        }
    }
}
