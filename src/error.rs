//! Engine error types.
//!
//! Transport failures never surface here: the messaging client maps them to
//! sentinel results so runner flakiness looks like an ordinary failing
//! assertion that can recover on the next cycle. The variants below are the
//! fatal kinds that end a test and become an error summary. Teardown
//! failures are logged where they occur and never alter a test's outcome.

use crate::provisioner::ProvisionError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// A fatal error while preparing or executing a test.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The test document is unusable: missing image/runner, unknown
    /// distribution strategy, empty hostname pool, duplicate names.
    #[error("{0}")]
    InvalidConfig(String),

    /// A runner could not be provisioned or never became healthy.
    #[error("{0}")]
    Provisioning(String),

    /// Action/assert dispatch failed in a way that is not a transport error.
    #[error("{0}")]
    Execution(String),
}

impl From<ProvisionError> for EngineError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::InvalidConfig(msg) => EngineError::InvalidConfig(msg),
            other => EngineError::Provisioning(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_provisioner_config_stays_invalid_config() {
        let err: EngineError =
            ProvisionError::InvalidConfig("Docker network cicada not configured".to_string())
                .into();

        assert!(matches!(err, EngineError::InvalidConfig(_)));
        assert_eq!(err.to_string(), "Docker network cicada not configured");
    }

    #[test]
    fn unhealthy_runner_maps_to_provisioning() {
        let err: EngineError =
            ProvisionError::Unhealthy("Unable to successfully contact container".to_string())
                .into();

        assert!(matches!(err, EngineError::Provisioning(_)));
    }
}
