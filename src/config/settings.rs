//! Engine environment settings.
//!
//! Runner containers read their configuration exclusively from `RUNNER_*`
//! environment variables; the engine itself reads the variables below.

use std::env;
use std::time::Duration;

/// Engine-level configuration read from the process environment.
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | `CONTAINER_NETWORK` | `cicada` | Docker network runners are attached to |
/// | `CREATE_NETWORK` | `true` | Create the network when it does not exist |
/// | `HEALTHCHECK_INITIAL_WAIT` | `2` | Seconds before the first health probe |
/// | `HEALTHCHECK_MAX_RETRIES` | `5` | Health probes before giving up |
/// | `POD_NAMESPACE` | `default` | Namespace for runner pods and services |
/// | `POD_SERVICE_ACCOUNT` | `default` | Service account assigned to runner pods |
#[derive(Debug, Clone)]
pub struct Settings {
    pub container_network: String,
    pub create_network: bool,
    pub healthcheck_initial_wait: Duration,
    pub healthcheck_max_retries: u32,
    pub pod_namespace: String,
    pub pod_service_account: String,
}

impl Settings {
    /// Reads settings from the environment, falling back to the documented
    /// defaults for unset or unparseable values.
    pub fn from_env() -> Self {
        Self {
            container_network: string_var("CONTAINER_NETWORK", "cicada"),
            create_network: bool_var("CREATE_NETWORK", true),
            healthcheck_initial_wait: Duration::from_secs(int_var(
                "HEALTHCHECK_INITIAL_WAIT",
                2,
            )),
            healthcheck_max_retries: int_var("HEALTHCHECK_MAX_RETRIES", 5) as u32,
            pod_namespace: string_var("POD_NAMESPACE", "default"),
            pod_service_account: string_var("POD_SERVICE_ACCOUNT", "default"),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            container_network: "cicada".to_string(),
            create_network: true,
            healthcheck_initial_wait: Duration::from_secs(2),
            healthcheck_max_retries: 5,
            pod_namespace: "default".to_string(),
            pod_service_account: "default".to_string(),
        }
    }
}

fn string_var(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn bool_var(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(value.to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

fn int_var(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
