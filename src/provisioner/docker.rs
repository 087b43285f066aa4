//! Docker runner provisioner.
//!
//! Runs runner containers on a local Docker daemon, attached to a named
//! network so the engine can reach them by container name. Containers are
//! labeled with a constant discriminator and the run id so leftovers from
//! one orchestration can be reaped in bulk.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::network::CreateNetworkOptions;
use tracing::{debug, info, warn};

use super::{
    DynRunner, ProvisionError, ProvisionResult, Runner, RunnerProvisioner, runner_container_name,
    runner_is_healthy,
};
use crate::config::{Settings, Volume};
use crate::messaging::RunnerTransport;

/// Label present on every runner container this engine starts.
const RUNNER_LABEL: &str = "cicada-2-runner";

/// Seconds of grace given to a container on stop.
const STOP_GRACE_SECS: i64 = 3;

/// Docker-backed [`RunnerProvisioner`].
pub struct DockerProvisioner {
    docker: Docker,
    transport: Arc<dyn RunnerTransport>,
    settings: Settings,
}

impl DockerProvisioner {
    /// Connects to the local Docker daemon.
    pub fn new(transport: Arc<dyn RunnerTransport>, settings: Settings) -> ProvisionResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|err| ProvisionError::CreateFailed(err.to_string()))?;

        Ok(Self {
            docker,
            transport,
            settings,
        })
    }

    /// Ensures the configured container network exists, creating it when
    /// allowed.
    async fn ensure_network(&self) -> ProvisionResult<()> {
        let network = &self.settings.container_network;

        match self.docker.inspect_network::<String>(network, None).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                if !self.settings.create_network {
                    return Err(ProvisionError::InvalidConfig(format!(
                        "Docker network {network} not configured"
                    )));
                }

                self.docker
                    .create_network(CreateNetworkOptions {
                        name: network.clone(),
                        ..Default::default()
                    })
                    .await
                    .map_err(|err| {
                        ProvisionError::CreateFailed(format!(
                            "Unable to configure docker network: {err}"
                        ))
                    })?;
                info!(%network, "created docker network");
                Ok(())
            }
            Err(err) => Err(ProvisionError::CreateFailed(format!(
                "Unable to configure docker network: {err}"
            ))),
        }
    }

    /// Stops every container labeled with `run_id`, regardless of which
    /// test started it.
    pub async fn clean(&self, run_id: &str) -> ProvisionResult<()> {
        debug!(run_id, "cleaning containers");

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                filters: HashMap::from([("label".to_string(), vec![run_id.to_string()])]),
                ..Default::default()
            }))
            .await
            .map_err(|err| {
                ProvisionError::RemoveFailed(format!(
                    "Unable to stop containers for run ID {run_id}: {err}"
                ))
            })?;

        for container in containers {
            let Some(id) = container.id else { continue };

            if let Err(err) = self
                .docker
                .stop_container(&id, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
                .await
            {
                warn!(container = %id, error = %err, "failed to stop container during clean");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl RunnerProvisioner for DockerProvisioner {
    async fn create_runner(
        &self,
        image: &str,
        env: &HashMap<String, String>,
        run_id: &str,
        volumes: &[Volume],
    ) -> ProvisionResult<DynRunner> {
        self.ensure_network().await?;

        let container_name = runner_container_name(image);

        let env: Vec<String> = env
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();

        let binds: Vec<String> = volumes
            .iter()
            .map(|volume| format!("{}:{}:rw", volume.source, volume.destination))
            .collect();

        let labels = HashMap::from([
            (RUNNER_LABEL.to_string(), String::new()),
            (run_id.to_string(), String::new()),
        ]);

        let container_config = ContainerConfig {
            image: Some(image.to_string()),
            env: Some(env),
            labels: Some(labels),
            host_config: Some(bollard::models::HostConfig {
                binds: Some(binds),
                network_mode: Some(self.settings.container_network.clone()),
                ..Default::default()
            }),
            ..Default::default()
        };

        debug!(image, container = %container_name, "starting runner container");

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: &container_name,
                    platform: None,
                }),
                container_config,
            )
            .await
            .map_err(|err| {
                ProvisionError::CreateFailed(format!("Unable to create container: {err}"))
            })?;

        self.docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|err| {
                ProvisionError::CreateFailed(format!("Unable to create container: {err}"))
            })?;

        let runner = DockerRunner {
            docker: self.docker.clone(),
            container_name,
        };

        debug!(container = %runner.container_name, "healthchecking container");

        if !runner_is_healthy(
            self.transport.as_ref(),
            &runner.hostname(),
            self.settings.healthcheck_initial_wait,
            self.settings.healthcheck_max_retries,
        )
        .await
        {
            if let Err(err) = runner.remove().await {
                warn!(
                    container = %runner.container_name,
                    error = %err,
                    "failed to stop unhealthy container"
                );
            }

            return Err(ProvisionError::Unhealthy(
                "Unable to successfully contact container".to_string(),
            ));
        }

        info!(container = %runner.container_name, "successfully created container");
        Ok(Box::new(runner))
    }

    fn name(&self) -> &'static str {
        "docker"
    }
}

/// A runner backed by a Docker container.
pub struct DockerRunner {
    docker: Docker,
    container_name: String,
}

#[async_trait]
impl Runner for DockerRunner {
    fn hostname(&self) -> String {
        format!("{}:50051", self.container_name)
    }

    async fn remove(&self) -> ProvisionResult<()> {
        debug!(container = %self.container_name, "stopping container");

        self.docker
            .stop_container(
                &self.container_name,
                Some(StopContainerOptions { t: STOP_GRACE_SECS }),
            )
            .await
            .map_err(|err| ProvisionError::RemoveFailed(err.to_string()))
    }
}
