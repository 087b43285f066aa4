//! Kubernetes runner provisioner.
//!
//! Runs each runner as a Pod/Service pair in the engine's own cluster. The
//! Service selects the Pod by `run` label and exposes port 50051, so the
//! runner's hostname is simply the service name, DNS-resolvable from the
//! engine pod. Volumes map to PersistentVolumeClaims named after the volume
//! source.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PersistentVolumeClaimVolumeSource, Pod, PodSpec, Service,
    ServicePort, ServiceSpec, Volume as PodVolume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, Config};
use tracing::{debug, info, warn};

use super::{
    DynRunner, ProvisionError, ProvisionResult, Runner, RunnerProvisioner, runner_container_name,
    runner_is_healthy,
};
use crate::config::{Settings, Volume};
use crate::messaging::RunnerTransport;

const RUNNER_PORT: i32 = 50051;

/// Kubernetes-backed [`RunnerProvisioner`].
pub struct KubeProvisioner {
    client: Client,
    transport: Arc<dyn RunnerTransport>,
    settings: Settings,
}

impl KubeProvisioner {
    /// Connects using the in-cluster service account configuration.
    pub fn in_cluster(
        transport: Arc<dyn RunnerTransport>,
        settings: Settings,
    ) -> ProvisionResult<Self> {
        let config = Config::incluster()
            .map_err(|err| ProvisionError::CreateFailed(err.to_string()))?;
        let client = Client::try_from(config)
            .map_err(|err| ProvisionError::CreateFailed(err.to_string()))?;

        Ok(Self {
            client,
            transport,
            settings,
        })
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.settings.pod_namespace)
    }

    fn services(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.settings.pod_namespace)
    }

    fn pod_body(
        &self,
        name: &str,
        image: &str,
        env: &HashMap<String, String>,
        run_id: &str,
        volumes: &[Volume],
    ) -> Pod {
        let pod_volumes: Vec<PodVolume> = volumes
            .iter()
            .map(|volume| PodVolume {
                name: volume.source.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: volume.source.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect();

        let volume_mounts: Vec<VolumeMount> = volumes
            .iter()
            .map(|volume| VolumeMount {
                name: volume.source.clone(),
                mount_path: volume.destination.clone(),
                ..Default::default()
            })
            .collect();

        let pod_env: Vec<EnvVar> = env
            .iter()
            .map(|(key, value)| EnvVar {
                name: key.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect();

        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([
                    ("run_id".to_string(), run_id.to_string()),
                    ("run".to_string(), name.to_string()),
                    ("family".to_string(), "cicada".to_string()),
                    ("type".to_string(), "cicada-2-runner".to_string()),
                ])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: name.to_string(),
                    image: Some(image.to_string()),
                    ports: Some(vec![ContainerPort {
                        container_port: RUNNER_PORT,
                        ..Default::default()
                    }]),
                    env: Some(pod_env),
                    volume_mounts: Some(volume_mounts),
                    ..Default::default()
                }],
                volumes: Some(pod_volumes),
                service_account_name: Some(self.settings.pod_service_account.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn service_body(&self, name: &str, run_id: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([
                    ("run_id".to_string(), run_id.to_string()),
                    ("family".to_string(), "cicada".to_string()),
                    ("type".to_string(), "cicada-2-runner".to_string()),
                ])),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port: RUNNER_PORT,
                    target_port: Some(IntOrString::Int(RUNNER_PORT)),
                    ..Default::default()
                }]),
                selector: Some(BTreeMap::from([("run".to_string(), name.to_string())])),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Polls the pod until its phase reports `Running`.
    async fn wait_for_pod(&self, name: &str) -> ProvisionResult<()> {
        let pods = self.pods();

        loop {
            let pod = pods.get(name).await.map_err(|err| {
                ProvisionError::CreateFailed(format!("Unable to create pod: {err}"))
            })?;

            let phase = pod.status.and_then(|status| status.phase);
            if phase.as_deref() == Some("Running") {
                return Ok(());
            }

            debug!(pod = name, ?phase, "waiting for pod to run");
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

#[async_trait]
impl RunnerProvisioner for KubeProvisioner {
    async fn create_runner(
        &self,
        image: &str,
        env: &HashMap<String, String>,
        run_id: &str,
        volumes: &[Volume],
    ) -> ProvisionResult<DynRunner> {
        let name = runner_container_name(image);

        debug!(pod = %name, image, "creating runner pod");

        self.pods()
            .create(&PostParams::default(), &self.pod_body(&name, image, env, run_id, volumes))
            .await
            .map_err(|err| ProvisionError::CreateFailed(format!("Unable to create pod: {err}")))?;

        self.wait_for_pod(&name).await?;

        self.services()
            .create(&PostParams::default(), &self.service_body(&name, run_id))
            .await
            .map_err(|err| ProvisionError::CreateFailed(format!("Unable to create pod: {err}")))?;

        let runner = KubeRunner {
            pods: self.pods(),
            services: self.services(),
            name,
        };

        if !runner_is_healthy(
            self.transport.as_ref(),
            &runner.hostname(),
            self.settings.healthcheck_initial_wait,
            self.settings.healthcheck_max_retries,
        )
        .await
        {
            if let Err(err) = runner.remove().await {
                warn!(pod = %runner.name, error = %err, "failed to delete unhealthy pod");
            }

            return Err(ProvisionError::Unhealthy(
                "Unable to successfully contact container".to_string(),
            ));
        }

        info!(pod = %runner.name, "successfully created pod");
        Ok(Box::new(runner))
    }

    fn name(&self) -> &'static str {
        "kubernetes"
    }
}

/// A runner backed by a Pod/Service pair. Both are deleted together on
/// removal.
pub struct KubeRunner {
    pods: Api<Pod>,
    services: Api<Service>,
    name: String,
}

#[async_trait]
impl Runner for KubeRunner {
    fn hostname(&self) -> String {
        format!("{}:50051", self.name)
    }

    async fn remove(&self) -> ProvisionResult<()> {
        debug!(pod = %self.name, "stopping pod and service");

        self.pods
            .delete(&self.name, &DeleteParams::default())
            .await
            .map_err(|err| {
                ProvisionError::RemoveFailed(format!("Unable to stop pod {}: {err}", self.name))
            })?;

        self.services
            .delete(&self.name, &DeleteParams::default())
            .await
            .map_err(|err| {
                ProvisionError::RemoveFailed(format!("Unable to stop pod {}: {err}", self.name))
            })?;

        Ok(())
    }
}
