//! Docker implementation of the engine capability.
//!
//! Talks to the local Docker daemon through `bollard`. Containers are
//! named `namespace.name` on the engine and carry the management labels
//! of `constants`; listing filters on those labels, so containers created
//! by other tools are invisible to the core except as port or name
//! conflicts surfaced by the engine itself.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::image::{CreateImageOptions, ListImagesOptions, RemoveImageOptions};
use bollard::models::{
    ContainerStateStatusEnum, HostConfig, PortBinding as EnginePortBinding,
    RestartPolicy as EngineRestartPolicy, RestartPolicyNameEnum,
};
use bollard::network::InspectNetworkOptions;
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tracing::{debug, info, warn};

use crate::constants::{
    IMAGE_PULL_TIMEOUT, LABEL_HASH, LABEL_MANIFEST_HASH, LABEL_NAME, LABEL_NAMESPACE,
};
use crate::engine::{EngineClient, WaitOutcome};
use crate::error::{Error, Result};
use crate::name::{ContainerName, ImageName};
use crate::pod::spec::{
    ContainerSpec, NetMode, ObservedContainer, ObservedState, ObservedStatus, RestartPolicy,
    VolumeSpec,
};

/// Engine client backed by the local Docker daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects to the daemon via the platform's default socket and
    /// verifies it responds.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::EngineUnavailable(e.to_string()))?;
        docker
            .ping()
            .await
            .map_err(|e| Error::EngineUnavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Lists and inspects every container matching the label filters,
    /// then resolves engine-id references between them so dependency
    /// edges carry container names.
    async fn observe(&self, filters: HashMap<String, Vec<String>>) -> Result<Vec<ObservedContainer>> {
        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| op_err("list", "containers", e))?;

        let mut inspected = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let Some(id) = summary.id else { continue };
            let details = self
                .docker
                .inspect_container(&id, None)
                .await
                .map_err(|e| op_err("inspect", &id, e))?;
            inspected.push((id, details));
        }

        let names_by_id: HashMap<String, ContainerName> = inspected
            .iter()
            .filter_map(|(id, details)| {
                observed_name(details).map(|name| (id.clone(), name))
            })
            .collect();

        let mut observed = Vec::with_capacity(inspected.len());
        for (id, details) in inspected {
            let Some(name) = observed_name(&details) else {
                warn!(id = %id, "skipping container without resolvable name");
                continue;
            };

            let labels: BTreeMap<String, String> = details
                .config
                .as_ref()
                .and_then(|c| c.labels.clone())
                .unwrap_or_default()
                .into_iter()
                .collect();

            let image = details
                .config
                .as_ref()
                .and_then(|c| c.image.as_deref())
                .and_then(|s| ImageName::parse(s).ok())
                .unwrap_or(ImageName {
                    registry: None,
                    repository: "unknown".to_string(),
                    tag: None,
                });

            let state = details
                .state
                .as_ref()
                .map(|s| {
                    let running = s.running.unwrap_or(false);
                    let status = if running {
                        ObservedStatus::Running
                    } else if matches!(s.status, Some(ContainerStateStatusEnum::CREATED)) {
                        ObservedStatus::Created
                    } else {
                        ObservedStatus::Exited
                    };
                    ObservedState {
                        status,
                        exit_code: s.exit_code,
                        started_at: parse_engine_time(s.started_at.as_deref()),
                        finished_at: parse_engine_time(s.finished_at.as_deref()),
                    }
                })
                .unwrap_or_else(ObservedState::created);

            let host_config = details.host_config.as_ref();
            let restart = host_config
                .and_then(|hc| hc.restart_policy.as_ref())
                .map(observed_restart)
                .unwrap_or_default();

            let mut depends = Vec::new();
            for entry in host_config
                .and_then(|hc| hc.volumes_from.clone())
                .unwrap_or_default()
            {
                let reference = entry
                    .trim_end_matches(":ro")
                    .trim_end_matches(":rw")
                    .to_string();
                if let Some(dep) = resolve_reference(&reference, &names_by_id) {
                    depends.push(dep);
                }
            }
            for link in host_config.and_then(|hc| hc.links.clone()).unwrap_or_default() {
                // Inspect reports links as `/target:/source/alias`.
                let target = link.split(':').next().unwrap_or("").trim_start_matches('/');
                if let Some(dep) = resolve_reference(target, &names_by_id) {
                    depends.push(dep);
                }
            }
            if let Some(mode) = host_config.and_then(|hc| hc.network_mode.as_deref()) {
                if let Some(target) = mode.strip_prefix("container:") {
                    if let Some(dep) = resolve_reference(target, &names_by_id) {
                        depends.push(dep);
                    }
                }
            }
            depends.sort();
            depends.dedup();

            observed.push(ObservedContainer {
                name,
                id,
                image,
                hash: labels.get(LABEL_HASH).cloned(),
                manifest_hash: labels.get(LABEL_MANIFEST_HASH).cloned(),
                state,
                restart,
                depends,
                labels,
            });
        }

        observed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(observed)
    }
}

#[async_trait]
impl EngineClient for DockerEngine {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| Error::EngineUnavailable(e.to_string()))
    }

    async fn list(&self, namespace: &str) -> Result<Vec<ObservedContainer>> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{}={}", LABEL_NAMESPACE, namespace)],
        )]);
        self.observe(filters).await
    }

    async fn list_managed(&self) -> Result<Vec<ObservedContainer>> {
        let filters = HashMap::from([("label".to_string(), vec![LABEL_NAMESPACE.to_string()])]);
        self.observe(filters).await
    }

    async fn create(
        &self,
        spec: &ContainerSpec,
        manifest_hash: &str,
        net_target: Option<&str>,
    ) -> Result<String> {
        let engine_name = spec.name.to_string();

        let mut labels: HashMap<String, String> = spec
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        labels.insert(LABEL_NAMESPACE.to_string(), spec.name.namespace.clone());
        labels.insert(LABEL_NAME.to_string(), spec.name.name.clone());
        labels.insert(LABEL_HASH.to_string(), spec.identity_digest());
        labels.insert(LABEL_MANIFEST_HASH.to_string(), manifest_hash.to_string());

        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        for port in &spec.expose {
            exposed_ports.insert(format!("{}/{}", port.port, port.proto), HashMap::new());
        }

        let mut port_bindings: HashMap<String, Option<Vec<EnginePortBinding>>> = HashMap::new();
        for port in &spec.ports {
            let key = format!("{}/{}", port.container_port, port.proto);
            exposed_ports.entry(key.clone()).or_default();
            let binding = EnginePortBinding {
                host_ip: port.host_ip.clone(),
                host_port: Some(port.host_port.to_string()),
            };
            if let Some(bindings) = port_bindings
                .entry(key)
                .or_insert_with(|| Some(Vec::new()))
            {
                bindings.push(binding);
            }
        }

        let mut binds = Vec::new();
        let mut anonymous: HashMap<String, HashMap<(), ()>> = HashMap::new();
        for volume in &spec.volumes {
            match volume {
                VolumeSpec::Bind { .. } => binds.push(volume.to_string()),
                VolumeSpec::Anonymous(path) => {
                    anonymous.insert(path.clone(), HashMap::new());
                }
            }
        }

        let volumes_from: Vec<String> =
            spec.volumes_from.iter().map(|n| n.to_string()).collect();
        let links: Vec<String> = spec
            .links
            .iter()
            .map(|l| format!("{}:{}", l.target, l.alias_or_name()))
            .collect();

        let network_mode = match &spec.net {
            NetMode::Bridge => None,
            NetMode::Host => Some("host".to_string()),
            NetMode::None => Some("none".to_string()),
            NetMode::Container(target) => Some(match net_target {
                Some(id) => format!("container:{}", id),
                None => format!("container:{}", target),
            }),
        };

        let host_config = HostConfig {
            binds: (!binds.is_empty()).then_some(binds),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            volumes_from: (!volumes_from.is_empty()).then_some(volumes_from),
            links: (!links.is_empty()).then_some(links),
            network_mode,
            restart_policy: Some(engine_restart(&spec.restart)),
            memory: spec.memory,
            cpu_shares: spec.cpu_shares,
            dns: (!spec.dns.is_empty()).then(|| spec.dns.clone()),
            ..Default::default()
        };

        let config = Config {
            image: Some(format!(
                "{}:{}",
                spec.image.repo_key(),
                spec.image.effective_tag()
            )),
            cmd: spec.cmd.clone(),
            entrypoint: spec.entrypoint.clone(),
            env: Some(env),
            labels: Some(labels),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            volumes: (!anonymous.is_empty()).then_some(anonymous),
            user: spec.user.clone(),
            working_dir: spec.workdir.clone(),
            hostname: spec.hostname.clone(),
            domainname: spec.domainname.clone(),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: engine_name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| op_err("create", &engine_name, e))?;

        info!(container = %engine_name, id = %response.id, "created container");
        Ok(response.id)
    }

    async fn start(&self, id: &str, name: &ContainerName) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| op_err("start", name.to_string(), e))?;
        info!(container = %name, "started container");
        Ok(())
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<()> {
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| op_err("stop", id, e))
    }

    async fn remove(&self, id: &str, timeout: Duration) -> Result<()> {
        // Stop failure is tolerated: the container may already be down,
        // and the forced remove below covers the rest.
        let stop = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        if let Err(e) = self.docker.stop_container(id, Some(stop)).await {
            debug!(id = %id, error = %e, "stop before remove failed");
        }

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .map_err(|e| op_err("remove", id, e))?;
        info!(id = %id, "removed container");
        Ok(())
    }

    async fn wait(&self, id: &str, window: Duration) -> Result<WaitOutcome> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id, Some(options));
        match tokio::time::timeout(window, stream.next()).await {
            Err(_) => Ok(WaitOutcome::StillRunning),
            Ok(Some(Ok(response))) => Ok(WaitOutcome::Exited(response.status_code)),
            // bollard surfaces a non-zero exit as a dedicated error.
            Ok(Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. }))) => {
                Ok(WaitOutcome::Exited(code))
            }
            Ok(Some(Err(e))) => Err(op_err("wait", id, e)),
            Ok(None) => Err(op_err("wait", id, "wait stream ended unexpectedly")),
        }
    }

    async fn inspect(&self, id: &str) -> Result<ObservedContainer> {
        let filters = HashMap::from([("id".to_string(), vec![id.to_string()])]);
        self.observe(filters)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| op_err("inspect", id, "no such container"))
    }

    async fn pull_image(&self, image: &ImageName) -> Result<()> {
        let reference = format!("{}:{}", image.repo_key(), image.effective_tag());
        info!(image = %reference, "pulling image");

        let options = CreateImageOptions::<String> {
            from_image: reference.clone(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        let pull = async {
            while let Some(progress) = stream.next().await {
                let info = progress.map_err(|e| Error::ImagePullFailed {
                    reference: reference.clone(),
                    cause: e.to_string(),
                })?;
                if let Some(status) = info.status {
                    debug!(image = %reference, status = %status, "pull progress");
                }
            }
            Ok(())
        };

        tokio::time::timeout(IMAGE_PULL_TIMEOUT, pull)
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("pull {}", reference),
                duration: IMAGE_PULL_TIMEOUT,
            })?
    }

    async fn image_present(&self, image: &ImageName) -> Result<bool> {
        let reference = format!("{}:{}", image.repo_key(), image.effective_tag());
        match self.docker.inspect_image(&reference).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(op_err("inspect-image", reference, e)),
        }
    }

    async fn list_tags(&self, repo_key: &str) -> Result<Vec<String>> {
        let options = ListImagesOptions::<String> {
            all: false,
            ..Default::default()
        };
        let images = self
            .docker
            .list_images(Some(options))
            .await
            .map_err(|e| op_err("list-images", repo_key, e))?;

        let mut tags = Vec::new();
        for summary in images {
            for repo_tag in summary.repo_tags {
                let Ok(parsed) = ImageName::parse(&repo_tag) else {
                    continue;
                };
                if parsed.repo_key() == repo_key {
                    if let Some(tag) = parsed.tag {
                        tags.push(tag);
                    }
                }
            }
        }
        tags.sort();
        tags.dedup();
        Ok(tags)
    }

    async fn remove_image(&self, image: &ImageName) -> Result<()> {
        let reference = format!("{}:{}", image.repo_key(), image.effective_tag());
        let options = RemoveImageOptions {
            force: false,
            ..Default::default()
        };
        self.docker
            .remove_image(&reference, Some(options), None)
            .await
            .map_err(|e| op_err("remove-image", reference.clone(), e))?;
        info!(image = %reference, "removed image");
        Ok(())
    }

    async fn running_images(&self) -> Result<Vec<ImageName>> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| op_err("list", "running containers", e))?;

        Ok(summaries
            .into_iter()
            .filter_map(|s| s.image)
            .filter_map(|s| ImageName::parse(&s).ok())
            .collect())
    }

    async fn bridge_ip(&self) -> Result<String> {
        let network = self
            .docker
            .inspect_network("bridge", None::<InspectNetworkOptions<String>>)
            .await
            .map_err(|e| op_err("inspect-network", "bridge", e))?;

        network
            .ipam
            .and_then(|ipam| ipam.config)
            .and_then(|configs| configs.into_iter().find_map(|c| c.gateway))
            .ok_or_else(|| op_err("inspect-network", "bridge", "bridge network has no gateway"))
    }
}

// =============================================================================
// Mapping Helpers
// =============================================================================

fn op_err(
    op: &'static str,
    target: impl Into<String>,
    cause: impl std::fmt::Display,
) -> Error {
    Error::EngineOperationFailed {
        op,
        target: target.into(),
        cause: cause.to_string(),
    }
}

/// The container's name, preferring the management labels over the
/// engine-assigned name.
fn observed_name(
    details: &bollard::models::ContainerInspectResponse,
) -> Option<ContainerName> {
    let labels = details.config.as_ref().and_then(|c| c.labels.as_ref());
    if let Some(labels) = labels {
        if let (Some(ns), Some(name)) = (labels.get(LABEL_NAMESPACE), labels.get(LABEL_NAME)) {
            return Some(ContainerName::new(ns.clone(), name.clone()));
        }
    }
    let engine_name = details.name.as_deref()?.trim_start_matches('/');
    ContainerName::parse(engine_name, "").ok()
}

/// Resolves a reference that may be a container name or an engine id.
fn resolve_reference(
    reference: &str,
    names_by_id: &HashMap<String, ContainerName>,
) -> Option<ContainerName> {
    if let Some(name) = names_by_id.get(reference) {
        return Some(name.clone());
    }
    if reference.contains('.') {
        return ContainerName::parse(reference, "").ok();
    }
    None
}

fn parse_engine_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(value?).ok()?.with_timezone(&Utc);
    // Docker reports the zero time for containers that never ran.
    if parsed.timestamp() <= 0 {
        None
    } else {
        Some(parsed)
    }
}

fn observed_restart(policy: &EngineRestartPolicy) -> RestartPolicy {
    match policy.name {
        Some(RestartPolicyNameEnum::ALWAYS) | Some(RestartPolicyNameEnum::UNLESS_STOPPED) => {
            RestartPolicy::Always
        }
        Some(RestartPolicyNameEnum::ON_FAILURE) => {
            RestartPolicy::OnFailure(policy.maximum_retry_count.unwrap_or(0) as u32)
        }
        _ => RestartPolicy::No,
    }
}

fn engine_restart(policy: &RestartPolicy) -> EngineRestartPolicy {
    match policy {
        RestartPolicy::No => EngineRestartPolicy {
            name: Some(RestartPolicyNameEnum::NO),
            maximum_retry_count: None,
        },
        RestartPolicy::Always => EngineRestartPolicy {
            name: Some(RestartPolicyNameEnum::ALWAYS),
            maximum_retry_count: None,
        },
        RestartPolicy::OnFailure(count) => EngineRestartPolicy {
            name: Some(RestartPolicyNameEnum::ON_FAILURE),
            maximum_retry_count: Some(i64::from(*count)),
        },
    }
}
