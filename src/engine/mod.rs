//! Engine-facing boundary.
//!
//! The core never talks to a container engine directly; it consumes the
//! [`EngineClient`] capability. The production implementation is
//! [`docker::DockerEngine`] over the local Docker daemon; tests wire in
//! an in-memory fake. Implementations must be safe for concurrent use —
//! the client is shared by the runner, the image puller, and recovery.

pub mod docker;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::name::{ContainerName, ImageName};
use crate::pod::spec::{ContainerSpec, ObservedContainer};

pub use docker::DockerEngine;

/// Outcome of watching a container for a bounded window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The container exited within the window with this code.
    Exited(i64),
    /// Still running when the window closed; treated as alive.
    StillRunning,
}

/// Operations the core needs from a container engine.
///
/// Every call is remote I/O and may fail with
/// [`Error::EngineUnavailable`](crate::error::Error::EngineUnavailable)
/// or [`Error::EngineOperationFailed`](crate::error::Error::EngineOperationFailed).
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Verifies the engine is reachable.
    async fn ping(&self) -> Result<()>;

    /// Observed containers belonging to `namespace`, running or not.
    async fn list(&self, namespace: &str) -> Result<Vec<ObservedContainer>>;

    /// Every container carrying our management labels, across all
    /// namespaces. The recovery path's source of truth.
    async fn list_managed(&self) -> Result<Vec<ObservedContainer>>;

    /// Creates (but does not start) a container, persisting the identity
    /// labels. `net_target` is the engine id joined when the spec
    /// declares `net=container:`; the caller resolves the reference to
    /// an id because the target may have been created moments ago.
    async fn create(
        &self,
        spec: &ContainerSpec,
        manifest_hash: &str,
        net_target: Option<&str>,
    ) -> Result<String>;

    /// Starts a created or stopped container. `name` identifies the
    /// container for diagnostics; recovery has no declared spec to pass.
    async fn start(&self, id: &str, name: &ContainerName) -> Result<()>;

    /// Stops a running container: SIGTERM, then SIGKILL after `timeout`.
    async fn stop(&self, id: &str, timeout: Duration) -> Result<()>;

    /// Stops (if needed) and removes a container together with its
    /// anonymous volumes.
    async fn remove(&self, id: &str, timeout: Duration) -> Result<()>;

    /// Observes the container for up to `window`.
    async fn wait(&self, id: &str, window: Duration) -> Result<WaitOutcome>;

    /// Observed fields of a single container, by engine id.
    async fn inspect(&self, id: &str) -> Result<ObservedContainer>;

    /// Pulls an image from its registry. Idempotent.
    async fn pull_image(&self, image: &ImageName) -> Result<()>;

    /// True if the image is available locally.
    async fn image_present(&self, image: &ImageName) -> Result<bool>;

    /// Locally present tags for a `[registry/]repository` key.
    async fn list_tags(&self, repo_key: &str) -> Result<Vec<String>>;

    /// Removes a local image tag.
    async fn remove_image(&self, image: &ImageName) -> Result<()>;

    /// Images referenced by currently running containers, managed or not.
    async fn running_images(&self) -> Result<Vec<ImageName>>;

    /// Gateway address of the engine's bridge network.
    async fn bridge_ip(&self) -> Result<String>;
}
