//! Shared in-memory engine fake for integration tests.
//!
//! Mirrors just enough engine behavior for the differ, runner, driver,
//! and retention paths: an observed-container table, an image store, and
//! an ordered event log the tests assert against.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use stevedore::engine::{EngineClient, WaitOutcome};
use stevedore::name::{ContainerName, ImageName};
use stevedore::pod::{ContainerSpec, ObservedContainer, ObservedState, ObservedStatus};
use stevedore::Result;

#[derive(Default)]
struct State {
    containers: Vec<ObservedContainer>,
    images: HashSet<String>,
    tags: HashMap<String, Vec<String>>,
    running_images: Vec<ImageName>,
    wait_exits: HashMap<ContainerName, i64>,
    events: Vec<String>,
    next_id: u64,
}

/// In-memory [`EngineClient`] with a recorded event log.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<State>,
}

#[allow(dead_code)]
impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds observed containers, as if they were already on the host.
    pub fn with_observed(self, containers: Vec<ObservedContainer>) -> Self {
        self.state.lock().unwrap().containers = containers;
        self
    }

    /// Marks images as locally present.
    pub fn with_images(self, refs: &[&str]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for r in refs {
                state.images.insert(r.to_string());
            }
        }
        self
    }

    /// Seeds locally present tags for a repository key.
    pub fn with_tags(self, repo: &str, tags: &[&str]) -> Self {
        self.state.lock().unwrap().tags.insert(
            repo.to_string(),
            tags.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn with_running_images(self, images: Vec<ImageName>) -> Self {
        self.state.lock().unwrap().running_images = images;
        self
    }

    /// Makes `wait` observe an exit with `code` for the named container.
    pub fn with_wait_exit(self, name: ContainerName, code: i64) -> Self {
        self.state.lock().unwrap().wait_exits.insert(name, code);
        self
    }

    /// The ordered log of mutating calls, e.g. `create test.a`.
    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn observed_names(&self) -> Vec<ContainerName> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn status_of(&self, name: &ContainerName) -> Option<ObservedStatus> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| &c.name == name)
            .map(|c| c.state.status)
    }
}

/// Builds an observed container equivalent to a declared spec.
#[allow(dead_code)]
pub fn observed_from(spec: &ContainerSpec, id: &str, state: ObservedState) -> ObservedContainer {
    ObservedContainer {
        name: spec.name.clone(),
        id: id.to_string(),
        image: spec.image.clone(),
        hash: Some(spec.identity_digest()),
        manifest_hash: None,
        state,
        restart: spec.restart.clone(),
        depends: spec.dependencies(),
        labels: BTreeMap::new(),
    }
}

fn image_key(image: &ImageName) -> String {
    format!("{}:{}", image.repo_key(), image.effective_tag())
}

#[async_trait]
impl EngineClient for FakeEngine {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<ObservedContainer>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .containers
            .iter()
            .filter(|c| c.name.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn list_managed(&self) -> Result<Vec<ObservedContainer>> {
        Ok(self.state.lock().unwrap().containers.clone())
    }

    async fn create(
        &self,
        spec: &ContainerSpec,
        manifest_hash: &str,
        _net_target: Option<&str>,
    ) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.events.push(format!("create {}", spec.name));
        state.containers.push(ObservedContainer {
            name: spec.name.clone(),
            id: id.clone(),
            image: spec.image.clone(),
            hash: Some(spec.identity_digest()),
            manifest_hash: Some(manifest_hash.to_string()),
            state: ObservedState::created(),
            restart: spec.restart.clone(),
            depends: spec.dependencies(),
            labels: BTreeMap::new(),
        });
        Ok(id)
    }

    async fn start(&self, id: &str, name: &ContainerName) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("start {}", name));
        if let Some(container) = state.containers.iter_mut().find(|c| c.id == id) {
            container.state = ObservedState::running();
        }
        Ok(())
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(container) = state.containers.iter().find(|c| c.id == id) {
            let name = container.name.clone();
            state.events.push(format!("stop {}", name));
        }
        if let Some(container) = state.containers.iter_mut().find(|c| c.id == id) {
            container.state = ObservedState::exited(0);
        }
        Ok(())
    }

    async fn remove(&self, id: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(index) = state.containers.iter().position(|c| c.id == id) {
            let removed = state.containers.remove(index);
            state.events.push(format!("remove {}", removed.name));
        }
        Ok(())
    }

    async fn wait(&self, id: &str, _window: Duration) -> Result<WaitOutcome> {
        let state = self.state.lock().unwrap();
        let name = state
            .containers
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.name.clone());
        match name.and_then(|n| state.wait_exits.get(&n).copied()) {
            Some(code) => Ok(WaitOutcome::Exited(code)),
            None => Ok(WaitOutcome::StillRunning),
        }
    }

    async fn inspect(&self, id: &str) -> Result<ObservedContainer> {
        self.state
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| stevedore::Error::EngineOperationFailed {
                op: "inspect",
                target: id.to_string(),
                cause: "no such container".to_string(),
            })
    }

    async fn pull_image(&self, image: &ImageName) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let key = image_key(image);
        state.events.push(format!("pull {}", key));
        state.images.insert(key);
        Ok(())
    }

    async fn image_present(&self, image: &ImageName) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .images
            .contains(&image_key(image)))
    }

    async fn list_tags(&self, repo_key: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .tags
            .get(repo_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_image(&self, image: &ImageName) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("rmi {}", image_key(image)));
        let repo = image.repo_key();
        let tag = image.effective_tag().to_string();
        if let Some(tags) = state.tags.get_mut(&repo) {
            tags.retain(|t| t != &tag);
        }
        Ok(())
    }

    async fn running_images(&self) -> Result<Vec<ImageName>> {
        Ok(self.state.lock().unwrap().running_images.clone())
    }

    async fn bridge_ip(&self) -> Result<String> {
        Ok("172.17.0.1".to_string())
    }
}
