//! Engine-level orchestration helpers: parallel image pulls and
//! restart recovery.
//!
//! Both operate purely through the [`EngineClient`] capability; nothing
//! here knows which engine is behind the trait.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::engine::EngineClient;
use crate::error::Result;
use crate::name::{ContainerName, ImageName};
use crate::pod::graph::DependencyGraph;
use crate::pod::spec::ObservedStatus;

// =============================================================================
// Image Pulling
// =============================================================================

/// De-duplicates concurrent pulls of the same image reference.
///
/// Concurrent requests for one reference await a shared completion cell;
/// a failed pull leaves the cell empty so a later request retries. The
/// registry lives for a single invocation, never across runs.
#[derive(Default)]
pub struct ImagePuller {
    inflight: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl ImagePuller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the image available locally. Returns `true` if a pull
    /// actually happened, `false` if the image was already present.
    pub async fn ensure(&self, engine: &dyn EngineClient, image: &ImageName) -> Result<bool> {
        if engine.image_present(image).await? {
            debug!(image = %image, "image already present");
            return Ok(false);
        }

        let key = format!("{}:{}", image.repo_key(), image.effective_tag());
        let cell = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(inflight.entry(key).or_default())
        };
        cell.get_or_try_init(|| engine.pull_image(image)).await?;
        Ok(true)
    }
}

/// Pulls every image in `images` with bounded fan-out. Returns how many
/// were actually pulled. The first failure aborts the remaining pulls
/// and is surfaced as the result.
pub async fn pull_all(
    engine: &dyn EngineClient,
    images: &[ImageName],
    concurrency: usize,
) -> Result<usize> {
    let puller = ImagePuller::new();
    let mut results = stream::iter(images.iter().map(|image| puller.ensure(engine, image)))
        .buffer_unordered(concurrency.max(1));

    let mut pulled = 0;
    while let Some(result) = results.next().await {
        if result? {
            pulled += 1;
        }
    }
    Ok(pulled)
}

// =============================================================================
// Recovery
// =============================================================================

/// Outcome of a recovery sweep.
#[derive(Debug, Default)]
pub struct Recovery {
    /// Containers that were stopped and have been started.
    pub started: Vec<ContainerName>,
    /// Stopped containers left alone because their restart policy is
    /// `no`; stopping them was somebody's decision.
    pub skipped: Vec<ContainerName>,
}

/// Starts every stopped managed container whose restart policy would
/// restart it. Consults only the labels persisted at create time — no
/// manifest is read, so recovery works after a host reboot with nothing
/// but the engine state.
pub async fn recover(engine: &dyn EngineClient) -> Result<Recovery> {
    let observed = engine.list_managed().await?;

    // Dependencies first, so a recovered container's links and volume
    // sources are up before it starts.
    let graph = DependencyGraph::build(
        observed
            .iter()
            .map(|o| (o.name.clone(), o.depends.clone())),
    );
    let order = graph.creation_order()?;
    let by_name: HashMap<&ContainerName, _> = observed.iter().map(|o| (&o.name, o)).collect();

    let mut recovery = Recovery::default();
    for name in &order {
        let Some(container) = by_name.get(name) else {
            continue;
        };
        if container.state.status == ObservedStatus::Running {
            continue;
        }
        if !container.restart.restarts() {
            recovery.skipped.push(container.name.clone());
            continue;
        }
        engine.start(&container.id, &container.name).await?;
        info!(container = %container.name, "recovered container");
        recovery.started.push(container.name.clone());
    }

    Ok(recovery)
}
