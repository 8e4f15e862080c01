//! Plan execution.
//!
//! The runner walks a plan front to back, translating each action into
//! engine calls. It never reorders: the differ already linearized the
//! plan, and every dependency constraint is encoded in that order.
//!
//! A dry-run performs read-only engine queries (to predict `changed` for
//! image pulls) but no mutations. Errors abort execution at the failing
//! action with no rollback; the engine is left partially converged and a
//! later run converges the remainder. An external cancellation token is
//! honored between actions and inside blocking engine calls.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::diff::{Action, Plan};
use crate::engine::{EngineClient, WaitOutcome};
use crate::error::{Error, Result};
use crate::name::ContainerName;
use crate::pod::spec::DesiredState;
use crate::report::PlanReport;

/// Per-run inputs that are not part of the plan itself.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub namespace: String,
    /// Digest over the rendered manifest, persisted on created containers.
    pub manifest_hash: String,
    pub dry_run: bool,
}

/// Executes plans against an engine.
pub struct Runner<'a> {
    engine: &'a dyn EngineClient,
    cancel: CancellationToken,
}

impl<'a> Runner<'a> {
    pub fn new(engine: &'a dyn EngineClient) -> Self {
        Self {
            engine,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses a caller-provided cancellation token; canceling it aborts the
    /// in-flight engine call and prevents any further action.
    pub fn with_cancellation(engine: &'a dyn EngineClient, cancel: CancellationToken) -> Self {
        Self { engine, cancel }
    }

    /// Runs the plan sequentially and returns the outcome report.
    pub async fn run(&self, plan: &Plan, ctx: &RunContext) -> Result<PlanReport> {
        let mut report = PlanReport::new(&ctx.namespace, ctx.dry_run);
        // Engine ids by container name, for `net=container:` resolution
        // and wait targets. Seeded from the observed ids the differ
        // attached; creates add their own as they happen.
        let mut ids: HashMap<ContainerName, String> = HashMap::new();
        for action in &plan.actions {
            match action {
                Action::Start { spec, id } | Action::Stop { spec, id } => {
                    ids.insert(spec.name.clone(), id.clone());
                }
                Action::NoAction { spec, id } => {
                    ids.insert(spec.name.clone(), id.clone());
                }
                _ => {}
            }
        }

        let total = plan.len();
        for (index, action) in plan.actions.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(Error::Canceled {
                    completed: index,
                    total,
                });
            }

            debug!(
                kind = action.kind(),
                target = %action.target(),
                dry_run = ctx.dry_run,
                "executing action"
            );

            let changed = tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(Error::Canceled { completed: index, total });
                }
                result = self.execute(action, ctx, &mut ids) => result?,
            };
            report.record(action, changed);
        }

        info!(
            namespace = %ctx.namespace,
            actions = total,
            dry_run = ctx.dry_run,
            "plan complete"
        );
        Ok(report)
    }

    /// Executes one action; returns whether it changed engine state.
    async fn execute(
        &self,
        action: &Action,
        ctx: &RunContext,
        ids: &mut HashMap<ContainerName, String>,
    ) -> Result<bool> {
        match action {
            Action::EnsureImage(image) => {
                let present = self.engine.image_present(image).await?;
                if present {
                    return Ok(false);
                }
                if !ctx.dry_run {
                    self.engine.pull_image(image).await?;
                }
                Ok(true)
            }

            Action::Create { spec, .. } => {
                if ctx.dry_run {
                    return Ok(true);
                }
                let net_target = spec
                    .net
                    .container_ref()
                    .and_then(|name| ids.get(name).cloned());
                let id = self
                    .engine
                    .create(spec, &ctx.manifest_hash, net_target.as_deref())
                    .await?;
                if spec.state == DesiredState::Running {
                    self.engine.start(&id, &spec.name).await?;
                }
                ids.insert(spec.name.clone(), id);
                Ok(true)
            }

            Action::Start { spec, id } => {
                if !ctx.dry_run {
                    self.engine.start(id, &spec.name).await?;
                }
                Ok(true)
            }

            Action::Stop { spec, id } => {
                if !ctx.dry_run {
                    self.engine.stop(id, spec.kill_timeout).await?;
                }
                Ok(true)
            }

            Action::Remove {
                observed, timeout, ..
            } => {
                if !ctx.dry_run {
                    self.engine.remove(&observed.id, *timeout).await?;
                }
                ids.remove(&observed.name);
                Ok(true)
            }

            Action::WaitFor { name, window } => {
                if ctx.dry_run {
                    return Ok(false);
                }
                let Some(id) = ids.get(name) else {
                    // The create this wait belongs to did not happen;
                    // nothing to watch.
                    return Ok(false);
                };
                match self.engine.wait(id, *window).await? {
                    WaitOutcome::StillRunning | WaitOutcome::Exited(0) => Ok(false),
                    WaitOutcome::Exited(code) => Err(Error::WaitExitNonZero {
                        container: name.clone(),
                        code,
                    }),
                }
            }

            Action::NoAction { .. } => Ok(false),
        }
    }
}
