//! The differ: declared vs observed containers to an ordered action plan.
//!
//! Given the declared containers of a pod and the containers observed on
//! the engine under the same namespace, [`diff`] emits the minimum set of
//! actions that converges the host, already linearized:
//!
//! 1. Removes and stops, dependents first.
//! 2. Creates and starts, dependencies first, each create preceded by an
//!    `EnsureImage` for its image the first time that image is seen.
//! 3. `WaitFor` entries, when a wait window was requested.
//! 4. `NoAction` entries for containers already converged.
//!
//! Whenever several actions are unconstrained relative to each other,
//! ties break by lexicographic [`ContainerName`] order, so the plan is a
//! pure function of its inputs. The runner executes the sequence as-is.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::constants::DEFAULT_KILL_TIMEOUT;
use crate::error::Result;
use crate::name::{ContainerName, ImageName};
use crate::pod::graph::DependencyGraph;
use crate::pod::spec::{ContainerSpec, DesiredState, ObservedContainer, ObservedStatus};

// =============================================================================
// Actions and Plans
// =============================================================================

/// Why an observed container is being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveReason {
    /// Observed but not declared.
    Orphan,
    /// Declared with a different identity digest.
    Changed,
    /// Identity matches but the observed state cannot be fixed by a
    /// start or stop (an exited container that should be `created`).
    StateRequiresRecreate,
}

impl std::fmt::Display for RemoveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Orphan => write!(f, "not declared in manifest"),
            Self::Changed => write!(f, "configuration changed"),
            Self::StateRequiresRecreate => write!(f, "observed state requires recreate"),
        }
    }
}

/// One step of a plan.
#[derive(Debug, Clone)]
pub enum Action {
    /// Make the image available locally before any create consumes it.
    EnsureImage(ImageName),
    /// Create the container (and start it when its desired state is
    /// `running`). `recreate` marks a remove-and-create replacement.
    Create { spec: ContainerSpec, recreate: bool },
    /// Start an existing, identity-equivalent container.
    Start { spec: ContainerSpec, id: String },
    /// Stop an existing, identity-equivalent container declared `created`.
    Stop { spec: ContainerSpec, id: String },
    /// Remove an observed container. `timeout` is the grace period
    /// between SIGTERM and SIGKILL: the declared `kill_timeout` when the
    /// container is being replaced, the default for orphans.
    Remove {
        observed: ObservedContainer,
        reason: RemoveReason,
        timeout: Duration,
    },
    /// Watch a freshly created container for `window`; a non-zero exit
    /// inside the window fails the plan.
    WaitFor {
        name: ContainerName,
        window: Duration,
    },
    /// Nothing to do; carries the observed engine id for reporting.
    NoAction { spec: ContainerSpec, id: String },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EnsureImage(_) => "ensure-image",
            Self::Create { .. } => "create",
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
            Self::Remove { .. } => "remove",
            Self::WaitFor { .. } => "wait",
            Self::NoAction { .. } => "no-action",
        }
    }

    /// The container or image the action applies to.
    pub fn target(&self) -> String {
        match self {
            Self::EnsureImage(image) => image.to_string(),
            Self::Create { spec, .. } => spec.name.to_string(),
            Self::Start { spec, .. } | Self::Stop { spec, .. } => spec.name.to_string(),
            Self::Remove { observed, .. } => observed.name.to_string(),
            Self::WaitFor { name, .. } => name.to_string(),
            Self::NoAction { spec, .. } => spec.name.to_string(),
        }
    }

    pub fn reason(&self) -> String {
        match self {
            Self::EnsureImage(_) => "image required by manifest".to_string(),
            Self::Create { recreate: true, .. } => "recreating with new configuration".to_string(),
            Self::Create { recreate: false, .. } => "declared but not running".to_string(),
            Self::Start { .. } => "declared running but stopped".to_string(),
            Self::Stop { .. } => "declared created but running".to_string(),
            Self::Remove { reason, .. } => reason.to_string(),
            Self::WaitFor { window, .. } => format!("watching for early exit ({window:?})"),
            Self::NoAction { .. } => "up-to-date".to_string(),
        }
    }

    /// True for actions that change engine state when executed.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::NoAction { .. } | Self::WaitFor { .. })
    }
}

/// An ordered sequence of actions. Once emitted the order is final; the
/// runner never reorders.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub actions: Vec<Action>,
}

impl Plan {
    /// True when the plan contains no mutating action: the host already
    /// matches the manifest.
    pub fn is_converged(&self) -> bool {
        !self.actions.iter().any(Action::is_mutation)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Caller knobs for plan construction.
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    /// Watch each created container for early exit for this long.
    pub wait: Option<Duration>,
}

// =============================================================================
// Differ
// =============================================================================

/// Computes the convergence plan for one pod.
///
/// `observed` must already be restricted to the pod's namespace; the
/// engine driver's `list` does that filtering.
pub fn diff(
    declared: &[ContainerSpec],
    observed: &[ObservedContainer],
    opts: &DiffOptions,
) -> Result<Plan> {
    let observed_by_name: HashMap<&ContainerName, &ObservedContainer> =
        observed.iter().map(|o| (&o.name, o)).collect();
    let declared_names: HashSet<&ContainerName> = declared.iter().map(|c| &c.name).collect();

    // Partition. Matching is by name first, then by identity digest and
    // desired-vs-observed state.
    let mut to_create: HashMap<ContainerName, (ContainerSpec, bool)> = HashMap::new();
    let mut to_start: HashMap<ContainerName, (ContainerSpec, String)> = HashMap::new();
    let mut to_stop: HashMap<ContainerName, (ContainerSpec, String)> = HashMap::new();
    let mut to_remove: HashMap<ContainerName, (ObservedContainer, RemoveReason, Duration)> =
        HashMap::new();
    let mut unchanged: Vec<(ContainerSpec, String)> = Vec::new();

    for spec in declared {
        match observed_by_name.get(&spec.name) {
            None => {
                to_create.insert(spec.name.clone(), (spec.clone(), false));
            }
            Some(o) if spec.digest_matches(o) => {
                if spec.state_matches(o) {
                    unchanged.push((spec.clone(), o.id.clone()));
                } else {
                    match (spec.state, o.state.status) {
                        (DesiredState::Running, _) => {
                            to_start.insert(spec.name.clone(), (spec.clone(), o.id.clone()));
                        }
                        (DesiredState::Created, ObservedStatus::Running) => {
                            to_stop.insert(spec.name.clone(), (spec.clone(), o.id.clone()));
                        }
                        // Exited but declared `created`: a stop cannot get
                        // there, so replace the container.
                        (DesiredState::Created, _) => {
                            to_remove.insert(
                                spec.name.clone(),
                                (
                                    (*o).clone(),
                                    RemoveReason::StateRequiresRecreate,
                                    spec.kill_timeout,
                                ),
                            );
                            to_create.insert(spec.name.clone(), (spec.clone(), true));
                        }
                    }
                }
            }
            Some(o) => {
                to_remove.insert(
                    spec.name.clone(),
                    ((*o).clone(), RemoveReason::Changed, spec.kill_timeout),
                );
                to_create.insert(spec.name.clone(), (spec.clone(), true));
            }
        }
    }

    for o in observed {
        if !declared_names.contains(&o.name) {
            to_remove.insert(
                o.name.clone(),
                (o.clone(), RemoveReason::Orphan, DEFAULT_KILL_TIMEOUT),
            );
        }
    }

    let mut actions = Vec::new();

    // Removes and stops, dependents first. The removal graph is built
    // from the engine's view of inter-container references, so orphans
    // that declared containers still depend on are ordered correctly.
    let removal_graph = DependencyGraph::build(
        observed
            .iter()
            .map(|o| (o.name.clone(), o.depends.clone())),
    );
    for name in removal_graph.removal_order()? {
        if let Some((observed, reason, timeout)) = to_remove.remove(&name) {
            actions.push(Action::Remove {
                observed,
                reason,
                timeout,
            });
        } else if let Some((spec, id)) = to_stop.remove(&name) {
            actions.push(Action::Stop { spec, id });
        }
    }

    // Creates and starts, dependencies first. Each image is ensured once,
    // immediately before the first create that consumes it.
    let creation_graph = DependencyGraph::build(
        declared
            .iter()
            .map(|c| (c.name.clone(), c.dependencies())),
    );
    let mut ensured: HashSet<String> = HashSet::new();
    let mut created: Vec<ContainerName> = Vec::new();
    for name in creation_graph.creation_order()? {
        if let Some((spec, recreate)) = to_create.remove(&name) {
            let image_key = format!("{}:{}", spec.image.repo_key(), spec.image.effective_tag());
            if ensured.insert(image_key) {
                actions.push(Action::EnsureImage(spec.image.clone()));
            }
            if spec.state == DesiredState::Running {
                created.push(spec.name.clone());
            }
            actions.push(Action::Create { spec, recreate });
        } else if let Some((spec, id)) = to_start.remove(&name) {
            actions.push(Action::Start { spec, id });
        }
    }

    // Wait windows go after the last create so slow starters get the
    // whole window.
    if let Some(window) = opts.wait.filter(|w| !w.is_zero()) {
        for name in created {
            actions.push(Action::WaitFor { name, window });
        }
    }

    unchanged.sort_by(|(a, _), (b, _)| a.name.cmp(&b.name));
    for (spec, id) in unchanged {
        actions.push(Action::NoAction { spec, id });
    }

    Ok(Plan { actions })
}

/// Plan that removes every observed container of the pod; the `rm` verb.
pub fn removal_plan(observed: &[ObservedContainer]) -> Result<Plan> {
    diff(&[], observed, &DiffOptions::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::ImageName;
    use crate::pod::spec::ObservedState;
    use std::collections::BTreeMap;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec::new(
            ContainerName::new("test", name),
            ImageName::parse("busybox:1").unwrap(),
        )
    }

    fn observe(spec: &ContainerSpec, state: ObservedState) -> ObservedContainer {
        ObservedContainer {
            name: spec.name.clone(),
            id: format!("id-{}", spec.name.name),
            image: spec.image.clone(),
            hash: Some(spec.identity_digest()),
            manifest_hash: None,
            state,
            restart: spec.restart.clone(),
            depends: spec.dependencies(),
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn converged_pod_yields_only_no_actions() {
        let a = spec("a");
        let b = spec("b");
        let observed = vec![
            observe(&a, ObservedState::running()),
            observe(&b, ObservedState::running()),
        ];
        let plan = diff(&[a, b], &observed, &DiffOptions::default()).unwrap();
        assert!(plan.is_converged());
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn state_divergence_starts_instead_of_recreating() {
        let a = spec("a");
        let observed = vec![observe(&a, ObservedState::exited(0))];
        let plan = diff(&[a], &observed, &DiffOptions::default()).unwrap();
        assert_eq!(plan.len(), 1);
        assert!(matches!(plan.actions[0], Action::Start { .. }));
    }

    #[test]
    fn running_but_declared_created_stops() {
        let mut a = spec("a");
        a.state = DesiredState::Created;
        let observed = vec![observe(&a, ObservedState::running())];
        let plan = diff(&[a], &observed, &DiffOptions::default()).unwrap();
        assert_eq!(plan.actions[0].kind(), "stop");
    }

    #[test]
    fn wait_actions_follow_the_last_create() {
        let a = spec("a");
        let b = spec("b");
        let opts = DiffOptions {
            wait: Some(Duration::from_secs(5)),
        };
        let plan = diff(&[a, b], &[], &opts).unwrap();
        let kinds: Vec<&str> = plan.actions.iter().map(Action::kind).collect();
        assert_eq!(
            kinds,
            vec!["ensure-image", "create", "create", "wait", "wait"]
        );
    }
}
