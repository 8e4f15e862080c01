//! Manifest loading: render, parse, normalize, validate.
//!
//! The loader turns raw manifest bytes into a [`Pod`] in four stages:
//!
//! 1. **Render** through the [`TemplateRenderer`] capability.
//! 2. **Parse** the rendered text as a YAML document. Unknown keys are
//!    rejected at this stage; duplicate container names cannot occur
//!    because containers are a mapping.
//! 3. **Normalize**: coerce shorthand forms (scalar -> list, `K=V` list
//!    -> map), fill the pod namespace on every container reference, and
//!    apply defaults (`state=running`, `restart=no`, `kill_timeout=10s`).
//! 4. **Validate** the structural invariants. Every violation is
//!    collected with a path into the document before any is reported;
//!    only a dependency cycle is reported on its own, after the
//!    field-level checks pass.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::constants::MAX_MANIFEST_SIZE;
use crate::error::{Error, Result, ValidationIssue};
use crate::name::{ContainerName, ImageName, LinkRef};
use crate::pod::graph::DependencyGraph;
use crate::pod::spec::{
    parse_duration, parse_memory, ContainerSpec, DesiredState, ExposedPort, NetMode, PortBinding,
    RestartPolicy, VolumeSpec,
};
use crate::pod::template::{TemplateRenderer, VariableBag};

// =============================================================================
// Pod
// =============================================================================

/// A loaded pod: the namespace, the declared containers, and the rendered
/// manifest text kept for informational output.
#[derive(Debug, Clone)]
pub struct Pod {
    pub namespace: String,
    pub containers: Vec<ContainerSpec>,
    pub rendered: String,
}

impl Pod {
    /// Digest over the full rendered manifest, persisted on every
    /// created container as `pod.manifest-hash`.
    pub fn manifest_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.rendered.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Distinct images referenced by the pod, in declaration order.
    pub fn images(&self) -> Vec<ImageName> {
        let mut seen = HashSet::new();
        let mut images = Vec::new();
        for c in &self.containers {
            if seen.insert(c.image.to_string()) {
                images.push(c.image.clone());
            }
        }
        images
    }

    pub fn get(&self, name: &ContainerName) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| &c.name == name)
    }
}

// =============================================================================
// Raw Document Shapes
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    namespace: String,
    containers: BTreeMap<String, RawContainer>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawContainer {
    image: Option<String>,
    cmd: Option<StringOrList>,
    entrypoint: Option<StringOrList>,
    env: Option<EnvDecl>,
    labels: Option<BTreeMap<String, Scalar>>,
    ports: Option<Vec<Scalar>>,
    expose: Option<Vec<Scalar>>,
    volumes: Option<StringOrList>,
    volumes_from: Option<StringOrList>,
    links: Option<StringOrList>,
    net: Option<String>,
    restart: Option<String>,
    state: Option<String>,
    kill_timeout: Option<Scalar>,
    cpu_shares: Option<i64>,
    memory: Option<Scalar>,
    user: Option<String>,
    workdir: Option<String>,
    dns: Option<StringOrList>,
    hostname: Option<String>,
    domainname: Option<String>,
    keep_colors: Option<bool>,
}

/// A field that accepts either a single scalar or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(Scalar),
    Many(Vec<Scalar>),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s.into_string()],
            Self::Many(items) => items.into_iter().map(Scalar::into_string).collect(),
        }
    }
}

/// `env` accepts a mapping or a `K=V` list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EnvDecl {
    Map(BTreeMap<String, Scalar>),
    List(Vec<String>),
}

/// YAML scalar coerced to its string form.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

// =============================================================================
// Loader
// =============================================================================

/// Loads a pod from raw manifest bytes.
pub fn load(raw: &[u8], vars: &VariableBag, renderer: &dyn TemplateRenderer) -> Result<Pod> {
    if raw.len() > MAX_MANIFEST_SIZE {
        return Err(Error::ManifestParse(format!(
            "manifest size {} exceeds limit of {}",
            raw.len(),
            MAX_MANIFEST_SIZE
        )));
    }
    let source = std::str::from_utf8(raw)
        .map_err(|_| Error::ManifestParse("manifest is not valid UTF-8".to_string()))?;

    let rendered = renderer.render(source, vars)?;

    let doc: RawManifest =
        serde_yaml::from_str(&rendered).map_err(|e| Error::ManifestParse(e.to_string()))?;

    let mut issues = Vec::new();
    if doc.namespace.is_empty() {
        issues.push(ValidationIssue::new("namespace", "namespace is empty"));
    } else if doc.namespace.contains('.') {
        issues.push(ValidationIssue::new(
            "namespace",
            "namespace must not contain '.'",
        ));
    }

    let namespace = doc.namespace.clone();
    let mut containers = Vec::with_capacity(doc.containers.len());
    for (name, raw) in doc.containers {
        let path = format!("containers.{}", name);
        if name.contains('.') {
            issues.push(ValidationIssue::new(&path, "container name must not contain '.'"));
            continue;
        }
        containers.push(build_container(&namespace, &name, raw, &path, &mut issues));
    }

    validate_pod(&containers, &mut issues);

    if !issues.is_empty() {
        return Err(Error::ManifestValidation(issues));
    }

    // The reference checks above guarantee every edge stays inside the
    // pod, so the only remaining structural failure is a cycle.
    let graph = DependencyGraph::build(
        containers
            .iter()
            .map(|c| (c.name.clone(), c.dependencies())),
    );
    graph.creation_order()?;

    Ok(Pod {
        namespace,
        containers,
        rendered,
    })
}

/// Normalizes one raw container into a [`ContainerSpec`], pushing an
/// issue (and returning `None`) for anything that does not parse.
fn build_container(
    namespace: &str,
    name: &str,
    raw: RawContainer,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) -> ContainerSpec {
    // A bad image gets a placeholder so the remaining fields still
    // contribute their violations to the collected report; the load
    // fails before the placeholder could ever reach the engine.
    let image = match raw.image.as_deref() {
        Some(s) if !s.is_empty() => match ImageName::parse(s) {
            Ok(image) => image,
            Err(e) => {
                issues.push(ValidationIssue::new(format!("{path}.image"), e.to_string()));
                ImageName {
                    registry: None,
                    repository: "invalid".to_string(),
                    tag: None,
                }
            }
        },
        _ => {
            issues.push(ValidationIssue::new(
                format!("{path}.image"),
                "image is required and must be non-empty",
            ));
            ImageName {
                registry: None,
                repository: "invalid".to_string(),
                tag: None,
            }
        }
    };

    let mut spec = ContainerSpec::new(ContainerName::new(namespace, name), image);
    spec.cmd = raw.cmd.map(StringOrList::into_vec);
    spec.entrypoint = raw.entrypoint.map(StringOrList::into_vec);

    match raw.env {
        Some(EnvDecl::Map(map)) => {
            spec.env = map
                .into_iter()
                .map(|(k, v)| (k, v.into_string()))
                .collect();
        }
        Some(EnvDecl::List(entries)) => {
            for (i, entry) in entries.iter().enumerate() {
                match entry.split_once('=') {
                    Some((k, v)) => {
                        spec.env.insert(k.to_string(), v.to_string());
                    }
                    None => issues.push(ValidationIssue::new(
                        format!("{path}.env[{i}]"),
                        "expected K=V",
                    )),
                }
            }
        }
        None => {}
    }

    if let Some(labels) = raw.labels {
        spec.labels = labels
            .into_iter()
            .map(|(k, v)| (k, v.into_string()))
            .collect();
    }

    for (i, entry) in raw.ports.into_iter().flatten().enumerate() {
        match PortBinding::parse(&entry.into_string()) {
            Ok(p) => spec.ports.push(p),
            Err(e) => issues.push(ValidationIssue::new(
                format!("{path}.ports[{i}]"),
                e.to_string(),
            )),
        }
    }

    for (i, entry) in raw.expose.into_iter().flatten().enumerate() {
        match ExposedPort::parse(&entry.into_string()) {
            Ok(p) => spec.expose.push(p),
            Err(e) => issues.push(ValidationIssue::new(
                format!("{path}.expose[{i}]"),
                e.to_string(),
            )),
        }
    }

    for (i, entry) in raw
        .volumes
        .map(StringOrList::into_vec)
        .into_iter()
        .flatten()
        .enumerate()
    {
        match VolumeSpec::parse(&entry) {
            Ok(v) => spec.volumes.push(v),
            Err(e) => issues.push(ValidationIssue::new(
                format!("{path}.volumes[{i}]"),
                e.to_string(),
            )),
        }
    }

    for (i, entry) in raw
        .volumes_from
        .map(StringOrList::into_vec)
        .into_iter()
        .flatten()
        .enumerate()
    {
        match ContainerName::parse(&entry, namespace) {
            Ok(n) => spec.volumes_from.push(n),
            Err(e) => issues.push(ValidationIssue::new(
                format!("{path}.volumes_from[{i}]"),
                e.to_string(),
            )),
        }
    }

    for (i, entry) in raw
        .links
        .map(StringOrList::into_vec)
        .into_iter()
        .flatten()
        .enumerate()
    {
        match LinkRef::parse(&entry, namespace) {
            Ok(l) => spec.links.push(l),
            Err(e) => issues.push(ValidationIssue::new(
                format!("{path}.links[{i}]"),
                e.to_string(),
            )),
        }
    }

    if let Some(net) = raw.net.as_deref() {
        match NetMode::parse(net, namespace) {
            Ok(n) => spec.net = n,
            Err(e) => issues.push(ValidationIssue::new(format!("{path}.net"), e.to_string())),
        }
    }

    if let Some(restart) = raw.restart.as_deref() {
        match RestartPolicy::parse(restart) {
            Ok(r) => spec.restart = r,
            Err(e) => issues.push(ValidationIssue::new(
                format!("{path}.restart"),
                e.to_string(),
            )),
        }
    }

    if let Some(state) = raw.state.as_deref() {
        match DesiredState::parse(state) {
            Ok(s) => spec.state = s,
            Err(e) => issues.push(ValidationIssue::new(format!("{path}.state"), e.to_string())),
        }
    }

    if let Some(timeout) = raw.kill_timeout {
        match parse_duration(&timeout.into_string()) {
            Ok(d) => spec.kill_timeout = d,
            Err(e) => issues.push(ValidationIssue::new(
                format!("{path}.kill_timeout"),
                e.to_string(),
            )),
        }
    }

    if let Some(memory) = raw.memory {
        match parse_memory(&memory.into_string()) {
            Ok(m) => spec.memory = Some(m),
            Err(e) => issues.push(ValidationIssue::new(
                format!("{path}.memory"),
                e.to_string(),
            )),
        }
    }

    spec.cpu_shares = raw.cpu_shares;
    spec.user = raw.user;
    spec.workdir = raw.workdir;
    spec.dns = raw.dns.map(StringOrList::into_vec).unwrap_or_default();
    spec.hostname = raw.hostname;
    spec.domainname = raw.domainname;
    spec.keep_colors = raw.keep_colors.unwrap_or(false);

    spec
}

/// Pod-level invariants: references resolve within the pod, published
/// ports do not collide, and `net=container:` containers do not declare
/// their own networking.
fn validate_pod(containers: &[ContainerSpec], issues: &mut Vec<ValidationIssue>) {
    let names: HashSet<&ContainerName> = containers.iter().map(|c| &c.name).collect();

    for c in containers {
        let path = format!("containers.{}", c.name.name);

        for (i, target) in c.volumes_from.iter().enumerate() {
            if !names.contains(target) {
                issues.push(ValidationIssue::new(
                    format!("{path}.volumes_from[{i}]"),
                    format!("'{}' is not a container in this pod", target),
                ));
            }
        }
        for (i, link) in c.links.iter().enumerate() {
            if !names.contains(&link.target) {
                issues.push(ValidationIssue::new(
                    format!("{path}.links[{i}]"),
                    format!("'{}' is not a container in this pod", link.target),
                ));
            }
        }

        if let Some(target) = c.net.container_ref() {
            if !names.contains(target) {
                issues.push(ValidationIssue::new(
                    format!("{path}.net"),
                    format!("'{}' is not a container in this pod", target),
                ));
            }
            // The container inherits the target's network namespace, so
            // its own networking declarations would be silently dead.
            if !c.ports.is_empty() {
                issues.push(ValidationIssue::new(
                    format!("{path}.ports"),
                    "cannot publish ports with net=container:",
                ));
            }
            if c.hostname.is_some() {
                issues.push(ValidationIssue::new(
                    format!("{path}.hostname"),
                    "cannot set hostname with net=container:",
                ));
            }
            if !c.dns.is_empty() {
                issues.push(ValidationIssue::new(
                    format!("{path}.dns"),
                    "cannot set dns with net=container:",
                ));
            }
            if !c.links.is_empty() {
                issues.push(ValidationIssue::new(
                    format!("{path}.links"),
                    "cannot declare links with net=container:",
                ));
            }
        }
    }

    // Host port collisions across the whole pod, per interface/protocol.
    let mut claimed: HashMap<(String, u16, String), ContainerName> = HashMap::new();
    for c in containers {
        for (i, port) in c.ports.iter().enumerate() {
            let endpoint = port.host_endpoint();
            if let Some(owner) = claimed.get(&endpoint) {
                issues.push(ValidationIssue::new(
                    format!("containers.{}.ports[{}]", c.name.name, i),
                    format!(
                        "host port {}:{}/{} is already published by '{}'",
                        endpoint.0, endpoint.1, endpoint.2, owner
                    ),
                ));
            } else {
                claimed.insert(endpoint, c.name.clone());
            }
        }
    }
}
