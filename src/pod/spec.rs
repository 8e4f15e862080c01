//! Declarative container specifications and observed engine state.
//!
//! A declared [`ContainerSpec`] is produced by the manifest loader and is
//! immutable thereafter. What the engine actually runs is captured in a
//! separate [`ObservedContainer`]; the differ compares the two without
//! ever merging observed fields into a declared spec.
//!
//! Equality between declared and observed is decided by the identity
//! digest ([`ContainerSpec::identity_digest`]): a content hash over the
//! fields that force a recreate when they change. The digest is persisted
//! as an engine label at create time, so a later run can compare without
//! re-inspecting every field.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::constants::DEFAULT_KILL_TIMEOUT;
use crate::error::{Error, Result};
use crate::name::{ContainerName, ImageName, LinkRef};

// =============================================================================
// Declared Field Types
// =============================================================================

/// Restart policy, mirroring the engine's `no|always|on-failure[:n]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    OnFailure(u32),
}

impl RestartPolicy {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "no" | "" => Ok(Self::No),
            "always" => Ok(Self::Always),
            "on-failure" => Ok(Self::OnFailure(0)),
            other => match other.strip_prefix("on-failure:") {
                Some(n) => n.parse().map(Self::OnFailure).map_err(|_| {
                    Error::InvalidReference {
                        reference: s.to_string(),
                        reason: "retry count is not a number".to_string(),
                    }
                }),
                None => Err(Error::InvalidReference {
                    reference: s.to_string(),
                    reason: "expected no, always or on-failure[:<n>]".to_string(),
                }),
            },
        }
    }

    /// True if the engine would restart this container on its own; drives
    /// the recovery decision.
    pub fn restarts(&self) -> bool {
        !matches!(self, Self::No)
    }
}

impl std::fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::No => write!(f, "no"),
            Self::Always => write!(f, "always"),
            Self::OnFailure(0) => write!(f, "on-failure"),
            Self::OnFailure(n) => write!(f, "on-failure:{}", n),
        }
    }
}

/// Network mode: `bridge|host|none|container:<ref>`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetMode {
    #[default]
    Bridge,
    Host,
    None,
    /// Join the network namespace of another container in the same pod.
    Container(ContainerName),
}

impl NetMode {
    pub fn parse(s: &str, default_ns: &str) -> Result<Self> {
        match s {
            "bridge" | "" => Ok(Self::Bridge),
            "host" => Ok(Self::Host),
            "none" => Ok(Self::None),
            other => match other.strip_prefix("container:") {
                Some(target) => Ok(Self::Container(ContainerName::parse(target, default_ns)?)),
                None => Err(Error::InvalidReference {
                    reference: s.to_string(),
                    reason: "expected bridge, host, none or container:<ref>".to_string(),
                }),
            },
        }
    }

    /// The referenced container, if this is `container:<ref>`.
    pub fn container_ref(&self) -> Option<&ContainerName> {
        match self {
            Self::Container(name) => Some(name),
            _ => None,
        }
    }
}

impl std::fmt::Display for NetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bridge => write!(f, "bridge"),
            Self::Host => write!(f, "host"),
            Self::None => write!(f, "none"),
            Self::Container(name) => write!(f, "container:{}", name),
        }
    }
}

/// Desired container state declared in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DesiredState {
    /// Created and started (the default).
    #[default]
    Running,
    /// Created but left stopped.
    Created,
}

impl DesiredState {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "running" | "" => Ok(Self::Running),
            "created" => Ok(Self::Created),
            other => Err(Error::InvalidReference {
                reference: other.to_string(),
                reason: "expected running or created".to_string(),
            }),
        }
    }
}

/// An exposed (not published) container port: `<port>[/<proto>]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExposedPort {
    pub port: u16,
    pub proto: String,
}

impl ExposedPort {
    pub fn parse(s: &str) -> Result<Self> {
        let (port, proto) = split_proto(s);
        Ok(Self {
            port: parse_port(port, s)?,
            proto,
        })
    }
}

impl std::fmt::Display for ExposedPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.port, self.proto)
    }
}

/// A published port: `[<ip>:]<host>:<container>[/<proto>]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortBinding {
    /// Host interface to bind; all interfaces when absent.
    pub host_ip: Option<String>,
    pub host_port: u16,
    pub container_port: u16,
    pub proto: String,
}

impl PortBinding {
    pub fn parse(s: &str) -> Result<Self> {
        let (spec, proto) = split_proto(s);
        let parts: Vec<&str> = spec.split(':').collect();
        let (host_ip, host_port, container_port) = match parts.as_slice() {
            [host, container] => (None, *host, *container),
            [ip, host, container] => (Some(ip.to_string()), *host, *container),
            _ => {
                return Err(Error::InvalidReference {
                    reference: s.to_string(),
                    reason: "expected [<ip>:]<host>:<container>[/<proto>]".to_string(),
                })
            }
        };
        Ok(Self {
            host_ip,
            host_port: parse_port(host_port, s)?,
            container_port: parse_port(container_port, s)?,
            proto,
        })
    }

    /// The host-side endpoint `(interface, port, proto)`; two publications
    /// collide iff these are equal.
    pub fn host_endpoint(&self) -> (String, u16, String) {
        (
            self.host_ip.clone().unwrap_or_else(|| "0.0.0.0".to_string()),
            self.host_port,
            self.proto.clone(),
        )
    }
}

impl std::fmt::Display for PortBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ip) = &self.host_ip {
            write!(f, "{}:", ip)?;
        }
        write!(f, "{}:{}/{}", self.host_port, self.container_port, self.proto)
    }
}

fn split_proto(s: &str) -> (&str, String) {
    match s.rsplit_once('/') {
        Some((spec, proto)) => (spec, proto.to_ascii_lowercase()),
        None => (s, "tcp".to_string()),
    }
}

fn parse_port(s: &str, whole: &str) -> Result<u16> {
    s.parse().map_err(|_| Error::InvalidReference {
        reference: whole.to_string(),
        reason: format!("'{}' is not a port number", s),
    })
}

/// A volume declaration: a host bind (`<host>:<container>[:ro]`) or an
/// anonymous engine-managed volume (a bare container path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum VolumeSpec {
    Anonymous(String),
    Bind {
        host: String,
        container: String,
        read_only: bool,
    },
}

impl VolumeSpec {
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [path] => Ok(Self::Anonymous(path.to_string())),
            [host, container] => Ok(Self::Bind {
                host: host.to_string(),
                container: container.to_string(),
                read_only: false,
            }),
            [host, container, "ro"] => Ok(Self::Bind {
                host: host.to_string(),
                container: container.to_string(),
                read_only: true,
            }),
            _ => Err(Error::InvalidReference {
                reference: s.to_string(),
                reason: "expected <path> or <host>:<container>[:ro]".to_string(),
            }),
        }
    }
}

impl std::fmt::Display for VolumeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous(path) => write!(f, "{}", path),
            Self::Bind {
                host,
                container,
                read_only,
            } => {
                write!(f, "{}:{}", host, container)?;
                if *read_only {
                    write!(f, ":ro")?;
                }
                Ok(())
            }
        }
    }
}

// =============================================================================
// Container Specification
// =============================================================================

/// A declared container: the manifest's description of what should run.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: ContainerName,
    pub image: ImageName,
    pub cmd: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub expose: Vec<ExposedPort>,
    pub ports: Vec<PortBinding>,
    pub volumes: Vec<VolumeSpec>,
    pub volumes_from: Vec<ContainerName>,
    pub links: Vec<LinkRef>,
    pub net: NetMode,
    pub restart: RestartPolicy,
    pub state: DesiredState,
    pub kill_timeout: Duration,
    pub cpu_shares: Option<i64>,
    pub memory: Option<i64>,
    pub user: Option<String>,
    pub workdir: Option<String>,
    pub dns: Vec<String>,
    pub hostname: Option<String>,
    pub domainname: Option<String>,
    /// Preserve ANSI colors when streaming this container's logs.
    pub keep_colors: bool,
}

impl ContainerSpec {
    /// A spec with every optional field at its default.
    pub fn new(name: ContainerName, image: ImageName) -> Self {
        Self {
            name,
            image,
            cmd: None,
            entrypoint: None,
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            expose: Vec::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            volumes_from: Vec::new(),
            links: Vec::new(),
            net: NetMode::default(),
            restart: RestartPolicy::default(),
            state: DesiredState::default(),
            kill_timeout: DEFAULT_KILL_TIMEOUT,
            cpu_shares: None,
            memory: None,
            user: None,
            workdir: None,
            dns: Vec::new(),
            hostname: None,
            domainname: None,
            keep_colors: false,
        }
    }

    /// Names of the containers this one must be scheduled after: the
    /// targets of `volumes_from`, `links` and `net=container:`.
    pub fn dependencies(&self) -> Vec<ContainerName> {
        let mut deps: Vec<ContainerName> = self.volumes_from.clone();
        deps.extend(self.links.iter().map(|l| l.target.clone()));
        if let Some(target) = self.net.container_ref() {
            deps.push(target.clone());
        }
        deps.sort();
        deps.dedup();
        deps
    }

    /// Content digest over the identity fields: the fields whose change
    /// forces a remove-and-recreate rather than a start/stop.
    ///
    /// The digest input is a canonical JSON rendering with every field
    /// reduced to strings in declaration order (maps are sorted), so the
    /// hash is stable across runs and across refactors of the in-memory
    /// types.
    pub fn identity_digest(&self) -> String {
        #[derive(Serialize)]
        struct Identity<'a> {
            image: String,
            cmd: &'a Option<Vec<String>>,
            entrypoint: &'a Option<Vec<String>>,
            env: &'a BTreeMap<String, String>,
            volumes: Vec<String>,
            volumes_from: Vec<String>,
            expose: Vec<String>,
            ports: Vec<String>,
            links: Vec<String>,
            net: String,
            user: &'a Option<String>,
            workdir: &'a Option<String>,
            restart: String,
        }

        let identity = Identity {
            image: format!(
                "{}:{}",
                self.image.repo_key(),
                self.image.effective_tag()
            ),
            cmd: &self.cmd,
            entrypoint: &self.entrypoint,
            env: &self.env,
            volumes: self.volumes.iter().map(|v| v.to_string()).collect(),
            volumes_from: self.volumes_from.iter().map(|n| n.to_string()).collect(),
            expose: self.expose.iter().map(|p| p.to_string()).collect(),
            ports: self.ports.iter().map(|p| p.to_string()).collect(),
            links: self
                .links
                .iter()
                .map(|l| format!("{}:{}", l.target, l.alias_or_name()))
                .collect(),
            net: self.net.to_string(),
            user: &self.user,
            workdir: &self.workdir,
            restart: self.restart.to_string(),
        };

        let bytes = serde_json::to_vec(&identity).expect("identity projection serializes");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        format!("{:x}", hasher.finalize())
    }

    /// True iff the observed container is equivalent: identity digests
    /// match and the observed runtime state satisfies the desired state.
    /// Engine-synthesized differences (id, timestamps) are ignored.
    pub fn matches(&self, observed: &ObservedContainer) -> bool {
        self.digest_matches(observed) && self.state_matches(observed)
    }

    /// Identity comparison alone, ignoring runtime state.
    pub fn digest_matches(&self, observed: &ObservedContainer) -> bool {
        observed.hash.as_deref() == Some(self.identity_digest().as_str())
    }

    /// Desired-vs-observed state comparison alone.
    pub fn state_matches(&self, observed: &ObservedContainer) -> bool {
        match self.state {
            DesiredState::Running => observed.state.status == ObservedStatus::Running,
            DesiredState::Created => observed.state.status == ObservedStatus::Created,
        }
    }
}

// =============================================================================
// Observed State
// =============================================================================

/// Runtime status reported by the engine, reduced to the three states the
/// differ distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedStatus {
    /// Created and never started.
    Created,
    Running,
    /// Started at some point and since exited.
    Exited,
}

impl std::fmt::Display for ObservedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Engine-reported runtime state of a container.
#[derive(Debug, Clone)]
pub struct ObservedState {
    pub status: ObservedStatus,
    pub exit_code: Option<i64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ObservedState {
    pub fn running() -> Self {
        Self {
            status: ObservedStatus::Running,
            exit_code: None,
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    pub fn created() -> Self {
        Self {
            status: ObservedStatus::Created,
            exit_code: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn exited(code: i64) -> Self {
        Self {
            status: ObservedStatus::Exited,
            exit_code: Some(code),
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
        }
    }
}

/// A container as enumerated from the engine. Lives only for the duration
/// of a single diff/apply cycle.
#[derive(Debug, Clone)]
pub struct ObservedContainer {
    pub name: ContainerName,
    /// Engine-assigned id.
    pub id: String,
    pub image: ImageName,
    /// Identity digest persisted at create time, if this container is
    /// managed by us.
    pub hash: Option<String>,
    /// Rendered-manifest digest persisted at create time.
    pub manifest_hash: Option<String>,
    pub state: ObservedState,
    /// Restart policy as reported by the engine; consulted by recovery.
    pub restart: RestartPolicy,
    /// Names this container depends on, reconstructed from the engine's
    /// view of `volumes_from`/`links`/`net`. Drives removal ordering.
    pub depends: Vec<ContainerName>,
    /// Labels as reported by the engine.
    pub labels: BTreeMap<String, String>,
}

// =============================================================================
// Value Parsing Helpers
// =============================================================================

/// Parses a memory size string (`512`, `512k`, `64M`, `2G`) to bytes.
pub fn parse_memory(s: &str) -> Result<i64> {
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, ""),
    };
    let value: i64 = digits.parse().map_err(|_| Error::InvalidReference {
        reference: s.to_string(),
        reason: "not a memory size".to_string(),
    })?;
    let multiplier: i64 = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        _ => {
            return Err(Error::InvalidReference {
                reference: s.to_string(),
                reason: format!("unknown size unit '{}'", unit),
            })
        }
    };
    Ok(value.saturating_mul(multiplier))
}

/// Parses a duration string (`30`, `30s`, `2m`, `1h`) to a [`Duration`].
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };
    let value: u64 = digits.parse().map_err(|_| Error::InvalidReference {
        reference: s.to_string(),
        reason: "not a duration".to_string(),
    })?;
    let secs = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        _ => {
            return Err(Error::InvalidReference {
                reference: s.to_string(),
                reason: format!("unknown duration unit '{}'", unit),
            })
        }
    };
    Ok(Duration::from_secs(secs))
}
