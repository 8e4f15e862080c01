//! Container and image reference types.
//!
//! Two identifier families are used throughout the core:
//!
//! - [`ContainerName`]: `namespace.name`, the identity of a container
//!   within a pod. A reference without a namespace inherits the current
//!   pod's namespace at resolution time.
//! - [`ImageName`]: `[registry/]repository[:tag]`. A missing tag is
//!   treated as `latest` for equality but preserved as absent when
//!   rendering, so manifests round-trip unchanged.
//!
//! Tags follow a two-class ordering: strictly numeric dotted tags compare
//! as version tuples and sort before all non-numeric tags; non-numeric
//! tags compare lexicographically. See [`compare_tags`].

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_IMAGE_TAG;
use crate::error::{Error, Result};

// =============================================================================
// Container Names
// =============================================================================

/// Identity of a container within a pod: `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerName {
    pub namespace: String,
    pub name: String,
}

impl ContainerName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parses `namespace.name`, splitting on the first `.`. A reference
    /// without a `.` gets `default_ns`.
    pub fn parse(s: &str, default_ns: &str) -> Result<Self> {
        let (ns, name) = match s.split_once('.') {
            Some((ns, name)) => (ns, name),
            None => (default_ns, s),
        };
        if name.is_empty() {
            return Err(Error::InvalidReference {
                reference: s.to_string(),
                reason: "container name is empty".to_string(),
            });
        }
        Ok(Self::new(ns, name))
    }

    /// True if this container belongs to `namespace`.
    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.namespace == namespace
    }
}

impl std::fmt::Display for ContainerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// A `links` entry: a container reference plus an optional alias under
/// which the link is exposed inside the dependent container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkRef {
    pub target: ContainerName,
    pub alias: Option<String>,
}

impl LinkRef {
    /// Parses `ref[:alias]`. The reference itself never contains `:`,
    /// so the first `:` starts the alias.
    pub fn parse(s: &str, default_ns: &str) -> Result<Self> {
        let (target, alias) = match s.split_once(':') {
            Some((t, a)) => (t, Some(a.to_string())),
            None => (s, None),
        };
        Ok(Self {
            target: ContainerName::parse(target, default_ns)?,
            alias,
        })
    }

    /// The name the link is exposed under: the alias if given, else the
    /// bare container name.
    pub fn alias_or_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.target.name)
    }
}

// =============================================================================
// Image Names
// =============================================================================

/// An image reference: `[registry/]repository[:tag]`.
#[derive(Debug, Clone, Eq, Hash, Serialize, Deserialize)]
pub struct ImageName {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
}

impl ImageName {
    /// Parses an image reference.
    ///
    /// The leading `/`-separated segment is the registry iff it contains
    /// a `.` or a `:` (a hostname or a host:port). The last `:` after the
    /// registry splits repository and tag; a `:` inside the registry port
    /// is never mistaken for a tag separator because the registry is
    /// stripped first.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidReference {
                reference: s.to_string(),
                reason: "image reference is empty".to_string(),
            });
        }

        let (registry, rest) = match s.split_once('/') {
            Some((head, rest)) if head.contains('.') || head.contains(':') => {
                (Some(head.to_string()), rest)
            }
            _ => (None, s),
        };

        let (repository, tag) = match rest.rsplit_once(':') {
            Some((repo, tag)) => (repo.to_string(), Some(tag.to_string())),
            None => (rest.to_string(), None),
        };

        if repository.is_empty() {
            return Err(Error::InvalidReference {
                reference: s.to_string(),
                reason: "image repository is empty".to_string(),
            });
        }

        Ok(Self {
            registry,
            repository,
            tag,
        })
    }

    /// The tag used for equality: `latest` when none is declared.
    pub fn effective_tag(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_IMAGE_TAG)
    }

    /// `[registry/]repository` without the tag; the retention key.
    pub fn repo_key(&self) -> String {
        match &self.registry {
            Some(reg) => format!("{}/{}", reg, self.repository),
            None => self.repository.clone(),
        }
    }

    /// The same reference with a different tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag.into()),
        }
    }
}

impl PartialEq for ImageName {
    fn eq(&self, other: &Self) -> bool {
        self.registry == other.registry
            && self.repository == other.repository
            && self.effective_tag() == other.effective_tag()
    }
}

impl std::fmt::Display for ImageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(reg) = &self.registry {
            write!(f, "{}/", reg)?;
        }
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tag Ordering
// =============================================================================

/// Compares two image tags.
///
/// Strictly numeric dotted tags (`1`, `2.0`, `3.1.4`) compare as version
/// tuples. Non-numeric tags compare lexicographically and order after
/// every numeric tag, which puts floating tags like `latest` ahead of
/// pinned versions in a descending sort.
pub fn compare_tags(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Parses a strictly numeric dotted tag into its components.
fn parse_version(tag: &str) -> Option<Vec<u64>> {
    if tag.is_empty() {
        return None;
    }
    tag.split('.').map(|part| part.parse::<u64>().ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_splits_on_first_dot() {
        let n = ContainerName::parse("prod.web", "default").unwrap();
        assert_eq!(n.namespace, "prod");
        assert_eq!(n.name, "web");
    }

    #[test]
    fn container_name_defaults_namespace() {
        let n = ContainerName::parse("web", "prod").unwrap();
        assert_eq!(n.namespace, "prod");
        assert_eq!(n.name, "web");
        assert_eq!(n.to_string(), "prod.web");
    }

    #[test]
    fn link_ref_alias() {
        let l = LinkRef::parse("db:primary", "prod").unwrap();
        assert_eq!(l.target, ContainerName::new("prod", "db"));
        assert_eq!(l.alias_or_name(), "primary");

        let bare = LinkRef::parse("db", "prod").unwrap();
        assert_eq!(bare.alias_or_name(), "db");
    }

    #[test]
    fn image_name_plain_repo() {
        let i = ImageName::parse("nginx").unwrap();
        assert_eq!(i.registry, None);
        assert_eq!(i.repository, "nginx");
        assert_eq!(i.tag, None);
        assert_eq!(i.effective_tag(), "latest");
    }

    #[test]
    fn image_name_with_registry_port() {
        let i = ImageName::parse("registry.example.com:5000/team/app:1.2").unwrap();
        assert_eq!(i.registry.as_deref(), Some("registry.example.com:5000"));
        assert_eq!(i.repository, "team/app");
        assert_eq!(i.tag.as_deref(), Some("1.2"));
        assert_eq!(i.to_string(), "registry.example.com:5000/team/app:1.2");
    }

    #[test]
    fn image_name_untagged_registry_port_is_not_a_tag() {
        let i = ImageName::parse("registry.example.com:5000/team/app").unwrap();
        assert_eq!(i.registry.as_deref(), Some("registry.example.com:5000"));
        assert_eq!(i.tag, None);
    }

    #[test]
    fn image_name_user_repo_has_no_registry() {
        let i = ImageName::parse("library/redis:7").unwrap();
        assert_eq!(i.registry, None);
        assert_eq!(i.repository, "library/redis");
        assert_eq!(i.tag.as_deref(), Some("7"));
    }

    #[test]
    fn image_equality_treats_missing_tag_as_latest() {
        let a = ImageName::parse("nginx").unwrap();
        let b = ImageName::parse("nginx:latest").unwrap();
        assert_eq!(a, b);
        // Rendering still preserves the absence.
        assert_eq!(a.to_string(), "nginx");
    }

    #[test]
    fn numeric_tags_compare_as_versions() {
        assert_eq!(compare_tags("1.2", "1.10"), Ordering::Less);
        assert_eq!(compare_tags("2.0", "2.0"), Ordering::Equal);
        assert_eq!(compare_tags("10", "9"), Ordering::Greater);
    }

    #[test]
    fn numeric_tags_order_before_lexicographic() {
        assert_eq!(compare_tags("99.9", "latest"), Ordering::Less);
        assert_eq!(compare_tags("stable", "1.0"), Ordering::Greater);
        assert_eq!(compare_tags("beta", "alpha"), Ordering::Greater);
    }
}
