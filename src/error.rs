//! Error types for the orchestration core.

use std::time::Duration;

use crate::name::ContainerName;

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A single manifest validation violation, with a path into the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Path into the manifest document (e.g. `containers.web.ports[0]`).
    pub path: String,
    /// Human-readable description of the violation.
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Errors that can occur in the orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Manifest Errors
    // =========================================================================
    /// Template rendering of the manifest failed.
    #[error("failed to render manifest: {0}")]
    ManifestRender(String),

    /// The rendered manifest is not a well-formed document.
    #[error("failed to parse manifest: {0}")]
    ManifestParse(String),

    /// One or more declared containers violate a structural invariant.
    /// All violations are collected before this is returned.
    #[error("manifest validation failed:\n{}", format_issues(.0))]
    ManifestValidation(Vec<ValidationIssue>),

    /// The dependency graph over `volumes_from`/`links`/`net=container:`
    /// contains a cycle. Every edge on the cycle is listed.
    #[error("dependency cycle between containers: {}", .edges.join(", "))]
    ManifestCycle { edges: Vec<String> },

    // =========================================================================
    // Engine Errors
    // =========================================================================
    /// The container engine cannot be reached.
    #[error("container engine unavailable: {0}")]
    EngineUnavailable(String),

    /// A single engine operation failed; aborts the plan at that action.
    #[error("engine operation '{op}' failed for '{target}': {cause}")]
    EngineOperationFailed {
        op: &'static str,
        target: String,
        cause: String,
    },

    /// Pulling an image failed.
    #[error("failed to pull image '{reference}': {cause}")]
    ImagePullFailed { reference: String, cause: String },

    /// A container exited non-zero within the requested wait window.
    #[error("container '{container}' exited with code {code} within the wait window")]
    WaitExitNonZero { container: ContainerName, code: i64 },

    /// The plan was aborted by external cancellation.
    #[error("run canceled after {completed} of {total} actions")]
    Canceled { completed: usize, total: usize },

    // =========================================================================
    // Archive Errors
    // =========================================================================
    /// A release archive is missing a required member or is malformed.
    #[error("invalid release archive '{path}': {reason}")]
    InvalidArchive { path: String, reason: String },

    // =========================================================================
    // Reference Errors
    // =========================================================================
    /// Failed to parse a container or image reference.
    #[error("invalid reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },

    // =========================================================================
    // Timeout Errors
    // =========================================================================
    /// An engine operation exceeded its deadline.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // =========================================================================
    // I/O Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// True if re-invoking the CLI may succeed without operator action.
    ///
    /// Only engine availability is considered retriable; everything else
    /// needs a manifest fix or an explicit decision.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::EngineUnavailable(_))
    }
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("  - {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}
