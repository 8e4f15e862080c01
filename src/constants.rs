//! Constants for the orchestration core.
//!
//! All defaults, limits, and label keys are defined here to ensure
//! consistency and prevent magic numbers throughout the codebase.

use std::time::Duration;

// =============================================================================
// Engine Labels (persisted state)
// =============================================================================

/// Label carrying the pod's namespace on every managed container.
pub const LABEL_NAMESPACE: &str = "pod.namespace";

/// Label carrying the declared container name.
pub const LABEL_NAME: &str = "pod.name";

/// Label carrying the identity digest of the declared container.
pub const LABEL_HASH: &str = "pod.hash";

/// Label carrying the digest of the full rendered manifest.
pub const LABEL_MANIFEST_HASH: &str = "pod.manifest-hash";

// =============================================================================
// Defaults
// =============================================================================

/// Grace period after SIGTERM before SIGKILL when removing a container.
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(10);

/// Tag assumed when an image reference carries none, for equality purposes.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// Maximum number of images pulled concurrently.
pub const DEFAULT_PULL_CONCURRENCY: usize = 4;

// =============================================================================
// Limits and Timeouts
// =============================================================================

/// Maximum size of a pod manifest in bytes (1 MiB).
pub const MAX_MANIFEST_SIZE: usize = 1024 * 1024;

/// Timeout for a single image pull operation.
pub const IMAGE_PULL_TIMEOUT: Duration = Duration::from_secs(300);

// =============================================================================
// Release Archive Layout
// =============================================================================

/// Archive member holding the manifest bytes.
pub const ARCHIVE_MANIFEST_MEMBER: &str = "compose.yml";

/// Archive directory holding artifact files.
pub const ARCHIVE_ARTIFACTS_DIR: &str = "artifacts";
