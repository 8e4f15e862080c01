//! # stevedore
//!
//! **Declarative container orchestration for a single Docker host.**
//!
//! A manifest declares a named group of containers (a *pod*); stevedore
//! computes the difference between that declared state and what the
//! engine is actually running, then applies the minimum set of create,
//! remove, start, and stop operations — in dependency order — to
//! converge the host.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          stevedore                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  manifest ──render──► Pod ─────┐                                │
//! │                                ▼                                │
//! │  EngineClient::list ──► diff(declared, observed) ──► Plan       │
//! │                                │                                │
//! │                                ▼                                │
//! │  Runner ── Create/Start/Stop/Remove/EnsureImage/Wait ──► Engine │
//! │                                │                                │
//! │                                ▼                                │
//! │                           PlanReport                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Convergence Model
//!
//! The engine owns all persistent state; stevedore holds nothing between
//! invocations. Identity is decided by a content digest over each
//! declared container's identity fields, persisted as an engine label at
//! create time. Because the plan is a pure function of (manifest, engine
//! state), re-running after a partial failure simply converges the
//! remainder:
//!
//! ```text
//! diff(M, apply(S, plan(M, S)))  =  only no-ops
//! ```
//!
//! # Capabilities
//!
//! Engine I/O and template expansion enter the core as traits
//! ([`engine::EngineClient`], [`pod::TemplateRenderer`]) wired at the
//! binary boundary; tests substitute in-memory fakes.

// =============================================================================
// Internal Modules
// =============================================================================

mod constants;
mod error;

// =============================================================================
// Public Modules
// =============================================================================

/// Release archives: manifest + artifacts in one tarball.
pub mod archive;
/// The differ: declared vs observed to an ordered action plan.
pub mod diff;
/// Engine-generic orchestration: parallel pulls, recovery.
pub mod driver;
/// The engine capability and its Docker implementation.
pub mod engine;
/// Container and image reference types.
pub mod name;
/// Pod model: specs, manifest loading, templating, dependency graph.
pub mod pod;
/// Structured plan reporting.
pub mod report;
/// Image retention sweeps.
pub mod retention;
/// Plan execution.
pub mod runner;

pub use constants::{
    DEFAULT_KILL_TIMEOUT, DEFAULT_PULL_CONCURRENCY, LABEL_HASH, LABEL_MANIFEST_HASH, LABEL_NAME,
    LABEL_NAMESPACE,
};
pub use error::{Error, Result, ValidationIssue};
