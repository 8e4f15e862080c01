//! Structured plan report for downstream automation.
//!
//! One entry per action: `{kind, target, reason, changed}`. The runner
//! fills `changed` from real outcomes after execution, or from predicted
//! outcomes after a dry-run, so the document always reflects what the
//! invocation actually decided.

use serde::Serialize;

use crate::diff::{Action, Plan};
use crate::error::{Error, Result};

/// One reported action.
#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub kind: String,
    pub target: String,
    pub reason: String,
    pub changed: bool,
}

/// The full report for one plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanReport {
    pub namespace: String,
    pub dry_run: bool,
    pub actions: Vec<ReportEntry>,
}

impl PlanReport {
    pub fn new(namespace: impl Into<String>, dry_run: bool) -> Self {
        Self {
            namespace: namespace.into(),
            dry_run,
            actions: Vec::new(),
        }
    }

    /// Records an executed (or predicted) action.
    pub fn record(&mut self, action: &Action, changed: bool) {
        self.actions.push(ReportEntry {
            kind: action.kind().to_string(),
            target: action.target(),
            reason: action.reason(),
            changed,
        });
    }

    /// True if any recorded action changed engine state.
    pub fn changed_anything(&self) -> bool {
        self.actions.iter().any(|a| a.changed)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Human-oriented one-line-per-action rendering of a plan, used by the
/// CLI before execution.
pub fn describe(plan: &Plan) -> String {
    plan.actions
        .iter()
        .map(|a| format!("{:<12} {:<32} {}", a.kind(), a.target(), a.reason()))
        .collect::<Vec<_>>()
        .join("\n")
}
