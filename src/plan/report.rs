//! Outcome of one reconciliation cycle.

use super::{Operation, OperationId, OperationKind, OperationReason, PlanStatus, ReconciliationPlan};
use crate::drift::DriftViolation;
use crate::models::{Resource, ResourceKey};
use crate::validate::{Severity, Violation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Succeeded => write!(f, "succeeded"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// One line of the operation log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub id: OperationId,
    pub kind: OperationKind,
    pub entity: ResourceKey,
    pub reason: OperationReason,
    pub destructive: bool,
    pub outcome: Outcome,
    /// Provider submissions made, retries included; 0 when skipped.
    pub attempts: u32,
    #[serde(default)]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl OperationRecord {
    pub fn new(op: &Operation, outcome: Outcome, attempts: u32) -> Self {
        OperationRecord {
            id: op.id,
            kind: op.kind,
            entity: op.entity.clone(),
            reason: op.reason,
            destructive: op.destructive,
            outcome,
            attempts,
            error: None,
            elapsed_ms: 0,
        }
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Provider-side result of a succeeded operation; `resource` is `None` after a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedChange {
    pub entity: ResourceKey,
    pub resource: Option<Resource>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub topology_id: String,
    pub status: PlanStatus,
    pub generated_at: DateTime<Utc>,
    /// In plan order.
    pub operations: Vec<OperationRecord>,
    pub violations: Vec<Violation>,
    #[serde(default)]
    pub drift: Vec<DriftViolation>,
}

impl ReconciliationReport {
    pub fn new(
        plan: &ReconciliationPlan,
        mut operations: Vec<OperationRecord>,
        drift: Vec<DriftViolation>,
    ) -> Self {
        operations.sort_by_key(|r| r.id);
        ReconciliationReport {
            topology_id: plan.topology_id.clone(),
            status: plan.status,
            generated_at: Utc::now(),
            operations,
            violations: plan.warnings.clone(),
            drift,
        }
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.operations.iter().filter(|r| r.outcome == outcome).count()
    }

    /// Entities whose operation failed or was skipped, each listed once.
    pub fn unresolved(&self) -> Vec<&ResourceKey> {
        let mut keys: Vec<&ResourceKey> = self
            .operations
            .iter()
            .filter(|r| r.outcome != Outcome::Succeeded)
            .map(|r| &r.entity)
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn is_success(&self) -> bool {
        self.status == PlanStatus::Completed
    }

    pub fn error_count(&self) -> usize {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Error)
            .count()
    }
}

impl fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {} ops ({} succeeded, {} failed, {} skipped), {} violations, {} drift findings",
            self.topology_id,
            self.status,
            self.operations.len(),
            self.count(Outcome::Succeeded),
            self.count(Outcome::Failed),
            self.count(Outcome::Skipped),
            self.violations.len(),
            self.drift.len()
        )
    }
}
