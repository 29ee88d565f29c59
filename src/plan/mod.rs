//! Reconciliation plan: ordered operations plus the plan state machine.
//!
//! ```text
//! Pending -> Validating -> Rejected
//!                       -> Validated -> Executing -> Completed
//!                                                 -> CompletedPartial
//!                                                 -> Failed
//! ```

mod report;

pub use report::{AppliedChange, OperationRecord, Outcome, ReconciliationReport};

use crate::error::ReconcileError;
use crate::models::{Resource, ResourceKey};
use crate::validate::Violation;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub type OperationId = u32;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "create"),
            OperationKind::Update => write!(f, "update"),
            OperationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Why an operation is in the plan.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum OperationReason {
    #[default]
    Declared,
    /// Restores an entity the drift detector found missing or modified.
    DriftCorrection,
    /// Clears gateway transit on a peering so its gateway can be replaced.
    TransitUnpin,
    /// Puts the declared peering back once the replacement gateway exists.
    TransitRepin,
}

impl fmt::Display for OperationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationReason::Declared => write!(f, "declared"),
            OperationReason::DriftCorrection => write!(f, "drift-correction"),
            OperationReason::TransitUnpin => write!(f, "transit-unpin"),
            OperationReason::TransitRepin => write!(f, "transit-repin"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub entity: ResourceKey,
    /// Part of a delete + recreate pair.
    pub destructive: bool,
    pub depends_on: BTreeSet<OperationId>,
    /// Attribute names that differ from the observed state.
    #[serde(default)]
    pub changes: Vec<String>,
    /// Resource to submit; `None` for deletes.
    #[serde(default)]
    pub payload: Option<Resource>,
    #[serde(default)]
    pub reason: OperationReason,
}

impl Operation {
    pub fn create(id: OperationId, payload: Resource) -> Self {
        Operation {
            id,
            kind: OperationKind::Create,
            entity: payload.key(),
            destructive: false,
            depends_on: BTreeSet::new(),
            changes: vec![],
            payload: Some(payload),
            reason: OperationReason::Declared,
        }
    }

    pub fn update(id: OperationId, payload: Resource, changes: Vec<String>, destructive: bool) -> Self {
        Operation {
            id,
            kind: OperationKind::Update,
            entity: payload.key(),
            destructive,
            depends_on: BTreeSet::new(),
            changes,
            payload: Some(payload),
            reason: OperationReason::Declared,
        }
    }

    pub fn delete(id: OperationId, entity: ResourceKey) -> Self {
        Operation {
            id,
            kind: OperationKind::Delete,
            entity,
            destructive: false,
            depends_on: BTreeSet::new(),
            changes: vec![],
            payload: None,
            reason: OperationReason::Declared,
        }
    }

    pub fn with_reason(mut self, reason: OperationReason) -> Self {
        self.reason = reason;
        self
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {} {}", self.id, self.kind, self.entity)?;
        if self.destructive {
            write!(f, " (destructive)")?;
        }
        if self.reason != OperationReason::Declared {
            write!(f, " [{}]", self.reason)?;
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum PlanStatus {
    Pending,
    Validating,
    Rejected,
    Validated,
    Executing,
    Completed,
    CompletedPartial,
    Failed,
}

impl PlanStatus {
    pub fn can_transition_to(self, next: PlanStatus) -> bool {
        use PlanStatus::*;
        matches!(
            (self, next),
            (Pending, Validating)
                | (Validating, Rejected)
                | (Validating, Validated)
                | (Validated, Executing)
                | (Executing, Completed)
                | (Executing, CompletedPartial)
                | (Executing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlanStatus::Rejected
                | PlanStatus::Completed
                | PlanStatus::CompletedPartial
                | PlanStatus::Failed
        )
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanStatus::Pending => "Pending",
            PlanStatus::Validating => "Validating",
            PlanStatus::Rejected => "Rejected",
            PlanStatus::Validated => "Validated",
            PlanStatus::Executing => "Executing",
            PlanStatus::Completed => "Completed",
            PlanStatus::CompletedPartial => "CompletedPartial",
            PlanStatus::Failed => "Failed",
        };
        write!(f, "{name}")
    }
}

/// Operations in dependency order, numbered from 1.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationPlan {
    pub topology_id: String,
    pub status: PlanStatus,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub warnings: Vec<Violation>,
}

impl ReconciliationPlan {
    /// Expand destructive updates, order by dependency and renumber.
    ///
    /// Each destructive `Update` becomes a `Delete` that inherits the update's
    /// prerequisites and a `Create` that depends on the delete; operations
    /// that depended on the update now depend on the create.
    pub fn new(
        topology_id: impl Into<String>,
        operations: Vec<Operation>,
        warnings: Vec<Violation>,
    ) -> Result<Self, ReconcileError> {
        let expanded = expand_destructive(operations);
        let ordered = topological_order(expanded)?;
        Ok(ReconciliationPlan {
            topology_id: topology_id.into(),
            status: PlanStatus::Pending,
            operations: ordered,
            warnings,
        })
    }

    /// A plan that never gets past validation: `Pending -> Validating -> Rejected`.
    pub fn rejected(
        topology_id: impl Into<String>,
        violations: Vec<Violation>,
    ) -> Result<Self, ReconcileError> {
        let mut plan = ReconciliationPlan {
            topology_id: topology_id.into(),
            status: PlanStatus::Pending,
            operations: vec![],
            warnings: violations,
        };
        plan.transition(PlanStatus::Validating)?;
        plan.transition(PlanStatus::Rejected)?;
        Ok(plan)
    }

    pub fn transition(&mut self, next: PlanStatus) -> Result<(), ReconcileError> {
        if !self.status.can_transition_to(next) {
            return Err(ReconcileError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        log::debug!(
            "Plan '{}': {} -> {next}",
            self.topology_id,
            self.status
        );
        self.status = next;
        Ok(())
    }

    pub fn operation(&self, id: OperationId) -> Option<&Operation> {
        self.operations.iter().find(|op| op.id == id)
    }

    /// Operations touching `entity`, in plan order.
    pub fn operations_on<'a>(&'a self, entity: &'a ResourceKey) -> impl Iterator<Item = &'a Operation> {
        self.operations.iter().filter(move |op| &op.entity == entity)
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

fn expand_destructive(operations: Vec<Operation>) -> Vec<Operation> {
    let mut next_id = operations.iter().map(|op| op.id).max().unwrap_or(0) + 1;
    let mut out = Vec::with_capacity(operations.len());
    for op in operations {
        if op.kind != OperationKind::Update || !op.destructive {
            out.push(op);
            continue;
        }
        // The create keeps the update's id, so dependents follow it automatically.
        let delete = Operation {
            id: next_id,
            kind: OperationKind::Delete,
            entity: op.entity.clone(),
            destructive: true,
            depends_on: op.depends_on.clone(),
            changes: op.changes.clone(),
            payload: None,
            reason: op.reason,
        };
        next_id += 1;
        let create = Operation {
            kind: OperationKind::Create,
            depends_on: BTreeSet::from([delete.id]),
            ..op
        };
        log::debug!("Expanded destructive update of {} into #{} + #{}", create.entity, delete.id, create.id);
        out.push(delete);
        out.push(create);
    }
    out
}

/// Kahn's algorithm; ties broken by the incoming id so ordering is stable.
fn topological_order(operations: Vec<Operation>) -> Result<Vec<Operation>, ReconcileError> {
    let known: BTreeSet<OperationId> = operations.iter().map(|op| op.id).collect();
    let mut by_id: BTreeMap<OperationId, Operation> = BTreeMap::new();
    let mut remaining: BTreeMap<OperationId, BTreeSet<OperationId>> = BTreeMap::new();
    let mut dependents: BTreeMap<OperationId, Vec<OperationId>> = BTreeMap::new();

    for mut op in operations {
        op.depends_on.retain(|dep| {
            let ok = known.contains(dep) && *dep != op.id;
            if !ok {
                log::warn!("Dropping dangling dependency #{dep} of operation #{}", op.id);
            }
            ok
        });
        for dep in &op.depends_on {
            dependents.entry(*dep).or_default().push(op.id);
        }
        remaining.insert(op.id, op.depends_on.clone());
        by_id.insert(op.id, op);
    }

    let mut ready: BTreeSet<OperationId> = remaining
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(by_id.len());
    while let Some(id) = ready.pop_first() {
        remaining.remove(&id);
        order.push(id);
        for dependent in dependents.get(&id).into_iter().flatten() {
            if let Some(deps) = remaining.get_mut(dependent) {
                deps.remove(&id);
                if deps.is_empty() {
                    ready.insert(*dependent);
                }
            }
        }
    }

    if !remaining.is_empty() {
        let cycle: Vec<OperationId> = remaining.keys().copied().collect();
        log::error!("Dependency cycle between operations {cycle:?}");
        return Err(ReconcileError::DependencyCycle(cycle));
    }

    let renumber: BTreeMap<OperationId, OperationId> = order
        .iter()
        .enumerate()
        .map(|(i, id)| (*id, i as OperationId + 1))
        .collect();
    Ok(order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .map(|mut op| {
            op.id = renumber[&op.id];
            op.depends_on = op.depends_on.iter().map(|d| renumber[d]).collect();
            op
        })
        .collect())
}
