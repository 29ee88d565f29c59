//! One reconciliation cycle: validate, diff, execute, report.

use crate::config::ReconcilerConfig;
use crate::diff::StateDiffer;
use crate::drift::{DriftDetector, DriftViolation};
use crate::error::ReconcileError;
use crate::executor::{CancellationHandle, Executor, LeaseRegistry};
use crate::models::ResourceKey;
use crate::plan::{PlanStatus, ReconciliationPlan, ReconciliationReport};
use crate::provider::CloudResourceProvider;
use crate::topology::{TopologyDocument, TopologyModel};
use crate::validate::{has_errors, InvariantValidator, Violation};
use colored::Colorize;
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct Reconciler {
    executor: Executor,
    leases: LeaseRegistry,
    drift: Arc<DriftDetector>,
    validator: InvariantValidator,
    differ: StateDiffer,
}

impl Reconciler {
    pub fn new(provider: Arc<dyn CloudResourceProvider>, config: ReconcilerConfig) -> Self {
        Reconciler {
            drift: Arc::new(DriftDetector::new(provider.clone())),
            executor: Executor::new(provider, config),
            leases: LeaseRegistry::new(),
            validator: InvariantValidator::new(),
            differ: StateDiffer::new(),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        self.executor.config()
    }

    /// Observed-state cache shared with the background drift loop.
    pub fn drift(&self) -> &Arc<DriftDetector> {
        &self.drift
    }

    /// Check the document against the invariants and the provider's current state.
    pub async fn validate(&self, doc: TopologyDocument) -> Result<Vec<Violation>, ReconcileError> {
        let model = TopologyModel::build(doc)?;
        let topology_id = model.topology_id();
        self.drift.inventory(topology_id).await?;
        let observed = self.drift.observed(topology_id);
        Ok(self.validator.validate(&model, Some(&observed)))
    }

    /// Build a validated plan, or a rejected one carrying the violations.
    pub async fn plan(&self, doc: TopologyDocument) -> Result<ReconciliationPlan, ReconcileError> {
        let model = TopologyModel::build(doc)?;
        self.plan_model(&model).await
    }

    async fn plan_model(&self, model: &TopologyModel) -> Result<ReconciliationPlan, ReconcileError> {
        let topology_id = model.topology_id().to_string();
        self.drift.inventory(&topology_id).await?;
        let observed = self.drift.observed(&topology_id);

        let violations = self.validator.validate(model, Some(&observed));
        if has_errors(&violations) {
            log::warn!("{}", format!("Plan for '{topology_id}' rejected").red());
            return ReconciliationPlan::rejected(topology_id, violations);
        }

        let drifted: BTreeSet<ResourceKey> = self
            .drift
            .pending(&topology_id)
            .into_iter()
            .map(|v| v.entity)
            .collect();
        let operations = self.differ.diff(&model.resources(), &observed, &drifted);
        let mut plan = ReconciliationPlan::new(topology_id, operations, violations)?;
        plan.transition(PlanStatus::Validating)?;
        plan.transition(PlanStatus::Validated)?;
        log::info!(
            "Plan for '{}' validated: {} operation(s) against observed state version {}",
            plan.topology_id,
            plan.len(),
            observed.version
        );
        Ok(plan)
    }

    /// Plan and execute under the topology's executing lease.
    ///
    /// Every terminal state yields a report; only malformed documents, a held
    /// lease and provider listing failures are errors.
    pub async fn apply(
        &self,
        doc: TopologyDocument,
        cancel: &CancellationHandle,
    ) -> Result<ReconciliationReport, ReconcileError> {
        let model = TopologyModel::build(doc)?;
        let _lease = self
            .leases
            .acquire(model.topology_id(), self.config().lease_mode)
            .await?;

        let mut plan = self.plan_model(&model).await?;
        if plan.status == PlanStatus::Rejected {
            return Ok(ReconciliationReport::new(&plan, vec![], vec![]));
        }
        let topology_id = model.topology_id();
        let drift: Vec<DriftViolation> = self.drift.take_pending(topology_id);

        self.drift.set_in_flight(
            topology_id,
            plan.operations.iter().map(|op| op.entity.clone()),
        );
        let executed = self.executor.execute(&mut plan, cancel).await;
        self.drift.clear_in_flight(topology_id);
        let summary = executed?;

        self.drift.record_outcomes(topology_id, &summary.applied);
        self.drift.set_desired(topology_id, model.resources());

        let report = ReconciliationReport::new(&plan, summary.records, drift);
        let unresolved = report.unresolved();
        if unresolved.is_empty() {
            log::info!("{}", report.to_string().green());
        } else {
            log::warn!("{}", report.to_string().yellow());
            for key in unresolved {
                log::warn!("  unresolved: {key}");
            }
        }
        Ok(report)
    }

    /// Refresh the cache for `doc` and report differences from it.
    pub async fn check_drift(&self, doc: TopologyDocument) -> Result<Vec<DriftViolation>, ReconcileError> {
        let model = TopologyModel::build(doc)?;
        let topology_id = model.topology_id();
        self.drift.set_desired(topology_id, model.resources());
        self.drift.refresh(topology_id).await?;
        Ok(self.drift.detect(topology_id))
    }
}
