//! Plan executor.
//!
//! Runs ready operations on a bounded pool of tokio tasks. An operation is
//! ready once every prerequisite succeeded; when one fails, everything that
//! transitively depends on it is skipped while independent branches carry on.

mod lease;
mod retry;

pub use lease::{LeaseMode, LeaseRegistry, PlanLease};
pub use retry::{jitter_rng, RetryPolicy};

use crate::config::ReconcilerConfig;
use crate::error::{DependencyBlockedError, OperationError, PermanentReason, ProviderError, ReconcileError};
use crate::models::Resource;
use crate::plan::{
    AppliedChange, Operation, OperationId, OperationKind, OperationRecord, Outcome, PlanStatus,
    ReconciliationPlan,
};
use crate::provider::{CloudResourceProvider, OperationHandle, PollStatus};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Stops a running plan from scheduling further operations.
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancellationHandle {
    fn default() -> Self {
        let (tx, _) = watch::channel(false);
        CancellationHandle { tx: Arc::new(tx) }
    }
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        log::warn!("Cancellation requested");
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    /// One record per plan operation, in plan order.
    pub records: Vec<OperationRecord>,
    /// Provider results of succeeded operations, in completion order.
    pub applied: Vec<AppliedChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

struct TaskOutcome {
    id: OperationId,
    result: Result<Option<Resource>, OperationError>,
    attempts: u32,
    elapsed: Duration,
}

#[derive(Debug, Clone)]
struct OperationSettings {
    /// Topology recorded as the owner of created resources.
    owner: String,
    retry: RetryPolicy,
    poll_interval: Duration,
    timeout: Duration,
}

pub struct Executor {
    provider: Arc<dyn CloudResourceProvider>,
    config: ReconcilerConfig,
}

impl Executor {
    pub fn new(provider: Arc<dyn CloudResourceProvider>, config: ReconcilerConfig) -> Self {
        Executor { provider, config }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run a validated plan to a terminal status.
    pub async fn execute(
        &self,
        plan: &mut ReconciliationPlan,
        cancel: &CancellationHandle,
    ) -> Result<ExecutionSummary, ReconcileError> {
        plan.transition(PlanStatus::Executing)?;
        log::info!(
            "Executing plan '{}': {} operation(s), worker limit {}",
            plan.topology_id,
            plan.len(),
            self.config.worker_limit
        );

        let mut state: HashMap<OperationId, OpState> = plan
            .operations
            .iter()
            .map(|op| (op.id, OpState::Pending))
            .collect();
        let mut records: BTreeMap<OperationId, OperationRecord> = BTreeMap::new();
        let mut applied = Vec::new();
        let mut workers: JoinSet<TaskOutcome> = JoinSet::new();
        let mut cancel_rx = cancel.subscribe();
        let mut cancelled = cancel.is_cancelled();
        let mut watching = true;

        loop {
            skip_blocked(plan, &mut state, &mut records);

            if !cancelled {
                for op in &plan.operations {
                    if workers.len() >= self.config.worker_limit {
                        break;
                    }
                    let ready = state[&op.id] == OpState::Pending
                        && op
                            .depends_on
                            .iter()
                            .all(|d| state.get(d) == Some(&OpState::Succeeded));
                    if !ready {
                        continue;
                    }
                    state.insert(op.id, OpState::Running);
                    log::debug!("Starting {op}");
                    workers.spawn(run_operation(
                        self.provider.clone(),
                        op.clone(),
                        OperationSettings {
                            owner: plan.topology_id.clone(),
                            retry: self.config.retry.clone(),
                            poll_interval: self.config.poll_interval,
                            timeout: self.config.timeout_for(op.entity.kind),
                        },
                    ));
                }
            }

            if workers.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                changed = cancel_rx.changed(), if watching && !cancelled => {
                    match changed {
                        Ok(()) if *cancel_rx.borrow() => {
                            cancelled = true;
                            log::warn!(
                                "Plan '{}' cancelled; waiting for {} in-flight operation(s)",
                                plan.topology_id,
                                workers.len()
                            );
                        }
                        Ok(()) => {}
                        Err(_) => watching = false,
                    }
                }
                joined = workers.join_next() => {
                    match joined {
                        Some(Ok(outcome)) => {
                            let Some(op) = plan.operation(outcome.id) else {
                                continue;
                            };
                            let (op_state, record) = finish(op, outcome, &mut applied);
                            state.insert(op.id, op_state);
                            records.insert(op.id, record);
                        }
                        Some(Err(e)) => log::error!("Worker task ended abnormally: {e}"),
                        None => {}
                    }
                }
            }
        }

        for op in &plan.operations {
            match state[&op.id] {
                OpState::Pending => {
                    let error = if cancelled {
                        OperationError::Cancelled
                    } else {
                        OperationError::PollFailed("never became ready".to_string())
                    };
                    records.insert(op.id, OperationRecord::new(op, Outcome::Skipped, 0).with_error(error));
                }
                OpState::Running => {
                    records.insert(
                        op.id,
                        OperationRecord::new(op, Outcome::Failed, 0).with_error("worker task aborted"),
                    );
                }
                _ => {}
            }
        }

        let records: Vec<OperationRecord> = records.into_values().collect();
        let status = final_status(&records);
        plan.transition(status)?;
        log::info!(
            "Plan '{}' finished {status}: {} succeeded, {} failed, {} skipped",
            plan.topology_id,
            records.iter().filter(|r| r.outcome == Outcome::Succeeded).count(),
            records.iter().filter(|r| r.outcome == Outcome::Failed).count(),
            records.iter().filter(|r| r.outcome == Outcome::Skipped).count()
        );
        Ok(ExecutionSummary { records, applied })
    }
}

/// `Completed` when everything succeeded, `Failed` when nothing did,
/// otherwise `CompletedPartial`.
fn final_status(records: &[OperationRecord]) -> PlanStatus {
    let succeeded = records
        .iter()
        .filter(|r| r.outcome == Outcome::Succeeded)
        .count();
    if succeeded == records.len() {
        PlanStatus::Completed
    } else if succeeded == 0 {
        PlanStatus::Failed
    } else {
        PlanStatus::CompletedPartial
    }
}

/// Skip pending operations whose prerequisites failed or were skipped.
/// Plan order is topological, so one pass reaches every transitive dependent.
fn skip_blocked(
    plan: &ReconciliationPlan,
    state: &mut HashMap<OperationId, OpState>,
    records: &mut BTreeMap<OperationId, OperationRecord>,
) {
    for op in &plan.operations {
        if state[&op.id] != OpState::Pending {
            continue;
        }
        let blocker = op.depends_on.iter().copied().find(|d| {
            matches!(state.get(d), Some(OpState::Failed) | Some(OpState::Skipped))
        });
        if let Some(prerequisite) = blocker {
            let error = OperationError::from(DependencyBlockedError { prerequisite });
            log::info!("Skipping {op}: {error}");
            state.insert(op.id, OpState::Skipped);
            records.insert(op.id, OperationRecord::new(op, Outcome::Skipped, 0).with_error(error));
        }
    }
}

fn finish(op: &Operation, outcome: TaskOutcome, applied: &mut Vec<AppliedChange>) -> (OpState, OperationRecord) {
    let elapsed_ms = outcome.elapsed.as_millis() as u64;
    match outcome.result {
        Ok(resource) => {
            log::info!("{op} succeeded after {} attempt(s) in {elapsed_ms}ms", outcome.attempts);
            applied.push(AppliedChange {
                entity: op.entity.clone(),
                resource,
            });
            let mut record = OperationRecord::new(op, Outcome::Succeeded, outcome.attempts);
            record.elapsed_ms = elapsed_ms;
            (OpState::Succeeded, record)
        }
        Err(e) => {
            log::error!("{op} failed after {} attempt(s): {e}", outcome.attempts);
            let mut record = OperationRecord::new(op, Outcome::Failed, outcome.attempts).with_error(&e);
            record.elapsed_ms = elapsed_ms;
            (OpState::Failed, record)
        }
    }
}

async fn run_operation(
    provider: Arc<dyn CloudResourceProvider>,
    op: Operation,
    settings: OperationSettings,
) -> TaskOutcome {
    let started = Instant::now();
    let mut rng = jitter_rng(u64::from(op.id));
    let mut attempts = 0;
    // The deadline covers every attempt and the backoff between them.
    let attempt_loop = async {
        loop {
            attempts += 1;
            let attempt = apply_once(
                provider.as_ref(),
                &op,
                settings.owner.as_str(),
                settings.poll_interval,
            );
            match attempt.await {
                Err(e) if e.is_retryable() && settings.retry.should_retry(attempts) => {
                    let delay = settings.retry.delay(attempts, &mut rng);
                    log::warn!(
                        "{op}: attempt {attempts}/{} failed: {e}; retrying in {delay:?}",
                        settings.retry.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                other => break other,
            }
        }
    };
    let result = match tokio::time::timeout(settings.timeout, attempt_loop).await {
        Ok(result) => result,
        Err(_) => Err(OperationError::Timeout(settings.timeout.as_secs())),
    };
    TaskOutcome {
        id: op.id,
        result,
        attempts,
        elapsed: started.elapsed(),
    }
}

/// One submission plus polling; returns the resource as the provider now reports it.
async fn apply_once(
    provider: &dyn CloudResourceProvider,
    op: &Operation,
    owner: &str,
    poll_interval: Duration,
) -> Result<Option<Resource>, OperationError> {
    match op.kind {
        OperationKind::Delete => {
            match provider.delete(&op.entity).await {
                Ok(Some(handle)) => wait_for(provider, &handle, poll_interval).await?,
                Ok(None) => {}
                Err(ProviderError::NotFound(_)) => {
                    log::info!("{op}: already absent");
                }
                Err(e) => return Err(e.into()),
            }
            Ok(None)
        }
        OperationKind::Create | OperationKind::Update => {
            let payload = op.payload.as_ref().ok_or_else(|| ProviderError::Permanent {
                reason: PermanentReason::BadRequest,
                message: format!("{op} has no payload"),
            })?;
            let submission = provider.create_or_update(owner, payload).await?;
            if let Some(handle) = &submission.handle {
                wait_for(provider, handle, poll_interval).await?;
            }
            let observed = provider.get(&op.entity).await?;
            Ok(Some(observed.unwrap_or(submission.observed)))
        }
    }
}

async fn wait_for(
    provider: &dyn CloudResourceProvider,
    handle: &OperationHandle,
    poll_interval: Duration,
) -> Result<(), OperationError> {
    loop {
        match provider.poll_operation(handle).await? {
            PollStatus::Running => {
                log::trace!("Operation {handle} still running");
                tokio::time::sleep(poll_interval).await;
            }
            PollStatus::Succeeded => return Ok(()),
            PollStatus::Failed(reason) => return Err(OperationError::PollFailed(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cidr, ObservedState, ResourceKey, SegmentRole, SegmentSpec, SubnetSpec};
    use crate::provider::{Fault, InMemoryProvider};

    fn segment(id: &str, cidr: &str) -> Resource {
        Resource::Segment(SegmentSpec {
            id: id.to_string(),
            name: format!("vnet-{id}"),
            role: SegmentRole::Spoke,
            address_space: Cidr::new(cidr).unwrap(),
            dns_servers: vec![],
        })
    }

    fn subnet(segment: &str, name: &str, cidr: &str) -> Resource {
        Resource::Subnet(SubnetSpec {
            segment: segment.to_string(),
            name: name.to_string(),
            prefix: Cidr::new(cidr).unwrap(),
            delegation: None,
            nsg_ref: None,
        })
    }

    fn config(worker_limit: usize) -> ReconcilerConfig {
        ReconcilerConfig {
            worker_limit,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
            },
            poll_interval: Duration::from_secs(1),
            ..ReconcilerConfig::default()
        }
    }

    /// lab segment -> two subnets, plus an unrelated demo segment -> one subnet.
    fn plan() -> ReconciliationPlan {
        let mut ops = vec![
            Operation::create(1, segment("lab", "10.1.0.0/16")),
            Operation::create(2, subnet("lab", "snet-a", "10.1.0.0/24")),
            Operation::create(3, subnet("lab", "snet-b", "10.1.1.0/24")),
            Operation::create(4, segment("demo", "10.2.0.0/16")),
            Operation::create(5, subnet("demo", "snet-a", "10.2.0.0/24")),
        ];
        ops[1].depends_on.insert(1);
        ops[2].depends_on.insert(1);
        ops[4].depends_on.insert(4);
        let mut plan = ReconciliationPlan::new("lab", ops, vec![]).unwrap();
        plan.transition(PlanStatus::Validating).unwrap();
        plan.transition(PlanStatus::Validated).unwrap();
        plan
    }

    fn outcome_of<'a>(summary: &'a ExecutionSummary, plan: &ReconciliationPlan, key: &ResourceKey) -> &'a OperationRecord {
        let id = plan.operations_on(key).next().unwrap().id;
        summary.records.iter().find(|r| r.id == id).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_operations_succeed() {
        let provider = Arc::new(InMemoryProvider::new());
        let executor = Executor::new(provider.clone(), config(4));
        let mut plan = plan();
        let summary = executor.execute(&mut plan, &CancellationHandle::new()).await.unwrap();
        assert_eq!(plan.status, PlanStatus::Completed);
        assert_eq!(summary.records.len(), 5);
        assert_eq!(summary.applied.len(), 5);
        assert!(provider.resource(&ResourceKey::subnet("demo", "snet-a")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_skips_dependents_only() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.inject(ResourceKey::segment("lab"), Fault::Permanent(PermanentReason::QuotaExceeded));
        let executor = Executor::new(provider.clone(), config(4));
        let mut plan = plan();
        let summary = executor.execute(&mut plan, &CancellationHandle::new()).await.unwrap();

        assert_eq!(plan.status, PlanStatus::CompletedPartial);
        let lab = outcome_of(&summary, &plan, &ResourceKey::segment("lab"));
        assert_eq!(lab.outcome, Outcome::Failed);
        assert_eq!(lab.attempts, 1, "permanent errors are not retried");
        let snet = outcome_of(&summary, &plan, &ResourceKey::subnet("lab", "snet-a"));
        assert_eq!(snet.outcome, Outcome::Skipped);
        assert!(snet.error.as_deref().unwrap().contains("blocked by failed prerequisite"));
        let demo = outcome_of(&summary, &plan, &ResourceKey::subnet("demo", "snet-a"));
        assert_eq!(demo.outcome, Outcome::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.inject(ResourceKey::segment("demo"), Fault::Transient(2));
        let executor = Executor::new(provider.clone(), config(4));
        let mut plan = plan();
        let summary = executor.execute(&mut plan, &CancellationHandle::new()).await.unwrap();
        assert_eq!(plan.status, PlanStatus::Completed);
        let demo = outcome_of(&summary, &plan, &ResourceKey::segment("demo"));
        assert_eq!(demo.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.inject(ResourceKey::segment("lab"), Fault::Transient(10));
        provider.inject(ResourceKey::segment("demo"), Fault::Transient(10));
        let executor = Executor::new(provider.clone(), config(4));
        let mut plan = plan();
        let summary = executor.execute(&mut plan, &CancellationHandle::new()).await.unwrap();
        assert_eq!(plan.status, PlanStatus::Failed);
        let lab = outcome_of(&summary, &plan, &ResourceKey::segment("lab"));
        assert_eq!(lab.attempts, 3);
        assert!(summary.applied.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_limit_bounds_concurrency() {
        let provider = Arc::new(InMemoryProvider::new().with_latency(Duration::from_secs(2)));
        let executor = Executor::new(provider.clone(), config(1));
        let mut plan = plan();
        executor.execute(&mut plan, &CancellationHandle::new()).await.unwrap();
        assert_eq!(provider.max_in_flight(), 1);

        let provider = Arc::new(InMemoryProvider::new().with_latency(Duration::from_secs(2)));
        let executor = Executor::new(provider.clone(), config(4));
        let mut plan = self::plan();
        executor.execute(&mut plan, &CancellationHandle::new()).await.unwrap();
        assert!(provider.max_in_flight() > 1);
        assert!(provider.max_in_flight() <= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_poll_timeout() {
        use crate::models::{VpnAuthType, VpnGateway};
        let provider = Arc::new(
            InMemoryProvider::from_state("hub", ObservedState::new(vec![
                segment("hub", "10.0.0.0/16"),
                subnet("hub", "GatewaySubnet", "10.0.0.0/27"),
            ]))
            .with_gateway_polls(100),
        );
        let gateway = Resource::VpnGateway(VpnGateway {
            id: "vpngw-hub".to_string(),
            segment: "hub".to_string(),
            subnet: "GatewaySubnet".to_string(),
            auth_type: VpnAuthType::Certificate,
            client_address_pool: Cidr::new("172.16.0.0/24").unwrap(),
            custom_routes: vec![],
            root_certificates: vec!["P2SRootCert".to_string()],
            aad: None,
        });
        let mut plan = ReconciliationPlan::new("hub", vec![Operation::create(1, gateway)], vec![]).unwrap();
        plan.transition(PlanStatus::Validating).unwrap();
        plan.transition(PlanStatus::Validated).unwrap();
        let config = ReconcilerConfig {
            gateway_timeout: Duration::from_secs(30),
            ..config(2)
        };
        let summary = Executor::new(provider, config)
            .execute(&mut plan, &CancellationHandle::new())
            .await
            .unwrap();
        assert_eq!(plan.status, PlanStatus::Failed);
        assert_eq!(summary.records[0].attempts, 1, "timeouts are not retried");
        assert!(summary.records[0].error.as_deref().unwrap().contains("timed out after 30s"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_retries_and_backoff() {
        let provider = Arc::new(InMemoryProvider::new());
        provider.inject(ResourceKey::segment("lab"), Fault::Transient(100));
        let config = ReconcilerConfig {
            retry: RetryPolicy {
                max_attempts: 50,
                base_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(10),
            },
            standard_timeout: Duration::from_secs(5),
            ..config(4)
        };
        let mut plan = ReconciliationPlan::new(
            "lab",
            vec![Operation::create(1, segment("lab", "10.1.0.0/16"))],
            vec![],
        )
        .unwrap();
        plan.transition(PlanStatus::Validating).unwrap();
        plan.transition(PlanStatus::Validated).unwrap();

        let summary = Executor::new(provider, config)
            .execute(&mut plan, &CancellationHandle::new())
            .await
            .unwrap();
        let record = &summary.records[0];
        assert_eq!(record.outcome, Outcome::Failed);
        assert!(record.error.as_deref().unwrap().contains("timed out after 5s"));
        assert!(record.attempts > 1, "retried before the deadline");
        assert!(record.elapsed_ms <= 5_000, "took {}ms", record.elapsed_ms);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start_skips_everything() {
        let provider = Arc::new(InMemoryProvider::new());
        let executor = Executor::new(provider.clone(), config(4));
        let mut plan = plan();
        let cancel = CancellationHandle::new();
        cancel.cancel();
        let summary = executor.execute(&mut plan, &cancel).await.unwrap();
        assert!(summary.records.iter().all(|r| r.outcome == Outcome::Skipped));
        assert!(summary.records[0].error.as_deref().unwrap().contains("cancelled"));
        assert_eq!(plan.status, PlanStatus::Failed);
        assert!(provider.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_lets_in_flight_finish() {
        let provider = Arc::new(InMemoryProvider::new().with_latency(Duration::from_secs(5)));
        let executor = Executor::new(provider.clone(), config(4));
        let mut plan = plan();
        let cancel = CancellationHandle::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            })
        };
        let summary = executor.execute(&mut plan, &cancel).await.unwrap();
        canceller.await.unwrap();

        // Both segments were in flight and finished; their subnets never started.
        assert_eq!(plan.status, PlanStatus::CompletedPartial);
        let lab = outcome_of(&summary, &plan, &ResourceKey::segment("lab"));
        assert_eq!(lab.outcome, Outcome::Succeeded);
        let snet = outcome_of(&summary, &plan, &ResourceKey::subnet("lab", "snet-a"));
        assert_eq!(snet.outcome, Outcome::Skipped);
        assert_eq!(snet.error.as_deref(), Some("plan cancelled before the operation started"));
    }
}
