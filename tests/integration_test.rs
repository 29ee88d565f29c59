//! Integration tests for hub-spoke-reconciler
//!
//! These tests run whole reconciliation cycles against the in-memory provider.

use hub_spoke_reconciler::error::PermanentReason;
use hub_spoke_reconciler::models::{PeeringState, Resource, ResourceKey, ResourceKind};
use hub_spoke_reconciler::plan::{OperationKind, Outcome, PlanStatus};
use hub_spoke_reconciler::provider::{CloudResourceProvider, Fault, InMemoryProvider, ProviderEventKind};
use hub_spoke_reconciler::validate::{has_errors, Rule, Severity};
use hub_spoke_reconciler::{CancellationHandle, Reconciler, ReconcilerConfig, TopologyDocument};
use std::sync::Arc;
use std::time::Duration;

fn doc(name: &str) -> TopologyDocument {
    TopologyDocument::load(format!("tests/data/{name}.json")).expect("Error reading topology fixture")
}

fn setup() -> (Arc<InMemoryProvider>, Reconciler) {
    let provider = Arc::new(InMemoryProvider::new());
    let config = ReconcilerConfig {
        poll_interval: Duration::from_millis(50),
        ..ReconcilerConfig::default()
    };
    let reconciler = Reconciler::new(provider.clone(), config);
    (provider, reconciler)
}

#[tokio::test(start_paused = true)]
async fn test_converged_topology_yields_no_operations() {
    let (_, reconciler) = setup();
    let first = reconciler
        .apply(doc("topology_lab"), &CancellationHandle::new())
        .await
        .unwrap();
    assert_eq!(first.status, PlanStatus::Completed, "{first}");
    assert!(first.count(Outcome::Succeeded) >= 10);

    let plan = reconciler.plan(doc("topology_lab")).await.unwrap();
    assert_eq!(plan.status, PlanStatus::Validated);
    assert!(plan.is_empty(), "unexpected operations: {:?}", plan.operations);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_segments_are_rejected() {
    let (provider, reconciler) = setup();
    let report = reconciler
        .apply(doc("topology_overlap"), &CancellationHandle::new())
        .await
        .unwrap();
    assert_eq!(report.status, PlanStatus::Rejected);
    assert!(report.operations.is_empty());
    let overlap = report
        .violations
        .iter()
        .find(|v| v.rule == Rule::Cidr && v.severity == Severity::Error)
        .expect("no CIDR violation");
    assert!(overlap.names(&ResourceKey::segment("spoke-lab")));
    assert!(overlap.names(&ResourceKey::segment("spoke-demo")));
    assert!(provider.events().is_empty(), "rejected plans never reach the provider");
}

#[tokio::test(start_paused = true)]
async fn test_asymmetric_transit_is_rejected() {
    let (_, reconciler) = setup();
    let plan = reconciler.plan(doc("topology_asymmetric")).await.unwrap();
    assert_eq!(plan.status, PlanStatus::Rejected);
    let asymmetric: Vec<_> = plan
        .warnings
        .iter()
        .filter(|v| v.rule == Rule::PeeringSymmetry && v.severity == Severity::Error)
        .collect();
    assert_eq!(asymmetric.len(), 1, "{asymmetric:?}");
    assert!(asymmetric[0]
        .message
        .contains("'hub-to-lab' allows gateway transit but reverse peering 'lab-to-hub' has useRemoteGateways=false"));
}

#[tokio::test(start_paused = true)]
async fn test_zone_without_hub_link_is_flagged() {
    let (_, reconciler) = setup();
    let violations = reconciler.validate(doc("topology_dns_gap")).await.unwrap();
    assert!(has_errors(&violations));
    let dns: Vec<_> = violations
        .iter()
        .filter(|v| v.rule == Rule::DnsCompleteness)
        .collect();
    assert_eq!(dns.len(), 1, "{dns:?}");
    assert!(dns[0].message.contains("zone 'contoso.internal' is missing a link to hub 'hub'"));
    assert!(dns[0].names(&ResourceKey::segment("hub")));
}

#[tokio::test(start_paused = true)]
async fn test_gateway_auth_change_deletes_before_create() {
    let (provider, reconciler) = setup();
    reconciler
        .apply(doc("topology_lab"), &CancellationHandle::new())
        .await
        .unwrap();
    let applied_before = provider.events().len();

    let plan = reconciler.plan(doc("topology_lab_cert")).await.unwrap();
    assert_eq!(plan.status, PlanStatus::Validated);
    assert!(plan
        .warnings
        .iter()
        .any(|v| v.rule == Rule::VpnAuthentication && v.message.contains("destructive")));
    let gateway = ResourceKey::new(ResourceKind::VpnGateway, "vpngw-hub");
    let ops: Vec<_> = plan.operations_on(&gateway).collect();
    assert_eq!(ops.len(), 2);
    assert_eq!(ops[0].kind, OperationKind::Delete);
    assert_eq!(ops[1].kind, OperationKind::Create);
    assert!(ops[1].depends_on.contains(&ops[0].id));

    let report = reconciler
        .apply(doc("topology_lab_cert"), &CancellationHandle::new())
        .await
        .unwrap();
    assert_eq!(report.status, PlanStatus::Completed, "{report}");

    let events = provider.events();
    let events = &events[applied_before..];
    let deleted = events
        .iter()
        .position(|e| e.key == gateway && e.delete && e.kind == ProviderEventKind::Completed)
        .expect("gateway delete never completed");
    let created = events
        .iter()
        .position(|e| e.key == gateway && !e.delete && e.kind == ProviderEventKind::Submitted)
        .expect("gateway create never submitted");
    assert!(deleted < created, "create submitted before the delete completed");

    let plan = reconciler.plan(doc("topology_lab_cert")).await.unwrap();
    assert!(plan.is_empty(), "unexpected operations: {:?}", plan.operations);
}

#[tokio::test(start_paused = true)]
async fn test_partial_failure_resumes_with_failed_branch_only() {
    let (provider, reconciler) = setup();
    let plan = reconciler.plan(doc("topology_chain")).await.unwrap();
    assert_eq!(plan.len(), 5);
    let failing = ResourceKey::segment("spoke-b");
    assert_eq!(plan.operations_on(&failing).next().unwrap().id, 3);

    provider.inject(failing.clone(), Fault::Permanent(PermanentReason::QuotaExceeded));
    let report = reconciler
        .apply(doc("topology_chain"), &CancellationHandle::new())
        .await
        .unwrap();
    assert_eq!(report.status, PlanStatus::CompletedPartial);
    assert_eq!(report.operations[0].outcome, Outcome::Succeeded);
    assert_eq!(report.operations[1].outcome, Outcome::Succeeded);
    assert_eq!(report.operations[2].outcome, Outcome::Failed);
    assert_eq!(report.operations[2].attempts, 1);
    assert_eq!(report.count(Outcome::Skipped), 1);
    let skipped = report
        .operations
        .iter()
        .find(|r| r.outcome == Outcome::Skipped)
        .unwrap();
    assert_eq!(skipped.entity, ResourceKey::subnet("spoke-b", "snet-apps"));
    assert_eq!(
        report.unresolved(),
        vec![&failing, &ResourceKey::subnet("spoke-b", "snet-apps")]
    );

    provider.clear_faults();
    let plan = reconciler.plan(doc("topology_chain")).await.unwrap();
    let entities: Vec<&ResourceKey> = plan.operations.iter().map(|op| &op.entity).collect();
    assert_eq!(
        entities,
        vec![&failing, &ResourceKey::subnet("spoke-b", "snet-apps")]
    );

    let report = reconciler
        .apply(doc("topology_chain"), &CancellationHandle::new())
        .await
        .unwrap();
    assert_eq!(report.status, PlanStatus::Completed);
    assert!(reconciler.plan(doc("topology_chain")).await.unwrap().is_empty());
}

fn peering_state(provider: &InMemoryProvider, id: &str) -> Option<PeeringState> {
    match provider.resource(&ResourceKey::new(ResourceKind::Peering, id)) {
        Some(Resource::Peering(p)) => Some(p.state),
        _ => None,
    }
}

#[tokio::test(start_paused = true)]
async fn test_broken_peering_pair_converges() {
    let (provider, reconciler) = setup();
    reconciler
        .apply(doc("topology_lab"), &CancellationHandle::new())
        .await
        .unwrap();
    assert_eq!(peering_state(&provider, "hub-to-lab"), Some(PeeringState::Connected));

    // one side deleted out of band leaves the other Disconnected
    provider
        .delete(&ResourceKey::new(ResourceKind::Peering, "lab-to-hub"))
        .await
        .unwrap();
    assert_eq!(peering_state(&provider, "hub-to-lab"), Some(PeeringState::Disconnected));

    let report = reconciler
        .apply(doc("topology_lab"), &CancellationHandle::new())
        .await
        .unwrap();
    assert_eq!(report.status, PlanStatus::Completed, "{report}");
    assert_eq!(peering_state(&provider, "hub-to-lab"), Some(PeeringState::Connected));
    assert_eq!(peering_state(&provider, "lab-to-hub"), Some(PeeringState::Connected));
    let plan = reconciler.plan(doc("topology_lab")).await.unwrap();
    assert!(plan.is_empty(), "unexpected operations: {:?}", plan.operations);

    // both sides present, one Disconnected: the pair is rebuilt together
    provider.disconnect_peering("lab-to-hub");
    let plan = reconciler.plan(doc("topology_lab")).await.unwrap();
    assert_eq!(plan.len(), 4, "{:?}", plan.operations);
    let report = reconciler
        .apply(doc("topology_lab"), &CancellationHandle::new())
        .await
        .unwrap();
    assert_eq!(report.status, PlanStatus::Completed, "{report}");
    assert_eq!(peering_state(&provider, "hub-to-lab"), Some(PeeringState::Connected));
    assert_eq!(peering_state(&provider, "lab-to-hub"), Some(PeeringState::Connected));
    let plan = reconciler.plan(doc("topology_lab")).await.unwrap();
    assert!(plan.is_empty(), "unexpected operations: {:?}", plan.operations);
}
