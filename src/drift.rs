//! Drift detection.
//!
//! [`DriftDetector`] owns the observed-state cache. It re-reads the provider
//! on demand or on an interval, compares what it sees with the last declared
//! topology and keeps the differences as pending corrections for the next
//! reconciliation cycle.

use crate::cache;
use crate::diff::{attribute_changes, ResourceMap};
use crate::error::{ProviderError, ReconcileError};
use crate::executor::CancellationHandle;
use crate::models::{ObservedState, ResourceKey, ResourceKind};
use crate::plan::AppliedChange;
use crate::provider::{CloudResourceProvider, ListFilter};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DriftKind {
    /// Declared but gone from the provider.
    Missing,
    /// Present with different attribute values.
    Modified { attributes: Vec<String> },
}

/// Provider state diverged from the declared topology without a plan.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Error)]
#[serde(rename_all = "camelCase")]
#[error("drift on {entity}: {message}")]
pub struct DriftViolation {
    pub entity: ResourceKey,
    pub kind: DriftKind,
    pub message: String,
}

impl DriftViolation {
    pub fn missing(entity: ResourceKey) -> Self {
        let message = format!("{entity} is declared but missing from the provider");
        DriftViolation {
            entity,
            kind: DriftKind::Missing,
            message,
        }
    }

    pub fn modified(entity: ResourceKey, attributes: Vec<String>) -> Self {
        let message = format!("{entity} changed out of band: {}", attributes.join(", "));
        DriftViolation {
            entity,
            kind: DriftKind::Modified { attributes },
            message,
        }
    }
}

#[derive(Debug, Default)]
struct DriftState {
    observed: ObservedState,
    desired: ResourceMap,
    in_flight: BTreeSet<ResourceKey>,
    pending: BTreeMap<ResourceKey, DriftViolation>,
}

/// Observed-state caches, one per topology id.
pub struct DriftDetector {
    provider: Arc<dyn CloudResourceProvider>,
    topologies: Mutex<BTreeMap<String, DriftState>>,
}

impl DriftDetector {
    pub fn new(provider: Arc<dyn CloudResourceProvider>) -> Self {
        DriftDetector {
            provider,
            topologies: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, DriftState>> {
        self.topologies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with<R>(&self, topology_id: &str, f: impl FnOnce(&mut DriftState) -> R) -> R {
        let mut topologies = self.lock();
        f(topologies.entry(topology_id.to_string()).or_default())
    }

    /// Topologies with a cache, in id order.
    pub fn topologies(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Copy of the cached observed state of `topology_id`.
    pub fn observed(&self, topology_id: &str) -> ObservedState {
        self.with(topology_id, |state| state.observed.clone())
    }

    pub fn version(&self, topology_id: &str) -> u64 {
        self.with(topology_id, |state| state.observed.version)
    }

    /// Remember the resources the provider should now hold for `topology_id`.
    pub fn set_desired(&self, topology_id: &str, desired: ResourceMap) {
        self.with(topology_id, |state| state.desired = desired);
    }

    /// Entities touched by the executing plan; `detect` leaves them alone.
    pub fn set_in_flight(&self, topology_id: &str, keys: impl IntoIterator<Item = ResourceKey>) {
        let keys: BTreeSet<ResourceKey> = keys.into_iter().collect();
        self.with(topology_id, |state| state.in_flight = keys);
    }

    pub fn clear_in_flight(&self, topology_id: &str) {
        self.with(topology_id, |state| state.in_flight.clear());
    }

    /// Re-read every declared or cached entity of `topology_id` from the
    /// provider, concurrently, and replace its cache. Returns the new version.
    pub async fn refresh(&self, topology_id: &str) -> Result<u64, ReconcileError> {
        let keys: BTreeSet<ResourceKey> = self.with(topology_id, |state| {
            state
                .desired
                .keys()
                .chain(state.observed.resources.keys())
                .cloned()
                .collect()
        });
        log::debug!("Refreshing {} entities of '{topology_id}' from the provider", keys.len());

        let reads = keys.iter().map(|key| self.provider.get(key));
        let results: Vec<Result<_, ProviderError>> = futures::future::join_all(reads).await;
        let mut resources = Vec::with_capacity(results.len());
        for result in results {
            if let Some(resource) = result? {
                resources.push(resource);
            }
        }

        self.with(topology_id, |state| {
            state.observed.replace(resources);
            log::info!(
                "Observed state of '{topology_id}' refreshed: {} resources, version {}",
                state.observed.len(),
                state.observed.version
            );
            Ok(state.observed.version)
        })
    }

    /// Replace the cache of `topology_id` with a listing of every resource
    /// kind the topology owns, so undeclared leftovers become visible to the
    /// differ. Other topologies' resources are never listed.
    pub async fn inventory(&self, topology_id: &str) -> Result<u64, ReconcileError> {
        let filter = ListFilter::topology(topology_id);
        let lists = ResourceKind::ALL
            .iter()
            .map(|kind| self.provider.list(*kind, &filter));
        let mut resources = Vec::new();
        for listed in futures::future::join_all(lists).await {
            resources.extend(listed?);
        }

        self.with(topology_id, |state| {
            state.observed.replace(resources);
            log::info!(
                "Inventory of '{topology_id}': {} resources, observed state version {}",
                state.observed.len(),
                state.observed.version
            );
            Ok(state.observed.version)
        })
    }

    /// Compare the last desired topology with the cache.
    ///
    /// Findings replace the pending corrections, so drift that resolved itself
    /// is forgotten.
    pub fn detect(&self, topology_id: &str) -> Vec<DriftViolation> {
        self.with(topology_id, |state| {
            let findings: Vec<DriftViolation> = state
                .desired
                .iter()
                .filter(|(key, _)| !state.in_flight.contains(*key))
                .filter_map(|(key, desired)| match state.observed.get(key) {
                    None => Some(DriftViolation::missing(key.clone())),
                    Some(observed) => {
                        let changes = attribute_changes(desired, observed);
                        if changes.is_empty() {
                            None
                        } else {
                            Some(DriftViolation::modified(key.clone(), changes.names()))
                        }
                    }
                })
                .collect();

            for finding in &findings {
                log::warn!("{}", format!("[{topology_id}] {finding}").yellow());
            }
            state.pending = findings
                .iter()
                .map(|f| (f.entity.clone(), f.clone()))
                .collect();
            findings
        })
    }

    /// Fold the results of succeeded operations into the cache.
    pub fn record_outcomes(&self, topology_id: &str, applied: &[AppliedChange]) {
        self.with(topology_id, |state| {
            for change in applied {
                match &change.resource {
                    Some(resource) => state.observed.upsert(resource.clone()),
                    None => {
                        state.observed.remove(&change.entity);
                    }
                }
                state.pending.remove(&change.entity);
            }
            log::debug!(
                "Recorded {} applied change(s) for '{topology_id}'; observed state version {}",
                applied.len(),
                state.observed.version
            );
        });
    }

    /// Pending corrections, in key order, for the next cycle to act on.
    pub fn take_pending(&self, topology_id: &str) -> Vec<DriftViolation> {
        self.with(topology_id, |state| {
            std::mem::take(&mut state.pending).into_values().collect()
        })
    }

    pub fn pending(&self, topology_id: &str) -> Vec<DriftViolation> {
        self.with(topology_id, |state| state.pending.values().cloned().collect())
    }

    /// Refresh and detect every known topology every `interval` until
    /// `shutdown` is cancelled.
    pub async fn run(&self, interval: Duration, shutdown: CancellationHandle) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut stop = shutdown.subscribe();
        log::info!("Drift detection every {interval:?}");
        while !shutdown.is_cancelled() {
            tokio::select! {
                _ = ticker.tick() => {
                    for topology_id in self.topologies() {
                        match self.refresh(&topology_id).await {
                            Ok(_) => {
                                let found = self.detect(&topology_id);
                                log::info!("Drift check of '{topology_id}' found {} finding(s)", found.len());
                            }
                            Err(e) => log::error!("Drift refresh of '{topology_id}' failed: {e}"),
                        }
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        log::info!("Drift detection stopped");
    }

    /// Seed the cache of `topology_id` from a file written by [`DriftDetector::save_cache`].
    pub fn load_cache(&self, topology_id: &str, path: impl AsRef<Path>) -> Result<(), ReconcileError> {
        let observed: ObservedState = cache::read_json_file(path.as_ref())?;
        log::info!(
            "Loaded observed cache {} for '{topology_id}' (version {}, {} resources)",
            path.as_ref().display(),
            observed.version,
            observed.len()
        );
        self.with(topology_id, |state| state.observed = observed);
        Ok(())
    }

    pub fn save_cache(&self, topology_id: &str, path: impl AsRef<Path>) -> Result<(), ReconcileError> {
        let observed = self.observed(topology_id);
        cache::write_json_file(path, &observed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cidr, Resource, SegmentRole, SegmentSpec, SubnetSpec};
    use crate::provider::InMemoryProvider;

    fn segment(id: &str, cidr: &str) -> Resource {
        Resource::Segment(SegmentSpec {
            id: id.to_string(),
            name: format!("vnet-{id}"),
            role: SegmentRole::Spoke,
            address_space: Cidr::new(cidr).unwrap(),
            dns_servers: vec![],
        })
    }

    fn subnet(name: &str, cidr: &str, nsg: Option<&str>) -> Resource {
        Resource::Subnet(SubnetSpec {
            segment: "lab".to_string(),
            name: name.to_string(),
            prefix: Cidr::new(cidr).unwrap(),
            delegation: None,
            nsg_ref: nsg.map(str::to_string),
        })
    }

    fn desired() -> ResourceMap {
        [
            segment("lab", "10.1.0.0/16"),
            subnet("snet-a", "10.1.0.0/24", Some("nsg-a")),
            subnet("snet-b", "10.1.1.0/24", None),
        ]
        .into_iter()
        .map(|r| (r.key(), r))
        .collect()
    }

    fn converged() -> (Arc<InMemoryProvider>, DriftDetector) {
        let provider = Arc::new(InMemoryProvider::from_state("lab", ObservedState::new(
            desired().into_values(),
        )));
        let detector = DriftDetector::new(provider.clone());
        detector.set_desired("lab", desired());
        (provider, detector)
    }

    #[tokio::test]
    async fn test_no_drift_when_converged() {
        let (_, detector) = converged();
        assert_eq!(detector.refresh("lab").await.unwrap(), 1);
        assert!(detector.detect("lab").is_empty());
        assert_eq!(detector.observed("lab").len(), 3);
    }

    #[tokio::test]
    async fn test_missing_and_modified() {
        let (provider, detector) = converged();
        provider.remove_out_of_band(&ResourceKey::subnet("lab", "snet-b"));
        provider.put_out_of_band(subnet("snet-a", "10.1.0.0/24", None));
        detector.refresh("lab").await.unwrap();

        let found = detector.detect("lab");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].entity, ResourceKey::subnet("lab", "snet-a"));
        assert_eq!(
            found[0].kind,
            DriftKind::Modified {
                attributes: vec!["nsgRef".to_string()]
            }
        );
        assert_eq!(found[1].kind, DriftKind::Missing);
        assert!(found[1].to_string().contains("missing from the provider"));
    }

    #[tokio::test]
    async fn test_inventory_sees_undeclared_resources() {
        let (provider, detector) = converged();
        provider
            .create_or_update("lab", &segment("stray", "10.9.0.0/16"))
            .await
            .unwrap();
        detector.refresh("lab").await.unwrap();
        assert!(!detector.observed("lab").contains(&ResourceKey::segment("stray")));
        detector.inventory("lab").await.unwrap();
        assert!(detector.observed("lab").contains(&ResourceKey::segment("stray")));
        assert_eq!(detector.observed("lab").len(), 4);
    }

    #[tokio::test]
    async fn test_inventory_is_scoped_to_topology() {
        let (provider, detector) = converged();
        provider
            .create_or_update("demo", &segment("spoke-demo", "10.5.0.0/16"))
            .await
            .unwrap();
        provider.put_out_of_band(segment("unowned", "10.6.0.0/16"));

        detector.inventory("lab").await.unwrap();
        let lab = detector.observed("lab");
        assert_eq!(lab.len(), 3);
        assert!(!lab.contains(&ResourceKey::segment("spoke-demo")));
        assert!(!lab.contains(&ResourceKey::segment("unowned")));

        detector.inventory("demo").await.unwrap();
        assert_eq!(detector.observed("demo").len(), 1);
        assert_eq!(detector.topologies(), vec!["demo".to_string(), "lab".to_string()]);
        assert!(detector.detect("demo").is_empty(), "nothing declared for demo yet");
        assert_eq!(detector.observed("lab").len(), 3);
    }

    #[tokio::test]
    async fn test_in_flight_entities_are_skipped() {
        let (provider, detector) = converged();
        provider.remove_out_of_band(&ResourceKey::subnet("lab", "snet-b"));
        detector.refresh("lab").await.unwrap();
        detector.set_in_flight("lab", [ResourceKey::subnet("lab", "snet-b")]);
        assert!(detector.detect("lab").is_empty());
        detector.clear_in_flight("lab");
        assert_eq!(detector.detect("lab").len(), 1);
    }

    #[tokio::test]
    async fn test_pending_is_consumed_once() {
        let (provider, detector) = converged();
        provider.remove_out_of_band(&ResourceKey::subnet("lab", "snet-b"));
        detector.refresh("lab").await.unwrap();
        detector.detect("lab");
        assert_eq!(detector.pending("lab").len(), 1);
        assert_eq!(detector.take_pending("lab").len(), 1);
        assert!(detector.take_pending("lab").is_empty());
    }

    #[tokio::test]
    async fn test_record_outcomes_updates_cache_and_clears_pending() {
        let (provider, detector) = converged();
        provider.remove_out_of_band(&ResourceKey::subnet("lab", "snet-b"));
        detector.refresh("lab").await.unwrap();
        detector.detect("lab");
        let before = detector.version("lab");

        detector.record_outcomes("lab", &[
            AppliedChange {
                entity: ResourceKey::subnet("lab", "snet-b"),
                resource: Some(subnet("snet-b", "10.1.1.0/24", None)),
            },
            AppliedChange {
                entity: ResourceKey::subnet("lab", "snet-a"),
                resource: None,
            },
        ]);
        assert!(detector.pending("lab").is_empty());
        assert_eq!(detector.version("lab"), before + 2);
        let observed = detector.observed("lab");
        assert!(observed.contains(&ResourceKey::subnet("lab", "snet-b")));
        assert!(!observed.contains(&ResourceKey::subnet("lab", "snet-a")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_detects_until_shutdown() {
        let (provider, detector) = converged();
        let detector = Arc::new(detector);
        let shutdown = CancellationHandle::new();
        let task = {
            let detector = detector.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { detector.run(Duration::from_secs(60), shutdown).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(detector.pending("lab").is_empty());

        provider.remove_out_of_band(&ResourceKey::subnet("lab", "snet-b"));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(detector.pending("lab").len(), 1);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_cache_round_trip() {
        let (_, detector) = converged();
        detector.record_outcomes(
            "lab",
            &[AppliedChange {
                entity: ResourceKey::segment("lab"),
                resource: Some(segment("lab", "10.1.0.0/16")),
            }],
        );
        let path = std::env::temp_dir().join(format!("hubspoke_drift_{}.json", std::process::id()));
        detector.save_cache("lab", &path).unwrap();

        let (_, other) = converged();
        other.load_cache("lab", &path).unwrap();
        assert_eq!(other.observed("lab"), detector.observed("lab"));
        let _ = std::fs::remove_file(&path);
    }
}
