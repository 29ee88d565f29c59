//! In-memory cloud provider simulator.
//!
//! Enforces the provider-side rules the reconciler has to respect: parents
//! must exist before children, resources in use cannot be deleted, immutable
//! attributes cannot be changed in place, `useRemoteGateways` needs a gateway
//! on the remote side, and sibling subnets cannot overlap. VPN gateway
//! operations are long-running and complete after a number of polls.
//! Every resource is tagged with the topology that created it, and a
//! topology cannot overwrite another topology's resources.

use super::{CloudResourceProvider, ListFilter, OperationHandle, PollStatus, Submission};
use crate::cache;
use crate::diff::{attribute_changes, references, ResourceMap};
use crate::error::{PermanentReason, ProviderError, ReconcileError};
use crate::models::{ObservedState, PeeringState, Resource, ResourceKey, ResourceKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Polls a gateway operation reports `Running` before it completes.
const GATEWAY_POLLS: u32 = 3;

/// Scripted failure for one resource key.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Fail the next `n` submissions with HTTP 503.
    Transient(u32),
    /// Fail every submission.
    Permanent(PermanentReason),
    /// Accept the submission, then report the operation as failed.
    PollFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderEventKind {
    Submitted,
    Completed,
    Failed,
    Rejected,
}

/// Audit trail entry, in the order the provider saw things happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEvent {
    pub kind: ProviderEventKind,
    pub key: ResourceKey,
    pub delete: bool,
}

#[derive(Debug)]
enum PendingAction {
    Apply { resource: Resource, owner: String },
    Delete,
}

/// One resource in a saved snapshot, with the topology that owns it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
struct StoredResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<String>,
    resource: Resource,
}

#[derive(Debug)]
struct PendingOperation {
    key: ResourceKey,
    action: PendingAction,
    polls_left: u32,
    failure: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    resources: ResourceMap,
    /// Owning topology per resource; out-of-band resources have none.
    owners: HashMap<ResourceKey, String>,
    pending: HashMap<String, PendingOperation>,
    faults: HashMap<ResourceKey, Fault>,
    events: Vec<ProviderEvent>,
    next_handle: u64,
    in_flight: usize,
    max_in_flight: usize,
}

#[derive(Debug)]
pub struct InMemoryProvider {
    inner: Mutex<Inner>,
    gateway_polls: u32,
    latency: Duration,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        InMemoryProvider {
            inner: Mutex::new(Inner::default()),
            gateway_polls: GATEWAY_POLLS,
            latency: Duration::ZERO,
        }
    }
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider already holding `state`, every resource owned by `owner`.
    pub fn from_state(owner: &str, state: ObservedState) -> Self {
        let provider = Self::default();
        {
            let mut inner = provider.lock();
            inner.owners = state
                .resources
                .keys()
                .map(|key| (key.clone(), owner.to_string()))
                .collect();
            inner.resources = state.resources;
        }
        provider
    }

    /// Load a snapshot saved by [`InMemoryProvider::save`]; a missing file starts empty.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReconcileError> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("No provider snapshot at {}, starting empty", path.display());
            return Ok(Self::default());
        }
        let stored: Vec<StoredResource> = cache::read_json_file(path)?;
        log::info!(
            "Loaded provider snapshot {} with {} resources",
            path.display(),
            stored.len()
        );
        let provider = Self::default();
        {
            let mut inner = provider.lock();
            for StoredResource { owner, resource } in stored {
                let key = resource.key();
                if let Some(owner) = owner {
                    inner.owners.insert(key.clone(), owner);
                }
                inner.resources.insert(key, resource);
            }
        }
        Ok(provider)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ReconcileError> {
        let stored: Vec<StoredResource> = {
            let inner = self.lock();
            inner
                .resources
                .iter()
                .map(|(key, resource)| StoredResource {
                    owner: inner.owners.get(key).cloned(),
                    resource: resource.clone(),
                })
                .collect()
        };
        cache::write_json_file(path, &stored)
    }

    /// Everything the provider holds, whatever the owner.
    pub fn snapshot(&self) -> ObservedState {
        ObservedState::new(self.lock().resources.values().cloned())
    }

    pub fn owner_of(&self, key: &ResourceKey) -> Option<String> {
        self.lock().owners.get(key).cloned()
    }

    pub fn with_gateway_polls(mut self, polls: u32) -> Self {
        self.gateway_polls = polls;
        self
    }

    /// Delay every submission, so concurrent operations actually overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn inject(&self, key: ResourceKey, fault: Fault) {
        log::debug!("Injecting fault {fault:?} for {key}");
        self.lock().faults.insert(key, fault);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Change a resource behind the reconciler's back. An existing resource
    /// keeps its owner; a new one has none.
    pub fn put_out_of_band(&self, resource: Resource) {
        self.lock().resources.insert(resource.key(), resource);
    }

    pub fn remove_out_of_band(&self, key: &ResourceKey) -> Option<Resource> {
        let mut inner = self.lock();
        inner.owners.remove(key);
        inner.resources.remove(key)
    }

    /// Mark a peering Disconnected, as when its remote side was deleted and recreated.
    pub fn disconnect_peering(&self, id: &str) {
        let key = ResourceKey::new(ResourceKind::Peering, id);
        if let Some(Resource::Peering(p)) = self.lock().resources.get_mut(&key) {
            p.state = PeeringState::Disconnected;
        }
    }

    pub fn resource(&self, key: &ResourceKey) -> Option<Resource> {
        self.lock().resources.get(key).cloned()
    }

    pub fn events(&self) -> Vec<ProviderEvent> {
        self.lock().events.clone()
    }

    /// Highest number of submissions that were being processed at once.
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn enter(&self) {
        {
            let mut inner = self.lock();
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    fn leave(&self) {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
    }

    fn submit_apply(&self, owner: &str, resource: &Resource) -> Result<Submission, ProviderError> {
        let key = resource.key();
        let mut inner = self.lock();
        let checked = inner
            .take_fault(&key)
            .and_then(|failure| inner.check_apply(owner, resource).map(|_| failure));
        let failure = match checked {
            Ok(failure) => failure,
            Err(e) => {
                log::debug!("Provider rejected apply of {key}: {e}");
                inner.record(ProviderEventKind::Rejected, &key, false);
                return Err(e);
            }
        };
        inner.record(ProviderEventKind::Submitted, &key, false);

        if key.kind.is_long_running() || failure.is_some() {
            let handle = inner.start(PendingOperation {
                key,
                action: PendingAction::Apply {
                    resource: resource.clone(),
                    owner: owner.to_string(),
                },
                polls_left: self.gateway_polls,
                failure,
            });
            return Ok(Submission {
                observed: resource.clone(),
                handle: Some(handle),
            });
        }
        let observed = inner.apply(owner, resource.clone());
        inner.record(ProviderEventKind::Completed, &key, false);
        Ok(Submission {
            observed,
            handle: None,
        })
    }

    fn submit_delete(&self, key: &ResourceKey) -> Result<Option<OperationHandle>, ProviderError> {
        let mut inner = self.lock();
        let checked = inner
            .take_fault(key)
            .and_then(|failure| inner.check_delete(key).map(|_| failure));
        let failure = match checked {
            Ok(failure) => failure,
            Err(e) => {
                log::debug!("Provider rejected delete of {key}: {e}");
                inner.record(ProviderEventKind::Rejected, key, true);
                return Err(e);
            }
        };
        inner.record(ProviderEventKind::Submitted, key, true);

        if key.kind.is_long_running() || failure.is_some() {
            let handle = inner.start(PendingOperation {
                key: key.clone(),
                action: PendingAction::Delete,
                polls_left: self.gateway_polls,
                failure,
            });
            return Ok(Some(handle));
        }
        inner.remove(key);
        inner.record(ProviderEventKind::Completed, key, true);
        Ok(None)
    }
}

impl Inner {
    fn record(&mut self, kind: ProviderEventKind, key: &ResourceKey, delete: bool) {
        self.events.push(ProviderEvent {
            kind,
            key: key.clone(),
            delete,
        });
    }

    fn start(&mut self, op: PendingOperation) -> OperationHandle {
        self.next_handle += 1;
        let handle = format!("op-{:04}", self.next_handle);
        log::trace!("Started long-running operation {handle} on {}", op.key);
        self.pending.insert(handle.clone(), op);
        OperationHandle(handle)
    }

    /// `Ok(Some(reason))` when the submission is accepted but will fail on poll.
    fn take_fault(&mut self, key: &ResourceKey) -> Result<Option<String>, ProviderError> {
        match self.faults.get_mut(key) {
            Some(Fault::Transient(n)) if *n > 0 => {
                *n -= 1;
                Err(ProviderError::from_status(
                    503,
                    format!("{key}: service unavailable"),
                ))
            }
            Some(Fault::Permanent(reason)) => Err(ProviderError::Permanent {
                reason: *reason,
                message: format!("{key}: refused"),
            }),
            Some(Fault::PollFailure(reason)) => Ok(Some(reason.clone())),
            _ => Ok(None),
        }
    }

    fn invariant(message: String) -> ProviderError {
        ProviderError::Permanent {
            reason: PermanentReason::InvariantViolated,
            message,
        }
    }

    fn check_apply(&self, owner: &str, resource: &Resource) -> Result<(), ProviderError> {
        let key = resource.key();
        if let Some(current) = self.owners.get(&key) {
            if current != owner {
                return Err(Self::invariant(format!(
                    "{key} is owned by topology '{current}'"
                )));
            }
        }
        if let Some(existing) = self.resources.get(&key) {
            let changes = attribute_changes(resource, existing);
            if changes.is_destructive() {
                return Err(ProviderError::from_status(
                    409,
                    format!(
                        "{key}: cannot change {} in place",
                        changes.immutable.join(", ")
                    ),
                ));
            }
        }

        for segment in resource.segment_refs() {
            if !self.resources.contains_key(&ResourceKey::segment(segment)) {
                return Err(Self::invariant(format!("{key}: segment '{segment}' not found")));
            }
        }
        if let Some(subnet) = resource.subnet_ref() {
            if !self.resources.contains_key(&subnet) {
                return Err(Self::invariant(format!("{key}: {subnet} not found")));
            }
        }

        match resource {
            Resource::Segment(s) => {
                for other in self.resources.values() {
                    if let Resource::Subnet(o) = other {
                        if o.segment == s.id && !s.address_space.contains_net(&o.prefix) {
                            return Err(Self::invariant(format!(
                                "{key}: address space {} would orphan subnet {} {}",
                                s.address_space, o.name, o.prefix
                            )));
                        }
                    }
                }
            }
            Resource::Subnet(s) => {
                if let Some(Resource::Segment(parent)) =
                    self.resources.get(&ResourceKey::segment(&s.segment))
                {
                    if !parent.address_space.contains_net(&s.prefix) {
                        return Err(Self::invariant(format!(
                            "{key}: prefix {} outside {}",
                            s.prefix, parent.address_space
                        )));
                    }
                }
                for other in self.resources.values() {
                    if let Resource::Subnet(o) = other {
                        if o.segment == s.segment && o.name != s.name && o.prefix.overlaps(&s.prefix) {
                            return Err(Self::invariant(format!(
                                "{key}: prefix {} overlaps subnet {} {}",
                                s.prefix, o.name, o.prefix
                            )));
                        }
                    }
                }
            }
            Resource::Peering(p) if p.use_remote_gateways => {
                let has_gateway = self.resources.values().any(
                    |r| matches!(r, Resource::VpnGateway(g) if g.segment == p.remote_segment),
                );
                if !has_gateway {
                    return Err(Self::invariant(format!(
                        "{key}: remote segment '{}' has no gateway",
                        p.remote_segment
                    )));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn check_delete(&self, key: &ResourceKey) -> Result<(), ProviderError> {
        if !self.resources.contains_key(key) {
            return Err(ProviderError::NotFound(key.to_string()));
        }
        let users: Vec<String> = self
            .resources
            .values()
            .filter(|r| references(r, &self.resources).contains(key))
            .map(|r| r.key().to_string())
            .collect();
        if users.is_empty() {
            Ok(())
        } else {
            Err(Self::invariant(format!(
                "{key} is in use by {}",
                users.join(", ")
            )))
        }
    }

    /// Store `resource` for `owner`, deriving peering link state from the
    /// reverse direction.
    fn apply(&mut self, owner: &str, resource: Resource) -> Resource {
        let resource = match resource {
            Resource::Peering(mut p) => {
                let reverse = self.resources.values_mut().find_map(|r| match r {
                    Resource::Peering(other) if other.is_reverse_of(&p) => Some(other),
                    _ => None,
                });
                p.state = match reverse {
                    Some(other) => {
                        if other.state == PeeringState::Initiated {
                            other.state = PeeringState::Connected;
                        }
                        PeeringState::Connected
                    }
                    None => PeeringState::Initiated,
                };
                Resource::Peering(p)
            }
            other => other,
        };
        self.owners.insert(resource.key(), owner.to_string());
        self.resources.insert(resource.key(), resource.clone());
        resource
    }

    fn remove(&mut self, key: &ResourceKey) {
        self.owners.remove(key);
        if let Some(Resource::Peering(p)) = self.resources.remove(key) {
            for r in self.resources.values_mut() {
                if let Resource::Peering(other) = r {
                    if other.is_reverse_of(&p) {
                        other.state = PeeringState::Disconnected;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl CloudResourceProvider for InMemoryProvider {
    async fn create_or_update(
        &self,
        owner: &str,
        resource: &Resource,
    ) -> Result<Submission, ProviderError> {
        self.enter().await;
        let result = self.submit_apply(owner, resource);
        self.leave();
        result
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<Resource>, ProviderError> {
        Ok(self.lock().resources.get(key).cloned())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<Option<OperationHandle>, ProviderError> {
        self.enter().await;
        let result = self.submit_delete(key);
        self.leave();
        result
    }

    async fn list(
        &self,
        kind: ResourceKind,
        filter: &ListFilter,
    ) -> Result<Vec<Resource>, ProviderError> {
        let inner = self.lock();
        Ok(inner
            .resources
            .iter()
            .filter(|(key, r)| {
                key.kind == kind && filter.matches(inner.owners.get(*key).map(String::as_str), r)
            })
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn poll_operation(&self, handle: &OperationHandle) -> Result<PollStatus, ProviderError> {
        let mut inner = self.lock();
        let Some(op) = inner.pending.get_mut(&handle.0) else {
            return Err(ProviderError::NotFound(format!("operation {handle}")));
        };
        if op.polls_left > 0 {
            op.polls_left -= 1;
            return Ok(PollStatus::Running);
        }
        let Some(op) = inner.pending.remove(&handle.0) else {
            return Err(ProviderError::NotFound(format!("operation {handle}")));
        };
        let delete = matches!(op.action, PendingAction::Delete);
        if let Some(reason) = op.failure {
            inner.record(ProviderEventKind::Failed, &op.key, delete);
            return Ok(PollStatus::Failed(reason));
        }
        match op.action {
            PendingAction::Apply { resource, owner } => {
                inner.apply(&owner, resource);
            }
            PendingAction::Delete => inner.remove(&op.key),
        }
        inner.record(ProviderEventKind::Completed, &op.key, delete);
        Ok(PollStatus::Succeeded)
    }
}
