//! Desired vs observed state differ.
//!
//! Produces one operation per changed entity and wires the dependency edges
//! the provider needs: parents before children on create, children before
//! parents on delete, and gateway transit cleared around a gateway rebuild.
//! A peering pair is always rebuilt as a whole: both directions are deleted
//! before either is created again.

mod mutability;

pub use mutability::{attribute_changes, immutable_attributes, AttributeChanges};

use crate::models::{ObservedState, Peering, Resource, ResourceKey, ResourceKind};
use crate::plan::{Operation, OperationId, OperationKind, OperationReason};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub type ResourceMap = BTreeMap<ResourceKey, Resource>;

#[derive(Debug, Default, Clone, Copy)]
pub struct StateDiffer;

impl StateDiffer {
    pub fn new() -> Self {
        StateDiffer
    }

    /// Operations turning `observed` into `desired`. Entities in `drifted`
    /// are tagged [`OperationReason::DriftCorrection`].
    pub fn diff(
        &self,
        desired: &ResourceMap,
        observed: &ObservedState,
        drifted: &BTreeSet<ResourceKey>,
    ) -> Vec<Operation> {
        let mut builder = PlanBuilder::new(desired, &observed.resources);
        let rebuilt = peering_rebuilds(desired, &observed.resources);

        let keys: BTreeSet<&ResourceKey> =
            desired.keys().chain(observed.resources.keys()).collect();
        for key in keys {
            let ops = match (desired.get(key), observed.get(key)) {
                (Some(d), None) => vec![Operation::create(builder.next_id(), d.clone())],
                (None, Some(_)) => vec![Operation::delete(builder.next_id(), key.clone())],
                (Some(d), Some(o)) if rebuilt.contains(key) => {
                    // Explicit pair so the reverse direction can wait on the delete.
                    let changes = attribute_changes(d, o).names();
                    let mut delete = Operation::delete(builder.next_id(), key.clone());
                    delete.destructive = true;
                    delete.changes = changes.clone();
                    let mut create = Operation::create(builder.next_id(), d.clone());
                    create.destructive = true;
                    create.changes = changes;
                    create.depends_on.insert(delete.id);
                    vec![delete, create]
                }
                (Some(d), Some(o)) => {
                    let changes = attribute_changes(d, o);
                    if changes.is_empty() {
                        continue;
                    }
                    vec![Operation::update(
                        builder.next_id(),
                        d.clone(),
                        changes.names(),
                        changes.is_destructive(),
                    )]
                }
                (None, None) => continue,
            };
            for op in ops {
                let op = if drifted.contains(key) {
                    op.with_reason(OperationReason::DriftCorrection)
                } else {
                    op
                };
                builder.push(op);
            }
        }

        builder.add_create_edges();
        builder.add_delete_edges();
        builder.add_peering_pair_edges();
        builder.add_transit_pins();

        let ops = builder.ops;
        log::info!(
            "Diff: {} operation(s) ({} create, {} update, {} delete, {} destructive)",
            ops.len(),
            count(&ops, OperationKind::Create),
            count(&ops, OperationKind::Update),
            count(&ops, OperationKind::Delete),
            ops.iter().filter(|op| op.destructive).count()
        );
        for op in &ops {
            log::debug!("  {op} changes={:?} depends_on={:?}", op.changes, op.depends_on);
        }
        ops
    }
}

fn count(ops: &[Operation], kind: OperationKind) -> usize {
    ops.iter().filter(|op| op.kind == kind).count()
}

/// Keys `resource` cannot exist without, resolved against `state`.
pub fn references(resource: &Resource, state: &ResourceMap) -> Vec<ResourceKey> {
    match resource {
        Resource::Segment(s) => s
            .dns_servers
            .iter()
            .filter_map(|ip| {
                state.values().find_map(|r| match r {
                    Resource::DnsResolver(dr)
                        if dr.inbound_endpoint_ip == *ip && dr.segment != s.id =>
                    {
                        Some(r.key())
                    }
                    _ => None,
                })
            })
            .collect(),
        Resource::Peering(p) => {
            let mut refs = vec![
                ResourceKey::segment(&p.local_segment),
                ResourceKey::segment(&p.remote_segment),
            ];
            for segment in [&p.local_segment, &p.remote_segment] {
                if p.uses_gateway_of(segment) {
                    refs.extend(gateway_in(state, segment));
                }
            }
            refs
        }
        other => {
            let mut refs: Vec<ResourceKey> = other
                .segment_refs()
                .into_iter()
                .map(ResourceKey::segment)
                .collect();
            refs.extend(other.subnet_ref());
            refs
        }
    }
}

/// Declared peerings that must be deleted and recreated: those whose
/// observed form cannot be repaired in place (a `Disconnected` link or an
/// immutable change), plus the surviving reverse direction of each. Deleting
/// one side disconnects the other, so rebuilding a single side never settles.
fn peering_rebuilds(desired: &ResourceMap, observed: &ResourceMap) -> BTreeSet<ResourceKey> {
    let broken: Vec<&Peering> = desired
        .iter()
        .filter_map(|(key, d)| match (d, observed.get(key)) {
            (Resource::Peering(p), Some(o)) if attribute_changes(d, o).is_destructive() => Some(p),
            _ => None,
        })
        .collect();

    let mut rebuilt = BTreeSet::new();
    for p in broken {
        rebuilt.insert(ResourceKey::new(ResourceKind::Peering, &p.id));
        for reverse in observed.values() {
            let Resource::Peering(r) = reverse else {
                continue;
            };
            if r.is_reverse_of(p) && desired.contains_key(&reverse.key()) {
                rebuilt.insert(reverse.key());
            }
        }
    }
    if !rebuilt.is_empty() {
        log::info!("Rebuilding peering(s) {rebuilt:?}");
    }
    rebuilt
}

fn gateway_in(state: &ResourceMap, segment: &str) -> Option<ResourceKey> {
    state.values().find_map(|r| match r {
        Resource::VpnGateway(g) if g.segment == segment => Some(r.key()),
        _ => None,
    })
}

struct PlanBuilder<'a> {
    desired: &'a ResourceMap,
    observed: &'a ResourceMap,
    ops: Vec<Operation>,
    index: HashMap<ResourceKey, usize>,
    next_id: OperationId,
}

impl<'a> PlanBuilder<'a> {
    fn new(desired: &'a ResourceMap, observed: &'a ResourceMap) -> Self {
        PlanBuilder {
            desired,
            observed,
            ops: Vec::new(),
            index: HashMap::new(),
            next_id: 1,
        }
    }

    fn next_id(&mut self) -> OperationId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn push(&mut self, op: Operation) {
        self.index.entry(op.entity.clone()).or_insert(self.ops.len());
        self.ops.push(op);
    }

    fn op_on(&self, key: &ResourceKey) -> Option<&Operation> {
        self.index.get(key).map(|&i| &self.ops[i])
    }

    /// Creates and updates wait for what their desired form references.
    fn add_create_edges(&mut self) {
        let mut edges: Vec<(usize, OperationId)> = Vec::new();
        for (i, op) in self.ops.iter().enumerate() {
            let Some(payload) = &op.payload else {
                continue;
            };
            for r in references(payload, self.desired) {
                if let Some(dep) = self.op_on(&r) {
                    if dep.kind != OperationKind::Delete {
                        edges.push((i, dep.id));
                    }
                }
            }
            match payload {
                // A new prefix may reuse space a removed sibling still holds.
                Resource::Subnet(s) if op.kind == OperationKind::Create || op.destructive => {
                    for sibling in self.observed.values() {
                        let Resource::Subnet(o) = sibling else {
                            continue;
                        };
                        if o.segment != s.segment || o.name == s.name || !o.prefix.overlaps(&s.prefix) {
                            continue;
                        }
                        if let Some(dep) = self.op_on(&sibling.key()) {
                            if dep.kind == OperationKind::Delete {
                                edges.push((i, dep.id));
                            }
                        }
                    }
                }
                // Shrinking an address space needs the removed subnets gone first.
                Resource::Segment(s) if op.kind == OperationKind::Update => {
                    for sibling in self.observed.values() {
                        if let Resource::Subnet(o) = sibling {
                            if o.segment != s.id {
                                continue;
                            }
                            if let Some(dep) = self.op_on(&sibling.key()) {
                                if dep.kind == OperationKind::Delete {
                                    edges.push((i, dep.id));
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        self.apply(edges);
    }

    /// A delete waits for every operation that drops a reference to the
    /// deleted entity: deletes and rebuilds of its dependents, and updates
    /// whose desired form no longer points at it.
    fn add_delete_edges(&mut self) {
        let mut edges: Vec<(usize, OperationId)> = Vec::new();
        for (i, op) in self.ops.iter().enumerate() {
            if op.kind != OperationKind::Delete {
                continue;
            }
            for dependent in self.observed.values() {
                if !references(dependent, self.observed).contains(&op.entity) {
                    continue;
                }
                let Some(dep) = self.op_on(&dependent.key()) else {
                    continue;
                };
                let drops_reference = dep.kind == OperationKind::Delete
                    || dep.destructive
                    || dep
                        .payload
                        .as_ref()
                        .is_some_and(|p| !references(p, self.desired).contains(&op.entity));
                if drops_reference {
                    edges.push((i, dep.id));
                }
            }
        }
        self.apply(edges);
    }

    /// A peering is only created once every delete of its reverse direction
    /// has run; otherwise that delete disconnects the new link.
    fn add_peering_pair_edges(&mut self) {
        let mut edges: Vec<(usize, OperationId)> = Vec::new();
        for (i, op) in self.ops.iter().enumerate() {
            let Some(Resource::Peering(p)) = &op.payload else {
                continue;
            };
            if op.kind != OperationKind::Create {
                continue;
            }
            for reverse in self.observed.values() {
                match reverse {
                    Resource::Peering(r) if r.is_reverse_of(p) => {}
                    _ => continue,
                }
                if let Some(dep) = self.op_on(&reverse.key()) {
                    if dep.kind == OperationKind::Delete {
                        edges.push((i, dep.id));
                    }
                }
            }
        }
        self.apply(edges);
    }

    /// Around a gateway rebuild, clear transit on every peering using it
    /// (consumer side first), then put the declared peerings back once the
    /// new gateway exists (provider side first).
    fn add_transit_pins(&mut self) {
        let (desired, observed) = (self.desired, self.observed);
        let rebuilds: Vec<usize> = self
            .ops
            .iter()
            .enumerate()
            .filter(|(_, op)| op.entity.kind == ResourceKind::VpnGateway && op.destructive)
            .map(|(i, _)| i)
            .collect();

        for g in rebuilds {
            let gateway_id = self.ops[g].id;
            let Some(Resource::VpnGateway(current)) = observed.get(&self.ops[g].entity) else {
                continue;
            };
            let segment = current.segment.clone();
            let users: Vec<Peering> = observed
                .values()
                .filter_map(|r| match r {
                    Resource::Peering(p) if p.uses_gateway_of(&segment) => Some(p.clone()),
                    _ => None,
                })
                .collect();

            let mut consumer_unpins = Vec::new();
            let mut provider_unpins = Vec::new();
            let mut provider_repins = Vec::new();
            let mut consumer_repins = Vec::new();

            for p in users {
                let key = ResourceKey::new(ResourceKind::Peering, &p.id);
                let existing = self.index.get(&key).copied();
                if let Some(j) = existing {
                    if self.ops[j].kind == OperationKind::Delete {
                        let delete_id = self.ops[j].id;
                        self.ops[g].depends_on.insert(delete_id);
                        continue;
                    }
                }

                let unpin_id = self.next_id();
                let unpin = Operation::update(
                    unpin_id,
                    Resource::Peering(p.without_transit()),
                    transit_flags(&p),
                    false,
                )
                .with_reason(OperationReason::TransitUnpin);
                self.ops[g].depends_on.insert(unpin_id);

                let consumer = p.use_remote_gateways;
                if consumer {
                    consumer_unpins.push(unpin_id);
                } else {
                    provider_unpins.push(unpin_id);
                }

                match existing {
                    Some(j) => {
                        self.ops[j].depends_on.extend([unpin_id, gateway_id]);
                    }
                    None => {
                        if let Some(Resource::Peering(dp)) = desired.get(&key) {
                            let repin_id = self.next_id();
                            let mut repin = Operation::update(
                                repin_id,
                                Resource::Peering(dp.clone()),
                                transit_flags(dp),
                                false,
                            )
                            .with_reason(OperationReason::TransitRepin);
                            repin.depends_on.extend([unpin_id, gateway_id]);
                            if consumer {
                                consumer_repins.push(repin_id);
                            } else {
                                provider_repins.push(repin_id);
                            }
                            self.ops.push(repin);
                        }
                    }
                }
                // Not indexed: the entity's own operation stays the primary one.
                self.ops.push(unpin);
            }

            self.chain(&provider_unpins, &consumer_unpins);
            self.chain(&consumer_repins, &provider_repins);
            log::info!(
                "Gateway {} is rebuilt: {} transit unpin(s), {} repin(s)",
                self.ops[g].entity,
                consumer_unpins.len() + provider_unpins.len(),
                consumer_repins.len() + provider_repins.len()
            );
        }
    }

    /// Every operation in `later` depends on every operation in `earlier`.
    fn chain(&mut self, later: &[OperationId], earlier: &[OperationId]) {
        for op in self.ops.iter_mut().filter(|op| later.contains(&op.id)) {
            op.depends_on.extend(earlier.iter().copied());
        }
    }

    fn apply(&mut self, edges: Vec<(usize, OperationId)>) {
        for (i, dep) in edges {
            if self.ops[i].id != dep {
                self.ops[i].depends_on.insert(dep);
            }
        }
    }
}

fn transit_flags(p: &Peering) -> Vec<String> {
    let mut flags = Vec::new();
    if p.allow_gateway_transit {
        flags.push("allowGatewayTransit".to_string());
    }
    if p.use_remote_gateways {
        flags.push("useRemoteGateways".to_string());
    }
    flags
}
