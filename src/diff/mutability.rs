//! Which attribute changes the provider can apply in place.

use crate::models::{PeeringState, Resource, ResourceKind};

/// Attributes that force delete + recreate when they change.
pub fn immutable_attributes(kind: ResourceKind) -> &'static [&'static str] {
    match kind {
        ResourceKind::Segment => &["name"],
        ResourceKind::Subnet => &["prefix", "delegation"],
        // `state` only ever differs when the observed peering is Disconnected.
        ResourceKind::Peering => &["localSegment", "remoteSegment", "state"],
        ResourceKind::DnsZone => &[],
        ResourceKind::DnsResolver => &["segment", "subnet", "inboundEndpointIp"],
        ResourceKind::VpnGateway => &["segment", "subnet", "authType"],
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeChanges {
    pub mutable: Vec<&'static str>,
    pub immutable: Vec<&'static str>,
}

impl AttributeChanges {
    fn record(&mut self, kind: ResourceKind, name: &'static str, differs: bool) {
        if !differs {
            return;
        }
        if immutable_attributes(kind).contains(&name) {
            self.immutable.push(name);
        } else {
            self.mutable.push(name);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mutable.is_empty() && self.immutable.is_empty()
    }

    pub fn is_destructive(&self) -> bool {
        !self.immutable.is_empty()
    }

    /// Immutable names first, then mutable ones.
    pub fn names(&self) -> Vec<String> {
        self.immutable
            .iter()
            .chain(self.mutable.iter())
            .map(|s| s.to_string())
            .collect()
    }
}

/// Compare a desired resource with its observed counterpart.
///
/// Observed-only fields (peering state) count only when they make the
/// resource unusable.
pub fn attribute_changes(desired: &Resource, observed: &Resource) -> AttributeChanges {
    let kind = desired.kind();
    let mut c = AttributeChanges::default();
    match (desired, observed) {
        (Resource::Segment(d), Resource::Segment(o)) => {
            c.record(kind, "name", d.name != o.name);
            c.record(kind, "role", d.role != o.role);
            c.record(kind, "addressSpace", d.address_space != o.address_space);
            c.record(kind, "dnsServers", d.dns_servers != o.dns_servers);
        }
        (Resource::Subnet(d), Resource::Subnet(o)) => {
            c.record(kind, "prefix", d.prefix != o.prefix);
            c.record(kind, "delegation", d.delegation != o.delegation);
            c.record(kind, "nsgRef", d.nsg_ref != o.nsg_ref);
        }
        (Resource::Peering(d), Resource::Peering(o)) => {
            c.record(kind, "localSegment", d.local_segment != o.local_segment);
            c.record(kind, "remoteSegment", d.remote_segment != o.remote_segment);
            c.record(kind, "state", o.state == PeeringState::Disconnected);
            c.record(
                kind,
                "allowGatewayTransit",
                d.allow_gateway_transit != o.allow_gateway_transit,
            );
            c.record(
                kind,
                "useRemoteGateways",
                d.use_remote_gateways != o.use_remote_gateways,
            );
        }
        (Resource::DnsZone(d), Resource::DnsZone(o)) => {
            c.record(kind, "records", d.records != o.records);
            c.record(kind, "linkedSegments", d.linked_segments != o.linked_segments);
        }
        (Resource::DnsResolver(d), Resource::DnsResolver(o)) => {
            c.record(kind, "segment", d.segment != o.segment);
            c.record(kind, "subnet", d.subnet != o.subnet);
            c.record(
                kind,
                "inboundEndpointIp",
                d.inbound_endpoint_ip != o.inbound_endpoint_ip,
            );
        }
        (Resource::VpnGateway(d), Resource::VpnGateway(o)) => {
            c.record(kind, "segment", d.segment != o.segment);
            c.record(kind, "subnet", d.subnet != o.subnet);
            c.record(kind, "authType", d.auth_type != o.auth_type);
            c.record(
                kind,
                "clientAddressPool",
                d.client_address_pool != o.client_address_pool,
            );
            c.record(kind, "customRoutes", d.custom_routes != o.custom_routes);
            c.record(
                kind,
                "rootCertificates",
                d.root_certificates != o.root_certificates,
            );
            c.record(kind, "aad", d.aad != o.aad);
        }
        _ => {
            // Same key, different kind: only a corrupted cache gets here.
            log::warn!(
                "Observed {} has kind {}, expected {kind}",
                observed.key(),
                observed.kind()
            );
            c.immutable.push("kind");
        }
    }
    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Peering, VpnAuthType};
    use crate::topology::{TopologyDocument, TopologyModel};

    fn lab_resources() -> Vec<Resource> {
        let doc = TopologyDocument::load("tests/data/topology_lab.json").unwrap();
        TopologyModel::build(doc).unwrap().resources().into_values().collect()
    }

    fn find(kind: ResourceKind) -> Resource {
        lab_resources()
            .into_iter()
            .find(|r| r.kind() == kind)
            .unwrap()
    }

    #[test]
    fn test_identical_resources_have_no_changes() {
        for r in lab_resources() {
            assert!(attribute_changes(&r, &r).is_empty(), "{}", r.key());
        }
    }

    #[test]
    fn test_gateway_auth_type_is_destructive() {
        let desired = find(ResourceKind::VpnGateway);
        let Resource::VpnGateway(mut gw) = desired.clone() else {
            unreachable!()
        };
        gw.auth_type = VpnAuthType::Certificate;
        gw.custom_routes.clear();
        let changes = attribute_changes(&desired, &Resource::VpnGateway(gw));
        assert!(changes.is_destructive());
        assert_eq!(changes.names(), vec!["authType", "customRoutes"]);
    }

    #[test]
    fn test_peering_state_only_matters_when_disconnected() {
        let desired = find(ResourceKind::Peering);
        let Resource::Peering(p) = desired.clone() else {
            unreachable!()
        };
        let connected = Peering {
            state: PeeringState::Connected,
            ..p.clone()
        };
        assert!(attribute_changes(&desired, &Resource::Peering(connected)).is_empty());

        let disconnected = Peering {
            state: PeeringState::Disconnected,
            ..p
        };
        let changes = attribute_changes(&desired, &Resource::Peering(disconnected));
        assert_eq!(changes.immutable, vec!["state"]);
    }

    #[test]
    fn test_zone_changes_are_in_place() {
        assert!(immutable_attributes(ResourceKind::DnsZone).is_empty());
        let desired = find(ResourceKind::DnsZone);
        let Resource::DnsZone(mut zone) = desired.clone() else {
            unreachable!()
        };
        zone.linked_segments.remove("hub");
        let changes = attribute_changes(&desired, &Resource::DnsZone(zone));
        assert!(!changes.is_destructive());
        assert_eq!(changes.mutable, vec!["linkedSegments"]);
    }
}
