//! Reconcilable resources as a single tagged sum type.
//!
//! Validator and differ rules dispatch on [`ResourceKind`]; every entity is
//! addressed by a [`ResourceKey`] and relationships are plain ids.

use super::{Cidr, DnsResolver, Peering, PrivateDnsZone, SegmentRole, VpnGateway};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    Segment,
    Subnet,
    Peering,
    DnsZone,
    DnsResolver,
    VpnGateway,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        ResourceKind::Segment,
        ResourceKind::Subnet,
        ResourceKind::Peering,
        ResourceKind::DnsZone,
        ResourceKind::DnsResolver,
        ResourceKind::VpnGateway,
    ];

    /// Gateway create/delete runs for tens of minutes and gets its own timeout.
    pub fn is_long_running(&self) -> bool {
        matches!(self, ResourceKind::VpnGateway)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Segment => "segment",
            ResourceKind::Subnet => "subnet",
            ResourceKind::Peering => "peering",
            ResourceKind::DnsZone => "dnsZone",
            ResourceKind::DnsResolver => "dnsResolver",
            ResourceKind::VpnGateway => "vpnGateway",
        };
        write!(f, "{name}")
    }
}

/// Stable identity of an entity: kind plus id.
///
/// Subnet ids are `"{segment}/{name}"`, zone ids are the zone name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub id: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        ResourceKey {
            kind,
            id: id.into(),
        }
    }

    pub fn segment(id: &str) -> Self {
        Self::new(ResourceKind::Segment, id)
    }

    pub fn subnet(segment: &str, name: &str) -> Self {
        Self::new(ResourceKind::Subnet, format!("{segment}/{name}"))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Segment attributes the provider manages; subnets are separate entities.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSpec {
    pub id: String,
    pub name: String,
    pub role: SegmentRole,
    pub address_space: Cidr,
    #[serde(default)]
    pub dns_servers: Vec<Ipv4Addr>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    pub segment: String,
    pub name: String,
    pub prefix: Cidr,
    #[serde(default)]
    pub delegation: Option<String>,
    #[serde(default)]
    pub nsg_ref: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Resource {
    Segment(SegmentSpec),
    Subnet(SubnetSpec),
    Peering(Peering),
    DnsZone(PrivateDnsZone),
    DnsResolver(DnsResolver),
    VpnGateway(VpnGateway),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Segment(_) => ResourceKind::Segment,
            Resource::Subnet(_) => ResourceKind::Subnet,
            Resource::Peering(_) => ResourceKind::Peering,
            Resource::DnsZone(_) => ResourceKind::DnsZone,
            Resource::DnsResolver(_) => ResourceKind::DnsResolver,
            Resource::VpnGateway(_) => ResourceKind::VpnGateway,
        }
    }

    pub fn key(&self) -> ResourceKey {
        match self {
            Resource::Segment(s) => ResourceKey::segment(&s.id),
            Resource::Subnet(s) => ResourceKey::subnet(&s.segment, &s.name),
            Resource::Peering(p) => ResourceKey::new(ResourceKind::Peering, &p.id),
            Resource::DnsZone(z) => ResourceKey::new(ResourceKind::DnsZone, &z.name),
            Resource::DnsResolver(r) => ResourceKey::new(ResourceKind::DnsResolver, &r.id),
            Resource::VpnGateway(g) => ResourceKey::new(ResourceKind::VpnGateway, &g.id),
        }
    }

    /// Segment ids this resource cannot exist without.
    pub fn segment_refs(&self) -> Vec<&str> {
        match self {
            Resource::Segment(_) => vec![],
            Resource::Subnet(s) => vec![&s.segment],
            Resource::Peering(p) => vec![&p.local_segment, &p.remote_segment],
            Resource::DnsZone(z) => z.linked_segments.iter().map(String::as_str).collect(),
            Resource::DnsResolver(r) => vec![&r.segment],
            Resource::VpnGateway(g) => vec![&g.segment],
        }
    }

    /// Subnet key a resolver or gateway is placed in.
    pub fn subnet_ref(&self) -> Option<ResourceKey> {
        match self {
            Resource::DnsResolver(r) => Some(ResourceKey::subnet(&r.segment, &r.subnet)),
            Resource::VpnGateway(g) => Some(ResourceKey::subnet(&g.segment, &g.subnet)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_key_display_and_order() {
        let seg = ResourceKey::segment("hub");
        let snet = ResourceKey::subnet("hub", "GatewaySubnet");
        assert_eq!(seg.to_string(), "segment:hub");
        assert_eq!(snet.to_string(), "subnet:hub/GatewaySubnet");
        assert!(seg < snet, "segments sort before subnets");
    }

    #[test]
    fn test_resource_serde_is_tagged() {
        let json = r#"{"kind":"dnsResolver","id":"dnspr-hub","segment":"hub","subnet":"snet-dns-in","inboundEndpointIp":"10.0.1.4"}"#;
        let resource: Resource = serde_json::from_str(json).expect("tagged resource");
        assert_eq!(resource.kind(), ResourceKind::DnsResolver);
        assert_eq!(
            resource.subnet_ref(),
            Some(ResourceKey::subnet("hub", "snet-dns-in"))
        );
        let back = serde_json::to_value(&resource).unwrap();
        assert_eq!(back["kind"], "dnsResolver");
    }
}
