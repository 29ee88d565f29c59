//! Private DNS zone and DNS resolver data model.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

/// A private DNS zone and the segments it is linked to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrivateDnsZone {
    /// Zone name, e.g. `contoso.internal`; doubles as the entity id.
    pub name: String,
    /// A records: record name -> addresses.
    #[serde(default)]
    pub records: BTreeMap<String, Vec<Ipv4Addr>>,
    /// Segment ids with a virtual network link to this zone.
    #[serde(default)]
    pub linked_segments: BTreeSet<String>,
}

impl PrivateDnsZone {
    pub fn is_linked_to(&self, segment_id: &str) -> bool {
        self.linked_segments.contains(segment_id)
    }
}

/// Shared DNS resolver with an inbound endpoint hosted in a hub segment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DnsResolver {
    pub id: String,
    pub segment: String,
    /// Subnet (by name) delegated to the resolver service.
    pub subnet: String,
    /// Static address spokes use as their first DNS server.
    pub inbound_endpoint_ip: Ipv4Addr,
}
