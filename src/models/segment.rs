//! Virtual network (segment) and subnet data model.

use super::Cidr;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Delegation target required for the VPN gateway subnet.
pub const DELEGATION_GATEWAY: &str = "GatewaySubnet";

/// Delegation target required for a DNS resolver inbound endpoint subnet.
pub const DELEGATION_DNS_RESOLVER: &str = "Microsoft.Network/dnsResolvers";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SegmentRole {
    Hub,
    Spoke,
}

impl fmt::Display for SegmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentRole::Hub => write!(f, "hub"),
            SegmentRole::Spoke => write!(f, "spoke"),
        }
    }
}

/// A virtual network as declared in the topology document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSegment {
    /// Stable identifier other entities use to reference this segment.
    pub id: String,
    /// Provider-side resource name.
    pub name: String,
    pub role: SegmentRole,
    pub address_space: Cidr,
    /// Custom DNS servers, in resolution order.
    #[serde(default)]
    pub dns_servers: Vec<Ipv4Addr>,
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    /// Resources living in the segment that need private DNS resolution.
    #[serde(default)]
    pub workloads: Vec<Workload>,
}

impl NetworkSegment {
    pub fn subnet(&self, name: &str) -> Option<&Subnet> {
        self.subnets.iter().find(|s| s.name == name)
    }

    pub fn is_hub(&self) -> bool {
        self.role == SegmentRole::Hub
    }
}

/// Subnet inside a [`NetworkSegment`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    pub name: String,
    pub prefix: Cidr,
    /// Service the subnet is delegated to, e.g. [`DELEGATION_GATEWAY`].
    #[serde(default)]
    pub delegation: Option<String>,
    #[serde(default)]
    pub nsg_ref: Option<String>,
}

/// Something deployed into a segment that must resolve private zones, e.g. a
/// Container Apps environment's default domain or a private endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    /// Names of the private DNS zones the workload resolves.
    #[serde(default)]
    pub zones: Vec<String>,
}

impl fmt::Display for NetworkSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' [{}] ({} subnets, {})",
            self.id,
            self.name,
            self.address_space,
            self.subnets.len(),
            self.role
        )
    }
}
