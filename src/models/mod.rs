//! Domain models for the hub-spoke topology.
//!
//! This module contains the core data structures used throughout the crate:
//! - [`Cidr`] - IPv4 block with CIDR notation support
//! - [`NetworkSegment`] and [`Subnet`] - virtual networks as declared
//! - [`Peering`], [`PrivateDnsZone`], [`DnsResolver`], [`VpnGateway`]
//! - [`Resource`] - tagged sum of every reconcilable entity, keyed by [`ResourceKey`]
//! - [`ObservedState`] - versioned snapshot of what the provider reports

mod cidr;
mod dns;
mod gateway;
mod observed;
mod peering;
mod resource;
mod segment;

// Re-export public types
pub use cidr::{
    broadcast_addr, cut_addr, get_cidr_mask, num_az_hosts, Cidr, CidrError, AZ_RESERVED_HOSTS,
    MAX_LENGTH, MIN_SUBNET_MASK,
};
pub use dns::{DnsResolver, PrivateDnsZone};
pub use gateway::{AadSettings, VpnAuthType, VpnGateway};
pub use observed::ObservedState;
pub use peering::{Peering, PeeringState};
pub use resource::{Resource, ResourceKey, ResourceKind, SegmentSpec, SubnetSpec};
pub use segment::{
    NetworkSegment, SegmentRole, Subnet, Workload, DELEGATION_DNS_RESOLVER, DELEGATION_GATEWAY,
};
