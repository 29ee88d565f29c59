//! IPv4 CIDR block utilities.
//!
//! Provides [`Cidr`] for address spaces, subnet prefixes and VPN client pools,
//! along with the mask arithmetic the validator needs for overlap checks.

use serde::de;
use serde::{Deserialize, Deserializer, Serialize};
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// Maximum length for an IPv4 prefix (32 bits).
pub const MAX_LENGTH: u8 = 32;

/// Addresses the provider reserves in every subnet (network, broadcast, gateway, 2x DNS).
pub const AZ_RESERVED_HOSTS: u64 = 5;

/// Smallest subnet the provider accepts.
pub const MIN_SUBNET_MASK: u8 = 29;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CidrError {
    #[error("invalid CIDR format: '{0}'")]
    Format(String),
    #[error("invalid IPv4 address: '{0}'")]
    Address(String),
    #[error("invalid prefix length: '{0}'")]
    Mask(String),
    #[error("prefix length /{0} is too long")]
    TooLong(u8),
    #[error("prefix length /{0} leaves no usable hosts")]
    NoHosts(u8),
}

/// Convert a CIDR prefix length to a subnet mask as u32.
///
/// # Examples
/// ```
/// use hub_spoke_reconciler::models::get_cidr_mask;
/// assert_eq!(get_cidr_mask(24).unwrap(), 0xFFFFFF00);
/// ```
pub fn get_cidr_mask(len: u8) -> Result<u32, CidrError> {
    if len > MAX_LENGTH {
        Err(CidrError::TooLong(len))
    } else {
        let right_len = MAX_LENGTH - len;
        let all_bits = u32::MAX as u64;

        let mask = (all_bits >> right_len) << right_len;

        Ok(mask as u32)
    }
}

/// Get the network address for a given IP and prefix length.
pub fn cut_addr(addr: Ipv4Addr, len: u8) -> Result<Ipv4Addr, CidrError> {
    let mask = get_cidr_mask(len)?;
    Ok(Ipv4Addr::from(u32::from(addr) & mask))
}

/// Calculate the broadcast address for a given IP and prefix length.
pub fn broadcast_addr(addr: Ipv4Addr, len: u8) -> Result<Ipv4Addr, CidrError> {
    let mask = get_cidr_mask(len)?;
    let network_bits = u32::from(addr) & mask;
    Ok(Ipv4Addr::from(network_bits | !mask))
}

/// Number of usable host addresses in a provider subnet of the given length.
pub fn num_az_hosts(len: u8) -> Result<u64, CidrError> {
    if len > MAX_LENGTH {
        Err(CidrError::TooLong(len))
    } else if len > MIN_SUBNET_MASK {
        Err(CidrError::NoHosts(len))
    } else {
        Ok((1u64 << (MAX_LENGTH - len)) - AZ_RESERVED_HOSTS)
    }
}

/// IPv4 block in CIDR notation, serialised as `"10.0.0.0/16"`.
#[derive(Eq, PartialEq, Ord, PartialOrd, Debug, Copy, Clone, Hash)]
pub struct Cidr {
    /// The address as written; not necessarily the network address.
    pub addr: Ipv4Addr,
    /// The prefix length (0-32).
    pub mask: u8,
}

impl Cidr {
    /// Create a new [`Cidr`] from a string such as `"10.0.0.0/24"`.
    pub fn new(addr_cidr: &str) -> Result<Cidr, CidrError> {
        addr_cidr.parse()
    }

    /// Lowest (network) address in the block.
    pub fn lo(&self) -> Ipv4Addr {
        // mask is validated on construction
        cut_addr(self.addr, self.mask.min(MAX_LENGTH)).unwrap_or(self.addr)
    }

    /// Highest (broadcast) address in the block.
    pub fn hi(&self) -> Ipv4Addr {
        broadcast_addr(self.addr, self.mask.min(MAX_LENGTH)).unwrap_or(self.addr)
    }

    /// Inclusive `[lo, hi]` range as integers, used for interval sweeps.
    pub fn interval(&self) -> (u32, u32) {
        (u32::from(self.lo()), u32::from(self.hi()))
    }

    /// True when `addr` is the network address of the block.
    pub fn is_aligned(&self) -> bool {
        self.addr == self.lo()
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.lo() <= ip && ip <= self.hi()
    }

    /// True when `other` lies entirely inside this block.
    pub fn contains_net(&self, other: &Cidr) -> bool {
        self.lo() <= other.lo() && other.hi() <= self.hi()
    }

    pub fn overlaps(&self, other: &Cidr) -> bool {
        self.lo() <= other.hi() && other.lo() <= self.hi()
    }
}

impl FromStr for Cidr {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, mask) = s
            .split_once('/')
            .ok_or_else(|| CidrError::Format(s.to_string()))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| CidrError::Address(addr.to_string()))?;
        let mask: u8 = mask.parse().map_err(|_| CidrError::Mask(mask.to_string()))?;
        if mask > MAX_LENGTH {
            return Err(CidrError::TooLong(mask));
        }
        Ok(Cidr { addr, mask })
    }
}

impl Serialize for Cidr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Cidr {
    fn deserialize<D>(deserializer: D) -> Result<Cidr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Cidr::from_str(&s).map_err(de::Error::custom)
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.mask)
    }
}
