//! Topology document as supplied by the Desired State Source.

use crate::cache;
use crate::error::ReconcileError;
use crate::models::{DnsResolver, NetworkSegment, Peering, PrivateDnsZone, VpnGateway};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Declared hub-spoke topology for one environment (lab, demo, hub).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopologyDocument {
    /// Key for the executing lease and the observed-state cache.
    pub topology_id: String,
    #[serde(default)]
    pub segments: Vec<NetworkSegment>,
    #[serde(default)]
    pub peerings: Vec<Peering>,
    #[serde(default)]
    pub dns_zones: Vec<PrivateDnsZone>,
    #[serde(default)]
    pub dns_resolvers: Vec<DnsResolver>,
    #[serde(default)]
    pub vpn_gateways: Vec<VpnGateway>,
}

impl TopologyDocument {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReconcileError> {
        let doc: TopologyDocument = cache::read_json_file(path)?;
        log::info!(
            "Loaded topology '{}': {} segments, {} peerings, {} zones",
            doc.topology_id,
            doc.segments.len(),
            doc.peerings.len(),
            doc.dns_zones.len()
        );
        Ok(doc)
    }

    pub fn from_json(json: &str) -> Result<Self, ReconcileError> {
        cache::parse_json(json, "topology document")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_lab_document() {
        let doc = TopologyDocument::load("tests/data/topology_lab.json")
            .expect("Error reading lab topology");
        assert_eq!(doc.topology_id, "lab");
        assert_eq!(doc.segments.len(), 2);
        assert_eq!(doc.segments[0].subnets.len(), 2);
        assert_eq!(doc.vpn_gateways.len(), 1);
    }

    #[test]
    fn test_minimal_document_defaults() {
        let doc = TopologyDocument::from_json(r#"{"topologyId":"empty"}"#).unwrap();
        assert!(doc.segments.is_empty());
        assert!(doc.peerings.is_empty());
    }

    #[test]
    fn test_bad_cidr_reports_path() {
        let err = TopologyDocument::from_json(
            r#"{"topologyId":"x","segments":[{"id":"hub","name":"vnet-hub","role":"hub","addressSpace":"10.0.0.0/99"}]}"#,
        )
        .unwrap_err();
        match err {
            ReconcileError::Json { at, .. } => assert_eq!(at, "segments[0].addressSpace"),
            other => panic!("expected JSON error, got {other:?}"),
        }
    }
}
