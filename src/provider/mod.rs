//! Cloud resource provider port.
//!
//! The reconciler talks to the cloud only through [`CloudResourceProvider`].
//! [`InMemoryProvider`] simulates one for the CLI and the tests.

mod memory;

pub use memory::{Fault, InMemoryProvider, ProviderEvent, ProviderEventKind};

use crate::error::ProviderError;
use crate::models::{Resource, ResourceKey, ResourceKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque id of a long-running provider operation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationHandle(pub String);

impl fmt::Display for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Running,
    Succeeded,
    Failed(String),
}

/// What the provider accepted. Without a handle the change is already applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub observed: Resource,
    pub handle: Option<OperationHandle>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Only resources owned by this topology.
    pub topology: Option<String>,
    /// Only resources attached to this segment.
    pub segment: Option<String>,
}

impl ListFilter {
    pub fn topology(id: impl Into<String>) -> Self {
        ListFilter {
            topology: Some(id.into()),
            segment: None,
        }
    }

    pub fn segment(id: impl Into<String>) -> Self {
        ListFilter {
            topology: None,
            segment: Some(id.into()),
        }
    }

    /// `owner` is the topology the provider recorded for `resource`, if any.
    pub fn matches(&self, owner: Option<&str>, resource: &Resource) -> bool {
        if let Some(topology) = &self.topology {
            if owner != Some(topology.as_str()) {
                return false;
            }
        }
        match &self.segment {
            None => true,
            Some(segment) => match resource {
                Resource::Segment(s) => &s.id == segment,
                other => other.segment_refs().contains(&segment.as_str()),
            },
        }
    }
}

#[async_trait]
pub trait CloudResourceProvider: Send + Sync {
    /// PUT semantics: create or replace the mutable attributes of `resource`.
    ///
    /// `owner` is the topology id tagged on the resource; a resource owned by
    /// another topology is refused.
    async fn create_or_update(
        &self,
        owner: &str,
        resource: &Resource,
    ) -> Result<Submission, ProviderError>;

    async fn get(&self, key: &ResourceKey) -> Result<Option<Resource>, ProviderError>;

    /// `NotFound` when nothing exists under `key`.
    async fn delete(&self, key: &ResourceKey) -> Result<Option<OperationHandle>, ProviderError>;

    async fn list(
        &self,
        kind: ResourceKind,
        filter: &ListFilter,
    ) -> Result<Vec<Resource>, ProviderError>;

    async fn poll_operation(&self, handle: &OperationHandle) -> Result<PollStatus, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cidr, SegmentRole, SegmentSpec};

    #[test]
    fn test_filter_by_topology_and_segment() {
        let lab = Resource::Segment(SegmentSpec {
            id: "spoke-lab".to_string(),
            name: "vnet-lab".to_string(),
            role: SegmentRole::Spoke,
            address_space: Cidr::new("10.1.0.0/16").unwrap(),
            dns_servers: vec![],
        });
        assert!(ListFilter::default().matches(None, &lab));
        assert!(ListFilter::topology("lab").matches(Some("lab"), &lab));
        assert!(!ListFilter::topology("lab").matches(Some("demo"), &lab));
        assert!(!ListFilter::topology("lab").matches(None, &lab));
        assert!(ListFilter::segment("spoke-lab").matches(Some("demo"), &lab));
        let both = ListFilter {
            segment: Some("spoke-lab".to_string()),
            ..ListFilter::topology("demo")
        };
        assert!(both.matches(Some("demo"), &lab));
        assert!(!both.matches(Some("lab"), &lab));
    }
}
