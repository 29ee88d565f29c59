//! Observed state: the provider's view of the topology, as last seen.

use super::{Resource, ResourceKey, ResourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Versioned snapshot of provider-side resources.
///
/// Every replacement or mutation bumps `version`, so a reader can tell whether
/// the snapshot it diffed against is still current.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObservedState {
    pub version: u64,
    pub refreshed_at: DateTime<Utc>,
    #[serde(
        serialize_with = "serialize_resources",
        deserialize_with = "deserialize_resources"
    )]
    pub resources: BTreeMap<ResourceKey, Resource>,
}

impl Default for ObservedState {
    fn default() -> Self {
        ObservedState {
            version: 0,
            refreshed_at: DateTime::<Utc>::UNIX_EPOCH,
            resources: BTreeMap::new(),
        }
    }
}

impl ObservedState {
    pub fn new(resources: impl IntoIterator<Item = Resource>) -> Self {
        ObservedState {
            version: 1,
            refreshed_at: Utc::now(),
            resources: resources.into_iter().map(|r| (r.key(), r)).collect(),
        }
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&Resource> {
        self.resources.get(key)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.resources.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources
            .iter()
            .filter(move |(k, _)| k.kind == kind)
            .map(|(_, r)| r)
    }

    pub fn upsert(&mut self, resource: Resource) {
        self.resources.insert(resource.key(), resource);
        self.version += 1;
    }

    pub fn remove(&mut self, key: &ResourceKey) -> Option<Resource> {
        let removed = self.resources.remove(key);
        if removed.is_some() {
            self.version += 1;
        }
        removed
    }

    /// Replace the whole snapshot with freshly read resources.
    pub fn replace(&mut self, resources: impl IntoIterator<Item = Resource>) {
        self.resources = resources.into_iter().map(|r| (r.key(), r)).collect();
        self.refreshed_at = Utc::now();
        self.version += 1;
    }
}

fn serialize_resources<S>(
    resources: &BTreeMap<ResourceKey, Resource>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_seq(resources.values())
}

fn deserialize_resources<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<ResourceKey, Resource>, D::Error>
where
    D: Deserializer<'de>,
{
    let list = Vec::<Resource>::deserialize(deserializer)?;
    Ok(list.into_iter().map(|r| (r.key(), r)).collect())
}
