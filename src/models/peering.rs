//! VNet peering data model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Peering link state as reported by the provider.
///
/// A peering only becomes `Connected` once the reverse peering exists; a
/// `Disconnected` peering cannot be repaired in place and must be recreated.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum PeeringState {
    #[default]
    Initiated,
    Connected,
    Disconnected,
}

/// One direction of a VNet peering (`local_segment` → `remote_segment`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Peering {
    pub id: String,
    pub local_segment: String,
    pub remote_segment: String,
    #[serde(default)]
    pub allow_gateway_transit: bool,
    #[serde(default)]
    pub use_remote_gateways: bool,
    /// Observed only; ignored when declared.
    #[serde(default)]
    pub state: PeeringState,
}

impl Peering {
    pub fn touches(&self, segment_id: &str) -> bool {
        self.local_segment == segment_id || self.remote_segment == segment_id
    }

    /// True when `other` is the reverse direction of this peering.
    pub fn is_reverse_of(&self, other: &Peering) -> bool {
        self.local_segment == other.remote_segment && self.remote_segment == other.local_segment
    }

    /// True when this peering relies on a gateway in `segment_id`, either by
    /// offering transit from it or by consuming it remotely.
    pub fn uses_gateway_of(&self, segment_id: &str) -> bool {
        (self.allow_gateway_transit && self.local_segment == segment_id)
            || (self.use_remote_gateways && self.remote_segment == segment_id)
    }

    /// Copy of this peering with gateway transit switched off in both directions.
    pub fn without_transit(&self) -> Peering {
        Peering {
            allow_gateway_transit: false,
            use_remote_gateways: false,
            ..self.clone()
        }
    }
}

impl fmt::Display for PeeringState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeeringState::Initiated => write!(f, "Initiated"),
            PeeringState::Connected => write!(f, "Connected"),
            PeeringState::Disconnected => write!(f, "Disconnected"),
        }
    }
}
