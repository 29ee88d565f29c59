//! Point-to-site VPN gateway data model.

use super::Cidr;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Client authentication mode. Fixed at creation time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VpnAuthType {
    #[serde(rename = "certificate")]
    Certificate,
    #[serde(rename = "azureAD")]
    AzureAd,
}

impl fmt::Display for VpnAuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpnAuthType::Certificate => write!(f, "certificate"),
            VpnAuthType::AzureAd => write!(f, "azureAD"),
        }
    }
}

/// Entra ID settings used when `auth_type` is [`VpnAuthType::AzureAd`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AadSettings {
    pub tenant: String,
    pub audience: String,
    pub issuer: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VpnGateway {
    pub id: String,
    pub segment: String,
    /// Subnet (by name) delegated to [`super::DELEGATION_GATEWAY`].
    pub subnet: String,
    pub auth_type: VpnAuthType,
    pub client_address_pool: Cidr,
    #[serde(default)]
    pub custom_routes: Vec<Cidr>,
    /// Trusted root certificate names for certificate auth.
    #[serde(default)]
    pub root_certificates: Vec<String>,
    #[serde(default)]
    pub aad: Option<AadSettings>,
}
