//! Rule 4: VPN gateway authentication exclusivity and placement.

use super::{Rule, Violation};
use crate::models::{
    ObservedState, Resource, ResourceKey, ResourceKind, VpnAuthType, VpnGateway,
    DELEGATION_GATEWAY,
};
use crate::topology::TopologyModel;
use std::collections::BTreeMap;

/// Smallest gateway subnet the provider recommends.
const RECOMMENDED_GATEWAY_MASK: u8 = 27;

fn key(g: &VpnGateway) -> ResourceKey {
    ResourceKey::new(ResourceKind::VpnGateway, &g.id)
}

pub(super) fn check(
    model: &TopologyModel,
    observed: Option<&ObservedState>,
    out: &mut Vec<Violation>,
) {
    let mut per_segment: BTreeMap<&str, Vec<&VpnGateway>> = BTreeMap::new();
    for gateway in model.gateways() {
        per_segment
            .entry(gateway.segment.as_str())
            .or_default()
            .push(gateway);
        check_auth(gateway, out);
        check_placement(model, gateway, out);
        if let Some(Resource::VpnGateway(current)) = observed.and_then(|o| o.get(&key(gateway))) {
            check_immutable(gateway, current, out);
        }
    }

    for (segment, gateways) in per_segment {
        if gateways.len() > 1 {
            out.push(Violation::error(
                Rule::VpnAuthentication,
                gateways.iter().map(|g| key(g)).collect(),
                format!(
                    "segment '{segment}' declares {} VPN gateways; only one is allowed",
                    gateways.len()
                ),
            ));
        }
    }
}

fn check_auth(g: &VpnGateway, out: &mut Vec<Violation>) {
    let mut problem = |message: String| {
        out.push(Violation::error(Rule::VpnAuthentication, vec![key(g)], message));
    };
    match g.auth_type {
        VpnAuthType::Certificate => {
            if g.root_certificates.is_empty() {
                problem(format!(
                    "gateway '{}' uses certificate authentication but has no root certificates",
                    g.id
                ));
            }
            if g.aad.is_some() {
                problem(format!(
                    "gateway '{}' uses certificate authentication but also carries an aad block",
                    g.id
                ));
            }
        }
        VpnAuthType::AzureAd => {
            if g.aad.is_none() {
                problem(format!(
                    "gateway '{}' uses azureAD authentication but has no aad block",
                    g.id
                ));
            }
            if !g.root_certificates.is_empty() {
                problem(format!(
                    "gateway '{}' uses azureAD authentication but also lists {} root certificate(s)",
                    g.id,
                    g.root_certificates.len()
                ));
            }
        }
    }
}

fn check_placement(model: &TopologyModel, g: &VpnGateway, out: &mut Vec<Violation>) {
    let Some(segment) = model.segment(&g.segment) else {
        return;
    };
    if !segment.is_hub() {
        out.push(Violation::error(
            Rule::VpnAuthentication,
            vec![key(g), ResourceKey::segment(&segment.id)],
            format!(
                "gateway '{}' is placed in spoke segment '{}'; gateways belong in a hub",
                g.id, segment.id
            ),
        ));
    }
    let Some(subnet) = segment.subnet(&g.subnet) else {
        return;
    };
    let subnet_key = ResourceKey::subnet(&segment.id, &subnet.name);
    if subnet.delegation.as_deref() != Some(DELEGATION_GATEWAY) {
        out.push(Violation::error(
            Rule::VpnAuthentication,
            vec![key(g), subnet_key.clone()],
            format!(
                "gateway '{}' subnet '{}' is not delegated to {DELEGATION_GATEWAY}",
                g.id, subnet.name
            ),
        ));
    }
    if subnet.prefix.mask > RECOMMENDED_GATEWAY_MASK {
        out.push(Violation::warning(
            Rule::VpnAuthentication,
            vec![key(g), subnet_key],
            format!(
                "gateway '{}' subnet {} is smaller than the recommended /{RECOMMENDED_GATEWAY_MASK}",
                g.id, subnet.prefix
            ),
        ));
    }
}

/// Changes the provider cannot apply in place; the gateway will be deleted and recreated.
fn check_immutable(desired: &VpnGateway, current: &VpnGateway, out: &mut Vec<Violation>) {
    let mut changed = Vec::new();
    if desired.auth_type != current.auth_type {
        changed.push(format!("authType {} -> {}", current.auth_type, desired.auth_type));
    }
    if desired.segment != current.segment {
        changed.push(format!("segment {} -> {}", current.segment, desired.segment));
    }
    if desired.subnet != current.subnet {
        changed.push(format!("subnet {} -> {}", current.subnet, desired.subnet));
    }
    if changed.is_empty() {
        return;
    }
    out.push(Violation::warning(
        Rule::VpnAuthentication,
        vec![key(desired)],
        format!(
            "gateway '{}' change is destructive ({}); it will be deleted and recreated, dropping connected clients",
            desired.id,
            changed.join(", ")
        ),
    ));
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{has_errors, InvariantValidator, Severity};
    use super::*;
    use crate::topology::TopologyDocument;

    fn gateway_violations(doc: TopologyDocument, observed: Option<&ObservedState>) -> Vec<Violation> {
        InvariantValidator::new()
            .validate(&model(doc), observed)
            .into_iter()
            .filter(|v| v.rule == Rule::VpnAuthentication)
            .collect()
    }

    #[test]
    fn test_azure_ad_requires_aad_block() {
        let mut doc = lab_doc();
        doc.vpn_gateways[0].aad = None;
        let violations = gateway_violations(doc, None);
        assert_eq!(violations.len(), 1, "{violations:#?}");
        assert!(violations[0].message.contains("has no aad block"));
    }

    #[test]
    fn test_certificate_auth_is_exclusive() {
        let mut doc = lab_doc();
        doc.vpn_gateways[0].auth_type = VpnAuthType::Certificate;
        let violations = gateway_violations(doc.clone(), None);
        let messages: Vec<&str> = violations.iter().map(|v| v.message.as_str()).collect();
        assert!(messages.iter().any(|m| m.contains("no root certificates")));
        assert!(messages.iter().any(|m| m.contains("also carries an aad block")));

        doc.vpn_gateways[0].aad = None;
        doc.vpn_gateways[0].root_certificates = vec!["P2SRootCert".to_string()];
        assert!(gateway_violations(doc, None).is_empty());
    }

    #[test]
    fn test_observed_auth_change_is_destructive_warning() {
        let doc = lab_doc();
        let mut current = doc.vpn_gateways[0].clone();
        current.auth_type = VpnAuthType::Certificate;
        current.aad = None;
        current.root_certificates = vec!["P2SRootCert".to_string()];
        let observed = ObservedState::new(vec![Resource::VpnGateway(current)]);

        let violations = gateway_violations(doc, Some(&observed));
        assert_eq!(violations.len(), 1, "{violations:#?}");
        assert_eq!(violations[0].severity, Severity::Warning);
        assert!(violations[0].message.contains("authType certificate -> azureAD"));
        assert!(!has_errors(&violations));
    }

    #[test]
    fn test_gateway_subnet_delegation() {
        let mut doc = lab_doc();
        doc.segments[0].subnets[0].delegation = None;
        let violations = gateway_violations(doc, None);
        assert!(violations
            .iter()
            .any(|v| v.severity == Severity::Error && v.message.contains("not delegated to GatewaySubnet")));
    }

    #[test]
    fn test_small_gateway_subnet_warns() {
        let mut doc = lab_doc();
        doc.segments[0].subnets[0].prefix = "10.0.0.0/28".parse().unwrap();
        let violations = gateway_violations(doc, None);
        assert_eq!(violations.len(), 1, "{violations:#?}");
        assert_eq!(violations[0].severity, Severity::Warning);
    }
}
