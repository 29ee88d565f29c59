//! Rule 5: a delegation target may be used by at most one subnet per segment.

use super::{Rule, Violation};
use crate::models::ResourceKey;
use crate::topology::TopologyModel;
use itertools::Itertools;

pub(super) fn check(model: &TopologyModel, out: &mut Vec<Violation>) {
    for segment in model.segments() {
        let by_target = segment
            .subnets
            .iter()
            .filter_map(|s| s.delegation.as_deref().map(|d| (d, s.name.as_str())))
            .into_group_map();

        for (target, subnets) in by_target.into_iter().sorted_by_key(|(t, _)| *t) {
            if subnets.len() < 2 {
                continue;
            }
            out.push(Violation::error(
                Rule::DelegationUniqueness,
                subnets
                    .iter()
                    .map(|name| ResourceKey::subnet(&segment.id, name))
                    .collect(),
                format!(
                    "subnets {} in segment '{}' are all delegated to {target}",
                    subnets.join(", "),
                    segment.id
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::InvariantValidator;
    use super::*;

    #[test]
    fn test_duplicate_delegation_names_both_subnets() {
        let mut doc = lab_doc();
        doc.segments[0].subnets[1].delegation = Some("GatewaySubnet".to_string());
        let violations: Vec<_> = InvariantValidator::new()
            .validate(&model(doc), None)
            .into_iter()
            .filter(|v| v.rule == Rule::DelegationUniqueness)
            .collect();
        assert_eq!(violations.len(), 1, "{violations:#?}");
        assert!(violations[0].names(&ResourceKey::subnet("hub", "GatewaySubnet")));
        assert!(violations[0].names(&ResourceKey::subnet("hub", "snet-dns-inbound")));
    }

    #[test]
    fn test_undelegated_subnets_are_ignored() {
        let mut doc = lab_doc();
        doc.segments[1].subnets.push(crate::models::Subnet {
            name: "snet-vm".to_string(),
            prefix: "10.1.4.0/24".parse().unwrap(),
            delegation: None,
            nsg_ref: None,
        });
        doc.segments[1].subnets.push(crate::models::Subnet {
            name: "snet-vm2".to_string(),
            prefix: "10.1.5.0/24".parse().unwrap(),
            delegation: None,
            nsg_ref: None,
        });
        let violations = InvariantValidator::new().validate(&model(doc), None);
        assert!(violations.is_empty(), "{violations:#?}");
    }
}
