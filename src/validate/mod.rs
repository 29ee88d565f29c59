//! Structural invariant checks over a [`TopologyModel`].
//!
//! Rules run in a fixed order:
//! 1. [`cidr`] - address space and subnet prefix overlap
//! 2. [`peering`] - peering symmetry and gateway transit direction
//! 3. [`dns`] - private DNS zone links and resolver placement
//! 4. [`gateway`] - VPN authentication exclusivity and immutable changes
//! 5. [`delegation`] - delegation uniqueness per segment
//!
//! Any [`Severity::Error`] rejects the plan; warnings travel with it.

mod cidr;
mod delegation;
mod dns;
mod gateway;
mod peering;

use crate::error::ValidationError;
use crate::models::{ObservedState, ResourceKey};
use crate::topology::TopologyModel;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use cidr::overlapping_pairs;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    Cidr,
    PeeringSymmetry,
    DnsCompleteness,
    VpnAuthentication,
    DelegationUniqueness,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rule::Cidr => "cidr",
            Rule::PeeringSymmetry => "peering-symmetry",
            Rule::DnsCompleteness => "dns-completeness",
            Rule::VpnAuthentication => "vpn-authentication",
            Rule::DelegationUniqueness => "delegation-uniqueness",
        };
        write!(f, "{name}")
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub rule: Rule,
    pub severity: Severity,
    pub entities: Vec<ResourceKey>,
    pub message: String,
}

impl Violation {
    pub fn error(rule: Rule, entities: Vec<ResourceKey>, message: impl Into<String>) -> Self {
        Violation {
            rule,
            severity: Severity::Error,
            entities,
            message: message.into(),
        }
    }

    pub fn warning(rule: Rule, entities: Vec<ResourceKey>, message: impl Into<String>) -> Self {
        Violation {
            rule,
            severity: Severity::Warning,
            entities,
            message: message.into(),
        }
    }

    pub fn names(&self, key: &ResourceKey) -> bool {
        self.entities.contains(key)
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.severity, self.rule, self.message)
    }
}

/// Runs the fixed rule battery.
#[derive(Debug, Default, Clone, Copy)]
pub struct InvariantValidator;

impl InvariantValidator {
    pub fn new() -> Self {
        InvariantValidator
    }

    /// All violations, in rule order. `observed` enables immutability checks.
    pub fn validate(
        &self,
        model: &TopologyModel,
        observed: Option<&ObservedState>,
    ) -> Vec<Violation> {
        let mut out = Vec::new();
        cidr::check(model, &mut out);
        peering::check(model, &mut out);
        dns::check(model, &mut out);
        gateway::check(model, observed, &mut out);
        delegation::check(model, &mut out);

        let errors = out.iter().filter(|v| v.severity == Severity::Error).count();
        if errors > 0 {
            log::warn!(
                "Topology '{}' failed validation: {errors} error(s), {} warning(s)",
                model.topology_id(),
                out.len() - errors
            );
        } else {
            log::info!(
                "Topology '{}' validated with {} warning(s)",
                model.topology_id(),
                out.len()
            );
        }
        for v in &out {
            log::debug!("{v}");
        }
        out
    }

    /// Fail fast: `Err` when any error-severity violation exists, else the warnings.
    pub fn check(
        &self,
        model: &TopologyModel,
        observed: Option<&ObservedState>,
    ) -> Result<Vec<Violation>, ValidationError> {
        let violations = self.validate(model, observed);
        if has_errors(&violations) {
            Err(ValidationError { violations })
        } else {
            Ok(violations)
        }
    }
}

pub fn has_errors(violations: &[Violation]) -> bool {
    violations.iter().any(|v| v.severity == Severity::Error)
}
