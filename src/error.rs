//! Error taxonomy.
//!
//! Validation problems never reach the provider; provider problems are scoped
//! to one operation and its dependents; everything else surfaces as a
//! [`ReconcileError`].

use crate::config::ConfigError;
use crate::plan::{OperationId, PlanStatus};
use crate::validate::{Severity, Violation};
use thiserror::Error as ThisError;

/// The topology document references something that does not exist, or reuses an id.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum MalformedTopologyError {
    #[error("{entity} references unknown {target_kind} '{target}'")]
    UnknownReference {
        entity: String,
        target_kind: &'static str,
        target: String,
    },
    #[error("duplicate {kind} id '{id}'")]
    DuplicateId { kind: &'static str, id: String },
}

/// Structural invariants violated; the plan never executes.
#[derive(Debug, Clone, ThisError)]
#[error("invariant violation(s): {}", summarize(.violations))]
pub struct ValidationError {
    pub violations: Vec<Violation>,
}

impl ValidationError {
    pub fn errors(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Error)
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .filter(|v| v.severity == Severity::Error)
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why the provider permanently refused an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermanentReason {
    QuotaExceeded,
    PermissionDenied,
    ImmutableProperty,
    InvariantViolated,
    BadRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum ProviderError {
    /// Throttling or a 5xx-class failure; worth retrying.
    #[error("transient provider error (status {status:?}): {message}")]
    Transient { status: Option<u16>, message: String },
    #[error("permanent provider error ({reason:?}): {message}")]
    Permanent {
        reason: PermanentReason,
        message: String,
    },
    #[error("resource not found: {0}")]
    NotFound(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient { .. })
    }

    /// Classify an HTTP status the way the provider's REST API reports it.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 | 500..=599 => ProviderError::Transient {
                status: Some(status),
                message,
            },
            404 => ProviderError::NotFound(message),
            401 | 403 => ProviderError::Permanent {
                reason: PermanentReason::PermissionDenied,
                message,
            },
            409 => ProviderError::Permanent {
                reason: PermanentReason::ImmutableProperty,
                message,
            },
            _ => ProviderError::Permanent {
                reason: PermanentReason::BadRequest,
                message,
            },
        }
    }
}

/// Outcome of a single plan operation that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum OperationError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("provider reported failure: {0}")]
    PollFailed(String),
    #[error("timed out after {0}s waiting for a terminal state")]
    Timeout(u64),
    #[error(transparent)]
    DependencyBlocked(#[from] DependencyBlockedError),
    #[error("plan cancelled before the operation started")]
    Cancelled,
}

impl OperationError {
    /// Only transient provider errors are retried; timeouts and failed polls are final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OperationError::Provider(e) if e.is_retryable())
    }
}

/// Operation skipped because a prerequisite did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("blocked by failed prerequisite operation #{prerequisite}")]
pub struct DependencyBlockedError {
    pub prerequisite: OperationId,
}

/// Another plan holds the executing lease for this topology.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("a reconciliation plan is already executing for topology '{topology_id}'")]
pub struct PlanInProgressError {
    pub topology_id: String,
}

#[derive(Debug, ThisError)]
pub enum ReconcileError {
    #[error(transparent)]
    Malformed(#[from] MalformedTopologyError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    PlanInProgress(#[from] PlanInProgressError),
    #[error("invalid plan transition {from} -> {to}")]
    InvalidTransition { from: PlanStatus, to: PlanStatus },
    #[error("dependency cycle between operations {0:?}")]
    DependencyCycle(Vec<OperationId>),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error in '{path}' at path={at}: {message}")]
    Json {
        path: String,
        at: String,
        message: String,
    },
}
