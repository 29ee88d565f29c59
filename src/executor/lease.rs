//! One executing plan per topology id.

use crate::error::PlanInProgressError;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// What to do when a second plan for the same topology arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeaseMode {
    /// Fail with [`PlanInProgressError`].
    #[default]
    Reject,
    /// Wait until the running plan releases the lease.
    Queue,
}

impl FromStr for LeaseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(LeaseMode::Reject),
            "queue" => Ok(LeaseMode::Queue),
            other => Err(format!("unknown lease mode '{other}' (expected reject or queue)")),
        }
    }
}

impl fmt::Display for LeaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseMode::Reject => write!(f, "reject"),
            LeaseMode::Queue => write!(f, "queue"),
        }
    }
}

/// Held for the whole execution; dropping it releases the topology.
#[derive(Debug)]
pub struct PlanLease {
    topology_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl PlanLease {
    pub fn topology_id(&self) -> &str {
        &self.topology_id
    }
}

impl Drop for PlanLease {
    fn drop(&mut self) {
        log::debug!("Released executing lease for topology '{}'", self.topology_id);
    }
}

#[derive(Debug, Default)]
pub struct LeaseRegistry {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, topology_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(topology_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn acquire(
        &self,
        topology_id: &str,
        mode: LeaseMode,
    ) -> Result<PlanLease, PlanInProgressError> {
        let lock = self.lock_for(topology_id);
        let guard = match mode {
            LeaseMode::Reject => lock.try_lock_owned().map_err(|_| {
                log::warn!("Plan for topology '{topology_id}' rejected: another plan is executing");
                PlanInProgressError {
                    topology_id: topology_id.to_string(),
                }
            })?,
            LeaseMode::Queue => {
                log::debug!("Waiting for executing lease on topology '{topology_id}'");
                lock.lock_owned().await
            }
        };
        log::debug!("Acquired executing lease for topology '{topology_id}'");
        Ok(PlanLease {
            topology_id: topology_id.to_string(),
            _guard: guard,
        })
    }
}
