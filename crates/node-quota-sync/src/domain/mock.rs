//! Test adapters implementing the cluster and clock traits
//!
//! This module provides in-memory implementations of [`QuotaCluster`] and
//! [`TimeSource`] for unit tests and the integration tests of this crate.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::MutexGuard;

use api_types::NodeQuotaConfigStatus;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use error_stack::Report;

use super::capacity::NodeCapacity;
use super::error::QuotaError;
use super::quantity::Amount;
use super::resources::ResourceMap;
use super::traits::QuotaCluster;
use super::traits::QuotaSnapshot;
use super::traits::QuotaTarget;
use super::traits::TimeSource;

/// Builds a resource map from `(kind, quantity)` pairs. Panics on an invalid
/// quantity.
pub fn resources(pairs: &[(&str, &str)]) -> ResourceMap {
    pairs
        .iter()
        .map(|(kind, quantity)| {
            let amount = quantity
                .parse::<Amount>()
                .unwrap_or_else(|e| panic!("invalid quantity {quantity}: {e}"));
            (*kind, amount)
        })
        .collect()
}

/// Builds a node from label and allocatable pairs.
pub fn node(name: &str, labels: &[(&str, &str)], allocatable: &[(&str, &str)]) -> NodeCapacity {
    NodeCapacity {
        name: name.to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        allocatable: resources(allocatable),
    }
}

#[derive(Debug, Clone)]
struct StoredQuota {
    hard: ResourceMap,
    version: u64,
}

#[derive(Default)]
struct ClusterState {
    nodes: Vec<NodeCapacity>,
    quotas: BTreeMap<QuotaTarget, StoredQuota>,
    statuses: BTreeMap<String, NodeQuotaConfigStatus>,
    patches: Vec<(QuotaTarget, ResourceMap)>,
    status_writes: usize,
    fail_list_nodes: bool,
    fail_status: bool,
    fail_read: BTreeSet<QuotaTarget>,
    fail_patch: BTreeSet<QuotaTarget>,
    modify_after_read: BTreeSet<QuotaTarget>,
}

/// In-memory cluster with failure injection.
///
/// Quota objects carry a version that increases on every write, so patches
/// sent with a stale version fail with [`QuotaError::Conflict`].
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<ClusterState>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_nodes(&self, nodes: Vec<NodeCapacity>) {
        self.state().nodes = nodes;
    }

    pub fn add_node(&self, node: NodeCapacity) {
        self.state().nodes.push(node);
    }

    pub fn remove_node(&self, name: &str) {
        self.state().nodes.retain(|node| node.name != name);
    }

    /// Creates or overwrites a quota object without recording a patch.
    pub fn set_quota(&self, target: QuotaTarget, hard: ResourceMap) {
        let mut state = self.state();
        let version = state.quotas.get(&target).map_or(1, |q| q.version + 1);
        state.quotas.insert(target, StoredQuota { hard, version });
    }

    pub fn quota(&self, target: &QuotaTarget) -> Option<ResourceMap> {
        self.state().quotas.get(target).map(|q| q.hard.clone())
    }

    /// Patches received so far, in order.
    pub fn patches(&self) -> Vec<(QuotaTarget, ResourceMap)> {
        self.state().patches.clone()
    }

    pub fn clear_patches(&self) {
        self.state().patches.clear();
    }

    pub fn status(&self, config: &str) -> Option<NodeQuotaConfigStatus> {
        self.state().statuses.get(config).cloned()
    }

    pub fn status_writes(&self) -> usize {
        self.state().status_writes
    }

    pub fn fail_list_nodes(&self, fail: bool) {
        self.state().fail_list_nodes = fail;
    }

    pub fn fail_status(&self, fail: bool) {
        self.state().fail_status = fail;
    }

    pub fn fail_read(&self, target: QuotaTarget) {
        self.state().fail_read.insert(target);
    }

    pub fn fail_patch(&self, target: QuotaTarget) {
        self.state().fail_patch.insert(target);
    }

    /// Simulates a concurrent writer that bumps `target` right after every read.
    pub fn modify_after_read(&self, target: QuotaTarget) {
        self.state().modify_after_read.insert(target);
    }

    pub fn reset_failures(&self) {
        let mut state = self.state();
        state.fail_list_nodes = false;
        state.fail_status = false;
        state.fail_read.clear();
        state.fail_patch.clear();
        state.modify_after_read.clear();
    }
}

#[async_trait]
impl QuotaCluster for InMemoryCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeCapacity>, Report<QuotaError>> {
        let state = self.state();
        if state.fail_list_nodes {
            return Err(Report::new(QuotaError::InventoryRead)
                .attach_printable("injected node listing failure"));
        }
        Ok(state.nodes.clone())
    }

    async fn get_quota(
        &self,
        target: &QuotaTarget,
    ) -> Result<Option<QuotaSnapshot>, Report<QuotaError>> {
        let mut state = self.state();
        if state.fail_read.contains(target) {
            return Err(Report::new(QuotaError::QuotaRead {
                target: target.to_string(),
            }));
        }
        let bump = state.modify_after_read.contains(target);
        let Some(stored) = state.quotas.get_mut(target) else {
            return Ok(None);
        };
        let snapshot = QuotaSnapshot {
            hard: stored.hard.clone(),
            resource_version: Some(stored.version.to_string()),
        };
        if bump {
            stored.version += 1;
        }
        Ok(Some(snapshot))
    }

    async fn patch_quota(
        &self,
        target: &QuotaTarget,
        hard: &ResourceMap,
        resource_version: Option<&str>,
    ) -> Result<(), Report<QuotaError>> {
        let mut state = self.state();
        if state.fail_patch.contains(target) {
            return Err(Report::new(QuotaError::QuotaPatch {
                target: target.to_string(),
            }));
        }
        let Some(stored) = state.quotas.get_mut(target) else {
            return Err(Report::new(QuotaError::QuotaPatch {
                target: target.to_string(),
            })
            .attach_printable("object not found"));
        };
        if let Some(expected) = resource_version {
            if expected != stored.version.to_string() {
                return Err(Report::new(QuotaError::Conflict {
                    target: target.to_string(),
                }));
            }
        }
        stored.hard = hard.clone();
        stored.version += 1;
        state.patches.push((target.clone(), hard.clone()));
        Ok(())
    }

    async fn persist_status(
        &self,
        config: &str,
        status: &NodeQuotaConfigStatus,
    ) -> Result<(), Report<QuotaError>> {
        let mut state = self.state();
        if state.fail_status {
            return Err(Report::new(QuotaError::StatusPersist {
                config: config.to_string(),
            }));
        }
        state.statuses.insert(config.to_string(), status.clone());
        state.status_writes += 1;
        Ok(())
    }
}

/// Manually driven clock.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
