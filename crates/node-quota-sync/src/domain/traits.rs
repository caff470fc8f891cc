//! Seams between the reconciliation logic and the cluster it runs against.

use std::fmt;

use api_types::NodeQuotaConfigStatus;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use error_stack::Report;

use crate::domain::capacity::NodeCapacity;
use crate::domain::error::QuotaError;
use crate::domain::resources::ResourceMap;

/// A namespace quota object the controller reads and patches.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QuotaTarget {
    /// Subnamespace `name` in the `root` namespace.
    Group { root: String, name: String },
    /// ResourceQuota named after the root namespace, inside it.
    Root { name: String },
}

impl QuotaTarget {
    pub fn group(root: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Group {
            root: root.into(),
            name: name.into(),
        }
    }

    pub fn root(name: impl Into<String>) -> Self {
        Self::Root { name: name.into() }
    }

    /// Namespace holding the quota object.
    pub fn namespace(&self) -> &str {
        match self {
            Self::Group { root, .. } => root,
            Self::Root { name } => name,
        }
    }

    /// Name of the quota object.
    pub fn name(&self) -> &str {
        match self {
            Self::Group { name, .. } | Self::Root { name } => name,
        }
    }
}

impl fmt::Display for QuotaTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group { root, name } => write!(f, "subnamespace {root}/{name}"),
            Self::Root { name } => write!(f, "resourcequota {name}/{name}"),
        }
    }
}

/// Hard quota of a target as read, with the version it was read at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuotaSnapshot {
    pub hard: ResourceMap,
    pub resource_version: Option<String>,
}

/// Cluster operations needed by a reconciliation pass.
#[async_trait]
pub trait QuotaCluster: Send + Sync {
    /// All nodes with their labels and allocatable capacity.
    async fn list_nodes(&self) -> Result<Vec<NodeCapacity>, Report<QuotaError>>;

    /// Current hard quota of `target`, `None` when the object does not exist.
    async fn get_quota(
        &self,
        target: &QuotaTarget,
    ) -> Result<Option<QuotaSnapshot>, Report<QuotaError>>;

    /// Replaces the hard quota of `target`. When `resource_version` is given
    /// the write fails with [`QuotaError::Conflict`] if the object changed.
    async fn patch_quota(
        &self,
        target: &QuotaTarget,
        hard: &ResourceMap,
        resource_version: Option<&str>,
    ) -> Result<(), Report<QuotaError>>;

    /// Writes the status subresource of the named configuration object.
    async fn persist_status(
        &self,
        config: &str,
        status: &NodeQuotaConfigStatus,
    ) -> Result<(), Report<QuotaError>>;
}

/// Trait for getting current time
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
