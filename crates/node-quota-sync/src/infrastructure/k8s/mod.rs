//! Kubernetes integration module.
//!
//! [`KubeCluster`] implements the cluster operations of a reconciliation pass
//! against the API server: nodes, HNS subnamespaces, root `ResourceQuota`
//! objects and the `NodeQuotaConfig` status subresource.

pub mod cluster;
pub mod types;

pub use cluster::KubeCluster;
pub use types::KubernetesError;
