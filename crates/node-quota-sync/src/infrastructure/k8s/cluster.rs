use api_types::NodeQuotaConfig;
use api_types::NodeQuotaConfigStatus;
use api_types::Subnamespace;
use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::ResourceQuota;
use kube::api::ListParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::Api;
use kube::Client;
use kube::ResourceExt;
use serde_json::json;
use serde_json::Value;

use crate::domain::capacity::NodeCapacity;
use crate::domain::error::QuotaError;
use crate::domain::resources::ResourceMap;
use crate::domain::traits::QuotaCluster;
use crate::domain::traits::QuotaSnapshot;
use crate::domain::traits::QuotaTarget;

/// [`QuotaCluster`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    field_manager: String,
}

impl KubeCluster {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

fn node_capacity(node: Node) -> Result<NodeCapacity, Report<QuotaError>> {
    let name = node.name_any();
    let allocatable = node
        .status
        .and_then(|status| status.allocatable)
        .unwrap_or_default();
    let allocatable = ResourceMap::from_quantities(&allocatable)
        .attach_printable_lazy(|| format!("allocatable of node {name}"))?;

    Ok(NodeCapacity {
        labels: node.metadata.labels.unwrap_or_default(),
        name,
        allocatable,
    })
}

/// JSON merge patch body replacing the hard quota found at `path`.
fn hard_quota_patch(path: &[&str], hard: &ResourceMap, resource_version: Option<&str>) -> Value {
    let mut body = json!({ "hard": hard.to_quantities() });
    for key in path.iter().rev() {
        body = json!({ *key: body });
    }
    if let (Some(version), Value::Object(map)) = (resource_version, &mut body) {
        map.insert(
            "metadata".to_string(),
            json!({ "resourceVersion": version }),
        );
    }
    body
}

fn patch_error(target: &QuotaTarget, error: &kube::Error) -> QuotaError {
    match error {
        kube::Error::Api(response) if response.code == 409 => QuotaError::Conflict {
            target: target.to_string(),
        },
        _ => QuotaError::QuotaPatch {
            target: target.to_string(),
        },
    }
}

#[async_trait]
impl QuotaCluster for KubeCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeCapacity>, Report<QuotaError>> {
        let nodes = Api::<Node>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .change_context(QuotaError::InventoryRead)?;

        nodes
            .items
            .into_iter()
            .map(|node| node_capacity(node).change_context(QuotaError::InventoryRead))
            .collect()
    }

    async fn get_quota(
        &self,
        target: &QuotaTarget,
    ) -> Result<Option<QuotaSnapshot>, Report<QuotaError>> {
        let read_error = || QuotaError::QuotaRead {
            target: target.to_string(),
        };

        let found = match target {
            QuotaTarget::Group { root, name } => {
                Api::<Subnamespace>::namespaced(self.client.clone(), root)
                    .get_opt(name)
                    .await
                    .change_context_lazy(read_error)?
                    .map(|sns| {
                        let hard = sns
                            .spec
                            .resource_quota
                            .and_then(|quota| quota.hard)
                            .unwrap_or_default();
                        (hard, sns.metadata.resource_version)
                    })
            }
            QuotaTarget::Root { name } => {
                Api::<ResourceQuota>::namespaced(self.client.clone(), name)
                    .get_opt(name)
                    .await
                    .change_context_lazy(read_error)?
                    .map(|quota| {
                        let hard = quota.spec.and_then(|spec| spec.hard).unwrap_or_default();
                        (hard, quota.metadata.resource_version)
                    })
            }
        };

        let Some((hard, resource_version)) = found else {
            return Ok(None);
        };
        let hard = ResourceMap::from_quantities(&hard).change_context_lazy(read_error)?;
        Ok(Some(QuotaSnapshot {
            hard,
            resource_version,
        }))
    }

    async fn patch_quota(
        &self,
        target: &QuotaTarget,
        hard: &ResourceMap,
        resource_version: Option<&str>,
    ) -> Result<(), Report<QuotaError>> {
        let params = self.patch_params();
        let result = match target {
            QuotaTarget::Group { root, name } => {
                let body = hard_quota_patch(&["spec", "resourcequota"], hard, resource_version);
                Api::<Subnamespace>::namespaced(self.client.clone(), root)
                    .patch(name, &params, &Patch::Merge(&body))
                    .await
                    .map(|_| ())
            }
            QuotaTarget::Root { name } => {
                let body = hard_quota_patch(&["spec"], hard, resource_version);
                Api::<ResourceQuota>::namespaced(self.client.clone(), name)
                    .patch(name, &params, &Patch::Merge(&body))
                    .await
                    .map(|_| ())
            }
        };

        result.map_err(|error| {
            let context = patch_error(target, &error);
            Report::new(error).change_context(context)
        })
    }

    async fn persist_status(
        &self,
        config: &str,
        status: &NodeQuotaConfigStatus,
    ) -> Result<(), Report<QuotaError>> {
        let body = json!({ "status": status });
        Api::<NodeQuotaConfig>::all(self.client.clone())
            .patch_status(config, &self.patch_params(), &Patch::Merge(&body))
            .await
            .change_context_lazy(|| QuotaError::StatusPersist {
                config: config.to_string(),
            })?;
        Ok(())
    }
}
