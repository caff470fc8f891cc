use k8s_openapi::api::core::v1::ResourceQuotaSpec;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// Client-side binding for the HNS `Subnamespace` resource.
///
/// Only the quota part of the spec is modelled; the controller never creates
/// subnamespaces, it only patches `spec.resourcequota.hard`.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "dana.hns.io",
    version = "v1",
    kind = "Subnamespace",
    plural = "subnamespaces",
    namespaced
)]
pub struct SubnamespaceSpec {
    #[serde(
        default,
        rename = "resourcequota",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_quota: Option<ResourceQuotaSpec>,
}
