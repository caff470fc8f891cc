use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

/// Desired state of a `NodeQuotaConfig`.
///
/// The resource is cluster scoped: one object describes any number of root
/// namespaces, each backed by one or more node groups.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "dana.hns.io",
    version = "v1alpha1",
    kind = "NodeQuotaConfig",
    plural = "nodequotaconfigs",
    shortname = "nqc",
    status = "NodeQuotaConfigStatus",
    printcolumn = r#"{"name":"TTL", "type":"integer", "jsonPath":".spec.reservedHoursToLive"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeQuotaConfigSpec {
    /// Grace period, in hours, before a deferred quota reduction is enforced.
    pub reserved_hours_to_live: i64,
    /// Resource kinds managed by the controller. Any other kind found on a
    /// namespace quota is left untouched.
    #[serde(default)]
    pub controlled_resources: Vec<String>,
    #[serde(default)]
    pub roots: Vec<RootGroup>,
    /// Whether a deeper shrink during an active grace period restarts its clock.
    #[serde(default)]
    pub grace_clock: GraceClock,
}

/// A root namespace and the node groups that roll up into it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RootGroup {
    pub root_namespace: String,
    /// Subnamespaces of the root, one per node group.
    #[serde(default)]
    pub secondary_roots: Vec<NodeGroup>,
}

/// A set of nodes selected by labels whose capacity backs one subnamespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroup {
    /// Name of the subnamespace backed by this group.
    pub name: String,
    /// Labels a node must carry, all of them, to belong to the group.
    #[serde(default)]
    pub label_selector: BTreeMap<String, String>,
    /// Per resource kind factor applied to each node's allocatable capacity.
    /// Kinds without a factor pass through unchanged.
    #[serde(default, deserialize_with = "deserialize_multipliers")]
    #[schemars(with = "BTreeMap<String, f64>")]
    pub multipliers: BTreeMap<String, f64>,
    /// Fixed amount withheld from the group's total for system workloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_resource_claim: Option<BTreeMap<String, Quantity>>,
}

/// Policy for the grace period clock of an already recorded reservation.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum GraceClock {
    /// A deeper shrink records a fresh reservation with a new timestamp.
    #[default]
    Restart,
    /// The original timestamp is kept for as long as the reservation lives.
    Preserve,
}

/// Observed state of a `NodeQuotaConfig`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeQuotaConfigStatus {
    #[serde(default)]
    pub reserved_resources: Vec<ReservedResources>,
}

/// Quota debt of a node group, tolerated until its grace period expires.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReservedResources {
    pub node_group: String,
    #[serde(default)]
    pub resources: BTreeMap<String, Quantity>,
    #[serde(default, alias = "Timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Time>,
}

/// Accepts multipliers written either as JSON numbers or as numeric strings.
fn deserialize_multipliers<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
    }

    BTreeMap::<String, StringOrFloat>::deserialize(deserializer)?
        .into_iter()
        .map(|(resource, value)| match value {
            StringOrFloat::Float(f) => Ok((resource, f)),
            StringOrFloat::String(s) => s.trim().parse::<f64>().map(|f| (resource, f)).map_err(|e| {
                serde::de::Error::custom(format!("Failed to parse float from string '{s}': {e}"))
            }),
        })
        .collect()
}
