//! Entitlement of a node group derived from the node inventory.

use std::collections::BTreeMap;
use std::fmt;

use api_types::NodeGroup;
use error_stack::Report;

use crate::domain::error::QuotaError;
use crate::domain::resources::ResourceKinds;
use crate::domain::resources::ResourceMap;

/// Equality-based label selector. Every pair must be present on a node; an
/// empty selector matches every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self(labels)
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

/// A node as seen by the capacity calculator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeCapacity {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub allocatable: ResourceMap,
}

/// A node group spec with its quantities parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeGroupPlan {
    pub name: String,
    pub selector: LabelSelector,
    pub multipliers: BTreeMap<String, f64>,
    pub system_claim: Option<ResourceMap>,
}

impl NodeGroupPlan {
    pub fn from_spec(group: &NodeGroup) -> Result<Self, Report<QuotaError>> {
        let system_claim = group
            .system_resource_claim
            .as_ref()
            .map(ResourceMap::from_quantities)
            .transpose()
            .map_err(|report| {
                report.attach_printable(format!("system resource claim of node group {}", group.name))
            })?;

        Ok(Self {
            name: group.name.clone(),
            selector: LabelSelector::new(group.label_selector.clone()),
            multipliers: group.multipliers.clone(),
            system_claim,
        })
    }
}

/// Computes what a node group is entitled to: the multiplied allocatable
/// capacity of its nodes, minus the system claim, restricted to `controlled`.
///
/// The result may hold negative amounts when the system claim exceeds the
/// selected capacity.
pub fn compute_entitlement(
    nodes: &[NodeCapacity],
    plan: &NodeGroupPlan,
    controlled: &ResourceKinds,
) -> ResourceMap {
    let selected = nodes
        .iter()
        .filter(|node| plan.selector.matches(&node.labels))
        .map(|node| node.allocatable.multiply(&plan.multipliers))
        .reduce(|total, node| total.merge(&node));

    let Some(total) = selected else {
        return ResourceMap::new();
    };

    let total = match &plan.system_claim {
        Some(claim) => total.subtract(claim),
        None => total,
    };
    total.filter_to(controlled)
}
