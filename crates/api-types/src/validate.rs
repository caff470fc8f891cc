use std::collections::BTreeSet;

use thiserror::Error;

use crate::NodeQuotaConfigSpec;

/// Longest accepted grace period, one hundred years.
pub const MAX_HOURS_TO_LIVE: i64 = 876_000;

/// A problem found in a `NodeQuotaConfig` spec before any reconciliation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    #[error("reservedHoursToLive must not be negative, got {0}")]
    NegativeHoursToLive(i64),

    #[error("reservedHoursToLive must be at most {MAX_HOURS_TO_LIVE}, got {0}")]
    HoursToLiveTooLarge(i64),

    #[error("controlledResources must list at least one resource kind")]
    NoControlledResources,

    #[error("root namespace `{0}` is declared more than once")]
    DuplicateRoot(String),

    #[error("node group `{0}` is declared more than once")]
    DuplicateNodeGroup(String),

    #[error("node group in root `{0}` has an empty name")]
    EmptyNodeGroupName(String),

    #[error("multiplier for `{resource}` in node group `{group}` must be finite and not negative, got {value}")]
    InvalidMultiplier {
        group: String,
        resource: String,
        value: f64,
    },
}

impl NodeQuotaConfigSpec {
    /// Checks the spec for mistakes that would make a reconciliation pass
    /// meaningless. All problems are reported, not only the first one.
    ///
    /// Node group names must be unique across all roots because reservations
    /// are keyed by group name.
    pub fn validate(&self) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        if self.reserved_hours_to_live < 0 {
            errors.push(ConfigValidationError::NegativeHoursToLive(
                self.reserved_hours_to_live,
            ));
        } else if self.reserved_hours_to_live > MAX_HOURS_TO_LIVE {
            errors.push(ConfigValidationError::HoursToLiveTooLarge(
                self.reserved_hours_to_live,
            ));
        }
        if self.controlled_resources.is_empty() {
            errors.push(ConfigValidationError::NoControlledResources);
        }

        let mut roots = BTreeSet::new();
        let mut groups = BTreeSet::new();
        for root in &self.roots {
            if !roots.insert(root.root_namespace.as_str()) {
                errors.push(ConfigValidationError::DuplicateRoot(
                    root.root_namespace.clone(),
                ));
            }
            for group in &root.secondary_roots {
                if group.name.is_empty() {
                    errors.push(ConfigValidationError::EmptyNodeGroupName(
                        root.root_namespace.clone(),
                    ));
                    continue;
                }
                if !groups.insert(group.name.as_str()) {
                    errors.push(ConfigValidationError::DuplicateNodeGroup(group.name.clone()));
                }
                for (resource, value) in &group.multipliers {
                    if !value.is_finite() || *value < 0.0 {
                        errors.push(ConfigValidationError::InvalidMultiplier {
                            group: group.name.clone(),
                            resource: resource.clone(),
                            value: *value,
                        });
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
