//! Shared API type definitions
//!
//! This crate contains the custom resource definitions read and written by the
//! node quota sync controller: the `NodeQuotaConfig` resource it reconciles and
//! a client-side binding for the HNS `Subnamespace` resource whose quota it
//! patches.

mod node_quota_config;
mod subnamespace;
mod validate;

pub use node_quota_config::GraceClock;
pub use node_quota_config::NodeGroup;
pub use node_quota_config::NodeQuotaConfig;
pub use node_quota_config::NodeQuotaConfigSpec;
pub use node_quota_config::NodeQuotaConfigStatus;
pub use node_quota_config::ReservedResources;
pub use node_quota_config::RootGroup;
pub use subnamespace::Subnamespace;
pub use subnamespace::SubnamespaceSpec;
pub use validate::ConfigValidationError;
pub use validate::MAX_HOURS_TO_LIVE;
