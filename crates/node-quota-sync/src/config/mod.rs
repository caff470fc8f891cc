pub mod cli;

use std::time::Duration;

/// Requeue timing handed from the CLI to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    /// Upper bound between two passes over the same configuration.
    pub resync_interval: Duration,
    /// Delay before retrying a failed or partially failed pass.
    pub error_requeue: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(300),
            error_requeue: Duration::from_secs(30),
        }
    }
}

impl From<&cli::RunArgs> for ReconcileSettings {
    fn from(args: &cli::RunArgs) -> Self {
        Self {
            resync_interval: Duration::from_secs(args.resync_interval_secs.max(1)),
            error_requeue: Duration::from_secs(args.error_requeue_secs.max(1)),
        }
    }
}

pub use cli::*;
