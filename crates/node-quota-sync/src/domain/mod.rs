pub mod capacity;
pub mod error;
pub mod ledger;
pub mod mock;
pub mod quantity;
pub mod reconciler;
pub mod resources;
pub mod traits;

// Re-export the types a pass is driven with
pub use error::QuotaError;
pub use reconciler::PassOutcome;
pub use reconciler::QuotaSync;
pub use traits::QuotaCluster;
pub use traits::TimeSource;
