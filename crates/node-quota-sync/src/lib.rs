//! Keeps HNS subnamespace quotas in line with the capacity of the nodes that
//! back them, deferring reductions through a reservation ledger.

pub mod config;
pub mod domain;
pub mod infrastructure;

pub use domain::PassOutcome;
pub use domain::QuotaError;
pub use domain::QuotaSync;
