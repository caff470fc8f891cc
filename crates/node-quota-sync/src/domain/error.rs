use core::error::Error;

/// Errors that can occur while reconciling quotas.
#[derive(Debug, derive_more::Display)]
pub enum QuotaError {
    #[display("Failed to read the node inventory")]
    InventoryRead,
    #[display("Failed to read quota of {target}")]
    QuotaRead { target: String },
    #[display("Failed to patch quota of {target}")]
    QuotaPatch { target: String },
    #[display("Quota of {target} was modified since it was read")]
    Conflict { target: String },
    #[display("Failed to persist status of NodeQuotaConfig {config}")]
    StatusPersist { config: String },
    #[display("Invalid quantity for resource `{resource}`")]
    InvalidQuantity { resource: String },
    #[display("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl Error for QuotaError {}
