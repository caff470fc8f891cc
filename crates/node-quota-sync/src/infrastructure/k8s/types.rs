use core::error::Error;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("NodeQuotaConfig CRD is not queryable, is it installed?")]
    CrdNotInstalled,
}

impl Error for KubernetesError {}
