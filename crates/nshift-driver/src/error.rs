use nshift_domain::ResourceKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver not configured for resource kind: {0}")]
    DriverNotConfigured(ResourceKind),

    #[error("credential acquisition failed for account {account_id} region {region}: {cause}")]
    CredentialAcquisitionFailed {
        account_id: String,
        region: String,
        cause: String,
    },

    #[error("describe failed: {0}")]
    ResourceDescribeFailed(String),

    #[error("mutate failed: {0}")]
    ResourceMutateFailed(String),

    #[error("cluster idleness check failed: {0}")]
    ClusterIdlenessCheckFailed(String),

    #[error("internal driver error: {0}")]
    Internal(String),
}
