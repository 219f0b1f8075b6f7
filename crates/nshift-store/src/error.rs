use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),

    /// Returned when the per-schedule sentinel lock is already held by
    /// another holder (the degraded, store-backed compare-and-swap path
    /// used for short-lived invocation environments without a shared process).
    #[error("schedule lock conflict: already held by {holder}")]
    LockConflict { holder: String },
}
