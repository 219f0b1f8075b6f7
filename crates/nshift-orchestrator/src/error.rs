use thiserror::Error;

/// Only `ScheduleNotFound` ever escapes `full_scan`/`partial_scan`. The
/// `Config`/`Store` variants exist so the entry points can use `?`
/// against the one config lookup each performs before a scan begins; once a
/// schedule list is resolved, no further config or store error is allowed to
/// propagate — those are captured per-resource or logged and the scan
/// degrades instead.
#[derive(Debug, Error)]
pub enum OrchestrateError {
    #[error("schedule not found")]
    ScheduleNotFound,

    #[error("config error: {0}")]
    Config(#[from] nshift_config::ConfigError),

    #[error("store error: {0}")]
    Store(#[from] nshift_store::StoreError),
}
