use async_trait::async_trait;
use nshift_domain::{ActionKind, ResourceActionResult, ResourceKind, ResourceReference, Schedule, SessionCredentials};

use crate::error::DriverError;

/// Resource Driver Interface.
///
/// One implementation per [`ResourceKind`], registered in a [`crate::registry::DriverRegistry`].
/// `action` is always `Start` or `Stop` — the orchestrator never calls
/// `process` with `Skip`; a driver produces `Skip` itself as a possible
/// outcome when the remote state already matches the intended action.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    fn kind(&self) -> ResourceKind;

    /// `meta` carries orchestrator-supplied context the canonical id alone
    /// doesn't encode (e.g. an explicit cluster id when
    /// `resource.parent_container_id` is absent). `prior_state` is the
    /// History Store's `lastStoppedState` result, present only for `start`.
    async fn process(
        &self,
        resource: &ResourceReference,
        schedule: &Schedule,
        action: ActionKind,
        creds: &SessionCredentials,
        meta: &serde_json::Value,
        prior_state: Option<&serde_json::Value>,
    ) -> Result<ResourceActionResult, DriverError>;
}
