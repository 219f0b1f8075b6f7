use async_trait::async_trait;
use nshift_domain::{AuditEntry, CanonicalResourceId, ExecutionRecord, ResourceKind, ScheduleId, TenantId};

use crate::error::StoreError;

/// History Store + Audit Log Writer.
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    /// Persists an ExecutionRecord. Records are immutable once complete.
    async fn append_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    /// Executions in descending start-time order.
    async fn list_executions(
        &self,
        schedule_id: &ScheduleId,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;

    /// Scans up to the most recent `scan_depth` executions (>= 10) and
    /// returns the `prior_state` from the most recent successful stop result
    /// whose canonical id matches, or `None` if none is found.
    async fn last_stopped_state(
        &self,
        schedule_id: &ScheduleId,
        tenant_id: &TenantId,
        canonical_id: &CanonicalResourceId,
        kind: ResourceKind,
        scan_depth: u32,
    ) -> Result<Option<serde_json::Value>, StoreError>;

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    async fn list_audit(
        &self,
        schedule_id: Option<&ScheduleId>,
        limit: u32,
    ) -> Result<Vec<AuditEntry>, StoreError>;

    /// Process-wide (or store-backed, for short-lived invocation
    /// environments) per-schedule mutual exclusion sentinel. Returns `Ok(())`
    /// on success, `Err(StoreError::LockConflict)` if already held.
    async fn try_acquire_lock(
        &self,
        schedule_id: &ScheduleId,
        holder: &str,
        lease: chrono::Duration,
    ) -> Result<(), StoreError>;

    async fn release_lock(&self, schedule_id: &ScheduleId, holder: &str) -> Result<(), StoreError>;
}
