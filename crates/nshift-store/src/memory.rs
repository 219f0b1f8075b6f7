use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use nshift_domain::{AuditEntry, CanonicalResourceId, ExecutionRecord, ResourceKind, ScheduleId, TenantId};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::HistoryStore;
use crate::ttl::LockSentinel;

#[derive(Debug, Default)]
struct Inner {
    executions: Vec<ExecutionRecord>,
    audit: Vec<AuditEntry>,
    locks: HashMap<ScheduleId, LockSentinel>,
}

/// In-memory implementation of [`HistoryStore`].
///
/// All data is lost on process exit. Suitable for tests and the
/// `nshift-cli bootstrap --ephemeral` path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.executions.push(record.clone());
        Ok(())
    }

    async fn list_executions(
        &self,
        schedule_id: &ScheduleId,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let guard = self.inner.read().await;
        let mut matching: Vec<ExecutionRecord> = guard
            .executions
            .iter()
            .filter(|e| &e.schedule_id == schedule_id && &e.tenant_id == tenant_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.start_instant.cmp(&a.start_instant));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn last_stopped_state(
        &self,
        schedule_id: &ScheduleId,
        tenant_id: &TenantId,
        canonical_id: &CanonicalResourceId,
        kind: ResourceKind,
        scan_depth: u32,
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let recent = self.list_executions(schedule_id, tenant_id, scan_depth).await?;
        Ok(find_last_stopped_state(&recent, canonical_id, kind))
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.audit.push(entry.clone());
        Ok(())
    }

    async fn list_audit(
        &self,
        schedule_id: Option<&ScheduleId>,
        limit: u32,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let guard = self.inner.read().await;
        let filtered: Vec<AuditEntry> = guard
            .audit
            .iter()
            .filter(|e| schedule_id.map_or(true, |sid| e.schedule_id.as_ref() == Some(sid)))
            .cloned()
            .collect();
        let start = filtered.len().saturating_sub(limit as usize);
        Ok(filtered[start..].to_vec())
    }

    async fn try_acquire_lock(
        &self,
        schedule_id: &ScheduleId,
        holder: &str,
        lease: chrono::Duration,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut guard = self.inner.write().await;
        if let Some(existing) = guard.locks.get(schedule_id) {
            if !existing.is_expired(now) {
                return Err(StoreError::LockConflict { holder: existing.holder.clone() });
            }
        }
        guard.locks.insert(schedule_id.clone(), LockSentinel::new(holder, now, lease));
        Ok(())
    }

    async fn release_lock(&self, schedule_id: &ScheduleId, holder: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if let Some(existing) = guard.locks.get(schedule_id) {
            if existing.holder == holder {
                guard.locks.remove(schedule_id);
            }
        }
        Ok(())
    }
}

/// Shared by the in-memory and redb backends: scans executions newest-first
/// for the most recent successful stop result matching `canonical_id`/`kind`.
pub(crate) fn find_last_stopped_state(
    executions: &[ExecutionRecord],
    canonical_id: &CanonicalResourceId,
    kind: ResourceKind,
) -> Option<serde_json::Value> {
    use nshift_domain::{ActionKind, Outcome};

    for execution in executions {
        if let Some(results) = execution.results_by_kind.get(kind.audit_category_segment()) {
            for result in results {
                if result.action == ActionKind::Stop
                    && result.outcome == Outcome::Success
                    && &result.canonical_id == canonical_id
                {
                    return Some(result.prior_state.clone());
                }
            }
        }
    }
    None
}
