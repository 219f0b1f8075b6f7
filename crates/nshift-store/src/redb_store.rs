use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use nshift_domain::{AuditEntry, CanonicalResourceId, ExecutionRecord, ResourceKind, ScheduleId, TenantId};
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;
use crate::memory::find_last_stopped_state;
use crate::store::HistoryStore;
use crate::ttl::LockSentinel;

const EXECUTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("executions");
const AUDIT: TableDefinition<u64, &[u8]> = TableDefinition::new("audit");
const LOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("locks");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

fn internal(e: impl std::fmt::Display) -> StoreError {
    StoreError::Internal(e.to_string())
}

/// `(tenantId, scheduleId)` is the primary partition; the reverse-timestamp
/// prefix makes an ascending key scan yield newest-first, satisfying the
/// §4.8 storage invariant without a secondary index.
fn execution_key(record: &ExecutionRecord) -> String {
    let reverse_ts = (i64::MAX - record.start_instant.timestamp_millis()).max(0);
    format!(
        "{}|{}|{:020}|{}",
        record.tenant_id.as_str(),
        record.schedule_id.as_str(),
        reverse_ts,
        record.execution_id
    )
}

fn execution_prefix(tenant_id: &TenantId, schedule_id: &ScheduleId) -> String {
    format!("{}|{}|", tenant_id.as_str(), schedule_id.as_str())
}

/// Persistent store backed by a redb database file.
///
/// Survives process restarts. Used by `nshift-cli serve` unless
/// `--ephemeral` is passed.
#[derive(Clone)]
pub struct RedbHistoryStore {
    db: Arc<Database>,
}

impl RedbHistoryStore {
    /// Open (or create) a redb database at `path`. Parent directories are
    /// created automatically.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(internal)?;
        }
        let db = Database::create(path).map_err(internal)?;

        {
            let wtxn = db.begin_write().map_err(internal)?;
            wtxn.open_table(EXECUTIONS).map_err(internal)?;
            wtxn.open_table(AUDIT).map_err(internal)?;
            wtxn.open_table(LOCKS).map_err(internal)?;
            wtxn.open_table(META).map_err(internal)?;
            wtxn.commit().map_err(internal)?;
        }

        Ok(Self { db: Arc::new(db) })
    }
}

#[async_trait]
impl HistoryStore for RedbHistoryStore {
    async fn append_execution(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        let key = execution_key(record);
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(EXECUTIONS).map_err(internal)?;
            table.insert(key.as_str(), bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn list_executions(
        &self,
        schedule_id: &ScheduleId,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let prefix = execution_prefix(tenant_id, schedule_id);
        let now = Utc::now();
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(EXECUTIONS).map_err(internal)?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(internal)? {
            let (k, v) = entry.map_err(internal)?;
            if !k.value().starts_with(&prefix) {
                break;
            }
            let record: ExecutionRecord = serde_json::from_slice(v.value())?;
            if record.ttl > now {
                results.push(record);
            }
            if results.len() >= limit as usize {
                break;
            }
        }
        Ok(results)
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
        let bytes = serde_json::to_vec(entry)?;
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut meta = wtxn.open_table(META).map_err(internal)?;
            let seq = meta.get("audit_seq").map_err(internal)?.map(|g| g.value()).unwrap_or(0);
            let new_seq = seq + 1;
            meta.insert("audit_seq", new_seq).map_err(internal)?;

            let mut audit = wtxn.open_table(AUDIT).map_err(internal)?;
            audit.insert(new_seq, bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn list_audit(
        &self,
        schedule_id: Option<&ScheduleId>,
        limit: u32,
    ) -> Result<Vec<AuditEntry>, StoreError> {
        let now = Utc::now();
        let rtxn = self.db.begin_read().map_err(internal)?;
        let table = rtxn.open_table(AUDIT).map_err(internal)?;
        let mut all = Vec::new();
        for entry in table.iter().map_err(internal)? {
            let (_k, v) = entry.map_err(internal)?;
            let event: AuditEntry = serde_json::from_slice(v.value())?;
            if event.ttl <= now {
                continue;
            }
            match schedule_id {
                Some(sid) if event.schedule_id.as_ref() != Some(sid) => continue,
                _ => all.push(event),
            }
        }
        let start = all.len().saturating_sub(limit as usize);
        Ok(all[start..].to_vec())
    }

    async fn try_acquire_lock(
        &self,
        schedule_id: &ScheduleId,
        holder: &str,
        lease: chrono::Duration,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(LOCKS).map_err(internal)?;
            if let Some(existing) = table.get(schedule_id.as_str()).map_err(internal)? {
                let sentinel: LockSentinel = serde_json::from_slice(existing.value())?;
                if !sentinel.is_expired(now) {
                    return Err(StoreError::LockConflict { holder: sentinel.holder });
                }
            }
            let sentinel = LockSentinel::new(holder, now, lease);
            let bytes = serde_json::to_vec(&sentinel)?;
            table.insert(schedule_id.as_str(), bytes.as_slice()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }

    async fn release_lock(&self, schedule_id: &ScheduleId, holder: &str) -> Result<(), StoreError> {
        let wtxn = self.db.begin_write().map_err(internal)?;
        {
            let mut table = wtxn.open_table(LOCKS).map_err(internal)?;
            if let Some(existing) = table.get(schedule_id.as_str()).map_err(internal)? {
                let sentinel: LockSentinel = serde_json::from_slice(existing.value())?;
                if sentinel.holder != holder {
                    return Ok(());
                }
            } else {
                return Ok(());
            }
            table.remove(schedule_id.as_str()).map_err(internal)?;
        }
        wtxn.commit().map_err(internal)?;
        Ok(())
    }
}
