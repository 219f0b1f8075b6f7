use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use nshift_config::ConfigStore;
use nshift_domain::{
    Account, AccountId, ActionKind, ActorKind, AuditEntry, ExecutionCounts, ExecutionRecord,
    ExecutionStatus, Outcome, ResourceActionResult, ResourceReference, Schedule, ScheduleId,
    Severity, SessionCredentials, TenantId, TriggerSource,
};
use nshift_driver::{in_window, CredentialBroker, DriverRegistry};
use nshift_store::HistoryStore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::OrchestrateError;
use crate::lock::ScheduleLockRegistry;
use crate::report::{ScanMode, ScanOutcome};

/// Scans at least this many recent executions for `lastStoppedState`.
const LAST_STOPPED_SCAN_DEPTH: u32 = 10;

const DEFAULT_SCAN_DEADLINE: StdDuration = StdDuration::from_secs(300);

/// Scheduler Orchestrator. Fans out schedule → account → region in parallel,
/// serializing resource processing within each region group; isolates each
/// resource's failure via `continue` so one bad resource never aborts a scan,
/// and appends a single summary record per schedule at the end.
pub struct Orchestrator {
    config: Arc<ConfigStore>,
    store: Arc<dyn HistoryStore>,
    drivers: Arc<DriverRegistry>,
    credentials: Arc<CredentialBroker>,
    locks: ScheduleLockRegistry,
    deadline: StdDuration,
}

impl Orchestrator {
    pub fn new(
        config: Arc<ConfigStore>,
        store: Arc<dyn HistoryStore>,
        drivers: Arc<DriverRegistry>,
        credentials: Arc<CredentialBroker>,
    ) -> Self {
        Self {
            config,
            store,
            drivers,
            credentials,
            locks: ScheduleLockRegistry::new(),
            deadline: DEFAULT_SCAN_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: StdDuration) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn full_scan(&self, trigger_source: TriggerSource) -> Result<ScanOutcome, OrchestrateError> {
        let schedules = self.config.active_schedules(None)?;
        Ok(self.run(ScanMode::Full, schedules, trigger_source, None).await)
    }

    pub async fn partial_scan(
        &self,
        schedule_id: &ScheduleId,
        tenant_id: &TenantId,
        trigger_source: TriggerSource,
        actor_identity: Option<String>,
    ) -> Result<ScanOutcome, OrchestrateError> {
        let schedule = match self.config.schedule(schedule_id, tenant_id)? {
            Some(s) => s,
            None => {
                let entry = schedule_not_found_audit(schedule_id, tenant_id, actor_identity.as_deref());
                if let Err(e) = self.store.append_audit(&entry).await {
                    warn!(error = %e, "failed to write schedule-not-found audit entry");
                }
                return Err(OrchestrateError::ScheduleNotFound);
            }
        };
        Ok(self.run(ScanMode::Partial, vec![schedule], trigger_source, actor_identity).await)
    }

    async fn run(
        &self,
        mode: ScanMode,
        schedules: Vec<Schedule>,
        trigger_source: TriggerSource,
        actor_identity: Option<String>,
    ) -> ScanOutcome {
        let scan_id = Uuid::new_v4();
        let now = Utc::now();

        let token = CancellationToken::new();
        let deadline_token = token.clone();
        let deadline = self.deadline;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            deadline_token.cancel();
        });

        let accounts: HashMap<String, Account> = match self.config.active_accounts() {
            Ok(accounts) => accounts.into_iter().map(|a| (a.id.as_str().to_string(), a)).collect(),
            Err(e) => {
                warn!(error = %e, "failed to load active accounts; scan proceeding with no accounts resolvable");
                HashMap::new()
            }
        };
        let accounts = Arc::new(accounts);

        let mut set = JoinSet::new();
        for schedule in schedules {
            let store = self.store.clone();
            let drivers = self.drivers.clone();
            let credentials = self.credentials.clone();
            let accounts = accounts.clone();
            let locks = self.locks.clone();
            let actor_identity = actor_identity.clone();
            let token = token.clone();
            set.spawn(async move {
                process_schedule(
                    schedule,
                    now,
                    trigger_source,
                    actor_identity,
                    store,
                    drivers,
                    credentials,
                    accounts,
                    locks,
                    token,
                )
                .await
            });
        }

        let mut totals = ExecutionCounts::default();
        let mut schedules_processed = 0u32;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(counts)) => {
                    schedules_processed += 1;
                    totals.started += counts.started;
                    totals.stopped += counts.stopped;
                    totals.failed += counts.failed;
                    totals.skipped += counts.skipped;
                }
                Ok(None) => {
                    // already in progress elsewhere — not counted as processed
                }
                Err(e) => warn!(error = %e, "schedule scan task panicked"),
            }
        }
        timer.abort();

        let duration_ms = (Utc::now() - now).num_milliseconds().max(0);
        ScanOutcome {
            success: totals.failed == 0,
            execution_id: scan_id,
            mode,
            schedules_processed,
            resources_started: totals.started,
            resources_stopped: totals.stopped,
            resources_failed: totals.failed,
            duration_ms,
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_schedule(
    schedule: Schedule,
    now: chrono::DateTime<Utc>,
    trigger_source: TriggerSource,
    actor_identity: Option<String>,
    store: Arc<dyn HistoryStore>,
    drivers: Arc<DriverRegistry>,
    credentials: Arc<CredentialBroker>,
    accounts: Arc<HashMap<String, Account>>,
    locks: ScheduleLockRegistry,
    token: CancellationToken,
) -> Option<ExecutionCounts> {
    let guard = match locks.try_acquire(&schedule.id) {
        Some(g) => g,
        None => {
            info!(schedule_id = %schedule.id, "schedule scan already in progress, skipping");
            return None;
        }
    };

    if schedule.resources.is_empty() {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            category: "scheduler.schedule.empty".into(),
            action: "scan".into(),
            actor_identity: actor_identity.unwrap_or_else(|| "system".into()),
            actor_kind: ActorKind::System,
            resource_kind: None,
            resource_id: None,
            outcome: Outcome::Success,
            severity: Severity::Info,
            detail: format!("schedule {} has no resources", schedule.id),
            metadata: serde_json::json!({}),
            schedule_id: Some(schedule.id.clone()),
            ttl: Utc::now() + chrono::Duration::days(90),
        };
        if let Err(e) = store.append_audit(&entry).await {
            warn!(error = %e, "failed to write empty-schedule audit entry");
        }
        drop(guard);
        return Some(ExecutionCounts::default());
    }

    let action = if in_window(&schedule, now) { ActionKind::Start } else { ActionKind::Stop };
    let schedule = Arc::new(schedule);

    let mut by_account: HashMap<String, Vec<ResourceReference>> = HashMap::new();
    for resource in schedule.resources.clone() {
        by_account.entry(resource.canonical_id.account_id().to_string()).or_default().push(resource);
    }

    let mut set = JoinSet::new();
    for (account_id, resources) in by_account {
        let schedule = schedule.clone();
        let accounts = accounts.clone();
        let drivers = drivers.clone();
        let credentials = credentials.clone();
        let store = store.clone();
        let token = token.clone();
        set.spawn(async move {
            process_account(schedule, account_id, resources, action, trigger_source, accounts, drivers, credentials, store, token)
                .await
        });
    }

    let mut totals = ExecutionCounts::default();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(counts) => {
                totals.started += counts.started;
                totals.stopped += counts.stopped;
                totals.failed += counts.failed;
                totals.skipped += counts.skipped;
            }
            Err(e) => warn!(error = %e, "account group task panicked"),
        }
    }

    drop(guard);
    Some(totals)
}

#[allow(clippy::too_many_arguments)]
async fn process_account(
    schedule: Arc<Schedule>,
    account_id: String,
    resources: Vec<ResourceReference>,
    action: ActionKind,
    trigger_source: TriggerSource,
    accounts: Arc<HashMap<String, Account>>,
    drivers: Arc<DriverRegistry>,
    credentials: Arc<CredentialBroker>,
    store: Arc<dyn HistoryStore>,
    token: CancellationToken,
) -> ExecutionCounts {
    let start_instant = Utc::now();
    let mut results_by_kind: HashMap<String, Vec<ResourceActionResult>> = HashMap::new();
    let mut audits = Vec::new();
    let mut counts = ExecutionCounts::default();

    match accounts.get(&account_id) {
        None => {
            let cause = format!("account {} not found in active configuration", account_id);
            for resource in &resources {
                let result = ResourceActionResult::failed(resource.canonical_id.clone(), resource.id.clone(), action, cause.clone());
                counts.record(&result);
                audits.push(action_audit_entry(&result, resource, &schedule, Severity::High));
                results_by_kind.entry(resource.kind.audit_category_segment().to_string()).or_default().push(result);
            }
        }
        Some(account) => {
            let account = Arc::new(account.clone());
            let mut by_region: HashMap<String, Vec<ResourceReference>> = HashMap::new();
            for resource in resources {
                by_region.entry(resource.canonical_id.region().to_string()).or_default().push(resource);
            }

            let mut set = JoinSet::new();
            for (region, resources) in by_region {
                let schedule = schedule.clone();
                let account = account.clone();
                let drivers = drivers.clone();
                let credentials = credentials.clone();
                let store = store.clone();
                let token = token.clone();
                set.spawn(async move {
                    process_region(schedule, account, action, region, resources, drivers, credentials, store, token).await
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((region_results, mut region_audits, region_counts)) => {
                        for (kind, mut entries) in region_results {
                            results_by_kind.entry(kind).or_default().append(&mut entries);
                        }
                        audits.append(&mut region_audits);
                        counts.started += region_counts.started;
                        counts.stopped += region_counts.stopped;
                        counts.failed += region_counts.failed;
                        counts.skipped += region_counts.skipped;
                    }
                    Err(e) => warn!(error = %e, "region group task panicked"),
                }
            }
        }
    }

    let end_instant = Utc::now();

    for entry in &audits {
        if let Err(e) = store.append_audit(entry).await {
            warn!(error = %e, "failed to write per-action audit entry");
        }
    }

    if counts.total_non_skip() > 0 {
        let status = counts.status();
        let record = ExecutionRecord {
            execution_id: Uuid::new_v4(),
            schedule_id: schedule.id.clone(),
            tenant_id: schedule.tenant_id.clone(),
            account_id: AccountId::new(account_id),
            trigger_source,
            start_instant,
            end_instant,
            status,
            counts,
            results_by_kind,
            ttl: end_instant + chrono::Duration::days(30),
        };
        if let Err(e) = store.append_execution(&record).await {
            warn!(error = %e, "failed to persist execution record");
        }
        let summary = execution_summary_audit(&record);
        if let Err(e) = store.append_audit(&summary).await {
            warn!(error = %e, "failed to write execution summary audit entry");
        }
    }

    counts
}

type RegionOutcome = (HashMap<String, Vec<ResourceActionResult>>, Vec<AuditEntry>, ExecutionCounts);

#[allow(clippy::too_many_arguments)]
async fn process_region(
    schedule: Arc<Schedule>,
    account: Arc<Account>,
    action: ActionKind,
    region: String,
    resources: Vec<ResourceReference>,
    drivers: Arc<DriverRegistry>,
    credentials: Arc<CredentialBroker>,
    store: Arc<dyn HistoryStore>,
    token: CancellationToken,
) -> RegionOutcome {
    let mut results_by_kind: HashMap<String, Vec<ResourceActionResult>> = HashMap::new();
    let mut audits = Vec::new();
    let mut counts = ExecutionCounts::default();

    if token.is_cancelled() {
        for resource in &resources {
            record_deadline_exceeded(resource, action, &schedule, &mut results_by_kind, &mut audits, &mut counts);
        }
        return (results_by_kind, audits, counts);
    }

    let creds = match credentials.assume(&account, &region).await {
        Ok(c) => c,
        Err(e) => {
            let cause = e.to_string();
            for resource in &resources {
                let result = ResourceActionResult::failed(resource.canonical_id.clone(), resource.id.clone(), action, cause.clone());
                counts.record(&result);
                audits.push(action_audit_entry(&result, resource, &schedule, Severity::High));
                results_by_kind.entry(resource.kind.audit_category_segment().to_string()).or_default().push(result);
            }
            return (results_by_kind, audits, counts);
        }
    };

    for resource in &resources {
        if token.is_cancelled() {
            record_deadline_exceeded(resource, action, &schedule, &mut results_by_kind, &mut audits, &mut counts);
            continue;
        }
        let (result, mut audit) = process_resource(resource, &schedule, action, &creds, &drivers, store.as_ref()).await;
        counts.record(&result);
        audits.append(&mut audit);
        results_by_kind.entry(resource.kind.audit_category_segment().to_string()).or_default().push(result);
    }

    (results_by_kind, audits, counts)
}

async fn process_resource(
    resource: &ResourceReference,
    schedule: &Schedule,
    action: ActionKind,
    creds: &SessionCredentials,
    drivers: &DriverRegistry,
    store: &dyn HistoryStore,
) -> (ResourceActionResult, Vec<AuditEntry>) {
    let driver = match drivers.for_kind(resource.kind) {
        Ok(d) => d,
        Err(e) => {
            let result = ResourceActionResult::failed(resource.canonical_id.clone(), resource.id.clone(), action, e.to_string());
            let audit = vec![action_audit_entry(&result, resource, schedule, Severity::Medium)];
            return (result, audit);
        }
    };

    let prior_state = if action == ActionKind::Start {
        match store
            .last_stopped_state(&schedule.id, &schedule.tenant_id, &resource.canonical_id, resource.kind, LAST_STOPPED_SCAN_DEPTH)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(resource_id = %resource.id, error = %e, "lastStoppedState lookup failed, proceeding without prior state");
                None
            }
        }
    } else {
        None
    };

    let meta = serde_json::json!({ "clusterId": resource.parent_container_id });

    let result = match driver.process(resource, schedule, action, creds, &meta, prior_state.as_ref()).await {
        Ok(r) => r,
        Err(e) => ResourceActionResult::failed(resource.canonical_id.clone(), resource.id.clone(), action, e.to_string()),
    };

    if result.is_skip() {
        (result, vec![])
    } else {
        let severity = if result.outcome == Outcome::Failed { Severity::High } else { Severity::Info };
        let audit = vec![action_audit_entry(&result, resource, schedule, severity)];
        (result, audit)
    }
}

fn record_deadline_exceeded(
    resource: &ResourceReference,
    action: ActionKind,
    schedule: &Schedule,
    results_by_kind: &mut HashMap<String, Vec<ResourceActionResult>>,
    audits: &mut Vec<AuditEntry>,
    counts: &mut ExecutionCounts,
) {
    let result = ResourceActionResult::failed(resource.canonical_id.clone(), resource.id.clone(), action, "deadline-exceeded");
    counts.record(&result);
    audits.push(action_audit_entry(&result, resource, schedule, Severity::High));
    results_by_kind.entry(resource.kind.audit_category_segment().to_string()).or_default().push(result);
}

fn action_audit_entry(result: &ResourceActionResult, resource: &ResourceReference, schedule: &Schedule, severity: Severity) -> AuditEntry {
    let verb = match result.action {
        ActionKind::Start => "start",
        ActionKind::Stop => "stop",
        ActionKind::Skip => "skip",
    };
    let category = if result.outcome == Outcome::Failed {
        format!("scheduler.{}.error", resource.kind.audit_category_segment())
    } else {
        format!("scheduler.{}.{}", resource.kind.audit_category_segment(), verb)
    };
    AuditEntry {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        category,
        action: verb.to_string(),
        actor_identity: "system".into(),
        actor_kind: ActorKind::System,
        resource_kind: Some(resource.kind),
        resource_id: Some(resource.id.clone()),
        outcome: result.outcome,
        severity,
        detail: result.error.clone().unwrap_or_else(|| format!("{verb} {}", resource.id)),
        metadata: result.prior_state.clone(),
        schedule_id: Some(schedule.id.clone()),
        ttl: Utc::now() + chrono::Duration::days(90),
    }
}

fn execution_summary_audit(record: &ExecutionRecord) -> AuditEntry {
    let severity = match record.status {
        ExecutionStatus::Success => Severity::Info,
        ExecutionStatus::Partial => Severity::Medium,
        ExecutionStatus::Error => Severity::High,
        ExecutionStatus::Running => Severity::Info,
    };
    AuditEntry {
        id: Uuid::new_v4(),
        timestamp: record.end_instant,
        category: "scheduler.execution.summary".into(),
        action: "summary".into(),
        actor_identity: "system".into(),
        actor_kind: ActorKind::System,
        resource_kind: None,
        resource_id: None,
        outcome: if record.counts.failed == 0 { Outcome::Success } else { Outcome::Failed },
        severity,
        detail: format!(
            "started={} stopped={} failed={} skipped={}",
            record.counts.started, record.counts.stopped, record.counts.failed, record.counts.skipped
        ),
        metadata: serde_json::json!({ "executionId": record.execution_id }),
        schedule_id: Some(record.schedule_id.clone()),
        ttl: record.end_instant + chrono::Duration::days(90),
    }
}

fn schedule_not_found_audit(schedule_id: &ScheduleId, tenant_id: &TenantId, actor_identity: Option<&str>) -> AuditEntry {
    AuditEntry {
        id: Uuid::new_v4(),
        timestamp: Utc::now(),
        category: "scheduler.schedule.not_found".into(),
        action: "scan".into(),
        actor_identity: actor_identity.unwrap_or("system").to_string(),
        actor_kind: if actor_identity.is_some() { ActorKind::User } else { ActorKind::System },
        resource_kind: None,
        resource_id: None,
        outcome: Outcome::Failed,
        severity: Severity::High,
        detail: format!("schedule {} not found for tenant {}", schedule_id, tenant_id),
        metadata: serde_json::json!({}),
        schedule_id: Some(schedule_id.clone()),
        ttl: Utc::now() + chrono::Duration::days(90),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nshift_config::ConfigStore;
    use nshift_domain::ResourceKind;
    use nshift_driver::{AwsApiClient, Driver, DriverError};
    use nshift_store::InMemoryHistoryStore;
    use std::io::Write;
    use tempfile::TempDir;

    struct StubVmDriver;

    #[async_trait]
    impl Driver for StubVmDriver {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Vm
        }

        async fn process(
            &self,
            resource: &ResourceReference,
            _schedule: &Schedule,
            action: ActionKind,
            _creds: &SessionCredentials,
            _meta: &serde_json::Value,
            _prior_state: Option<&serde_json::Value>,
        ) -> Result<ResourceActionResult, DriverError> {
            Ok(ResourceActionResult::success(
                resource.canonical_id.clone(),
                resource.id.clone(),
                action,
                serde_json::json!({"priorPowerState": "running"}),
            ))
        }
    }

    fn write_file(dir: &std::path::Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    fn seed_config(dir: &std::path::Path) {
        write_file(
            dir,
            "schedules/always-stop.yml",
            r#"
id: always-stop
name: Always stop
tenant_id: acme
start_hms: "00:00:00"
end_hms: "00:00:01"
timezone: UTC
active_days: [mon, tue, wed, thu, fri, sat, sun]
resources:
  - id: web-1
    canonical_id: "arn:nightshift:ec2:us-east-1:123456789012:instance/i-0abc123"
"#,
        );
        write_file(
            dir,
            "accounts/prod.yml",
            r#"
id: "123456789012"
display_name: Production
role_id: nshift-executor
regions: [us-east-1]
"#,
        );
    }

    #[tokio::test]
    async fn full_scan_with_no_resources_writes_no_execution_record() {
        let tmp = TempDir::new().unwrap();
        write_file(
            tmp.path(),
            "schedules/empty.yml",
            r#"
id: empty
name: Empty
tenant_id: acme
start_hms: "00:00:00"
end_hms: "23:59:59"
timezone: UTC
active_days: [mon, tue, wed, thu, fri, sat, sun]
"#,
        );
        let config = Arc::new(ConfigStore::new(tmp.path()));
        let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(StubVmDriver));
        let drivers = Arc::new(registry);
        let credentials = Arc::new(CredentialBroker::new(AwsApiClient::new()).await);

        let orchestrator = Orchestrator::new(config, store.clone(), drivers, credentials);
        let outcome = orchestrator.full_scan(TriggerSource::Periodic).await.unwrap();

        assert_eq!(outcome.schedules_processed, 1);
        assert_eq!(outcome.resources_started, 0);
        assert_eq!(outcome.resources_stopped, 0);
        assert_eq!(outcome.resources_failed, 0);
        assert!(store.list_executions(&ScheduleId::new("empty"), &TenantId::new("acme"), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn partial_scan_for_unknown_schedule_surfaces_schedule_not_found() {
        let tmp = TempDir::new().unwrap();
        let config = Arc::new(ConfigStore::new(tmp.path()));
        let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let drivers = Arc::new(DriverRegistry::new());
        let credentials = Arc::new(CredentialBroker::new(AwsApiClient::new()).await);

        let orchestrator = Orchestrator::new(config, store.clone(), drivers, credentials);
        let err = orchestrator
            .partial_scan(&ScheduleId::new("nope"), &TenantId::new("acme"), TriggerSource::OnDemand, Some("alice".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrateError::ScheduleNotFound));

        let audits = store.list_audit(None, 10).await.unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].category, "scheduler.schedule.not_found");
        assert_eq!(audits[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn full_scan_stops_resource_and_persists_execution() {
        let tmp = TempDir::new().unwrap();
        seed_config(tmp.path());
        let config = Arc::new(ConfigStore::new(tmp.path()));
        let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(StubVmDriver));
        let drivers = Arc::new(registry);
        let credentials = Arc::new(CredentialBroker::new(AwsApiClient::new()).await);

        let orchestrator = Orchestrator::new(config, store.clone(), drivers, credentials);
        let outcome = orchestrator.full_scan(TriggerSource::Periodic).await.unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.schedules_processed, 1);
        assert_eq!(outcome.resources_stopped, 1);

        let executions = store.list_executions(&ScheduleId::new("always-stop"), &TenantId::new("acme"), 10).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].account_id, AccountId::new("123456789012"));

        let audits = store.list_audit(Some(&ScheduleId::new("always-stop")), 10).await.unwrap();
        assert!(audits.iter().any(|a| a.category == "scheduler.vm.stop"));
        assert!(audits.iter().any(|a| a.category == "scheduler.execution.summary"));
    }

    #[tokio::test]
    async fn second_concurrent_scan_of_same_schedule_does_not_double_run() {
        let locks = ScheduleLockRegistry::new();
        let id = ScheduleId::new("always-stop");
        let guard = locks.try_acquire(&id).unwrap();
        assert!(locks.try_acquire(&id).is_none());
        drop(guard);
    }
}
