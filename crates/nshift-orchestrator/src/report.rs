use nshift_domain::{ScheduleId, TenantId, TriggerSource};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    Full,
    Partial,
}

/// Trigger payload. Absence of `schedule_id` implies a full scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub schedule_id: Option<ScheduleId>,
    pub tenant_id: Option<TenantId>,
    pub trigger_source: TriggerSource,
    pub actor_identity: Option<String>,
}

/// Result returned to the trigger. `success` holds iff
/// `resources_failed == 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanOutcome {
    pub success: bool,
    pub execution_id: Uuid,
    pub mode: ScanMode,
    pub schedules_processed: u32,
    pub resources_started: u32,
    pub resources_stopped: u32,
    pub resources_failed: u32,
    pub duration_ms: i64,
}
