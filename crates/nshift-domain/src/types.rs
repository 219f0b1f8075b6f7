use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canonical_id::CanonicalResourceId;
use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                $name(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(ScheduleId);
string_id!(TenantId);
string_id!(AccountId);

// ── Resource kind ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Vm,
    Db,
    ContainerService,
    AutoScalingGroup,
    DocumentDb,
}

impl ResourceKind {
    /// Parses the resource-type tag embedded in a canonical id's resource
    /// portion (e.g. `instance` in `instance/i-0abc`).
    pub fn from_tag(tag: &str) -> Result<Self, DomainError> {
        match tag {
            "instance" => Ok(ResourceKind::Vm),
            "db" => Ok(ResourceKind::Db),
            "service" => Ok(ResourceKind::ContainerService),
            "autoScalingGroup" => Ok(ResourceKind::AutoScalingGroup),
            "docdb" => Ok(ResourceKind::DocumentDb),
            other => Err(DomainError::UnknownResourceKind(other.to_string())),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ResourceKind::Vm => "instance",
            ResourceKind::Db => "db",
            ResourceKind::ContainerService => "service",
            ResourceKind::AutoScalingGroup => "autoScalingGroup",
            ResourceKind::DocumentDb => "docdb",
        }
    }

    pub fn audit_category_segment(&self) -> &'static str {
        match self {
            ResourceKind::Vm => "vm",
            ResourceKind::Db => "db",
            ResourceKind::ContainerService => "container_service",
            ResourceKind::AutoScalingGroup => "asg",
            ResourceKind::DocumentDb => "document_db",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.audit_category_segment())
    }
}

// ── Day of week ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub fn from_abbrev(s: &str) -> Result<Self, DomainError> {
        match s.to_ascii_lowercase().as_str() {
            "mon" => Ok(DayOfWeek::Mon),
            "tue" => Ok(DayOfWeek::Tue),
            "wed" => Ok(DayOfWeek::Wed),
            "thu" => Ok(DayOfWeek::Thu),
            "fri" => Ok(DayOfWeek::Fri),
            "sat" => Ok(DayOfWeek::Sat),
            "sun" => Ok(DayOfWeek::Sun),
            other => Err(DomainError::InvalidDayOfWeek(other.to_string())),
        }
    }

    pub fn from_chrono(wd: chrono::Weekday) -> Self {
        match wd {
            chrono::Weekday::Mon => DayOfWeek::Mon,
            chrono::Weekday::Tue => DayOfWeek::Tue,
            chrono::Weekday::Wed => DayOfWeek::Wed,
            chrono::Weekday::Thu => DayOfWeek::Thu,
            chrono::Weekday::Fri => DayOfWeek::Fri,
            chrono::Weekday::Sat => DayOfWeek::Sat,
            chrono::Weekday::Sun => DayOfWeek::Sun,
        }
    }
}

// ── Schedule & resource references ──────────────────────────────────────────

/// A single resource a schedule acts on. Borrowed from the owning Schedule —
/// the core never mutates these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReference {
    pub id: String,
    pub kind: ResourceKind,
    pub canonical_id: CanonicalResourceId,
    pub parent_container_id: Option<String>,
}

/// Immutable for the duration of one scan. Created and mutated by external
/// configuration services; the core only reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub name: String,
    pub tenant_id: TenantId,
    pub active: bool,
    /// `HH:MM:SS`
    pub start_hms: String,
    /// `HH:MM:SS`
    pub end_hms: String,
    /// IANA timezone identifier, e.g. `Asia/Kolkata`.
    pub timezone: String,
    pub active_days: Vec<DayOfWeek>,
    pub resources: Vec<ResourceReference>,
}

// ── Accounts ─────────────────────────────────────────────────────────────────

/// Managed externally; the core caches this only for the duration of one scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub display_name: String,
    pub role_id: String,
    pub external_secret: Option<String>,
    pub regions: Vec<String>,
    pub active: bool,
}

/// Created by the Credential Broker on demand; lives until `expiry` or the
/// broker's cache TTL, whichever comes first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCredentials {
    pub access_id: String,
    pub secret: String,
    pub session_token: String,
    pub expiry: DateTime<Utc>,
    pub region: String,
}

// ── Actions & outcomes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Start,
    Stop,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSource {
    #[serde(rename = "periodic")]
    Periodic,
    #[serde(rename = "on-demand")]
    OnDemand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Partial,
    Error,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    User,
    System,
}

// ── Execution records & results ─────────────────────────────────────────────

/// One driver invocation's outcome, embedded into an ExecutionRecord and
/// read back by a later Driver invocation during restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceActionResult {
    pub canonical_id: CanonicalResourceId,
    pub local_id: String,
    pub action: ActionKind,
    pub outcome: Outcome,
    pub error: Option<String>,
    /// Kind-specific observed-before-mutation state. Unknown fields MUST be
    /// preserved across code versions (see SPEC_FULL.md §3).
    #[serde(default)]
    pub prior_state: serde_json::Value,
}

impl ResourceActionResult {
    pub fn skip(canonical_id: CanonicalResourceId, local_id: impl Into<String>, observed: serde_json::Value) -> Self {
        Self {
            canonical_id,
            local_id: local_id.into(),
            action: ActionKind::Skip,
            outcome: Outcome::Success,
            error: None,
            prior_state: observed,
        }
    }

    pub fn success(
        canonical_id: CanonicalResourceId,
        local_id: impl Into<String>,
        action: ActionKind,
        prior_state: serde_json::Value,
    ) -> Self {
        Self {
            canonical_id,
            local_id: local_id.into(),
            action,
            outcome: Outcome::Success,
            error: None,
            prior_state,
        }
    }

    pub fn failed(
        canonical_id: CanonicalResourceId,
        local_id: impl Into<String>,
        action: ActionKind,
        error: impl Into<String>,
    ) -> Self {
        Self {
            canonical_id,
            local_id: local_id.into(),
            action,
            outcome: Outcome::Failed,
            error: Some(error.into()),
            prior_state: serde_json::Value::Null,
        }
    }

    pub fn is_skip(&self) -> bool {
        self.action == ActionKind::Skip
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionCounts {
    pub started: u32,
    pub stopped: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl ExecutionCounts {
    pub fn record(&mut self, result: &ResourceActionResult) {
        match (result.action, result.outcome) {
            (ActionKind::Skip, _) => self.skipped += 1,
            (_, Outcome::Failed) => self.failed += 1,
            (ActionKind::Start, Outcome::Success) => self.started += 1,
            (ActionKind::Stop, Outcome::Success) => self.stopped += 1,
        }
    }

    pub fn total_non_skip(&self) -> u32 {
        self.started + self.stopped + self.failed
    }

    pub fn status(&self) -> ExecutionStatus {
        if self.failed == 0 {
            ExecutionStatus::Success
        } else if self.started + self.stopped > 0 {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Error
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: Uuid,
    pub schedule_id: ScheduleId,
    pub tenant_id: TenantId,
    pub account_id: AccountId,
    pub trigger_source: TriggerSource,
    pub start_instant: DateTime<Utc>,
    pub end_instant: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub counts: ExecutionCounts,
    /// Per-resource results keyed by `ResourceKind::audit_category_segment()`.
    pub results_by_kind: HashMap<String, Vec<ResourceActionResult>>,
    pub ttl: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn duration(&self) -> chrono::Duration {
        self.end_instant - self.start_instant
    }
}

// ── Audit ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Dotted path, e.g. `scheduler.vm.start`.
    pub category: String,
    pub action: String,
    pub actor_identity: String,
    pub actor_kind: ActorKind,
    pub resource_kind: Option<ResourceKind>,
    pub resource_id: Option<String>,
    pub outcome: Outcome,
    pub severity: Severity,
    pub detail: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub schedule_id: Option<ScheduleId>,
    pub ttl: DateTime<Utc>,
}
