use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Execution records expire 30 days after write.
pub const EXECUTION_TTL_DAYS: i64 = 30;

/// Audit entries expire 90 days after write.
pub const AUDIT_TTL_DAYS: i64 = 90;

pub fn execution_ttl(written_at: DateTime<Utc>) -> DateTime<Utc> {
    written_at + Duration::days(EXECUTION_TTL_DAYS)
}

pub fn audit_ttl(written_at: DateTime<Utc>) -> DateTime<Utc> {
    written_at + Duration::days(AUDIT_TTL_DAYS)
}

/// Sentinel record for the per-schedule mutual-exclusion lock:
/// a process-wide registry degrades to this store-backed compare-and-swap in
/// a short-lived invocation environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSentinel {
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
}

impl LockSentinel {
    pub fn new(holder: impl Into<String>, now: DateTime<Utc>, lease: Duration) -> Self {
        Self { holder: holder.into(), acquired_at: now, lease_expires_at: now + lease }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.lease_expires_at
    }
}
