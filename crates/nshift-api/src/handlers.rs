use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use nshift_domain::{ScheduleId, TenantId, TriggerSource};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.config.active_schedules(None)?;
    Ok(StatusCode::OK)
}

// ── Scan ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullScanBody {
    pub trigger_source: TriggerSource,
}

pub async fn post_scan(
    State(state): State<AppState>,
    Json(body): Json<FullScanBody>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state.orchestrator.full_scan(body.trigger_source).await?;
    Ok(Json(json!(outcome)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialScanBody {
    pub tenant_id: TenantId,
    pub trigger_source: TriggerSource,
    pub actor_identity: Option<String>,
}

pub async fn post_scan_schedule(
    State(state): State<AppState>,
    Path(schedule_id): Path<String>,
    Json(body): Json<PartialScanBody>,
) -> Result<Json<Value>, ApiError> {
    let schedule_id = ScheduleId::new(schedule_id);
    let outcome = state
        .orchestrator
        .partial_scan(&schedule_id, &body.tenant_id, body.trigger_source, body.actor_identity)
        .await?;
    Ok(Json(json!(outcome)))
}

// ── History & Audit read projections ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    pub schedule_id: String,
    pub tenant_id: String,
    pub limit: Option<u32>,
}

pub async fn list_executions(
    State(state): State<AppState>,
    Query(q): Query<ExecutionsQuery>,
) -> Result<Json<Value>, ApiError> {
    let schedule_id = ScheduleId::new(q.schedule_id);
    let tenant_id = TenantId::new(q.tenant_id);
    let executions = state.store.list_executions(&schedule_id, &tenant_id, q.limit.unwrap_or(50)).await?;
    Ok(Json(json!(executions)))
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub schedule_id: Option<String>,
    pub limit: Option<u32>,
}

pub async fn list_audit(
    State(state): State<AppState>,
    Query(q): Query<AuditQuery>,
) -> Result<Json<Value>, ApiError> {
    let schedule_id = q.schedule_id.map(ScheduleId::new);
    let entries = state.store.list_audit(schedule_id.as_ref(), q.limit.unwrap_or(100)).await?;
    Ok(Json(json!(entries)))
}

// ── Status ────────────────────────────────────────────────────────────────────

pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let schedules = state.config.active_schedules(None)?;
    let accounts = state.config.active_accounts().unwrap_or_default();
    let mut kinds: Vec<String> = state.drivers.registered_kinds().iter().map(|k| k.tag().to_string()).collect();
    kinds.sort();

    Ok(Json(json!({
        "active_schedule_count": schedules.len(),
        "active_account_count": accounts.len(),
        "driver_kinds": kinds,
    })))
}
