/// Render a `ScanOutcome` JSON body as a short human-readable summary.
pub fn render_scan_outcome(outcome: &serde_json::Value) -> String {
    let mode = outcome.get("mode").and_then(|v| v.as_str()).unwrap_or("?");
    let success = outcome.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
    let schedules = outcome.get("schedulesProcessed").and_then(|v| v.as_u64()).unwrap_or(0);
    let started = outcome.get("resourcesStarted").and_then(|v| v.as_u64()).unwrap_or(0);
    let stopped = outcome.get("resourcesStopped").and_then(|v| v.as_u64()).unwrap_or(0);
    let failed = outcome.get("resourcesFailed").and_then(|v| v.as_u64()).unwrap_or(0);
    let duration_ms = outcome.get("durationMs").and_then(|v| v.as_i64()).unwrap_or(0);

    format!(
        "{} scan {} — {} schedule(s), {} started, {} stopped, {} failed ({} ms)",
        mode,
        if success { "succeeded" } else { "completed with failures" },
        schedules,
        started,
        stopped,
        failed,
        duration_ms,
    )
}

/// Render a list of execution records as a fixed-width table.
pub fn render_executions(records: &[serde_json::Value]) -> String {
    if records.is_empty() {
        return "No executions found.\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<36} {:<10} {:<22} {:<8} {:<8} {:<8} {:<8}\n",
        "EXECUTION ID", "STATUS", "STARTED", "STARTED#", "STOPPED#", "FAILED#", "SKIPPED#"
    ));
    out.push_str(&"-".repeat(110));
    out.push('\n');

    for record in records {
        let id = record.get("execution_id").and_then(|v| v.as_str()).unwrap_or("-");
        let status = record.get("status").and_then(|v| v.as_str()).unwrap_or("-");
        let started_at = record.get("start_instant").and_then(|v| v.as_str()).unwrap_or("-");
        let started_short = if started_at.len() >= 19 { &started_at[..19] } else { started_at };
        let counts = record.get("counts").cloned().unwrap_or_default();
        let started = counts.get("started").and_then(|v| v.as_u64()).unwrap_or(0);
        let stopped = counts.get("stopped").and_then(|v| v.as_u64()).unwrap_or(0);
        let failed = counts.get("failed").and_then(|v| v.as_u64()).unwrap_or(0);
        let skipped = counts.get("skipped").and_then(|v| v.as_u64()).unwrap_or(0);

        out.push_str(&format!(
            "{:<36} {:<10} {:<22} {:<8} {:<8} {:<8} {:<8}\n",
            id, status, started_short, started, stopped, failed, skipped
        ));
    }
    out
}

/// Render a list of audit entries as a fixed-width table.
pub fn render_audit(entries: &[serde_json::Value]) -> String {
    if entries.is_empty() {
        return "No audit entries found.\n".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!("{:<22} {:<28} {:<9} {:<9} {}\n", "TIMESTAMP", "CATEGORY", "OUTCOME", "SEVERITY", "DETAIL"));
    out.push_str(&"-".repeat(100));
    out.push('\n');

    for entry in entries {
        let ts = entry.get("timestamp").and_then(|v| v.as_str()).unwrap_or("-");
        let ts_short = if ts.len() >= 19 { &ts[..19] } else { ts };
        let category = entry.get("category").and_then(|v| v.as_str()).unwrap_or("-");
        let outcome = entry.get("outcome").and_then(|v| v.as_str()).unwrap_or("-");
        let severity = entry.get("severity").and_then(|v| v.as_str()).unwrap_or("-");
        let detail = entry.get("detail").and_then(|v| v.as_str()).unwrap_or("-");

        out.push_str(&format!("{:<22} {:<28} {:<9} {:<9} {}\n", ts_short, category, outcome, severity, detail));
    }
    out
}
