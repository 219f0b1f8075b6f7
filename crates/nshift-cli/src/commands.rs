use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use nshift_driver::{AsgDriver, AwsApiClient, ContainerServiceDriver, CredentialBroker, DbDriver, DriverRegistry, VmDriver};
use nshift_orchestrator::Orchestrator;
use nshift_store::{HistoryStore, InMemoryHistoryStore, RedbHistoryStore};
use uuid::Uuid;

use crate::cli::TriggerSourceArg;
use crate::output;

// ── Serve ─────────────────────────────────────────────────────────────────────

pub async fn serve(
    config_dir: PathBuf,
    store_path: Option<String>,
    ephemeral: bool,
    bind: String,
    port: u16,
    rotate_token: bool,
) -> Result<()> {
    let token_path = default_token_path();
    let token = if rotate_token {
        let t = generate_token();
        write_token(&token_path, &t)?;
        println!("Rotated token (written to {})", token_path.display());
        println!("New token: {}", t);
        t
    } else if let Ok(existing) = std::fs::read_to_string(&token_path) {
        let existing = existing.trim().to_string();
        if existing.is_empty() {
            let t = generate_token();
            write_token(&token_path, &t)?;
            println!("Generated new token (written to {})", token_path.display());
            t
        } else {
            println!("Reusing existing token from {}", token_path.display());
            existing
        }
    } else {
        let t = generate_token();
        write_token(&token_path, &t)?;
        println!("Generated new token (written to {})", token_path.display());
        t
    };

    let config = Arc::new(nshift_config::ConfigStore::new(&config_dir));

    let store: Arc<dyn HistoryStore> = if ephemeral {
        println!("Using in-memory (ephemeral) store — history and audit log are lost on restart");
        Arc::new(InMemoryHistoryStore::new())
    } else {
        let path = resolve_store_path(store_path);
        println!("Using persistent store at {}", path.display());
        Arc::new(
            RedbHistoryStore::open(&path)
                .with_context(|| format!("Failed to open store at {}", path.display()))?,
        )
    };

    let client = AwsApiClient::new();
    let mut registry = DriverRegistry::new();
    registry.register(Arc::new(VmDriver::new(client.clone())));
    registry.register(Arc::new(DbDriver::new(client.clone())));
    registry.register(Arc::new(ContainerServiceDriver::new(client.clone())));
    registry.register(Arc::new(AsgDriver::new(client.clone())));
    let drivers = Arc::new(registry);

    let credentials = Arc::new(CredentialBroker::new(client).await);
    let orchestrator = Arc::new(Orchestrator::new(config.clone(), store.clone(), drivers.clone(), credentials));

    let app = nshift_api::build_app(config, store, orchestrator, drivers, Arc::new(token));

    let addr = format!("{bind}:{port}");
    println!("Starting nshift API server on http://{addr} (config: {})", config_dir.display());

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

// ── Scan ──────────────────────────────────────────────────────────────────────

pub async fn scan(
    schedule_id: Option<String>,
    tenant_id: Option<String>,
    trigger_source: TriggerSourceArg,
    actor_identity: Option<String>,
    remote: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let token = resolve_token(token)?;
    let url = server_url(remote);
    let client = authed_client(&token);
    let base = url.trim_end_matches('/');

    let body = match &schedule_id {
        Some(id) => {
            let tenant_id = tenant_id
                .context("--tenant-id is required when --schedule-id is given")?;
            let endpoint = format!("{base}/scan/{id}");
            let payload = serde_json::json!({
                "tenantId": tenant_id,
                "triggerSource": trigger_source.as_wire(),
                "actorIdentity": actor_identity,
            });
            client.post(&endpoint).json(&payload).send().await
        }
        None => {
            let endpoint = format!("{base}/scan");
            let payload = serde_json::json!({ "triggerSource": trigger_source.as_wire() });
            client.post(&endpoint).json(&payload).send().await
        }
    }
    .with_context(|| format!("Failed to reach server at {url}"))?;

    let status = body.status();
    let outcome: serde_json::Value = body.json().await.context("Failed to parse scan response")?;

    if !status.is_success() {
        let msg = outcome.get("error").and_then(|v| v.as_str()).unwrap_or("unknown error");
        anyhow::bail!("scan failed: {status} — {msg}");
    }

    println!("{}", output::render_scan_outcome(&outcome));
    Ok(())
}

// ── Status ────────────────────────────────────────────────────────────────────

pub async fn status(remote: Option<String>, token: Option<String>) -> Result<()> {
    let token = resolve_token(token)?;
    let url = server_url(remote);
    let body: serde_json::Value = authed_client(&token)
        .get(format!("{}/status", url.trim_end_matches('/')))
        .send()
        .await
        .with_context(|| format!("Failed to reach server at {url}"))?
        .json()
        .await?;

    if let Some(count) = body.get("active_schedule_count").and_then(|v| v.as_u64()) {
        println!("Active schedules: {}", count);
    }
    if let Some(count) = body.get("active_account_count").and_then(|v| v.as_u64()) {
        println!("Active accounts: {}", count);
    }
    if let Some(kinds) = body.get("driver_kinds").and_then(|v| v.as_array()) {
        let names: Vec<&str> = kinds.iter().filter_map(|k| k.as_str()).collect();
        println!("Driver kinds: {}", names.join(", "));
    }
    Ok(())
}

// ── Executions ────────────────────────────────────────────────────────────────

pub async fn executions(
    schedule_id: String,
    tenant_id: String,
    limit: u32,
    remote: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let token = resolve_token(token)?;
    let url = server_url(remote);
    let endpoint = format!(
        "{}/executions?schedule_id={}&tenant_id={}&limit={}",
        url.trim_end_matches('/'),
        urlencode(&schedule_id),
        urlencode(&tenant_id),
        limit,
    );
    let records: serde_json::Value = authed_client(&token)
        .get(&endpoint)
        .send()
        .await
        .with_context(|| format!("Failed to reach server at {url}"))?
        .json()
        .await
        .context("Failed to parse executions response")?;

    let records = records.as_array().cloned().unwrap_or_default();
    print!("{}", output::render_executions(&records));
    Ok(())
}

// ── Audit ─────────────────────────────────────────────────────────────────────

pub async fn audit(
    schedule_id: Option<String>,
    limit: u32,
    remote: Option<String>,
    token: Option<String>,
) -> Result<()> {
    let token = resolve_token(token)?;
    let url = server_url(remote);
    let mut endpoint = format!("{}/audit?limit={}", url.trim_end_matches('/'), limit);
    if let Some(ref id) = schedule_id {
        endpoint.push_str(&format!("&schedule_id={}", urlencode(id)));
    }

    let entries: serde_json::Value = authed_client(&token)
        .get(&endpoint)
        .send()
        .await
        .with_context(|| format!("Failed to reach server at {url}"))?
        .json()
        .await
        .context("Failed to parse audit response")?;

    let entries = entries.as_array().cloned().unwrap_or_default();
    print!("{}", output::render_audit(&entries));
    Ok(())
}

// ── Token helpers ─────────────────────────────────────────────────────────────

fn generate_token() -> String {
    let a = Uuid::new_v4().to_string().replace('-', "");
    let b = Uuid::new_v4().to_string().replace('-', "");
    format!("{}{}", a, b)
}

/// Priority: explicit value (from --token / NIGHTSHIFT_AUTH_TOKEN) → ~/.nshift/token file.
fn resolve_token(explicit: Option<String>) -> Result<String> {
    if let Some(t) = explicit {
        return Ok(t);
    }
    let path = default_token_path();
    std::fs::read_to_string(&path)
        .map(|s| s.trim().to_string())
        .with_context(|| {
            format!(
                "No token provided and could not read token file at {}. \
                 Use --token, NIGHTSHIFT_AUTH_TOKEN, or run `nshift serve` first.",
                path.display()
            )
        })
}

fn write_token(path: &PathBuf, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, token)
        .with_context(|| format!("Failed to write token to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

fn default_token_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".nshift").join("token")
}

fn authed_client(token: &str) -> reqwest::Client {
    let mut headers = reqwest::header::HeaderMap::new();
    let bearer = format!("Bearer {}", token);
    headers.insert(
        reqwest::header::AUTHORIZATION,
        reqwest::header::HeaderValue::from_str(&bearer).expect("token contains invalid header characters"),
    );
    reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .expect("failed to build HTTP client")
}

fn server_url(remote: Option<String>) -> String {
    remote.unwrap_or_else(|| "http://localhost:8080".into())
}

fn resolve_store_path(store_path: Option<String>) -> PathBuf {
    if let Some(p) = store_path {
        return PathBuf::from(p);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".nshift").join("history.redb")
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            b => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
