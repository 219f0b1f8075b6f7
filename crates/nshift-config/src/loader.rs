use std::path::Path;

use nshift_domain::{
    Account, AccountId, CanonicalResourceId, DayOfWeek, ResourceReference, Schedule, ScheduleId, TenantId,
};
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::{RawAccount, RawResource, RawSchedule};

/// Load every schedule found under `<dir>/schedules/*.yml`.
///
/// Expected directory layout:
/// ```text
/// <dir>/
///   schedules/
///     <schedule-id>.yml   <- RawSchedule
///   accounts/
///     <account-id>.yml    <- RawAccount
/// ```
pub fn load_schedules(dir: &Path) -> Result<Vec<Schedule>, ConfigError> {
    let schedules_dir = dir.join("schedules");
    let mut schedules = Vec::new();
    for path in yaml_files(&schedules_dir)? {
        let content = read_file(&path)?;
        let raw: RawSchedule = serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.display().to_string(),
            source: e,
        })?;
        debug!("loading schedule from {}", path.display());
        schedules.push(convert_schedule(raw, &path)?);
    }
    Ok(schedules)
}

/// Load every account found under `<dir>/accounts/*.yml`.
pub fn load_accounts(dir: &Path) -> Result<Vec<Account>, ConfigError> {
    let accounts_dir = dir.join("accounts");
    let mut accounts = Vec::new();
    for path in yaml_files(&accounts_dir)? {
        let content = read_file(&path)?;
        let raw: RawAccount = serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.display().to_string(),
            source: e,
        })?;
        debug!("loading account from {}", path.display());
        accounts.push(convert_account(raw));
    }
    Ok(accounts)
}

fn yaml_files(dir: &Path) -> Result<Vec<std::path::PathBuf>, ConfigError> {
    if !dir.exists() {
        return Ok(vec![]);
    }
    let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::Io { path: dir.display().to_string(), source: e })?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::Io { path: dir.display().to_string(), source: e })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("yml")
            || path.extension().and_then(|e| e.to_str()) == Some("yaml")
        {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io { path: path.display().to_string(), source: e })
}

fn convert_schedule(raw: RawSchedule, path: &Path) -> Result<Schedule, ConfigError> {
    let active_days = raw
        .active_days
        .iter()
        .map(|d| DayOfWeek::from_abbrev(d).map_err(ConfigError::from))
        .collect::<Result<Vec<_>, _>>()?;

    let resources = raw
        .resources
        .into_iter()
        .map(|r| convert_resource(r, path))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Schedule {
        id: ScheduleId::new(raw.id),
        name: raw.name,
        tenant_id: TenantId::new(raw.tenant_id),
        active: raw.active,
        start_hms: raw.start_hms,
        end_hms: raw.end_hms,
        timezone: raw.timezone,
        active_days,
        resources,
    })
}

fn convert_resource(raw: RawResource, path: &Path) -> Result<ResourceReference, ConfigError> {
    let canonical_id = CanonicalResourceId::parse(&raw.canonical_id).map_err(|e| ConfigError::Conversion {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let kind = canonical_id.kind();
    Ok(ResourceReference { id: raw.id, kind, canonical_id, parent_container_id: raw.parent_container_id })
}

fn convert_account(raw: RawAccount) -> Account {
    Account {
        id: AccountId::new(raw.id),
        display_name: raw.display_name,
        role_id: raw.role_id,
        external_secret: raw.external_secret,
        regions: raw.regions,
        active: raw.active,
    }
}
