use std::path::PathBuf;

use nshift_domain::{Account, Schedule, ScheduleId, TenantId};

use crate::error::ConfigError;
use crate::loader;

/// Read-only configuration store: active schedules, schedule-
/// by-id-and-tenant, and active accounts. Backed by a YAML directory tree;
/// re-read on every call so external edits take effect on the next scan
/// without a restart.
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn active_schedules(&self, tenant_id: Option<&TenantId>) -> Result<Vec<Schedule>, ConfigError> {
        let schedules = loader::load_schedules(&self.dir)?;
        Ok(schedules
            .into_iter()
            .filter(|s| s.active)
            .filter(|s| match tenant_id {
                Some(t) => &s.tenant_id == t,
                None => true,
            })
            .collect())
    }

    pub fn schedule(&self, id: &ScheduleId, tenant_id: &TenantId) -> Result<Option<Schedule>, ConfigError> {
        let schedules = loader::load_schedules(&self.dir)?;
        Ok(schedules.into_iter().find(|s| &s.id == id && &s.tenant_id == tenant_id))
    }

    pub fn active_accounts(&self) -> Result<Vec<Account>, ConfigError> {
        let accounts = loader::load_accounts(&self.dir)?;
        Ok(accounts.into_iter().filter(|a| a.active).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nshift_domain::AccountId;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_file(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    fn seed(dir: &Path) {
        write_file(
            dir,
            "schedules/nightly.yml",
            r#"
id: nightly
name: Nightly shutdown
tenant_id: acme
start_hms: "19:00:00"
end_hms: "07:00:00"
timezone: UTC
active_days: [mon]
"#,
        );
        write_file(
            dir,
            "schedules/disabled.yml",
            r#"
id: disabled
name: Disabled schedule
tenant_id: acme
active: false
start_hms: "19:00:00"
end_hms: "07:00:00"
timezone: UTC
active_days: [mon]
"#,
        );
        write_file(
            dir,
            "accounts/prod.yml",
            r#"
id: "123456789012"
display_name: Production
role_id: nshift-executor
"#,
        );
    }

    #[test]
    fn active_schedules_excludes_inactive() {
        let tmp = TempDir::new().unwrap();
        seed(tmp.path());
        let store = ConfigStore::new(tmp.path());
        let schedules = store.active_schedules(None).unwrap();
        assert_eq!(schedules.len(), 1);
        assert_eq!(schedules[0].id, nshift_domain::ScheduleId::new("nightly"));
    }

    #[test]
    fn schedule_lookup_requires_matching_tenant() {
        let tmp = TempDir::new().unwrap();
        seed(tmp.path());
        let store = ConfigStore::new(tmp.path());
        let found = store.schedule(&ScheduleId::new("nightly"), &TenantId::new("acme")).unwrap();
        assert!(found.is_some());
        let missing = store.schedule(&ScheduleId::new("nightly"), &TenantId::new("other")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn active_accounts_lists_accounts() {
        let tmp = TempDir::new().unwrap();
        seed(tmp.path());
        let store = ConfigStore::new(tmp.path());
        let accounts = store.active_accounts().unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].id, AccountId::new("123456789012"));
    }
}
