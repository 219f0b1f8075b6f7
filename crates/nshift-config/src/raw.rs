use serde::{Deserialize, Serialize};

/// Raw YAML representation of a schedule config file (schedules/<id>.yml).
#[derive(Debug, Deserialize, Serialize)]
pub struct RawSchedule {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    #[serde(default = "default_true")]
    pub active: bool,
    pub start_hms: String,
    pub end_hms: String,
    pub timezone: String,
    pub active_days: Vec<String>,
    #[serde(default)]
    pub resources: Vec<RawResource>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawResource {
    pub id: String,
    pub canonical_id: String,
    pub parent_container_id: Option<String>,
}

/// Raw YAML representation of an account config file (accounts/<id>.yml).
#[derive(Debug, Deserialize, Serialize)]
pub struct RawAccount {
    pub id: String,
    pub display_name: String,
    pub role_id: String,
    pub external_secret: Option<String>,
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}
