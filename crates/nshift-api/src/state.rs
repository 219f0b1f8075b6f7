use std::sync::Arc;

use nshift_config::ConfigStore;
use nshift_driver::DriverRegistry;
use nshift_store::HistoryStore;
use nshift_orchestrator::Orchestrator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub store: Arc<dyn HistoryStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub drivers: Arc<DriverRegistry>,
    pub auth_token: Arc<String>,
}
