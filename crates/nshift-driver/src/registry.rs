use std::collections::HashMap;
use std::sync::Arc;

use nshift_domain::ResourceKind;

use crate::driver::Driver;
use crate::error::DriverError;

/// Dispatches driver calls to the correct kind-specific [`Driver`]
/// implementation, keyed by [`ResourceKind`] against a single (AWS) cloud.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<ResourceKind, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, driver: Arc<dyn Driver>) -> &mut Self {
        self.drivers.insert(driver.kind(), driver);
        self
    }

    pub fn for_kind(&self, kind: ResourceKind) -> Result<Arc<dyn Driver>, DriverError> {
        self.drivers.get(&kind).cloned().ok_or(DriverError::DriverNotConfigured(kind))
    }

    pub fn registered_kinds(&self) -> Vec<ResourceKind> {
        self.drivers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nshift_domain::{ActionKind, ResourceActionResult, ResourceReference, Schedule, SessionCredentials};

    struct StubDriver(ResourceKind);

    #[async_trait]
    impl Driver for StubDriver {
        fn kind(&self) -> ResourceKind {
            self.0
        }

        async fn process(
            &self,
            _resource: &ResourceReference,
            _schedule: &Schedule,
            _action: ActionKind,
            _creds: &SessionCredentials,
            _meta: &serde_json::Value,
            _prior_state: Option<&serde_json::Value>,
        ) -> Result<ResourceActionResult, DriverError> {
            unimplemented!()
        }
    }

    #[test]
    fn resolves_registered_kind() {
        let mut registry = DriverRegistry::new();
        registry.register(Arc::new(StubDriver(ResourceKind::Vm)));
        assert!(registry.for_kind(ResourceKind::Vm).is_ok());
    }

    #[test]
    fn unregistered_kind_fails_with_driver_not_configured() {
        let registry = DriverRegistry::new();
        let err = registry.for_kind(ResourceKind::DocumentDb).unwrap_err();
        assert!(matches!(err, DriverError::DriverNotConfigured(ResourceKind::DocumentDb)));
    }
}
