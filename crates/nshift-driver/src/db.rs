use async_trait::async_trait;
use nshift_domain::{
    ActionKind, ResourceActionResult, ResourceKind, ResourceReference, Schedule, SessionCredentials,
};
use serde_json::json;
use tracing::{debug, info};

use crate::aws_client::{AwsApiClient, Endpoints, SigningCredentials};
use crate::driver::Driver;
use crate::error::DriverError;

/// DB Driver. RDS equivalent of [`crate::vm::VmDriver`].
pub struct DbDriver {
    client: AwsApiClient,
    endpoints: Endpoints,
}

impl DbDriver {
    pub fn new(client: AwsApiClient) -> Self {
        Self { client, endpoints: Endpoints::default() }
    }

    #[cfg(test)]
    pub(crate) fn with_endpoints(client: AwsApiClient, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }

    async fn describe(
        &self,
        creds: &SigningCredentials,
        region: &str,
        db_instance_id: &str,
    ) -> Result<(String, String), DriverError> {
        let xml = self
            .client
            .query_api(
                &self.endpoints.rds(region),
                region,
                "rds",
                creds,
                &[
                    ("Action", "DescribeDBInstances"),
                    ("Version", "2014-10-31"),
                    ("DBInstanceIdentifier", db_instance_id),
                ],
            )
            .await
            .map_err(|e| DriverError::ResourceDescribeFailed(e.to_string()))?;

        let availability = crate::aws_client::xml_text(&xml, "DBInstanceStatus").unwrap_or_else(|| "unknown".into());
        let instance_class =
            crate::aws_client::xml_text(&xml, "DBInstanceClass").unwrap_or_else(|| "unknown".into());
        Ok((availability, instance_class))
    }

    async fn mutate(
        &self,
        creds: &SigningCredentials,
        region: &str,
        db_instance_id: &str,
        api_action: &str,
    ) -> Result<(), DriverError> {
        self.client
            .query_api(
                &self.endpoints.rds(region),
                region,
                "rds",
                creds,
                &[("Action", api_action), ("Version", "2014-10-31"), ("DBInstanceIdentifier", db_instance_id)],
            )
            .await
            .map_err(|e| DriverError::ResourceMutateFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Driver for DbDriver {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Db
    }

    async fn process(
        &self,
        resource: &ResourceReference,
        _schedule: &Schedule,
        action: ActionKind,
        creds: &SessionCredentials,
        _meta: &serde_json::Value,
        _prior_state: Option<&serde_json::Value>,
    ) -> Result<ResourceActionResult, DriverError> {
        let sig_creds = SigningCredentials {
            access_key_id: creds.access_id.clone(),
            secret_access_key: creds.secret.clone(),
            session_token: Some(creds.session_token.clone()),
        };
        let region = resource.canonical_id.region();
        let db_id = resource.canonical_id.local_id();

        let (availability, instance_class) = self.describe(&sig_creds, region, db_id).await?;
        debug!(db_id, availability = %availability, "observed DB state");

        let observed = json!({
            "priorAvailability": availability,
            "priorInstanceClass": instance_class,
        });

        match action {
            ActionKind::Stop => {
                if availability != "available" {
                    return Ok(ResourceActionResult::skip(resource.canonical_id.clone(), db_id, observed));
                }
                self.mutate(&sig_creds, region, db_id, "StopDBInstance").await?;
                info!(db_id, "stopped DB instance");
                Ok(ResourceActionResult::success(resource.canonical_id.clone(), db_id, ActionKind::Stop, observed))
            }
            ActionKind::Start => {
                if availability == "available" || availability == "starting" {
                    return Ok(ResourceActionResult::skip(resource.canonical_id.clone(), db_id, observed));
                }
                self.mutate(&sig_creds, region, db_id, "StartDBInstance").await?;
                info!(db_id, "started DB instance");
                Ok(ResourceActionResult::success(resource.canonical_id.clone(), db_id, ActionKind::Start, observed))
            }
            ActionKind::Skip => Ok(ResourceActionResult::skip(resource.canonical_id.clone(), db_id, observed)),
        }
    }
}
