use async_trait::async_trait;
use nshift_domain::{
    ActionKind, ResourceActionResult, ResourceKind, ResourceReference, Schedule, SessionCredentials,
};
use serde_json::json;
use tracing::{debug, info};

use crate::aws_client::{AwsApiClient, Endpoints, SigningCredentials};
use crate::driver::Driver;
use crate::error::DriverError;

/// VM Driver. Observes and mutates EC2 instance power state only; instance
/// type, storage, and networking are left untouched.
pub struct VmDriver {
    client: AwsApiClient,
    endpoints: Endpoints,
}

impl VmDriver {
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
        instance_id: &str,
    ) -> Result<(String, String), DriverError> {
        let xml = self
            .client
            .query_api(
                &self.endpoints.ec2(region),
                region,
                "ec2",
                creds,
                &[
                    ("Action", "DescribeInstances"),
                    ("Version", "2016-11-15"),
                    ("InstanceId.1", instance_id),
                ],
            )
            .await
            .map_err(|e| DriverError::ResourceDescribeFailed(e.to_string()))?;

        let power_state = crate::aws_client::xml_text(&xml, "name").unwrap_or_else(|| "unknown".into());
        let instance_type =
            crate::aws_client::xml_text(&xml, "instanceType").unwrap_or_else(|| "unknown".into());
        Ok((power_state, instance_type))
    }

    async fn mutate(
        &self,
        creds: &SigningCredentials,
        region: &str,
        instance_id: &str,
        api_action: &str,
    ) -> Result<(), DriverError> {
        self.client
            .query_api(
                &self.endpoints.ec2(region),
                region,
                "ec2",
                creds,
                &[("Action", api_action), ("Version", "2016-11-15"), ("InstanceId.1", instance_id)],
            )
            .await
            .map_err(|e| DriverError::ResourceMutateFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Driver for VmDriver {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Vm
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
        let instance_id = resource.canonical_id.local_id();

        let (power_state, instance_type) = self.describe(&sig_creds, region, instance_id).await?;
        debug!(instance_id, power_state = %power_state, "observed VM state");

        let observed = json!({
            "priorPowerState": power_state,
            "priorInstanceType": instance_type,
        });

        match action {
            ActionKind::Stop => {
                if power_state != "running" {
                    return Ok(ResourceActionResult::skip(resource.canonical_id.clone(), instance_id, observed));
                }
                self.mutate(&sig_creds, region, instance_id, "StopInstances").await?;
                info!(instance_id, "stopped VM");
                Ok(ResourceActionResult::success(
                    resource.canonical_id.clone(),
                    instance_id,
                    ActionKind::Stop,
                    observed,
                ))
            }
            ActionKind::Start => {
                if power_state == "running" || power_state == "pending" {
                    return Ok(ResourceActionResult::skip(resource.canonical_id.clone(), instance_id, observed));
                }
                self.mutate(&sig_creds, region, instance_id, "StartInstances").await?;
                info!(instance_id, "started VM");
                Ok(ResourceActionResult::success(
                    resource.canonical_id.clone(),
                    instance_id,
                    ActionKind::Start,
                    observed,
                ))
            }
            ActionKind::Skip => Ok(ResourceActionResult::skip(resource.canonical_id.clone(), instance_id, observed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nshift_domain::{CanonicalResourceId, Outcome, ScheduleId, TenantId};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_resource() -> ResourceReference {
        ResourceReference {
            id: "i-0abc123".into(),
            kind: ResourceKind::Vm,
            canonical_id: CanonicalResourceId::parse(
                "arn:nightshift:ec2:us-east-1:123456789012:instance/i-0abc123",
            )
            .unwrap(),
            parent_container_id: None,
        }
    }

    fn test_schedule() -> Schedule {
        Schedule {
            id: ScheduleId::new("s1"),
            name: "test".into(),
            tenant_id: TenantId::new("t1"),
            active: true,
            start_hms: "09:00:00".into(),
            end_hms: "17:00:00".into(),
            timezone: "UTC".into(),
            active_days: vec![],
            resources: vec![],
        }
    }

    fn test_creds() -> SessionCredentials {
        SessionCredentials {
            access_id: "AKIA".into(),
            secret: "secret".into(),
            session_token: "token".into(),
            expiry: chrono::Utc::now(),
            region: "us-east-1".into(),
        }
    }

    #[tokio::test]
    async fn stop_skips_when_already_stopped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("DescribeInstances"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<DescribeInstancesResponse><state><name>stopped</name></state><instanceType>t3.micro</instanceType></DescribeInstancesResponse>",
            ))
            .mount(&server)
            .await;

        let driver = VmDriver::with_endpoints(AwsApiClient::new(), Endpoints::all_pointing_at(&server.uri()));
        let result = driver
            .process(&test_resource(), &test_schedule(), ActionKind::Stop, &test_creds(), &json!({}), None)
            .await
            .unwrap();

        assert_eq!(result.action, ActionKind::Skip);
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.prior_state["priorPowerState"], "stopped");
    }

    #[tokio::test]
    async fn stop_issues_stop_when_running() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("DescribeInstances"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<DescribeInstancesResponse><state><name>running</name></state><instanceType>m5.large</instanceType></DescribeInstancesResponse>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("StopInstances"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<StopInstancesResponse/>"))
            .mount(&server)
            .await;

        let driver = VmDriver::with_endpoints(AwsApiClient::new(), Endpoints::all_pointing_at(&server.uri()));
        let result = driver
            .process(&test_resource(), &test_schedule(), ActionKind::Stop, &test_creds(), &json!({}), None)
            .await
            .unwrap();

        assert_eq!(result.action, ActionKind::Stop);
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.prior_state["priorInstanceType"], "m5.large");
    }

    #[tokio::test]
    async fn start_skips_when_already_running() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("DescribeInstances"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<DescribeInstancesResponse><state><name>running</name></state><instanceType>m5.large</instanceType></DescribeInstancesResponse>",
            ))
            .mount(&server)
            .await;

        let driver = VmDriver::with_endpoints(AwsApiClient::new(), Endpoints::all_pointing_at(&server.uri()));
        let result = driver
            .process(&test_resource(), &test_schedule(), ActionKind::Start, &test_creds(), &json!({}), None)
            .await
            .unwrap();

        assert_eq!(result.action, ActionKind::Skip);
    }
}
