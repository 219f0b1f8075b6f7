use async_trait::async_trait;
use nshift_domain::{
    ActionKind, ResourceActionResult, ResourceKind, ResourceReference, Schedule, SessionCredentials,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::aws_client::{xml_all_texts, xml_text, AwsApiClient, Endpoints, SigningCredentials};
use crate::driver::Driver;
use crate::error::DriverError;

/// Observed (min, max, desired) capacity for one Auto Scaling group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AsgCapacity {
    pub min: i64,
    pub max: i64,
    pub desired: i64,
}

/// Describe a single ASG's capacity triple. Shared by [`AsgDriver`] and the
/// container-service driver's backing-ASG bookkeeping.
pub(crate) async fn describe_asg(
    client: &AwsApiClient,
    endpoints: &Endpoints,
    creds: &SigningCredentials,
    region: &str,
    asg_name: &str,
) -> Result<AsgCapacity, DriverError> {
    let xml = client
        .query_api(
            &endpoints.autoscaling(region),
            region,
            "autoscaling",
            creds,
            &[
                ("Action", "DescribeAutoScalingGroups"),
                ("Version", "2011-01-01"),
                ("AutoScalingGroupNames.member.1", asg_name),
            ],
        )
        .await
        .map_err(|e| DriverError::ResourceDescribeFailed(e.to_string()))?;

    let min = xml_text(&xml, "MinSize").and_then(|s| s.parse().ok()).unwrap_or(0);
    let max = xml_text(&xml, "MaxSize").and_then(|s| s.parse().ok()).unwrap_or(0);
    let desired = xml_text(&xml, "DesiredCapacity").and_then(|s| s.parse().ok()).unwrap_or(0);
    Ok(AsgCapacity { min, max, desired })
}

/// Instance ids in `asg_name` currently under scale-in protection.
pub(crate) async fn protected_instance_ids(
    client: &AwsApiClient,
    endpoints: &Endpoints,
    creds: &SigningCredentials,
    region: &str,
    asg_name: &str,
) -> Result<Vec<String>, DriverError> {
    let xml = client
        .query_api(
            &endpoints.autoscaling(region),
            region,
            "autoscaling",
            creds,
            &[
                ("Action", "DescribeAutoScalingGroups"),
                ("Version", "2011-01-01"),
                ("AutoScalingGroupNames.member.1", asg_name),
            ],
        )
        .await
        .map_err(|e| DriverError::ResourceDescribeFailed(e.to_string()))?;

    // Instances protected from scale-in carry <ProtectedFromScaleIn>true</...>
    // immediately following their <InstanceId>; xml_all_texts can't express
    // that structural pairing, so scan the raw markup for the member blocks.
    let mut ids = Vec::new();
    for member in xml.split("<member>").skip(1) {
        let end = member.find("</member>").unwrap_or(member.len());
        let block = &member[..end];
        if block.contains("<ProtectedFromScaleIn>true</ProtectedFromScaleIn>") {
            if let Some(id) = xml_text(block, "InstanceId") {
                ids.push(id);
            }
        }
    }
    Ok(ids)
}

pub(crate) async fn clear_scale_in_protection(
    client: &AwsApiClient,
    endpoints: &Endpoints,
    creds: &SigningCredentials,
    region: &str,
    asg_name: &str,
    instance_ids: &[String],
) -> Result<(), DriverError> {
    if instance_ids.is_empty() {
        return Ok(());
    }
    let mut params: Vec<(&str, &str)> = vec![
        ("Action", "SetInstanceProtection"),
        ("Version", "2011-01-01"),
        ("AutoScalingGroupName", asg_name),
        ("ProtectedFromScaleIn", "false"),
    ];
    let keys: Vec<String> =
        (1..=instance_ids.len()).map(|i| format!("InstanceIds.member.{}", i)).collect();
    for (key, id) in keys.iter().zip(instance_ids.iter()) {
        params.push((key.as_str(), id.as_str()));
    }
    client
        .query_api(&endpoints.autoscaling(region), region, "autoscaling", creds, &params)
        .await
        .map_err(|e| DriverError::ResourceMutateFailed(e.to_string()))?;
    Ok(())
}

pub(crate) async fn update_asg(
    client: &AwsApiClient,
    endpoints: &Endpoints,
    creds: &SigningCredentials,
    region: &str,
    asg_name: &str,
    capacity: AsgCapacity,
) -> Result<(), DriverError> {
    let min = capacity.min.to_string();
    let max = capacity.max.to_string();
    let desired = capacity.desired.to_string();
    client
        .query_api(
            &endpoints.autoscaling(region),
            region,
            "autoscaling",
            creds,
            &[
                ("Action", "UpdateAutoScalingGroup"),
                ("Version", "2011-01-01"),
                ("AutoScalingGroupName", asg_name),
                ("MinSize", &min),
                ("MaxSize", &max),
                ("DesiredCapacity", &desired),
            ],
        )
        .await
        .map_err(|e| DriverError::ResourceMutateFailed(e.to_string()))?;
    Ok(())
}

/// Auto Scaling Group Driver — used when an ASG is itself a
/// direct schedule target rather than the backing scale unit of a container
/// service (see [`crate::container_service::ContainerServiceDriver`]).
pub struct AsgDriver {
    client: AwsApiClient,
    endpoints: Endpoints,
}

impl AsgDriver {
    pub fn new(client: AwsApiClient) -> Self {
        Self { client, endpoints: Endpoints::default() }
    }

    #[cfg(test)]
    pub(crate) fn with_endpoints(client: AwsApiClient, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }
}

#[async_trait]
impl Driver for AsgDriver {
    fn kind(&self) -> ResourceKind {
        ResourceKind::AutoScalingGroup
    }

    async fn process(
        &self,
        resource: &ResourceReference,
        _schedule: &Schedule,
        action: ActionKind,
        creds: &SessionCredentials,
        _meta: &serde_json::Value,
        prior_state: Option<&serde_json::Value>,
    ) -> Result<ResourceActionResult, DriverError> {
        let sig_creds = SigningCredentials {
            access_key_id: creds.access_id.clone(),
            secret_access_key: creds.secret.clone(),
            session_token: Some(creds.session_token.clone()),
        };
        let region = resource.canonical_id.region();
        let asg_name = resource.canonical_id.local_id();

        let current = describe_asg(&self.client, &self.endpoints, &sig_creds, region, asg_name).await?;
        debug!(asg_name, ?current, "observed ASG capacity");

        match action {
            ActionKind::Stop => {
                if current.min == 0 && current.max == 0 && current.desired == 0 {
                    let observed = json!({ "priorCapacity": capacity_json(current) });
                    return Ok(ResourceActionResult::skip(resource.canonical_id.clone(), asg_name, observed));
                }
                update_asg(&self.client, &self.endpoints, &sig_creds, region, asg_name, AsgCapacity { min: 0, max: 0, desired: 0 })
                    .await?;
                info!(asg_name, "stopped ASG");
                let observed = json!({ "priorCapacity": capacity_json(current) });
                Ok(ResourceActionResult::success(resource.canonical_id.clone(), asg_name, ActionKind::Stop, observed))
            }
            ActionKind::Start => {
                if current.desired > 0 {
                    let observed = json!({ "priorCapacity": capacity_json(current) });
                    return Ok(ResourceActionResult::skip(resource.canonical_id.clone(), asg_name, observed));
                }
                let target = prior_capacity(prior_state).unwrap_or(AsgCapacity {
                    min: 0,
                    max: current.max.max(1),
                    desired: 1,
                });
                let restored = AsgCapacity {
                    min: target.min,
                    max: target.max.max(1),
                    desired: if target.desired > 0 { target.desired } else { 1 },
                };
                if prior_capacity(prior_state).is_none() {
                    warn!(asg_name, "no captured prior capacity, applying fallback capacity=1");
                }
                update_asg(&self.client, &self.endpoints, &sig_creds, region, asg_name, restored).await?;
                info!(asg_name, "started ASG");
                let observed = json!({ "priorCapacity": capacity_json(current) });
                Ok(ResourceActionResult::success(resource.canonical_id.clone(), asg_name, ActionKind::Start, observed))
            }
            ActionKind::Skip => {
                let observed = json!({ "priorCapacity": capacity_json(current) });
                Ok(ResourceActionResult::skip(resource.canonical_id.clone(), asg_name, observed))
            }
        }
    }
}

fn capacity_json(c: AsgCapacity) -> serde_json::Value {
    json!({ "min": c.min, "max": c.max, "desired": c.desired })
}

fn prior_capacity(prior_state: Option<&serde_json::Value>) -> Option<AsgCapacity> {
    let v = prior_state?.get("priorCapacity")?;
    Some(AsgCapacity {
        min: v.get("min")?.as_i64()?,
        max: v.get("max")?.as_i64()?,
        desired: v.get("desired")?.as_i64()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nshift_domain::{CanonicalResourceId, Outcome, ScheduleId, TenantId};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_resource() -> ResourceReference {
        ResourceReference {
            id: "web-asg".into(),
            kind: ResourceKind::AutoScalingGroup,
            canonical_id: CanonicalResourceId::parse(
                "arn:nightshift:autoscaling:us-east-1:123456789012:autoScalingGroup/web-asg",
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

    fn describe_body(min: i64, max: i64, desired: i64) -> String {
        format!(
            "<DescribeAutoScalingGroupsResponse><AutoScalingGroups><member><MinSize>{}</MinSize><MaxSize>{}</MaxSize><DesiredCapacity>{}</DesiredCapacity></member></AutoScalingGroups></DescribeAutoScalingGroupsResponse>",
            min, max, desired
        )
    }

    #[tokio::test]
    async fn stop_captures_and_zeroes_capacity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("DescribeAutoScalingGroups"))
            .respond_with(ResponseTemplate::new(200).set_body_string(describe_body(2, 5, 3)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("UpdateAutoScalingGroup"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<UpdateAutoScalingGroupResponse/>"))
            .mount(&server)
            .await;

        let driver = AsgDriver::with_endpoints(AwsApiClient::new(), Endpoints::all_pointing_at(&server.uri()));
        let result = driver
            .process(&test_resource(), &test_schedule(), ActionKind::Stop, &test_creds(), &json!({}), None)
            .await
            .unwrap();

        assert_eq!(result.action, ActionKind::Stop);
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.prior_state["priorCapacity"]["desired"], 3);
    }

    #[tokio::test]
    async fn start_restores_captured_capacity() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("DescribeAutoScalingGroups"))
            .respond_with(ResponseTemplate::new(200).set_body_string(describe_body(0, 0, 0)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("UpdateAutoScalingGroup"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<UpdateAutoScalingGroupResponse/>"))
            .mount(&server)
            .await;

        let prior = json!({ "priorCapacity": { "min": 2, "max": 5, "desired": 3 } });
        let driver = AsgDriver::with_endpoints(AwsApiClient::new(), Endpoints::all_pointing_at(&server.uri()));
        let result = driver
            .process(&test_resource(), &test_schedule(), ActionKind::Start, &test_creds(), &json!({}), Some(&prior))
            .await
            .unwrap();

        assert_eq!(result.action, ActionKind::Start);
        assert_eq!(result.outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn stop_skips_when_already_zeroed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("DescribeAutoScalingGroups"))
            .respond_with(ResponseTemplate::new(200).set_body_string(describe_body(0, 0, 0)))
            .mount(&server)
            .await;

        let driver = AsgDriver::with_endpoints(AwsApiClient::new(), Endpoints::all_pointing_at(&server.uri()));
        let result = driver
            .process(&test_resource(), &test_schedule(), ActionKind::Stop, &test_creds(), &json!({}), None)
            .await
            .unwrap();

        assert_eq!(result.action, ActionKind::Skip);
    }
}
