use std::collections::HashSet;

use async_trait::async_trait;
use nshift_domain::{
    ActionKind, ResourceActionResult, ResourceKind, ResourceReference, Schedule, SessionCredentials,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::asg::{self, AsgCapacity};
use crate::aws_client::{AwsApiClient, Endpoints, SigningCredentials};
use crate::driver::Driver;
use crate::error::DriverError;

const ECS_TARGET_NS: &str = "AmazonEC2ContainerServiceV20141113";

/// Container-Service Driver. Manages an ECS service's desired
/// count together with whatever Auto Scaling groups back its cluster
/// capacity. The hardest of the four resource drivers: stopping a service is
/// only "done" once the whole cluster is idle and its backing compute is
/// parked, and starting must restore that compute before the service itself
/// is told to scale back up.
pub struct ContainerServiceDriver {
    client: AwsApiClient,
    ecs_endpoints: Endpoints,
    asg_endpoints: Endpoints,
}

#[derive(Debug, Clone)]
struct ServiceState {
    desired: i64,
    running: i64,
    pending: i64,
    status: String,
}

impl ContainerServiceDriver {
    pub fn new(client: AwsApiClient) -> Self {
        Self { client, ecs_endpoints: Endpoints::default(), asg_endpoints: Endpoints::default() }
    }

    #[cfg(test)]
    pub(crate) fn with_endpoints(client: AwsApiClient, ecs: Endpoints, autoscaling: Endpoints) -> Self {
        Self { client, ecs_endpoints: ecs, asg_endpoints: autoscaling }
    }

    async fn ecs_call(
        &self,
        creds: &SigningCredentials,
        region: &str,
        action: &str,
        body: Value,
    ) -> Result<Value, DriverError> {
        let target = format!("{}.{}", ECS_TARGET_NS, action);
        self.client.json_api(&self.ecs_endpoints.ecs(region), region, "ecs", &target, creds, &body).await
    }

    async fn describe_service(
        &self,
        creds: &SigningCredentials,
        region: &str,
        cluster: &str,
        service: &str,
    ) -> Result<ServiceState, DriverError> {
        let resp = self
            .ecs_call(
                creds,
                region,
                "DescribeServices",
                json!({ "cluster": cluster, "services": [service] }),
            )
            .await
            .map_err(|e| DriverError::ResourceDescribeFailed(e.to_string()))?;

        let svc = resp["services"]
            .get(0)
            .ok_or_else(|| DriverError::ResourceDescribeFailed(format!("service {} not found in cluster {}", service, cluster)))?;

        Ok(ServiceState {
            desired: svc["desiredCount"].as_i64().unwrap_or(0),
            running: svc["runningCount"].as_i64().unwrap_or(0),
            pending: svc["pendingCount"].as_i64().unwrap_or(0),
            status: svc["status"].as_str().unwrap_or("UNKNOWN").to_string(),
        })
    }

    async fn set_desired_count(
        &self,
        creds: &SigningCredentials,
        region: &str,
        cluster: &str,
        service: &str,
        desired: i64,
    ) -> Result<(), DriverError> {
        self.ecs_call(
            creds,
            region,
            "UpdateService",
            json!({ "cluster": cluster, "service": service, "desiredCount": desired }),
        )
        .await
        .map_err(|e| DriverError::ResourceMutateFailed(e.to_string()))?;
        Ok(())
    }

    /// Lists every service in `cluster` other than `exclude_service`. A
    /// failure here must be treated as "cluster not idle"
    /// (`ClusterIdlenessCheckFailed`) rather than propagated — caller decides.
    async fn other_services_idle(
        &self,
        creds: &SigningCredentials,
        region: &str,
        cluster: &str,
        exclude_service: &str,
    ) -> Result<bool, DriverError> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut body = json!({ "cluster": cluster });
            if let Some(ref token) = next_token {
                body["nextToken"] = json!(token);
            }
            let resp = self.ecs_call(creds, region, "ListServices", body).await?;
            for arn in resp["serviceArns"].as_array().into_iter().flatten() {
                if let Some(arn) = arn.as_str() {
                    if let Some(name) = arn.rsplit('/').next() {
                        if name != exclude_service {
                            names.push(name.to_string());
                        }
                    }
                }
            }
            next_token = resp["nextToken"].as_str().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        if names.is_empty() {
            return Ok(true);
        }

        for chunk in names.chunks(10) {
            let resp = self
                .ecs_call(creds, region, "DescribeServices", json!({ "cluster": cluster, "services": chunk }))
                .await?;
            for svc in resp["services"].as_array().into_iter().flatten() {
                let desired = svc["desiredCount"].as_i64().unwrap_or(0);
                let running = svc["runningCount"].as_i64().unwrap_or(0);
                if desired != 0 || running != 0 {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Backing ASG names for `cluster`, discovered two ways and unioned:
    /// non-serverless capacity providers, and the ASGs owning the cluster's
    /// registered container-host instances.
    async fn backing_asg_names(
        &self,
        creds: &SigningCredentials,
        region: &str,
        cluster: &str,
    ) -> Result<Vec<String>, DriverError> {
        let mut names: HashSet<String> = HashSet::new();

        if let Ok(resp) = self.ecs_call(creds, region, "DescribeClusters", json!({ "clusters": [cluster] })).await {
            let provider_names: Vec<String> = resp["clusters"]
                .get(0)
                .and_then(|c| c["capacityProviders"].as_array())
                .into_iter()
                .flatten()
                .filter_map(|v| v.as_str())
                .filter(|name| !name.starts_with("FARGATE"))
                .map(str::to_string)
                .collect();

            if !provider_names.is_empty() {
                if let Ok(cp_resp) = self
                    .ecs_call(creds, region, "DescribeCapacityProviders", json!({ "capacityProviders": provider_names }))
                    .await
                {
                    for cp in cp_resp["capacityProviders"].as_array().into_iter().flatten() {
                        if let Some(arn) = cp["autoScalingGroupProvider"]["autoScalingGroupArn"].as_str() {
                            if let Some(name) = arn.rsplit('/').next() {
                                names.insert(name.to_string());
                            }
                        }
                    }
                }
            }
        }

        if let Ok(instance_ids) = self.container_host_instance_ids(creds, region, cluster).await {
            if !instance_ids.is_empty() {
                if let Ok(asg_names) = self.instances_to_asg_names(creds, region, &instance_ids).await {
                    names.extend(asg_names);
                }
            }
        }

        Ok(names.into_iter().collect())
    }

    async fn container_host_instance_ids(
        &self,
        creds: &SigningCredentials,
        region: &str,
        cluster: &str,
    ) -> Result<Vec<String>, DriverError> {
        let list_resp = self
            .ecs_call(creds, region, "ListContainerInstances", json!({ "cluster": cluster }))
            .await?;
        let arns: Vec<String> = list_resp["containerInstanceArns"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        if arns.is_empty() {
            return Ok(vec![]);
        }

        let describe_resp = self
            .ecs_call(
                creds,
                region,
                "DescribeContainerInstances",
                json!({ "cluster": cluster, "containerInstances": arns }),
            )
            .await?;
        Ok(describe_resp["containerInstances"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|ci| ci["ec2InstanceId"].as_str().map(str::to_string))
            .collect())
    }

    async fn instances_to_asg_names(
        &self,
        creds: &SigningCredentials,
        region: &str,
        instance_ids: &[String],
    ) -> Result<Vec<String>, DriverError> {
        let mut params: Vec<(&str, &str)> = vec![
            ("Action", "DescribeAutoScalingInstances"),
            ("Version", "2011-01-01"),
        ];
        let keys: Vec<String> = (1..=instance_ids.len()).map(|i| format!("InstanceIds.member.{}", i)).collect();
        for (key, id) in keys.iter().zip(instance_ids.iter()) {
            params.push((key.as_str(), id.as_str()));
        }
        let xml = self
            .client
            .query_api(&self.asg_endpoints.autoscaling(region), region, "autoscaling", creds, &params)
            .await
            .map_err(|e| DriverError::ResourceDescribeFailed(e.to_string()))?;
        Ok(crate::aws_client::xml_all_texts(&xml, "AutoScalingGroupName"))
    }
}

#[async_trait]
impl Driver for ContainerServiceDriver {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ContainerService
    }

    async fn process(
        &self,
        resource: &ResourceReference,
        _schedule: &Schedule,
        action: ActionKind,
        creds: &SessionCredentials,
        meta: &serde_json::Value,
        prior_state: Option<&serde_json::Value>,
    ) -> Result<ResourceActionResult, DriverError> {
        let sig_creds = SigningCredentials {
            access_key_id: creds.access_id.clone(),
            secret_access_key: creds.secret.clone(),
            session_token: Some(creds.session_token.clone()),
        };
        let region = resource.canonical_id.region();
        let service = resource.canonical_id.local_id();
        let cluster = resource
            .canonical_id
            .parent_id()
            .or_else(|| meta["clusterId"].as_str())
            .ok_or_else(|| DriverError::Internal(format!("no cluster id for service {}", service)))?
            .to_string();

        match action {
            ActionKind::Stop => self.stop(&sig_creds, region, &cluster, service, resource).await,
            ActionKind::Start => self.start(&sig_creds, region, &cluster, service, resource, prior_state).await,
            ActionKind::Skip => {
                let state = self.describe_service(&sig_creds, region, &cluster, service).await?;
                Ok(ResourceActionResult::skip(resource.canonical_id.clone(), service, service_json(&state, &[])))
            }
        }
    }
}

fn service_json(state: &ServiceState, backing_asg_state: &[Value]) -> Value {
    json!({
        "priorDesired": state.desired,
        "priorRunning": state.running,
        "priorPending": state.pending,
        "priorStatus": state.status,
        "backingAsgState": backing_asg_state,
    })
}

impl ContainerServiceDriver {
    async fn stop(
        &self,
        creds: &SigningCredentials,
        region: &str,
        cluster: &str,
        service: &str,
        resource: &ResourceReference,
    ) -> Result<ResourceActionResult, DriverError> {
        let current = self.describe_service(creds, region, cluster, service).await?;
        debug!(service, cluster, ?current, "observed container service state");

        let mut service_stopped = false;
        if current.desired > 0 {
            self.set_desired_count(creds, region, cluster, service, 0).await?;
            service_stopped = true;
            info!(service, cluster, "stopped container service");
        }

        let idle = self.other_services_idle(creds, region, cluster, service).await.unwrap_or_else(|e| {
            warn!(cluster, error = %e, "cluster idleness check failed, treating as not idle");
            false
        });

        let mut backing_asg_state = Vec::new();
        let mut asg_stopped = false;
        let mut asg_park_failures = Vec::new();

        if idle {
            let asg_names = self.backing_asg_names(creds, region, cluster).await.unwrap_or_else(|e| {
                warn!(cluster, error = %e, "backing ASG discovery failed, no ASG capacity parked");
                vec![]
            });

            for asg_name in asg_names {
                let protected = asg::protected_instance_ids(&self.client, &self.asg_endpoints, creds, region, &asg_name)
                    .await
                    .unwrap_or_default();
                if !protected.is_empty() {
                    if let Err(e) =
                        asg::clear_scale_in_protection(&self.client, &self.asg_endpoints, creds, region, &asg_name, &protected).await
                    {
                        warn!(asg_name, error = %e, "failed to clear scale-in protection, continuing");
                    }
                }

                let capacity = match asg::describe_asg(&self.client, &self.asg_endpoints, creds, region, &asg_name).await {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(asg_name, error = %e, "failed to describe backing ASG, skipping");
                        continue;
                    }
                };

                if capacity.desired > 0 || capacity.min > 0 {
                    // Only capture the triple once the park mutation has actually
                    // succeeded — a captured-but-unparked ASG would violate the
                    // invariant that every captured triple is either parked or the
                    // result is failed.
                    match asg::update_asg(
                        &self.client,
                        &self.asg_endpoints,
                        creds,
                        region,
                        &asg_name,
                        AsgCapacity { min: 0, max: 0, desired: 0 },
                    )
                    .await
                    {
                        Ok(()) => {
                            backing_asg_state.push(json!({
                                "asgName": asg_name,
                                "min": capacity.min,
                                "max": capacity.max,
                                "desired": capacity.desired,
                            }));
                            asg_stopped = true;
                            info!(asg_name, "parked backing ASG");
                        }
                        Err(e) => {
                            warn!(asg_name, error = %e, "failed to park backing ASG");
                            asg_park_failures.push(format!("{}: {}", asg_name, e));
                        }
                    }
                }
            }
        }

        if !asg_park_failures.is_empty() {
            return Ok(ResourceActionResult::failed(
                resource.canonical_id.clone(),
                service,
                ActionKind::Stop,
                format!("failed to park backing ASG(s): {}", asg_park_failures.join("; ")),
            ));
        }

        let observed = service_json(&current, &backing_asg_state);
        if service_stopped || asg_stopped {
            Ok(ResourceActionResult::success(resource.canonical_id.clone(), service, ActionKind::Stop, observed))
        } else {
            Ok(ResourceActionResult::skip(resource.canonical_id.clone(), service, observed))
        }
    }

    async fn start(
        &self,
        creds: &SigningCredentials,
        region: &str,
        cluster: &str,
        service: &str,
        resource: &ResourceReference,
        prior_state: Option<&serde_json::Value>,
    ) -> Result<ResourceActionResult, DriverError> {
        let captured: Vec<(String, AsgCapacity)> = prior_state
            .and_then(|p| p["backingAsgState"].as_array())
            .into_iter()
            .flatten()
            .filter_map(|v| {
                let name = v["asgName"].as_str()?.to_string();
                Some((
                    name,
                    AsgCapacity {
                        min: v["min"].as_i64()?,
                        max: v["max"].as_i64()?,
                        desired: v["desired"].as_i64()?,
                    },
                ))
            })
            .collect();

        let mut warnings = Vec::new();

        if !captured.is_empty() {
            for (asg_name, capacity) in &captured {
                if let Err(e) = asg::update_asg(&self.client, &self.asg_endpoints, creds, region, asg_name, *capacity).await {
                    warn!(asg_name, error = %e, "failed to restore backing ASG, continuing start");
                } else {
                    info!(asg_name, "restored backing ASG capacity");
                }
            }
        } else {
            let asg_names = self.backing_asg_names(creds, region, cluster).await.unwrap_or_default();
            for asg_name in asg_names {
                if let Ok(current) = asg::describe_asg(&self.client, &self.asg_endpoints, creds, region, &asg_name).await {
                    if current.desired == 0 {
                        let fallback = AsgCapacity {
                            min: if current.min == 0 { 1 } else { current.min },
                            max: current.max.max(1),
                            desired: 1,
                        };
                        if asg::update_asg(&self.client, &self.asg_endpoints, creds, region, &asg_name, fallback)
                            .await
                            .is_ok()
                        {
                            warn!(asg_name, "no captured prior ASG state, applied fallback capacity=1");
                            warnings.push(format!("fallback capacity applied to {}", asg_name));
                        }
                    }
                }
            }
        }

        let current = self.describe_service(creds, region, cluster, service).await?;
        let observed = json!({
            "priorDesired": current.desired,
            "priorRunning": current.running,
            "priorPending": current.pending,
            "priorStatus": current.status,
            "warnings": warnings,
        });

        if current.desired == 0 {
            let target = captured_service_target(prior_state).unwrap_or(1);
            self.set_desired_count(creds, region, cluster, service, target).await?;
            info!(service, cluster, target, "started container service");
            Ok(ResourceActionResult::success(resource.canonical_id.clone(), service, ActionKind::Start, observed))
        } else {
            Ok(ResourceActionResult::skip(resource.canonical_id.clone(), service, observed))
        }
    }
}

fn captured_service_target(prior_state: Option<&serde_json::Value>) -> Option<i64> {
    let desired = prior_state?["priorDesired"].as_i64()?;
    if desired > 0 {
        Some(desired)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nshift_domain::{CanonicalResourceId, Outcome, ScheduleId, TenantId};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_resource() -> ResourceReference {
        ResourceReference {
            id: "web".into(),
            kind: ResourceKind::ContainerService,
            canonical_id: CanonicalResourceId::parse(
                "arn:nightshift:ecs:us-east-1:123456789012:service/prod-cluster/web",
            )
            .unwrap(),
            parent_container_id: Some("prod-cluster".into()),
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
    async fn stop_parks_service_without_idle_cluster_leaves_asgs_alone() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.DescribeServices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "services": [{ "desiredCount": 3, "runningCount": 3, "pendingCount": 0, "status": "ACTIVE" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.UpdateService"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "service": {} })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.ListServices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "serviceArns": ["arn:aws:ecs:us-east-1:123456789012:service/prod-cluster/other"]
            })))
            .mount(&server)
            .await;

        let driver = ContainerServiceDriver::with_endpoints(
            AwsApiClient::new(),
            Endpoints::all_pointing_at(&server.uri()),
            Endpoints::all_pointing_at(&server.uri()),
        );
        let result = driver
            .process(&test_resource(), &test_schedule(), ActionKind::Stop, &test_creds(), &json!({}), None)
            .await
            .unwrap();

        assert_eq!(result.action, ActionKind::Stop);
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.prior_state["backingAsgState"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn stop_skips_when_already_parked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.DescribeServices"))
            .and(body_string_contains("\"services\":[\"web\"]"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "services": [{ "desiredCount": 0, "runningCount": 0, "pendingCount": 0, "status": "ACTIVE" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.ListServices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "serviceArns": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.DescribeClusters"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "clusters": [{ "capacityProviders": [] }] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.ListContainerInstances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "containerInstanceArns": [] })))
            .mount(&server)
            .await;

        let driver = ContainerServiceDriver::with_endpoints(
            AwsApiClient::new(),
            Endpoints::all_pointing_at(&server.uri()),
            Endpoints::all_pointing_at(&server.uri()),
        );
        let result = driver
            .process(&test_resource(), &test_schedule(), ActionKind::Stop, &test_creds(), &json!({}), None)
            .await
            .unwrap();

        assert_eq!(result.action, ActionKind::Skip);
    }

    #[tokio::test]
    async fn start_restores_asg_before_service() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("UpdateAutoScalingGroup"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<UpdateAutoScalingGroupResponse/>"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.DescribeServices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "services": [{ "desiredCount": 0, "runningCount": 0, "pendingCount": 0, "status": "ACTIVE" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.UpdateService"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "service": {} })))
            .mount(&server)
            .await;

        let prior = json!({
            "priorDesired": 3,
            "backingAsgState": [{ "asgName": "prod-cluster-hosts", "min": 2, "max": 5, "desired": 3 }],
        });

        let driver = ContainerServiceDriver::with_endpoints(
            AwsApiClient::new(),
            Endpoints::all_pointing_at(&server.uri()),
            Endpoints::all_pointing_at(&server.uri()),
        );
        let result = driver
            .process(&test_resource(), &test_schedule(), ActionKind::Start, &test_creds(), &json!({}), Some(&prior))
            .await
            .unwrap();

        assert_eq!(result.action, ActionKind::Start);
        assert_eq!(result.outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn stop_on_idle_cluster_tears_down_backing_asg() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.DescribeServices"))
            .and(body_string_contains("\"services\":[\"web\"]"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "services": [{ "desiredCount": 3, "runningCount": 3, "pendingCount": 0, "status": "ACTIVE" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.UpdateService"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "service": {} })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.ListServices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "serviceArns": ["arn:aws:ecs:us-east-1:123456789012:service/prod-cluster/other"]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.DescribeServices"))
            .and(body_string_contains("\"services\":[\"other\"]"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "services": [{ "desiredCount": 0, "runningCount": 0, "pendingCount": 0, "status": "ACTIVE" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.DescribeClusters"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "clusters": [{ "capacityProviders": ["cluster-cp"] }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.DescribeCapacityProviders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "capacityProviders": [{
                    "autoScalingGroupProvider": {
                        "autoScalingGroupArn": "arn:aws:autoscaling:us-east-1:123456789012:autoScalingGroup:id:autoScalingGroupName/g1"
                    }
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.ListContainerInstances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "containerInstanceArns": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("Action=DescribeAutoScalingGroups"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<DescribeAutoScalingGroupsResponse><DescribeAutoScalingGroupsResult><AutoScalingGroups><member>\
                 <MinSize>2</MinSize><MaxSize>10</MaxSize><DesiredCapacity>2</DesiredCapacity>\
                 <Instances><member><InstanceId>i-protected</InstanceId>\
                 <ProtectedFromScaleIn>true</ProtectedFromScaleIn></member></Instances>\
                 </member></AutoScalingGroups></DescribeAutoScalingGroupsResult>\
                 </DescribeAutoScalingGroupsResponse>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("Action=SetInstanceProtection"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<SetInstanceProtectionResponse/>"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("Action=UpdateAutoScalingGroup"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<UpdateAutoScalingGroupResponse/>"))
            .mount(&server)
            .await;

        let driver = ContainerServiceDriver::with_endpoints(
            AwsApiClient::new(),
            Endpoints::all_pointing_at(&server.uri()),
            Endpoints::all_pointing_at(&server.uri()),
        );
        let result = driver
            .process(&test_resource(), &test_schedule(), ActionKind::Stop, &test_creds(), &json!({}), None)
            .await
            .unwrap();

        assert_eq!(result.action, ActionKind::Stop);
        assert_eq!(result.outcome, Outcome::Success);
        assert_eq!(result.prior_state["priorDesired"], json!(3));
        let backing = result.prior_state["backingAsgState"].as_array().unwrap();
        assert_eq!(backing.len(), 1);
        assert_eq!(backing[0]["asgName"], json!("g1"));
        assert_eq!(backing[0]["min"], json!(2));
        assert_eq!(backing[0]["max"], json!(10));
        assert_eq!(backing[0]["desired"], json!(2));
    }

    #[tokio::test]
    async fn start_without_captured_state_applies_fallback_capacity_with_warning() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.DescribeClusters"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "clusters": [{ "capacityProviders": ["cluster-cp"] }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.DescribeCapacityProviders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "capacityProviders": [{
                    "autoScalingGroupProvider": {
                        "autoScalingGroupArn": "arn:aws:autoscaling:us-east-1:123456789012:autoScalingGroup:id:autoScalingGroupName/g1"
                    }
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.ListContainerInstances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "containerInstanceArns": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("Action=DescribeAutoScalingGroups"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<DescribeAutoScalingGroupsResponse><DescribeAutoScalingGroupsResult><AutoScalingGroups><member>\
                 <MinSize>0</MinSize><MaxSize>0</MaxSize><DesiredCapacity>0</DesiredCapacity>\
                 </member></AutoScalingGroups></DescribeAutoScalingGroupsResult>\
                 </DescribeAutoScalingGroupsResponse>",
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_string_contains("Action=UpdateAutoScalingGroup"))
            .and(body_string_contains("MinSize=1"))
            .and(body_string_contains("DesiredCapacity=1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<UpdateAutoScalingGroupResponse/>"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.DescribeServices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "services": [{ "desiredCount": 0, "runningCount": 0, "pendingCount": 0, "status": "ACTIVE" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-Amz-Target", "AmazonEC2ContainerServiceV20141113.UpdateService"))
            .and(body_string_contains("\"desiredCount\":1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "service": {} })))
            .mount(&server)
            .await;

        let driver = ContainerServiceDriver::with_endpoints(
            AwsApiClient::new(),
            Endpoints::all_pointing_at(&server.uri()),
            Endpoints::all_pointing_at(&server.uri()),
        );
        // No prior state at all — simulates a lost or never-written execution record.
        let result = driver
            .process(&test_resource(), &test_schedule(), ActionKind::Start, &test_creds(), &json!({}), None)
            .await
            .unwrap();

        assert_eq!(result.action, ActionKind::Start);
        assert_eq!(result.outcome, Outcome::Success);
        let warnings = result.prior_state["warnings"].as_array().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].as_str().unwrap().contains("fallback"));
    }
}
