//! Control plane data model
//!
//! Field names follow the control plane's camelCase JSON, which is also the
//! format of deploy files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Service status reported for a service that is serving traffic
pub const STATUS_ACTIVE: &str = "ACTIVE";

/// Service status while a deleted service is being torn down
pub const STATUS_DRAINING: &str = "DRAINING";

/// Service status after a service has been deleted
pub const STATUS_INACTIVE: &str = "INACTIVE";

/// Task and container status once the process has exited
pub const STATUS_STOPPED: &str = "STOPPED";

/// Failure reason the control plane uses for unknown services
pub const REASON_MISSING: &str = "MISSING";

/// Declarative task definition, submitted as a new revision on every deploy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinitionSpec {
    /// Family name shared by all revisions
    pub family: String,
    /// Containers making up the task
    #[serde(default)]
    pub container_definitions: Vec<ContainerDefinition>,
    /// Role assumed by the running containers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_role_arn: Option<String>,
    /// Role used by the agent to pull images and ship logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_role_arn: Option<String>,
    /// Network mode (bridge, host, awsvpc, none)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    /// Task-level CPU units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Task-level memory in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    /// Launch types the task definition is validated against
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_compatibilities: Vec<String>,
}

/// Container within a task definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    /// Container name
    pub name: String,
    /// Image reference
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<i64>,
    /// Hard memory limit in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<i64>,
    /// Soft memory limit in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_reservation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub essential: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_point: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<KeyValuePair>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<PortMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_configuration: Option<LogConfiguration>,
}

/// Environment variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValuePair {
    pub name: String,
    pub value: String,
}

/// Container port mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Log driver configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfiguration {
    /// Driver name, e.g. `awslogs`
    pub log_driver: String,
    /// Driver options
    #[serde(default)]
    pub options: HashMap<String, String>,
}

/// A registered, immutable task definition revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinitionRevision {
    /// Full identifier of the revision
    pub task_definition_arn: String,
    pub family: String,
    /// Revision number within the family
    pub revision: i64,
}

impl TaskDefinitionRevision {
    /// Identifier passed to service and task calls
    pub fn arn(&self) -> &str {
        &self.task_definition_arn
    }
}

/// Desired long-running deployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Service name, unique within the cluster
    pub service_name: String,
    /// Cluster the service runs in
    #[serde(default)]
    pub cluster: String,
    /// Number of task copies to keep running
    #[serde(default = "default_desired_count")]
    pub desired_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_configuration: Option<DeploymentConfiguration>,
    /// Only honored at creation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_balancers: Vec<LoadBalancer>,
    /// Only honored at creation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub placement_constraints: Vec<PlacementConstraint>,
    /// Role the scheduler uses to register tasks with load balancers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

fn default_desired_count() -> i64 {
    1
}

/// Rolling deployment bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfiguration {
    /// Upper bound of running tasks during a deployment, percent of desired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_percent: Option<i64>,
    /// Lower bound of healthy tasks during a deployment, percent of desired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_healthy_percent: Option<i64>,
}

/// Load balancer attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_group_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancer_name: Option<String>,
    pub container_name: String,
    pub container_port: u16,
}

/// Placement constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementConstraint {
    /// `distinctInstance` or `memberOf`
    #[serde(rename = "type")]
    pub constraint_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

/// Service as reported by the control plane
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceState {
    pub service_name: String,
    #[serde(default)]
    pub service_arn: Option<String>,
    #[serde(default)]
    pub cluster_arn: Option<String>,
    /// ACTIVE, DRAINING or INACTIVE
    #[serde(default)]
    pub status: String,
    /// Task definition the primary deployment runs
    #[serde(default)]
    pub task_definition: Option<String>,
    #[serde(default)]
    pub desired_count: i64,
    #[serde(default)]
    pub running_count: i64,
    #[serde(default)]
    pub pending_count: i64,
    /// In-flight and primary deployments
    #[serde(default)]
    pub deployments: Vec<ServiceDeployment>,
}

impl ServiceState {
    /// Whether the service is live and can be updated in place
    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }

    /// Whether the service has been deleted or is being deleted
    pub fn is_gone(&self) -> bool {
        self.status == STATUS_DRAINING || self.status == STATUS_INACTIVE
    }

    /// Single deployment with every desired task running
    pub fn is_stable(&self) -> bool {
        self.is_active()
            && self.deployments.len() == 1
            && self.running_count == self.desired_count
    }
}

/// One deployment of a service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDeployment {
    #[serde(default)]
    pub id: String,
    /// PRIMARY, ACTIVE or INACTIVE
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub task_definition: Option<String>,
    #[serde(default)]
    pub desired_count: i64,
    #[serde(default)]
    pub running_count: i64,
    #[serde(default)]
    pub pending_count: i64,
}

/// Parameters of a CreateService call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceParams {
    /// Idempotency token, fresh per call
    pub client_token: String,
    pub cluster: String,
    pub service_name: String,
    pub task_definition: String,
    pub desired_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_configuration: Option<DeploymentConfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_balancers: Vec<LoadBalancer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub placement_constraints: Vec<PlacementConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Parameters of an UpdateService call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateServiceParams {
    pub cluster: String,
    /// Name of the existing service
    pub service: String,
    pub task_definition: String,
    pub desired_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_configuration: Option<DeploymentConfiguration>,
}

/// Resource-level failure reported alongside a successful call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    #[serde(default)]
    pub arn: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl Failure {
    pub fn arn_or_unknown(&self) -> String {
        self.arn.clone().unwrap_or_else(|| "unknown".to_string())
    }

    /// Reason with detail appended when the control plane supplied one
    pub fn describe(&self) -> String {
        let reason = self.reason.as_deref().unwrap_or("unknown reason");
        match self.detail.as_deref() {
            Some(detail) if !detail.is_empty() => format!("{} ({})", reason, detail),
            _ => reason.to_string(),
        }
    }
}

/// Outcome of a RunTask call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTaskOutput {
    #[serde(default)]
    pub tasks: Vec<TaskStatus>,
    #[serde(default)]
    pub failures: Vec<Failure>,
}

/// Task as reported by the control plane
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    pub task_arn: String,
    #[serde(default)]
    pub last_status: Option<String>,
    #[serde(default)]
    pub desired_status: Option<String>,
    #[serde(default)]
    pub stopped_reason: Option<String>,
    #[serde(default)]
    pub containers: Vec<ContainerStatus>,
    #[serde(default, deserialize_with = "epoch_seconds", skip_serializing)]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl TaskStatus {
    /// First container of the task; tasks are assumed single-container
    pub fn primary_container(&self) -> Option<&ContainerStatus> {
        self.containers.first()
    }

    pub fn is_stopped(&self) -> bool {
        self.last_status.as_deref() == Some(STATUS_STOPPED)
    }
}

/// Container state within a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_status: Option<String>,
    /// Present once the container process has exited
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ContainerStatus {
    pub fn is_stopped(&self) -> bool {
        self.last_status.as_deref() == Some(STATUS_STOPPED)
    }
}

/// Timestamps arrive as fractional seconds since the epoch
fn epoch_seconds<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs: Option<f64> = Option::deserialize(deserializer)?;
    Ok(secs.and_then(|s| {
        let whole = s.trunc() as i64;
        let nanos = (s.fract() * 1e9) as u32;
        DateTime::from_timestamp(whole, nanos)
    }))
}
