//! Cluster control API
//!
//! [`ControlApi`] is the only seam between the deployment pipeline and the
//! external control plane. Each method is a single call with no business
//! logic; errors from the transport come back unchanged.

pub mod http;
pub mod types;
pub mod waiter;

pub use http::{HttpControlApi, HttpControlApiConfig};
pub use types::{
    ContainerDefinition, ContainerStatus, CreateServiceParams, DeploymentConfiguration, Failure,
    LoadBalancer, LogConfiguration, PlacementConstraint, RunTaskOutput, ServiceSpec, ServiceState,
    TaskDefinitionRevision, TaskDefinitionSpec, TaskStatus, UpdateServiceParams,
};
pub use waiter::StabilityWaiter;

use crate::error::ApiResult;
use async_trait::async_trait;

/// Typed façade over the cluster control plane
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Register a new revision of a task definition family.
    ///
    /// Always creates a new revision; identical specs are not deduplicated.
    async fn register_task_definition(
        &self,
        spec: &TaskDefinitionSpec,
    ) -> ApiResult<TaskDefinitionRevision>;

    /// Describe services by name. Unknown names are simply absent from the result.
    async fn describe_services(
        &self,
        cluster: &str,
        names: &[String],
    ) -> ApiResult<Vec<ServiceState>>;

    async fn create_service(&self, params: &CreateServiceParams) -> ApiResult<ServiceState>;

    async fn update_service(&self, params: &UpdateServiceParams) -> ApiResult<ServiceState>;

    /// Block until every named service is stable, with a bounded number of checks.
    async fn wait_until_services_stable(&self, cluster: &str, names: &[String]) -> ApiResult<()>;

    /// Launch `count` copies of a task definition
    async fn run_task(
        &self,
        cluster: &str,
        task_definition: &str,
        count: u32,
    ) -> ApiResult<RunTaskOutput>;

    async fn describe_tasks(&self, cluster: &str, arns: &[String]) -> ApiResult<Vec<TaskStatus>>;
}
