//! Create-or-update reconciliation of long-running services
//!
//! The control plane has no upsert, so every deploy walks
//! `Querying -> {Creating | Updating} -> Stabilizing -> {Stable | Failed}`.
//! Stabilizing is never skipped and a failed stabilization is never rolled
//! back.

use crate::control::types::{
    CreateServiceParams, ServiceSpec, ServiceState, TaskDefinitionRevision, UpdateServiceParams,
};
use crate::control::ControlApi;
use crate::error::{DeployError, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Whether a deploy creates a new service or updates the existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    Create,
    Update,
}

impl ReconcileAction {
    /// Decide from the services matching the requested name.
    ///
    /// More than one match breaks the one-service-per-name invariant and is
    /// never resolved by picking one.
    pub fn decide(cluster: &str, name: &str, matches: &[ServiceState]) -> Result<Self> {
        match matches {
            [] => Ok(ReconcileAction::Create),
            [existing] if existing.is_active() => Ok(ReconcileAction::Update),
            [_] => Ok(ReconcileAction::Create),
            _ => Err(DeployError::AmbiguousService {
                cluster: cluster.to_string(),
                name: name.to_string(),
                count: matches.len(),
            }),
        }
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileAction::Create => write!(f, "create"),
            ReconcileAction::Update => write!(f, "update"),
        }
    }
}

/// Result of a successful reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub action: ReconcileAction,
    pub service_name: String,
    pub service_arn: Option<String>,
}

/// Drives a service to the new task definition revision
pub struct ServiceReconciler {
    api: Arc<dyn ControlApi>,
}

impl ServiceReconciler {
    pub fn new(api: Arc<dyn ControlApi>) -> Self {
        Self { api }
    }

    /// Point `spec`'s service at `revision`, creating it if needed, and wait
    /// until the control plane reports it stable.
    pub async fn reconcile(
        &self,
        revision: &TaskDefinitionRevision,
        spec: &ServiceSpec,
    ) -> Result<ReconcileOutcome> {
        debug!(cluster = %spec.cluster, service = %spec.service_name, "querying existing services");
        let matches = self
            .api
            .describe_services(&spec.cluster, std::slice::from_ref(&spec.service_name))
            .await?;

        let action = ReconcileAction::decide(&spec.cluster, &spec.service_name, &matches)?;

        let service = match action {
            ReconcileAction::Create => {
                info!(cluster = %spec.cluster, service = %spec.service_name, "creating service");
                self.api
                    .create_service(&create_params(revision, spec))
                    .await?
            }
            ReconcileAction::Update => {
                info!(cluster = %spec.cluster, service = %spec.service_name, "updating service");
                self.api
                    .update_service(&update_params(revision, spec))
                    .await?
            }
        };

        info!(
            cluster = %spec.cluster,
            service = %service.service_name,
            revision = revision.revision,
            "waiting for stable service state"
        );
        self.api
            .wait_until_services_stable(&spec.cluster, std::slice::from_ref(&service.service_name))
            .await
            .map_err(|source| DeployError::Stabilization {
                service: service.service_name.clone(),
                source,
            })?;

        info!(cluster = %spec.cluster, service = %service.service_name, "service stable");

        Ok(ReconcileOutcome {
            action,
            service_name: service.service_name,
            service_arn: service.service_arn,
        })
    }
}

fn create_params(revision: &TaskDefinitionRevision, spec: &ServiceSpec) -> CreateServiceParams {
    CreateServiceParams {
        client_token: Uuid::new_v4().to_string(),
        cluster: spec.cluster.clone(),
        service_name: spec.service_name.clone(),
        task_definition: revision.arn().to_string(),
        desired_count: spec.desired_count,
        deployment_configuration: spec.deployment_configuration,
        load_balancers: spec.load_balancers.clone(),
        placement_constraints: spec.placement_constraints.clone(),
        role: spec.role.clone(),
    }
}

// Load balancers and placement constraints cannot change after creation.
fn update_params(revision: &TaskDefinitionRevision, spec: &ServiceSpec) -> UpdateServiceParams {
    UpdateServiceParams {
        cluster: spec.cluster.clone(),
        service: spec.service_name.clone(),
        task_definition: revision.arn().to_string(),
        desired_count: spec.desired_count,
        deployment_configuration: spec.deployment_configuration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::types::{
        DeploymentConfiguration, LoadBalancer, PlacementConstraint, STATUS_ACTIVE,
        STATUS_DRAINING, STATUS_INACTIVE,
    };
    use crate::error::ApiError;
    use crate::testing::ScriptedControlApi;

    fn revision() -> TaskDefinitionRevision {
        TaskDefinitionRevision {
            task_definition_arn: "arn:aws:ecs:us-east-1:123456789012:task-definition/web:8"
                .to_string(),
            family: "web".to_string(),
            revision: 8,
        }
    }

    fn spec() -> ServiceSpec {
        ServiceSpec {
            service_name: "web".to_string(),
            cluster: "prod".to_string(),
            desired_count: 3,
            deployment_configuration: Some(DeploymentConfiguration {
                maximum_percent: Some(200),
                minimum_healthy_percent: Some(50),
            }),
            load_balancers: vec![LoadBalancer {
                target_group_arn: Some("arn:aws:elasticloadbalancing:tg/web".to_string()),
                load_balancer_name: None,
                container_name: "web".to_string(),
                container_port: 8080,
            }],
            placement_constraints: vec![PlacementConstraint {
                constraint_type: "distinctInstance".to_string(),
                expression: None,
            }],
            role: Some("arn:aws:iam::123456789012:role/ecsServiceRole".to_string()),
        }
    }

    fn existing(status: &str) -> ServiceState {
        ServiceState {
            service_name: "web".to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_decide() {
        let decide = |m: &[ServiceState]| ReconcileAction::decide("prod", "web", m);

        assert_eq!(decide(&[]).unwrap(), ReconcileAction::Create);
        assert_eq!(decide(&[existing(STATUS_ACTIVE)]).unwrap(), ReconcileAction::Update);
        assert_eq!(decide(&[existing(STATUS_DRAINING)]).unwrap(), ReconcileAction::Create);
        assert_eq!(decide(&[existing(STATUS_INACTIVE)]).unwrap(), ReconcileAction::Create);
        assert!(matches!(
            decide(&[existing(STATUS_ACTIVE), existing(STATUS_ACTIVE)]),
            Err(DeployError::AmbiguousService { count: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_matches_creates() {
        let api = Arc::new(ScriptedControlApi::new());
        api.push_services(Vec::new());
        let reconciler = ServiceReconciler::new(api.clone());

        let outcome = reconciler.reconcile(&revision(), &spec()).await.unwrap();

        assert_eq!(outcome.action, ReconcileAction::Create);
        assert_eq!(
            api.calls(),
            vec!["describe_services", "create_service", "wait_until_services_stable"]
        );

        let created = &api.created()[0];
        assert_eq!(created.task_definition, revision().task_definition_arn);
        assert_eq!(created.desired_count, 3);
        assert_eq!(created.load_balancers.len(), 1);
        assert_eq!(created.placement_constraints.len(), 1);
        assert_eq!(created.role, spec().role);
        assert!(!created.client_token.is_empty());
    }

    #[tokio::test]
    async fn test_active_match_updates_without_create() {
        let api = Arc::new(ScriptedControlApi::new());
        api.push_services(vec![existing(STATUS_ACTIVE)]);
        let reconciler = ServiceReconciler::new(api.clone());

        let outcome = reconciler.reconcile(&revision(), &spec()).await.unwrap();

        assert_eq!(outcome.action, ReconcileAction::Update);
        assert_eq!(api.calls_to("create_service"), 0);

        let updated = &api.updated()[0];
        assert_eq!(updated.service, "web");
        assert_eq!(updated.cluster, "prod");
        assert_eq!(updated.task_definition, revision().task_definition_arn);
        assert_eq!(updated.deployment_configuration, spec().deployment_configuration);
    }

    #[tokio::test]
    async fn test_inactive_match_creates() {
        let api = Arc::new(ScriptedControlApi::new());
        api.push_services(vec![existing(STATUS_INACTIVE)]);
        let reconciler = ServiceReconciler::new(api.clone());

        let outcome = reconciler.reconcile(&revision(), &spec()).await.unwrap();

        assert_eq!(outcome.action, ReconcileAction::Create);
        assert_eq!(api.calls_to("update_service"), 0);
    }

    #[tokio::test]
    async fn test_ambiguous_matches_touch_nothing() {
        let api = Arc::new(ScriptedControlApi::new());
        api.push_services(vec![existing(STATUS_ACTIVE), existing(STATUS_DRAINING)]);
        let reconciler = ServiceReconciler::new(api.clone());

        let err = reconciler.reconcile(&revision(), &spec()).await.unwrap_err();

        assert!(matches!(err, DeployError::AmbiguousService { count: 2, .. }));
        assert_eq!(api.calls(), vec!["describe_services"]);
    }

    #[tokio::test]
    async fn test_create_tokens_are_fresh() {
        let api = Arc::new(ScriptedControlApi::new());
        api.push_services(Vec::new());
        api.push_services(Vec::new());
        let reconciler = ServiceReconciler::new(api.clone());

        reconciler.reconcile(&revision(), &spec()).await.unwrap();
        reconciler.reconcile(&revision(), &spec()).await.unwrap();

        let created = api.created();
        assert_ne!(created[0].client_token, created[1].client_token);
    }

    #[tokio::test]
    async fn test_stabilization_failure_is_terminal() {
        let api = Arc::new(ScriptedControlApi::new());
        api.push_services(vec![existing(STATUS_ACTIVE)]);
        api.fail_stabilization(ApiError::WaiterTimeout { attempts: 40 });
        let reconciler = ServiceReconciler::new(api.clone());

        let err = reconciler.reconcile(&revision(), &spec()).await.unwrap_err();

        assert!(matches!(err, DeployError::Stabilization { ref service, .. } if service == "web"));
        assert_eq!(api.calls_to("update_service"), 1);
    }

    #[tokio::test]
    async fn test_describe_failure_propagates_as_api_error() {
        let api = Arc::new(ScriptedControlApi::new());
        api.push_services_error(ApiError::Service {
            status: 400,
            code: "ClusterNotFoundException".to_string(),
            message: "Cluster not found.".to_string(),
        });
        let reconciler = ServiceReconciler::new(api.clone());

        let err = reconciler.reconcile(&revision(), &spec()).await.unwrap_err();

        assert!(matches!(err, DeployError::Api(ApiError::Service { .. })));
        assert_eq!(api.calls(), vec!["describe_services"]);
    }
}
