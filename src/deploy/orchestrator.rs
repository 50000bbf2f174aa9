//! Deployment orchestrator
//!
//! Entry point used by the CLI: registers the task definition, then hands
//! the new revision to exactly one of the two pipelines.

use super::oneshot::{ExitRule, OneshotRun, OneshotRunner};
use super::reconciler::{ReconcileOutcome, ServiceReconciler};
use super::registrar::TaskRegistrar;
use crate::control::types::{ServiceSpec, TaskDefinitionRevision, TaskDefinitionSpec};
use crate::control::ControlApi;
use crate::error::{DeployError, Result};
use crate::poll::{PollPolicy, Sleeper};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shape of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    /// Long-running service, created or updated
    Service,
    /// Oneshot task run to completion
    Migration,
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentKind::Service => write!(f, "service"),
            DeploymentKind::Migration => write!(f, "migration"),
        }
    }
}

/// A deployment, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DeploymentRequest {
    Service {
        task: TaskDefinitionSpec,
        service: ServiceSpec,
    },
    Migration {
        task: TaskDefinitionSpec,
    },
}

impl DeploymentRequest {
    /// Build a request from loosely typed parts.
    ///
    /// A service deployment without a service section is rejected; a
    /// migration ignores any service section it is given.
    pub fn from_parts(
        kind: DeploymentKind,
        task: TaskDefinitionSpec,
        service: Option<ServiceSpec>,
    ) -> Result<Self> {
        match kind {
            DeploymentKind::Service => {
                let service = service.ok_or_else(|| {
                    DeployError::InvalidConfig(
                        "service deployments require a service section".to_string(),
                    )
                })?;
                Ok(DeploymentRequest::Service { task, service })
            }
            DeploymentKind::Migration => Ok(DeploymentRequest::Migration { task }),
        }
    }

    pub fn kind(&self) -> DeploymentKind {
        match self {
            DeploymentRequest::Service { .. } => DeploymentKind::Service,
            DeploymentRequest::Migration { .. } => DeploymentKind::Migration,
        }
    }

    pub fn task(&self) -> &TaskDefinitionSpec {
        match self {
            DeploymentRequest::Service { task, .. } | DeploymentRequest::Migration { task } => task,
        }
    }
}

/// What a successful deployment produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployReport {
    Service {
        revision: TaskDefinitionRevision,
        outcome: ReconcileOutcome,
    },
    Migration {
        revision: TaskDefinitionRevision,
        oneshot: OneshotRun,
    },
}

impl DeployReport {
    pub fn revision(&self) -> &TaskDefinitionRevision {
        match self {
            DeployReport::Service { revision, .. } | DeployReport::Migration { revision, .. } => {
                revision
            }
        }
    }
}

/// Registers, then reconciles or runs to completion
pub struct Deployer {
    registrar: TaskRegistrar,
    reconciler: ServiceReconciler,
    runner: OneshotRunner,
}

impl Deployer {
    /// Create a deployer whose oneshot tasks run in `cluster`
    pub fn new(api: Arc<dyn ControlApi>, cluster: impl Into<String>) -> Self {
        Self {
            registrar: TaskRegistrar::new(api.clone()),
            reconciler: ServiceReconciler::new(api.clone()),
            runner: OneshotRunner::new(api, cluster),
        }
    }

    /// Cadence for oneshot polling
    pub fn with_oneshot_policy(mut self, policy: PollPolicy) -> Self {
        self.runner = self.runner.with_policy(policy);
        self
    }

    /// Which oneshot exit codes fail without waiting out the poll budget
    pub fn with_exit_rule(mut self, exit_rule: ExitRule) -> Self {
        self.runner = self.runner.with_exit_rule(exit_rule);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.runner = self.runner.with_sleeper(sleeper);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.runner = self.runner.with_cancellation(cancel);
        self
    }

    /// Run a deployment end to end. The first error is final.
    pub async fn deploy(&self, request: &DeploymentRequest) -> Result<DeployReport> {
        info!(kind = %request.kind(), family = %request.task().family, "starting deployment");

        match request {
            DeploymentRequest::Service { task, service } => {
                let revision = self.registrar.register(task).await?;
                let outcome = self.reconciler.reconcile(&revision, service).await?;
                Ok(DeployReport::Service { revision, outcome })
            }
            DeploymentRequest::Migration { task } => {
                let revision = self.registrar.register(task).await?;
                let oneshot = self.runner.run_to_completion(&revision).await?;
                Ok(DeployReport::Migration { revision, oneshot })
            }
        }
    }
}
