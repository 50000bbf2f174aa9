//! Task definition registration

use crate::control::types::{TaskDefinitionRevision, TaskDefinitionSpec};
use crate::control::ControlApi;
use crate::error::{DeployError, Result};
use std::sync::Arc;
use tracing::info;

/// Registers a fresh task definition revision on every deploy
pub struct TaskRegistrar {
    api: Arc<dyn ControlApi>,
}

impl TaskRegistrar {
    pub fn new(api: Arc<dyn ControlApi>) -> Self {
        Self { api }
    }

    /// Register `spec` as a new revision of its family
    pub async fn register(&self, spec: &TaskDefinitionSpec) -> Result<TaskDefinitionRevision> {
        let revision = self
            .api
            .register_task_definition(spec)
            .await
            .map_err(|source| DeployError::Registration {
                family: spec.family.clone(),
                source,
            })?;

        info!(
            family = %revision.family,
            revision = revision.revision,
            arn = %revision.task_definition_arn,
            "registered task definition"
        );

        Ok(revision)
    }
}
