//! Run-to-completion tasks
//!
//! A oneshot is launched once and polled at a fixed interval until the
//! container stops:
//! `Launching -> Polling -> {Succeeded | Failed(nonzero) | Failed(timeout) | Failed(placement)}`.

use crate::control::types::{TaskDefinitionRevision, TaskStatus};
use crate::control::ControlApi;
use crate::error::{ApiError, DeployError, Result};
use crate::poll::{pause, PollPolicy, Sleeper, TokioSleeper};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Which stopped containers end polling with a failure
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ExitRule {
    /// Exit code 1 fails fast; any other state keeps polling
    #[default]
    ExitOne,
    /// Any non-zero exit code fails fast, as does a task stopped without one
    AnyNonZero,
}

impl fmt::Display for ExitRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitRule::ExitOne => write!(f, "exit-one"),
            ExitRule::AnyNonZero => write!(f, "any-non-zero"),
        }
    }
}

/// What a single poll of the task tells us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskProgress {
    /// Container stopped with exit code 0
    Succeeded,
    /// Container exited with a failure code
    Exited(i32),
    /// Task stopped before the container reported an exit code
    StoppedWithoutExit(String),
    /// Still provisioning, pending or running, or stopped in a way `rule` retries
    Running(String),
}

impl TaskProgress {
    /// Classify the first container of the first task under `rule`.
    ///
    /// Tasks are assumed to carry a single container.
    pub fn of(tasks: &[TaskStatus], rule: ExitRule) -> Self {
        let Some(task) = tasks.first() else {
            return TaskProgress::Running("UNKNOWN".to_string());
        };

        let container = task.primary_container();
        let exit_code = container.and_then(|c| c.exit_code);
        let status = container
            .and_then(|c| c.last_status.clone())
            .unwrap_or_else(|| "UNKNOWN".to_string());

        match (exit_code, rule) {
            (Some(1), _) => TaskProgress::Exited(1),
            (Some(0), _) if container.is_some_and(|c| c.is_stopped()) => TaskProgress::Succeeded,
            (Some(code), ExitRule::AnyNonZero) if code != 0 => TaskProgress::Exited(code),
            (None, ExitRule::AnyNonZero) if task.is_stopped() => TaskProgress::StoppedWithoutExit(
                task.stopped_reason
                    .clone()
                    .or_else(|| container.and_then(|c| c.reason.clone()))
                    .unwrap_or_else(|| "no reason reported".to_string()),
            ),
            _ => TaskProgress::Running(status),
        }
    }
}

/// A oneshot task that ran to a clean exit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneshotRun {
    pub task_arn: String,
    /// When the control plane recorded the task as stopped, if it said
    pub stopped_at: Option<DateTime<Utc>>,
}

/// Launches a single task and waits for it to finish
pub struct OneshotRunner {
    api: Arc<dyn ControlApi>,
    cluster: String,
    policy: PollPolicy,
    exit_rule: ExitRule,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
}

impl OneshotRunner {
    /// Create a runner with the default 6s x 50 cadence
    pub fn new(api: Arc<dyn ControlApi>, cluster: impl Into<String>) -> Self {
        Self {
            api,
            cluster: cluster.into(),
            policy: PollPolicy::oneshot(),
            exit_rule: ExitRule::default(),
            sleeper: Arc::new(TokioSleeper),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_exit_rule(mut self, exit_rule: ExitRule) -> Self {
        self.exit_rule = exit_rule;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Stop polling when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run `revision` once and wait for its container to exit 0.
    ///
    /// Returns the task ARN and stop time on success.
    pub async fn run_to_completion(&self, revision: &TaskDefinitionRevision) -> Result<OneshotRun> {
        info!(
            cluster = %self.cluster,
            task_definition = %revision.arn(),
            budget_secs = self.policy.budget().as_secs(),
            exit_rule = %self.exit_rule,
            "launching oneshot task"
        );
        let output = self.api.run_task(&self.cluster, revision.arn(), 1).await?;

        if let Some(failure) = output.failures.first() {
            warn!(
                cluster = %self.cluster,
                failures = output.failures.len(),
                "oneshot task could not be placed"
            );
            return Err(DeployError::Placement {
                arn: failure.arn_or_unknown(),
                reason: failure.describe(),
            });
        }

        let task_arn = output
            .tasks
            .first()
            .map(|t| t.task_arn.clone())
            .ok_or_else(|| {
                ApiError::Decode("RunTask returned neither tasks nor failures".to_string())
            })?;

        let stopped_at = self.poll(&task_arn).await?;

        info!(cluster = %self.cluster, task_arn = %task_arn, "oneshot task completed");
        Ok(OneshotRun {
            task_arn,
            stopped_at,
        })
    }

    /// Poll until the task settles, returning its stop time on success
    async fn poll(&self, task_arn: &str) -> Result<Option<DateTime<Utc>>> {
        let arns = [task_arn.to_string()];

        for attempt in 1..=self.policy.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(DeployError::Cancelled);
            }

            let tasks = self.api.describe_tasks(&self.cluster, &arns).await?;
            let stopped_at = tasks.first().and_then(|t| t.stopped_at);

            match TaskProgress::of(&tasks, self.exit_rule) {
                TaskProgress::Succeeded => return Ok(stopped_at),
                TaskProgress::Exited(code) => {
                    if let Some(at) = stopped_at {
                        warn!(
                            task_arn = %task_arn,
                            code,
                            stopped_at = %at.to_rfc3339(),
                            "oneshot task failed"
                        );
                    }
                    return Err(DeployError::NonZeroExit {
                        task_arn: task_arn.to_string(),
                        code,
                    })
                }
                TaskProgress::StoppedWithoutExit(reason) => {
                    return Err(DeployError::TaskStopped {
                        task_arn: task_arn.to_string(),
                        reason,
                    })
                }
                TaskProgress::Running(status) => {
                    debug!(
                        task_arn = %task_arn,
                        status = %status,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        "oneshot task still running"
                    );
                }
            }

            if attempt < self.policy.max_attempts {
                pause(self.sleeper.as_ref(), self.policy.interval, &self.cancel)
                    .await
                    .map_err(|_| DeployError::Cancelled)?;
            }
        }

        Err(DeployError::Timeout {
            task_arn: task_arn.to_string(),
            attempts: self.policy.max_attempts,
        })
    }
}
