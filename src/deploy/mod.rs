//! Deployment pipeline
//!
//! This module registers task definitions and drives them to a running
//! service or a completed oneshot task.

pub mod oneshot;
pub mod orchestrator;
pub mod reconciler;
pub mod registrar;

pub use oneshot::{ExitRule, OneshotRun, OneshotRunner, TaskProgress};
pub use orchestrator::{DeployReport, Deployer, DeploymentKind, DeploymentRequest};
pub use reconciler::{ReconcileAction, ReconcileOutcome, ServiceReconciler};
pub use registrar::TaskRegistrar;
