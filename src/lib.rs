//! ecs-deploy - Deploy containerized workloads to a cluster control plane
//!
//! Two deployment shapes are supported:
//!
//! - Long-running services, created or updated in place and then waited on
//!   until the control plane reports a steady state
//! - Oneshot tasks such as database migrations, run once and polled until
//!   the container exits
//!
//! Every deploy registers a new immutable task definition revision first.

pub mod config;
pub mod control;
pub mod deploy;
pub mod error;
pub mod poll;

#[cfg(test)]
pub(crate) mod testing;

pub use control::{ControlApi, HttpControlApi};
pub use deploy::{DeployReport, Deployer, DeploymentKind, DeploymentRequest};
pub use error::{ApiError, DeployError, Result};
