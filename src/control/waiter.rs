//! Service stabilization waiter

use super::types::ServiceState;
use super::ControlApi;
use crate::error::{ApiError, ApiResult};
use crate::poll::{pause, PollPolicy, Sleeper, TokioSleeper};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Polls DescribeServices until every service has settled
#[derive(Clone)]
pub struct StabilityWaiter {
    policy: PollPolicy,
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
}

impl StabilityWaiter {
    /// Create a waiter sleeping on the tokio timer
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            sleeper: Arc::new(TokioSleeper),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the sleeper
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Stop waiting when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Wait until all `names` are stable in `cluster`.
    ///
    /// Fails immediately when a service is missing, draining or inactive.
    pub async fn wait<A>(&self, api: &A, cluster: &str, names: &[String]) -> ApiResult<()>
    where
        A: ControlApi + ?Sized,
    {
        for attempt in 1..=self.policy.max_attempts {
            if self.cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            let services = api.describe_services(cluster, names).await?;
            if Self::all_stable(&services, names)? {
                debug!(cluster = %cluster, attempt, "services stable");
                return Ok(());
            }

            debug!(
                cluster = %cluster,
                attempt,
                max_attempts = self.policy.max_attempts,
                "services not yet stable"
            );

            if attempt < self.policy.max_attempts {
                pause(self.sleeper.as_ref(), self.policy.interval, &self.cancel)
                    .await
                    .map_err(|_| ApiError::Cancelled)?;
            }
        }

        Err(ApiError::WaiterTimeout {
            attempts: self.policy.max_attempts,
        })
    }

    fn all_stable(services: &[ServiceState], names: &[String]) -> ApiResult<bool> {
        let mut stable = true;

        for name in names {
            let service = services
                .iter()
                .find(|s| &s.service_name == name)
                .ok_or_else(|| ApiError::WaiterFailed {
                    service: name.clone(),
                    status: "MISSING".to_string(),
                })?;

            if service.is_gone() {
                return Err(ApiError::WaiterFailed {
                    service: name.clone(),
                    status: service.status.clone(),
                });
            }

            stable &= service.is_stable();
        }

        Ok(stable)
    }
}

impl Default for StabilityWaiter {
    fn default() -> Self {
        Self::new(PollPolicy::stabilize())
    }
}
