//! Fixed-interval polling primitives
//!
//! Every loop that waits on the control plane goes through a [`PollPolicy`]
//! for its cadence and a [`Sleeper`] for the delay itself, so tests can run
//! the full loop without real time passing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default delay between oneshot task polls
pub const ONESHOT_INTERVAL: Duration = Duration::from_secs(6);

/// Default number of oneshot task polls (~5 minutes)
pub const ONESHOT_MAX_ATTEMPTS: u32 = 50;

/// Default delay between service stability checks
pub const STABILIZE_INTERVAL: Duration = Duration::from_secs(15);

/// Default number of service stability checks (~10 minutes)
pub const STABILIZE_MAX_ATTEMPTS: u32 = 40;

/// Bounded fixed-interval polling cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between two consecutive polls
    pub interval: Duration,
    /// Maximum number of polls before giving up
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Create a new polling policy
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Cadence used when waiting for a oneshot task to finish
    pub fn oneshot() -> Self {
        Self::new(ONESHOT_INTERVAL, ONESHOT_MAX_ATTEMPTS)
    }

    /// Cadence used when waiting for a service to stabilize
    pub fn stabilize() -> Self {
        Self::new(STABILIZE_INTERVAL, STABILIZE_MAX_ATTEMPTS)
    }

    /// Upper bound on the time spent sleeping between polls
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Polling cadence as written in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSettings {
    /// Seconds between polls
    pub interval_secs: u64,
    /// Maximum number of polls
    pub max_attempts: u32,
}

impl From<PollSettings> for PollPolicy {
    fn from(settings: PollSettings) -> Self {
        PollPolicy::new(
            Duration::from_secs(settings.interval_secs),
            settings.max_attempts,
        )
    }
}

impl From<PollPolicy> for PollSettings {
    fn from(policy: PollPolicy) -> Self {
        PollSettings {
            interval_secs: policy.interval.as_secs(),
            max_attempts: policy.max_attempts,
        }
    }
}

/// Suspends the caller between polls
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Sleep for the given duration
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returned by [`pause`] when the wait was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Sleep for `delay`, waking early if `cancel` fires
pub async fn pause(
    sleeper: &dyn Sleeper,
    delay: Duration,
    cancel: &CancellationToken,
) -> std::result::Result<(), Cancelled> {
    if cancel.is_cancelled() {
        return Err(Cancelled);
    }

    tokio::select! {
        _ = cancel.cancelled() => Err(Cancelled),
        _ = sleeper.sleep(delay) => Ok(()),
    }
}
