//! Bounded readiness polling.
//!
//! Every wait point in the provisioning flow re-issues a cheap probe at a
//! fixed interval until it succeeds or the budget is spent. Running out of
//! budget is not an error: callers log and carry on.

use std::future::Future;
use std::time::Duration;

use buildbox_shared::constants::polling;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Interval and wall-clock budget for one wait point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Delay between probes in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Total budget in milliseconds, probe time included.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_interval_ms() -> u64 {
    polling::DEFAULT_INTERVAL_MS
}

fn default_timeout_ms() -> u64 {
    polling::DEFAULT_TIMEOUT_MS
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval_ms: duration_ms(interval),
            timeout_ms: duration_ms(timeout),
        }
    }

    /// Same interval, different budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = duration_ms(timeout);
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Upper bound on probes when every probe returns instantly. Always at
    /// least one.
    pub fn max_attempts(&self) -> u64 {
        let interval = self.interval_ms.max(1);
        self.timeout_ms.div_ceil(interval).max(1)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Run `probe` until it returns true or the policy's budget is used up.
///
/// The budget is wall-clock: slow probes eat into it, and no new probe
/// starts at or past the deadline. The first probe always runs. Sleeps
/// `policy.interval()` between attempts (not after the last one).
/// Returns whether the probe ever succeeded.
pub async fn poll_until<F, Fut>(policy: &PollPolicy, mut probe: F) -> bool
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + policy.timeout();
    let attempts = policy.max_attempts();
    for attempt in 1..=attempts {
        if probe(attempt).await {
            return true;
        }
        if attempt == attempts || Instant::now() + policy.interval() >= deadline {
            break;
        }
        tokio::time::sleep(policy.interval()).await;
    }
    false
}
