//! Retry policies for job execution.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::{Backoff, Constant, Zero};
use tracing::warn;

use crate::types::ActionError;

/// Supplies the delays between failed attempts of one execution cycle.
///
/// A schedule that returns `None` ends the cycle early even if attempts
/// remain.
pub trait RetryPolicy: Send + Sync {
    /// A fresh schedule for one execution cycle.
    fn backoff(&self) -> Box<dyn Backoff + Send>;
}

/// Retry straight away.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateRetry;

impl RetryPolicy for ImmediateRetry {
    fn backoff(&self) -> Box<dyn Backoff + Send> {
        Box::new(Zero {})
    }
}

/// Wait the same delay before every retry.
#[derive(Debug, Clone, Copy)]
pub struct FixedRetry {
    pub delay: Duration,
}

impl FixedRetry {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl RetryPolicy for FixedRetry {
    fn backoff(&self) -> Box<dyn Backoff + Send> {
        Box::new(Constant::new(self.delay))
    }
}

/// Exponentially growing delay without jitter: 100ms, 200ms, 400ms, ...
/// capped at 10s by default.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialRetry {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl Default for ExponentialRetry {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            multiplier: 2.0,
            max: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy for ExponentialRetry {
    fn backoff(&self) -> Box<dyn Backoff + Send> {
        Box::new(ExponentialBackoff {
            current_interval: self.initial,
            initial_interval: self.initial,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        })
    }
}

/// Run `op` up to `attempts` times (at least once), waiting between failures
/// as `policy` dictates.
///
/// Every failed attempt is logged; the last error is returned once the
/// attempts or the schedule run out.
pub async fn execute_with_retry<F, Fut>(
    attempts: u32,
    policy: &dyn RetryPolicy,
    mut op: F,
) -> Result<(), ActionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ActionError>>,
{
    let attempts = attempts.max(1);
    let mut schedule = policy.backoff();
    let mut attempt = 1;

    loop {
        let error = match op().await {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };

        warn!(attempt, attempts, error = %error, "job attempt failed");

        if attempt >= attempts {
            return Err(error);
        }

        match schedule.next_backoff() {
            Some(delay) if !delay.is_zero() => tokio::time::sleep(delay).await,
            Some(_) => {}
            None => return Err(error),
        }

        attempt += 1;
    }
}
