//! Retrying executor wrapper
//!
//! [`RetryingExecutor`] gives any [`StepExecutor`] the per-call guarantees the control
//! loop relies on:
//! - each attempt is bounded by a start-to-close timeout;
//! - an attempt that stops heartbeating for longer than the heartbeat timeout is
//!   abandoned and rescheduled from scratch;
//! - failed attempts are retried with exponential backoff up to a fixed attempt count.
//!
//! The delay after attempt `n` is `initial_interval × backoff_coefficient^(n-1)`,
//! clamped to `maximum_interval`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::executor::{ActivityContext, Heartbeat, StepExecutor, StepOutcome};
use crate::domain::Activity;
use crate::error::{Result, WorkflowError};

/// Retry schedule for failed attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first (0 = unlimited)
    pub maximum_attempts: u32,
    /// Delay after the first failure
    pub initial_interval: Duration,
    /// Multiplicative growth factor between delays
    pub backoff_coefficient: f64,
    /// Cap for any single delay
    pub maximum_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            maximum_attempts: 10,
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(100),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` (1-based) failed
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(62) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = secs.min(self.maximum_interval.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Returns true if no attempt may follow `attempt`
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.maximum_attempts != 0 && attempt >= self.maximum_attempts
    }
}

/// Per-call limits applied to every activity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActivityOptions {
    /// Maximum duration of a single attempt
    pub start_to_close: Duration,
    /// Longest allowed gap between heartbeats (None disables liveness checks)
    pub heartbeat_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close: Duration::from_secs(60),
            heartbeat_timeout: Some(Duration::from_secs(3)),
            retry: RetryPolicy::default(),
        }
    }
}

/// Wraps an executor with timeouts, heartbeat monitoring and retries
pub struct RetryingExecutor<E> {
    inner: E,
    options: ActivityOptions,
}

impl<E: StepExecutor> RetryingExecutor<E> {
    pub fn new(inner: E, options: ActivityOptions) -> Self {
        Self { inner, options }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn options(&self) -> &ActivityOptions {
        &self.options
    }

    /// Run one attempt under the start-to-close and heartbeat limits
    async fn guard_attempt<T, F>(&self, activity: Activity, call: F, beats: watch::Receiver<u64>) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send,
    {
        let start_to_close = self.options.start_to_close;
        let heartbeat_timeout = self.options.heartbeat_timeout;

        tokio::select! {
            biased;
            res = call => res,
            _ = tokio::time::sleep(start_to_close) => Err(WorkflowError::AttemptTimeout {
                activity: activity.name().to_string(),
                timeout_ms: start_to_close.as_millis() as u64,
            }),
            _ = heartbeat_lost(beats, heartbeat_timeout) => Err(WorkflowError::HeartbeatTimeout {
                activity: activity.name().to_string(),
                timeout_ms: heartbeat_timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
            }),
        }
    }

    /// Decide what follows a finished attempt: Some(value) to return it, None to retry
    async fn settle<T>(
        &self,
        activity: Activity,
        attempt: u32,
        result: Result<T>,
        ctx: &ActivityContext,
    ) -> Result<Option<T>> {
        let err = match result {
            Ok(value) => return Ok(Some(value)),
            Err(err) if err.is_cancelled() => return Err(err),
            Err(err) => err,
        };

        let policy = &self.options.retry;
        if policy.is_exhausted(attempt) {
            log::error!("{} failed on attempt {}, giving up: {}", activity, attempt, err);
            return Err(WorkflowError::RetriesExhausted {
                activity: activity.name().to_string(),
                attempts: attempt,
                source: Box::new(err),
            });
        }

        let delay = policy.delay_after(attempt);
        tracing::warn!(
            activity = activity.name(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Activity attempt failed, retrying"
        );

        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(WorkflowError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(None),
        }
    }
}

#[async_trait]
impl<E: StepExecutor> StepExecutor for RetryingExecutor<E> {
    async fn run_step(&self, activity: Activity, ctx: &ActivityContext) -> Result<StepOutcome> {
        let mut attempt = 1;
        loop {
            let (heartbeat, beats) = Heartbeat::channel();
            let attempt_ctx = ctx.for_attempt(attempt, heartbeat);
            let result = self
                .guard_attempt(activity, self.inner.run_step(activity, &attempt_ctx), beats)
                .await;

            match self.settle(activity, attempt, result, ctx).await {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => attempt += 1,
                Err(WorkflowError::Cancelled) => return Ok(StepOutcome::Cancelled),
                Err(err) => return Err(err),
            }
        }
    }

    async fn next_send_date(&self, ctx: &ActivityContext) -> Result<i64> {
        let activity = Activity::NextSendDate;
        let mut attempt = 1;
        loop {
            let (heartbeat, beats) = Heartbeat::channel();
            let attempt_ctx = ctx.for_attempt(attempt, heartbeat);
            let result = self
                .guard_attempt(activity, self.inner.next_send_date(&attempt_ctx), beats)
                .await;

            match self.settle(activity, attempt, result, ctx).await? {
                Some(at) => return Ok(at),
                None => attempt += 1,
            }
        }
    }
}

/// Resolve once no heartbeat has arrived for `timeout`
async fn heartbeat_lost(mut beats: watch::Receiver<u64>, timeout: Option<Duration>) {
    let Some(timeout) = timeout else {
        return std::future::pending::<()>().await;
    };
    loop {
        match tokio::time::timeout(timeout, beats.changed()).await {
            Ok(Ok(())) => continue,
            // Sender gone: the attempt already finished
            Ok(Err(_)) => return std::future::pending::<()>().await,
            Err(_) => return,
        }
    }
}
