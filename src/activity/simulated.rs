//! Simulated outreach steps
//!
//! Stands in for the real mail and task integrations when running the workflow
//! locally. Each call pretends to do slow external work, heartbeats, honors
//! cancellation and logs what it would have sent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::info;

use super::executor::{ActivityContext, StepExecutor, StepOutcome};
use crate::coordination::Clock;
use crate::domain::Activity;
use crate::error::{Result, WorkflowError};

/// Configuration for the simulated executor
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Time each call spends on its pretend external work
    pub latency: Duration,
    /// How far in the future computed send dates lie
    pub send_offset: Duration,
    /// Fail the first attempt of the first contact, to exercise retries
    pub flaky_first_contact: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_secs(1),
            send_offset: Duration::from_secs(10),
            flaky_first_contact: false,
        }
    }
}

/// Executor that logs instead of contacting anyone
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    clock: Arc<dyn Clock>,
    config: SimulationConfig,
}

impl SimulatedExecutor {
    pub fn new(clock: Arc<dyn Clock>, config: SimulationConfig) -> Self {
        Self { clock, config }
    }

    /// Pretend external work; returns false if canceled midway
    async fn work(&self, ctx: &ActivityContext) -> bool {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return false,
            _ = tokio::time::sleep(self.config.latency) => {}
        }
        ctx.heartbeat();
        !ctx.is_cancelled()
    }

    fn stamp(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.clock.now_ms())
            .map(|t| t.to_rfc3339())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StepExecutor for SimulatedExecutor {
    async fn run_step(&self, activity: Activity, ctx: &ActivityContext) -> Result<StepOutcome> {
        if self.config.flaky_first_contact && activity == Activity::FirstContact && ctx.attempt == 1 {
            return Err(WorkflowError::activity(activity.name(), "first attempt always fails"));
        }
        if !self.work(ctx).await {
            info!("{} for subject {} canceled mid-flight", activity, ctx.params.subject_id);
            return Ok(StepOutcome::Cancelled);
        }

        let what = match activity {
            Activity::FirstContact => "Sending first PRR contact",
            Activity::SecondContact => "Sending second PRR contact",
            Activity::Escalation => "Creating no-response escalation task",
            Activity::NextSendDate => {
                return Err(WorkflowError::InvalidState(
                    "nextSendDate is not a contact step".to_string(),
                ));
            }
        };
        info!(
            "{} at {} to subject {} ({}), attempt {}",
            what,
            self.stamp(),
            ctx.params.subject_id,
            ctx.params.category,
            ctx.attempt
        );
        Ok(StepOutcome::Completed)
    }

    async fn next_send_date(&self, ctx: &ActivityContext) -> Result<i64> {
        if !self.work(ctx).await {
            return Err(WorkflowError::Cancelled);
        }
        let at = self.clock.now_ms() + self.config.send_offset.as_millis() as i64;
        info!("Next send date for subject {} is {}", ctx.params.subject_id, at);
        Ok(at)
    }
}
