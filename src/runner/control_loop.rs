//! Control loop implementation - drives one execution of a subject's PRR process.
//!
//! Each cycle waits for activation, waits for the send window, then runs the first
//! contact, second contact and escalation steps with bounded waits between them.
//! After `max_iterations` cycles the execution ends with a seed for its successor.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::activity::{ActivityContext, StepExecutor, StepOutcome};
use crate::coordination::clock::{self, Clock};
use crate::coordination::{StateCell, WaitOutcome};
use crate::domain::{DEFAULT_MAX_ITERATIONS, LoopOutcome, LoopPhase, ProcessParams, Status, Step};
use crate::error::{Result, WorkflowError};

/// Configuration for the ControlLoop.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Cycles per execution before a checkpoint restart
    pub max_iterations: u32,
    /// Upper bound on the wait before the second contact
    pub second_contact_wait: Duration,
    /// Upper bound on the wait before the escalation
    pub escalation_wait: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            second_contact_wait: Duration::from_secs(10),
            escalation_wait: Duration::from_secs(5),
        }
    }
}

/// The state machine for one execution.
///
/// Each cycle:
/// 1. Suspends until the status is `started` or `abort`
/// 2. Waits for the send date, re-evaluating it on every signal
/// 3. Runs the first contact
/// 4. Waits (bounded) and runs the second contact
/// 5. Waits (bounded) and runs the escalation, which pauses the process
/// 6. Counts the cycle and checkpoints once the bound is reached
pub struct ControlLoop<E: StepExecutor> {
    cell: Arc<StateCell>,
    executor: Arc<E>,
    clock: Arc<dyn Clock>,
    params: ProcessParams,
    config: LoopConfig,
}

impl<E: StepExecutor> ControlLoop<E> {
    pub fn new(
        cell: Arc<StateCell>,
        executor: Arc<E>,
        clock: Arc<dyn Clock>,
        params: ProcessParams,
        config: LoopConfig,
    ) -> Self {
        Self {
            cell,
            executor,
            clock,
            params,
            config,
        }
    }

    pub fn cell(&self) -> &Arc<StateCell> {
        &self.cell
    }

    /// Run cycles until the process aborts, is canceled, or must checkpoint.
    ///
    /// Step failures propagate unchanged; nothing here retries or swallows them.
    pub async fn run(&self) -> Result<LoopOutcome> {
        info!("{}: execution started with {:?}", self.cell.key(), self.cell.snapshot());

        let outcome = self.drive().await;
        match &outcome {
            Ok(LoopOutcome::Aborted) => {
                self.cell.set_phase(LoopPhase::Aborted);
                info!("{}: aborted", self.cell.key());
            }
            Ok(LoopOutcome::Cancelled) => {
                self.cell.set_phase(LoopPhase::Cancelled);
                info!("{}: canceled", self.cell.key());
            }
            Ok(LoopOutcome::ContinueAsNew(seed)) => {
                self.cell.set_phase(LoopPhase::CheckpointRestart);
                info!("{}: iteration bound reached, continuing as new with {:?}", self.cell.key(), seed);
            }
            Err(e) => error!("{}: execution failed: {}", self.cell.key(), e),
        }
        outcome
    }

    async fn drive(&self) -> Result<LoopOutcome> {
        loop {
            self.cell.set_phase(LoopPhase::AwaitingActivation);
            debug!("{}: waiting for start or abort", self.cell.key());
            if self.cell.await_condition(|r| r.status.is_activating(), None).await? == WaitOutcome::Cancelled {
                return Ok(LoopOutcome::Cancelled);
            }
            if self.cell.snapshot().status.is_abort() {
                return Ok(LoopOutcome::Aborted);
            }
            let signals_seen = self.cell.signal_count();

            if let ControlFlow::Break(outcome) = self.wait_for_send_window().await? {
                return Ok(outcome);
            }
            if let ControlFlow::Break(outcome) = self.run_step(Step::FirstContact).await? {
                return Ok(outcome);
            }
            if let ControlFlow::Break(outcome) = self
                .wait_between_steps(Step::SecondContact, self.config.second_contact_wait)
                .await?
            {
                return Ok(outcome);
            }
            if let ControlFlow::Break(outcome) = self.run_step(Step::SecondContact).await? {
                return Ok(outcome);
            }
            if let ControlFlow::Break(outcome) = self
                .wait_between_steps(Step::Escalation, self.config.escalation_wait)
                .await?
            {
                return Ok(outcome);
            }
            if let ControlFlow::Break(outcome) = self.run_step(Step::Escalation).await? {
                return Ok(outcome);
            }

            let Some(iterations) = self.cell.mutate(|r| {
                r.iterations = r.iterations.saturating_add(1);
                r.iterations
            }) else {
                return Ok(LoopOutcome::Aborted);
            };
            debug!("{}: cycle {} complete", self.cell.key(), iterations);

            if iterations >= self.config.max_iterations {
                return Ok(LoopOutcome::ContinueAsNew(self.cell.snapshot().checkpoint_seed()));
            }

            if let ControlFlow::Break(outcome) = self.idle_if_inert(signals_seen).await? {
                return Ok(outcome);
            }
        }
    }

    /// Wait until the send date passes, re-deriving it whenever a signal arrives.
    async fn wait_for_send_window(&self) -> Result<ControlFlow<LoopOutcome>> {
        while self.cell.snapshot().is_at(&Step::FirstContact) {
            self.cell.set_phase(LoopPhase::WaitingForSendWindow);

            let next_send_date = match self.cell.begin_send_window() {
                Some(at) => {
                    debug!("{}: using signaled send date {}", self.cell.key(), at);
                    at
                }
                None => match self.executor.next_send_date(&self.activity_context()).await {
                    Ok(at) => at,
                    Err(WorkflowError::Cancelled) => return Ok(ControlFlow::Break(LoopOutcome::Cancelled)),
                    Err(e) => return Err(e),
                },
            };
            if self.cell.mutate(|r| r.next_send_date = next_send_date).is_none() {
                break;
            }

            let timeout = clock::until(self.clock.as_ref(), next_send_date);
            info!(
                "{}: waiting {}ms for send date {}",
                self.cell.key(),
                timeout.as_millis(),
                next_send_date
            );
            match self.cell.await_condition(|r| r.deadline_dirty, Some(timeout)).await? {
                WaitOutcome::TimedOut => break,
                WaitOutcome::Satisfied => debug!("{}: state changed, re-evaluating send date", self.cell.key()),
                WaitOutcome::Cancelled => return Ok(ControlFlow::Break(LoopOutcome::Cancelled)),
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Bounded wait before `step`; ends early once `step` is no longer due.
    async fn wait_between_steps(&self, step: Step, bound: Duration) -> Result<ControlFlow<LoopOutcome>> {
        if let Some(activity) = step.activity() {
            self.cell.set_phase(LoopPhase::WaitingBetweenSteps(activity));
        }
        match self.cell.await_condition(move |r| !r.is_at(&step), Some(bound)).await? {
            WaitOutcome::Cancelled => Ok(ControlFlow::Break(LoopOutcome::Cancelled)),
            WaitOutcome::Satisfied | WaitOutcome::TimedOut => Ok(ControlFlow::Continue(())),
        }
    }

    /// Run `step` if it is still due, then advance the step pointer.
    async fn run_step(&self, step: Step) -> Result<ControlFlow<LoopOutcome>> {
        let Some(activity) = step.activity() else {
            return Ok(ControlFlow::Continue(()));
        };
        let record = self.cell.snapshot();
        if !record.is_at(&step) {
            debug!(
                "{}: skipping {} (status={}, nextStep={})",
                self.cell.key(),
                activity,
                record.status,
                record.next_step
            );
            return Ok(ControlFlow::Continue(()));
        }

        self.cell.set_phase(LoopPhase::RunningStep(activity));
        info!("{}: running {}", self.cell.key(), activity);
        match self.executor.run_step(activity, &self.activity_context()).await {
            Ok(StepOutcome::Completed) => {}
            Ok(StepOutcome::Cancelled) | Err(WorkflowError::Cancelled) => {
                return Ok(ControlFlow::Break(LoopOutcome::Cancelled));
            }
            Err(e) => return Err(e),
        }

        let ends_cycle = step == Step::Escalation;
        let next = step.next();
        self.cell.mutate(|r| {
            if let Some(next) = next {
                r.next_step = next;
            }
            if ends_cycle {
                r.status = Status::Stopped;
            }
        });
        info!("{}: {} done", self.cell.key(), activity);
        Ok(ControlFlow::Continue(()))
    }

    /// A started process whose next step is unrecognized can run no step and never
    /// suspends; hold it until the next signal instead of spinning.
    async fn idle_if_inert(&self, signals_seen: u64) -> Result<ControlFlow<LoopOutcome>> {
        let record = self.cell.snapshot();
        if !record.status.is_started() || record.next_step.activity().is_some() {
            return Ok(ControlFlow::Continue(()));
        }
        warn!(
            "{}: nextStep '{}' is not a known step, idling until the next signal",
            self.cell.key(),
            record.next_step
        );
        match self.cell.await_signal_after(signals_seen).await? {
            WaitOutcome::Cancelled => Ok(ControlFlow::Break(LoopOutcome::Cancelled)),
            WaitOutcome::Satisfied | WaitOutcome::TimedOut => Ok(ControlFlow::Continue(())),
        }
    }

    fn activity_context(&self) -> ActivityContext {
        ActivityContext::new(self.params.clone(), self.cell.cancellation())
    }
}
