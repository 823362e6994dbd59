//! Shared state cell for one process execution
//!
//! StateCell owns the StateRecord behind a `watch` channel. Signals write through
//! [`StateCell::apply`], queries read through [`StateCell::snapshot`], and the control
//! loop suspends in [`StateCell::await_condition`], which re-evaluates its predicate
//! after every write. Writes and predicate checks are serialized by the channel, so
//! no caller ever sees a half-applied update.

use std::time::Duration;

use log::{debug, warn};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::domain::{LoopPhase, SignalReceipt, StatePatch, StateRecord};
use crate::error::{Result, WorkflowError};

/// How a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The predicate became true before the timeout
    Satisfied,
    /// The timeout elapsed first (also reported on a tie)
    TimedOut,
    /// The execution was canceled while suspended
    Cancelled,
}

#[derive(Debug, Clone)]
struct Shared {
    record: StateRecord,
    /// Send date delivered by a signal and not yet used for a send-window wait
    pending_send_date: Option<i64>,
    /// Number of signals applied so far
    signals: u64,
}

/// State record of one execution plus its wake-up, phase and cancellation channels
#[derive(Debug)]
pub struct StateCell {
    key: String,
    state: watch::Sender<Shared>,
    phase: watch::Sender<LoopPhase>,
    cancelled: watch::Sender<bool>,
}

impl StateCell {
    pub fn new(key: impl Into<String>, record: StateRecord) -> Self {
        let (state, _) = watch::channel(Shared {
            record,
            pending_send_date: None,
            signals: 0,
        });
        let (phase, _) = watch::channel(LoopPhase::AwaitingActivation);
        let (cancelled, _) = watch::channel(false);
        Self {
            key: key.into(),
            state,
            phase,
            cancelled,
        }
    }

    /// Identity key of the process this cell belongs to
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Merge a signal into the record and wake any waiter
    ///
    /// Once the status is `abort` the record is sealed and the signal is ignored.
    pub fn apply(&self, patch: &StatePatch) -> SignalReceipt {
        let mut receipt = SignalReceipt::Ignored;
        self.state.send_if_modified(|shared| {
            if shared.record.status.is_abort() {
                return false;
            }
            patch.apply_to(&mut shared.record);
            if let Some(at) = patch.next_send_date {
                shared.pending_send_date = Some(at);
            }
            shared.signals += 1;
            receipt = SignalReceipt::Applied;
            true
        });

        match receipt {
            SignalReceipt::Applied => debug!("{}: applied signal {:?}", self.key, patch),
            SignalReceipt::Ignored => warn!("{}: ignoring signal after abort: {:?}", self.key, patch),
        }
        receipt
    }

    /// Independent copy of the current record
    pub fn snapshot(&self) -> StateRecord {
        self.state.borrow().record.clone()
    }

    /// Number of signals applied to this cell so far
    pub fn signal_count(&self) -> u64 {
        self.state.borrow().signals
    }

    /// Mutate the record on behalf of the control loop
    ///
    /// Returns None without touching the record if it is sealed by an abort.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut StateRecord) -> R) -> Option<R> {
        let mut out = None;
        self.state.send_if_modified(|shared| {
            if shared.record.status.is_abort() {
                return false;
            }
            out = Some(f(&mut shared.record));
            true
        });
        out
    }

    /// Start a send-window evaluation: clear the dirty flag and take any send date
    /// a signal delivered since the last evaluation
    pub(crate) fn begin_send_window(&self) -> Option<i64> {
        let mut pending = None;
        self.state.send_if_modified(|shared| {
            shared.record.deadline_dirty = false;
            pending = shared.pending_send_date.take();
            false
        });
        pending
    }

    /// Suspend until `predicate` holds, the timeout elapses, or the execution is canceled
    ///
    /// The predicate is checked against the current record first and again after every
    /// write. Without a timeout only the predicate (or cancellation) ends the wait. When
    /// the predicate and the timeout are both satisfied at the same instant the wait
    /// reports `TimedOut`.
    pub async fn await_condition<P>(&self, mut predicate: P, timeout: Option<Duration>) -> Result<WaitOutcome>
    where
        P: FnMut(&StateRecord) -> bool,
    {
        self.race(move |shared| predicate(&shared.record), timeout).await
    }

    /// Suspend until a signal beyond the first `seen` arrives, or cancellation
    pub async fn await_signal_after(&self, seen: u64) -> Result<WaitOutcome> {
        self.race(move |shared| shared.signals > seen, None).await
    }

    async fn race<P>(&self, mut predicate: P, timeout: Option<Duration>) -> Result<WaitOutcome>
    where
        P: FnMut(&Shared) -> bool,
    {
        if self.is_cancelled() {
            return Ok(WaitOutcome::Cancelled);
        }
        if timeout == Some(Duration::ZERO) {
            return Ok(WaitOutcome::TimedOut);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state_rx = self.state.subscribe();
        let mut cancel_rx = self.cancelled.subscribe();

        let satisfied = async move { state_rx.wait_for(|shared| predicate(shared)).await.map(|_| ()) };
        let cancelled = async move { cancel_rx.wait_for(|c| *c).await.map(|_| ()) };
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            Ok(()) = cancelled => Ok(WaitOutcome::Cancelled),
            () = timer => Ok(WaitOutcome::TimedOut),
            res = satisfied => match res {
                Ok(()) if deadline.is_some_and(|at| Instant::now() >= at) => Ok(WaitOutcome::TimedOut),
                Ok(()) => Ok(WaitOutcome::Satisfied),
                Err(_) => Err(WorkflowError::InvalidState(format!("{}: state channel closed", self.key))),
            },
        }
    }

    /// Publish the control loop's current phase
    pub(crate) fn set_phase(&self, phase: LoopPhase) {
        self.phase.send_replace(phase);
    }

    pub fn phase(&self) -> LoopPhase {
        *self.phase.borrow()
    }

    /// Wait until the published phase satisfies `predicate`
    pub async fn wait_for_phase(&self, mut predicate: impl FnMut(&LoopPhase) -> bool) -> LoopPhase {
        let mut rx = self.phase.subscribe();
        match rx.wait_for(|p| predicate(p)).await {
            Ok(phase) => *phase,
            Err(_) => self.phase(),
        }
    }

    /// Request cancellation of the execution using this cell
    pub fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Receiver handed to executors so in-flight steps can observe cancellation
    pub fn cancellation(&self) -> watch::Receiver<bool> {
        self.cancelled.subscribe()
    }
}
