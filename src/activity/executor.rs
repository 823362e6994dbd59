//! Step executor interface
//!
//! The control loop never performs side effects itself. Each named step, and the
//! send-date computation, is delegated to a [`StepExecutor`]; the loop only sees
//! success, failure or a canceled outcome.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::domain::{Activity, ProcessParams};
use crate::error::Result;

/// Result of a step call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    /// The call noticed cancellation of its execution and stopped early
    Cancelled,
}

/// Liveness channel an in-flight call reports through
#[derive(Debug, Clone)]
pub struct Heartbeat {
    tx: Option<Arc<watch::Sender<u64>>>,
}

impl Heartbeat {
    /// Heartbeat nobody monitors
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Heartbeat plus the receiver that observes its beats
    pub(crate) fn channel() -> (Self, watch::Receiver<u64>) {
        let (tx, rx) = watch::channel(0);
        (Self { tx: Some(Arc::new(tx)) }, rx)
    }

    pub fn beat(&self) {
        if let Some(tx) = &self.tx {
            tx.send_modify(|n| *n = n.wrapping_add(1));
        }
    }
}

/// Everything a step call receives
#[derive(Debug, Clone)]
pub struct ActivityContext {
    pub params: ProcessParams,
    /// 1-based attempt number
    pub attempt: u32,
    heartbeat: Heartbeat,
    cancelled: watch::Receiver<bool>,
}

impl ActivityContext {
    pub fn new(params: ProcessParams, cancelled: watch::Receiver<bool>) -> Self {
        Self {
            params,
            attempt: 1,
            heartbeat: Heartbeat::detached(),
            cancelled,
        }
    }

    /// Context that can never be canceled
    pub fn detached(params: ProcessParams) -> Self {
        let (_, cancelled) = watch::channel(false);
        Self::new(params, cancelled)
    }

    /// Copy of this context for one attempt of a retried call
    pub fn for_attempt(&self, attempt: u32, heartbeat: Heartbeat) -> Self {
        Self {
            attempt,
            heartbeat,
            ..self.clone()
        }
    }

    /// Report liveness while doing slow work
    pub fn heartbeat(&self) {
        self.heartbeat.beat();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolve once the execution is canceled
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.clone();
        if rx.wait_for(|c| *c).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Performs the side-effecting steps of the PRR cycle
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Run one of the contact steps to completion
    async fn run_step(&self, activity: Activity, ctx: &ActivityContext) -> Result<StepOutcome>;

    /// Earliest instant (Unix ms) the first contact may be sent
    async fn next_send_date(&self, ctx: &ActivityContext) -> Result<i64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;

    #[test]
    fn test_detached_context_is_never_cancelled() {
        let ctx = ActivityContext::detached(ProcessParams::new("1", Category::Po));
        assert_eq!(ctx.attempt, 1);
        assert!(!ctx.is_cancelled());
        ctx.heartbeat();
    }

    #[test]
    fn test_context_observes_cancellation() {
        let (tx, rx) = watch::channel(false);
        let ctx = ActivityContext::new(ProcessParams::new("1", Category::Contacts), rx);
        assert!(!ctx.is_cancelled());
        tx.send_replace(true);
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_heartbeat_counts_beats() {
        let (heartbeat, rx) = Heartbeat::channel();
        let ctx = ActivityContext::detached(ProcessParams::new("1", Category::Po)).for_attempt(3, heartbeat);
        ctx.heartbeat();
        ctx.heartbeat();
        assert_eq!(*rx.borrow(), 2);
        assert_eq!(ctx.attempt, 3);
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let (tx, rx) = watch::channel(false);
        let ctx = ActivityContext::new(ProcessParams::new("1", Category::Po), rx);
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.cancelled().await })
        };
        tx.send_replace(true);
        waiter.await.unwrap();
    }
}
