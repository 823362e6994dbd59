//! Control loop outcome and phase types.

use std::fmt;

use super::state::{Activity, StateRecord};

/// How one execution of the control loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Status reached `abort`; the process instance is over
    Aborted,
    /// The hosting execution was canceled; the cycle was left unfinished
    Cancelled,
    /// Iteration bound reached; a successor must continue from this seed
    ContinueAsNew(StateRecord),
}

impl LoopOutcome {
    /// Returns true if no successor execution follows
    pub fn is_final(&self) -> bool {
        !matches!(self, LoopOutcome::ContinueAsNew(_))
    }
}

/// Where the control loop currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    AwaitingActivation,
    WaitingForSendWindow,
    RunningStep(Activity),
    WaitingBetweenSteps(Activity),
    CheckpointRestart,
    Aborted,
    Cancelled,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopPhase::AwaitingActivation => f.write_str("awaiting activation"),
            LoopPhase::WaitingForSendWindow => f.write_str("waiting for send window"),
            LoopPhase::RunningStep(a) => write!(f, "running {}", a),
            LoopPhase::WaitingBetweenSteps(a) => write!(f, "waiting before {}", a),
            LoopPhase::CheckpointRestart => f.write_str("checkpoint restart"),
            LoopPhase::Aborted => f.write_str("aborted"),
            LoopPhase::Cancelled => f.write_str("canceled"),
        }
    }
}
