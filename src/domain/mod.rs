//! Domain types for prrflow
//!
//! This module contains all core domain types:
//! - StateRecord: the control state of one subject's process, with Status and Step
//! - StatePatch: the partial update carried by a signal
//! - LoopOutcome / LoopPhase: how an execution ends and where it currently is

pub mod outcome;
pub mod signal;
pub mod state;

pub use outcome::{LoopOutcome, LoopPhase};
pub use signal::{SignalReceipt, StatePatch};
pub use state::{
    Activity, Category, DEFAULT_MAX_ITERATIONS, ProcessParams, StateRecord, Status, Step,
};
