//! Activity layer - side-effecting steps behind the control loop
//!
//! This module provides:
//! - StepExecutor trait and the context each call receives
//! - RetryingExecutor for timeouts, heartbeats and retries
//! - SimulatedExecutor for local runs

pub mod executor;
pub mod retry;
pub mod simulated;

pub use executor::{ActivityContext, Heartbeat, StepExecutor, StepOutcome};
pub use retry::{ActivityOptions, RetryPolicy, RetryingExecutor};
pub use simulated::{SimulatedExecutor, SimulationConfig};
