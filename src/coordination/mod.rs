//! Coordination between the control loop and the outside world
//!
//! Implements signal application, state queries and the wait-race primitive the
//! control loop suspends in, plus the clock used for deadline arithmetic.

pub mod cell;
pub mod clock;

pub use cell::{StateCell, WaitOutcome};
pub use clock::{Clock, MonotonicClock};
