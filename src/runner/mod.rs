//! Runner module - the PRR follow-up control loop.
//!
//! This module provides the core execution logic, including:
//! - ControlLoop for driving one execution of a subject's process
//! - LoopConfig for the iteration bound and between-step waits

mod control_loop;

pub use control_loop::{ControlLoop, LoopConfig};
