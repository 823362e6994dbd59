//! prrflow - Resumable follow-up sequences for public records requests
//!
//! Each subject (an agency) gets one long-lived control loop that sends a first
//! contact, a second contact and a no-response escalation, steered at runtime by
//! signals and restarted from checkpoints so its history stays bounded.

pub mod activity;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod id;
pub mod runner;
pub mod runtime;

pub use error::{Result, WorkflowError};
