//! Runtime module - hosting, identity and durability for process instances
//!
//! This module provides:
//! - WorkflowRuntime for create-or-signal, query, cancel and completion
//! - CheckpointStore implementations for continue-as-new handoffs

pub mod checkpoint;
pub mod registry;

pub use checkpoint::{Checkpoint, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use registry::{Completion, WorkflowRuntime};
