//! Workflow runtime - hosts one control loop per subject.
//!
//! WorkflowRuntime owns the registry of live instances. It creates instances on
//! first signal, routes signals and queries by identity key, swaps executions at
//! checkpoint restarts, and reports how each logical workflow ended.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::checkpoint::{Checkpoint, CheckpointStore};
use crate::activity::StepExecutor;
use crate::coordination::{Clock, StateCell};
use crate::domain::{LoopOutcome, LoopPhase, ProcessParams, SignalReceipt, StatePatch, StateRecord};
use crate::error::{Result, WorkflowError};
use crate::id::process_key;
use crate::runner::{ControlLoop, LoopConfig};

/// How a logical workflow ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Aborted,
    Cancelled,
    /// A step failed after its retries; the last checkpoint is kept
    Failed(String),
}

struct InstanceEntry {
    params: ProcessParams,
    cell: Arc<StateCell>,
    /// 1-based number of the current execution
    execution: u64,
    completion: Arc<watch::Sender<Option<Completion>>>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Registry {
    running: HashMap<String, InstanceEntry>,
    completed: HashMap<String, Completion>,
    /// Bumped whenever an instance completes
    settled: u64,
}

struct RuntimeInner<E> {
    executor: Arc<E>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn CheckpointStore>,
    config: LoopConfig,
    registry: Mutex<Registry>,
}

/// Hosts PRR process instances, one per subject
pub struct WorkflowRuntime<E: StepExecutor + 'static> {
    inner: Arc<RuntimeInner<E>>,
}

impl<E: StepExecutor + 'static> Clone for WorkflowRuntime<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: StepExecutor + 'static> WorkflowRuntime<E> {
    pub fn new(executor: Arc<E>, clock: Arc<dyn Clock>, store: Arc<dyn CheckpointStore>, config: LoopConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                executor,
                clock,
                store,
                config,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Signal the subject's instance, creating it first if none is running.
    ///
    /// Creation and delivery happen under one registry lock, so two concurrent callers
    /// for the same subject never start two loops. A new instance resumes from the
    /// stored checkpoint when one exists, and sees the patch before its first cycle.
    /// The checkpoint is read without holding the lock, and read again under it only if
    /// some instance completed in between.
    pub fn signal_with_start(&self, params: ProcessParams, patch: &StatePatch) -> Result<SignalReceipt> {
        let key = params.key();
        let settled = {
            let registry = self.inner.lock()?;
            if let Some(entry) = registry.running.get(&key) {
                return Ok(entry.cell.apply(patch));
            }
            registry.settled
        };

        let mut checkpoint = self.inner.store.load(&key)?;
        let mut registry = self.inner.lock()?;
        if let Some(entry) = registry.running.get(&key) {
            return Ok(entry.cell.apply(patch));
        }
        if registry.settled != settled {
            checkpoint = self.inner.store.load(&key)?;
        }
        let (entry, receipt) = self.inner.start_instance(params, checkpoint, Some(patch));
        registry.completed.remove(&key);
        registry.running.insert(key, entry);
        Ok(receipt.unwrap_or(SignalReceipt::Applied))
    }

    /// Signal a running instance
    pub fn signal(&self, subject_id: &str, patch: &StatePatch) -> Result<SignalReceipt> {
        self.with_entry(subject_id, |entry| entry.cell.apply(patch))
    }

    /// Current state record of a running instance
    pub fn query(&self, subject_id: &str) -> Result<StateRecord> {
        self.with_entry(subject_id, |entry| entry.cell.snapshot())
    }

    /// Where the instance's control loop currently is
    pub fn phase(&self, subject_id: &str) -> Result<LoopPhase> {
        self.with_entry(subject_id, |entry| entry.cell.phase())
    }

    /// Number of the instance's current execution, starting at 1
    pub fn execution(&self, subject_id: &str) -> Result<u64> {
        self.with_entry(subject_id, |entry| entry.execution)
    }

    /// Parameters the instance was started with
    pub fn params(&self, subject_id: &str) -> Result<ProcessParams> {
        self.with_entry(subject_id, |entry| entry.params.clone())
    }

    /// Cancel a running instance; its loop ends at the next wait or step boundary
    pub fn cancel(&self, subject_id: &str) -> Result<()> {
        self.with_entry(subject_id, |entry| {
            info!("{}: cancellation requested", entry.cell.key());
            entry.cell.cancel();
        })
    }

    /// Keys of all running instances, sorted
    pub fn running(&self) -> Result<Vec<String>> {
        let registry = self.inner.lock()?;
        let mut keys: Vec<String> = registry.running.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    /// Restart every stored checkpoint that has no running instance
    ///
    /// Returns the keys that were started.
    pub fn resume(&self) -> Result<Vec<String>> {
        let checkpoints = self.inner.store.list()?;
        let mut registry = self.inner.lock()?;
        let mut started = Vec::new();
        for checkpoint in checkpoints {
            if registry.running.contains_key(&checkpoint.key) {
                continue;
            }
            let key = checkpoint.key.clone();
            let (entry, _) = self.inner.start_instance(checkpoint.params.clone(), Some(checkpoint), None);
            registry.completed.remove(&key);
            registry.running.insert(key.clone(), entry);
            started.push(key);
        }
        if !started.is_empty() {
            info!("resumed {} instance(s) from checkpoints", started.len());
        }
        Ok(started)
    }

    /// Wait until the subject's logical workflow ends
    ///
    /// Checkpoint restarts are not completions; the wait spans every execution.
    pub async fn wait_for_completion(&self, subject_id: &str) -> Result<Completion> {
        let key = process_key(subject_id);
        let completion = {
            let registry = self.inner.lock()?;
            match (registry.running.get(&key), registry.completed.get(&key)) {
                (Some(entry), _) => entry.completion.clone(),
                (None, Some(done)) => return Ok(done.clone()),
                (None, None) => return Err(WorkflowError::InstanceNotFound(key)),
            }
        };

        let mut rx = completion.subscribe();
        let done = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| WorkflowError::InvalidState(format!("{}: completion channel closed", key)))?;
        (*done)
            .clone()
            .ok_or_else(|| WorkflowError::InvalidState(format!("{}: completion missing", key)))
    }

    /// Cancel every running instance and wait for their tasks to finish
    pub async fn shutdown(&self) -> Result<()> {
        let handles: Vec<JoinHandle<()>> = {
            let mut registry = self.inner.lock()?;
            registry
                .running
                .values_mut()
                .filter_map(|entry| {
                    entry.cell.cancel();
                    entry.handle.take()
                })
                .collect()
        };
        info!("shutting down {} instance(s)", handles.len());
        for joined in join_all(handles).await {
            if let Err(e) = joined {
                warn!("instance task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    fn with_entry<R>(&self, subject_id: &str, f: impl FnOnce(&InstanceEntry) -> R) -> Result<R> {
        let key = process_key(subject_id);
        let registry = self.inner.lock()?;
        registry
            .running
            .get(&key)
            .map(f)
            .ok_or(WorkflowError::InstanceNotFound(key))
    }
}

impl<E: StepExecutor + 'static> RuntimeInner<E> {
    fn lock(&self) -> Result<MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|e| WorkflowError::InvalidState(format!("registry lock poisoned: {}", e)))
    }

    /// Build and spawn the first execution of an instance; the caller registers it
    fn start_instance(
        self: &Arc<Self>,
        params: ProcessParams,
        checkpoint: Option<Checkpoint>,
        patch: Option<&StatePatch>,
    ) -> (InstanceEntry, Option<SignalReceipt>) {
        let key = params.key();
        let execution = checkpoint.as_ref().map_or(1, |cp| cp.execution + 1);
        let record = StateRecord::seeded(checkpoint.map(|cp| cp.state));
        match execution {
            1 => info!("{}: starting new instance for {}", key, params.category),
            n => info!("{}: resuming from checkpoint as execution {}", key, n),
        }

        let cell = Arc::new(StateCell::new(key.clone(), record));
        let receipt = patch.map(|patch| cell.apply(patch));
        let (completion, _) = watch::channel(None);
        let handle = self.spawn_execution(params.clone(), cell.clone());
        let entry = InstanceEntry {
            params,
            cell,
            execution,
            completion: Arc::new(completion),
            handle: Some(handle),
        };
        (entry, receipt)
    }

    fn spawn_execution(self: &Arc<Self>, params: ProcessParams, cell: Arc<StateCell>) -> JoinHandle<()> {
        let inner = self.clone();
        tokio::spawn(async move {
            let control = ControlLoop::new(
                cell.clone(),
                inner.executor.clone(),
                inner.clock.clone(),
                params,
                inner.config.clone(),
            );
            let outcome = match AssertUnwindSafe(control.run()).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(panic) => Err(WorkflowError::Panicked(panic_message(panic.as_ref()))),
            };
            inner.finish_execution(&cell, outcome);
        })
    }

    /// Settle an execution: hand off to a successor or complete the instance
    fn finish_execution(self: &Arc<Self>, cell: &Arc<StateCell>, outcome: Result<LoopOutcome>) {
        let key = cell.key().to_string();
        let mut registry = match self.lock() {
            Ok(registry) => registry,
            Err(e) => {
                error!("{}: cannot settle execution: {}", key, e);
                return;
            }
        };
        let Some(entry) = registry.running.get_mut(&key) else {
            warn!("{}: execution ended with no registered instance", key);
            return;
        };
        if !Arc::ptr_eq(&entry.cell, cell) {
            debug!("{}: ignoring outcome of a superseded execution", key);
            return;
        }

        let completion = match outcome {
            Ok(outcome) if !outcome.is_final() && !cell.is_cancelled() => match self.hand_off(entry) {
                Ok(()) => return,
                Err(e) => {
                    error!("{}: checkpoint handoff failed: {}", key, e);
                    Completion::Failed(e.to_string())
                }
            },
            Ok(LoopOutcome::Aborted) => Completion::Aborted,
            // Canceled, or reached the bound after cancellation was requested
            Ok(_) => Completion::Cancelled,
            Err(e) => {
                error!("{}: execution {} failed: {}", key, entry.execution, e);
                Completion::Failed(e.to_string())
            }
        };

        if matches!(completion, Completion::Aborted | Completion::Cancelled) {
            if let Err(e) = self.store.remove(&key) {
                warn!("{}: failed to remove checkpoint: {}", key, e);
            }
        }
        if let Some(entry) = registry.running.remove(&key) {
            entry.completion.send_replace(Some(completion.clone()));
        }
        info!("{}: instance completed: {:?}", key, completion);
        registry.completed.insert(key, completion);
        registry.settled += 1;
    }

    /// Persist the current state and start the successor execution under the same key
    ///
    /// Runs under the registry lock so no signal reaches the old cell after its
    /// snapshot is taken; this is the only store write made while locked.
    fn hand_off(self: &Arc<Self>, entry: &mut InstanceEntry) -> Result<()> {
        let state = entry.cell.snapshot();
        let checkpoint = Checkpoint::new(entry.params.clone(), state, entry.execution);
        self.store.save(&checkpoint)?;

        let cell = Arc::new(StateCell::new(checkpoint.key.clone(), checkpoint.state));
        entry.cell = cell.clone();
        entry.execution += 1;
        entry.handle = Some(self.spawn_execution(entry.params.clone(), cell));
        info!("{}: continued as execution {}", checkpoint.key, entry.execution);
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
