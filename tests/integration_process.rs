//! Process lifecycle integration tests
//!
//! Drives whole PRR processes through the runtime with a scripted executor and
//! paused time: full cycles, abort, checkpoint handoffs and resumption.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time::Instant;

use prrflow::activity::{ActivityContext, ActivityOptions, RetryPolicy, RetryingExecutor, StepExecutor, StepOutcome};
use prrflow::coordination::{Clock, MonotonicClock};
use prrflow::domain::{Activity, Category, LoopPhase, ProcessParams, SignalReceipt, StatePatch, Status, Step};
use prrflow::error::{Result, WorkflowError};
use prrflow::runner::LoopConfig;
use prrflow::runtime::{CheckpointStore, Completion, FileCheckpointStore, MemoryCheckpointStore, WorkflowRuntime};

/// Executor whose call log and failure switch are shared with the test
#[derive(Clone)]
struct ScriptedExecutor {
    clock: Arc<dyn Clock>,
    send_offset_ms: i64,
    calls: Arc<Mutex<Vec<(Activity, Instant)>>>,
    fail_second_contact: Arc<AtomicBool>,
}

impl ScriptedExecutor {
    fn new(send_offset_ms: i64) -> Self {
        Self {
            clock: Arc::new(MonotonicClock::new()),
            send_offset_ms,
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_second_contact: Arc::new(AtomicBool::new(false)),
        }
    }

    fn steps(&self) -> Vec<(Activity, Instant)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(a, _)| *a != Activity::NextSendDate)
            .cloned()
            .collect()
    }

    fn count(&self, activity: Activity) -> usize {
        self.calls.lock().unwrap().iter().filter(|(a, _)| *a == activity).count()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn run_step(&self, activity: Activity, _ctx: &ActivityContext) -> Result<StepOutcome> {
        self.calls.lock().unwrap().push((activity, Instant::now()));
        if activity == Activity::SecondContact && self.fail_second_contact.load(Ordering::SeqCst) {
            return Err(WorkflowError::activity(activity.name(), "mail relay unavailable"));
        }
        Ok(StepOutcome::Completed)
    }

    async fn next_send_date(&self, _ctx: &ActivityContext) -> Result<i64> {
        self.calls.lock().unwrap().push((Activity::NextSendDate, Instant::now()));
        Ok(self.clock.now_ms() + self.send_offset_ms)
    }
}

fn params(subject: &str) -> ProcessParams {
    ProcessParams::new(subject, Category::Po)
}

fn quick_retries() -> ActivityOptions {
    ActivityOptions {
        heartbeat_timeout: None,
        retry: RetryPolicy {
            maximum_attempts: 3,
            initial_interval: Duration::from_secs(1),
            ..RetryPolicy::default()
        },
        ..ActivityOptions::default()
    }
}

fn runtime_with(
    executor: &ScriptedExecutor,
    store: Arc<dyn CheckpointStore>,
    config: LoopConfig,
) -> WorkflowRuntime<RetryingExecutor<ScriptedExecutor>> {
    WorkflowRuntime::new(
        Arc::new(RetryingExecutor::new(executor.clone(), quick_retries())),
        executor.clock.clone(),
        store,
        config,
    )
}

#[tokio::test(start_paused = true)]
async fn test_full_cycle_timing_and_final_state() {
    let executor = ScriptedExecutor::new(10_000);
    let runtime = runtime_with(&executor, Arc::new(MemoryCheckpointStore::new()), LoopConfig::default());

    let started = Instant::now();
    runtime
        .signal_with_start(params("100"), &StatePatch::status(Status::Started))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(40)).await;

    let steps = executor.steps();
    let order: Vec<Activity> = steps.iter().map(|(a, _)| *a).collect();
    assert_eq!(order, vec![Activity::FirstContact, Activity::SecondContact, Activity::Escalation]);
    let first = steps[0].1 - started;
    assert!(first >= Duration::from_secs(10) && first < Duration::from_millis(10_100));
    let second = steps[1].1 - steps[0].1;
    assert!(second >= Duration::from_secs(10) && second < Duration::from_millis(10_100));
    let third = steps[2].1 - steps[1].1;
    assert!(third >= Duration::from_secs(5) && third < Duration::from_millis(5_100));

    let record = runtime.query("100").unwrap();
    assert_eq!(record.status, Status::Stopped);
    assert_eq!(record.next_step, Step::FirstContact);
    assert_eq!(record.iterations, 1);
    assert_eq!(runtime.phase("100").unwrap(), LoopPhase::AwaitingActivation);

    // Queries have no side effects
    assert_eq!(runtime.query("100").unwrap(), record);
    assert_eq!(runtime.query("100").unwrap(), record);
}

#[tokio::test(start_paused = true)]
async fn test_abort_during_second_contact_wait_skips_step() {
    let executor = ScriptedExecutor::new(1_000);
    let store = Arc::new(MemoryCheckpointStore::new());
    let runtime = runtime_with(&executor, store.clone(), LoopConfig::default());

    runtime
        .signal_with_start(params("101"), &StatePatch::status(Status::Started))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(
        runtime.phase("101").unwrap(),
        LoopPhase::WaitingBetweenSteps(Activity::SecondContact)
    );

    assert_eq!(
        runtime.signal("101", &StatePatch::status(Status::Abort)).unwrap(),
        SignalReceipt::Applied
    );
    assert_eq!(runtime.wait_for_completion("101").await.unwrap(), Completion::Aborted);
    assert_eq!(executor.count(Activity::SecondContact), 0);
    assert_eq!(executor.count(Activity::Escalation), 0);
    assert!(store.list().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_signals_after_abort_are_ignored() {
    let executor = ScriptedExecutor::new(1_000);
    let runtime = runtime_with(&executor, Arc::new(MemoryCheckpointStore::new()), LoopConfig::default());

    runtime
        .signal_with_start(params("102"), &StatePatch::status(Status::Abort))
        .unwrap();
    let receipt = runtime
        .signal("102", &StatePatch::status(Status::Started).with_next_step(Step::Escalation))
        .unwrap_or(SignalReceipt::Ignored);
    assert_eq!(receipt, SignalReceipt::Ignored);

    assert_eq!(runtime.wait_for_completion("102").await.unwrap(), Completion::Aborted);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(executor.steps().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_past_send_date_runs_first_contact_immediately() {
    let executor = ScriptedExecutor::new(86_400_000);
    let runtime = runtime_with(&executor, Arc::new(MemoryCheckpointStore::new()), LoopConfig::default());

    runtime
        .signal_with_start(params("103"), &StatePatch::status(Status::Started))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(executor.steps().is_empty());

    let signaled = Instant::now();
    runtime
        .signal("103", &StatePatch::new().with_next_send_date(1))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let steps = executor.steps();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].0, Activity::FirstContact);
    assert!(steps[0].1 - signaled < Duration::from_millis(100));
    assert_eq!(executor.count(Activity::NextSendDate), 1);
}

#[tokio::test(start_paused = true)]
async fn test_checkpoint_handoff_keeps_identity() {
    let executor = ScriptedExecutor::new(1_000);
    let store = Arc::new(MemoryCheckpointStore::new());
    let config = LoopConfig {
        max_iterations: 2,
        ..LoopConfig::default()
    };
    let runtime = runtime_with(&executor, store.clone(), config);

    runtime
        .signal_with_start(params("104"), &StatePatch::status(Status::Started))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(runtime.execution("104").unwrap(), 1);
    assert_eq!(runtime.query("104").unwrap().iterations, 1);

    runtime.signal("104", &StatePatch::status(Status::Started)).unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    // Second cycle hit the bound: the successor runs under the same key
    assert_eq!(runtime.execution("104").unwrap(), 2);
    let record = runtime.query("104").unwrap();
    assert_eq!(record.iterations, 0);
    assert_eq!(record.status, Status::Stopped);
    assert_eq!(record.next_step, Step::FirstContact);

    let checkpoint = store.load("process-104").unwrap().unwrap();
    assert_eq!(checkpoint.execution, 1);
    assert_eq!(checkpoint.state.iterations, 0);
    assert_eq!(checkpoint.params, params("104"));

    // The successor keeps serving signals
    runtime.signal("104", &StatePatch::status(Status::Started)).unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(runtime.query("104").unwrap().iterations, 1);
    assert_eq!(executor.steps().len(), 9);

    runtime.signal("104", &StatePatch::status(Status::Abort)).unwrap();
    assert_eq!(runtime.wait_for_completion("104").await.unwrap(), Completion::Aborted);
    assert!(store.load("process-104").unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_failure_keeps_checkpoint_for_resume() {
    let temp = TempDir::new().unwrap();
    let executor = ScriptedExecutor::new(1_000);
    let store = Arc::new(FileCheckpointStore::new(temp.path()).unwrap());
    let config = LoopConfig {
        max_iterations: 1,
        ..LoopConfig::default()
    };
    let runtime = runtime_with(&executor, store.clone(), config.clone());

    runtime
        .signal_with_start(params("105"), &StatePatch::status(Status::Started))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(runtime.execution("105").unwrap(), 2);

    executor.fail_second_contact.store(true, Ordering::SeqCst);
    runtime.signal("105", &StatePatch::status(Status::Started)).unwrap();

    let completion = runtime.wait_for_completion("105").await.unwrap();
    let Completion::Failed(reason) = completion else {
        panic!("expected failure, got {completion:?}");
    };
    assert!(reason.contains("secondContact"));
    assert!(reason.contains("3 attempts"));
    assert_eq!(executor.count(Activity::SecondContact), 3);
    assert!(runtime.running().unwrap().is_empty());

    // A fresh runtime over the same directory picks the process back up
    executor.fail_second_contact.store(false, Ordering::SeqCst);
    let reopened = Arc::new(FileCheckpointStore::new(temp.path()).unwrap());
    let resumed = runtime_with(&executor, reopened, config);
    assert_eq!(resumed.resume().unwrap(), vec!["process-105".to_string()]);
    assert_eq!(resumed.execution("105").unwrap(), 2);
    let record = resumed.query("105").unwrap();
    assert_eq!(record.status, Status::Stopped);
    assert_eq!(record.next_step, Step::FirstContact);

    resumed.cancel("105").unwrap();
    assert_eq!(resumed.wait_for_completion("105").await.unwrap(), Completion::Cancelled);
    assert!(store.list().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_signal_with_start_after_completion_starts_fresh() {
    let executor = ScriptedExecutor::new(1_000);
    let runtime = runtime_with(&executor, Arc::new(MemoryCheckpointStore::new()), LoopConfig::default());

    runtime
        .signal_with_start(params("106"), &StatePatch::status(Status::Abort))
        .unwrap();
    assert_eq!(runtime.wait_for_completion("106").await.unwrap(), Completion::Aborted);
    assert!(matches!(
        runtime.query("106"),
        Err(WorkflowError::InstanceNotFound(_))
    ));

    runtime
        .signal_with_start(params("106"), &StatePatch::new().with_next_step(Step::SecondContact))
        .unwrap();
    let record = runtime.query("106").unwrap();
    assert_eq!(record.status, Status::Stopped);
    assert_eq!(record.next_step, Step::SecondContact);
    assert_eq!(runtime.execution("106").unwrap(), 1);

    runtime.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_subject_with_separator_checkpoints_to_file_store() {
    let temp = TempDir::new().unwrap();
    let executor = ScriptedExecutor::new(1_000);
    let store = Arc::new(FileCheckpointStore::new(temp.path().join("checkpoints")).unwrap());
    let config = LoopConfig {
        max_iterations: 1,
        ..LoopConfig::default()
    };
    let runtime = runtime_with(&executor, store.clone(), config);

    runtime
        .signal_with_start(params("dept/42"), &StatePatch::status(Status::Started))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(30)).await;

    // The handoff wrote a checkpoint and the successor took over
    assert_eq!(runtime.execution("dept/42").unwrap(), 2);
    let checkpoint = store.load("process-dept/42").unwrap().unwrap();
    assert_eq!(checkpoint.params, params("dept/42"));
    assert_eq!(store.list().unwrap().len(), 1);
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);

    runtime.signal("dept/42", &StatePatch::status(Status::Abort)).unwrap();
    assert_eq!(runtime.wait_for_completion("dept/42").await.unwrap(), Completion::Aborted);
    assert!(store.list().unwrap().is_empty());
}
