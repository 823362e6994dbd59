use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod cli;

use cli::Cli;
use cli::commands::{CategoryArg, Commands};
use prrflow::activity::{RetryingExecutor, SimulatedExecutor, SimulationConfig};
use prrflow::config::Config;
use prrflow::coordination::{Clock, MonotonicClock};
use prrflow::domain::{ProcessParams, StatePatch, StateRecord, Status};
use prrflow::runtime::{CheckpointStore, Completion, FileCheckpointStore, WorkflowRuntime};
use prrflow::WorkflowError;

fn setup_logging(cli: &Cli, config: &Config) -> Result<()> {
    let level = config.log_level.as_deref().unwrap_or("info");
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));

    if cli.stderr {
        builder.init();
        return Ok(());
    }

    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("prrflow")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("prrflow.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Simulate {
            subject,
            category,
            cycles,
            flaky,
        } => handle_simulate_command(subject, *category, *cycles, *flaky, config).await,
        Commands::Checkpoints => handle_checkpoints_command(config),
        Commands::Config => handle_config_command(config),
    }
}

async fn handle_simulate_command(
    subject: &str,
    category: CategoryArg,
    cycles: u32,
    flaky: bool,
    config: &Config,
) -> Result<()> {
    if cycles == 0 {
        bail!("--cycles must be at least 1");
    }
    info!("Simulating {} cycle(s) for subject {}", cycles, subject);

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let simulated = SimulatedExecutor::new(
        clock.clone(),
        SimulationConfig {
            flaky_first_contact: flaky,
            ..SimulationConfig::default()
        },
    );
    let executor = Arc::new(RetryingExecutor::new(simulated, config.activities.to_activity_options()));
    let store = Arc::new(
        FileCheckpointStore::new(&config.storage.checkpoint_dir).context("Failed to open checkpoint store")?,
    );
    let runtime = WorkflowRuntime::new(executor, clock, store, config.workflow.to_loop_config());

    let params = ProcessParams::new(subject, category.into());
    println!("{} {} ({})", "Starting:".green(), params.key(), params.category);
    runtime.signal_with_start(params, &StatePatch::status(Status::Started))?;

    let mut completed = 0;
    let mut last = runtime.query(subject)?;
    while completed < cycles {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let record = match runtime.query(subject) {
            Ok(record) => record,
            Err(WorkflowError::InstanceNotFound(_)) => break,
            Err(e) => return Err(e.into()),
        };
        if record.next_step != last.next_step {
            println!("  {} {}", "next step:".cyan(), record.next_step);
        }
        if last.status.is_started() && !record.status.is_started() {
            completed += 1;
            println!("{} cycle {} of {}", "Finished:".green(), completed, cycles);
            if completed < cycles {
                runtime.signal(subject, &StatePatch::status(Status::Started))?;
            }
        }
        last = record;
    }

    if runtime.running()?.is_empty() {
        return report_completion(&runtime, subject, &last).await;
    }
    let final_state = runtime.query(subject)?;
    runtime.signal(subject, &StatePatch::status(Status::Abort))?;
    report_completion(&runtime, subject, &final_state).await
}

async fn report_completion<E: prrflow::activity::StepExecutor + 'static>(
    runtime: &WorkflowRuntime<E>,
    subject: &str,
    state: &StateRecord,
) -> Result<()> {
    let completion = runtime.wait_for_completion(subject).await?;
    println!("{}", serde_json::to_string_pretty(state)?);
    match completion {
        Completion::Aborted => println!("{}", "Aborted".yellow()),
        Completion::Cancelled => println!("{}", "Canceled".yellow()),
        Completion::Failed(reason) => {
            println!("{} {}", "Failed:".red(), reason);
            bail!("process for subject {} failed", subject);
        }
    }
    Ok(())
}

fn handle_checkpoints_command(config: &Config) -> Result<()> {
    let store = FileCheckpointStore::new(&config.storage.checkpoint_dir).context("Failed to open checkpoint store")?;
    let checkpoints = store.list()?;
    if checkpoints.is_empty() {
        println!("No checkpoints in {}", store.base_path().display());
        return Ok(());
    }
    for cp in checkpoints {
        let saved = chrono::DateTime::from_timestamp_millis(cp.saved_at)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| cp.saved_at.to_string());
        println!(
            "{} execution {} [{}] status={} nextStep={} saved {}",
            cp.key.bold(),
            cp.execution,
            cp.params.category,
            cp.state.status,
            cp.state.next_step,
            saved
        );
    }
    Ok(())
}

fn handle_config_command(config: &Config) -> Result<()> {
    print!("{}", serde_yaml::to_string(config).context("Failed to render config")?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(&cli, &config).context("Failed to setup logging")?;
    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
