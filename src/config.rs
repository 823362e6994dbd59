use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::activity::{ActivityOptions, RetryPolicy};
use crate::runner::LoopConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub workflow: WorkflowConfig,
    pub activities: ActivitiesConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub max_iterations: u32,
    pub second_contact_wait_ms: u64,
    pub escalation_wait_ms: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            second_contact_wait_ms: 10000,
            escalation_wait_ms: 5000,
        }
    }
}

impl WorkflowConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            bail!("workflow.max_iterations must be at least 1");
        }
        Ok(())
    }

    pub fn to_loop_config(&self) -> LoopConfig {
        LoopConfig {
            max_iterations: self.max_iterations,
            second_contact_wait: Duration::from_millis(self.second_contact_wait_ms),
            escalation_wait: Duration::from_millis(self.escalation_wait_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivitiesConfig {
    pub start_to_close_ms: u64,
    /// 0 disables heartbeat monitoring
    pub heartbeat_timeout_ms: u64,
    /// 0 retries without limit
    pub maximum_attempts: u32,
    pub initial_interval_ms: u64,
    pub backoff_coefficient: f64,
    pub maximum_interval_ms: u64,
}

impl Default for ActivitiesConfig {
    fn default() -> Self {
        Self {
            start_to_close_ms: 60000,
            heartbeat_timeout_ms: 3000,
            maximum_attempts: 10,
            initial_interval_ms: 1000,
            backoff_coefficient: 2.0,
            maximum_interval_ms: 100000,
        }
    }
}

impl ActivitiesConfig {
    pub fn validate(&self) -> Result<()> {
        if self.start_to_close_ms == 0 {
            bail!("activities.start_to_close_ms must be positive");
        }
        if self.backoff_coefficient.is_nan() || self.backoff_coefficient < 1.0 {
            bail!("activities.backoff_coefficient must be at least 1.0");
        }
        Ok(())
    }

    pub fn to_activity_options(&self) -> ActivityOptions {
        ActivityOptions {
            start_to_close: Duration::from_millis(self.start_to_close_ms),
            heartbeat_timeout: (self.heartbeat_timeout_ms > 0).then(|| Duration::from_millis(self.heartbeat_timeout_ms)),
            retry: RetryPolicy {
                maximum_attempts: self.maximum_attempts,
                initial_interval: Duration::from_millis(self.initial_interval_ms),
                backoff_coefficient: self.backoff_coefficient,
                maximum_interval: Duration::from_millis(self.maximum_interval_ms),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub checkpoint_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("prrflow")
                .join("checkpoints"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            workflow: WorkflowConfig::default(),
            activities: ActivitiesConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Reject settings the runtime cannot honor
    pub fn validate(&self) -> Result<()> {
        self.workflow.validate()?;
        self.activities.validate()?;
        Ok(())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("Invalid config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
