//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - simulate: run a process in-process against simulated steps
//! - checkpoints: list persisted checkpoints
//! - config: print the effective configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use prrflow::domain::Category;

/// prrflow - Resumable follow-up sequences for public records requests
#[derive(Parser, Debug)]
#[command(name = "prrflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub stderr: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Request category as accepted on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryArg {
    Po,
    Contacts,
}

impl From<CategoryArg> for Category {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::Po => Category::Po,
            CategoryArg::Contacts => Category::Contacts,
        }
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a subject's process, let it run, then abort it
    Simulate {
        /// Subject (agency) id
        #[arg(short, long)]
        subject: String,

        /// Request category
        #[arg(short = 't', long, value_enum, default_value_t = CategoryArg::Po)]
        category: CategoryArg,

        /// Number of full cycles to run before aborting
        #[arg(short = 'n', long, default_value_t = 1)]
        cycles: u32,

        /// Fail the first attempt of every first contact
        #[arg(long)]
        flaky: bool,
    },

    /// List persisted checkpoints
    Checkpoints,

    /// Print the effective configuration
    Config,
}
