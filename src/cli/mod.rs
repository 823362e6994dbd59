//! CLI module for prrflow - command-line interface and subcommands.
//!
//! Provides the main entry point with subcommands for local simulation,
//! checkpoint inspection, and configuration display.

pub mod commands;

pub use commands::Cli;
