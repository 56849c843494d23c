//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Task time logger.
///
/// Tracks elapsed working time per named task: start a timer, let the
/// heartbeat persist progress every few seconds, and review same-day totals.
#[derive(Debug, Parser)]
#[command(name = "worklog", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage the task list.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Log time against a task until interrupted.
    Start {
        /// The task to log.
        task: String,
    },

    /// Show the last session and today's total for a task.
    Status {
        /// The task to inspect.
        task: String,
    },

    /// Dump recorded sessions.
    Log {
        /// Restrict to one task.
        #[arg(long)]
        task: Option<String>,

        /// Output JSONL instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Answer requests over line-delimited JSON on stdin/stdout.
    Serve,
}

/// Task list actions.
#[derive(Debug, Subcommand)]
pub enum TaskAction {
    /// Add a task.
    Add {
        /// The task name.
        name: String,
    },
    /// Remove a task. Existing log records are kept.
    Remove {
        /// The task name.
        name: String,
    },
    /// List tasks.
    List,
}
