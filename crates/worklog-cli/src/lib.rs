//! Worklog CLI library.
//!
//! This crate provides the command-line interface for worklog.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands, TaskAction};
pub use config::Config;
