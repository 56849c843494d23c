use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use worklog_cli::commands::{log, serve, start, status, task};
use worklog_cli::{Cli, Commands, Config, TaskAction};
use worklog_core::{LogEngine, RequestHandler, schema, token};
use worklog_store::Store;

/// Length of the token namespacing this process's log identifiers.
const PROCESS_TOKEN_LENGTH: usize = 8;

/// Load config and describe the store, ensuring the parent directory exists.
fn open_store(config_path: Option<&Path>) -> Result<(Store, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let store = Store::new(&config.database_path, schema::schema());
    Ok((store, config))
}

fn engine_over(store: Store) -> LogEngine {
    LogEngine::new(store, token::random_token(PROCESS_TOKEN_LENGTH))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let mut stdout = std::io::stdout();
    match &cli.command {
        Some(Commands::Task { action }) => {
            let (store, _config) = open_store(cli.config.as_deref())?;
            match action {
                TaskAction::Add { name } => task::add(&mut stdout, &store, name).await?,
                TaskAction::Remove { name } => task::remove(&mut stdout, &store, name).await?,
                TaskAction::List => task::list(&mut stdout, &store).await?,
            }
        }
        Some(Commands::Start { task }) => {
            let (store, _config) = open_store(cli.config.as_deref())?;
            start::run(&mut stdout, &engine_over(store), task).await?;
        }
        Some(Commands::Status { task }) => {
            let (store, _config) = open_store(cli.config.as_deref())?;
            status::run(&mut stdout, &engine_over(store), task).await?;
        }
        Some(Commands::Log { task, json }) => {
            let (store, _config) = open_store(cli.config.as_deref())?;
            log::run(&mut stdout, &engine_over(store), task.as_deref(), *json).await?;
        }
        Some(Commands::Serve) => {
            let (store, _config) = open_store(cli.config.as_deref())?;
            serve::run(&RequestHandler::new(engine_over(store))).await?;
        }
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
