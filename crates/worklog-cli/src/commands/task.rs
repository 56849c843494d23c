//! Task list management.

use std::io::Write;

use anyhow::{Context, Result, bail};
use worklog_core::Task;
use worklog_core::schema::TASKS;
use worklog_store::{Store, StoreError};

/// Adds a task to the task list.
pub async fn add<W: Write>(writer: &mut W, store: &Store, name: &str) -> Result<()> {
    let conn = store.connect().await.context("failed to open store")?;
    let created = conn
        .create(
            TASKS,
            &Task {
                task_name: name.to_owned(),
            },
        )
        .await;
    conn.close().await.context("failed to close store")?;

    match created {
        Ok(()) => {
            writeln!(writer, "Added task '{name}'.")?;
            Ok(())
        }
        Err(StoreError::DuplicateKey { .. }) => bail!("task '{name}' already exists"),
        Err(error) => Err(error).context("failed to add task"),
    }
}

/// Removes a task. Its log records are kept and stay queryable.
pub async fn remove<W: Write>(writer: &mut W, store: &Store, name: &str) -> Result<()> {
    let conn = store.connect().await.context("failed to open store")?;
    conn.delete(TASKS, name)
        .await
        .context("failed to remove task")?;
    conn.close().await.context("failed to close store")?;

    writeln!(writer, "Removed task '{name}'.")?;
    Ok(())
}

/// Lists tasks in insertion order.
pub async fn list<W: Write>(writer: &mut W, store: &Store) -> Result<()> {
    let conn = store.connect().await.context("failed to open store")?;
    let tasks: Vec<Task> = conn.get_all(TASKS).await.context("failed to list tasks")?;
    conn.close().await.context("failed to close store")?;

    if tasks.is_empty() {
        writeln!(writer, "No tasks yet. Add one with 'worklog task add <name>'.")?;
        return Ok(());
    }
    for task in &tasks {
        writeln!(writer, "{}", task.task_name)?;
    }
    Ok(())
}
