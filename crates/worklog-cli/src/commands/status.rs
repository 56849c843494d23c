//! Status command: last session and today's total for one task.

use std::io::Write;

use anyhow::Result;
use worklog_core::LogEngine;

use crate::commands::util::{format_duration, format_timestamp};

/// Runs the status command.
pub async fn run<W: Write>(writer: &mut W, engine: &LogEngine, task: &str) -> Result<()> {
    let last = engine.last_log(task).await?;
    let total = engine.daily_total(task).await?;

    let Some(record) = last else {
        writeln!(writer, "No sessions recorded for '{task}'.")?;
        return Ok(());
    };

    writeln!(writer, "Task:         {task}")?;
    writeln!(
        writer,
        "Last session: {} to {}",
        format_timestamp(record.start),
        format_timestamp(record.finish)
    )?;
    writeln!(writer, "Logged today: {}", format_duration(total))?;
    Ok(())
}
