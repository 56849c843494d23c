//! Log command: dump recorded sessions as a table or JSONL.

use std::io::Write;

use anyhow::Result;
use worklog_core::LogEngine;

use crate::commands::util::{format_duration, format_timestamp};

/// Runs the log command.
pub async fn run<W: Write>(
    writer: &mut W,
    engine: &LogEngine,
    task: Option<&str>,
    json: bool,
) -> Result<()> {
    let mut records = match task {
        Some(task) => engine.task_log(task).await?,
        None => engine.time_log().await?,
    };
    records.sort_by_key(|record| record.start);

    if json {
        for record in &records {
            writeln!(writer, "{}", serde_json::to_string(record)?)?;
        }
        return Ok(());
    }

    if records.is_empty() {
        writeln!(writer, "No log records.")?;
        return Ok(());
    }

    writeln!(writer, "{:<42} {:<20} {:<20} DURATION", "LOG ID", "TASK", "STARTED")?;
    for record in &records {
        writeln!(
            writer,
            "{:<42} {:<20} {:<20} {}",
            record.log_id,
            record.task_name,
            format_timestamp(record.start),
            format_duration(chrono::Duration::milliseconds(record.finish - record.start)),
        )?;
    }
    Ok(())
}
