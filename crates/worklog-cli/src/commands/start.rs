//! Foreground logging: start a session and stream heartbeat updates.

use std::io::Write;

use anyhow::{Context, Result};
use worklog_core::LogEngine;

use crate::commands::util::{format_duration, format_timestamp};

/// Logs time against `task` until Ctrl-C, printing each heartbeat write.
pub async fn run<W: Write>(writer: &mut W, engine: &LogEngine, task: &str) -> Result<()> {
    let mut updates = engine.subscribe();
    engine.start(task).context("failed to start logging")?;
    writeln!(writer, "Logging '{task}'. Press Ctrl-C to stop.")?;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                break;
            }
            update = updates.recv() => {
                // Lagged receivers skip records; the next heartbeat catches up.
                if let Ok(record) = update {
                    if record.task_name == task {
                        let elapsed =
                            chrono::Duration::milliseconds(record.finish - record.start);
                        writeln!(
                            writer,
                            "  logged {} (since {})",
                            format_duration(elapsed),
                            format_timestamp(record.start),
                        )?;
                        writer.flush()?;
                    }
                }
            }
        }
    }

    engine.stop(task).context("failed to stop logging")?;
    let total = engine.daily_total(task).await?;
    writeln!(writer, "Stopped '{task}'. Logged today: {}.", format_duration(total))?;
    Ok(())
}
