//! Line-delimited JSON boundary over stdin/stdout.
//!
//! Each input line is one request; each output line is either the response
//! to a request or an interleaved `updateTimeLog` notification pushed after
//! a heartbeat write.

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, BufReader};
use worklog_core::{Notification, Request, RequestHandler};

/// Runs the serve loop until stdin closes.
pub async fn run(handler: &RequestHandler) -> Result<()> {
    let mut updates = handler.engine().subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                println!("{}", respond(handler, &line).await);
            }
            update = updates.recv() => {
                if let Ok(record) = update {
                    println!(
                        "{}",
                        serde_json::to_string(&Notification::UpdateTimeLog(record))?
                    );
                }
            }
        }
    }
    Ok(())
}

/// Answers one request line. Failures become `{"error": ...}` objects rather
/// than tearing the session down.
async fn respond(handler: &RequestHandler, line: &str) -> Value {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => match handler.handle(request).await {
            Ok(value) => value,
            Err(error) => json!({"error": error.to_string()}),
        },
        Err(error) => json!({"error": format!("invalid request: {error}")}),
    }
}
