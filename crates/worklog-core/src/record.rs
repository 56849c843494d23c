//! Persisted records for tasks and their logged time.

use serde::{Deserialize, Serialize};

/// One contiguous start-to-stop logging interval for a task.
///
/// `start` is set when the record is first written and never changes
/// afterwards; `finish` advances with every heartbeat and never moves
/// backwards, so `finish >= start` holds for every persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Primary key: the process token followed by the session token.
    pub log_id: String,
    /// The task this interval belongs to.
    pub task_name: String,
    /// Session start, milliseconds since the Unix epoch.
    pub start: i64,
    /// Most recent heartbeat, milliseconds since the Unix epoch.
    pub finish: i64,
}

/// A user-visible task.
///
/// Deleting a task does not cascade to its log records; orphaned records
/// stay queryable through the log scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_name: String,
}
