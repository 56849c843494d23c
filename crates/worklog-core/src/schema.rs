//! Application schema for the worklog store.

use worklog_store::Schema;

/// Table holding one record per logging session.
pub const TIME_LOGS: &str = "timeLogs";

/// Table holding one record per user-visible task.
pub const TASKS: &str = "tasks";

/// Secondary index on [`TIME_LOGS`] used for per-task scans.
pub const TASK_NAME_INDEX: &str = "taskName";

/// Schema version recorded in the backing file.
pub const SCHEMA_VERSION: u32 = 1;

/// Builds the application schema.
///
/// The migration runs when the store file is created or was last opened at a
/// lower version.
#[must_use]
pub fn schema() -> Schema {
    Schema::build(SCHEMA_VERSION, |db| {
        db.create_table(TIME_LOGS, "logId").index(TASK_NAME_INDEX);
        db.create_table(TASKS, "taskName");
    })
}
