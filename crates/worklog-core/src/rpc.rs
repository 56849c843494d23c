//! Request/response boundary for external front-ends.
//!
//! The transport itself is out of scope: a front-end hands a [`Request`] to
//! [`RequestHandler::handle`] and gets JSON back. Update notifications ride
//! the engine's broadcast channel and are framed here as [`Notification`]s,
//! independent of the request/response path.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use worklog_store::StoreError;

use crate::engine::{EngineError, LogEngine};
use crate::record::{LogRecord, Task};
use crate::schema::TASKS;

/// A request from a front-end, tagged by verb.
///
/// Wire shape: `{"requestType": <verb>, "data": {...}}` with camelCase field
/// names throughout.
#[derive(Debug, Clone, Deserialize)]
#[serde(
    tag = "requestType",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Request {
    GetTask,
    AddTask { task_name: String },
    DeleteTask { task_name: String },
    IsLogging { task_name: String },
    StartLogging { task_name: String },
    FinishLogging { task_name: String },
    GetTimeLog,
    GetLastTimeLog { task_name: String },
    GetDailyTotal { task_name: String },
}

/// An asynchronous push emitted outside the request/response channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "requestType", content = "data", rename_all = "camelCase")]
pub enum Notification {
    /// Sent after every successful heartbeat write, carrying the full
    /// record.
    UpdateTimeLog(LogRecord),
}

/// Answers boundary requests against the engine and its store.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    engine: LogEngine,
}

impl RequestHandler {
    #[must_use]
    pub const fn new(engine: LogEngine) -> Self {
        Self { engine }
    }

    /// The engine behind this handler.
    #[must_use]
    pub const fn engine(&self) -> &LogEngine {
        &self.engine
    }

    /// Dispatches one request, returning the verb's JSON result.
    ///
    /// `startLogging` and `finishLogging` collapse `AlreadyLogging` /
    /// `NotLogging` to a boolean `false`: callers on this boundary cannot
    /// tell why a transition failed. The narrowing stops here; the engine's
    /// own API stays fully typed.
    pub async fn handle(&self, request: Request) -> Result<Value, EngineError> {
        match request {
            Request::GetTask => to_json(&self.tasks().await?),
            Request::AddTask { task_name } => {
                self.add_task(task_name).await?;
                Ok(json!(true))
            }
            Request::DeleteTask { task_name } => {
                self.delete_task(&task_name).await?;
                Ok(json!(true))
            }
            Request::IsLogging { task_name } => Ok(json!(self.engine.is_logging(&task_name))),
            Request::StartLogging { task_name } => Ok(json!(self.engine.start(&task_name).is_ok())),
            Request::FinishLogging { task_name } => Ok(json!(self.engine.stop(&task_name).is_ok())),
            Request::GetTimeLog => to_json(&self.engine.time_log().await?),
            Request::GetLastTimeLog { task_name } => {
                match self.engine.last_log(&task_name).await? {
                    Some(record) => to_json(&record),
                    None => Ok(Value::Null),
                }
            }
            Request::GetDailyTotal { task_name } => {
                let total = self.engine.daily_total(&task_name).await?;
                Ok(json!(total.num_milliseconds()))
            }
        }
    }

    async fn tasks(&self) -> Result<Vec<Task>, EngineError> {
        let conn = self.engine.store().connect().await?;
        let tasks = conn.get_all(TASKS).await?;
        conn.close().await?;
        Ok(tasks)
    }

    async fn add_task(&self, task_name: String) -> Result<(), EngineError> {
        let conn = self.engine.store().connect().await?;
        conn.create(TASKS, &Task { task_name }).await?;
        conn.close().await?;
        Ok(())
    }

    async fn delete_task(&self, task_name: &str) -> Result<(), EngineError> {
        let conn = self.engine.store().connect().await?;
        conn.delete(TASKS, task_name).await?;
        conn.close().await?;
        Ok(())
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, EngineError> {
    Ok(serde_json::to_value(value).map_err(StoreError::from)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::engine::DayBounds;
    use crate::schema;
    use worklog_store::Store;

    fn test_handler(dir: &tempfile::TempDir) -> RequestHandler {
        let store = Store::new(dir.path().join("worklog.db"), schema::schema());
        RequestHandler::new(LogEngine::with_options(
            store,
            "proc0001",
            Duration::from_millis(20),
            DayBounds::today(),
        ))
    }

    fn request(raw: &str) -> Request {
        serde_json::from_str(raw).expect("parse request")
    }

    #[test]
    fn requests_parse_from_wire_shape() {
        assert!(matches!(
            request(r#"{"requestType":"getTask"}"#),
            Request::GetTask
        ));
        assert!(matches!(
            request(r#"{"requestType":"startLogging","data":{"taskName":"deep-work"}}"#),
            Request::StartLogging { ref task_name } if task_name == "deep-work"
        ));
        assert!(matches!(
            request(r#"{"requestType":"getDailyTotal","data":{"taskName":"deep-work"}}"#),
            Request::GetDailyTotal { ref task_name } if task_name == "deep-work"
        ));

        let malformed: Result<Request, _> =
            serde_json::from_str(r#"{"requestType":"rewriteHistory"}"#);
        assert!(malformed.is_err());
    }

    #[test]
    fn notification_uses_wire_shape() {
        let notification = Notification::UpdateTimeLog(LogRecord {
            log_id: "proc0001sess0001".to_string(),
            task_name: "deep-work".to_string(),
            start: 1_000,
            finish: 6_000,
        });
        let json = serde_json::to_value(&notification).expect("serialize");
        assert_eq!(
            json,
            json!({
                "requestType": "updateTimeLog",
                "data": {
                    "logId": "proc0001sess0001",
                    "taskName": "deep-work",
                    "start": 1_000,
                    "finish": 6_000,
                },
            })
        );
    }

    #[tokio::test]
    async fn task_verbs_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let handler = test_handler(&dir);

        let tasks = handler.handle(Request::GetTask).await.expect("getTask");
        assert_eq!(tasks, json!([]));

        let added = handler
            .handle(request(
                r#"{"requestType":"addTask","data":{"taskName":"deep-work"}}"#,
            ))
            .await
            .expect("addTask");
        assert_eq!(added, json!(true));

        let tasks = handler.handle(Request::GetTask).await.expect("getTask");
        assert_eq!(tasks, json!([{"taskName": "deep-work"}]));

        // Duplicate task names are rejected by the store.
        let duplicate = handler
            .handle(request(
                r#"{"requestType":"addTask","data":{"taskName":"deep-work"}}"#,
            ))
            .await
            .expect_err("duplicate addTask");
        assert!(matches!(
            duplicate,
            EngineError::Store(StoreError::DuplicateKey { .. })
        ));

        let deleted = handler
            .handle(request(
                r#"{"requestType":"deleteTask","data":{"taskName":"deep-work"}}"#,
            ))
            .await
            .expect("deleteTask");
        assert_eq!(deleted, json!(true));

        // Deleting an absent task still answers true.
        let deleted = handler
            .handle(request(
                r#"{"requestType":"deleteTask","data":{"taskName":"deep-work"}}"#,
            ))
            .await
            .expect("deleteTask again");
        assert_eq!(deleted, json!(true));
    }

    #[tokio::test]
    async fn logging_verbs_collapse_errors_to_false() {
        let dir = tempfile::tempdir().expect("tempdir");
        let handler = test_handler(&dir);
        let start = r#"{"requestType":"startLogging","data":{"taskName":"deep-work"}}"#;
        let finish = r#"{"requestType":"finishLogging","data":{"taskName":"deep-work"}}"#;
        let is_logging = r#"{"requestType":"isLogging","data":{"taskName":"deep-work"}}"#;

        assert_eq!(
            handler.handle(request(finish)).await.expect("finish idle"),
            json!(false)
        );
        assert_eq!(
            handler.handle(request(start)).await.expect("start"),
            json!(true)
        );
        assert_eq!(
            handler.handle(request(is_logging)).await.expect("isLogging"),
            json!(true)
        );
        assert_eq!(
            handler.handle(request(start)).await.expect("start again"),
            json!(false)
        );
        assert_eq!(
            handler.handle(request(finish)).await.expect("finish"),
            json!(true)
        );
        assert_eq!(
            handler.handle(request(is_logging)).await.expect("isLogging"),
            json!(false)
        );
    }

    #[tokio::test]
    async fn read_verbs_answer_for_unlogged_tasks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let handler = test_handler(&dir);

        let logs = handler.handle(Request::GetTimeLog).await.expect("getTimeLog");
        assert_eq!(logs, json!([]));

        let last = handler
            .handle(request(
                r#"{"requestType":"getLastTimeLog","data":{"taskName":"untouched"}}"#,
            ))
            .await
            .expect("getLastTimeLog");
        assert_eq!(last, Value::Null);

        let total = handler
            .handle(request(
                r#"{"requestType":"getDailyTotal","data":{"taskName":"untouched"}}"#,
            ))
            .await
            .expect("getDailyTotal");
        assert_eq!(total, json!(0));
    }
}
