//! The per-task timer state machine and its derived aggregates.
//!
//! A task is either idle or logging; [`LogEngine::start`] and
//! [`LogEngine::stop`] are the only transitions. While a task is logging, a
//! heartbeat task rewrites the session's log record every
//! [`HEARTBEAT_PERIOD`] and publishes the record to subscribers. Read-side
//! queries (`last_log`, `daily_total`) go straight to the store through the
//! task-name index.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{Local, NaiveTime, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;
use worklog_store::{Store, StoreError};

use crate::record::LogRecord;
use crate::schema::{TASK_NAME_INDEX, TIME_LOGS};

/// Fixed heartbeat period while a task is logging.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(5);

/// Slow subscribers miss intermediate records rather than blocking
/// heartbeats.
const UPDATE_CHANNEL_CAPACITY: usize = 64;

const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `start` on a task that already has an active session.
    #[error("already logging task {0:?}")]
    AlreadyLogging(String),
    /// `stop` on a task with no active session.
    #[error("not logging task {0:?}")]
    NotLogging(String),
    /// The store rejected a read or write.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The local calendar day the engine attributes time to.
///
/// Computed once at engine construction and kept for the engine's lifetime:
/// a process alive across midnight keeps attributing time to the day it
/// started on. Deliberate; see [`LogEngine::daily_total`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBounds {
    start_ms: i64,
    end_ms: i64,
}

impl DayBounds {
    /// Bounds of the current local calendar day
    /// (00:00:00.000–23:59:59.999).
    #[must_use]
    pub fn today() -> Self {
        let now = Local::now();
        // Local midnight can be absent or ambiguous around DST changes.
        let midnight = now.with_time(NaiveTime::MIN).earliest().unwrap_or(now);
        Self::starting_at(midnight.timestamp_millis())
    }

    /// Bounds of the day beginning at `start_ms` (milliseconds since epoch).
    #[must_use]
    pub const fn starting_at(start_ms: i64) -> Self {
        Self {
            start_ms,
            end_ms: start_ms + MS_PER_DAY - 1,
        }
    }

    /// Start of day, milliseconds since the Unix epoch.
    #[must_use]
    pub const fn start_ms(&self) -> i64 {
        self.start_ms
    }

    /// End of day (23:59:59.999), milliseconds since the Unix epoch.
    #[must_use]
    pub const fn end_ms(&self) -> i64 {
        self.end_ms
    }

    /// Milliseconds of `record` attributed to this day: the full span when
    /// the session started inside the day, otherwise only the portion after
    /// the start-of-day boundary, floored at zero.
    #[must_use]
    pub const fn contribution_ms(&self, record: &LogRecord) -> i64 {
        if record.start >= self.start_ms {
            record.finish - record.start
        } else {
            let clipped = record.finish - self.start_ms;
            if clipped > 0 { clipped } else { 0 }
        }
    }
}

/// An active logging session for one task.
#[derive(Debug)]
struct ActiveSession {
    log_id: String,
    heartbeat: JoinHandle<()>,
}

#[derive(Debug)]
struct Inner {
    store: Store,
    process_token: String,
    heartbeat_period: Duration,
    day: DayBounds,
    sessions: Mutex<HashMap<String, ActiveSession>>,
    updates: broadcast::Sender<LogRecord>,
}

impl Inner {
    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, ActiveSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log_id(&self, session_token: &str) -> String {
        format!("{}{session_token}", self.process_token)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let sessions = self
            .sessions
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for (task, session) in sessions.drain() {
            tracing::debug!(%task, log_id = %session.log_id, "session cancelled at shutdown");
            session.heartbeat.abort();
        }
    }
}

/// The task-timer engine.
///
/// Owns the session table (task name → active heartbeat); the table is the
/// sole source of truth for "is this task currently logging" and is only
/// mutated through [`start`](Self::start) and [`stop`](Self::stop). Cloning
/// shares the same engine; remaining heartbeats are cancelled when the last
/// clone is dropped.
#[derive(Debug, Clone)]
pub struct LogEngine {
    inner: Arc<Inner>,
}

impl LogEngine {
    /// Creates an engine over `store`, namespacing log identifiers with
    /// `process_token`.
    #[must_use]
    pub fn new(store: Store, process_token: impl Into<String>) -> Self {
        Self::with_options(store, process_token, HEARTBEAT_PERIOD, DayBounds::today())
    }

    /// Creates an engine with an explicit heartbeat period and day bounds.
    #[must_use]
    pub fn with_options(
        store: Store,
        process_token: impl Into<String>,
        heartbeat_period: Duration,
        day: DayBounds,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                process_token: process_token.into(),
                heartbeat_period,
                day,
                sessions: Mutex::new(HashMap::new()),
                updates,
            }),
        }
    }

    /// The store this engine reads and writes.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// The day this engine attributes time to.
    #[must_use]
    pub fn day(&self) -> DayBounds {
        self.inner.day
    }

    /// Subscribes to update notifications: every successful heartbeat write
    /// publishes the full record.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.inner.updates.subscribe()
    }

    /// Whether `task` currently has an active session. No store access.
    #[must_use]
    pub fn is_logging(&self, task: &str) -> bool {
        self.inner.lock_sessions().contains_key(task)
    }

    /// Starts logging `task`: issues a session token and begins the
    /// heartbeat, with the first tick fired immediately.
    ///
    /// Fails with [`EngineError::AlreadyLogging`] (and writes nothing) when
    /// the task already has an active session.
    pub fn start(&self, task: &str) -> Result<(), EngineError> {
        let mut sessions = self.inner.lock_sessions();
        if sessions.contains_key(task) {
            return Err(EngineError::AlreadyLogging(task.to_owned()));
        }

        let session_token = Uuid::new_v4().simple().to_string();
        let log_id = self.inner.log_id(&session_token);
        tracing::debug!(task, %log_id, "logging started");
        let heartbeat = tokio::spawn(run_heartbeat(
            Arc::clone(&self.inner),
            task.to_owned(),
            log_id.clone(),
        ));
        sessions.insert(task.to_owned(), ActiveSession { log_id, heartbeat });
        Ok(())
    }

    /// Stops logging `task`, cancelling the heartbeat.
    ///
    /// No final write is forced: `finish` reflects the last heartbeat, which
    /// may lag the stop by up to one period. A tick whose write already
    /// reached the store still lands (and may still notify) after this
    /// returns.
    pub fn stop(&self, task: &str) -> Result<(), EngineError> {
        let mut sessions = self.inner.lock_sessions();
        let Some(session) = sessions.remove(task) else {
            return Err(EngineError::NotLogging(task.to_owned()));
        };
        session.heartbeat.abort();
        tracing::debug!(task, log_id = %session.log_id, "logging stopped");
        Ok(())
    }

    /// Every log record, across all tasks.
    pub async fn time_log(&self) -> Result<Vec<LogRecord>, EngineError> {
        let conn = self.inner.store.connect().await?;
        let records = conn.get_all(TIME_LOGS).await?;
        conn.close().await?;
        Ok(records)
    }

    /// All records for one task, via the task-name index.
    pub async fn task_log(&self, task: &str) -> Result<Vec<LogRecord>, EngineError> {
        let conn = self.inner.store.connect().await?;
        let records = conn
            .get_all_by_index(TIME_LOGS, TASK_NAME_INDEX, task)
            .await?;
        conn.close().await?;
        Ok(records)
    }

    /// The task's most recently started session, or `None` when the task has
    /// never been logged.
    pub async fn last_log(&self, task: &str) -> Result<Option<LogRecord>, EngineError> {
        let records = self.task_log(task).await?;
        Ok(records.into_iter().max_by_key(|record| record.start))
    }

    /// Time logged for `task` within this engine's day.
    ///
    /// A session that began before the day contributes only its portion past
    /// the start-of-day boundary. The day is fixed at construction: totals
    /// computed after the process crosses midnight still refer to the day
    /// the engine started on.
    pub async fn daily_total(&self, task: &str) -> Result<chrono::Duration, EngineError> {
        let day = self.inner.day;
        let records = self.task_log(task).await?;
        let total_ms: i64 = records
            .iter()
            .map(|record| day.contribution_ms(record))
            .sum();
        Ok(chrono::Duration::milliseconds(total_ms))
    }
}

async fn run_heartbeat(inner: Arc<Inner>, task: String, log_id: String) {
    let mut interval = tokio::time::interval(inner.heartbeat_period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(error) = heartbeat_tick(&inner, &task, &log_id).await {
            // Dropped on the floor; the next tick attempts independently.
            tracing::warn!(%task, %log_id, %error, "heartbeat write failed");
        }
    }
}

/// One heartbeat: read-or-create the session's record, advance `finish`,
/// publish the result.
///
/// Opens and closes its own store connection, so a transient failure in one
/// tick cannot leak into later ticks.
async fn heartbeat_tick(inner: &Inner, task: &str, log_id: &str) -> Result<(), EngineError> {
    let now = Utc::now().timestamp_millis();
    let conn = inner.store.connect().await?;
    let record = match conn.get::<LogRecord>(TIME_LOGS, log_id).await? {
        None => {
            let record = LogRecord {
                log_id: log_id.to_owned(),
                task_name: task.to_owned(),
                start: now,
                finish: now,
            };
            conn.create(TIME_LOGS, &record).await?;
            record
        }
        Some(mut record) => {
            record.finish = now;
            conn.update(TIME_LOGS, &record).await?;
            record
        }
    };
    conn.close().await?;
    let _ = inner.updates.send(record);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::time::timeout;

    use crate::schema;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    fn test_store(dir: &tempfile::TempDir) -> Store {
        Store::new(dir.path().join("worklog.db"), schema::schema())
    }

    fn test_engine(store: Store) -> LogEngine {
        LogEngine::with_options(
            store,
            "proc0001",
            Duration::from_millis(20),
            DayBounds::today(),
        )
    }

    #[tokio::test]
    async fn start_and_stop_toggle_is_logging() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = test_engine(test_store(&dir));

        assert!(!engine.is_logging("deep-work"));
        engine.start("deep-work").expect("start");
        assert!(engine.is_logging("deep-work"));
        engine.stop("deep-work").expect("stop");
        assert!(!engine.is_logging("deep-work"));
    }

    #[tokio::test]
    async fn double_start_fails_without_store_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A long heartbeat period means only the immediate first tick fires
        // during the test.
        let engine = LogEngine::with_options(
            test_store(&dir),
            "proc0001",
            Duration::from_secs(600),
            DayBounds::today(),
        );
        let mut updates = engine.subscribe();

        engine.start("deep-work").expect("first start");
        let error = engine.start("deep-work").expect_err("second start");
        assert!(matches!(error, EngineError::AlreadyLogging(ref task) if task == "deep-work"));
        assert!(engine.is_logging("deep-work"));

        // The failed start wrote nothing: the only record belongs to the
        // first session's immediate tick.
        timeout(RECV_TIMEOUT, updates.recv())
            .await
            .expect("first tick in time")
            .expect("channel open");
        let records = engine.task_log("deep-work").await.expect("task_log");
        assert_eq!(records.len(), 1);
        engine.stop("deep-work").expect("stop");
    }

    #[tokio::test]
    async fn stop_when_idle_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = test_engine(test_store(&dir));

        let error = engine.stop("deep-work").expect_err("stop while idle");
        assert!(matches!(error, EngineError::NotLogging(ref task) if task == "deep-work"));
    }

    #[tokio::test]
    async fn repeated_ticks_upsert_a_single_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = test_engine(test_store(&dir));

        heartbeat_tick(&engine.inner, "deep-work", "proc0001sessA")
            .await
            .expect("first tick");
        let first = engine
            .last_log("deep-work")
            .await
            .expect("last_log")
            .expect("record exists");

        heartbeat_tick(&engine.inner, "deep-work", "proc0001sessA")
            .await
            .expect("second tick");
        let records = engine.task_log("deep-work").await.expect("task_log");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].log_id, "proc0001sessA");
        assert_eq!(records[0].start, first.start);
        assert!(records[0].finish >= first.finish);
    }

    #[tokio::test]
    async fn heartbeat_publishes_each_write() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = test_engine(test_store(&dir));
        let mut updates = engine.subscribe();

        engine.start("deep-work").expect("start");
        let first = timeout(RECV_TIMEOUT, updates.recv())
            .await
            .expect("first update in time")
            .expect("channel open");
        let second = timeout(RECV_TIMEOUT, updates.recv())
            .await
            .expect("second update in time")
            .expect("channel open");
        engine.stop("deep-work").expect("stop");

        assert_eq!(first.task_name, "deep-work");
        assert_eq!(first.log_id, second.log_id);
        assert_eq!(first.start, second.start);
        assert!(second.finish >= first.finish);
    }

    #[tokio::test]
    async fn concurrent_sessions_keep_disjoint_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = test_engine(test_store(&dir));
        let mut updates = engine.subscribe();

        engine.start("writing").expect("start writing");
        engine.start("reading").expect("start reading");

        // Wait until both sessions have produced at least one write.
        let mut seen_writing = false;
        let mut seen_reading = false;
        while !(seen_writing && seen_reading) {
            let record = timeout(RECV_TIMEOUT, updates.recv())
                .await
                .expect("update in time")
                .expect("channel open");
            match record.task_name.as_str() {
                "writing" => seen_writing = true,
                "reading" => seen_reading = true,
                other => panic!("unexpected task {other:?}"),
            }
        }
        engine.stop("writing").expect("stop writing");
        engine.stop("reading").expect("stop reading");

        let writing = engine.task_log("writing").await.expect("task_log");
        let reading = engine.task_log("reading").await.expect("task_log");
        assert_eq!(writing.len(), 1);
        assert_eq!(reading.len(), 1);
        assert_ne!(writing[0].log_id, reading[0].log_id);
    }

    #[tokio::test]
    async fn restarting_a_task_opens_a_new_session_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = test_engine(test_store(&dir));
        let mut updates = engine.subscribe();

        engine.start("deep-work").expect("first session");
        let first = timeout(RECV_TIMEOUT, updates.recv())
            .await
            .expect("update in time")
            .expect("channel open");
        engine.stop("deep-work").expect("stop");

        engine.start("deep-work").expect("second session");
        let second = loop {
            let record = timeout(RECV_TIMEOUT, updates.recv())
                .await
                .expect("update in time")
                .expect("channel open");
            // A final tick from the first session may still drain through.
            if record.log_id != first.log_id {
                break record;
            }
        };
        engine.stop("deep-work").expect("stop again");

        assert_ne!(first.log_id, second.log_id);
        let records = engine.task_log("deep-work").await.expect("task_log");
        assert!(records.len() >= 2);
    }

    #[tokio::test]
    async fn last_log_returns_latest_started_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(&dir);
        let engine = test_engine(store.clone());

        let conn = store.connect().await.expect("connect");
        for (suffix, start) in [("a", 10), ("b", 30), ("c", 20)] {
            conn.create(
                TIME_LOGS,
                &LogRecord {
                    log_id: format!("proc0001sess-{suffix}"),
                    task_name: "deep-work".to_string(),
                    start,
                    finish: start + 5,
                },
            )
            .await
            .expect("seed record");
        }
        conn.close().await.expect("close");

        let last = engine
            .last_log("deep-work")
            .await
            .expect("last_log")
            .expect("record exists");
        assert_eq!(last.start, 30);

        let none = engine.last_log("untouched").await.expect("last_log");
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn daily_total_clips_sessions_started_before_the_day() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(&dir);
        let day = DayBounds::starting_at(1_000_000_000);
        let engine =
            LogEngine::with_options(store.clone(), "proc0001", HEARTBEAT_PERIOD, day);

        // Started an hour before the day, ran 30 minutes into it.
        let conn = store.connect().await.expect("connect");
        conn.create(
            TIME_LOGS,
            &LogRecord {
                log_id: "proc0001sess-a".to_string(),
                task_name: "deep-work".to_string(),
                start: day.start_ms() - 3_600_000,
                finish: day.start_ms() + 1_800_000,
            },
        )
        .await
        .expect("seed record");
        conn.close().await.expect("close");

        let total = engine.daily_total("deep-work").await.expect("daily_total");
        assert_eq!(total.num_milliseconds(), 1_800_000);
    }

    #[tokio::test]
    async fn daily_total_sums_sessions_inside_the_day() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = test_store(&dir);
        let day = DayBounds::starting_at(1_000_000_000);
        let engine =
            LogEngine::with_options(store.clone(), "proc0001", HEARTBEAT_PERIOD, day);

        let conn = store.connect().await.expect("connect");
        for (suffix, offset, length) in [("a", 0, 600_000), ("b", 7_200_000, 1_200_000)] {
            conn.create(
                TIME_LOGS,
                &LogRecord {
                    log_id: format!("proc0001sess-{suffix}"),
                    task_name: "deep-work".to_string(),
                    start: day.start_ms() + offset,
                    finish: day.start_ms() + offset + length,
                },
            )
            .await
            .expect("seed record");
        }
        // A session that ended before the day contributes nothing.
        conn.create(
            TIME_LOGS,
            &LogRecord {
                log_id: "proc0001sess-old".to_string(),
                task_name: "deep-work".to_string(),
                start: day.start_ms() - 7_200_000,
                finish: day.start_ms() - 3_600_000,
            },
        )
        .await
        .expect("seed record");
        conn.close().await.expect("close");

        let total = engine.daily_total("deep-work").await.expect("daily_total");
        assert_eq!(total.num_milliseconds(), 1_800_000);
    }

    #[test]
    fn day_bounds_cover_a_full_day() {
        let day = DayBounds::starting_at(0);
        assert_eq!(day.start_ms(), 0);
        assert_eq!(day.end_ms(), 86_399_999);

        let today = DayBounds::today();
        assert_eq!(today.end_ms() - today.start_ms(), 86_399_999);
    }
}
