//! Core domain logic for worklog.
//!
//! This crate contains the engine and types for:
//! - Log engine: the per-task timer state machine and its heartbeat writes
//! - Records: persisted log/task records and the application store schema
//! - Boundary: the request/response verbs front-ends speak

pub mod engine;
pub mod record;
pub mod rpc;
pub mod schema;
pub mod token;

pub use engine::{DayBounds, EngineError, HEARTBEAT_PERIOD, LogEngine};
pub use record::{LogRecord, Task};
pub use rpc::{Notification, Request, RequestHandler};
