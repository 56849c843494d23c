//! Storage layer for worklog.
//!
//! Provides a small transactional key/value store over named tables, backed
//! by `rusqlite`. Tables are declared up front by a migration function (see
//! [`Schema::build`]); records are JSON objects whose primary key and
//! secondary-index values are extracted by field name.
//!
//! # Thread Safety
//!
//! `rusqlite::Connection` is `Send` but not `Sync`, so every [`Connection`]
//! handle owns a dedicated worker thread holding the SQLite connection.
//! Callers enqueue operations and await a `oneshot` reply. Operations on one
//! handle complete in FIFO order; no ordering holds across handles. Because
//! the worker drains its queue before exiting, an operation already enqueued
//! still reaches the medium even if the awaiting task goes away.
//!
//! # Schema
//!
//! Each declared table maps to one SQLite table with a `key` column (TEXT
//! primary key), a `record` column (the JSON document), and one column per
//! secondary index, kept in sync on every write. The schema version is
//! recorded in `PRAGMA user_version`; the migration DDL runs when the file is
//! new or was last opened at a lower version.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use rusqlite::{OptionalExtension, params_from_iter, types::Value as SqlValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;

/// How long a connection waits on a locked database file before giving up.
///
/// Concurrent handles (one per heartbeat tick) share a single file, so brief
/// write-lock contention is expected.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing medium could not be opened or rejected an operation.
    #[error("store unavailable: {0}")]
    Unavailable(#[from] rusqlite::Error),
    /// The handle's worker is not running (closed, or it never started).
    #[error("store unavailable: connection is closed")]
    Closed,
    /// `create` hit an existing primary key.
    #[error("duplicate key {key:?} in table {table:?}")]
    DuplicateKey { table: String, key: String },
    /// The table was never declared in the schema.
    #[error("unknown table {0:?}")]
    UnknownTable(String),
    /// The index was never declared on the table.
    #[error("unknown index {index:?} on table {table:?}")]
    UnknownIndex { table: String, index: String },
    /// The record is not a JSON object with a string value at the key path.
    #[error("invalid record for table {table:?}: {reason}")]
    InvalidRecord { table: String, reason: String },
    /// A record failed to serialize or deserialize.
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A table declaration: name, primary-key field, and secondary indexes.
#[derive(Debug, Clone)]
pub struct TableDef {
    name: String,
    key_path: String,
    indexes: Vec<String>,
}

impl TableDef {
    /// Declares a secondary index on `field`.
    pub fn index(&mut self, field: &str) -> &mut Self {
        assert!(
            is_identifier(field),
            "index field {field:?} must be alphanumeric"
        );
        self.indexes.push(field.to_owned());
        self
    }

    /// Extracts the primary key from a record.
    fn key_of(&self, record: &Value) -> Result<String, StoreError> {
        record
            .get(&self.key_path)
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .ok_or_else(|| StoreError::InvalidRecord {
                table: self.name.clone(),
                reason: format!("missing string field {:?}", self.key_path),
            })
    }

    /// Extracts the value stored in an index column, if any.
    fn index_value(record: &Value, field: &str) -> SqlValue {
        match record.get(field) {
            Some(Value::String(text)) => SqlValue::Text(text.clone()),
            Some(Value::Number(number)) => SqlValue::Text(number.to_string()),
            _ => SqlValue::Null,
        }
    }

    fn create_ddl(&self) -> String {
        let mut columns = String::from("key TEXT PRIMARY KEY, record TEXT NOT NULL");
        for index in &self.indexes {
            columns.push_str(&format!(", \"{index}\" TEXT"));
        }
        let mut ddl = format!("CREATE TABLE IF NOT EXISTS \"{}\" ({columns});\n", self.name);
        for index in &self.indexes {
            ddl.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS \"idx_{table}_{index}\" ON \"{table}\"(\"{index}\");\n",
                table = self.name,
            ));
        }
        ddl
    }

    fn insert_sql(&self, upsert: bool) -> String {
        let mut columns = String::from("key, record");
        let mut placeholders = String::from("?1, ?2");
        for (position, index) in self.indexes.iter().enumerate() {
            columns.push_str(&format!(", \"{index}\""));
            placeholders.push_str(&format!(", ?{}", position + 3));
        }
        let mut sql = format!(
            "INSERT INTO \"{}\" ({columns}) VALUES ({placeholders})",
            self.name
        );
        if upsert {
            sql.push_str(" ON CONFLICT(key) DO UPDATE SET record = excluded.record");
            for index in &self.indexes {
                sql.push_str(&format!(", \"{index}\" = excluded.\"{index}\""));
            }
        }
        sql
    }

    fn write_params(&self, key: String, record: &Value) -> Vec<SqlValue> {
        let mut params = vec![SqlValue::Text(key), SqlValue::Text(record.to_string())];
        for index in &self.indexes {
            params.push(Self::index_value(record, index));
        }
        params
    }
}

/// Collects table declarations while a migration function runs.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    tables: Vec<TableDef>,
}

impl SchemaBuilder {
    /// Declares a table with the given name and primary-key field.
    ///
    /// # Panics
    ///
    /// Panics if `name` is not a plain alphanumeric identifier or was already
    /// declared. Schema construction is static configuration; both are
    /// programmer errors.
    pub fn create_table(&mut self, name: &str, key_path: &str) -> &mut TableDef {
        assert!(
            is_identifier(name),
            "table name {name:?} must be alphanumeric"
        );
        assert!(
            self.tables.iter().all(|table| table.name != name),
            "table {name:?} declared twice"
        );
        self.tables.push(TableDef {
            name: name.to_owned(),
            key_path: key_path.to_owned(),
            indexes: Vec::new(),
        });
        self.tables
            .last_mut()
            .expect("table was just pushed")
    }
}

/// A versioned set of table declarations.
#[derive(Debug, Clone)]
pub struct Schema {
    version: u32,
    tables: Vec<TableDef>,
}

impl Schema {
    /// Builds a schema by running `migration` against a [`SchemaBuilder`].
    ///
    /// The migration function runs once here to describe the tables; its DDL
    /// is applied to the backing file only when the file is new or its
    /// recorded version is below `version`.
    pub fn build(version: u32, migration: impl FnOnce(&mut SchemaBuilder)) -> Self {
        let mut builder = SchemaBuilder::default();
        migration(&mut builder);
        Self {
            version,
            tables: builder.tables,
        }
    }

    /// The schema version recorded in the backing file after migration.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    fn table(&self, name: &str) -> Result<&TableDef, StoreError> {
        self.tables
            .iter()
            .find(|table| table.name == name)
            .ok_or_else(|| StoreError::UnknownTable(name.to_owned()))
    }
}

/// Identifiers end up quoted inside SQL, so keep them boring.
fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || character == '_')
}

/// Describes a store on disk. Cheap to clone; no I/O until [`Store::connect`].
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    schema: Arc<Schema>,
}

impl Store {
    /// Describes a store at `path` with the given schema.
    pub fn new(path: impl Into<PathBuf>, schema: Schema) -> Self {
        Self {
            path: path.into(),
            schema: Arc::new(schema),
        }
    }

    /// The backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a connection, applying the schema migration if needed.
    pub async fn connect(&self) -> Result<Connection, StoreError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (command_tx, command_rx) = mpsc::channel();
        let path = self.path.clone();
        let schema = Arc::clone(&self.schema);

        std::thread::Builder::new()
            .name("worklog-store".to_owned())
            .spawn(move || {
                let conn = match open_connection(&path, &schema) {
                    Ok(conn) => conn,
                    Err(error) => {
                        let _ = ready_tx.send(Err(error));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }
                run_worker(conn, &schema, &command_rx);
            })
            .map_err(|_| StoreError::Closed)?;

        ready_rx.await.map_err(|_| StoreError::Closed)??;
        Ok(Connection {
            commands: command_tx,
        })
    }
}

/// An open handle to the store.
///
/// Handles are single-owner: hold one per unit of work and [`close`] it when
/// done. Dropping a handle closes it best-effort.
///
/// [`close`]: Connection::close
#[derive(Debug)]
pub struct Connection {
    commands: mpsc::Sender<Command>,
}

impl Connection {
    /// Point lookup by primary key. Absence is `None`, not an error.
    pub async fn get<T: DeserializeOwned>(
        &self,
        table: &str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let record = self
            .request(|reply| Command::Get {
                table: table.to_owned(),
                key: key.to_owned(),
                reply,
            })
            .await?;
        record
            .map(serde_json::from_value)
            .transpose()
            .map_err(StoreError::from)
    }

    /// Full-table scan in backing-medium insertion order.
    pub async fn get_all<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>, StoreError> {
        self.scan(table, None).await
    }

    /// Scan restricted to records whose `index` value equals `value`.
    pub async fn get_all_by_index<T: DeserializeOwned>(
        &self,
        table: &str,
        index: &str,
        value: &str,
    ) -> Result<Vec<T>, StoreError> {
        self.scan(table, Some((index.to_owned(), value.to_owned())))
            .await
    }

    /// Inserts a new record; fails with [`StoreError::DuplicateKey`] if the
    /// primary key already exists.
    pub async fn create<T: Serialize>(&self, table: &str, record: &T) -> Result<(), StoreError> {
        let record = serde_json::to_value(record)?;
        self.request(|reply| Command::Create {
            table: table.to_owned(),
            record,
            reply,
        })
        .await
    }

    /// Upserts by primary key: create-or-replace, never fails on an existing
    /// key.
    pub async fn update<T: Serialize>(&self, table: &str, record: &T) -> Result<(), StoreError> {
        let record = serde_json::to_value(record)?;
        self.request(|reply| Command::Update {
            table: table.to_owned(),
            record,
            reply,
        })
        .await
    }

    /// Removes by primary key; succeeds even if the key did not exist.
    pub async fn delete(&self, table: &str, key: &str) -> Result<(), StoreError> {
        self.request(|reply| Command::Delete {
            table: table.to_owned(),
            key: key.to_owned(),
            reply,
        })
        .await
    }

    /// Closes the handle, waiting for queued operations to drain.
    pub async fn close(self) -> Result<(), StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Close { reply: reply_tx })
            .map_err(|_| StoreError::Closed)?;
        reply_rx.await.map_err(|_| StoreError::Closed)?
    }

    async fn scan<T: DeserializeOwned>(
        &self,
        table: &str,
        index: Option<(String, String)>,
    ) -> Result<Vec<T>, StoreError> {
        let records = self
            .request(|reply| Command::GetAll {
                table: table.to_owned(),
                index,
                reply,
            })
            .await?;
        records
            .into_iter()
            .map(|record| serde_json::from_value(record).map_err(StoreError::from))
            .collect()
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .map_err(|_| StoreError::Closed)?;
        reply_rx.await.map_err(|_| StoreError::Closed)?
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let (reply, _) = oneshot::channel();
        let _ = self.commands.send(Command::Close { reply });
    }
}

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

enum Command {
    Get {
        table: String,
        key: String,
        reply: Reply<Option<Value>>,
    },
    GetAll {
        table: String,
        index: Option<(String, String)>,
        reply: Reply<Vec<Value>>,
    },
    Create {
        table: String,
        record: Value,
        reply: Reply<()>,
    },
    Update {
        table: String,
        record: Value,
        reply: Reply<()>,
    },
    Delete {
        table: String,
        key: String,
        reply: Reply<()>,
    },
    Close {
        reply: Reply<()>,
    },
}

fn open_connection(path: &Path, schema: &Schema) -> Result<rusqlite::Connection, StoreError> {
    let conn = rusqlite::Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version < i64::from(schema.version()) {
        tracing::debug!(from = version, to = schema.version(), "applying store migration");
        for table in &schema.tables {
            conn.execute_batch(&table.create_ddl())?;
        }
        conn.pragma_update(None, "user_version", schema.version())?;
    }
    Ok(conn)
}

fn run_worker(conn: rusqlite::Connection, schema: &Schema, commands: &mpsc::Receiver<Command>) {
    while let Ok(command) = commands.recv() {
        match command {
            Command::Get { table, key, reply } => {
                let _ = reply.send(exec_get(&conn, schema, &table, &key));
            }
            Command::GetAll {
                table,
                index,
                reply,
            } => {
                let _ = reply.send(exec_get_all(&conn, schema, &table, index.as_ref()));
            }
            Command::Create {
                table,
                record,
                reply,
            } => {
                let _ = reply.send(exec_write(&conn, schema, &table, &record, false));
            }
            Command::Update {
                table,
                record,
                reply,
            } => {
                let _ = reply.send(exec_write(&conn, schema, &table, &record, true));
            }
            Command::Delete { table, key, reply } => {
                let _ = reply.send(exec_delete(&conn, schema, &table, &key));
            }
            Command::Close { reply } => {
                let result = conn
                    .close()
                    .map_err(|(_, error)| StoreError::Unavailable(error));
                let _ = reply.send(result);
                return;
            }
        }
    }
    // Handle dropped without an explicit close.
    if let Err((_, error)) = conn.close() {
        tracing::warn!(%error, "store connection close failed");
    }
}

fn exec_get(
    conn: &rusqlite::Connection,
    schema: &Schema,
    table: &str,
    key: &str,
) -> Result<Option<Value>, StoreError> {
    let table = schema.table(table)?;
    let sql = format!("SELECT record FROM \"{}\" WHERE key = ?1", table.name);
    let record: Option<String> = conn
        .query_row(&sql, [key], |row| row.get(0))
        .optional()?;
    record
        .map(|text| serde_json::from_str(&text))
        .transpose()
        .map_err(StoreError::from)
}

fn exec_get_all(
    conn: &rusqlite::Connection,
    schema: &Schema,
    table: &str,
    index: Option<&(String, String)>,
) -> Result<Vec<Value>, StoreError> {
    let table = schema.table(table)?;
    let (sql, filter) = match index {
        None => (
            format!("SELECT record FROM \"{}\" ORDER BY rowid ASC", table.name),
            None,
        ),
        Some((index, value)) => {
            if !table.indexes.iter().any(|candidate| candidate == index) {
                return Err(StoreError::UnknownIndex {
                    table: table.name.clone(),
                    index: index.clone(),
                });
            }
            (
                format!(
                    "SELECT record FROM \"{table}\" WHERE \"{index}\" = ?1 ORDER BY rowid ASC",
                    table = table.name,
                ),
                Some(value.clone()),
            )
        }
    };

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(filter), |row| row.get::<_, String>(0))?;
    let mut records = Vec::new();
    for row in rows {
        records.push(serde_json::from_str(&row?)?);
    }
    Ok(records)
}

fn exec_write(
    conn: &rusqlite::Connection,
    schema: &Schema,
    table: &str,
    record: &Value,
    upsert: bool,
) -> Result<(), StoreError> {
    let table = schema.table(table)?;
    let key = table.key_of(record)?;
    let sql = table.insert_sql(upsert);
    let params = table.write_params(key.clone(), record);
    match conn.execute(&sql, params_from_iter(params)) {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(error, _))
            if !upsert && error.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(StoreError::DuplicateKey {
                table: table.name.clone(),
                key,
            })
        }
        Err(error) => Err(error.into()),
    }
}

fn exec_delete(
    conn: &rusqlite::Connection,
    schema: &Schema,
    table: &str,
    key: &str,
) -> Result<(), StoreError> {
    let table = schema.table(table)?;
    let sql = format!("DELETE FROM \"{}\" WHERE key = ?1", table.name);
    conn.execute(&sql, [key])?;
    Ok(())
}
