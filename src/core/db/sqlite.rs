/// SQLite Connector
///
/// Single-file connector backed by rusqlite. The connection is opened on
/// first use and bound parameters are attached one by one to the prepared
/// statement before it runs.

use crate::core::db::connection::{Connector, ConnectorOptions, Cursor, Driver, Params};
use crate::core::value::{Args, Bound, BoundArg, Key, Value};
use crate::core::{LazydbError, Result};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, Statement, ToSql};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};

/// SQLite connection configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SqliteConfig {
    /// Database file, or ":memory:"
    pub path: String,
    #[serde(default)]
    pub options: ConnectorOptions,
}

impl SqliteConfig {
    pub fn new(path: impl Into<String>) -> Self {
        SqliteConfig {
            path: path.into(),
            options: ConnectorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ConnectorOptions) -> Self {
        self.options = options;
        self
    }

    /// Path with a leading `~/` expanded to the home directory
    pub fn resolved_path(&self) -> PathBuf {
        match self.path.strip_prefix("~/") {
            Some(rest) => match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => PathBuf::from(&self.path),
            },
            None => PathBuf::from(&self.path),
        }
    }
}

/// Live SQLite connection
#[derive(Debug)]
pub struct SqliteHandle {
    conn: Connection,
}

impl SqliteHandle {
    fn open(path: &Path, options: &ConnectorOptions) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            LazydbError::Connection(format!(
                "Failed to open SQLite database {}: {}",
                path.display(),
                e
            ))
        })?;

        if let Some(ms) = options.busy_timeout_ms {
            conn.busy_timeout(Duration::from_millis(ms))
                .map_err(|e| LazydbError::Connection(format!("Failed to set busy timeout: {}", e)))?;
        }

        Ok(SqliteHandle { conn })
    }

    /// The underlying rusqlite connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Driver for SqliteHandle {
    fn execute(&mut self, sql: &str, params: &Params) -> Result<Cursor> {
        let mut stmt = self.conn.prepare(sql)?;

        match params {
            Params::None => {}
            Params::Raw(args) => bind_raw(&mut stmt, args)?,
            Params::Bound(bound) => bind_values(&mut stmt, bound)?,
        }

        if stmt.column_count() == 0 {
            let affected = stmt.raw_execute()?;
            return Ok(Cursor::affected(affected as u64));
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let column_count = columns.len();
        let mut rows = stmt.raw_query();
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(column_count);
            for i in 0..column_count {
                record.push(value_from_ref(row.get_ref(i)?));
            }
            values.push(record);
        }

        Ok(Cursor::with_rows(columns, values))
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn last_insert_id(&mut self) -> Result<String> {
        Ok(self.conn.last_insert_rowid().to_string())
    }
}

/// One-based parameter index for a key
fn parameter_index(stmt: &Statement<'_>, key: &Key) -> Result<usize> {
    match key {
        Key::Positional(i) => Ok(i + 1),
        Key::Named(name) => {
            let marker = format!(":{}", name);
            stmt.parameter_index(&marker)?
                .ok_or_else(|| LazydbError::Sqlite(rusqlite::Error::InvalidParameterName(marker)))
        }
    }
}

fn bind_values(stmt: &mut Statement<'_>, bound: &[BoundArg]) -> Result<()> {
    for arg in bound {
        let index = parameter_index(stmt, &arg.key)?;
        trace!(index, kind = ?arg.value.kind(), "binding value");
        stmt.raw_bind_parameter(index, &arg.value)?;
    }
    Ok(())
}

fn bind_raw(stmt: &mut Statement<'_>, args: &Args) -> Result<()> {
    for (key, value) in args.iter() {
        let index = parameter_index(stmt, key)?;
        stmt.raw_bind_parameter(index, value)?;
    }
    Ok(())
}

impl ToSql for Bound {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Bound::Null => Ok(ToSqlOutput::from(rusqlite::types::Null)),
            Bound::Integer(i) => Ok(ToSqlOutput::from(*i)),
            Bound::Boolean(b) => Ok(ToSqlOutput::from(*b)),
            Bound::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            Value::Null => Ok(ToSqlOutput::from(rusqlite::types::Null)),
            Value::Bool(b) => Ok(ToSqlOutput::from(*b)),
            Value::Int(i) => Ok(ToSqlOutput::from(*i)),
            Value::Float(f) => Ok(ToSqlOutput::from(*f)),
            Value::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
            Value::List(_) => Err(rusqlite::Error::ToSqlConversionFailure(
                format!("cannot pass a {} to SQLite", self.type_name()).into(),
            )),
        }
    }
}

/// Converts a SQLite cell into a [`Value`]. Blobs come back as lossy text.
fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
    }
}

/// Lazily-connecting SQLite connector
#[derive(Debug)]
pub struct SqliteConnector {
    config: SqliteConfig,
    handle: Option<SqliteHandle>,
}

impl SqliteConnector {
    pub fn new(config: SqliteConfig) -> Self {
        SqliteConnector {
            config,
            handle: None,
        }
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }
}

impl Connector for SqliteConnector {
    type Handle = SqliteHandle;

    fn connect(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let path = self.config.resolved_path();
        debug!("Opening SQLite database at {:?}", path);
        self.handle = Some(SqliteHandle::open(&path, &self.config.options)?);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.handle.take().is_some() {
            debug!("Closed SQLite database {}", self.config.path);
        }
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    fn handle(&mut self) -> Result<&mut SqliteHandle> {
        self.connect()?;
        self.handle
            .as_mut()
            .ok_or_else(|| LazydbError::Connection("SQLite handle unavailable".to_string()))
    }

    fn options(&self) -> &ConnectorOptions {
        &self.config.options
    }
}
