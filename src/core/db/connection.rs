/// Connection Management Module
///
/// This module defines the capabilities the core consumes from a database
/// driver and the lazy-connecting connector contract shared by the SQLite and
/// PostgreSQL connectors.

use crate::core::db::shape::FetchStyle;
use crate::core::value::{Args, BoundArg, Row, Value};
use crate::core::Result;
use serde::Deserialize;
use std::collections::VecDeque;

/// Arguments handed to [`Driver::execute`]
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    /// Run the SQL as-is
    None,
    /// No placeholder detected: the raw argument list goes to the driver untouched
    Raw(Args),
    /// Placeholders detected: every argument was classified and is bound explicitly
    Bound(Vec<BoundArg>),
}

/// An executed statement.
///
/// Rows are buffered when the statement runs; `fetch_next` and `fetch_rest`
/// walk them in order. For statements that return no columns,
/// `row_count` holds the number of rows the statement changed.
#[derive(Debug, Clone, Default)]
pub struct Cursor {
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
    row_count: u64,
}

impl Cursor {
    /// Cursor over a result set
    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let row_count = rows.len() as u64;
        Cursor {
            columns,
            rows: rows.into(),
            row_count,
        }
    }

    /// Cursor for a statement that changed `affected` rows and returned none
    pub fn affected(affected: u64) -> Self {
        Cursor {
            columns: Vec::new(),
            rows: VecDeque::new(),
            row_count: affected,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Affected rows for mutating statements, returned rows otherwise
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Next row as positional values
    pub fn fetch_next(&mut self) -> Option<Vec<Value>> {
        self.rows.pop_front()
    }

    /// Next row keyed by column name
    pub fn fetch_next_row(&mut self) -> Option<Row> {
        let values = self.rows.pop_front()?;
        Some(self.columns.iter().cloned().zip(values).collect())
    }

    /// Every remaining row as positional values
    pub fn fetch_rest(&mut self) -> Vec<Vec<Value>> {
        self.rows.drain(..).collect()
    }
}

/// A live connection to a database engine.
pub trait Driver {
    /// Prepares `sql`, attaches `params` and runs it.
    fn execute(&mut self, sql: &str, params: &Params) -> Result<Cursor>;

    fn begin_transaction(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Identifier generated by the most recent insert on this connection
    fn last_insert_id(&mut self) -> Result<String>;
}

/// Holds a connection configuration and opens its driver handle on first use.
pub trait Connector {
    type Handle: Driver;

    /// Opens the connection unless one is already held.
    fn connect(&mut self) -> Result<()>;

    /// Drops the connection, if any. The next [`Connector::handle`] call reconnects.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Live handle, connecting first when needed
    fn handle(&mut self) -> Result<&mut Self::Handle>;

    fn options(&self) -> &ConnectorOptions;
}

/// Options shared by both connectors
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConnectorOptions {
    /// Style used by `fetch` and `fetch_all` when none is given
    pub fetch_style: FetchStyle,
    /// Bind loosely-empty arguments (0, "", "0", false) as NULL
    pub empty_as_null: bool,
    /// SQLite busy timeout in milliseconds
    pub busy_timeout_ms: Option<u64>,
    /// PostgreSQL connect timeout in seconds
    pub connect_timeout_secs: Option<u64>,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        ConnectorOptions {
            fetch_style: FetchStyle::Assoc,
            empty_as_null: true,
            busy_timeout_ms: None,
            connect_timeout_secs: None,
        }
    }
}
