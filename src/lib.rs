// Core infrastructure modules
pub mod core;

// Public surface
pub mod config;
pub mod db;

#[cfg(test)]
mod test_utils;

pub use crate::core::db::{
    Connector, ConnectorOptions, Cursor, Driver, FetchStyle, GroupBy, Grouped, Hydrator,
    PostgresConfig, PostgresConnector, Record, SqliteConfig, SqliteConnector,
};
pub use crate::core::{Args, BindKind, Bound, Key, LazydbError, Result, Row, Value};
pub use db::Database;
