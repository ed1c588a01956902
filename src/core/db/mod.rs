/// Database Module
///
/// The connectors, the query executor and the result shaper.
///
/// ## Architecture
///
/// - **Connection Management** (`connection.rs`): driver and connector traits, cursor, options
/// - **Connectors** (`sqlite.rs`, `postgres.rs`): lazily opened driver handles
/// - **Query Execution** (`query.rs`): placeholder detection, argument classification and binding
/// - **Result Shaping** (`shape.rs`): fetch styles, grouping and object hydration
///
/// ## Error Handling
///
/// All operations return the crate-wide `LazydbError`; driver errors pass through unchanged.
pub mod connection;
pub mod postgres;
pub mod query;
pub mod shape;
pub mod sqlite;

pub use connection::*;
pub use self::postgres::{PostgresConfig, PostgresConnector, PostgresHandle};
pub use query::*;
pub use shape::*;
pub use self::sqlite::{SqliteConfig, SqliteConnector, SqliteHandle};
