/// Core Module for lazydb
///
/// Shared infrastructure: the error type, argument and row values, and the
/// database layer built on top of them.

pub mod db;
pub mod error;
pub mod value;

// Re-export commonly used types for convenience
pub use error::{LazydbError, Result};
pub use value::{Args, BindKind, Bound, BoundArg, Key, Row, Value};
