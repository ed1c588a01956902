/// Lazydb Error Module
///
/// This module defines the error taxonomy shared by the connectors, the
/// query executor and the result shaper. Driver errors are carried through
/// unchanged so callers can match on the underlying library's error.
use thiserror::Error;

/// Error type for every fallible lazydb operation.
///
/// - Connection establishment (bad path, unreachable host, rejected credentials)
/// - Argument binding (values that have no scalar storage type)
/// - Object hydration (missing target type, constructor failures)
/// - Driver failures during prepare, execute or fetch
/// - Configuration loading
#[derive(Error, Debug)]
pub enum LazydbError {
    /// The underlying driver refused to open a connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// An argument value cannot be bound as NULL, INTEGER, BOOLEAN or STRING
    #[error("Bind error: argument '{key}' has unsupported type {type_name}")]
    BindType { key: String, type_name: &'static str },

    /// Object hydration was requested without a usable target
    #[error("Hydration error: {0}")]
    Hydration(String),

    /// A column fetch asked for a column the result does not have
    #[error("Fetch error: column index {index} out of range for {count} columns")]
    ColumnIndex { index: usize, count: usize },

    /// Errors surfaced by the SQLite driver
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Errors surfaced by the PostgreSQL driver
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] postgres::Error),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system and I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Text bound to a JSON parameter is not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LazydbError {
    /// Returns true when the error came straight from a database driver.
    pub fn is_driver_error(&self) -> bool {
        matches!(self, LazydbError::Sqlite(_) | LazydbError::Postgres(_))
    }
}

/// Type alias for Result to use LazydbError as the error type.
pub type Result<T> = std::result::Result<T, LazydbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let db_err = LazydbError::Sqlite(rusqlite::Error::ExecuteReturnedResults);
        assert!(db_err.to_string().contains("SQLite error"));
        assert!(db_err.is_driver_error());

        let bind_err = LazydbError::BindType {
            key: "tags".to_string(),
            type_name: "list",
        };
        assert_eq!(
            bind_err.to_string(),
            "Bind error: argument 'tags' has unsupported type list"
        );
        assert!(!bind_err.is_driver_error());

        let hydration_err = LazydbError::Hydration("empty type name".to_string());
        assert!(hydration_err.to_string().contains("Hydration error"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: LazydbError = io_err.into();
        match err {
            LazydbError::Io(_) => {}
            _ => panic!("Expected IO error"),
        }

        let json_err: std::result::Result<serde_json::Value, serde_json::Error> =
            serde_json::from_str("{ invalid json }");
        let err: LazydbError = json_err.unwrap_err().into();
        match err {
            LazydbError::Json(_) => {}
            _ => panic!("Expected JSON error"),
        }
    }
}
