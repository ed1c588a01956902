/// # Test Utilities Module
///
/// Shared fixtures for the unit and integration tests:
/// - In-memory and file-backed SQLite databases with a sample schema
/// - Log capture through the test writer
/// - Error assertion macro
use crate::core::db::{SqliteConfig, SqliteConnector};
use crate::core::Result;
use crate::db::Database;
use crate::ConnectorOptions;
use std::sync::Once;

static LOGGING: Once = Once::new();

/// Routes tracing output through the test harness so it only shows for failing tests.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    });
}

/// Isolated database test fixture
pub struct DatabaseFixture {
    pub name: String,
    pub db: Database<SqliteConnector>,
}

impl DatabaseFixture {
    /// Create a new, empty in-memory database
    pub fn new(name: &str) -> Self {
        Self::with_options(name, ConnectorOptions::default())
    }

    pub fn with_options(name: &str, options: ConnectorOptions) -> Self {
        init_logging();
        DatabaseFixture {
            name: name.to_string(),
            db: Database::sqlite(SqliteConfig::new(":memory:").with_options(options)),
        }
    }

    /// Create fixture with sample data schema
    pub fn with_sample_data(name: &str) -> Result<Self> {
        let mut fixture = Self::new(name);
        fixture.setup_standard_schema()?;
        fixture.populate_sample_data()?;
        Ok(fixture)
    }

    /// Set up standard test schema
    pub fn setup_standard_schema(&mut self) -> Result<()> {
        self.db.execute(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                team TEXT,
                age INTEGER,
                active BOOLEAN DEFAULT 1
            )",
            crate::args![],
        )?;
        self.db.execute(
            "CREATE TABLE posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                views INTEGER,
                FOREIGN KEY (user_id) REFERENCES users (id)
            )",
            crate::args![],
        )?;
        Ok(())
    }

    /// Populate with sample data
    pub fn populate_sample_data(&mut self) -> Result<()> {
        let users = [
            ("alice", "red", 28, true),
            ("bob", "blue", 32, false),
            ("charlie", "red", 25, true),
        ];
        for (username, team, age, active) in users {
            self.db.execute(
                "INSERT INTO users (username, team, age, active) VALUES (:username, :team, :age, :active)",
                crate::args! {
                    "username" => username,
                    "team" => team,
                    "age" => age,
                    "active" => active
                },
            )?;
        }

        let posts = [
            (1, "Welcome to Rust", 120),
            (1, "Lazy connections", 45),
            (3, "Grouping rows", 7),
        ];
        for (user_id, title, views) in posts {
            self.db.execute(
                "INSERT INTO posts (user_id, title, views) VALUES (?, ?, ?)",
                crate::args![user_id, title, views],
            )?;
        }

        Ok(())
    }
}

/// Asserts that a result is an error of the given `LazydbError` variant
#[macro_export]
macro_rules! assert_lazydb_error {
    ($result:expr, $variant:ident, $context:expr) => {
        match $result {
            Err($crate::LazydbError::$variant { .. }) => {}
            Ok(_) => panic!("Expected {} error but got Ok in {}", stringify!($variant), $context),
            Err(other) => panic!(
                "Expected {} but got {:?} in {}",
                stringify!($variant),
                other,
                $context
            ),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LazydbError, Value};

    #[test]
    fn test_database_fixture_creation() {
        let fixture = DatabaseFixture::new("test_create");
        assert_eq!(fixture.name, "test_create");
        assert!(!fixture.db.is_connected());
    }

    #[test]
    fn test_sample_data_fixture() {
        let mut fixture = DatabaseFixture::with_sample_data("test_sample").unwrap();
        let count = fixture
            .db
            .fetch_col("SELECT COUNT(*) FROM users", crate::args![])
            .unwrap();
        assert_eq!(count, Some(Value::Int(3)));
    }

    #[test]
    fn test_error_assertion_macro() {
        let result: Result<i32> = Err(LazydbError::Hydration("Test error".to_string()));
        assert_lazydb_error!(result, Hydration, "macro test");

        let result: Result<i32> = Err(LazydbError::BindType {
            key: "k".to_string(),
            type_name: "list",
        });
        assert_lazydb_error!(result, BindType, "macro test");
    }
}
