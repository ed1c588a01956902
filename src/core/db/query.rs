/// Query Execution Module
///
/// This module decides how a SQL string and its argument collection reach the
/// driver: either every argument is classified into a storage type and bound
/// explicitly, or the raw argument list is passed through untouched.

use crate::core::db::connection::{Cursor, Driver, Params};
use crate::core::value::{Args, Bound, BoundArg, Key, Value};
use crate::core::{LazydbError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, trace};

/// `:identifier` that is not half of a `::` cast
static NAMED_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^:]):[A-Za-z_][A-Za-z0-9_]*").unwrap());

/// `?` next to an operator, parenthesis or comma
static POSITIONAL_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[=<>!(,]\s*\?|\?\s*[,)]").unwrap());

/// Returns true when `sql` looks like it carries a named or positional placeholder.
pub fn has_placeholders(sql: &str) -> bool {
    NAMED_PLACEHOLDER.is_match(sql) || POSITIONAL_PLACEHOLDER.is_match(sql)
}

/// Classifies one argument into its storage type.
///
/// With `empty_as_null`, loosely-empty values (0, "", "0", false, empty list)
/// become NULL before any other rule applies. Numeric values, numeric strings
/// included, are truncated to integers.
pub fn classify(key: &Key, value: &Value, empty_as_null: bool) -> Result<Bound> {
    if value.is_null() || (empty_as_null && value.is_loosely_empty()) {
        return Ok(Bound::Null);
    }
    if let Some(i) = value.numeric_as_i64() {
        return Ok(Bound::Integer(i));
    }
    match value {
        Value::Bool(b) => Ok(Bound::Boolean(*b)),
        Value::Text(s) => Ok(Bound::Text(s.clone())),
        other => Err(LazydbError::BindType {
            key: key.to_string(),
            type_name: other.type_name(),
        }),
    }
}

/// Classifies every argument. Fails on the first unbindable value, before
/// anything reaches the driver.
pub fn bind_all(args: &Args, empty_as_null: bool) -> Result<Vec<BoundArg>> {
    args.iter()
        .map(|(key, value)| {
            let bound = classify(key, value, empty_as_null)?;
            trace!(key = %key, kind = ?bound.kind(), "classified argument");
            Ok(BoundArg {
                key: key.clone(),
                value: bound,
            })
        })
        .collect()
}

/// Works out the [`Params`] for a statement.
pub fn plan(sql: &str, args: Args, empty_as_null: bool) -> Result<Params> {
    let args = args.normalize_booleans();
    if args.is_empty() {
        return Ok(Params::None);
    }
    if !has_placeholders(sql) {
        debug!(count = args.len(), "no placeholder found, passing arguments through");
        return Ok(Params::Raw(args));
    }
    let bound = bind_all(&args, empty_as_null)?;
    debug!(count = bound.len(), "binding arguments explicitly");
    Ok(Params::Bound(bound))
}

/// Query execution service that operates on a driver handle
pub struct QueryExecutor<'a, D: Driver> {
    driver: &'a mut D,
    empty_as_null: bool,
}

impl<'a, D: Driver> QueryExecutor<'a, D> {
    /// Creates a new QueryExecutor for the given handle
    pub fn new(driver: &'a mut D, empty_as_null: bool) -> Self {
        QueryExecutor {
            driver,
            empty_as_null,
        }
    }

    /// Binds `args` to `sql`, runs it and returns the cursor.
    ///
    /// # Errors
    ///
    /// `LazydbError::BindType` when an argument has no storage type, or the
    /// driver's own error when prepare or execute fails.
    pub fn run(&mut self, sql: &str, args: Args) -> Result<Cursor> {
        let params = plan(sql, args, self.empty_as_null)?;
        let cursor = self.driver.execute(sql, &params)?;
        debug!(rows = cursor.row_count(), "statement executed");
        Ok(cursor)
    }

    /// Runs a statement and returns how many rows it changed.
    pub fn execute(&mut self, sql: &str, args: Args) -> Result<u64> {
        Ok(self.run(sql, args)?.row_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::core::value::BindKind;

    /// Records what it was asked to run
    #[derive(Default)]
    struct RecordingDriver {
        calls: Vec<(String, Params)>,
    }

    impl Driver for RecordingDriver {
        fn execute(&mut self, sql: &str, params: &Params) -> Result<Cursor> {
            self.calls.push((sql.to_string(), params.clone()));
            Ok(Cursor::affected(1))
        }

        fn begin_transaction(&mut self) -> Result<()> {
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            Ok(())
        }

        fn last_insert_id(&mut self) -> Result<String> {
            Ok("0".to_string())
        }
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(has_placeholders("SELECT * FROM t WHERE id = :id"));
        assert!(has_placeholders("SELECT * FROM t WHERE id=?"));
        assert!(has_placeholders("INSERT INTO t VALUES (?, ?)"));
        assert!(has_placeholders("SELECT * FROM t WHERE id IN (?)"));
        assert!(has_placeholders("SELECT * FROM t WHERE a > ? AND b < ?"));
        assert!(has_placeholders(":first"));

        assert!(!has_placeholders("SELECT * FROM t"));
        assert!(!has_placeholders("SELECT x::int FROM t"));
        assert!(!has_placeholders("SELECT * FROM t LIMIT ?"));
        assert!(!has_placeholders("SELECT '12:30' FROM t"));
    }

    #[test]
    fn test_classify_rules() {
        let key = Key::Named("k".to_string());
        assert_eq!(classify(&key, &Value::Int(7), true).unwrap(), Bound::Integer(7));
        assert_eq!(classify(&key, &Value::Float(7.8), true).unwrap(), Bound::Integer(7));
        assert_eq!(classify(&key, &Value::from("42"), true).unwrap(), Bound::Integer(42));
        assert_eq!(classify(&key, &Value::Bool(true), true).unwrap(), Bound::Boolean(true));
        assert_eq!(
            classify(&key, &Value::from("bob"), true).unwrap(),
            Bound::Text("bob".to_string())
        );

        for empty in [Value::Int(0), Value::from(""), Value::from("0"), Value::Bool(false), Value::Null] {
            assert_eq!(classify(&key, &empty, true).unwrap().kind(), BindKind::Null);
        }
    }

    #[test]
    fn test_classify_without_empty_as_null() {
        let key = Key::Positional(0);
        assert_eq!(classify(&key, &Value::Int(0), false).unwrap(), Bound::Integer(0));
        assert_eq!(
            classify(&key, &Value::from(""), false).unwrap(),
            Bound::Text(String::new())
        );
        assert_eq!(classify(&key, &Value::Bool(false), false).unwrap(), Bound::Boolean(false));
        assert_eq!(classify(&key, &Value::Null, false).unwrap(), Bound::Null);
    }

    #[test]
    fn test_classify_non_finite_floats() {
        let key = Key::Positional(0);
        assert_eq!(
            classify(&key, &Value::Float(f64::INFINITY), true).unwrap(),
            Bound::Integer(i64::MAX)
        );
        assert_eq!(
            classify(&key, &Value::Float(f64::NEG_INFINITY), false).unwrap(),
            Bound::Integer(i64::MIN)
        );
        assert_eq!(classify(&key, &Value::Float(f64::NAN), true).unwrap(), Bound::Null);
        assert_eq!(classify(&key, &Value::Float(f64::NAN), false).unwrap(), Bound::Integer(0));
    }

    #[test]
    fn test_non_scalar_is_rejected() {
        let key = Key::Named("tags".to_string());
        let err = classify(&key, &Value::from(vec![1, 2]), true).unwrap_err();
        match err {
            LazydbError::BindType { key, type_name } => {
                assert_eq!(key, "tags");
                assert_eq!(type_name, "list");
            }
            other => panic!("Expected BindType error, got {:?}", other),
        }
    }

    #[test]
    fn test_plan_passes_raw_args_without_placeholders() {
        let args = args![5, "x"];
        let params = plan("SELECT * FROM t LIMIT 10", args.clone(), true).unwrap();
        assert_eq!(params, Params::Raw(args));
    }

    #[test]
    fn test_plan_binds_every_argument() {
        let params = plan(
            "UPDATE t SET name = :name, active = :active WHERE id = :id",
            args! { "name" => "x", "active" => true, "id" => 0 },
            true,
        )
        .unwrap();

        let Params::Bound(bound) = params else {
            panic!("Expected bound params");
        };
        assert_eq!(bound.len(), 3);
        assert_eq!(bound[0].value, Bound::Text("x".to_string()));
        // booleans become integers before classification
        assert_eq!(bound[1].value, Bound::Integer(1));
        assert_eq!(bound[2].value, Bound::Null);
    }

    #[test]
    fn test_plan_without_args_runs_plain() {
        assert_eq!(plan("SELECT 1 WHERE 1 = ?", Args::new(), true).unwrap(), Params::None);
    }

    #[test]
    fn test_bind_error_stops_before_driver() {
        let mut driver = RecordingDriver::default();
        let mut executor = QueryExecutor::new(&mut driver, true);
        let result = executor.run(
            "SELECT * FROM t WHERE id = ? AND tag = ?",
            args![1, vec!["a", "b"]],
        );
        assert!(matches!(result, Err(LazydbError::BindType { .. })));
        assert!(driver.calls.is_empty());
    }

    #[test]
    fn test_execute_returns_row_count() {
        let mut driver = RecordingDriver::default();
        let mut executor = QueryExecutor::new(&mut driver, true);
        let changed = executor.execute("DELETE FROM t WHERE id = ?", args![3]).unwrap();
        assert_eq!(changed, 1);
        assert_eq!(driver.calls.len(), 1);
        assert_eq!(driver.calls[0].0, "DELETE FROM t WHERE id = ?");
    }
}
