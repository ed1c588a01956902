/// Result Shaping Module
///
/// Turns an executed [`Cursor`] into the shapes callers ask for: a single
/// record, every record, one column value, records grouped by their first
/// column, or objects built by a caller-supplied constructor.

use crate::core::db::connection::Cursor;
use crate::core::value::{Row, Value};
use crate::core::{LazydbError, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// How a single row is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStyle {
    /// Column name to value
    #[default]
    Assoc,
    /// Values in column order
    Num,
    /// One value taken from the given 0-based column
    Column(usize),
}

impl FetchStyle {
    /// Groups rows by their first column and renders the remaining columns
    /// with this style.
    pub fn grouped(self) -> GroupBy {
        GroupBy { inner: self }
    }
}

/// Grouped fetch: first column is the key, the rest is rendered by `inner`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupBy {
    pub inner: FetchStyle,
}

impl Default for GroupBy {
    fn default() -> Self {
        FetchStyle::Column(0).grouped()
    }
}

/// One fetched row in a given [`FetchStyle`]
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Assoc(Row),
    Num(Vec<Value>),
    /// `None` is the "no row" sentinel of a column fetch
    Column(Option<Value>),
}

impl Record {
    /// What a fetch returns when no row matched
    pub fn empty(style: FetchStyle) -> Record {
        match style {
            FetchStyle::Assoc => Record::Assoc(Row::new()),
            FetchStyle::Num => Record::Num(Vec::new()),
            FetchStyle::Column(_) => Record::Column(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Record::Assoc(row) => row.is_empty(),
            Record::Num(values) => values.is_empty(),
            Record::Column(value) => value.is_none(),
        }
    }

    pub fn into_row(self) -> Option<Row> {
        match self {
            Record::Assoc(row) => Some(row),
            _ => None,
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Record::Assoc(row) => row.into_values(),
            Record::Num(values) => values,
            Record::Column(value) => value.into_iter().collect(),
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Record::Column(value) => value,
            _ => None,
        }
    }
}

/// Records grouped under the distinct values of a first column, in first-seen order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grouped {
    keys: Vec<Value>,
    groups: Vec<Vec<Record>>,
    index: HashMap<Value, usize>,
}

impl Grouped {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `record` under `key`; repeated keys accumulate.
    pub fn push(&mut self, key: Value, record: Record) {
        match self.index.get(&key) {
            Some(&slot) => self.groups[slot].push(record),
            None => {
                self.index.insert(key.clone(), self.keys.len());
                self.keys.push(key);
                self.groups.push(vec![record]);
            }
        }
    }

    pub fn get(&self, key: &Value) -> Option<&[Record]> {
        self.index.get(key).map(|&slot| self.groups[slot].as_slice())
    }

    pub fn keys(&self) -> &[Value] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &[Record])> {
        self.keys.iter().zip(self.groups.iter().map(Vec::as_slice))
    }
}

/// Builds objects from rows through a caller-supplied constructor.
///
/// The constructor receives the row's values in column order followed by the
/// extra arguments, or only the extra arguments when `args_overwrite` is set.
pub struct Hydrator<F> {
    type_name: String,
    constructor: F,
    extra_args: Vec<Value>,
    args_overwrite: bool,
}

impl<F> Hydrator<F> {
    pub fn new(type_name: impl Into<String>, constructor: F) -> Self {
        Hydrator {
            type_name: type_name.into(),
            constructor,
            extra_args: Vec::new(),
            args_overwrite: false,
        }
    }

    pub fn with_args(mut self, extra_args: Vec<Value>) -> Self {
        self.extra_args = extra_args;
        self
    }

    /// Ignore row values and pass only the extra arguments
    pub fn overwrite_args(mut self, args_overwrite: bool) -> Self {
        self.args_overwrite = args_overwrite;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Rejects an empty or malformed target type name.
    pub fn validate(&self) -> Result<()> {
        let name = self.type_name.trim();
        if name.is_empty() {
            return Err(LazydbError::Hydration(
                "target type name must not be empty".to_string(),
            ));
        }
        let well_formed = name
            .split("::")
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_'));
        if !well_formed {
            return Err(LazydbError::Hydration(format!(
                "invalid target type name '{}'",
                self.type_name
            )));
        }
        Ok(())
    }

    /// Constructor arguments for one row
    pub fn constructor_args(&self, row: Row) -> Vec<Value> {
        if self.args_overwrite {
            return self.extra_args.clone();
        }
        let mut args = row.into_values();
        args.extend(self.extra_args.iter().cloned());
        args
    }

    pub fn hydrate<T>(&self, row: Row) -> Result<T>
    where
        F: Fn(Vec<Value>) -> Result<T>,
    {
        (self.constructor)(self.constructor_args(row))
    }
}

/// Renders one row of positional values in `style`.
pub fn shape_row(columns: &[String], values: Vec<Value>, style: FetchStyle) -> Result<Record> {
    match style {
        FetchStyle::Assoc => Ok(Record::Assoc(columns.iter().cloned().zip(values).collect())),
        FetchStyle::Num => Ok(Record::Num(values)),
        FetchStyle::Column(index) => {
            let count = values.len();
            values
                .into_iter()
                .nth(index)
                .map(|v| Record::Column(Some(v)))
                .ok_or(LazydbError::ColumnIndex { index, count })
        }
    }
}

/// Next row in `style`, or the style's empty record when none is left.
pub fn fetch_one(cursor: &mut Cursor, style: FetchStyle) -> Result<Record> {
    match cursor.fetch_next() {
        Some(values) => shape_row(cursor.columns(), values, style),
        None => Ok(Record::empty(style)),
    }
}

/// Every remaining row in `style`.
pub fn fetch_every(cursor: &mut Cursor, style: FetchStyle) -> Result<Vec<Record>> {
    let rows = cursor.fetch_rest();
    rows.into_iter()
        .map(|values| shape_row(cursor.columns(), values, style))
        .collect()
}

/// Every remaining row grouped by its first column.
pub fn fetch_grouped(cursor: &mut Cursor, group: GroupBy) -> Result<Grouped> {
    let mut grouped = Grouped::new();
    if cursor.column_count() == 0 {
        return Ok(grouped);
    }
    let rest_columns = cursor.columns()[1..].to_vec();
    for values in cursor.fetch_rest() {
        let mut values = values.into_iter();
        let key = values.next().unwrap_or(Value::Null);
        let record = shape_row(&rest_columns, values.collect(), group.inner)?;
        grouped.push(key, record);
    }
    Ok(grouped)
}

/// Hydrates the next row, or returns `None` when no row is left.
pub fn hydrate_one<F, T>(cursor: &mut Cursor, hydrator: &Hydrator<F>) -> Result<Option<T>>
where
    F: Fn(Vec<Value>) -> Result<T>,
{
    cursor
        .fetch_next_row()
        .map(|row| hydrator.hydrate(row))
        .transpose()
}

/// Hydrates every remaining row.
pub fn hydrate_every<F, T>(cursor: &mut Cursor, hydrator: &Hydrator<F>) -> Result<Vec<T>>
where
    F: Fn(Vec<Value>) -> Result<T>,
{
    let mut objects = Vec::new();
    while let Some(row) = cursor.fetch_next_row() {
        objects.push(hydrator.hydrate(row)?);
    }
    Ok(objects)
}
