/// Value Module
///
/// Loosely-typed argument values, argument collections, bound arguments and
/// the ordered rows handed back by the drivers.
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A loosely-typed value, used both for query arguments and for result cells.
///
/// `List` stands for a nested container. It is accepted in argument
/// collections but has no storage type, so binding it fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
}

impl Value {
    /// Runtime type name used in bind error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "string",
            Value::List(_) => "list",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Loose truthiness: null, false, 0, 0.0, NaN, "", "0" and the empty list are empty.
    pub fn is_loosely_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Bool(b) => !b,
            Value::Int(i) => *i == 0,
            Value::Float(f) => *f == 0.0 || f.is_nan(),
            Value::Text(s) => s.is_empty() || s == "0",
            Value::List(items) => items.is_empty(),
        }
    }

    /// Integer form of a numeric value. Floats and numeric strings are truncated,
    /// infinities saturate to the `i64` bounds and NaN becomes 0.
    ///
    /// Returns `None` for booleans, lists, null and non-numeric text.
    pub fn numeric_as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Text(s) => parse_numeric(s),
            _ => None,
        }
    }

    /// Replaces every boolean, including those nested in lists, with 0 or 1.
    pub fn normalize_booleans(self) -> Value {
        match self {
            Value::Bool(b) => Value::Int(b as i64),
            Value::List(items) => {
                Value::List(items.into_iter().map(Value::normalize_booleans).collect())
            }
            other => other,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }
}

/// Parses a numeric string the loose way: surrounding whitespace allowed,
/// decimal and exponent forms truncated toward zero.
fn parse_numeric(s: &str) -> Option<i64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(i);
    }
    // "inf" and "nan" parse as floats but are not numeric strings
    if trimmed.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return None;
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() => Some(f.trunc() as i64),
        _ => None,
    }
}

// Floats compare by bit pattern so values can key a grouped result.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::List(items) => items.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(0.0)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::List(map.into_iter().map(|(_, v)| Value::from(v)).collect())
            }
        }
    }
}

/// Argument key: a 0-based position or a placeholder name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Positional(usize),
    Named(String),
}

impl Key {
    /// Builds a key from free-form text. Digit-only text is positional and a
    /// leading `:` on names is dropped.
    pub fn parse(raw: &str) -> Key {
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = raw.parse::<usize>() {
                return Key::Positional(index);
            }
        }
        Key::Named(raw.trim_start_matches(':').to_string())
    }

    /// The name with its leading `:` marker, or `None` for positional keys
    pub fn marker(&self) -> Option<String> {
        match self {
            Key::Positional(_) => None,
            Key::Named(name) => Some(format!(":{}", name)),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Positional(i) => write!(f, "{}", i),
            Key::Named(name) => write!(f, "{}", name),
        }
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Positional(i)
    }
}

impl From<&str> for Key {
    fn from(raw: &str) -> Self {
        Key::parse(raw)
    }
}

impl From<String> for Key {
    fn from(raw: String) -> Self {
        Key::parse(&raw)
    }
}

/// Ordered argument collection keyed by position or name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    entries: Vec<(Key, Value)>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a value at the next free position.
    pub fn push(&mut self, value: impl Into<Value>) {
        let next = self
            .entries
            .iter()
            .filter_map(|(k, _)| match k {
                Key::Positional(i) => Some(i + 1),
                Key::Named(_) => None,
            })
            .max()
            .unwrap_or(0);
        self.entries.push((Key::Positional(next), value.into()));
    }

    /// Sets the value for a key, replacing an earlier value for the same key.
    pub fn set(&mut self, key: impl Into<Key>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Builder form of [`Args::push`]
    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.push(value);
        self
    }

    /// Builder form of [`Args::set`]
    pub fn with_named(mut self, key: impl Into<Key>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Key, Value)> {
        self.entries.iter()
    }

    /// Applies [`Value::normalize_booleans`] to every argument.
    pub fn normalize_booleans(self) -> Args {
        Args {
            entries: self
                .entries
                .into_iter()
                .map(|(k, v)| (k, v.normalize_booleans()))
                .collect(),
        }
    }
}

impl IntoIterator for Args {
    type Item = (Key, Value);
    type IntoIter = std::vec::IntoIter<(Key, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<Key>, V: Into<Value>> FromIterator<(K, V)> for Args {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut args = Args::new();
        for (k, v) in iter {
            args.set(k, v);
        }
        args
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        values.into_iter().enumerate().collect()
    }
}

/// Builds an [`Args`] collection.
///
/// `args![1, "two"]` binds positionally, `args!{"id" => 1}` by name.
#[macro_export]
macro_rules! args {
    () => {
        $crate::Args::new()
    };
    ($($key:literal => $value:expr),+ $(,)?) => {{
        let mut args = $crate::Args::new();
        $(args.set($key, $value);)+
        args
    }};
    ($($value:expr),+ $(,)?) => {{
        let mut args = $crate::Args::new();
        $(args.push($value);)+
        args
    }};
}

/// Storage type chosen for a bound argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindKind {
    Null,
    Integer,
    Boolean,
    Text,
}

/// A value that has been classified into a storage type
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Null,
    Integer(i64),
    Boolean(bool),
    Text(String),
}

impl Bound {
    pub fn kind(&self) -> BindKind {
        match self {
            Bound::Null => BindKind::Null,
            Bound::Integer(_) => BindKind::Integer,
            Bound::Boolean(_) => BindKind::Boolean,
            Bound::Text(_) => BindKind::Text,
        }
    }
}

/// A (key, value, storage type) triple ready for the driver
#[derive(Debug, Clone, PartialEq)]
pub struct BoundArg {
    pub key: Key,
    pub value: Bound,
}

/// A result row: column names mapped to values in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column. A repeated column name overwrites the earlier value.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.columns.iter().position(|c| *c == column) {
            Some(idx) => self.values[idx] = value,
            None => {
                self.columns.push(column);
                self.values.push(value);
            }
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }
}

impl<S: Into<String>> FromIterator<(S, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (S, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}
