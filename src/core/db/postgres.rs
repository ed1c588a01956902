/// PostgreSQL Connector
///
/// Networked connector backed by the blocking `postgres` client. PostgreSQL
/// only understands `$n` placeholders, so `?` and `:name` placeholders are
/// rewritten before the statement is prepared, and each argument is converted
/// to the Rust type matching the parameter type the server inferred.

use crate::core::db::connection::{Connector, ConnectorOptions, Cursor, Driver, Params};
use crate::core::value::{Bound, Key, Value};
use crate::core::{LazydbError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use postgres::types::{FromSql, ToSql, Type};
use postgres::{Client, NoTls};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::error::Error as StdError;
use std::fmt;
use tracing::{debug, trace};
use uuid::Uuid;

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_SSLMODE: &str = "prefer";

/// PostgreSQL connection configuration
#[derive(Clone, PartialEq, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// "disable" or "prefer". Connections are made without TLS, so modes
    /// that insist on it are rejected by [`PostgresConfig::validate`].
    pub sslmode: Option<String>,
    #[serde(default)]
    pub options: ConnectorOptions,
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .field("sslmode", &self.sslmode)
            .field("options", &self.options)
            .finish()
    }
}

impl PostgresConfig {
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        PostgresConfig {
            host: host.into(),
            port: None,
            database: database.into(),
            user: user.into(),
            password: password.into(),
            sslmode: None,
            options: ConnectorOptions::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_options(mut self, options: ConnectorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(LazydbError::Config("Host is required".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(LazydbError::Config("Username is required".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(LazydbError::Config("Database name is required".to_string()));
        }
        match self.sslmode.as_deref() {
            None | Some("disable") | Some("prefer") => Ok(()),
            Some(mode) => Err(LazydbError::Config(format!(
                "sslmode '{}' needs TLS, which this connector does not support",
                mode
            ))),
        }
    }

    /// Builds the key/value connection string understood by the driver
    pub fn connection_string(&self) -> String {
        let mut conn_string = format!(
            "host={} port={} dbname={} user={} password={} sslmode={}",
            quote_conninfo(&self.host),
            self.port(),
            quote_conninfo(&self.database),
            quote_conninfo(&self.user),
            quote_conninfo(&self.password),
            quote_conninfo(self.sslmode.as_deref().unwrap_or(DEFAULT_SSLMODE)),
        );
        if let Some(secs) = self.options.connect_timeout_secs {
            conn_string.push_str(&format!(" connect_timeout={}", secs));
        }
        conn_string
    }
}

/// Quotes a connection string value when it is empty or holds spaces, quotes
/// or backslashes.
fn quote_conninfo(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\');
    if !needs_quotes {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{}'", escaped)
}

/// Rewrites `?` and `:name` placeholders to `$n`.
///
/// Returns the rewritten SQL and, for each `$n`, the argument key it stands
/// for. A name used twice maps to the same `$n`. String literals, quoted
/// identifiers, comments and `::` casts are left alone.
pub fn rewrite_placeholders(sql: &str) -> (String, Vec<Key>) {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut slots: Vec<Key> = Vec::new();
    let mut next_positional = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                out.push(c);
                i += 1;
                while i < chars.len() {
                    out.push(chars[i]);
                    if chars[i] == c {
                        if i + 1 < chars.len() && chars[i + 1] == c {
                            out.push(c);
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    out.push(chars[i]);
                    i += 1;
                }
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' if chars
                .get(i + 1)
                .map_or(false, |n| n.is_ascii_alphabetic() || *n == '_') =>
            {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let n = slot_for(&mut slots, Key::Named(name));
                out.push_str(&format!("${}", n));
                i = end;
            }
            '?' => {
                let n = slot_for(&mut slots, Key::Positional(next_positional));
                next_positional += 1;
                out.push_str(&format!("${}", n));
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    (out, slots)
}

/// 1-based slot for `key`, allocating a new one on first use
fn slot_for(slots: &mut Vec<Key>, key: Key) -> usize {
    match slots.iter().position(|k| *k == key) {
        Some(idx) => idx + 1,
        None => {
            slots.push(key);
            slots.len()
        }
    }
}

/// Argument value before it is matched to a server parameter type
#[derive(Debug, Clone, PartialEq)]
enum PgArg {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl From<&Bound> for PgArg {
    fn from(bound: &Bound) -> Self {
        match bound {
            Bound::Null => PgArg::Null,
            Bound::Integer(i) => PgArg::Int(*i),
            Bound::Boolean(b) => PgArg::Bool(*b),
            Bound::Text(s) => PgArg::Text(s.clone()),
        }
    }
}

impl PgArg {
    fn from_raw(key: &Key, value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(PgArg::Null),
            Value::Bool(b) => Ok(PgArg::Bool(*b)),
            Value::Int(i) => Ok(PgArg::Int(*i)),
            Value::Float(f) => Ok(PgArg::Float(*f)),
            Value::Text(s) => Ok(PgArg::Text(s.clone())),
            Value::List(_) => Err(LazydbError::BindType {
                key: key.to_string(),
                type_name: value.type_name(),
            }),
        }
    }

    fn as_text(&self) -> Option<String> {
        match self {
            PgArg::Null => None,
            PgArg::Int(i) => Some(i.to_string()),
            PgArg::Float(f) => Some(f.to_string()),
            PgArg::Bool(b) => Some(b.to_string()),
            PgArg::Text(s) => Some(s.clone()),
        }
    }

    /// Converts to the Rust type the driver accepts for `ty`. Values that do
    /// not fit fall through unchanged so the driver reports the mismatch.
    ///
    /// # Errors
    ///
    /// `LazydbError::Json` when text bound to a JSON column does not parse.
    fn into_sql(self, ty: &Type) -> Result<Box<dyn ToSql + Sync>> {
        let boxed: Box<dyn ToSql + Sync> = match *ty {
            Type::BOOL => match self {
                PgArg::Null => Box::new(None::<bool>),
                PgArg::Bool(b) => Box::new(b),
                PgArg::Int(i) => Box::new(i != 0),
                other => other.fallback(),
            },
            Type::INT2 => match self {
                PgArg::Null => Box::new(None::<i16>),
                PgArg::Int(i) => match i16::try_from(i) {
                    Ok(v) => Box::new(v),
                    Err(_) => Box::new(i),
                },
                other => other.fallback(),
            },
            Type::INT4 => match self {
                PgArg::Null => Box::new(None::<i32>),
                PgArg::Int(i) => match i32::try_from(i) {
                    Ok(v) => Box::new(v),
                    Err(_) => Box::new(i),
                },
                other => other.fallback(),
            },
            Type::INT8 => match self {
                PgArg::Null => Box::new(None::<i64>),
                PgArg::Int(i) => Box::new(i),
                other => other.fallback(),
            },
            Type::FLOAT4 => match self {
                PgArg::Null => Box::new(None::<f32>),
                PgArg::Int(i) => Box::new(i as f32),
                PgArg::Float(f) => Box::new(f as f32),
                other => other.fallback(),
            },
            Type::FLOAT8 => match self {
                PgArg::Null => Box::new(None::<f64>),
                PgArg::Int(i) => Box::new(i as f64),
                PgArg::Float(f) => Box::new(f),
                other => other.fallback(),
            },
            Type::NUMERIC => match self.to_decimal() {
                Some(d) => Box::new(d),
                None if self == PgArg::Null => Box::new(None::<Decimal>),
                None => self.fallback(),
            },
            Type::JSON | Type::JSONB => match self {
                PgArg::Null => Box::new(None::<serde_json::Value>),
                PgArg::Text(s) => Box::new(serde_json::from_str::<serde_json::Value>(&s)?),
                PgArg::Int(i) => Box::new(serde_json::Value::from(i)),
                PgArg::Float(f) => Box::new(serde_json::Value::from(f)),
                PgArg::Bool(b) => Box::new(serde_json::Value::from(b)),
            },
            Type::UUID => match self {
                PgArg::Null => Box::new(None::<Uuid>),
                PgArg::Text(s) => match Uuid::parse_str(s.trim()) {
                    Ok(u) => Box::new(u),
                    Err(_) => Box::new(s),
                },
                other => other.fallback(),
            },
            Type::BYTEA => match self {
                PgArg::Null => Box::new(None::<Vec<u8>>),
                PgArg::Text(s) => Box::new(s.into_bytes()),
                other => other.fallback(),
            },
            Type::DATE => match self {
                PgArg::Null => Box::new(None::<NaiveDate>),
                PgArg::Text(s) => match NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
                    Ok(d) => Box::new(d),
                    Err(_) => Box::new(s),
                },
                other => other.fallback(),
            },
            Type::TIME => match self {
                PgArg::Null => Box::new(None::<NaiveTime>),
                PgArg::Text(s) => match NaiveTime::parse_from_str(&s, "%H:%M:%S%.f") {
                    Ok(t) => Box::new(t),
                    Err(_) => Box::new(s),
                },
                other => other.fallback(),
            },
            Type::TIMESTAMP => match self {
                PgArg::Null => Box::new(None::<NaiveDateTime>),
                PgArg::Text(s) => match parse_timestamp(&s) {
                    Some(ts) => Box::new(ts),
                    None => Box::new(s),
                },
                other => other.fallback(),
            },
            Type::TIMESTAMPTZ => match self {
                PgArg::Null => Box::new(None::<DateTime<Utc>>),
                PgArg::Text(s) => match DateTime::parse_from_rfc3339(&s) {
                    Ok(ts) => Box::new(ts.with_timezone(&Utc)),
                    Err(_) => match parse_timestamp(&s) {
                        Some(ts) => Box::new(DateTime::<Utc>::from_naive_utc_and_offset(ts, Utc)),
                        None => Box::new(s),
                    },
                },
                other => other.fallback(),
            },
            _ if <String as ToSql>::accepts(ty) => Box::new(self.as_text()),
            _ => self.fallback(),
        };
        Ok(boxed)
    }

    /// Exact decimal form, `None` for NULL, booleans and non-numeric text
    fn to_decimal(&self) -> Option<Decimal> {
        match self {
            PgArg::Int(i) => Some(Decimal::from(*i)),
            PgArg::Float(f) => Decimal::try_from(*f).ok(),
            PgArg::Text(s) => {
                let s = s.trim();
                s.parse::<Decimal>()
                    .ok()
                    .or_else(|| Decimal::from_scientific(s).ok())
            }
            PgArg::Null | PgArg::Bool(_) => None,
        }
    }

    fn fallback(self) -> Box<dyn ToSql + Sync> {
        match self {
            PgArg::Null => Box::new(None::<String>),
            PgArg::Int(i) => Box::new(i),
            PgArg::Float(f) => Box::new(f),
            PgArg::Bool(b) => Box::new(b),
            PgArg::Text(s) => Box::new(s),
        }
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Orders the arguments by `$n` slot. Slots without an argument are NULL.
fn args_for_slots(slots: &[Key], params: &Params) -> Result<Vec<PgArg>> {
    slots
        .iter()
        .map(|slot| match params {
            Params::None => Ok(PgArg::Null),
            Params::Bound(bound) => Ok(bound
                .iter()
                .find(|arg| arg.key == *slot)
                .map(|arg| PgArg::from(&arg.value))
                .unwrap_or(PgArg::Null)),
            Params::Raw(args) => match args.get(slot) {
                Some(value) => PgArg::from_raw(slot, value),
                None => Ok(PgArg::Null),
            },
        })
        .collect()
}

/// Server-side `interval`: microseconds, days and months kept apart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    micros: i64,
    days: i32,
    months: i32,
}

impl Interval {
    /// ISO 8601 duration such as `P1Y2M3DT4H5M6.5S`
    fn to_iso8601(self) -> String {
        let mut out = String::from("P");
        let (years, months) = (self.months / 12, self.months % 12);
        if years != 0 {
            out.push_str(&format!("{}Y", years));
        }
        if months != 0 {
            out.push_str(&format!("{}M", months));
        }
        if self.days != 0 {
            out.push_str(&format!("{}D", self.days));
        }

        if self.micros != 0 {
            let sign = if self.micros < 0 { "-" } else { "" };
            let mut rest = self.micros.unsigned_abs();
            let hours = rest / 3_600_000_000;
            rest %= 3_600_000_000;
            let minutes = rest / 60_000_000;
            rest %= 60_000_000;
            let (secs, frac) = (rest / 1_000_000, rest % 1_000_000);

            out.push('T');
            if hours != 0 {
                out.push_str(&format!("{}{}H", sign, hours));
            }
            if minutes != 0 {
                out.push_str(&format!("{}{}M", sign, minutes));
            }
            if frac != 0 {
                let frac = format!("{:06}", frac);
                out.push_str(&format!("{}{}.{}S", sign, secs, frac.trim_end_matches('0')));
            } else if secs != 0 {
                out.push_str(&format!("{}{}S", sign, secs));
            }
        }

        if out == "P" {
            out.push_str("T0S");
        }
        out
    }
}

impl<'a> FromSql<'a> for Interval {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn StdError + Sync + Send>> {
        if raw.len() != 16 {
            return Err(format!("invalid interval length {}", raw.len()).into());
        }
        let mut micros = [0u8; 8];
        let mut days = [0u8; 4];
        let mut months = [0u8; 4];
        micros.copy_from_slice(&raw[0..8]);
        days.copy_from_slice(&raw[8..12]);
        months.copy_from_slice(&raw[12..16]);
        Ok(Interval {
            micros: i64::from_be_bytes(micros),
            days: i32::from_be_bytes(days),
            months: i32::from_be_bytes(months),
        })
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::INTERVAL
    }
}

/// NUMERIC as an integer when it has no fractional part and fits, else a float
fn decimal_value(d: Decimal) -> Value {
    if d.fract().is_zero() {
        if let Some(i) = d.to_i64() {
            return Value::Int(i);
        }
    }
    match d.to_f64() {
        Some(f) => Value::Float(f),
        None => Value::Text(d.to_string()),
    }
}

/// Decodes one column of a result row by its declared type.
///
/// Types without a decoder here are read as text; when the driver refuses
/// that, its error is returned.
fn decode_column(row: &postgres::Row, idx: usize) -> Result<Value> {
    let ty = row.columns()[idx].type_();
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(|v| Value::Int(v as i64)),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(|v| Value::Int(v as i64)),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::Int),
        Type::OID => row.try_get::<_, Option<u32>>(idx)?.map(|v| Value::Int(v as i64)),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx)?.map(|v| Value::Float(v as f64)),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.map(Value::Float),
        Type::NUMERIC => row.try_get::<_, Option<Decimal>>(idx)?.map(decimal_value),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(|json| Value::Text(json.to_string())),
        Type::UUID => row
            .try_get::<_, Option<Uuid>>(idx)?
            .map(|u| Value::Text(u.to_string())),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map(|bytes| Value::Text(String::from_utf8_lossy(&bytes).into_owned())),
        Type::INTERVAL => row
            .try_get::<_, Option<Interval>>(idx)?
            .map(|iv| Value::Text(iv.to_iso8601())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map(|d| Value::Text(d.to_string())),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(idx)?
            .map(|t| Value::Text(t.to_string())),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|ts| Value::Text(ts.to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|ts| Value::Text(ts.to_rfc3339())),
        _ => row.try_get::<_, Option<String>>(idx)?.map(Value::Text),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Live PostgreSQL connection
pub struct PostgresHandle {
    client: Client,
}

impl PostgresHandle {
    fn open(config: &PostgresConfig) -> Result<Self> {
        let client = Client::connect(&config.connection_string(), NoTls).map_err(|e| {
            LazydbError::Connection(format!(
                "Failed to connect to PostgreSQL at {}:{}: {}",
                config.host,
                config.port(),
                e
            ))
        })?;
        Ok(PostgresHandle { client })
    }

    /// The underlying postgres client
    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }
}

impl Driver for PostgresHandle {
    fn execute(&mut self, sql: &str, params: &Params) -> Result<Cursor> {
        let (sql, slots) = match params {
            Params::None => (sql.to_string(), Vec::new()),
            _ => rewrite_placeholders(sql),
        };
        let args = args_for_slots(&slots, params)?;

        let stmt = self.client.prepare(&sql)?;
        let boxed = args
            .into_iter()
            .zip(stmt.params())
            .map(|(arg, ty)| {
                trace!(ty = %ty, "binding value");
                arg.into_sql(ty)
            })
            .collect::<Result<Vec<_>>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = boxed.iter().map(|b| &**b).collect();

        if stmt.columns().is_empty() {
            let affected = self.client.execute(&stmt, &refs)?;
            return Ok(Cursor::affected(affected));
        }

        let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();
        let rows = self.client.query(&stmt, &refs)?;
        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                record.push(decode_column(row, idx)?);
            }
            values.push(record);
        }
        Ok(Cursor::with_rows(columns, values))
    }

    fn begin_transaction(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK")?;
        Ok(())
    }

    fn last_insert_id(&mut self) -> Result<String> {
        let row = self.client.query_one("SELECT lastval()", &[])?;
        let id: i64 = row.try_get(0)?;
        Ok(id.to_string())
    }
}

/// Lazily-connecting PostgreSQL connector
pub struct PostgresConnector {
    config: PostgresConfig,
    handle: Option<PostgresHandle>,
}

impl PostgresConnector {
    pub fn new(config: PostgresConfig) -> Self {
        PostgresConnector {
            config,
            handle: None,
        }
    }

    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }
}

impl Connector for PostgresConnector {
    type Handle = PostgresHandle;

    fn connect(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        self.config
            .validate()
            .map_err(|e| LazydbError::Connection(e.to_string()))?;
        debug!(
            "Connecting to PostgreSQL at {}:{}/{}",
            self.config.host,
            self.config.port(),
            self.config.database
        );
        self.handle = Some(PostgresHandle::open(&self.config)?);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.handle.take().is_some() {
            debug!("Closed PostgreSQL connection to {}", self.config.host);
        }
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    fn handle(&mut self) -> Result<&mut PostgresHandle> {
        self.connect()?;
        self.handle
            .as_mut()
            .ok_or_else(|| LazydbError::Connection("PostgreSQL handle unavailable".to_string()))
    }

    fn options(&self) -> &ConnectorOptions {
        &self.config.options
    }
}
