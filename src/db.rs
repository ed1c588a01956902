//! Public database wrapper: a connector composed with the query executor and
//! the result shaper.
use crate::core::db::{
    fetch_every, fetch_grouped, fetch_one, hydrate_every, hydrate_one, Connector, Cursor,
    Driver, FetchStyle, GroupBy, Grouped, Hydrator, PostgresConfig, PostgresConnector,
    QueryExecutor, Record, SqliteConfig, SqliteConnector,
};
use crate::core::{Args, Result, Value};
use tracing::debug;

/// A database reached through a lazily-connecting connector.
///
/// Every operation connects first when needed. One instance must not be
/// shared between threads; open one per thread instead.
pub struct Database<C: Connector> {
    connector: C,
}

impl Database<SqliteConnector> {
    pub fn sqlite(config: SqliteConfig) -> Self {
        Database::new(SqliteConnector::new(config))
    }

    /// SQLite database at `path` with default options
    pub fn open_sqlite(path: impl Into<String>) -> Self {
        Database::sqlite(SqliteConfig::new(path))
    }
}

impl Database<PostgresConnector> {
    pub fn postgres(config: PostgresConfig) -> Self {
        Database::new(PostgresConnector::new(config))
    }
}

impl<C: Connector> Database<C> {
    pub fn new(connector: C) -> Self {
        Database { connector }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn connect(&mut self) -> Result<()> {
        self.connector.connect()
    }

    pub fn disconnect(&mut self) {
        self.connector.disconnect()
    }

    pub fn is_connected(&self) -> bool {
        self.connector.is_connected()
    }

    /// Live driver handle, connecting first when needed
    pub fn handle(&mut self) -> Result<&mut C::Handle> {
        self.connector.handle()
    }

    /// Runs `sql` with `args` and returns the cursor.
    pub fn query(&mut self, sql: &str, args: Args) -> Result<Cursor> {
        let empty_as_null = self.connector.options().empty_as_null;
        let handle = self.connector.handle()?;
        QueryExecutor::new(handle, empty_as_null).run(sql, args)
    }

    /// Runs a statement and returns the number of rows it changed.
    pub fn execute(&mut self, sql: &str, args: Args) -> Result<u64> {
        Ok(self.query(sql, args)?.row_count())
    }

    /// First row in the configured default style
    pub fn fetch(&mut self, sql: &str, args: Args) -> Result<Record> {
        let style = self.connector.options().fetch_style;
        self.fetch_with(sql, args, style)
    }

    /// First row in `style`. No row gives an empty record, or
    /// `Record::Column(None)` for column styles.
    pub fn fetch_with(&mut self, sql: &str, args: Args, style: FetchStyle) -> Result<Record> {
        let mut cursor = self.query(sql, args)?;
        fetch_one(&mut cursor, style)
    }

    /// Every row in the configured default style
    pub fn fetch_all(&mut self, sql: &str, args: Args) -> Result<Vec<Record>> {
        let style = self.connector.options().fetch_style;
        self.fetch_all_with(sql, args, style)
    }

    pub fn fetch_all_with(&mut self, sql: &str, args: Args, style: FetchStyle) -> Result<Vec<Record>> {
        let mut cursor = self.query(sql, args)?;
        let records = fetch_every(&mut cursor, style)?;
        debug!(rows = records.len(), "fetched rows");
        Ok(records)
    }

    /// First column of the first row, `None` when no row matched
    pub fn fetch_col(&mut self, sql: &str, args: Args) -> Result<Option<Value>> {
        Ok(self.fetch_with(sql, args, FetchStyle::Column(0))?.into_value())
    }

    /// Rows grouped by their first column, each group holding the second
    /// column's values
    pub fn fetch_group(&mut self, sql: &str, args: Args) -> Result<Grouped> {
        self.fetch_group_with(sql, args, GroupBy::default())
    }

    pub fn fetch_group_with(&mut self, sql: &str, args: Args, group: GroupBy) -> Result<Grouped> {
        let mut cursor = self.query(sql, args)?;
        fetch_grouped(&mut cursor, group)
    }

    /// Builds one object from the first row, `None` when no row matched.
    ///
    /// # Errors
    ///
    /// `LazydbError::Hydration` for an empty or malformed type name, raised
    /// before the query runs.
    pub fn fetch_object<F, T>(&mut self, sql: &str, args: Args, hydrator: &Hydrator<F>) -> Result<Option<T>>
    where
        F: Fn(Vec<Value>) -> Result<T>,
    {
        hydrator.validate()?;
        let mut cursor = self.query(sql, args)?;
        hydrate_one(&mut cursor, hydrator)
    }

    /// Builds one object per row.
    pub fn fetch_objects<F, T>(&mut self, sql: &str, args: Args, hydrator: &Hydrator<F>) -> Result<Vec<T>>
    where
        F: Fn(Vec<Value>) -> Result<T>,
    {
        hydrator.validate()?;
        let mut cursor = self.query(sql, args)?;
        let objects = hydrate_every(&mut cursor, hydrator)?;
        debug!(count = objects.len(), type_name = hydrator.type_name(), "hydrated objects");
        Ok(objects)
    }

    pub fn begin_transaction(&mut self) -> Result<()> {
        self.connector.handle()?.begin_transaction()
    }

    pub fn commit(&mut self) -> Result<()> {
        self.connector.handle()?.commit()
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.connector.handle()?.rollback()
    }

    /// Runs `f` inside a transaction and commits when it succeeds.
    ///
    /// An error from `f` is returned as-is and the transaction is left open;
    /// call [`Database::rollback`] to discard it.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.begin_transaction()?;
        let out = f(self)?;
        self.commit()?;
        Ok(out)
    }

    /// Identifier generated by the most recent insert
    pub fn last_insert_id(&mut self) -> Result<String> {
        self.connector.handle()?.last_insert_id()
    }
}
