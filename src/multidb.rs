//! The fixture engine.
//!
//! A [`MultiDb`] talks to one chosen connector at a time. Fixture rows it inserts register
//! compensating deletes that run when the test (or suite) finishes, and tests may wrap their
//! work in nested transactions on the chosen connector.
//!
//! ```rust
//! use multidb_fixtures::prelude::*;
//!
//! let config = MultiDbConfig::new()
//!     .with_connector("Primary", ConnectorConfig::new("sqlite::memory:", "", ""));
//! let mut db = MultiDb::new(config).unwrap();
//!
//! db.before_test("creates_a_user").unwrap();
//! db.connect_to("Primary").unwrap();
//! db.execute_sql("CREATE TABLE Users (ID INTEGER PRIMARY KEY AUTOINCREMENT, Email TEXT)", &[])
//!     .unwrap();
//!
//! let key = db
//!     .have_in_db("Users", &fields! { "Email" => "a@b.com" }, &InsertOptions::default())
//!     .unwrap();
//! assert_eq!(key, Some(InsertedKey::Id(1)));
//! db.see_in_db("Users", &fields! { "Email" => "a@b.com" }, Expectation::Exactly(1))
//!     .unwrap();
//!
//! let report = db.after_test("creates_a_user").unwrap();
//! assert_eq!(report.executed, 1);
//! ```

use std::fmt;

use tracing::{debug, warn};

use crate::cleanup::{CleanupAction, CleanupKind, CleanupRegistry, CleanupReport, CleanupScope};
use crate::config::MultiDbConfig;
use crate::driver::{Connection, Driver};
use crate::error::MultiDbError;
use crate::pool::ConnectorPool;
use crate::query_builder::{
    BuiltStatement, Columns, Upsert, build_delete, build_insert_many, build_insert_one,
    build_select, build_update,
};
use crate::results::ResultSet;
use crate::transaction::{TransactionState, TxOutcome, TxStatement};
use crate::types::{BoundValue, FieldValues, Literal, RowValues};

/// Primary key assumed by [`MultiDb::have_in_db`] when none is given.
pub const DEFAULT_PRIMARY_KEY: &str = "ID";

/// The primary key field(s) of a table.
///
/// A list with a single field behaves like `Single` except that the returned key is
/// wrapped as fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKey {
    Single(String),
    Compound(Vec<String>),
}

impl PrimaryKey {
    #[must_use]
    pub fn fields(&self) -> Vec<String> {
        match self {
            PrimaryKey::Single(field) => vec![field.clone()],
            PrimaryKey::Compound(fields) => fields.clone(),
        }
    }
}

impl Default for PrimaryKey {
    fn default() -> Self {
        PrimaryKey::Single(DEFAULT_PRIMARY_KEY.to_string())
    }
}

impl From<&str> for PrimaryKey {
    fn from(field: &str) -> Self {
        PrimaryKey::Single(field.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(field: String) -> Self {
        PrimaryKey::Single(field)
    }
}

impl From<Vec<&str>> for PrimaryKey {
    fn from(fields: Vec<&str>) -> Self {
        PrimaryKey::Compound(fields.into_iter().map(str::to_string).collect())
    }
}

/// Caller-supplied primary key value(s) identifying the inserted row for cleanup.
#[derive(Debug, Clone, PartialEq)]
pub enum PkValue {
    Single(RowValues),
    Compound(Vec<RowValues>),
}

impl PkValue {
    pub fn single(value: impl Into<RowValues>) -> Self {
        PkValue::Single(value.into())
    }

    pub fn compound<V: Into<RowValues>>(values: impl IntoIterator<Item = V>) -> Self {
        PkValue::Compound(values.into_iter().map(Into::into).collect())
    }

    /// A blank value is ignored and the key is discovered instead.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            PkValue::Single(value) => value.is_blank_key(),
            PkValue::Compound(values) => values.iter().all(RowValues::is_null),
        }
    }

    fn values(&self) -> Vec<RowValues> {
        match self {
            PkValue::Single(value) => vec![value.clone()],
            PkValue::Compound(values) => values.clone(),
        }
    }

    fn arity(&self) -> usize {
        match self {
            PkValue::Single(_) => 1,
            PkValue::Compound(values) => values.len(),
        }
    }
}

/// Options for [`MultiDb::have_in_db`].
#[derive(Debug, Clone, Default)]
pub struct InsertOptions {
    pub primary_key: PrimaryKey,
    pub pk_value_for_cleanup: Option<PkValue>,
    pub cleanup: CleanupScope,
    pub upsert: Upsert,
}

impl InsertOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn primary_key(mut self, primary_key: impl Into<PrimaryKey>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    #[must_use]
    pub fn cleanup_key(mut self, value: PkValue) -> Self {
        self.pk_value_for_cleanup = Some(value);
        self
    }

    #[must_use]
    pub fn cleanup(mut self, scope: CleanupScope) -> Self {
        self.cleanup = scope;
        self
    }

    #[must_use]
    pub fn upsert(mut self, upsert: impl Into<Upsert>) -> Self {
        self.upsert = upsert.into();
        self
    }
}

/// Key of a row inserted by [`MultiDb::have_in_db`].
#[derive(Debug, Clone, PartialEq)]
pub enum InsertedKey {
    /// Last-insert-id of a single-field key.
    Id(i64),
    /// Named key values: the id under a list-given key, or compound values taken from the row.
    Fields(FieldValues),
}

/// How many matching rows [`MultiDb::see_in_db`] expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Expectation {
    #[default]
    AtLeastOne,
    Exactly(u64),
}

/// Character set and collation for [`MultiDb::create_database`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseOptions {
    pub character_set: Option<String>,
    pub collation: Option<String>,
}

/// Multi-connector fixture engine; one per test worker.
#[derive(Debug)]
pub struct MultiDb {
    pool: ConnectorPool,
    current: Option<String>,
    tx: TransactionState,
    cleanup: CleanupRegistry,
}

impl MultiDb {
    /// Engine over the drivers compiled into this crate.
    ///
    /// # Errors
    /// Returns `MultiDbError::ConfigError` if the configuration does not validate.
    pub fn new(config: MultiDbConfig) -> Result<Self, MultiDbError> {
        Ok(Self::from_pool(ConnectorPool::new(config)?))
    }

    /// Engine over a caller-supplied driver.
    ///
    /// # Errors
    /// Returns `MultiDbError::ConfigError` if the configuration does not validate.
    pub fn with_driver(
        config: MultiDbConfig,
        driver: impl Driver + 'static,
    ) -> Result<Self, MultiDbError> {
        Ok(Self::from_pool(ConnectorPool::with_driver(config, driver)?))
    }

    #[must_use]
    pub fn from_pool(pool: ConnectorPool) -> Self {
        Self {
            pool,
            current: None,
            tx: TransactionState::new(),
            cleanup: CleanupRegistry::new(),
        }
    }

    #[must_use]
    pub fn pool(&self) -> &ConnectorPool {
        &self.pool
    }

    #[must_use]
    pub fn current_connector(&self) -> Option<&str> {
        self.current.as_deref()
    }

    #[must_use]
    pub fn transaction_state(&self) -> &TransactionState {
        &self.tx
    }

    #[must_use]
    pub fn pending_cleanup(&self, scope: CleanupScope) -> &[CleanupAction] {
        self.cleanup.pending(scope)
    }

    /// Choose `connector` for subsequent operations, connecting on first use.
    ///
    /// Returns the previously chosen connector, or `connector` itself if none was chosen.
    ///
    /// # Errors
    /// `ConfigError` for an unknown connector, `UsageError` when a transaction is open on
    /// another connector, `ConnectionError` if connecting fails.
    pub fn connect_to(&mut self, connector: &str) -> Result<String, MultiDbError> {
        self.tx.check(self.current.as_deref())?;
        self.tx.ensure_can_switch(connector)?;
        self.pool.get(connector)?;

        let previous = self.current.replace(connector.to_string());
        debug!(connector, previous = ?previous, "connector chosen");
        Ok(previous.unwrap_or_else(|| connector.to_string()))
    }

    /// Run `f` on `connector`, then switch back to the previous connector.
    ///
    /// If `f` fails the connector stays switched.
    ///
    /// # Errors
    /// Whatever switching or `f` returns.
    pub fn with_connector<T, F>(&mut self, connector: &str, f: F) -> Result<T, MultiDbError>
    where
        F: FnOnce(&mut Self) -> Result<T, MultiDbError>,
    {
        let previous = self.connect_to(connector)?;
        let value = f(self)?;
        self.connect_to(&previous)?;
        Ok(value)
    }

    fn connection(&mut self) -> Result<&mut dyn Connection, MultiDbError> {
        let Some(connector) = self.current.as_deref() else {
            return Err(MultiDbError::UsageError(
                "No connector was chosen before interactions with Db".into(),
            ));
        };
        self.pool.get(connector)
    }

    fn chosen(&self) -> Result<String, MultiDbError> {
        self.current.clone().ok_or_else(|| {
            MultiDbError::UsageError("No connector was chosen before interactions with Db".into())
        })
    }

    /// Quote a table, column or database name for the chosen connector.
    ///
    /// # Errors
    /// `UsageError` if no connector is chosen.
    pub fn quoted_name(&mut self, name: &str) -> Result<String, MultiDbError> {
        Ok(self.connection()?.quote_identifier(name))
    }

    /// Insert one fixture row and register its cleanup.
    ///
    /// The cleanup target is the caller's `pk_value_for_cleanup` when it is not blank;
    /// otherwise the last-insert-id for a single-field key; otherwise the key fields present
    /// (and non-null) in the row. When none applies no cleanup is registered.
    ///
    /// # Errors
    /// `UsageError` when the key value's shape does not match the key fields,
    /// `BuildError` for a malformed row, `ExecutionError` if the insert fails.
    pub fn have_in_db(
        &mut self,
        table: &str,
        row: &FieldValues,
        options: &InsertOptions,
    ) -> Result<Option<InsertedKey>, MultiDbError> {
        let pk_fields = options.primary_key.fields();
        if pk_fields.is_empty() {
            return Err(MultiDbError::UsageError(format!(
                "Empty primary key given for an insert into {table}"
            )));
        }
        if let Some(value) = &options.pk_value_for_cleanup {
            let shape_matches = match (&options.primary_key, value) {
                (PrimaryKey::Single(_), PkValue::Single(_)) => true,
                (PrimaryKey::Compound(_), PkValue::Compound(_)) => value.arity() == pk_fields.len(),
                (PrimaryKey::Compound(_), PkValue::Single(_)) => pk_fields.len() == 1,
                (PrimaryKey::Single(_), PkValue::Compound(_)) => false,
            };
            if !shape_matches {
                return Err(MultiDbError::UsageError(
                    "Incompatible primary key field and value; single field primary keys should specify a single value, and compound primary keys should specify as many values as fields".into(),
                ));
            }
        }

        let single_pk = match pk_fields.as_slice() {
            [pk] => Some(pk.clone()),
            _ => None,
        };

        let conn = self.connection()?;
        let stmt = build_insert_one(&*conn, table, row, &pk_fields, &options.upsert)?;
        execute_logged(conn, &stmt)?;

        let last_insert_id = if single_pk.is_some() {
            match conn.last_insert_id(table) {
                Ok(id) => Some(id),
                Err(err) => {
                    debug!(table, error = %err, "last insert id unavailable");
                    None
                }
            }
        } else {
            None
        };

        let mut row_key = None;
        let explicit = options
            .pk_value_for_cleanup
            .as_ref()
            .filter(|value| !value.is_blank());
        let target = match (explicit, &single_pk, last_insert_id) {
            (Some(value), _, _) => Some(
                pk_fields
                    .iter()
                    .cloned()
                    .zip(value.values())
                    .collect::<FieldValues>(),
            ),
            (None, Some(pk), Some(id)) if id != 0 => Some(FieldValues::new().with(pk.clone(), id)),
            (None, _, _) => {
                let present = pk_fields
                    .iter()
                    .all(|field| row.get(field).is_some_and(|value| !value.is_null()));
                if present {
                    let key: FieldValues = pk_fields
                        .iter()
                        .filter_map(|field| row.get(field).map(|value| (field.clone(), value.clone())))
                        .collect();
                    row_key = Some(key.clone());
                    Some(key)
                } else {
                    None
                }
            }
        };

        match target {
            Some(criteria) => {
                self.register_cleanup(CleanupKind::delete(table, criteria), options.cleanup)?;
            }
            None => debug!(table, "no key known for the inserted row; cleanup not registered"),
        }

        Ok(match (last_insert_id, single_pk, row_key) {
            (Some(id), Some(pk), _) => Some(match options.primary_key {
                PrimaryKey::Single(_) => InsertedKey::Id(id),
                PrimaryKey::Compound(_) => InsertedKey::Fields(FieldValues::new().with(pk, id)),
            }),
            (_, _, Some(key)) => Some(InsertedKey::Fields(key)),
            _ => None,
        })
    }

    /// Insert several same-shaped rows in one statement.
    ///
    /// A non-empty `cleanup_criteria` registers a `DELETE ... WHERE cleanup_criteria`.
    ///
    /// # Errors
    /// `BuildError` for an empty or ragged row list, `ExecutionError` if the insert fails.
    pub fn have_in_db_rows(
        &mut self,
        table: &str,
        rows: &[FieldValues],
        cleanup_criteria: Option<FieldValues>,
        cleanup: CleanupScope,
        upsert: &Upsert,
    ) -> Result<usize, MultiDbError> {
        let conn = self.connection()?;
        let stmt = build_insert_many(&*conn, table, rows, upsert)?;
        let inserted = execute_logged(conn, &stmt)?.rows_affected;

        if let Some(criteria) = cleanup_criteria.filter(|criteria| !criteria.is_empty()) {
            self.register_cleanup(CleanupKind::delete(table, criteria), cleanup)?;
        }
        Ok(inserted)
    }

    /// Update matching rows; returns the number of rows affected.
    ///
    /// # Errors
    /// `BuildError` without updates or criteria, `ExecutionError` if the update fails.
    pub fn have_updated_db(
        &mut self,
        table: &str,
        updates: &FieldValues,
        criteria: &FieldValues,
    ) -> Result<usize, MultiDbError> {
        let conn = self.connection()?;
        let stmt = build_update(&*conn, table, updates, criteria)?;
        Ok(execute_logged(conn, &stmt)?.rows_affected)
    }

    /// Delete matching rows; returns the number of rows affected.
    ///
    /// # Errors
    /// `BuildError` without criteria, `ExecutionError` if the delete fails.
    pub fn have_deleted_from_db(
        &mut self,
        table: &str,
        criteria: &FieldValues,
    ) -> Result<usize, MultiDbError> {
        let conn = self.connection()?;
        let stmt = build_delete(&*conn, table, criteria)?;
        Ok(execute_logged(conn, &stmt)?.rows_affected)
    }

    fn select(
        &mut self,
        table: &str,
        criteria: &FieldValues,
        columns: &Columns,
        limit: Option<u64>,
    ) -> Result<(BuiltStatement, ResultSet), MultiDbError> {
        let conn = self.connection()?;
        let stmt = build_select(&*conn, table, criteria, columns, limit)?;
        let rows = execute_logged(conn, &stmt)?;
        Ok((stmt, rows))
    }

    /// Fetch matching rows. `None` means no `LIMIT`.
    ///
    /// # Errors
    /// `ExecutionError` if the select fails.
    pub fn get_from_db(
        &mut self,
        table: &str,
        criteria: &FieldValues,
        limit: Option<u64>,
        columns: impl Into<Columns>,
    ) -> Result<ResultSet, MultiDbError> {
        self.select(table, criteria, &columns.into(), limit)
            .map(|(_, rows)| rows)
    }

    /// `SELECT COUNT(*)` over matching rows.
    ///
    /// # Errors
    /// `ExecutionError` if the count fails or returns no number.
    pub fn count_in_db(&mut self, table: &str, criteria: &FieldValues) -> Result<i64, MultiDbError> {
        let (stmt, rows) = self.select(table, criteria, &Columns::Raw("COUNT(*)".into()), None)?;
        rows.scalar()
            .and_then(RowValues::to_i64)
            .ok_or_else(|| MultiDbError::execution(&stmt.sql, &stmt.params, "COUNT(*) returned no number"))
    }

    /// Assert how many rows match `criteria`.
    ///
    /// # Errors
    /// `AssertionFailed` when the count does not meet `expected`.
    pub fn see_in_db(
        &mut self,
        table: &str,
        criteria: &FieldValues,
        expected: Expectation,
    ) -> Result<(), MultiDbError> {
        let count = self.count_in_db(table, criteria)?;
        let failure = match expected {
            Expectation::AtLeastOne if count < 1 => Some("No matching records found".to_string()),
            Expectation::Exactly(0) if count > 0 => {
                Some(format!("Matching records were found ({count})"))
            }
            Expectation::Exactly(n) if i64::try_from(n).ok() != Some(count) => Some(format!(
                "No given number of matching records found (expected {n}, found {count})"
            )),
            _ => None,
        };
        match failure {
            Some(message) => Err(MultiDbError::AssertionFailed(format!("{message} in {table}"))),
            None => Ok(()),
        }
    }

    /// Assert that no row matches `criteria`.
    ///
    /// # Errors
    /// `AssertionFailed` when a matching row exists.
    pub fn dont_see_in_db(&mut self, table: &str, criteria: &FieldValues) -> Result<(), MultiDbError> {
        self.see_in_db(table, criteria, Expectation::Exactly(0))
    }

    /// Run raw SQL with `?` placeholders on the chosen connector.
    ///
    /// # Errors
    /// `ExecutionError` if the statement fails.
    pub fn execute_sql(&mut self, sql: &str, params: &[RowValues]) -> Result<ResultSet, MultiDbError> {
        let params: Vec<BoundValue> = params.iter().map(RowValues::to_bound).collect();
        self.execute_bound(sql, &params)
    }

    fn execute_bound(&mut self, sql: &str, params: &[BoundValue]) -> Result<ResultSet, MultiDbError> {
        let conn = self.connection()?;
        execute_logged(
            conn,
            &BuiltStatement {
                sql: sql.to_string(),
                params: params.to_vec(),
            },
        )
    }

    /// `CREATE DATABASE`, registering a `DROP DATABASE` for `cleanup`.
    ///
    /// # Errors
    /// `ExecutionError` if the statement fails.
    pub fn create_database(
        &mut self,
        database: &str,
        options: &DatabaseOptions,
        cleanup: CleanupScope,
    ) -> Result<(), MultiDbError> {
        let quoted = self.quoted_name(database)?;
        let mut sql = format!("CREATE DATABASE {quoted}");
        if let Some(character_set) = &options.character_set {
            sql.push_str(&format!(" CHARACTER SET {character_set}"));
        }
        if let Some(collation) = &options.collation {
            sql.push_str(&format!(" COLLATE {collation}"));
        }
        self.execute_bound(&sql, &[])?;
        self.register_cleanup(
            CleanupKind::run_sql(format!("DROP DATABASE {quoted}"), Vec::new()),
            cleanup,
        )
    }

    /// `CREATE TABLE table LIKE template`, registering a `DROP TABLE` for `cleanup`.
    ///
    /// # Errors
    /// `ExecutionError` if the statement fails.
    pub fn create_table_like(
        &mut self,
        template: &str,
        table: &str,
        cleanup: CleanupScope,
    ) -> Result<(), MultiDbError> {
        let quoted_table = self.quoted_name(table)?;
        let quoted_template = self.quoted_name(template)?;
        self.execute_bound(&format!("CREATE TABLE {quoted_table} LIKE {quoted_template}"), &[])?;
        self.register_cleanup(
            CleanupKind::run_sql(format!("DROP TABLE {quoted_table}"), Vec::new()),
            cleanup,
        )
    }

    /// Next auto-increment value of `table`, read from `information_schema.TABLES`.
    ///
    /// Without `database` the connection's current database (`DATABASE()`) is used.
    ///
    /// # Errors
    /// `ExecutionError` if the lookup fails or finds nothing.
    pub fn latest_auto_increment_id(
        &mut self,
        table: &str,
        database: Option<&str>,
    ) -> Result<i64, MultiDbError> {
        let schema = match database {
            Some(name) => RowValues::from(name),
            None => RowValues::AsIs(Literal::new("DATABASE()")),
        };
        let criteria = FieldValues::new()
            .with("TABLE_NAME", table)
            .with("TABLE_SCHEMA", schema);
        let (stmt, rows) = self.select(
            "information_schema.TABLES",
            &criteria,
            &Columns::from(vec!["AUTO_INCREMENT"]),
            Some(1),
        )?;

        rows.results
            .first()
            .and_then(|row| row.get("AUTO_INCREMENT"))
            .and_then(RowValues::to_i64)
            .ok_or_else(|| {
                MultiDbError::execution(
                    &stmt.sql,
                    &stmt.params,
                    format!(
                        "Failed to retrieve the latest auto-increment ID for `{}`.`{table}`",
                        database.unwrap_or("<Current Database>")
                    ),
                )
            })
    }

    /// Queue a compensating action bound to the chosen connector.
    ///
    /// # Errors
    /// `UsageError` if no connector is chosen.
    pub fn register_cleanup(
        &mut self,
        kind: CleanupKind,
        scope: CleanupScope,
    ) -> Result<(), MultiDbError> {
        let action = CleanupAction {
            connector: self.chosen()?,
            kind,
        };
        debug!(connector = %action.connector, ?scope, kind = ?action.kind, "cleanup registered");
        self.cleanup.push(scope, action);
        Ok(())
    }

    fn issue(&mut self, statement: TxStatement) -> Result<(), MultiDbError> {
        self.execute_bound(statement.sql(), &[]).map(|_| ())
    }

    /// Begin a transaction on the chosen connector, or nest one level deeper.
    ///
    /// # Errors
    /// `UsageError` if no connector is chosen, `InvalidTransactionState` (fatal) if the
    /// bookkeeping is broken, `ExecutionError` if `BEGIN` fails.
    pub fn start_transaction(&mut self) -> Result<(), MultiDbError> {
        if let Some(statement) = self.tx.start(self.current.as_deref())? {
            if let Err(err) = self.issue(statement) {
                self.tx.reset();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Leave one nesting level; the outermost level issues `COMMIT`.
    ///
    /// # Errors
    /// `UsageError` when no transaction is open, `ExecutionError` if `COMMIT` fails.
    pub fn commit_transaction(&mut self) -> Result<(), MultiDbError> {
        match self.tx.commit(self.current.as_deref())? {
            Some(statement) => self.issue(statement),
            None => Ok(()),
        }
    }

    /// Roll back the whole transaction, whatever the nesting level.
    ///
    /// # Errors
    /// `UsageError` when no transaction is open, `ExecutionError` if `ROLLBACK` fails.
    pub fn rollback_transaction(&mut self) -> Result<(), MultiDbError> {
        let statement = self.tx.rollback(self.current.as_deref())?;
        self.issue(statement)
    }

    /// Run `f` inside a transaction: commit when it succeeds, roll back when it fails.
    ///
    /// The block's own error comes back as [`TxOutcome::RolledBack`] after the rollback.
    ///
    /// # Errors
    /// Errors from starting or committing the transaction itself, and `RollbackFailed`
    /// (carrying the block's error) when the rollback after a failed block fails.
    pub fn transaction<T, E, F>(&mut self, f: F) -> Result<TxOutcome<T, E>, MultiDbError>
    where
        E: fmt::Display,
        F: FnOnce(&mut Self) -> Result<T, E>,
    {
        debug!(connector = ?self.current, "running block in transaction");
        self.start_transaction()?;
        match f(self) {
            Ok(value) => {
                self.commit_transaction()?;
                Ok(TxOutcome::Committed(value))
            }
            Err(err) => {
                if self.tx.is_active() {
                    if let Err(rollback) = self.rollback_transaction() {
                        warn!(block_error = %err, error = %rollback, "rollback after failed block failed");
                        return Err(MultiDbError::RollbackFailed {
                            block: err.to_string(),
                            rollback: Box::new(rollback),
                        });
                    }
                }
                Ok(TxOutcome::RolledBack(err))
            }
        }
    }

    /// Call before each test. A transaction left open by an earlier test is rolled back and
    /// reported.
    ///
    /// # Errors
    /// `LeakedTransaction` when a transaction was still open.
    pub fn before_test(&mut self, test: &str) -> Result<(), MultiDbError> {
        if !self.tx.is_active() {
            return Ok(());
        }
        warn!(test, level = self.tx.level(), "unfinished transaction found before test; rolling back");
        self.rollback_transaction()?;
        Err(MultiDbError::LeakedTransaction {
            when: "before",
            test: test.to_string(),
        })
    }

    /// Call after each test: roll back a leaked transaction, run test-scoped cleanup
    /// (most recent first) and forget the chosen connector.
    ///
    /// # Errors
    /// `LeakedTransaction` after cleanup when the test left a transaction open; the
    /// fatal `InvalidTransactionState` if the bookkeeping was broken.
    pub fn after_test(&mut self, test: &str) -> Result<CleanupReport, MultiDbError> {
        let leaked = self.tx.is_active();
        let mut fatal = None;
        if leaked {
            warn!(test, level = self.tx.level(), "unfinished transaction found after test; rolling back");
            if let Err(err) = self.rollback_transaction() {
                warn!(test, error = %err, "rollback of unfinished transaction failed");
                self.tx.reset();
                fatal = err.is_fatal().then_some(err);
            }
        }

        let report = self.drain_cleanup(CleanupScope::AfterTest);
        self.current = None;

        if let Some(err) = fatal {
            return Err(err);
        }
        if leaked {
            return Err(MultiDbError::LeakedTransaction {
                when: "after",
                test: test.to_string(),
            });
        }
        Ok(report)
    }

    /// Call once after the suite: run suite-scoped cleanup, most recent first.
    pub fn after_suite(&mut self) -> CleanupReport {
        self.drain_cleanup(CleanupScope::AfterSuite)
    }

    /// Call when a test fails: roll back any open transaction without further reporting.
    pub fn on_test_failed(&mut self, test: &str) {
        if self.tx.is_active() {
            debug!(test, "rolling back transaction of failed test");
            if let Err(err) = self.rollback_transaction() {
                warn!(test, error = %err, "rollback after failed test did not succeed");
                self.tx.reset();
            }
        }
    }

    fn drain_cleanup(&mut self, scope: CleanupScope) -> CleanupReport {
        let actions = self.cleanup.drain(scope);
        let previous = self.current.clone();
        let mut report = CleanupReport::default();

        for action in actions {
            debug!(connector = %action.connector, ?scope, kind = ?action.kind, "cleanup");
            match self.run_cleanup(&action) {
                Ok(()) => report.executed += 1,
                Err(err) => {
                    warn!(connector = %action.connector, error = %err, "cleanup action failed");
                    report.failures.push((action, err));
                }
            }
        }

        self.current = previous;
        report
    }

    fn run_cleanup(&mut self, action: &CleanupAction) -> Result<(), MultiDbError> {
        self.connect_to(&action.connector)?;
        match &action.kind {
            CleanupKind::RunSql { sql, params } => self.execute_bound(sql, params).map(|_| ()),
            CleanupKind::Delete { table, criteria } => {
                self.have_deleted_from_db(table, criteria).map(|_| ())
            }
        }
    }
}

fn execute_logged(
    conn: &mut dyn Connection,
    stmt: &BuiltStatement,
) -> Result<ResultSet, MultiDbError> {
    debug!(query = %stmt.sql, params = ?stmt.params, "executing");
    conn.execute(&stmt.sql, &stmt.params).map_err(|err| match err {
        err @ MultiDbError::ExecutionError { .. } => err,
        other => MultiDbError::execution(&stmt.sql, &stmt.params, other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectorConfig;
    use crate::fields;
    use crate::test_utils::RecordingDriver;

    fn engine() -> (MultiDb, RecordingDriver) {
        let driver = RecordingDriver::new();
        let config = MultiDbConfig::new()
            .with_connector("Primary", ConnectorConfig::new("mysql:host=a;dbname=app", "root", ""))
            .with_connector("Secondary", ConnectorConfig::new("mysql:host=b;dbname=app", "root", ""));
        let db = MultiDb::with_driver(config, driver.clone()).unwrap();
        (db, driver)
    }

    fn connected() -> (MultiDb, RecordingDriver) {
        let (mut db, driver) = engine();
        db.connect_to("Primary").unwrap();
        driver.clear();
        (db, driver)
    }

    #[test]
    fn connect_to_returns_previous_connector() {
        let (mut db, driver) = engine();
        assert!(!db.pool().is_open("Primary"));
        assert_eq!(db.connect_to("Primary").unwrap(), "Primary");
        assert_eq!(db.connect_to("Secondary").unwrap(), "Primary");
        assert_eq!(db.current_connector(), Some("Secondary"));
        assert!(db.pool().is_open("Primary") && db.pool().is_open("Secondary"));
        assert_eq!(
            driver.sql_log(),
            vec!["SET time_zone = 'UTC'", "SET time_zone = 'UTC'"]
        );

        let err = db.connect_to("Missing").unwrap_err();
        assert!(matches!(err, MultiDbError::ConfigError(msg) if msg.contains("Missing")));
        assert_eq!(db.current_connector(), Some("Secondary"));
    }

    #[test]
    fn operations_need_a_chosen_connector() {
        let (mut db, _) = engine();
        let err = db.execute_sql("SELECT 1", &[]).unwrap_err();
        assert!(matches!(err, MultiDbError::UsageError(_)));
        assert!(matches!(db.start_transaction(), Err(MultiDbError::UsageError(_))));
    }

    #[test]
    fn have_in_db_registers_delete_by_last_insert_id() {
        let (mut db, driver) = connected();
        driver.set_last_insert_id("Users", 42);

        let key = db
            .have_in_db(
                "Users",
                &fields! { "Email" => "a@b.com", "Created" => "@asis NOW()" },
                &InsertOptions::new(),
            )
            .unwrap();
        assert_eq!(key, Some(InsertedKey::Id(42)));
        assert_eq!(
            driver.statements()[0].sql,
            "INSERT INTO `Users` (`Email`, `Created`) VALUES (?, NOW())"
        );

        let pending = db.pending_cleanup(CleanupScope::AfterTest);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].connector, "Primary");
        assert_eq!(
            pending[0].kind,
            CleanupKind::delete("Users", fields! { "ID" => 42i64 })
        );
    }

    #[test]
    fn explicit_cleanup_key_wins_unless_blank() {
        let (mut db, driver) = connected();
        driver.set_last_insert_id("Users", 7);

        db.have_in_db(
            "Users",
            &fields! { "Email" => "x" },
            &InsertOptions::new().cleanup_key(PkValue::single(99)),
        )
        .unwrap();
        db.have_in_db(
            "Users",
            &fields! { "Email" => "y" },
            &InsertOptions::new().cleanup_key(PkValue::single(0)),
        )
        .unwrap();

        let pending = db.pending_cleanup(CleanupScope::AfterTest);
        assert_eq!(pending[0].kind, CleanupKind::delete("Users", fields! { "ID" => 99 }));
        assert_eq!(pending[1].kind, CleanupKind::delete("Users", fields! { "ID" => 7i64 }));
    }

    #[test]
    fn compound_key_taken_from_row() {
        let (mut db, _) = connected();
        let key = db
            .have_in_db(
                "Memberships",
                &fields! { "UserID" => 1, "GroupID" => 2, "Role" => "admin" },
                &InsertOptions::new().primary_key(vec!["UserID", "GroupID"]),
            )
            .unwrap();
        let expected = fields! { "UserID" => 1, "GroupID" => 2 };
        assert_eq!(key, Some(InsertedKey::Fields(expected.clone())));
        assert_eq!(
            db.pending_cleanup(CleanupScope::AfterTest)[0].kind,
            CleanupKind::delete("Memberships", expected)
        );
    }

    #[test]
    fn no_key_means_no_cleanup() {
        let (mut db, _) = connected();
        let key = db
            .have_in_db(
                "Memberships",
                &fields! { "UserID" => 1, "GroupID" => RowValues::Null },
                &InsertOptions::new().primary_key(vec!["UserID", "GroupID"]),
            )
            .unwrap();
        assert_eq!(key, None);
        assert!(db.pending_cleanup(CleanupScope::AfterTest).is_empty());
    }

    #[test]
    fn mismatched_key_shape_is_a_usage_error() {
        let (mut db, driver) = connected();
        let err = db
            .have_in_db(
                "Memberships",
                &fields! { "UserID" => 1 },
                &InsertOptions::new()
                    .primary_key(vec!["UserID", "GroupID"])
                    .cleanup_key(PkValue::compound([1])),
            )
            .unwrap_err();
        assert!(matches!(err, MultiDbError::UsageError(_)));
        assert!(driver.statements().is_empty());
    }

    #[test]
    fn list_given_key_wraps_the_id() {
        let (mut db, driver) = connected();
        driver.set_last_insert_id("Posts", 5);
        let key = db
            .have_in_db(
                "Posts",
                &fields! { "Title" => "t" },
                &InsertOptions::new()
                    .primary_key(vec!["PostID"])
                    .cleanup(CleanupScope::Never),
            )
            .unwrap();
        assert_eq!(key, Some(InsertedKey::Fields(fields! { "PostID" => 5i64 })));
        assert!(db.pending_cleanup(CleanupScope::AfterTest).is_empty());
    }

    #[test]
    fn see_in_db_expectations() {
        let (mut db, driver) = connected();
        driver.respond_to("COUNT(*)", ResultSet::from_rows(vec!["COUNT(*)".into()], vec![vec![RowValues::Int(2)]]));
        let criteria = fields! { "Flag" => RowValues::Null };

        db.see_in_db("Users", &criteria, Expectation::AtLeastOne).unwrap();
        db.see_in_db("Users", &criteria, Expectation::Exactly(2)).unwrap();
        assert!(matches!(
            db.see_in_db("Users", &criteria, Expectation::Exactly(3)),
            Err(MultiDbError::AssertionFailed(_))
        ));
        assert!(matches!(
            db.dont_see_in_db("Users", &criteria),
            Err(MultiDbError::AssertionFailed(_))
        ));
        assert_eq!(
            driver.statements()[0].sql,
            "SELECT COUNT(*) FROM `Users` WHERE `Flag` IS ?"
        );
        assert_eq!(driver.statements()[0].params, vec![BoundValue::Null]);
    }

    #[test]
    fn transaction_block_commits_once() {
        let (mut db, driver) = connected();
        let outcome = db
            .transaction(|db| {
                db.start_transaction()?;
                db.execute_sql("UPDATE t SET a = ?", &[RowValues::Int(1)])?;
                db.commit_transaction()?;
                Ok::<_, MultiDbError>("done")
            })
            .unwrap();
        assert!(matches!(outcome, TxOutcome::Committed("done")));
        assert_eq!(driver.sql_log(), vec!["BEGIN", "UPDATE t SET a = ?", "COMMIT"]);
        assert!(!db.transaction_state().is_active());
    }

    #[test]
    fn failed_block_rolls_back_before_returning() {
        let (mut db, driver) = connected();
        let outcome = db
            .transaction(|db| {
                db.start_transaction()?;
                db.start_transaction()?;
                Err::<(), _>(MultiDbError::Other("boom".into()))
            })
            .unwrap();
        assert!(matches!(outcome, TxOutcome::RolledBack(MultiDbError::Other(_))));
        assert_eq!(driver.sql_log(), vec!["BEGIN", "ROLLBACK"]);
        assert_eq!(db.transaction_state().level(), 0);
    }

    #[test]
    fn failed_rollback_keeps_the_block_error() {
        let (mut db, driver) = connected();
        driver.fail_on("ROLLBACK");
        let err = db
            .transaction(|db| {
                db.execute_sql("UPDATE t SET a = ?", &[RowValues::Int(1)])?;
                Err::<(), _>(MultiDbError::Other("boom".into()))
            })
            .unwrap_err();
        match &err {
            MultiDbError::RollbackFailed { block, rollback } => {
                assert_eq!(block, "Other database error: boom");
                assert!(matches!(**rollback, MultiDbError::ExecutionError { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("boom"));
        assert!(!db.transaction_state().is_active());
    }

    #[test]
    fn cannot_switch_connector_mid_transaction() {
        let (mut db, _) = connected();
        db.start_transaction().unwrap();
        assert!(matches!(db.connect_to("Secondary"), Err(MultiDbError::UsageError(_))));
        assert_eq!(db.connect_to("Primary").unwrap(), "Primary");
        db.rollback_transaction().unwrap();
        assert!(db.connect_to("Secondary").is_ok());
    }

    #[test]
    fn after_test_rolls_back_cleans_up_then_fails() {
        let (mut db, driver) = connected();
        db.register_cleanup(CleanupKind::run_sql("DELETE FROM A", vec![]), CleanupScope::AfterTest)
            .unwrap();
        db.connect_to("Secondary").unwrap();
        db.register_cleanup(CleanupKind::run_sql("DELETE FROM B", vec![]), CleanupScope::AfterTest)
            .unwrap();
        db.start_transaction().unwrap();
        db.start_transaction().unwrap();
        driver.clear();

        let err = db.after_test("leaky").unwrap_err();
        assert!(matches!(err, MultiDbError::LeakedTransaction { when: "after", .. }));
        assert_eq!(driver.sql_log(), vec!["ROLLBACK", "DELETE FROM B", "DELETE FROM A"]);
        let connectors: Vec<_> = driver.statements().into_iter().map(|s| s.connector).collect();
        assert_eq!(connectors, vec!["Secondary", "Secondary", "Primary"]);
        assert_eq!(db.current_connector(), None);
        assert!(db.pending_cleanup(CleanupScope::AfterTest).is_empty());
    }

    #[test]
    fn cleanup_failures_do_not_stop_the_rest() {
        let (mut db, driver) = connected();
        for sql in ["DELETE FROM A", "DELETE FROM B", "DELETE FROM C"] {
            db.register_cleanup(CleanupKind::run_sql(sql, vec![]), CleanupScope::AfterSuite)
                .unwrap();
        }
        driver.fail_on("FROM B");

        let report = db.after_suite();
        assert_eq!(report.executed, 2);
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_clean());
        assert_eq!(
            driver.sql_log(),
            vec!["DELETE FROM C", "DELETE FROM B", "DELETE FROM A"]
        );
        assert_eq!(db.current_connector(), Some("Primary"));
    }

    #[test]
    fn before_test_reports_leaked_transaction() {
        let (mut db, driver) = connected();
        db.start_transaction().unwrap();
        let err = db.before_test("next").unwrap_err();
        assert!(matches!(err, MultiDbError::LeakedTransaction { when: "before", .. }));
        assert!(!db.transaction_state().is_active());
        assert_eq!(driver.sql_log(), vec!["BEGIN", "ROLLBACK"]);

        db.start_transaction().unwrap();
        db.on_test_failed("next");
        assert!(!db.transaction_state().is_active());
        assert!(db.before_test("after").is_ok());
    }

    #[test]
    fn create_database_and_table_like() {
        let (mut db, driver) = connected();
        db.create_database(
            "Blog",
            &DatabaseOptions {
                character_set: Some("utf8mb4".into()),
                collation: Some("utf8mb4_bin".into()),
            },
            CleanupScope::AfterSuite,
        )
        .unwrap();
        db.create_table_like("Posts", "Blog.Posts_Copy", CleanupScope::AfterTest)
            .unwrap();
        assert_eq!(
            driver.sql_log(),
            vec![
                "CREATE DATABASE `Blog` CHARACTER SET utf8mb4 COLLATE utf8mb4_bin",
                "CREATE TABLE `Blog`.`Posts_Copy` LIKE `Posts`",
            ]
        );
        assert_eq!(
            db.pending_cleanup(CleanupScope::AfterSuite)[0].kind,
            CleanupKind::run_sql("DROP DATABASE `Blog`", vec![])
        );
        assert_eq!(
            db.pending_cleanup(CleanupScope::AfterTest)[0].kind,
            CleanupKind::run_sql("DROP TABLE `Blog`.`Posts_Copy`", vec![])
        );
    }

    #[test]
    fn latest_auto_increment_id_reads_information_schema() {
        let (mut db, driver) = connected();
        let err = db.latest_auto_increment_id("Users", Some("Other")).unwrap_err();
        assert!(matches!(err, MultiDbError::ExecutionError { message, .. } if message.contains("`Other`.`Users`")));

        driver.clear();
        driver.respond_to(
            "information_schema",
            ResultSet::from_rows(vec!["AUTO_INCREMENT".into()], vec![vec![RowValues::Text("18".into())]]),
        );
        assert_eq!(db.latest_auto_increment_id("Users", None).unwrap(), 18);
        assert_eq!(
            driver.statements()[0].sql,
            "SELECT `AUTO_INCREMENT` FROM `information_schema`.`TABLES` WHERE `TABLE_NAME` = ? AND `TABLE_SCHEMA` = DATABASE() LIMIT 1"
        );
        assert_eq!(driver.statements()[0].params, vec![BoundValue::from("Users")]);
    }

    #[test]
    fn with_connector_switches_back() {
        let (mut db, driver) = connected();
        let rows = db
            .with_connector("Secondary", |db| db.have_deleted_from_db("Posts", &fields! { "ID" => 3 }))
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(db.current_connector(), Some("Primary"));
        let last = driver.statements().pop().unwrap();
        assert_eq!(last.connector, "Secondary");
        assert_eq!(last.sql, "DELETE FROM `Posts` WHERE `ID` = ?");
    }
}
