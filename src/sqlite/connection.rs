use std::fmt;

use rusqlite::{OptionalExtension, params};
use tracing::debug;

use crate::config::ConnectorConfig;
use crate::driver::Connection;
use crate::error::MultiDbError;
use crate::query_builder::{QuoteIdentifier, QuoteStyle};
use crate::results::ResultSet;
use crate::types::BoundValue;

use super::params::Params;
use super::query::build_result_set;

const MEMORY_PATH: &str = ":memory:";
const DEFAULT_SCHEMA: &str = "main";

/// A single `SQLite` connection opened from a `sqlite:` DSN.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    path: String,
}

impl SqliteConnection {
    /// Open `sqlite:<path>` (or `sqlite::memory:`). User and password are ignored.
    ///
    /// # Errors
    /// Returns `MultiDbError::ConfigError` for a non-`sqlite:` DSN and
    /// `MultiDbError::ConnectionError` if the database cannot be opened.
    pub fn open(config: &ConnectorConfig) -> Result<Self, MultiDbError> {
        let path = config
            .dsn
            .strip_prefix("sqlite:")
            .or_else(|| config.dsn.strip_prefix("SQLITE:"))
            .ok_or_else(|| {
                MultiDbError::ConfigError(format!("'{}' is not a sqlite DSN", config.dsn))
            })?;

        let opened = if path.is_empty() || path == MEMORY_PATH {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(path)
        };
        let conn = opened.map_err(|e| {
            MultiDbError::ConnectionError(format!("{e} while opening SQLite database '{path}'"))
        })?;

        Ok(Self {
            conn,
            path: path.to_string(),
        })
    }

    fn run(&mut self, sql: &str, params: &Params) -> Result<ResultSet, MultiDbError> {
        let mut stmt = self.conn.prepare(sql)?;
        if stmt.column_count() == 0 {
            let affected = stmt.execute(&params.as_refs()[..])?;
            Ok(ResultSet::affected(affected))
        } else {
            build_result_set(&mut stmt, params)
        }
    }

    /// The column aliasing `rowid` in `table`, if any.
    ///
    /// That is a rowid table whose primary key is a single column declared `INTEGER`.
    /// For every other table `last_insert_rowid()` says nothing about the key.
    fn rowid_alias(&self, table: &str) -> Result<Option<String>, rusqlite::Error> {
        let (schema, name) = table.rsplit_once('.').unwrap_or((DEFAULT_SCHEMA, table));
        let without_rowid: Option<bool> = self
            .conn
            .query_row(
                "SELECT wr FROM pragma_table_list WHERE schema = ?1 AND name = ?2 AND type = 'table'",
                params![schema, name],
                |row| row.get(0),
            )
            .optional()?;
        if without_rowid != Some(false) {
            return Ok(None);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT name, type FROM pragma_table_info(?1, ?2) WHERE pk > 0")?;
        let keys = stmt
            .query_map(params![name, schema], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match keys.as_slice() {
            [(column, declared)] if declared.eq_ignore_ascii_case("INTEGER") => Some(column.clone()),
            _ => None,
        })
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl QuoteIdentifier for SqliteConnection {
    fn quote_identifier(&self, name: &str) -> String {
        QuoteStyle::DoubleQuote.quote_identifier(name)
    }
}

impl Connection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[BoundValue]) -> Result<ResultSet, MultiDbError> {
        let converted = Params::convert(params);
        self.run(sql, &converted)
            .map_err(|e| MultiDbError::execution(sql, params, e.to_string()))
    }

    fn last_insert_id(&mut self, table: &str) -> Result<i64, MultiDbError> {
        match self.rowid_alias(table)? {
            Some(column) => {
                let id = self.conn.last_insert_rowid();
                debug!(table, column, id, "last insert rowid");
                Ok(id)
            }
            None => Err(MultiDbError::Other(format!(
                "table '{table}' has no INTEGER PRIMARY KEY aliasing rowid"
            ))),
        }
    }

    fn apply_timezone(&mut self, timezone: &str) -> Result<(), MultiDbError> {
        // SQLite has no session timezone; datetime functions are always UTC.
        debug!(path = %self.path, timezone, "sqlite ignores session timezone");
        Ok(())
    }
}
