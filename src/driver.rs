//! The database driver seam.
//!
//! A [`Driver`] opens one [`Connection`] per connector. Connections prepare and execute
//! statements with `?` placeholders, quote identifiers and report last-insert ids.

use clap::ValueEnum;
use tracing::info;

use crate::config::ConnectorConfig;
use crate::error::MultiDbError;
use crate::query_builder::QuoteIdentifier;
use crate::results::ResultSet;
use crate::types::BoundValue;

/// Backends recognised from a DSN scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum DriverKind {
    /// `SQLite` (`sqlite:<path>` or `sqlite::memory:`)
    Sqlite,
    /// MySQL/MariaDB (`mysql:host=...;dbname=...`)
    Mysql,
}

impl DriverKind {
    /// Pick the backend from the DSN scheme (the text before the first `:`).
    ///
    /// # Errors
    /// Returns `MultiDbError::ConfigError` if the scheme is missing or unknown.
    pub fn from_dsn(dsn: &str) -> Result<Self, MultiDbError> {
        let Some((scheme, _)) = dsn.split_once(':') else {
            return Err(MultiDbError::ConfigError(format!(
                "DSN '{dsn}' has no scheme prefix"
            )));
        };
        DriverKind::from_str(scheme, true)
            .map_err(|_| MultiDbError::ConfigError(format!("Unsupported DSN scheme '{scheme}'")))
    }
}

/// An open connection to one connector.
pub trait Connection: QuoteIdentifier {
    /// Prepare and execute `sql`, binding `params` to its `?` placeholders in order.
    ///
    /// Statements that produce columns return their rows; others report rows affected.
    ///
    /// # Errors
    /// Returns `MultiDbError::ExecutionError` (or a driver-specific variant) if preparing or
    /// executing the statement fails.
    fn execute(&mut self, sql: &str, params: &[BoundValue]) -> Result<ResultSet, MultiDbError>;

    /// Id generated by the most recent insert on this connection.
    ///
    /// # Errors
    /// May fail for tables without an auto-increment key; callers treat that as "unknown".
    fn last_insert_id(&mut self, table: &str) -> Result<i64, MultiDbError>;

    /// Apply the configured timezone to the session; called once right after connecting.
    ///
    /// # Errors
    /// Returns an error if the session statement fails.
    fn apply_timezone(&mut self, timezone: &str) -> Result<(), MultiDbError> {
        self.execute(&format!("SET time_zone = '{timezone}'"), &[])
            .map(|_| ())
    }
}

/// Opens connections for connectors.
pub trait Driver {
    /// # Errors
    /// Returns `MultiDbError::ConnectionError` or `MultiDbError::ConfigError` if the
    /// connection cannot be established.
    fn connect(
        &self,
        connector: &str,
        config: &ConnectorConfig,
    ) -> Result<Box<dyn Connection>, MultiDbError>;
}

/// Dispatches on the DSN scheme to the backends compiled into this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDriver;

impl Driver for DefaultDriver {
    fn connect(
        &self,
        connector: &str,
        config: &ConnectorConfig,
    ) -> Result<Box<dyn Connection>, MultiDbError> {
        let kind = config.driver_kind()?;
        info!(connector, ?kind, "opening connection");
        match kind {
            #[cfg(feature = "sqlite")]
            DriverKind::Sqlite => Ok(Box::new(crate::sqlite::SqliteConnection::open(config)?)),
            other => Err(MultiDbError::ConfigError(format!(
                "No built-in driver for {other:?} (connector '{connector}'); supply a custom Driver"
            ))),
        }
    }
}
