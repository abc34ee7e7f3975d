//! An in-memory driver for exercising the engine without a database server.
//!
//! [`RecordingDriver`] quotes identifiers MySQL-style and records every statement its
//! connections execute. Clones share the same recording, so a test keeps one clone for
//! assertions and hands the other to [`MultiDb::with_driver`](crate::MultiDb::with_driver).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::ConnectorConfig;
use crate::driver::{Connection, Driver};
use crate::error::MultiDbError;
use crate::query_builder::{QuoteIdentifier, QuoteStyle};
use crate::results::ResultSet;
use crate::types::BoundValue;

/// One statement as a connection received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStatement {
    pub connector: String,
    pub sql: String,
    pub params: Vec<BoundValue>,
}

#[derive(Debug, Default)]
struct Recording {
    statements: Vec<RecordedStatement>,
    connects: Vec<String>,
    responses: Vec<(String, ResultSet)>,
    failures: Vec<String>,
    last_insert_ids: HashMap<String, i64>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingDriver {
    state: Arc<Mutex<Recording>>,
}

impl RecordingDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Recording> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve `result` for every statement containing `sql_fragment`. Later registrations win.
    pub fn respond_to(&self, sql_fragment: impl Into<String>, result: ResultSet) {
        self.state().responses.push((sql_fragment.into(), result));
    }

    /// Fail every statement containing `sql_fragment` with an execution error.
    pub fn fail_on(&self, sql_fragment: impl Into<String>) {
        self.state().failures.push(sql_fragment.into());
    }

    pub fn set_last_insert_id(&self, table: impl Into<String>, id: i64) {
        self.state().last_insert_ids.insert(table.into(), id);
    }

    #[must_use]
    pub fn statements(&self) -> Vec<RecordedStatement> {
        self.state().statements.clone()
    }

    #[must_use]
    pub fn sql_log(&self) -> Vec<String> {
        self.state()
            .statements
            .iter()
            .map(|statement| statement.sql.clone())
            .collect()
    }

    /// Connectors opened so far, in order.
    #[must_use]
    pub fn connects(&self) -> Vec<String> {
        self.state().connects.clone()
    }

    /// Forget recorded statements; responses and failures stay configured.
    pub fn clear(&self) {
        self.state().statements.clear();
    }
}

impl Driver for RecordingDriver {
    fn connect(
        &self,
        connector: &str,
        _config: &ConnectorConfig,
    ) -> Result<Box<dyn Connection>, MultiDbError> {
        self.state().connects.push(connector.to_string());
        Ok(Box::new(RecordingConnection {
            connector: connector.to_string(),
            driver: self.clone(),
        }))
    }
}

struct RecordingConnection {
    connector: String,
    driver: RecordingDriver,
}

impl QuoteIdentifier for RecordingConnection {
    fn quote_identifier(&self, name: &str) -> String {
        QuoteStyle::Backtick.quote_identifier(name)
    }
}

impl Connection for RecordingConnection {
    fn execute(&mut self, sql: &str, params: &[BoundValue]) -> Result<ResultSet, MultiDbError> {
        let mut state = self.driver.state();
        state.statements.push(RecordedStatement {
            connector: self.connector.clone(),
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        if state.failures.iter().any(|fragment| sql.contains(fragment.as_str())) {
            return Err(MultiDbError::execution(sql, params, "forced failure"));
        }

        Ok(state
            .responses
            .iter()
            .rev()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map_or_else(|| ResultSet::affected(1), |(_, result)| result.clone()))
    }

    fn last_insert_id(&mut self, table: &str) -> Result<i64, MultiDbError> {
        self.driver
            .state()
            .last_insert_ids
            .get(table)
            .copied()
            .ok_or_else(|| MultiDbError::Other(format!("no last insert id recorded for {table}")))
    }
}
