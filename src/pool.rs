use std::collections::HashMap;
use std::fmt;

use tracing::{debug, info};

use crate::config::MultiDbConfig;
use crate::driver::{Connection, DefaultDriver, Driver};
use crate::error::MultiDbError;

/// Lazily opened connections, one per connector, kept for the pool's lifetime.
///
/// The configured timezone is applied to each connection right after it is opened.
pub struct ConnectorPool {
    config: MultiDbConfig,
    driver: Box<dyn Driver>,
    connections: HashMap<String, Box<dyn Connection>>,
}

impl fmt::Debug for ConnectorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut open: Vec<_> = self.connections.keys().collect();
        open.sort();
        f.debug_struct("ConnectorPool")
            .field("config", &self.config)
            .field("open", &open)
            .finish_non_exhaustive()
    }
}

impl ConnectorPool {
    /// Pool using the drivers compiled into this crate.
    ///
    /// # Errors
    /// Returns `MultiDbError::ConfigError` if the configuration does not validate.
    pub fn new(config: MultiDbConfig) -> Result<Self, MultiDbError> {
        Self::with_driver(config, DefaultDriver)
    }

    /// Pool using a caller-supplied driver for every connector.
    ///
    /// # Errors
    /// Returns `MultiDbError::ConfigError` if the configuration does not validate.
    pub fn with_driver(
        config: MultiDbConfig,
        driver: impl Driver + 'static,
    ) -> Result<Self, MultiDbError> {
        config.validate()?;
        Ok(Self {
            config,
            driver: Box::new(driver),
            connections: HashMap::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &MultiDbConfig {
        &self.config
    }

    #[must_use]
    pub fn is_open(&self, connector: &str) -> bool {
        self.connections.contains_key(connector)
    }

    /// Get the connection for `connector`, opening it on first use.
    ///
    /// # Errors
    /// Returns `MultiDbError::ConfigError` for an unknown connector and
    /// `MultiDbError::ConnectionError` if opening or the timezone statement fails.
    pub fn get(&mut self, connector: &str) -> Result<&mut dyn Connection, MultiDbError> {
        if !self.connections.contains_key(connector) {
            let connection = self.open(connector)?;
            self.connections.insert(connector.to_string(), connection);
        }
        self.connections
            .get_mut(connector)
            .map(|conn| conn.as_mut() as &mut dyn Connection)
            .ok_or_else(|| {
                MultiDbError::ConnectionError(format!("connection for {connector} vanished"))
            })
    }

    fn open(&self, connector: &str) -> Result<Box<dyn Connection>, MultiDbError> {
        let Some(connector_config) = self.config.connector(connector) else {
            return Err(MultiDbError::ConfigError(format!(
                "The specified connector, {connector}, does not exist in the configuration"
            )));
        };

        let mut connection = self
            .driver
            .connect(connector, connector_config)
            .map_err(|e| creating_connection_error(connector, &e))?;
        connection
            .apply_timezone(&self.config.timezone)
            .map_err(|e| creating_connection_error(connector, &e))?;

        info!(connector, timezone = %self.config.timezone, "connection ready");
        Ok(connection)
    }

    /// Drop every open connection; they will be reopened on next use.
    pub fn close_all(&mut self) {
        debug!(count = self.connections.len(), "closing connections");
        self.connections.clear();
    }
}

fn creating_connection_error(connector: &str, err: &MultiDbError) -> MultiDbError {
    match err {
        MultiDbError::ConfigError(msg) => MultiDbError::ConfigError(msg.clone()),
        other => MultiDbError::ConnectionError(format!(
            "{other} while creating connection for {connector}"
        )),
    }
}
