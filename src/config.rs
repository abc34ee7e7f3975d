//! Connector configuration.
//!
//! ```rust
//! use multidb_fixtures::prelude::*;
//!
//! let config = MultiDbConfig::from_json_str(
//!     r#"{
//!         "connectors": {
//!             "Primary": { "dsn": "sqlite::memory:", "user": "", "password": "" }
//!         },
//!         "timezone": "Europe/London"
//!     }"#,
//! )
//! .unwrap();
//! assert_eq!(config.timezone, "Europe/London");
//! assert!(config.connector("Primary").is_some());
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::driver::DriverKind;
use crate::error::MultiDbError;

const REQUIRED_FIELDS: [&str; 3] = ["dsn", "user", "password"];

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Credentials for one named database endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub dsn: String,
    pub user: String,
    pub password: String,
}

impl ConnectorConfig {
    #[must_use]
    pub fn new(dsn: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// Backend implied by the DSN scheme.
    ///
    /// # Errors
    /// Returns `MultiDbError::ConfigError` for an unrecognised scheme.
    pub fn driver_kind(&self) -> Result<DriverKind, MultiDbError> {
        DriverKind::from_dsn(&self.dsn)
    }
}

/// All connectors plus the session timezone applied on first connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MultiDbConfig {
    pub connectors: BTreeMap<String, ConnectorConfig>,
    pub timezone: String,
}

impl Default for MultiDbConfig {
    fn default() -> Self {
        Self {
            connectors: BTreeMap::new(),
            timezone: default_timezone(),
        }
    }
}

// Lenient shape so missing fields can be reported together instead of one serde error at a time.
#[derive(Debug, Deserialize)]
struct RawConfig {
    connectors: Option<BTreeMap<String, BTreeMap<String, serde_json::Value>>>,
    #[serde(default = "default_timezone")]
    timezone: String,
}

impl MultiDbConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn connector(&self, name: &str) -> Option<&ConnectorConfig> {
        self.connectors.get(name)
    }

    /// Add or replace a connector.
    #[must_use]
    pub fn with_connector(mut self, name: impl Into<String>, connector: ConnectorConfig) -> Self {
        self.connectors.insert(name.into(), connector);
        self
    }

    #[must_use]
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    /// Parse and validate a JSON configuration document.
    ///
    /// # Errors
    /// Returns `MultiDbError::ConfigError` if the document is malformed, has no connectors, or
    /// a connector lacks `dsn`, `user` or `password`.
    pub fn from_json_str(json: &str) -> Result<Self, MultiDbError> {
        let raw: RawConfig = serde_json::from_str(json)
            .map_err(|e| MultiDbError::ConfigError(format!("Invalid configuration: {e}")))?;
        Self::from_raw(raw)
    }

    /// Build from an already parsed JSON value.
    ///
    /// # Errors
    /// Same as [`MultiDbConfig::from_json_str`].
    pub fn from_json_value(value: serde_json::Value) -> Result<Self, MultiDbError> {
        let raw: RawConfig = serde_json::from_value(value)
            .map_err(|e| MultiDbError::ConfigError(format!("Invalid configuration: {e}")))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, MultiDbError> {
        let Some(raw_connectors) = raw.connectors else {
            return Err(required_fields_error("connectors are missing"));
        };

        let mut connectors = BTreeMap::new();
        for (name, mut fields) in raw_connectors {
            let mut take = |field: &str| match fields.remove(field) {
                Some(serde_json::Value::String(s)) => Some(s),
                Some(serde_json::Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            };
            let (dsn, user, password) = (take("dsn"), take("user"), take("password"));
            match (dsn, user, password) {
                (Some(dsn), Some(user), Some(password)) => {
                    connectors.insert(name, ConnectorConfig { dsn, user, password });
                }
                _ => {
                    return Err(required_fields_error(&format!(
                        "connector '{name}' is incomplete"
                    )));
                }
            }
        }

        let config = MultiDbConfig {
            connectors,
            timezone: raw.timezone,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    /// Returns `MultiDbError::ConfigError` if there are no connectors or the timezone is empty.
    pub fn validate(&self) -> Result<(), MultiDbError> {
        if self.connectors.is_empty() {
            return Err(required_fields_error("no connectors are configured"));
        }
        if self.timezone.trim().is_empty() {
            return Err(MultiDbError::ConfigError("timezone must not be empty".into()));
        }
        // Quotes would break out of the session statement that applies the timezone.
        if self.timezone.contains('\'') {
            return Err(MultiDbError::ConfigError(format!(
                "invalid timezone '{}'",
                self.timezone
            )));
        }
        Ok(())
    }
}

fn required_fields_error(detail: &str) -> MultiDbError {
    MultiDbError::ConfigError(format!(
        "{detail}; options {} are required for every connector",
        REQUIRED_FIELDS.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_connectors_and_defaults_timezone() {
        let config = MultiDbConfig::from_json_value(json!({
            "connectors": {
                "Primary": { "dsn": "mysql:host=db;dbname=app", "user": "root", "password": "" },
                "Secondary": { "dsn": "sqlite::memory:", "user": "", "password": "" }
            }
        }))
        .unwrap();
        assert_eq!(config.timezone, "UTC");
        assert_eq!(config.connectors.len(), 2);
        assert_eq!(config.connector("Primary").unwrap().user, "root");
    }

    #[test]
    fn missing_required_field_is_a_config_error() {
        let err = MultiDbConfig::from_json_value(json!({
            "connectors": { "Primary": { "dsn": "sqlite::memory:", "user": "" } }
        }))
        .unwrap_err();
        match err {
            MultiDbError::ConfigError(msg) => {
                assert!(msg.contains("Primary"));
                assert!(msg.contains("dsn, user, password"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_or_empty_connectors_are_rejected() {
        assert!(matches!(
            MultiDbConfig::from_json_value(json!({ "timezone": "UTC" })),
            Err(MultiDbError::ConfigError(_))
        ));
        assert!(matches!(
            MultiDbConfig::from_json_value(json!({ "connectors": {} })),
            Err(MultiDbError::ConfigError(_))
        ));
        assert!(matches!(
            MultiDbConfig::from_json_str("not json"),
            Err(MultiDbError::ConfigError(_))
        ));
    }

    #[test]
    fn builder_validates() {
        let config = MultiDbConfig::new()
            .with_connector("Primary", ConnectorConfig::new("sqlite::memory:", "", ""))
            .with_timezone("+00:00");
        assert!(config.validate().is_ok());
        assert!(config.clone().with_timezone("x'y").validate().is_err());
        assert!(MultiDbConfig::new().validate().is_err());
    }
}
