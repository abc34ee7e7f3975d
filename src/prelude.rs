//! Convenient imports for common functionality.
//!
//! This module re-exports the types most tests need, plus the `fields!` macro.

pub use crate::cleanup::{CleanupKind, CleanupReport, CleanupScope};
pub use crate::config::{ConnectorConfig, MultiDbConfig};
pub use crate::driver::{Connection, Driver};
pub use crate::error::MultiDbError;
pub use crate::fields;
pub use crate::lifecycle::TestScope;
pub use crate::multidb::{
    DatabaseOptions, Expectation, InsertOptions, InsertedKey, MultiDb, PkValue, PrimaryKey,
};
pub use crate::query_builder::{Columns, Upsert};
pub use crate::results::{DbRow, ResultSet};
pub use crate::transaction::TxOutcome;
pub use crate::types::{BoundValue, FieldValues, Literal, RowValues};
