//! Seed, inspect and clean up rows across several named databases from acceptance tests.
//!
//! A [`MultiDb`] engine holds one connection per configured connector. Tests choose a
//! connector, insert fixture rows (each registering a compensating delete), assert on what
//! is in the tables and optionally wrap their work in nested transactions. The lifecycle
//! hooks (or a [`TestScope`] guard) roll back leaked transactions and run the registered
//! cleanup, most recent first.
//!
//! Values whose text starts with `@asis ` (or [`Literal`]s) are rendered verbatim instead of
//! being bound, e.g. `"@asis NOW()"`.

pub mod cleanup;
pub mod config;
pub mod driver;
pub mod error;
pub mod lifecycle;
pub mod multidb;
pub mod normalize;
pub mod pool;
pub mod prelude;
pub mod query_builder;
pub mod results;
pub mod transaction;
pub mod types;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cleanup::{CleanupAction, CleanupKind, CleanupReport, CleanupScope};
pub use config::{ConnectorConfig, MultiDbConfig};
pub use driver::{Connection, DefaultDriver, Driver, DriverKind};
pub use error::MultiDbError;
pub use lifecycle::TestScope;
pub use multidb::{
    DatabaseOptions, Expectation, InsertOptions, InsertedKey, MultiDb, PkValue, PrimaryKey,
};
pub use query_builder::{BuiltStatement, Columns, QuoteIdentifier, QuoteStyle, Upsert};
pub use results::{DbRow, ResultSet};
pub use transaction::{TransactionState, TxOutcome};
pub use types::{BoundValue, FieldValues, Literal, RowValues};
