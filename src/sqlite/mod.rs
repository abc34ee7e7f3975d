// SQLite backend for the driver seam
//
// - connection: opening connections from a DSN and executing statements
// - params: bound parameter conversion
// - query: result extraction and building

pub mod connection;
pub mod params;
pub mod query;

pub use connection::SqliteConnection;
pub use params::Params as SqliteParams;
pub use query::build_result_set;
