// Postgres implementation of the link seam
//
// - connector: handshake, socket driver task, `Link` impl over `tokio_postgres::Client`
// - params: binding `SqlValue` parameters
// - query: decoding rows into `ResultSet`

pub mod connector;
pub mod params;
pub mod query;

pub use connector::{PgConnector, PgLink};
pub use params::Params;
pub use query::build_result_set;
