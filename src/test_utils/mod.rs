/// Scripted in-memory connector
pub mod memory;

/// Embedded `PostgreSQL` for live-database tests
#[cfg(feature = "test-utils-postgres")]
pub mod postgres;

pub use memory::MemoryConnector;
