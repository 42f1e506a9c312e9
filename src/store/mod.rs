//! Persistence layer: libSQL-backed storage for accounts, messages, tasks and audit.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Database, Direction, StoredMessage};
