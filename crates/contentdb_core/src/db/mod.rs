//! SQLite storage bootstrap for the document-store connector.
//!
//! # Responsibility
//! - Open and configure SQLite connections.
//! - Apply the connector's bookkeeping schema in deterministic order.
//!
//! # Invariants
//! - Bookkeeping schema version is tracked via `PRAGMA user_version`.
//! - Content is never read or written before bookkeeping migrations succeed.

use thiserror::Error;

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory, DEFAULT_BUSY_TIMEOUT};

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("database schema version {db_version} is newer than supported {latest_supported}")]
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}
