//! Storage connectors.
//!
//! # Responsibility
//! - Define the connector capability set: lifecycle, per-model queries and
//!   migration hooks.
//! - Ship `sqlite` and `memory` document-store connectors.
//!
//! # Invariants
//! - A connector serves queries only between `initialize` and `destroy`.
//! - Unique attributes are enforced by the connector, not by callers.

pub mod memory;
mod registry;
pub mod sqlite;

pub use registry::{ConnectorRegistry, StartupError};

use crate::config::ConnectionConfig;
use crate::db::DbError;
use crate::migration::MigrationHooks;
use crate::model::descriptor::ModelDescriptor;
use crate::query::ConnectorQuery;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub type ConnectorResult<T> = Result<T, ConnectorError>;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connection `{0}` is not configured")]
    UnknownConnection(String),
    #[error("connection `{connection}` uses unknown connector `{kind}`")]
    UnknownKind { connection: String, kind: String },
    #[error("connector factory already registered: {0}")]
    DuplicateFactory(String),
    #[error("connection `{0}` is not initialized")]
    NotInitialized(String),
    #[error("connection `{connection}` is unavailable: {reason}")]
    Unavailable { connection: String, reason: String },
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode stored document: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("storage lock poisoned")]
    Poisoned,
    #[error("stored document {id} in `{collection}` is not an object")]
    CorruptDocument { collection: String, id: i64 },
    #[error("value of unique attribute `{attribute}` already exists in `{collection}`")]
    UniqueViolation {
        collection: String,
        attribute: String,
    },
}

impl ConnectorError {
    /// Errors caused by configuration rather than by a storage backend.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownConnection(_) | Self::UnknownKind { .. } | Self::DuplicateFactory(_)
        )
    }
}

/// Names of the timestamp attributes a connector maintains on every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimestampNames {
    pub created_at: &'static str,
    pub updated_at: &'static str,
}

impl TimestampNames {
    pub const SNAKE: Self = Self {
        created_at: "created_at",
        updated_at: "updated_at",
    };
    pub const CAMEL: Self = Self {
        created_at: "createdAt",
        updated_at: "updatedAt",
    };
}

/// One configured storage backend.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connection name this connector serves.
    fn name(&self) -> &str;

    /// Connector kind, e.g. `sqlite`.
    fn kind(&self) -> &'static str;

    fn default_timestamps(&self) -> TimestampNames;

    async fn initialize(&self) -> ConnectorResult<()>;

    async fn destroy(&self) -> ConnectorResult<()>;

    /// Query capability bound to `model`.
    fn queries(&self, model: Arc<ModelDescriptor>) -> ConnectorResult<Arc<dyn ConnectorQuery>>;

    fn migrations(&self) -> &dyn MigrationHooks;
}

/// Builds connectors of one kind from connection config.
pub trait ConnectorFactory: Send + Sync {
    fn create(&self, name: &str, config: &ConnectionConfig) -> ConnectorResult<Arc<dyn Connector>>;
}

impl<F> ConnectorFactory for F
where
    F: Fn(&str, &ConnectionConfig) -> ConnectorResult<Arc<dyn Connector>> + Send + Sync,
{
    fn create(&self, name: &str, config: &ConnectionConfig) -> ConnectorResult<Arc<dyn Connector>> {
        self(name, config)
    }
}

/// RFC 3339 UTC timestamp with millisecond precision.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Storage key of a unique value. `None` for null, which never conflicts.
pub(crate) fn unique_key(value: &Value) -> Option<String> {
    (!value.is_null()).then(|| value.to_string())
}

/// Whether a stored row counts as published.
pub(crate) fn is_published(entry: &serde_json::Map<String, Value>) -> bool {
    entry
        .get(crate::model::constants::PUBLISHED_AT_ATTRIBUTE)
        .is_some_and(|value| !value.is_null())
}

#[cfg(test)]
mod tests {
    use super::{now_timestamp, unique_key};
    use serde_json::json;

    #[test]
    fn timestamps_are_rfc3339_millis() {
        let now = now_timestamp();
        assert!(chrono::DateTime::parse_from_rfc3339(&now).is_ok());
        assert!(now.ends_with('Z'));
    }

    #[test]
    fn unique_keys_distinguish_types() {
        assert_eq!(unique_key(&json!(null)), None);
        assert_ne!(unique_key(&json!(1)), unique_key(&json!("1")));
    }
}
