//! SQLite document-store connector.
//!
//! # Responsibility
//! - Keep one bootstrapped SQLite connection per configured connection.
//! - Run all blocking SQLite work off the async executor.
//!
//! # Invariants
//! - Rows are JSON objects in `content_documents`; `id` is the row key and
//!   never part of the stored body.
//! - Every non-null value of a unique attribute has exactly one
//!   `content_unique_values` row.

mod hooks;
mod query;

pub use query::SqliteQuery;

use crate::config::ConnectionConfig;
use crate::connector::{Connector, ConnectorError, ConnectorFactory, ConnectorResult, TimestampNames};
use crate::db::{open_db, open_db_in_memory};
use crate::migration::MigrationHooks;
use crate::model::descriptor::ModelDescriptor;
use crate::query::ConnectorQuery;
use async_trait::async_trait;
use log::info;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub const KIND: &str = "sqlite";

/// Shared slot for the connection of one connector.
#[derive(Clone)]
pub(crate) struct SqliteHandle {
    name: Arc<str>,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteHandle {
    fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    fn is_open(&self) -> bool {
        self.conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Runs `f` against the open connection on the blocking pool.
    pub(crate) async fn run<T, F>(&self, f: F) -> ConnectorResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> ConnectorResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let name = self.name.to_string();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| ConnectorError::Poisoned)?;
            let conn = guard.as_mut().ok_or(ConnectorError::NotInitialized(name))?;
            f(conn)
        })
        .await?
    }

    async fn open(&self, file: Option<PathBuf>, busy_timeout: Duration) -> ConnectorResult<()> {
        let slot = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = slot.lock().map_err(|_| ConnectorError::Poisoned)?;
            if guard.is_none() {
                let conn = match file {
                    Some(path) => open_db(path, busy_timeout)?,
                    None => open_db_in_memory()?,
                };
                *guard = Some(conn);
            }
            Ok(())
        })
        .await?
    }

    async fn close(&self) -> ConnectorResult<()> {
        let slot = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let taken = slot.lock().map_err(|_| ConnectorError::Poisoned)?.take();
            match taken {
                Some(conn) => conn.close().map_err(|(_, err)| ConnectorError::Sqlite(err)),
                None => Ok(()),
            }
        })
        .await?
    }
}

#[derive(Debug, Default)]
pub struct SqliteConnectorFactory;

impl ConnectorFactory for SqliteConnectorFactory {
    fn create(&self, name: &str, config: &ConnectionConfig) -> ConnectorResult<Arc<dyn Connector>> {
        Ok(Arc::new(SqliteConnector::new(name, config)))
    }
}

pub struct SqliteConnector {
    name: String,
    file: Option<PathBuf>,
    busy_timeout: Duration,
    handle: SqliteHandle,
}

impl SqliteConnector {
    pub fn new(name: impl Into<String>, config: &ConnectionConfig) -> Self {
        let name = name.into();
        Self {
            handle: SqliteHandle::new(&name),
            file: config.settings.file().map(PathBuf::from),
            busy_timeout: config.options.busy_timeout(),
            name,
        }
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn default_timestamps(&self) -> TimestampNames {
        TimestampNames::SNAKE
    }

    async fn initialize(&self) -> ConnectorResult<()> {
        self.handle
            .open(self.file.clone(), self.busy_timeout)
            .await
            .map_err(|err| match err {
                ConnectorError::Db(source) => ConnectorError::Unavailable {
                    connection: self.name.clone(),
                    reason: source.to_string(),
                },
                other => other,
            })?;
        info!(
            "event=connector_open module=connector status=ok connection={} kind={} mode={}",
            self.name,
            KIND,
            if self.file.is_some() { "file" } else { "memory" }
        );
        Ok(())
    }

    async fn destroy(&self) -> ConnectorResult<()> {
        self.handle.close().await
    }

    fn queries(&self, model: Arc<ModelDescriptor>) -> ConnectorResult<Arc<dyn ConnectorQuery>> {
        if !self.handle.is_open() {
            return Err(ConnectorError::NotInitialized(self.name.clone()));
        }
        Ok(Arc::new(SqliteQuery::new(
            self.handle.clone(),
            model,
            self.default_timestamps(),
        )))
    }

    fn migrations(&self) -> &dyn MigrationHooks {
        self
    }
}

/// `$."attribute"` JSON path.
pub(crate) fn json_path(attribute: &str) -> String {
    format!("$.\"{}\"", attribute.replace('"', "\\\""))
}

#[cfg(test)]
mod tests {
    use super::{json_path, SqliteConnector};
    use crate::config::DatabaseConfig;
    use crate::connector::{Connector, ConnectorError};
    use crate::model::descriptor::{ModelDeclaration, ModelDescriptor, ModelOrigin};
    use std::sync::Arc;

    fn model() -> Arc<ModelDescriptor> {
        Arc::new(
            ModelDescriptor::from_declaration(
                ModelOrigin::Api("dog".into()),
                "dog",
                &ModelDeclaration::new(),
            )
            .expect("descriptor"),
        )
    }

    #[test]
    fn quotes_json_paths() {
        assert_eq!(json_path("name"), "$.\"name\"");
        assert_eq!(json_path("first-name"), "$.\"first-name\"");
    }

    #[tokio::test]
    async fn open_and_close_in_memory() {
        let config = DatabaseConfig::memory();
        let connector = SqliteConnector::new("default", &config.connections["default"]);
        assert!(matches!(
            connector.queries(model()).err(),
            Some(ConnectorError::NotInitialized(_))
        ));

        connector.initialize().await.expect("initialize");
        connector.initialize().await.expect("initialize is idempotent");
        assert!(connector.queries(model()).is_ok());

        connector.destroy().await.expect("destroy");
        assert!(connector.queries(model()).is_err());
    }
}
