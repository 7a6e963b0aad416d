use crate::config::DatabaseConfig;
use crate::connector::memory::{self, MemoryConnectorFactory};
use crate::connector::sqlite::{self, SqliteConnectorFactory};
use crate::connector::{Connector, ConnectorError, ConnectorFactory, ConnectorResult};
use crate::migration::{MigrationBatch, MigrationError, MigrationReport};
use crate::model::constants::DEFAULT_CONNECTION;
use crate::model::descriptor::ModelDescriptor;
use crate::model::registry::ModelRegistry;
use futures::future::{join_all, try_join_all};
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Failure of a connector bring-up. Every connector is torn down again.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Named connectors built from config by registered factories.
pub struct ConnectorRegistry {
    config: DatabaseConfig,
    factories: BTreeMap<String, Arc<dyn ConnectorFactory>>,
    connectors: BTreeMap<String, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    /// Registry with the built-in `sqlite` and `memory` factories.
    pub fn new(config: DatabaseConfig) -> Self {
        let mut factories: BTreeMap<String, Arc<dyn ConnectorFactory>> = BTreeMap::new();
        factories.insert(sqlite::KIND.to_string(), Arc::new(SqliteConnectorFactory));
        factories.insert(memory::KIND.to_string(), Arc::new(MemoryConnectorFactory::new()));
        Self {
            config,
            factories,
            connectors: BTreeMap::new(),
        }
    }

    /// Registry without any factory.
    pub fn empty(config: DatabaseConfig) -> Self {
        Self {
            config,
            factories: BTreeMap::new(),
            connectors: BTreeMap::new(),
        }
    }

    pub fn register_factory(
        &mut self,
        kind: impl Into<String>,
        factory: impl ConnectorFactory + 'static,
    ) -> ConnectorResult<()> {
        let kind = kind.into();
        if self.factories.contains_key(kind.as_str()) {
            return Err(ConnectorError::DuplicateFactory(kind));
        }
        self.factories.insert(kind, Arc::new(factory));
        Ok(())
    }

    /// Swaps the factory of `kind`, e.g. to share one memory store.
    pub fn replace_factory(&mut self, kind: impl Into<String>, factory: impl ConnectorFactory + 'static) {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn default_connection(&self) -> &str {
        &self.config.default_connection
    }

    /// Builds one connector per configured connection, replacing any previous set.
    pub fn load(&mut self) -> ConnectorResult<()> {
        let mut connectors = BTreeMap::new();
        for (name, connection) in &self.config.connections {
            let factory = self.factories.get(connection.connector.as_str()).ok_or_else(|| {
                ConnectorError::UnknownKind {
                    connection: name.clone(),
                    kind: connection.connector.clone(),
                }
            })?;
            connectors.insert(name.clone(), factory.create(name, connection)?);
        }
        self.connectors = connectors;
        info!(
            "event=connector_load module=connector status=ok connections={} default={}",
            self.connectors.len(),
            self.config.default_connection
        );
        Ok(())
    }

    /// Connector by name; `None` or the `default` alias yields the default connection.
    pub fn get(&self, name: Option<&str>) -> ConnectorResult<Arc<dyn Connector>> {
        let name = match name {
            None | Some(DEFAULT_CONNECTION) => self.default_connection(),
            Some(name) => name,
        };
        self.connectors
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectorError::UnknownConnection(name.to_string()))
    }

    pub fn get_all(&self) -> impl Iterator<Item = &Arc<dyn Connector>> {
        self.connectors.values()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    /// Connector persisting `model`.
    pub fn connection_for(&self, model: &ModelDescriptor) -> ConnectorResult<Arc<dyn Connector>> {
        self.get(Some(model.connection.as_str()))
    }

    /// Connects every connector, then migrates every model.
    ///
    /// All batches are planned before any batch is applied, so a failed
    /// precondition anywhere leaves every store untouched.
    pub async fn initialize(&self, models: &ModelRegistry) -> Result<MigrationReport, StartupError> {
        let started_at = Instant::now();
        if let Some(model) = models.iter().find(|model| {
            model.connection != DEFAULT_CONNECTION
                && !self.connectors.contains_key(model.connection.as_str())
        }) {
            let err = ConnectorError::UnknownConnection(model.connection.clone());
            error!(
                "event=connector_init module=connector status=error uid={} error={}",
                model.uid, err
            );
            return Err(err.into());
        }

        let connectors: Vec<Arc<dyn Connector>> = self.connectors.values().cloned().collect();
        let opened = join_all(connectors.iter().map(|connector| connector.initialize())).await;
        if let Some(err) = opened.into_iter().find_map(Result::err) {
            error!(
                "event=connector_init module=connector status=error phase=connect error={}",
                err
            );
            self.destroy().await;
            return Err(err.into());
        }

        match self.migrate(&connectors, models).await {
            Ok(report) => {
                info!(
                    "event=connector_init module=connector status=ok connections={} models={} changed={} duration_ms={}",
                    connectors.len(),
                    report.len(),
                    report.structural_changes(),
                    started_at.elapsed().as_millis()
                );
                Ok(report)
            }
            Err(err) => {
                self.destroy().await;
                Err(err.into())
            }
        }
    }

    async fn migrate(
        &self,
        connectors: &[Arc<dyn Connector>],
        models: &ModelRegistry,
    ) -> Result<MigrationReport, MigrationError> {
        let default_connection = self.default_connection();
        let mut batches: Vec<MigrationBatch> = connectors
            .iter()
            .map(|connector| {
                MigrationBatch::new(
                    connector.name(),
                    models.models_for_connection(connector.name(), default_connection),
                )
            })
            .collect();

        try_join_all(batches.iter_mut().zip(connectors).map(|(batch, connector)| {
            batch.plan(connector.migrations(), connector.default_timestamps())
        }))
        .await?;

        let applied = join_all(
            batches
                .iter_mut()
                .zip(connectors)
                .map(|(batch, connector)| batch.apply(connector.migrations())),
        )
        .await;
        applied.into_iter().collect::<Result<Vec<()>, _>>()?;

        Ok(MigrationReport::from_batches(batches))
    }

    /// Closes every connector. Failures are logged, never returned.
    pub async fn destroy(&self) {
        let closed = join_all(self.connectors.values().map(|connector| async move {
            (connector.name().to_string(), connector.destroy().await)
        }))
        .await;
        for (name, result) in closed {
            match result {
                Ok(()) => info!(
                    "event=connector_destroy module=connector status=ok connection={}",
                    name
                ),
                Err(err) => warn!(
                    "event=connector_destroy module=connector status=error connection={} error={}",
                    name, err
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectorRegistry, StartupError};
    use crate::config::{ConnectionConfig, DatabaseConfig};
    use crate::connector::memory::{MemoryConnector, MemoryStore};
    use crate::connector::{Connector, ConnectorError, ConnectorResult};
    use crate::migration::MigrationState;
    use crate::model::attribute::{AttributeSpec, ScalarType};
    use crate::model::descriptor::ModelDeclaration;
    use crate::model::registry::ModelRegistry;
    use crate::model::sources::ModelSources;
    use std::sync::Arc;

    fn memory_connection() -> ConnectionConfig {
        DatabaseConfig::memory().connections["default"].clone()
    }

    #[test]
    fn resolves_default_alias_and_rejects_unknown_names() {
        let mut registry = ConnectorRegistry::new(
            DatabaseConfig::memory().with_connection("archive", memory_connection()),
        );
        registry.load().expect("load");

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(None).expect("default").name(), "default");
        assert_eq!(registry.get(Some("default")).expect("alias").name(), "default");
        assert_eq!(registry.get(Some("archive")).expect("named").name(), "archive");
        assert!(matches!(
            registry.get(Some("missing")).err(),
            Some(ConnectorError::UnknownConnection(name)) if name == "missing"
        ));
    }

    #[test]
    fn unknown_connector_kind_fails_load() {
        let mut config = DatabaseConfig::memory();
        if let Some(connection) = config.connections.get_mut("default") {
            connection.connector = "mongo".into();
        }
        let mut registry = ConnectorRegistry::new(config);
        let err = registry.load().expect_err("unknown kind");
        assert!(matches!(err, ConnectorError::UnknownKind { ref kind, .. } if kind == "mongo"));
        assert!(err.is_configuration());
    }

    #[test]
    fn custom_factories_register_once() {
        let mut registry = ConnectorRegistry::empty(DatabaseConfig::memory());
        let factory = |name: &str, _: &ConnectionConfig| -> ConnectorResult<Arc<dyn Connector>> {
            Ok(Arc::new(MemoryConnector::new(name, Arc::new(MemoryStore::new()))))
        };
        registry.register_factory("memory", factory).expect("register");
        assert!(matches!(
            registry.register_factory("memory", factory),
            Err(ConnectorError::DuplicateFactory(_))
        ));
        registry.load().expect("load");
        assert_eq!(registry.get(None).expect("default").kind(), "memory");
    }

    #[tokio::test]
    async fn initialize_migrates_models_per_connection() {
        let mut registry = ConnectorRegistry::new(
            DatabaseConfig::memory().with_connection("archive", memory_connection()),
        );
        registry.load().expect("load");
        let models = ModelRegistry::from_sources(
            &ModelSources::new()
                .with_api_model(
                    "dog",
                    "dog",
                    ModelDeclaration::new()
                        .with_attribute("name", AttributeSpec::scalar(ScalarType::String)),
                )
                .with_api_model(
                    "cat",
                    "cat",
                    ModelDeclaration::new().with_connection("archive"),
                ),
        )
        .expect("models");

        let report = registry.initialize(&models).await.expect("initialize");
        assert_eq!(report.len(), 2);
        assert_eq!(report.state("application::dog.dog"), Some(MigrationState::Migrated));
        let cat = report
            .iter()
            .find(|entry| entry.uid == "application::cat.cat")
            .expect("cat");
        assert_eq!(cat.connection, "archive");

        registry.destroy().await;
    }

    #[tokio::test]
    async fn models_on_unknown_connections_fail_startup() {
        let mut registry = ConnectorRegistry::new(DatabaseConfig::memory());
        registry.load().expect("load");
        let models = ModelRegistry::from_sources(&ModelSources::new().with_api_model(
            "cat",
            "cat",
            ModelDeclaration::new().with_connection("archive"),
        ))
        .expect("models");

        let err = registry.initialize(&models).await.expect_err("unknown connection");
        assert!(matches!(
            err,
            StartupError::Connector(ConnectorError::UnknownConnection(name)) if name == "archive"
        ));
    }
}
