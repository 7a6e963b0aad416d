//! Database manager orchestration.
//!
//! # Responsibility
//! - Own the startup sequence: connectors, model registry, schema
//!   validation, then connector initialization with migrations.
//! - Serve model lookups and memoized query handles afterwards.
//!
//! # Invariants
//! - Validation finishes before any connector touches storage.
//! - A failed `initialize` leaves the manager uninitialized and empty.
//! - Double initialization is rejected.

use crate::config::{ConfigError, DatabaseConfig};
use crate::connector::{ConnectorError, ConnectorRegistry, StartupError};
use crate::migration::{MigrationError, MigrationReport};
use crate::model::attribute::AttributeSpec;
use crate::model::descriptor::{ModelDescriptor, ModelError};
use crate::model::registry::{ModelRegistry, RegistryError};
use crate::model::sources::ModelSources;
use crate::query::{QueryCache, QueryError, QueryHandle};
use crate::validation::{validate_model_schemas, ReservedNames, ValidationError};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

pub type ManagerResult<T> = Result<T, ManagerError>;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error("database manager is already initialized")]
    AlreadyInitialized,
    #[error("database manager is not initialized")]
    NotInitialized,
    #[error("model `{entity}` not found{}", .plugin.as_ref().map(|p| format!(" in plugin `{p}`")).unwrap_or_default())]
    ModelNotFound {
        entity: String,
        plugin: Option<String>,
    },
}

impl From<StartupError> for ManagerError {
    fn from(err: StartupError) -> Self {
        match err {
            StartupError::Connector(err) => Self::Connector(err),
            StartupError::Migration(err) => Self::Migration(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Fix model sources or connection config, then restart.
    Configuration,
    /// Fix stored data, then restart.
    Migration,
    Connector,
    Query,
    Usage,
}

impl ManagerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_)
            | Self::Model(_)
            | Self::Registry(_)
            | Self::Validation(_)
            | Self::AlreadyInitialized => ErrorCategory::Configuration,
            Self::Connector(err) if err.is_configuration() => ErrorCategory::Configuration,
            Self::Connector(_) => ErrorCategory::Connector,
            Self::Migration(MigrationError::Connector { source, .. }) if source.is_configuration() => {
                ErrorCategory::Configuration
            }
            Self::Migration(MigrationError::Connector { .. }) => ErrorCategory::Connector,
            Self::Migration(_) => ErrorCategory::Migration,
            Self::Query(_) => ErrorCategory::Query,
            Self::NotInitialized | Self::ModelNotFound { .. } => ErrorCategory::Usage,
        }
    }
}

/// Single entry point for models and query handles.
pub struct DatabaseManager {
    sources: ModelSources,
    connectors: ConnectorRegistry,
    models: ModelRegistry,
    reserved: Option<ReservedNames>,
    queries: QueryCache,
    report: MigrationReport,
    initialized: bool,
}

impl DatabaseManager {
    pub fn new(config: DatabaseConfig, sources: ModelSources) -> Self {
        Self::with_connectors(ConnectorRegistry::new(config), sources)
    }

    /// Manager over a prepared connector registry, e.g. with extra factories.
    pub fn with_connectors(connectors: ConnectorRegistry, sources: ModelSources) -> Self {
        Self {
            sources,
            connectors,
            models: ModelRegistry::new(),
            reserved: None,
            queries: QueryCache::new(),
            report: MigrationReport::default(),
            initialized: false,
        }
    }

    /// Runs the full startup sequence.
    ///
    /// # Errors
    /// - `AlreadyInitialized` when called on a ready manager.
    /// - Configuration, validation, connector and migration failures. Every
    ///   connector is torn down again and a retry is possible.
    pub async fn initialize(&mut self) -> ManagerResult<()> {
        if self.initialized {
            warn!("event=manager_init module=manager status=error error_code=already_initialized");
            return Err(ManagerError::AlreadyInitialized);
        }

        let started_at = Instant::now();
        info!("event=manager_init module=manager status=start");
        match self.bootstrap().await {
            Ok(report) => {
                self.report = report;
                self.initialized = true;
                info!(
                    "event=manager_init module=manager status=ok models={} connections={} changed={} duration_ms={}",
                    self.models.len(),
                    self.connectors.len(),
                    self.report.structural_changes(),
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                self.reset().await;
                error!(
                    "event=manager_init module=manager status=error category={:?} duration_ms={} error={}",
                    err.category(),
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    async fn bootstrap(&mut self) -> ManagerResult<MigrationReport> {
        self.connectors.config().validate()?;
        self.connectors.load()?;

        let models = ModelRegistry::from_sources(&self.sources)?;
        let reserved = ReservedNames::new(self.connectors.get(None)?.default_timestamps());
        validate_model_schemas(&models, &reserved)?;
        self.models = models;
        self.reserved = Some(reserved);

        Ok(self.connectors.initialize(&self.models).await?)
    }

    /// Tears down every connector and clears cached state.
    pub async fn destroy(&mut self) {
        if !self.initialized {
            info!("event=manager_destroy module=manager status=skip reason=not_initialized");
            return;
        }
        self.reset().await;
        info!("event=manager_destroy module=manager status=ok");
    }

    async fn reset(&mut self) {
        self.connectors.destroy().await;
        self.queries.clear();
        self.models.clear();
        self.reserved = None;
        self.report = MigrationReport::default();
        self.initialized = false;
    }

    /// Query handle for a model name or uid, built on first use.
    pub fn query(&self, entity: &str, plugin: Option<&str>) -> ManagerResult<Arc<QueryHandle>> {
        if !self.initialized {
            return Err(ManagerError::NotInitialized);
        }
        let model = self
            .models
            .resolve(entity, plugin)
            .ok_or_else(|| ManagerError::ModelNotFound {
                entity: entity.to_string(),
                plugin: plugin.map(str::to_string),
            })?;
        if let Some(handle) = self.queries.get(&model.uid) {
            return Ok(handle);
        }

        let connector = self.connectors.connection_for(&model)?;
        let handle = self.queries.get_or_try_insert_with(&model.uid, || {
            let inner = connector
                .queries(Arc::clone(&model))
                .map_err(QueryError::Connector)?;
            Ok(QueryHandle::new(
                Arc::clone(&model),
                connector.name(),
                connector.default_timestamps(),
                inner,
            ))
        })?;
        Ok(handle)
    }

    pub fn get_model(&self, entity: &str, plugin: Option<&str>) -> Option<Arc<ModelDescriptor>> {
        self.models.resolve(entity, plugin)
    }

    pub fn get_model_by_collection_name(&self, collection_name: &str) -> Option<Arc<ModelDescriptor>> {
        self.models.find_by_collection_name(collection_name)
    }

    pub fn get_model_by_global_id(&self, global_id: &str) -> Option<Arc<ModelDescriptor>> {
        self.models.find_by_global_id(global_id)
    }

    /// Models targeted by a relation, component or dynamic-zone attribute.
    pub fn get_models_by_attribute(&self, attribute: &AttributeSpec) -> Vec<Arc<ModelDescriptor>> {
        self.models.resolve_for_attribute(attribute)
    }

    pub fn get_models_by_plugin_name(&self, plugin_name: Option<&str>) -> Vec<Arc<ModelDescriptor>> {
        self.models.models_by_plugin_name(plugin_name)
    }

    /// Reserved model and attribute names. `None` before initialization.
    pub fn reserved_names(&self) -> Option<&ReservedNames> {
        self.reserved.as_ref()
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    /// Migrations run by the last successful `initialize`.
    pub fn migration_report(&self) -> &MigrationReport {
        &self.report
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::{DatabaseManager, ErrorCategory, ManagerError};
    use crate::config::DatabaseConfig;
    use crate::model::attribute::{AttributeSpec, ScalarType};
    use crate::model::descriptor::ModelDeclaration;
    use crate::model::sources::ModelSources;
    use crate::validation::ValidationError;
    use std::sync::Arc;

    fn sources() -> ModelSources {
        ModelSources::new().with_api_model(
            "dog",
            "dog",
            ModelDeclaration::new().with_attribute("name", AttributeSpec::scalar(ScalarType::String)),
        )
    }

    #[tokio::test]
    async fn rejects_double_initialize_and_recovers_after_destroy() {
        let mut manager = DatabaseManager::new(DatabaseConfig::memory(), sources());
        manager.initialize().await.expect("initialize");
        let err = manager.initialize().await.expect_err("double initialize");
        assert!(matches!(err, ManagerError::AlreadyInitialized));
        assert!(manager.is_initialized());

        manager.destroy().await;
        assert!(!manager.is_initialized());
        manager.initialize().await.expect("initialize after destroy");
    }

    #[tokio::test]
    async fn query_handles_are_memoized() {
        let mut manager = DatabaseManager::new(DatabaseConfig::memory(), sources());
        assert!(matches!(
            manager.query("dog", None).err(),
            Some(ManagerError::NotInitialized)
        ));

        manager.initialize().await.expect("initialize");
        let first = manager.query("dog", None).expect("by name");
        let second = manager.query("application::dog.dog", None).expect("by uid");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.connection(), "default");

        let err = manager.query("cat", None).expect_err("unknown model");
        assert_eq!(err.category(), ErrorCategory::Usage);
        assert_eq!(err.to_string(), "model `cat` not found");
    }

    #[tokio::test]
    async fn failed_validation_leaves_manager_uninitialized() {
        let sources = sources().with_api_model(
            "hound",
            "hound",
            ModelDeclaration::new().with_collection_name("dog"),
        );
        let mut manager = DatabaseManager::new(DatabaseConfig::memory(), sources);
        let err = manager.initialize().await.expect_err("duplicate collection");
        assert!(matches!(
            err,
            ManagerError::Validation(ValidationError::DuplicateCollectionName { .. })
        ));
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(!manager.is_initialized());
        assert!(manager.models().is_empty());
        assert!(manager.reserved_names().is_none());
    }
}
