//! Data-access core for a content management system.
//! Owns model registration, schema validation, connectors, migrations and
//! query dispatch.

pub mod config;
pub mod connector;
pub mod db;
pub mod logging;
pub mod manager;
pub mod migration;
pub mod model;
pub mod query;
pub mod validation;

pub use config::{ConfigError, ConnectionConfig, DatabaseConfig};
pub use connector::{Connector, ConnectorError, ConnectorFactory, ConnectorRegistry, TimestampNames};
pub use logging::{default_log_level, init_logging, logging_status};
pub use manager::{DatabaseManager, ErrorCategory, ManagerError, ManagerResult};
pub use migration::{MigrationReport, MigrationState, MigrationStep};
pub use model::attribute::{AttributeKind, AttributeSpec, ScalarType};
pub use model::descriptor::{ModelDeclaration, ModelDescriptor, ModelOrigin};
pub use model::registry::ModelRegistry;
pub use model::sources::ModelSources;
pub use query::{Entry, Filter, QueryError, QueryHandle};
pub use validation::{ReservedNames, ValidationError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
