#![allow(dead_code)]

use contentdb_core::connector::memory::{MemoryConnectorFactory, MemoryStore};
use contentdb_core::query::QueryHandle;
use contentdb_core::{
    AttributeSpec, ConnectorRegistry, DatabaseConfig, DatabaseManager, Entry, Filter,
    ModelDeclaration, ModelSources, ScalarType,
};
use rusqlite::Connection;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub fn string() -> AttributeSpec {
    AttributeSpec::scalar(ScalarType::String)
}

pub fn values(value: Value) -> Entry {
    value.as_object().cloned().unwrap()
}

/// `api::dog.dog` plus `api::cat.cat`, each with an optional `name`.
pub fn pets() -> ModelSources {
    ModelSources::new()
        .with_api_model("dog", "dog", ModelDeclaration::new().with_attribute("name", string()))
        .with_api_model("cat", "cat", ModelDeclaration::new().with_attribute("name", string()))
}

/// Edits the `dog` declaration in place.
pub fn edit_dog(mut sources: ModelSources, edit: impl FnOnce(&mut ModelDeclaration)) -> ModelSources {
    assert!(sources.replace_api_model("dog", "dog", edit));
    sources
}

/// SQLite file that outlives manager restarts.
pub struct SqliteFixture {
    _dir: TempDir,
    path: PathBuf,
}

impl SqliteFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content.db");
        Self { _dir: dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn manager(&self, sources: ModelSources) -> DatabaseManager {
        DatabaseManager::new(DatabaseConfig::sqlite(&self.path), sources)
    }

    pub async fn start(&self, sources: ModelSources) -> DatabaseManager {
        let mut manager = self.manager(sources);
        manager.initialize().await.unwrap();
        manager
    }

    /// Raw stored bodies of `collection`, read beside the connector.
    pub fn bodies(&self, collection: &str) -> Vec<Value> {
        let conn = Connection::open(&self.path).unwrap();
        let mut stmt = conn
            .prepare("SELECT body FROM content_documents WHERE collection = ?1 ORDER BY id;")
            .unwrap();
        let rows = stmt
            .query_map([collection], |row| row.get::<_, String>(0))
            .unwrap();
        rows.map(|body| serde_json::from_str(&body.unwrap()).unwrap())
            .collect()
    }
}

/// Memory connector whose rows survive manager restarts.
pub fn memory_manager(store: &Arc<MemoryStore>, sources: ModelSources) -> DatabaseManager {
    let mut connectors = ConnectorRegistry::new(DatabaseConfig::memory());
    connectors.replace_factory("memory", MemoryConnectorFactory::shared(Arc::clone(store)));
    DatabaseManager::with_connectors(connectors, sources)
}

pub async fn all(handle: &QueryHandle) -> Vec<Entry> {
    handle.find(&Filter::new()).await.unwrap()
}

pub fn id(entry: &Entry) -> i64 {
    entry["id"].as_i64().unwrap()
}
