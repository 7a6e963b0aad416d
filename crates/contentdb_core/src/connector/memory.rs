//! In-process document store.
//!
//! Rows live in a `MemoryStore`. A store can be shared across connector
//! instances so stored rows and shapes outlive one manager lifecycle.

use crate::config::ConnectionConfig;
use crate::connector::{
    is_published, now_timestamp, unique_key, Connector, ConnectorError, ConnectorFactory,
    ConnectorResult, TimestampNames,
};
use crate::migration::{MigrationHooks, MigrationPlan, MigrationStep, ModelShape};
use crate::model::constants::{ID_ATTRIBUTE, PUBLISHED_AT_ATTRIBUTE};
use crate::model::descriptor::ModelDescriptor;
use crate::query::{ConnectorQuery, Entry, Filter};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const KIND: &str = "memory";

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_id: i64,
    collections: BTreeMap<String, BTreeMap<i64, Entry>>,
    shapes: BTreeMap<String, ModelShape>,
}

impl MemoryState {
    fn rows(&self, collection: &str) -> impl Iterator<Item = &Entry> {
        self.collections
            .get(collection)
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    fn check_unique(
        &self,
        model: &ModelDescriptor,
        entry: &Entry,
        id: i64,
    ) -> ConnectorResult<()> {
        for attribute in model.unique_attributes() {
            let Some(key) = entry.get(&attribute).and_then(unique_key) else {
                continue;
            };
            let taken = self.rows(&model.collection_name).any(|row| {
                row_id(row) != Some(id) && row.get(&attribute).and_then(unique_key).as_ref() == Some(&key)
            });
            if taken {
                return Err(ConnectorError::UniqueViolation {
                    collection: model.collection_name.clone(),
                    attribute,
                });
            }
        }
        Ok(())
    }

    fn apply_step(&mut self, collection: &str, step: &MigrationStep) -> ConnectorResult<()> {
        match step {
            MigrationStep::CreateCollection => {
                self.collections.entry(collection.to_string()).or_default();
            }
            MigrationStep::RenameCollection { from } => {
                let moved = self.collections.remove(from.as_str()).unwrap_or_default();
                self.collections
                    .entry(collection.to_string())
                    .or_default()
                    .extend(moved);
            }
            MigrationStep::DisablePublication => {
                let rows = self.collections.entry(collection.to_string()).or_default();
                rows.retain(|_, row| is_published(row));
                for row in rows.values_mut() {
                    row.remove(PUBLISHED_AT_ATTRIBUTE);
                }
            }
            MigrationStep::EnablePublication { created_at } => {
                for row in self.rows_mut(collection) {
                    if !is_published(row) {
                        let stamp = row.get(created_at.as_str()).cloned().unwrap_or(Value::Null);
                        row.insert(PUBLISHED_AT_ATTRIBUTE.to_string(), stamp);
                    }
                }
            }
            MigrationStep::DropAttribute { name } | MigrationStep::ClearAttribute { name } => {
                for row in self.rows_mut(collection) {
                    row.remove(name.as_str());
                }
            }
            MigrationStep::AddAttribute {
                name,
                default: Some(default),
            } => {
                for row in self.rows_mut(collection) {
                    if row.get(name.as_str()).map_or(true, Value::is_null) {
                        row.insert(name.clone(), default.clone());
                    }
                }
            }
            MigrationStep::EnableUnique { name } => {
                if count_repeats(self.rows(collection).filter_map(|row| row.get(name.as_str()))) > 0 {
                    return Err(ConnectorError::UniqueViolation {
                        collection: collection.to_string(),
                        attribute: name.clone(),
                    });
                }
            }
            MigrationStep::AddAttribute { default: None, .. }
            | MigrationStep::AlterAttribute { .. }
            | MigrationStep::DropUnique { .. } => {}
        }
        Ok(())
    }

    fn rows_mut(&mut self, collection: &str) -> impl Iterator<Item = &mut Entry> {
        self.collections
            .get_mut(collection)
            .into_iter()
            .flat_map(BTreeMap::values_mut)
    }
}

/// Shared backing state of memory connectors.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut MemoryState) -> ConnectorResult<T>,
    ) -> ConnectorResult<T> {
        let mut state = self.state.lock().map_err(|_| ConnectorError::Poisoned)?;
        f(&mut state)
    }

    /// Stored rows of `collection` in id order.
    pub fn documents(&self, collection: &str) -> ConnectorResult<Vec<Entry>> {
        self.with_state(|state| Ok(state.rows(collection).cloned().collect()))
    }
}

/// Creates memory connectors, optionally over one shared store.
#[derive(Debug, Default)]
pub struct MemoryConnectorFactory {
    store: Option<Arc<MemoryStore>>,
}

impl MemoryConnectorFactory {
    /// Every connector gets a fresh store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connector reuses `store`.
    pub fn shared(store: Arc<MemoryStore>) -> Self {
        Self { store: Some(store) }
    }
}

impl ConnectorFactory for MemoryConnectorFactory {
    fn create(&self, name: &str, _config: &ConnectionConfig) -> ConnectorResult<Arc<dyn Connector>> {
        let store = self.store.clone().unwrap_or_default();
        Ok(Arc::new(MemoryConnector::new(name, store)))
    }
}

pub struct MemoryConnector {
    name: String,
    store: Arc<MemoryStore>,
    online: AtomicBool,
}

impl MemoryConnector {
    pub fn new(name: impl Into<String>, store: Arc<MemoryStore>) -> Self {
        Self {
            name: name.into(),
            store,
            online: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    fn default_timestamps(&self) -> TimestampNames {
        TimestampNames::CAMEL
    }

    async fn initialize(&self) -> ConnectorResult<()> {
        self.online.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> ConnectorResult<()> {
        self.online.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn queries(&self, model: Arc<ModelDescriptor>) -> ConnectorResult<Arc<dyn ConnectorQuery>> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(ConnectorError::NotInitialized(self.name.clone()));
        }
        Ok(Arc::new(MemoryQuery::new(
            Arc::clone(&self.store),
            model,
            self.default_timestamps(),
        )))
    }

    fn migrations(&self) -> &dyn MigrationHooks {
        self
    }
}

#[async_trait]
impl MigrationHooks for MemoryConnector {
    async fn stored_shape(&self, uid: &str) -> ConnectorResult<Option<ModelShape>> {
        self.store.with_state(|state| Ok(state.shapes.get(uid).cloned()))
    }

    async fn count_rows(&self, collection: &str, published_only: bool) -> ConnectorResult<u64> {
        self.store.with_state(|state| {
            Ok(state
                .rows(collection)
                .filter(|row| !published_only || is_published(row))
                .count() as u64)
        })
    }

    async fn count_missing(
        &self,
        collection: &str,
        attribute: &str,
        published_only: bool,
    ) -> ConnectorResult<u64> {
        self.store.with_state(|state| {
            Ok(state
                .rows(collection)
                .filter(|row| !published_only || is_published(row))
                .filter(|row| row.get(attribute).map_or(true, Value::is_null))
                .count() as u64)
        })
    }

    async fn count_duplicates(
        &self,
        collection: &str,
        attribute: &str,
        published_only: bool,
    ) -> ConnectorResult<u64> {
        self.store.with_state(|state| {
            Ok(count_repeats(
                state
                    .rows(collection)
                    .filter(|row| !published_only || is_published(row))
                    .filter_map(|row| row.get(attribute)),
            ))
        })
    }

    async fn apply(&self, plan: &MigrationPlan) -> ConnectorResult<()> {
        self.store.with_state(|state| {
            let mut next = state.clone();
            for step in &plan.steps {
                next.apply_step(&plan.collection, step)?;
            }
            next.shapes.insert(plan.uid.clone(), plan.shape.clone());
            *state = next;
            Ok(())
        })
    }
}

/// Query capability of one model over a `MemoryStore`.
pub struct MemoryQuery {
    store: Arc<MemoryStore>,
    model: Arc<ModelDescriptor>,
    timestamps: TimestampNames,
}

impl MemoryQuery {
    pub fn new(store: Arc<MemoryStore>, model: Arc<ModelDescriptor>, timestamps: TimestampNames) -> Self {
        Self {
            store,
            model,
            timestamps,
        }
    }
}

#[async_trait]
impl ConnectorQuery for MemoryQuery {
    async fn find(&self, filter: &Filter) -> ConnectorResult<Vec<Entry>> {
        let rows = self.store.documents(&self.model.collection_name)?;
        Ok(filter.apply(rows))
    }

    async fn find_one(&self, id: i64) -> ConnectorResult<Option<Entry>> {
        self.store.with_state(|state| {
            Ok(state
                .collections
                .get(self.model.collection_name.as_str())
                .and_then(|rows| rows.get(&id))
                .cloned())
        })
    }

    async fn count(&self, filter: &Filter) -> ConnectorResult<u64> {
        Ok(self.find(filter).await?.len() as u64)
    }

    async fn create(&self, values: Entry) -> ConnectorResult<Entry> {
        self.store.with_state(|state| {
            let id = state.next_id + 1;
            let now = Value::String(now_timestamp());
            let mut entry = Entry::new();
            entry.insert(ID_ATTRIBUTE.to_string(), Value::from(id));
            entry.extend(values);
            entry.insert(self.timestamps.created_at.to_string(), now.clone());
            entry.insert(self.timestamps.updated_at.to_string(), now);

            state.check_unique(&self.model, &entry, id)?;
            state.next_id = id;
            state
                .collections
                .entry(self.model.collection_name.clone())
                .or_default()
                .insert(id, entry.clone());
            Ok(entry)
        })
    }

    async fn update(&self, id: i64, values: Entry) -> ConnectorResult<Option<Entry>> {
        self.store.with_state(|state| {
            let Some(current) = state
                .collections
                .get(self.model.collection_name.as_str())
                .and_then(|rows| rows.get(&id))
            else {
                return Ok(None);
            };
            let mut entry = current.clone();
            entry.extend(values);
            entry.insert(
                self.timestamps.updated_at.to_string(),
                Value::String(now_timestamp()),
            );

            state.check_unique(&self.model, &entry, id)?;
            state
                .collections
                .entry(self.model.collection_name.clone())
                .or_default()
                .insert(id, entry.clone());
            Ok(Some(entry))
        })
    }

    async fn delete(&self, id: i64) -> ConnectorResult<Option<Entry>> {
        self.store.with_state(|state| {
            Ok(state
                .collections
                .get_mut(self.model.collection_name.as_str())
                .and_then(|rows| rows.remove(&id)))
        })
    }
}

fn row_id(row: &Entry) -> Option<i64> {
    row.get(ID_ATTRIBUTE).and_then(Value::as_i64)
}

/// Rows repeating a non-null value already seen on an earlier row.
fn count_repeats<'a>(values: impl Iterator<Item = &'a Value>) -> u64 {
    let mut seen = HashSet::new();
    values
        .filter_map(unique_key)
        .filter(|key| !seen.insert(key.clone()))
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::{MemoryConnector, MemoryStore};
    use crate::connector::{Connector, ConnectorError, TimestampNames};
    use crate::migration::{
        MigrationHooks, MigrationPlan, MigrationStep, ModelShape, SchemaDelta,
    };
    use crate::model::attribute::{AttributeSpec, ScalarType};
    use crate::model::descriptor::{ModelDeclaration, ModelDescriptor, ModelOrigin};
    use crate::query::{ConnectorQuery, Entry};
    use serde_json::json;
    use std::sync::Arc;

    fn string() -> AttributeSpec {
        AttributeSpec::scalar(ScalarType::String)
    }

    fn descriptor(declaration: ModelDeclaration) -> Arc<ModelDescriptor> {
        Arc::new(
            ModelDescriptor::from_declaration(ModelOrigin::Api("dog".into()), "dog", &declaration)
                .expect("descriptor"),
        )
    }

    fn model() -> Arc<ModelDescriptor> {
        descriptor(ModelDeclaration::new().with_attribute("code", string().unique()))
    }

    fn values(value: serde_json::Value) -> Entry {
        value.as_object().cloned().expect("object")
    }

    #[tokio::test]
    async fn queries_require_initialization() {
        let connector = MemoryConnector::new("default", Arc::new(MemoryStore::new()));
        let err = connector.queries(model()).err().expect("offline connector");
        assert!(matches!(err, ConnectorError::NotInitialized(name) if name == "default"));

        connector.initialize().await.expect("initialize");
        assert!(connector.queries(model()).is_ok());
    }

    #[tokio::test]
    async fn enforces_unique_values_but_allows_nulls() {
        let connector = MemoryConnector::new("default", Arc::new(MemoryStore::new()));
        connector.initialize().await.expect("initialize");
        let dogs = connector.queries(model()).expect("queries");

        dogs.create(values(json!({ "code": "a" }))).await.expect("first");
        dogs.create(values(json!({ "code": null }))).await.expect("null");
        dogs.create(values(json!({ "code": null }))).await.expect("second null");
        let err = dogs
            .create(values(json!({ "code": "a" })))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, ConnectorError::UniqueViolation { attribute, .. } if attribute == "code"));
        assert_eq!(
            connector
                .count_duplicates("dog", "code", false)
                .await
                .expect("duplicates"),
            0
        );
        assert_eq!(connector.count_rows("dog", false).await.expect("rows"), 3);
        assert_eq!(connector.count_rows("cat", false).await.expect("other collection"), 0);
    }

    #[tokio::test]
    async fn failed_apply_leaves_state_untouched() {
        let store = Arc::new(MemoryStore::new());
        let connector = MemoryConnector::new("default", Arc::clone(&store));
        connector.initialize().await.expect("initialize");

        let previous = descriptor(ModelDeclaration::new().with_attribute("name", string()));
        let dogs = connector.queries(Arc::clone(&previous)).expect("queries");
        dogs.create(values(json!({ "name": "a" }))).await.expect("first");
        dogs.create(values(json!({ "name": "a" }))).await.expect("second");

        let declared = descriptor(
            ModelDeclaration::new()
                .with_attribute("name", string().unique())
                .with_attribute("code", string()),
        );
        let before = ModelShape::from_descriptor(&previous, TimestampNames::CAMEL);
        let after = ModelShape::from_descriptor(&declared, TimestampNames::CAMEL);
        let plan = MigrationPlan::from_delta(&declared, after.clone(), &SchemaDelta::compute(Some(&before), &after));
        assert_eq!(
            plan.steps.last(),
            Some(&MigrationStep::EnableUnique { name: "name".into() })
        );

        let err = connector.apply(&plan).await.expect_err("duplicate names");
        assert!(matches!(err, ConnectorError::UniqueViolation { .. }));
        assert!(connector
            .stored_shape("application::dog.dog")
            .await
            .expect("shape")
            .is_none());
        assert_eq!(store.documents("dog").expect("rows").len(), 2);
    }
}
