use crate::connector::{now_timestamp, ConnectorError, TimestampNames};
use crate::model::constants::{PUBLISHED_AT_ATTRIBUTE, RESERVED_ATTRIBUTE_NAMES};
use crate::model::descriptor::ModelDescriptor;
use crate::query::{
    ConnectorQuery, Entry, FieldError, FieldErrorReason, Filter, QueryError, QueryResult,
};
use serde_json::Value;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Create,
    Update,
}

/// Validating query entry point for one model.
pub struct QueryHandle {
    model: Arc<ModelDescriptor>,
    connection: String,
    timestamps: TimestampNames,
    inner: Arc<dyn ConnectorQuery>,
}

impl Debug for QueryHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("uid", &self.model.uid)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

impl QueryHandle {
    pub fn new(
        model: Arc<ModelDescriptor>,
        connection: impl Into<String>,
        timestamps: TimestampNames,
        inner: Arc<dyn ConnectorQuery>,
    ) -> Self {
        Self {
            model,
            connection: connection.into(),
            timestamps,
            inner,
        }
    }

    pub fn model(&self) -> &Arc<ModelDescriptor> {
        &self.model
    }

    pub fn uid(&self) -> &str {
        &self.model.uid
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn timestamps(&self) -> TimestampNames {
        self.timestamps
    }

    pub async fn find(&self, filter: &Filter) -> QueryResult<Vec<Entry>> {
        self.inner.find(filter).await.map_err(|err| self.map_err(err))
    }

    pub async fn find_one(&self, id: i64) -> QueryResult<Option<Entry>> {
        self.inner.find_one(id).await.map_err(|err| self.map_err(err))
    }

    pub async fn count(&self, filter: &Filter) -> QueryResult<u64> {
        self.inner.count(filter).await.map_err(|err| self.map_err(err))
    }

    /// Creates one entry. Declared defaults fill absent attributes and
    /// draft-and-publish entries start as drafts.
    pub async fn create(&self, mut values: Entry) -> QueryResult<Entry> {
        for (name, spec) in &self.model.attributes {
            if let Some(default) = &spec.default {
                if !values.contains_key(name.as_str()) {
                    values.insert(name.clone(), default.clone());
                }
            }
        }
        self.validate(&values, WriteMode::Create)?;
        if self.model.draft_and_publish {
            values.insert(PUBLISHED_AT_ATTRIBUTE.to_string(), Value::Null);
        }
        self.inner
            .create(values)
            .await
            .map_err(|err| self.map_err(err))
    }

    pub async fn update(&self, id: i64, values: Entry) -> QueryResult<Entry> {
        self.validate(&values, WriteMode::Update)?;
        self.write(id, values).await
    }

    pub async fn delete(&self, id: i64) -> QueryResult<Entry> {
        self.inner
            .delete(id)
            .await
            .map_err(|err| self.map_err(err))?
            .ok_or_else(|| self.not_found(id))
    }

    /// Stamps the publication timestamp of a draft-and-publish entry.
    pub async fn publish(&self, id: i64) -> QueryResult<Entry> {
        self.set_published_at(id, Value::String(now_timestamp())).await
    }

    /// Turns a draft-and-publish entry back into a draft.
    pub async fn unpublish(&self, id: i64) -> QueryResult<Entry> {
        self.set_published_at(id, Value::Null).await
    }

    async fn set_published_at(&self, id: i64, value: Value) -> QueryResult<Entry> {
        if !self.model.draft_and_publish {
            return Err(QueryError::DraftAndPublishDisabled(self.model.uid.clone()));
        }
        let mut values = Entry::new();
        values.insert(PUBLISHED_AT_ATTRIBUTE.to_string(), value);
        self.write(id, values).await
    }

    async fn write(&self, id: i64, values: Entry) -> QueryResult<Entry> {
        self.inner
            .update(id, values)
            .await
            .map_err(|err| self.map_err(err))?
            .ok_or_else(|| self.not_found(id))
    }

    fn validate(&self, values: &Entry, mode: WriteMode) -> QueryResult<()> {
        let mut errors = Vec::new();
        for (name, value) in values {
            if self.is_managed(name) {
                errors.push(FieldError::new(name.as_str(), FieldErrorReason::Reserved));
                continue;
            }
            let Some(spec) = self.model.attribute(name) else {
                errors.push(FieldError::new(name.as_str(), FieldErrorReason::Unknown));
                continue;
            };
            if value.is_null() {
                if spec.required {
                    errors.push(FieldError::new(name.as_str(), FieldErrorReason::Required));
                }
                continue;
            }
            if let Some(scalar) = spec.scalar_type() {
                if !scalar.accepts(value) {
                    errors.push(FieldError::new(
                        name.as_str(),
                        FieldErrorReason::TypeMismatch {
                            expected: scalar.as_str(),
                        },
                    ));
                }
            }
        }

        if mode == WriteMode::Create {
            for (name, spec) in &self.model.attributes {
                if spec.required && !values.contains_key(name.as_str()) {
                    errors.push(FieldError::new(name.as_str(), FieldErrorReason::Required));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(QueryError::Validation {
                uid: self.model.uid.clone(),
                errors,
            })
        }
    }

    fn is_managed(&self, attribute: &str) -> bool {
        RESERVED_ATTRIBUTE_NAMES.contains(&attribute)
            || attribute == self.timestamps.created_at
            || attribute == self.timestamps.updated_at
    }

    fn not_found(&self, id: i64) -> QueryError {
        QueryError::NotFound {
            uid: self.model.uid.clone(),
            id,
        }
    }

    fn map_err(&self, err: ConnectorError) -> QueryError {
        match err {
            ConnectorError::UniqueViolation { attribute, .. } => QueryError::UniqueViolation {
                uid: self.model.uid.clone(),
                attribute,
            },
            other => QueryError::Connector(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::QueryHandle;
    use crate::connector::memory::{MemoryQuery, MemoryStore};
    use crate::connector::TimestampNames;
    use crate::model::attribute::{AttributeSpec, ScalarType};
    use crate::model::descriptor::{ModelDeclaration, ModelDescriptor, ModelOrigin};
    use crate::query::{Entry, FieldErrorReason, Filter, QueryError};
    use serde_json::json;
    use std::sync::Arc;

    fn handle(declaration: ModelDeclaration) -> QueryHandle {
        let model = Arc::new(
            ModelDescriptor::from_declaration(ModelOrigin::Api("dog".into()), "dog", &declaration)
                .expect("descriptor"),
        );
        let store = Arc::new(MemoryStore::new());
        let inner = Arc::new(MemoryQuery::new(store, Arc::clone(&model), TimestampNames::CAMEL));
        QueryHandle::new(model, "default", TimestampNames::CAMEL, inner)
    }

    fn values(value: serde_json::Value) -> Entry {
        value.as_object().cloned().expect("object")
    }

    fn dog() -> ModelDeclaration {
        ModelDeclaration::new()
            .with_attribute("name", AttributeSpec::scalar(ScalarType::String).required())
            .with_attribute("age", AttributeSpec::scalar(ScalarType::Integer))
            .with_attribute(
                "kind",
                AttributeSpec::scalar(ScalarType::String).with_default(json!("good boy")),
            )
    }

    #[tokio::test]
    async fn create_applies_defaults_and_connector_fields() {
        let dogs = handle(dog());
        let created = dogs
            .create(values(json!({ "name": "Nelson" })))
            .await
            .expect("create");
        assert_eq!(created["kind"], json!("good boy"));
        assert!(created["id"].is_i64());
        assert_eq!(created["createdAt"], created["updatedAt"]);
        assert!(!created.contains_key("published_at"));
        assert_eq!(dogs.count(&Filter::new()).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn rejects_invalid_writes_with_every_field_error() {
        let dogs = handle(dog());
        let err = dogs
            .create(values(json!({ "age": "three", "id": 4, "color": "brown" })))
            .await
            .expect_err("invalid create");
        let QueryError::Validation { errors, .. } = &err else {
            panic!("unexpected error: {err:?}");
        };
        let reasons: Vec<(&str, &FieldErrorReason)> = errors
            .iter()
            .map(|error| (error.attribute.as_str(), &error.reason))
            .collect();
        assert_eq!(
            reasons,
            vec![
                ("age", &FieldErrorReason::TypeMismatch { expected: "integer" }),
                ("id", &FieldErrorReason::Reserved),
                ("color", &FieldErrorReason::Unknown),
                ("name", &FieldErrorReason::Required),
            ]
        );
    }

    #[tokio::test]
    async fn update_rejects_null_for_required_attribute() {
        let dogs = handle(dog());
        let created = dogs
            .create(values(json!({ "name": "Nelson" })))
            .await
            .expect("create");
        let id = created["id"].as_i64().expect("id");

        let err = dogs
            .update(id, values(json!({ "name": null })))
            .await
            .expect_err("null name");
        assert!(err.is_validation());

        let updated = dogs
            .update(id, values(json!({ "age": 4 })))
            .await
            .expect("partial update");
        assert_eq!(updated["name"], json!("Nelson"));
        assert_eq!(updated["age"], json!(4));

        let err = dogs.update(id + 100, Entry::new()).await.expect_err("missing");
        assert!(matches!(err, QueryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn draft_and_publish_lifecycle() {
        let dogs = handle(dog().with_draft_and_publish(true));
        let created = dogs
            .create(values(json!({ "name": "Nelson" })))
            .await
            .expect("create");
        assert_eq!(created["published_at"], json!(null));
        let id = created["id"].as_i64().expect("id");

        let published = dogs.publish(id).await.expect("publish");
        assert!(published["published_at"].is_string());
        let draft = dogs.unpublish(id).await.expect("unpublish");
        assert!(draft["published_at"].is_null());

        let err = handle(dog()).publish(id).await.expect_err("no draft and publish");
        assert!(matches!(err, QueryError::DraftAndPublishDisabled(_)));
    }
}
