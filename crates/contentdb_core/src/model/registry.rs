//! Unified model index across application, admin and plugin sources.
//!
//! # Responsibility
//! - Key every registered model by its `uid`.
//! - Resolve unqualified, admin-qualified and plugin-qualified model names.
//!
//! # Invariants
//! - A `uid` is registered at most once; duplicates fail fast.
//! - Lookups are case-insensitive.
//! - Collection-name and global-id lookups are linear scans.

use crate::model::attribute::AttributeSpec;
use crate::model::constants::DEFAULT_CONNECTION;
use crate::model::descriptor::{ModelDescriptor, ModelError, ModelKind, ModelOrigin};
use crate::model::sources::ModelSources;
use log::warn;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("model uid already registered: {0}")]
    DuplicateUid(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Namespace alias used by admin-qualified lookups.
pub const ADMIN_NAMESPACE: &str = "admin";

/// Process-owned model index. Constructed by the database manager and
/// passed by reference to collaborators.
#[derive(Debug, Default)]
pub struct ModelRegistry {
    entries: BTreeMap<String, Arc<ModelDescriptor>>,
    application: BTreeMap<String, String>,
    components: BTreeMap<String, String>,
    admin: BTreeMap<String, String>,
    plugins: BTreeMap<String, BTreeMap<String, String>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from normalized descriptors, failing on the first
    /// duplicate uid.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = ModelDescriptor>,
    ) -> RegistryResult<Self> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Normalizes and registers every declaration the host provides.
    pub fn from_sources(sources: &ModelSources) -> RegistryResult<Self> {
        Self::from_descriptors(sources.descriptors()?)
    }

    /// Inserts one descriptor keyed by uid and indexes its namespace name.
    pub fn register(&mut self, descriptor: ModelDescriptor) -> RegistryResult<Arc<ModelDescriptor>> {
        let uid = descriptor.uid.to_lowercase();
        if self.entries.contains_key(uid.as_str()) {
            return Err(RegistryError::DuplicateUid(uid));
        }

        let name = descriptor.model_name.to_lowercase();
        let (index, key) = match (&descriptor.kind, &descriptor.origin) {
            (ModelKind::Component, _) => (&mut self.components, uid.clone()),
            (_, ModelOrigin::Api(_)) => (&mut self.application, name),
            (_, ModelOrigin::Admin) => (&mut self.admin, name),
            (_, ModelOrigin::Plugin(plugin)) => {
                (self.plugins.entry(plugin.to_lowercase()).or_default(), name)
            }
        };
        if let Some(existing) = index.get(key.as_str()) {
            warn!(
                "event=models_map module=registry status=shadowed name={} kept={} skipped={}",
                key, existing, uid
            );
        } else {
            index.insert(key, uid.clone());
        }

        let descriptor = Arc::new(descriptor);
        self.entries.insert(uid, Arc::clone(&descriptor));
        Ok(descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Exact uid lookup (case-insensitive).
    pub fn get(&self, uid: &str) -> Option<Arc<ModelDescriptor>> {
        self.entries.get(uid.trim().to_lowercase().as_str()).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModelDescriptor>> {
        self.entries.values()
    }

    pub fn uids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Resolves a uid or a namespace-relative model name.
    ///
    /// `origin_hint` selects the namespace for names that are not uids:
    /// - `None`: application models, then components.
    /// - `Some("admin")`: admin models.
    /// - `Some(plugin)`: that plugin's models.
    pub fn resolve(&self, name_or_uid: &str, origin_hint: Option<&str>) -> Option<Arc<ModelDescriptor>> {
        let key = name_or_uid.trim().to_lowercase();
        if key.is_empty() {
            return None;
        }
        if let Some(model) = self.entries.get(key.as_str()) {
            return Some(Arc::clone(model));
        }

        let hint = origin_hint
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty());
        let uid = match hint.as_deref() {
            None => self
                .application
                .get(key.as_str())
                .or_else(|| self.components.get(key.as_str())),
            Some(ADMIN_NAMESPACE) => self.admin.get(key.as_str()),
            Some(plugin) => self
                .plugins
                .get(plugin)
                .and_then(|models| models.get(key.as_str())),
        }?;
        self.entries.get(uid.as_str()).cloned()
    }

    pub fn find_by_collection_name(&self, collection_name: &str) -> Option<Arc<ModelDescriptor>> {
        self.entries
            .values()
            .find(|model| model.collection_name == collection_name)
            .cloned()
    }

    pub fn find_by_global_id(&self, global_id: &str) -> Option<Arc<ModelDescriptor>> {
        self.entries
            .values()
            .find(|model| model.global_id == global_id)
            .cloned()
    }

    /// Models an attribute points at.
    ///
    /// Components resolve to one model, dynamic zones to each allowed
    /// component, relations to their target, scalars to nothing. Targets
    /// that do not resolve are skipped; schema validation rejects them
    /// before the registry is published.
    pub fn resolve_for_attribute(&self, attribute: &AttributeSpec) -> Vec<Arc<ModelDescriptor>> {
        attribute
            .kind
            .targets()
            .into_iter()
            .filter_map(|(target, plugin)| self.resolve(target, plugin))
            .collect()
    }

    /// Models of one namespace: `None` for application models, `"admin"`
    /// for admin models, otherwise the named plugin. Unknown plugins yield
    /// an empty list.
    pub fn models_by_plugin_name(&self, plugin_name: Option<&str>) -> Vec<Arc<ModelDescriptor>> {
        let plugin_name = plugin_name
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty());
        let index = match plugin_name.as_deref() {
            None => Some(&self.application),
            Some(ADMIN_NAMESPACE) => Some(&self.admin),
            Some(plugin) => self.plugins.get(plugin),
        };
        index
            .map(|models| {
                models
                    .values()
                    .filter_map(|uid| self.entries.get(uid.as_str()).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Models persisted by `connection`. Models declared on the `default`
    /// alias belong to `default_connection`.
    pub fn models_for_connection(
        &self,
        connection: &str,
        default_connection: &str,
    ) -> Vec<Arc<ModelDescriptor>> {
        self.entries
            .values()
            .filter(|model| {
                model.connection == connection
                    || (model.connection == DEFAULT_CONNECTION && connection == default_connection)
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{ModelRegistry, RegistryError};
    use crate::model::attribute::{AttributeSpec, ScalarType};
    use crate::model::descriptor::{ModelDeclaration, ModelDescriptor, ModelOrigin};
    use crate::model::sources::ModelSources;
    use std::sync::Arc;

    fn sources() -> ModelSources {
        let string = || AttributeSpec::scalar(ScalarType::String);
        ModelSources::new()
            .with_api_model(
                "dog",
                "dog",
                ModelDeclaration::new()
                    .with_attribute("name", string())
                    .with_attribute("owner", AttributeSpec::relation("user").in_plugin("users-permissions"))
                    .with_attribute("address", AttributeSpec::component("default.address", false))
                    .with_attribute(
                        "blocks",
                        AttributeSpec::dynamic_zone(["default.address", "default.missing"]),
                    ),
            )
            .with_component("default.address", ModelDeclaration::new().with_attribute("street", string()))
            .with_admin_model("user", ModelDeclaration::new().with_attribute("email", string()))
            .with_plugin_model(
                "users-permissions",
                "user",
                ModelDeclaration::new()
                    .with_collection_name("users-permissions_user")
                    .with_attribute("email", string()),
            )
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::from_sources(&sources()).expect("registry")
    }

    #[test]
    fn rejects_duplicate_uid() {
        let dog = ModelDescriptor::from_declaration(
            ModelOrigin::Api("dog".into()),
            "dog",
            &ModelDeclaration::new(),
        )
        .expect("descriptor");
        let mut registry = ModelRegistry::new();
        registry.register(dog.clone()).expect("first registration");
        let err = registry.register(dog).expect_err("duplicate uid");
        assert!(matches!(err, RegistryError::DuplicateUid(uid) if uid == "application::dog.dog"));
    }

    #[test]
    fn resolve_is_case_insensitive_and_uid_first() {
        let registry = registry();
        let lower = registry.resolve("dog", None).expect("dog");
        let upper = registry.resolve("Dog", None).expect("Dog");
        let by_uid = registry.resolve("APPLICATION::dog.dog", None).expect("uid");
        assert!(Arc::ptr_eq(&lower, &upper));
        assert!(Arc::ptr_eq(&lower, &by_uid));
    }

    #[test]
    fn resolve_honours_origin_hint() {
        let registry = registry();
        assert_eq!(registry.resolve("user", Some("admin")).expect("admin user").uid, "admin::user");
        assert_eq!(
            registry
                .resolve("user", Some("users-permissions"))
                .expect("plugin user")
                .uid,
            "plugins::users-permissions.user"
        );
        assert!(registry.resolve("user", None).is_none());
        assert!(registry.resolve("user", Some("unknown")).is_none());
        assert_eq!(
            registry.resolve("default.address", None).expect("component").uid,
            "default.address"
        );
    }

    #[test]
    fn finds_by_collection_name_and_global_id() {
        let registry = registry();
        assert_eq!(
            registry
                .find_by_collection_name("users-permissions_user")
                .expect("by collection")
                .uid,
            "plugins::users-permissions.user"
        );
        assert_eq!(
            registry.find_by_global_id("AdminUser").expect("by global id").uid,
            "admin::user"
        );
        assert!(registry.find_by_collection_name("cats").is_none());
    }

    #[test]
    fn resolves_models_for_each_attribute_shape() {
        let registry = registry();
        let dog = registry.resolve("dog", None).expect("dog");

        let owner = registry.resolve_for_attribute(dog.attribute("owner").expect("owner"));
        assert_eq!(owner.len(), 1);
        assert_eq!(owner[0].uid, "plugins::users-permissions.user");

        let address = registry.resolve_for_attribute(dog.attribute("address").expect("address"));
        assert_eq!(address[0].uid, "default.address");

        let blocks = registry.resolve_for_attribute(dog.attribute("blocks").expect("blocks"));
        assert_eq!(blocks.len(), 1, "unresolved components are skipped");

        let name = registry.resolve_for_attribute(dog.attribute("name").expect("name"));
        assert!(name.is_empty());
    }

    #[test]
    fn lists_models_by_namespace() {
        let registry = registry();
        assert_eq!(registry.models_by_plugin_name(None).len(), 1);
        assert_eq!(registry.models_by_plugin_name(Some("admin"))[0].uid, "admin::user");
        assert_eq!(registry.models_by_plugin_name(Some("users-permissions")).len(), 1);
        assert!(registry.models_by_plugin_name(Some("unknown")).is_empty());
        assert_eq!(registry.models_for_connection("main", "main").len(), registry.len());
        assert!(registry.models_for_connection("archive", "main").is_empty());
    }
}
