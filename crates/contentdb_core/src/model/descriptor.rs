//! Model descriptors and their normalization from declarations.
//!
//! # Responsibility
//! - Turn host-provided `ModelDeclaration`s into fully-resolved descriptors.
//! - Derive uid, collection name and global id per origin.
//!
//! # Invariants
//! - `uid` is lower-case and matches the origin's namespace prefix.
//! - `collection_name` is never empty.
//! - Descriptors are immutable once registered.

use crate::model::attribute::AttributeSpec;
use crate::model::constants::DEFAULT_CONNECTION;
use convert_case::{Case, Casing};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use thiserror::Error;

static UID_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(application::|admin::|plugins::)?[a-z0-9_-]+(\.[a-z0-9_-]+)?$")
        .expect("uid pattern is a valid regex")
});

pub type ModelResult<T> = Result<T, ModelError>;

/// Declaration normalization errors.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model key must not be empty ({origin})")]
    EmptyName { origin: String },
    #[error("model uid is invalid: `{0}`")]
    InvalidUid(String),
    #[error("component key must look like `category.name`, got `{0}`")]
    InvalidComponentKey(String),
    #[error("failed to read model sources `{path}`: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse model sources: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Where a model was declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "name", rename_all = "lowercase")]
pub enum ModelOrigin {
    /// Application API (or component category) owned by the user.
    Api(String),
    Admin,
    Plugin(String),
}

impl ModelOrigin {
    /// Diagnostic label used in operator-facing reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Api(_) => "API",
            Self::Admin => "Admin internal",
            Self::Plugin(_) => "Plugin",
        }
    }

    /// Owning API, plugin, or `admin`.
    pub fn owner(&self) -> &str {
        match self {
            Self::Api(name) | Self::Plugin(name) => name,
            Self::Admin => "admin",
        }
    }

    /// Plugin-style namespace name; `None` for application models.
    pub fn plugin_name(&self) -> Option<&str> {
        match self {
            Self::Api(_) => None,
            Self::Admin => Some("admin"),
            Self::Plugin(name) => Some(name),
        }
    }
}

/// Row lifecycle category of a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModelKind {
    #[default]
    CollectionType,
    SingleType,
    Component,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOptions {
    #[serde(default)]
    pub draft_and_publish: bool,
}

/// Declared content-type schema as provided by the host application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDeclaration {
    #[serde(default)]
    pub kind: ModelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_name: Option<String>,
    #[serde(default)]
    pub info: ModelInfo,
    #[serde(default)]
    pub options: ModelOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
    #[serde(default)]
    pub attributes: IndexMap<String, AttributeSpec>,
}

impl ModelDeclaration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, name: impl Into<String>, spec: AttributeSpec) -> Self {
        self.attributes.insert(name.into(), spec);
        self
    }

    pub fn with_collection_name(mut self, collection_name: impl Into<String>) -> Self {
        self.collection_name = Some(collection_name.into());
        self
    }

    pub fn with_draft_and_publish(mut self, enabled: bool) -> Self {
        self.options.draft_and_publish = enabled;
        self
    }

    pub fn with_connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }
}

/// Fully-resolved model, addressable by `uid`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelDescriptor {
    pub uid: String,
    pub model_name: String,
    pub collection_name: String,
    pub global_id: String,
    pub origin: ModelOrigin,
    pub kind: ModelKind,
    /// Connection name owning persistence for this model.
    pub connection: String,
    pub draft_and_publish: bool,
    pub attributes: IndexMap<String, AttributeSpec>,
}

impl ModelDescriptor {
    /// Normalizes an API, admin or plugin model declared under `key`.
    pub fn from_declaration(
        origin: ModelOrigin,
        key: &str,
        declaration: &ModelDeclaration,
    ) -> ModelResult<Self> {
        let model_name = normalize_key(key, &origin)?;
        let (uid, global_id) = match &origin {
            ModelOrigin::Api(api) => (
                format!("application::{}.{model_name}", api.to_lowercase()),
                pascal(&model_name),
            ),
            ModelOrigin::Admin => (
                format!("admin::{model_name}"),
                format!("Admin{}", pascal(&model_name)),
            ),
            ModelOrigin::Plugin(plugin) => (
                format!("plugins::{}.{model_name}", plugin.to_lowercase()),
                format!("{}{}", pascal(plugin), pascal(&model_name)),
            ),
        };
        let collection_name = declared_collection(declaration).unwrap_or(model_name.clone());

        Self::build(uid, model_name, collection_name, global_id, origin, declaration)
    }

    /// Normalizes a component declared as `category.name`.
    pub fn component(key: &str, declaration: &ModelDeclaration) -> ModelResult<Self> {
        let uid = key.trim().to_lowercase();
        let Some((category, name)) = uid.split_once('.') else {
            return Err(ModelError::InvalidComponentKey(key.to_string()));
        };
        if category.is_empty() || name.is_empty() {
            return Err(ModelError::InvalidComponentKey(key.to_string()));
        }

        let collection_name = declared_collection(declaration).unwrap_or_else(|| {
            format!("components_{category}_{name}").replace('-', "_")
        });
        let global_id = format!("Component{}{}", pascal(category), pascal(name));
        let mut descriptor = Self::build(
            uid.clone(),
            name.to_string(),
            collection_name,
            global_id,
            ModelOrigin::Api(category.to_string()),
            declaration,
        )?;
        descriptor.kind = ModelKind::Component;
        descriptor.draft_and_publish = false;
        Ok(descriptor)
    }

    fn build(
        uid: String,
        model_name: String,
        collection_name: String,
        global_id: String,
        origin: ModelOrigin,
        declaration: &ModelDeclaration,
    ) -> ModelResult<Self> {
        if !UID_PATTERN.is_match(&uid) {
            return Err(ModelError::InvalidUid(uid));
        }

        Ok(Self {
            uid,
            model_name,
            collection_name,
            global_id,
            origin,
            kind: declaration.kind,
            connection: declaration
                .connection
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(DEFAULT_CONNECTION)
                .to_string(),
            draft_and_publish: declaration.options.draft_and_publish,
            attributes: declaration.attributes.clone(),
        })
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeSpec> {
        self.attributes.get(name)
    }

    /// Names of attributes carrying a `unique` constraint, in declaration order.
    pub fn unique_attributes(&self) -> Vec<String> {
        self.attributes
            .iter()
            .filter(|(_, spec)| spec.unique)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn provenance(&self) -> ModelProvenance {
        ModelProvenance {
            origin: self.origin.label(),
            owner: self.origin.owner().to_string(),
            model_name: self.model_name.clone(),
        }
    }
}

/// Human-readable location of a model declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelProvenance {
    pub origin: &'static str,
    pub owner: String,
    pub model_name: String,
}

impl Display for ModelProvenance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} `{}`, model `{}`",
            self.origin, self.owner, self.model_name
        )
    }
}

fn normalize_key(key: &str, origin: &ModelOrigin) -> ModelResult<String> {
    let normalized = key.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(ModelError::EmptyName {
            origin: format!("{} `{}`", origin.label(), origin.owner()),
        });
    }
    Ok(normalized)
}

fn declared_collection(declaration: &ModelDeclaration) -> Option<String> {
    declaration
        .collection_name
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn pascal(value: &str) -> String {
    value.to_case(Case::Pascal)
}

#[cfg(test)]
mod tests {
    use super::{ModelDeclaration, ModelDescriptor, ModelError, ModelKind, ModelOrigin};
    use crate::model::attribute::{AttributeSpec, ScalarType};

    fn dog() -> ModelDeclaration {
        ModelDeclaration::new().with_attribute("name", AttributeSpec::scalar(ScalarType::String))
    }

    #[test]
    fn normalizes_api_model() {
        let model =
            ModelDescriptor::from_declaration(ModelOrigin::Api("dog".into()), "Dog", &dog())
                .expect("api model");
        assert_eq!(model.uid, "application::dog.dog");
        assert_eq!(model.model_name, "dog");
        assert_eq!(model.collection_name, "dog");
        assert_eq!(model.global_id, "Dog");
        assert_eq!(model.connection, "default");
    }

    #[test]
    fn normalizes_plugin_and_admin_models() {
        let plugin = ModelDescriptor::from_declaration(
            ModelOrigin::Plugin("users-permissions".into()),
            "user",
            &dog().with_collection_name("users-permissions_user"),
        )
        .expect("plugin model");
        assert_eq!(plugin.uid, "plugins::users-permissions.user");
        assert_eq!(plugin.collection_name, "users-permissions_user");
        assert_eq!(plugin.global_id, "UsersPermissionsUser");

        let admin = ModelDescriptor::from_declaration(ModelOrigin::Admin, "role", &dog())
            .expect("admin model");
        assert_eq!(admin.uid, "admin::role");
        assert_eq!(admin.global_id, "AdminRole");
    }

    #[test]
    fn normalizes_component() {
        let component =
            ModelDescriptor::component("default.closing-period", &dog()).expect("component");
        assert_eq!(component.uid, "default.closing-period");
        assert_eq!(component.kind, ModelKind::Component);
        assert_eq!(component.collection_name, "components_default_closing_period");
        assert_eq!(component.global_id, "ComponentDefaultClosingPeriod");
    }

    #[test]
    fn rejects_invalid_keys() {
        let err = ModelDescriptor::component("address", &dog()).expect_err("missing category");
        assert!(matches!(err, ModelError::InvalidComponentKey(_)));

        let err = ModelDescriptor::from_declaration(ModelOrigin::Api("dog".into()), "  ", &dog())
            .expect_err("blank key");
        assert!(matches!(err, ModelError::EmptyName { .. }));

        let err = ModelDescriptor::from_declaration(
            ModelOrigin::Api("dog".into()),
            "dog house",
            &dog(),
        )
        .expect_err("whitespace in key");
        assert!(matches!(err, ModelError::InvalidUid(_)));
    }

    #[test]
    fn blank_collection_name_falls_back_to_model_name() {
        let model = ModelDescriptor::from_declaration(
            ModelOrigin::Api("dog".into()),
            "dog",
            &dog().with_collection_name("  "),
        )
        .expect("api model");
        assert_eq!(model.collection_name, "dog");
    }
}
