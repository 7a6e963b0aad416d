//! Host-provided model sources.
//!
//! The host application contributes declarations from four namespaces:
//! application APIs, components, the admin subsystem and installed plugins.

use crate::model::descriptor::{ModelDeclaration, ModelDescriptor, ModelError, ModelOrigin, ModelResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSources {
    /// `api name -> model key -> declaration`.
    #[serde(default)]
    pub apis: BTreeMap<String, BTreeMap<String, ModelDeclaration>>,
    /// `category.name -> declaration`.
    #[serde(default)]
    pub components: BTreeMap<String, ModelDeclaration>,
    #[serde(default)]
    pub admin: BTreeMap<String, ModelDeclaration>,
    /// `plugin name -> model key -> declaration`.
    #[serde(default)]
    pub plugins: BTreeMap<String, BTreeMap<String, ModelDeclaration>>,
}

impl ModelSources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(raw: &str) -> ModelResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> ModelResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ModelError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn with_api_model(
        mut self,
        api: impl Into<String>,
        key: impl Into<String>,
        declaration: ModelDeclaration,
    ) -> Self {
        self.apis
            .entry(api.into())
            .or_default()
            .insert(key.into(), declaration);
        self
    }

    pub fn with_component(mut self, key: impl Into<String>, declaration: ModelDeclaration) -> Self {
        self.components.insert(key.into(), declaration);
        self
    }

    pub fn with_admin_model(mut self, key: impl Into<String>, declaration: ModelDeclaration) -> Self {
        self.admin.insert(key.into(), declaration);
        self
    }

    pub fn with_plugin_model(
        mut self,
        plugin: impl Into<String>,
        key: impl Into<String>,
        declaration: ModelDeclaration,
    ) -> Self {
        self.plugins
            .entry(plugin.into())
            .or_default()
            .insert(key.into(), declaration);
        self
    }

    /// Replaces one application model, as a schema edit between restarts does.
    pub fn replace_api_model(
        &mut self,
        api: &str,
        key: &str,
        edit: impl FnOnce(&mut ModelDeclaration),
    ) -> bool {
        match self.apis.get_mut(api).and_then(|models| models.get_mut(key)) {
            Some(declaration) => {
                edit(declaration);
                true
            }
            None => false,
        }
    }

    /// Normalizes every declaration, in registration order:
    /// application models, components, admin, plugins.
    pub fn descriptors(&self) -> ModelResult<Vec<ModelDescriptor>> {
        let mut descriptors = Vec::new();
        for (api, models) in &self.apis {
            for (key, declaration) in models {
                descriptors.push(ModelDescriptor::from_declaration(
                    ModelOrigin::Api(api.clone()),
                    key,
                    declaration,
                )?);
            }
        }
        for (key, declaration) in &self.components {
            descriptors.push(ModelDescriptor::component(key, declaration)?);
        }
        for (key, declaration) in &self.admin {
            descriptors.push(ModelDescriptor::from_declaration(
                ModelOrigin::Admin,
                key,
                declaration,
            )?);
        }
        for (plugin, models) in &self.plugins {
            for (key, declaration) in models {
                descriptors.push(ModelDescriptor::from_declaration(
                    ModelOrigin::Plugin(plugin.clone()),
                    key,
                    declaration,
                )?);
            }
        }
        Ok(descriptors)
    }

    pub fn len(&self) -> usize {
        self.apis.values().map(BTreeMap::len).sum::<usize>()
            + self.components.len()
            + self.admin.len()
            + self.plugins.values().map(BTreeMap::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
