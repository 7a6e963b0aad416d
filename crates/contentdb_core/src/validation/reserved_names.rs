use crate::connector::TimestampNames;
use crate::model::constants::{RESERVED_ATTRIBUTE_NAMES, RESERVED_MODEL_NAMES};
use crate::model::registry::ModelRegistry;
use crate::validation::{ValidationError, ValidationResult};
use serde::Serialize;

/// Names models and attributes must not use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservedNames {
    pub models: Vec<String>,
    pub attributes: Vec<String>,
}

impl ReservedNames {
    /// Built-in reserved sets plus the default connector's timestamp fields.
    pub fn new(timestamps: TimestampNames) -> Self {
        let mut attributes: Vec<String> = RESERVED_ATTRIBUTE_NAMES
            .iter()
            .map(|name| name.to_string())
            .collect();
        for name in [timestamps.created_at, timestamps.updated_at] {
            if !attributes.iter().any(|existing| existing == name) {
                attributes.push(name.to_string());
            }
        }

        Self {
            models: RESERVED_MODEL_NAMES
                .iter()
                .map(|name| name.to_string())
                .collect(),
            attributes,
        }
    }

    pub fn is_reserved_model(&self, model_name: &str) -> bool {
        self.models
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(model_name))
    }

    pub fn is_reserved_attribute(&self, attribute: &str) -> bool {
        self.attributes.iter().any(|reserved| reserved == attribute)
    }
}

/// Fails on the first model with a reserved name or reserved attribute names.
pub fn check_reserved_names(registry: &ModelRegistry, reserved: &ReservedNames) -> ValidationResult<()> {
    for model in registry.iter() {
        if reserved.is_reserved_model(&model.model_name) {
            return Err(ValidationError::ReservedModelName {
                uid: model.uid.clone(),
                model_name: model.model_name.clone(),
            });
        }

        let attributes: Vec<String> = model
            .attributes
            .keys()
            .filter(|name| reserved.is_reserved_attribute(name))
            .cloned()
            .collect();
        if !attributes.is_empty() {
            return Err(ValidationError::ReservedAttributeNames {
                uid: model.uid.clone(),
                attributes,
            });
        }
    }
    Ok(())
}
