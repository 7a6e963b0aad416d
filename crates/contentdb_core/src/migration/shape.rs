//! Persisted structural shape of a model.

use crate::connector::TimestampNames;
use crate::model::attribute::AttributeKind;
use crate::model::descriptor::ModelDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What a connector remembers about a model between restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelShape {
    pub uid: String,
    pub collection_name: String,
    pub draft_and_publish: bool,
    pub timestamps: ShapeTimestamps,
    pub attributes: BTreeMap<String, AttributeShape>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeTimestamps {
    pub created_at: String,
    pub updated_at: String,
}

impl From<TimestampNames> for ShapeTimestamps {
    fn from(names: TimestampNames) -> Self {
        Self {
            created_at: names.created_at.to_string(),
            updated_at: names.updated_at.to_string(),
        }
    }
}

/// Structural facts of one attribute. Defaults and privacy are not
/// structural and never produce a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeShape {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl ModelShape {
    pub fn from_descriptor(model: &ModelDescriptor, timestamps: TimestampNames) -> Self {
        let attributes = model
            .attributes
            .iter()
            .map(|(name, spec)| {
                let target = match &spec.kind {
                    AttributeKind::Scalar(_) => None,
                    AttributeKind::Relation {
                        target, plugin, ..
                    } => Some(match plugin {
                        Some(plugin) => format!("{plugin}::{target}"),
                        None => target.clone(),
                    }),
                    AttributeKind::Component {
                        component,
                        repeatable,
                    } => Some(if *repeatable {
                        format!("{component}[]")
                    } else {
                        component.clone()
                    }),
                    AttributeKind::DynamicZone { components } => Some(components.join(",")),
                };
                (
                    name.clone(),
                    AttributeShape {
                        kind: spec.kind.type_name().to_string(),
                        required: spec.required,
                        unique: spec.unique,
                        target,
                    },
                )
            })
            .collect();

        Self {
            uid: model.uid.clone(),
            collection_name: model.collection_name.clone(),
            draft_and_publish: model.draft_and_publish,
            timestamps: timestamps.into(),
            attributes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ModelShape;
    use crate::connector::TimestampNames;
    use crate::model::attribute::{AttributeSpec, ScalarType};
    use crate::model::descriptor::{ModelDeclaration, ModelDescriptor, ModelOrigin};

    #[test]
    fn captures_structural_flags_and_targets() {
        let declaration = ModelDeclaration::new()
            .with_draft_and_publish(true)
            .with_attribute(
                "code",
                AttributeSpec::scalar(ScalarType::String)
                    .unique()
                    .with_default(serde_json::json!("x")),
            )
            .with_attribute("owner", AttributeSpec::relation("user").in_plugin("admin"))
            .with_attribute("photos", AttributeSpec::component("media.photo", true));
        let model = ModelDescriptor::from_declaration(ModelOrigin::Api("dog".into()), "dog", &declaration)
            .expect("descriptor");

        let shape = ModelShape::from_descriptor(&model, TimestampNames::SNAKE);
        assert!(shape.draft_and_publish);
        assert_eq!(shape.timestamps.created_at, "created_at");
        assert!(shape.attributes["code"].unique);
        assert_eq!(shape.attributes["owner"].target.as_deref(), Some("admin::user"));
        assert_eq!(shape.attributes["photos"].target.as_deref(), Some("media.photo[]"));

        let raw = serde_json::to_string(&shape).expect("encode shape");
        let decoded: ModelShape = serde_json::from_str(&raw).expect("decode shape");
        assert_eq!(decoded, shape);
    }
}
