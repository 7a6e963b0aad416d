//! Structural differences between a stored shape and a declared shape.

use crate::migration::shape::{AttributeShape, ModelShape};
use serde::Serialize;

/// Draft-and-publish flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Toggle {
    Enabled,
    Disabled,
}

/// One attribute present in both shapes whose structure differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeChange {
    pub name: String,
    pub previous: AttributeShape,
    pub current: AttributeShape,
}

impl AttributeChange {
    pub fn type_changed(&self) -> bool {
        self.previous.kind != self.current.kind
    }

    pub fn target_changed(&self) -> bool {
        self.previous.target != self.current.target
    }

    pub fn required_tightened(&self) -> bool {
        !self.previous.required && self.current.required
    }

    pub fn unique_enabled(&self) -> bool {
        !self.previous.unique && self.current.unique
    }

    pub fn unique_disabled(&self) -> bool {
        self.previous.unique && !self.current.unique
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDelta {
    /// No shape was stored: the model is new to this connector.
    pub created: bool,
    /// Previous collection name when the model moved collections.
    pub renamed_from: Option<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<AttributeChange>,
    pub draft_and_publish: Option<Toggle>,
}

impl SchemaDelta {
    pub fn compute(previous: Option<&ModelShape>, declared: &ModelShape) -> Self {
        let Some(previous) = previous else {
            return Self {
                created: true,
                ..Self::default()
            };
        };

        let mut delta = Self {
            renamed_from: (previous.collection_name != declared.collection_name)
                .then(|| previous.collection_name.clone()),
            draft_and_publish: match (previous.draft_and_publish, declared.draft_and_publish) {
                (false, true) => Some(Toggle::Enabled),
                (true, false) => Some(Toggle::Disabled),
                _ => None,
            },
            ..Self::default()
        };

        for (name, current) in &declared.attributes {
            match previous.attributes.get(name) {
                None => delta.added.push(name.clone()),
                Some(stored) if stored != current => delta.changed.push(AttributeChange {
                    name: name.clone(),
                    previous: stored.clone(),
                    current: current.clone(),
                }),
                Some(_) => {}
            }
        }
        delta.removed = previous
            .attributes
            .keys()
            .filter(|name| !declared.attributes.contains_key(name.as_str()))
            .cloned()
            .collect();

        delta
    }

    pub fn is_empty(&self) -> bool {
        !self.created
            && self.renamed_from.is_none()
            && self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && self.draft_and_publish.is_none()
    }
}
