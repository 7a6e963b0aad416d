//! Attribute declarations and their typed shapes.
//!
//! # Responsibility
//! - Parse raw attribute declarations into a closed set of attribute kinds.
//! - Provide the write-time scalar type check used by query handles.
//!
//! # Invariants
//! - Every declared attribute maps to exactly one `AttributeKind`.
//! - Relation, component and dynamic-zone attributes always name a target.
//! - `unique` is only accepted on scalar attributes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Scalar storage types understood by every connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Text,
    RichText,
    Email,
    Password,
    Uid,
    Enumeration,
    Integer,
    BigInteger,
    Float,
    Decimal,
    Boolean,
    Date,
    Time,
    DateTime,
    Timestamp,
    Json,
}

impl ScalarType {
    /// Stable declaration string, e.g. `richtext`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Text => "text",
            Self::RichText => "richtext",
            Self::Email => "email",
            Self::Password => "password",
            Self::Uid => "uid",
            Self::Enumeration => "enumeration",
            Self::Integer => "integer",
            Self::BigInteger => "biginteger",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Time => "time",
            Self::DateTime => "datetime",
            Self::Timestamp => "timestamp",
            Self::Json => "json",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let parsed = match value.trim() {
            "string" => Self::String,
            "text" => Self::Text,
            "richtext" => Self::RichText,
            "email" => Self::Email,
            "password" => Self::Password,
            "uid" => Self::Uid,
            "enumeration" => Self::Enumeration,
            "integer" => Self::Integer,
            "biginteger" => Self::BigInteger,
            "float" => Self::Float,
            "decimal" => Self::Decimal,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "time" => Self::Time,
            "datetime" => Self::DateTime,
            "timestamp" => Self::Timestamp,
            "json" => Self::Json,
            _ => return None,
        };
        Some(parsed)
    }

    /// Returns whether `value` may be stored in an attribute of this type.
    ///
    /// `null` is always accepted here; nullability is a `required` concern.
    pub fn accepts(self, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        match self {
            Self::String
            | Self::Text
            | Self::RichText
            | Self::Email
            | Self::Password
            | Self::Uid
            | Self::Enumeration => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            // Values beyond i64 travel as decimal strings.
            Self::BigInteger => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_str().is_some_and(|raw| {
                        let digits = raw.strip_prefix('-').unwrap_or(raw);
                        !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
                    })
            }
            Self::Float | Self::Decimal => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Date => value
                .as_str()
                .is_some_and(|raw| chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok()),
            Self::Time => value.as_str().is_some_and(|raw| {
                chrono::NaiveTime::parse_from_str(raw, "%H:%M:%S%.f").is_ok()
                    || chrono::NaiveTime::parse_from_str(raw, "%H:%M").is_ok()
            }),
            Self::DateTime => value
                .as_str()
                .is_some_and(|raw| chrono::DateTime::parse_from_rfc3339(raw).is_ok()),
            Self::Timestamp => {
                value.is_i64()
                    || value
                        .as_str()
                        .is_some_and(|raw| chrono::DateTime::parse_from_rfc3339(raw).is_ok())
            }
            Self::Json => true,
        }
    }
}

/// Relation arity: `model` references one row, `collection` references many.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationCardinality {
    One,
    Many,
}

/// Closed set of attribute shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeKind {
    Scalar(ScalarType),
    Relation {
        target: String,
        plugin: Option<String>,
        cardinality: RelationCardinality,
        via: Option<String>,
    },
    Component {
        component: String,
        repeatable: bool,
    },
    DynamicZone {
        components: Vec<String>,
    },
}

impl AttributeKind {
    /// Type name persisted in structural shapes.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Scalar(scalar) => scalar.as_str(),
            Self::Relation { .. } => "relation",
            Self::Component { .. } => "component",
            Self::DynamicZone { .. } => "dynamiczone",
        }
    }

    /// Model references this attribute points at, as `(name, plugin)` pairs.
    pub fn targets(&self) -> Vec<(&str, Option<&str>)> {
        match self {
            Self::Scalar(_) => vec![],
            Self::Relation { target, plugin, .. } => vec![(target.as_str(), plugin.as_deref())],
            Self::Component { component, .. } => vec![(component.as_str(), None)],
            Self::DynamicZone { components } => components
                .iter()
                .map(|component| (component.as_str(), None))
                .collect(),
        }
    }
}

/// One declared attribute of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAttribute", into = "RawAttribute")]
pub struct AttributeSpec {
    pub kind: AttributeKind,
    pub required: bool,
    pub unique: bool,
    pub private: bool,
    pub default: Option<Value>,
}

impl AttributeSpec {
    fn with_kind(kind: AttributeKind) -> Self {
        Self {
            kind,
            required: false,
            unique: false,
            private: false,
            default: None,
        }
    }

    pub fn scalar(scalar: ScalarType) -> Self {
        Self::with_kind(AttributeKind::Scalar(scalar))
    }

    /// To-one relation (`model` declaration).
    pub fn relation(target: impl Into<String>) -> Self {
        Self::with_kind(AttributeKind::Relation {
            target: target.into(),
            plugin: None,
            cardinality: RelationCardinality::One,
            via: None,
        })
    }

    /// To-many relation (`collection` declaration).
    pub fn relation_many(target: impl Into<String>) -> Self {
        Self::with_kind(AttributeKind::Relation {
            target: target.into(),
            plugin: None,
            cardinality: RelationCardinality::Many,
            via: None,
        })
    }

    pub fn component(component: impl Into<String>, repeatable: bool) -> Self {
        Self::with_kind(AttributeKind::Component {
            component: component.into(),
            repeatable,
        })
    }

    pub fn dynamic_zone<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_kind(AttributeKind::DynamicZone {
            components: components.into_iter().map(Into::into).collect(),
        })
    }

    pub fn in_plugin(mut self, plugin_name: impl Into<String>) -> Self {
        if let AttributeKind::Relation { plugin, .. } = &mut self.kind {
            *plugin = Some(plugin_name.into());
        }
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, AttributeKind::Scalar(_))
    }

    /// Scalar type, when this attribute is a scalar.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self.kind {
            AttributeKind::Scalar(scalar) => Some(scalar),
            _ => None,
        }
    }
}

/// Attribute declaration parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeError {
    #[error("attribute declares neither `type` nor a relation target")]
    MissingType,
    #[error("attribute type is unsupported: {0}")]
    UnknownType(String),
    #[error("relation declares both `model` and `collection`")]
    ConflictingRelation,
    #[error("component attribute must name a `component`")]
    MissingComponent,
    #[error("dynamiczone attribute must list at least one component")]
    EmptyDynamicZone,
    #[error("`unique` is only supported on scalar attributes, got `{0}`")]
    UniqueOnNonScalar(&'static str),
}

/// Wire shape of an attribute declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAttribute {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    required: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    unique: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    via: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    component: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    components: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "is_false")]
    repeatable: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl TryFrom<RawAttribute> for AttributeSpec {
    type Error = AttributeError;

    fn try_from(raw: RawAttribute) -> Result<Self, Self::Error> {
        let kind = match (raw.model, raw.collection) {
            (Some(_), Some(_)) => return Err(AttributeError::ConflictingRelation),
            (Some(target), None) => AttributeKind::Relation {
                target,
                plugin: raw.plugin,
                cardinality: RelationCardinality::One,
                via: raw.via,
            },
            (None, Some(target)) => AttributeKind::Relation {
                target,
                plugin: raw.plugin,
                cardinality: RelationCardinality::Many,
                via: raw.via,
            },
            (None, None) => match raw.kind.as_deref().map(str::trim) {
                None | Some("") => return Err(AttributeError::MissingType),
                Some("component") => AttributeKind::Component {
                    component: raw
                        .component
                        .filter(|value| !value.trim().is_empty())
                        .ok_or(AttributeError::MissingComponent)?,
                    repeatable: raw.repeatable,
                },
                Some("dynamiczone") => {
                    let components = raw.components.unwrap_or_default();
                    if components.is_empty() {
                        return Err(AttributeError::EmptyDynamicZone);
                    }
                    AttributeKind::DynamicZone { components }
                }
                Some(other) => AttributeKind::Scalar(
                    ScalarType::parse(other)
                        .ok_or_else(|| AttributeError::UnknownType(other.to_string()))?,
                ),
            },
        };

        if raw.unique && !matches!(kind, AttributeKind::Scalar(_)) {
            return Err(AttributeError::UniqueOnNonScalar(kind.type_name()));
        }

        Ok(Self {
            kind,
            required: raw.required,
            unique: raw.unique,
            private: raw.private,
            default: raw.default,
        })
    }
}

impl From<AttributeSpec> for RawAttribute {
    fn from(spec: AttributeSpec) -> Self {
        let mut raw = RawAttribute {
            required: spec.required,
            unique: spec.unique,
            private: spec.private,
            default: spec.default,
            ..RawAttribute::default()
        };
        match spec.kind {
            AttributeKind::Scalar(scalar) => raw.kind = Some(scalar.as_str().to_string()),
            AttributeKind::Relation {
                target,
                plugin,
                cardinality,
                via,
            } => {
                match cardinality {
                    RelationCardinality::One => raw.model = Some(target),
                    RelationCardinality::Many => raw.collection = Some(target),
                }
                raw.plugin = plugin;
                raw.via = via;
            }
            AttributeKind::Component {
                component,
                repeatable,
            } => {
                raw.kind = Some("component".to_string());
                raw.component = Some(component);
                raw.repeatable = repeatable;
            }
            AttributeKind::DynamicZone { components } => {
                raw.kind = Some("dynamiczone".to_string());
                raw.components = Some(components);
            }
        }
        raw
    }
}
