//! Names reserved by the storage layer.

/// Connection name used when a model does not declare one.
pub const DEFAULT_CONNECTION: &str = "default";

/// Publication timestamp attribute added by draft-and-publish.
pub const PUBLISHED_AT_ATTRIBUTE: &str = "published_at";

/// Primary key attribute injected into every stored row.
pub const ID_ATTRIBUTE: &str = "id";

/// Model names that collide with built-in types or routes.
pub const RESERVED_MODEL_NAMES: &[&str] = &[
    "admin",
    "boolean",
    "date",
    "date-time",
    "dateTime",
    "json",
    "time",
    "upload",
    "uuid",
];

/// Attribute names managed by connectors or lifecycle fields.
pub const RESERVED_ATTRIBUTE_NAMES: &[&str] = &[
    "_id",
    ID_ATTRIBUTE,
    "length",
    "attributes",
    "relations",
    "changed",
    PUBLISHED_AT_ATTRIBUTE,
    "created_by",
    "updated_by",
];
