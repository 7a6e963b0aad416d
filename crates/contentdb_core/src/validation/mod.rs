//! Whole-application schema validation.
//!
//! # Responsibility
//! - Reject colliding or ambiguous model sets before any connector starts.
//!
//! # Invariants
//! - Validation is pure: it reads the assembled registry and touches no storage.
//! - Checks run in a fixed order and the first failure aborts.

mod duplicate_collections;
mod relation_targets;
mod reserved_names;

pub use duplicate_collections::check_duplicate_collection_names;
pub use relation_targets::check_relation_targets;
pub use reserved_names::{check_reserved_names, ReservedNames};

use crate::model::descriptor::ModelProvenance;
use crate::model::registry::ModelRegistry;
use log::{error, info};
use std::fmt::{Display, Formatter};
use std::time::Instant;
use thiserror::Error;

pub type ValidationResult<T> = Result<T, ValidationError>;

/// One side of a collection-name conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictSide {
    pub uid: String,
    pub provenance: ModelProvenance,
}

impl Display for ConflictSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.provenance.fmt(f)
    }
}

/// Configuration errors found by schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error(
        "Duplicated collection name: `{collection}`.\n\
         The same collection name can't be used for two different models.\n\
         First found in {first}.\n\
         Second found in {second}."
    )]
    DuplicateCollectionName {
        collection: String,
        first: ConflictSide,
        second: ConflictSide,
    },
    #[error("model name `{model_name}` is reserved ({uid})")]
    ReservedModelName { uid: String, model_name: String },
    #[error("model `{uid}` uses reserved attribute names: {}", .attributes.join(", "))]
    ReservedAttributeNames { uid: String, attributes: Vec<String> },
    #[error("attribute `{attribute}` of model `{uid}` targets unknown model `{target}`")]
    UnresolvedTarget {
        uid: String,
        attribute: String,
        target: String,
    },
}

/// Runs every schema check against the assembled registry.
pub fn validate_model_schemas(
    registry: &ModelRegistry,
    reserved: &ReservedNames,
) -> ValidationResult<()> {
    let started_at = Instant::now();
    info!(
        "event=schema_validate module=validation status=start models={}",
        registry.len()
    );

    let outcome = check_duplicate_collection_names(registry)
        .and_then(|_| check_reserved_names(registry, reserved))
        .and_then(|_| check_relation_targets(registry));

    match &outcome {
        Ok(()) => info!(
            "event=schema_validate module=validation status=ok models={} duration_ms={}",
            registry.len(),
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=schema_validate module=validation status=error kind={} duration_ms={}",
            err.kind(),
            started_at.elapsed().as_millis()
        ),
    }
    outcome
}

impl ValidationError {
    /// Stable short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateCollectionName { .. } => "duplicate_collection_name",
            Self::ReservedModelName { .. } => "reserved_model_name",
            Self::ReservedAttributeNames { .. } => "reserved_attribute_names",
            Self::UnresolvedTarget { .. } => "unresolved_target",
        }
    }
}
