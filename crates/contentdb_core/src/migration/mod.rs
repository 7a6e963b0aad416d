//! Schema reconciliation between stored and declared model shapes.
//!
//! # Responsibility
//! - Compute per-model structural deltas against connector-stored shapes.
//! - Plan and precondition-check every model before any storage changes.
//! - Drive connectors through the planned steps and persist new shapes.
//!
//! # Invariants
//! - Per-model state only moves forward:
//!   `Unmigrated -> DeltaComputed -> Applying -> Migrated`, or to `Failed`.
//! - A model without delta is never re-applied.
//! - Preconditions of every model run before the first step of any model.

mod delta;
mod engine;
mod plan;
mod report;
mod shape;

pub use delta::{AttributeChange, SchemaDelta, Toggle};
pub use engine::{MigrationBatch, ModelMigration};
pub use plan::{MigrationPlan, MigrationStep};
pub use report::MigrationReport;
pub use shape::{AttributeShape, ModelShape, ShapeTimestamps};

use crate::connector::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub type MigrationResult<T> = Result<T, MigrationError>;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(
        "cannot make `{attribute}` of `{uid}` required: {rows} stored row(s) hold no value; \
         fill or delete them and restart"
    )]
    RequiredAttributeHasNulls {
        uid: String,
        attribute: String,
        rows: u64,
    },
    #[error(
        "cannot add required attribute `{attribute}` to `{uid}` without a default: \
         {rows} stored row(s) would hold no value"
    )]
    RequiredAttributeWithoutDefault {
        uid: String,
        attribute: String,
        rows: u64,
    },
    #[error(
        "cannot change the target of required relation `{attribute}` of `{uid}`: \
         {rows} stored row(s) would lose their value"
    )]
    RequiredRelationRetargeted {
        uid: String,
        attribute: String,
        rows: u64,
    },
    #[error(
        "cannot move `{uid}` from collection `{from}` to `{collection}`: \
         the target already holds {rows} row(s)"
    )]
    RenameTargetNotEmpty {
        uid: String,
        from: String,
        collection: String,
        rows: u64,
    },
    #[error(
        "cannot make `{attribute}` of `{uid}` unique: {duplicates} stored row(s) repeat a value"
    )]
    UniqueAttributeHasDuplicates {
        uid: String,
        attribute: String,
        duplicates: u64,
    },
    #[error("migration of `{uid}` failed on connection `{connection}`: {source}")]
    Connector {
        uid: String,
        connection: String,
        #[source]
        source: ConnectorError,
    },
    #[error("invalid migration state transition for `{uid}`: {from:?} -> {to:?}")]
    InvalidTransition {
        uid: String,
        from: MigrationState,
        to: MigrationState,
    },
}

impl MigrationError {
    /// Model the failure is attributed to.
    pub fn uid(&self) -> &str {
        match self {
            Self::RequiredAttributeHasNulls { uid, .. }
            | Self::RequiredAttributeWithoutDefault { uid, .. }
            | Self::RequiredRelationRetargeted { uid, .. }
            | Self::RenameTargetNotEmpty { uid, .. }
            | Self::UniqueAttributeHasDuplicates { uid, .. }
            | Self::Connector { uid, .. }
            | Self::InvalidTransition { uid, .. } => uid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationState {
    Unmigrated,
    DeltaComputed,
    Applying,
    Migrated,
    Failed,
}

impl MigrationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Migrated | Self::Failed)
    }

    /// `DeltaComputed -> Migrated` skips `Applying` for empty plans.
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Unmigrated, Self::DeltaComputed)
            | (Self::DeltaComputed, Self::Applying)
            | (Self::DeltaComputed, Self::Migrated)
            | (Self::Applying, Self::Migrated) => true,
            (current, Self::Failed) => !current.is_terminal(),
            _ => false,
        }
    }
}

/// Connector-side capabilities the engine needs.
///
/// Counting methods read rows as currently stored; with `published_only` set
/// rows without a publication timestamp are ignored.
#[async_trait]
pub trait MigrationHooks: Send + Sync {
    /// Shape persisted by the last successful migration of `uid`.
    async fn stored_shape(&self, uid: &str) -> ConnectorResult<Option<ModelShape>>;

    /// Rows stored in `collection`.
    async fn count_rows(&self, collection: &str, published_only: bool) -> ConnectorResult<u64>;

    /// Rows of `collection` whose `attribute` is absent or null.
    async fn count_missing(
        &self,
        collection: &str,
        attribute: &str,
        published_only: bool,
    ) -> ConnectorResult<u64>;

    /// Rows of `collection` repeating a non-null `attribute` value seen on an earlier row.
    async fn count_duplicates(
        &self,
        collection: &str,
        attribute: &str,
        published_only: bool,
    ) -> ConnectorResult<u64>;

    /// Applies every step of `plan`, then stores `plan.shape`, atomically.
    async fn apply(&self, plan: &MigrationPlan) -> ConnectorResult<()>;
}

#[cfg(test)]
mod tests {
    use super::MigrationState;

    #[test]
    fn state_machine_only_moves_forward() {
        use MigrationState::*;
        assert!(Unmigrated.can_transition_to(DeltaComputed));
        assert!(DeltaComputed.can_transition_to(Applying));
        assert!(DeltaComputed.can_transition_to(Migrated));
        assert!(Applying.can_transition_to(Migrated));
        assert!(Applying.can_transition_to(Failed));
        assert!(Unmigrated.can_transition_to(Failed));

        assert!(!Unmigrated.can_transition_to(Applying));
        assert!(!Migrated.can_transition_to(Applying));
        assert!(!Failed.can_transition_to(Failed));
        assert!(!Migrated.can_transition_to(Failed));
    }
}
