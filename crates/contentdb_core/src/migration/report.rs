use crate::migration::engine::{MigrationBatch, ModelMigration};
use crate::migration::plan::MigrationStep;
use crate::migration::MigrationState;
use serde::Serialize;
use std::collections::BTreeMap;

/// Outcome of one initialization's migrations, keyed by uid.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    models: BTreeMap<String, ModelMigration>,
}

impl MigrationReport {
    pub fn from_batches(batches: impl IntoIterator<Item = MigrationBatch>) -> Self {
        let models = batches
            .into_iter()
            .flat_map(MigrationBatch::into_models)
            .map(|entry| (entry.uid.clone(), entry))
            .collect();
        Self { models }
    }

    pub fn state(&self, uid: &str) -> Option<MigrationState> {
        self.models.get(uid).map(|entry| entry.state)
    }

    /// Steps planned for `uid`; applied when its state is `Migrated`.
    pub fn steps(&self, uid: &str) -> &[MigrationStep] {
        self.models
            .get(uid)
            .map(|entry| entry.steps.as_slice())
            .unwrap_or(&[])
    }

    /// Number of steps applied to storage. Zero on an idempotent rerun.
    pub fn structural_changes(&self) -> usize {
        self.models
            .values()
            .filter(|entry| entry.state == MigrationState::Migrated)
            .map(|entry| entry.steps.len())
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelMigration> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
