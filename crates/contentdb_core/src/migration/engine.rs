//! Per-connection migration driver.

use crate::connector::TimestampNames;
use crate::migration::delta::SchemaDelta;
use crate::migration::plan::{MigrationPlan, MigrationStep};
use crate::migration::shape::ModelShape;
use crate::migration::{MigrationError, MigrationHooks, MigrationResult, MigrationState};
use crate::model::descriptor::ModelDescriptor;
use log::{error, info};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

/// Migration progress of one model.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMigration {
    pub uid: String,
    pub connection: String,
    pub state: MigrationState,
    pub steps: Vec<MigrationStep>,
    #[serde(skip)]
    model: Arc<ModelDescriptor>,
    #[serde(skip)]
    plan: Option<MigrationPlan>,
}

impl ModelMigration {
    fn new(connection: &str, model: Arc<ModelDescriptor>) -> Self {
        Self {
            uid: model.uid.clone(),
            connection: connection.to_string(),
            state: MigrationState::Unmigrated,
            steps: Vec::new(),
            model,
            plan: None,
        }
    }

    fn transition(&mut self, next: MigrationState) -> MigrationResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(MigrationError::InvalidTransition {
                uid: self.uid.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Marks the model failed and hands the error back.
    fn fail(&mut self, err: MigrationError) -> MigrationError {
        if self.state.can_transition_to(MigrationState::Failed) {
            self.state = MigrationState::Failed;
        }
        err
    }
}

/// All models owned by one connection, migrated as a unit.
#[derive(Debug)]
pub struct MigrationBatch {
    connection: String,
    models: Vec<ModelMigration>,
}

impl MigrationBatch {
    pub fn new(connection: impl Into<String>, models: Vec<Arc<ModelDescriptor>>) -> Self {
        let connection = connection.into();
        let models = models
            .into_iter()
            .map(|model| ModelMigration::new(&connection, model))
            .collect();
        Self { connection, models }
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn models(&self) -> &[ModelMigration] {
        &self.models
    }

    pub fn into_models(self) -> Vec<ModelMigration> {
        self.models
    }

    /// Computes deltas and checks preconditions. Never writes to storage.
    pub async fn plan(
        &mut self,
        hooks: &dyn MigrationHooks,
        timestamps: TimestampNames,
    ) -> MigrationResult<()> {
        let started_at = Instant::now();
        let connection = self.connection.as_str();
        for entry in &mut self.models {
            let stored = match hooks.stored_shape(&entry.uid).await {
                Ok(stored) => stored,
                Err(source) => {
                    let err = MigrationError::Connector {
                        uid: entry.uid.clone(),
                        connection: connection.to_string(),
                        source,
                    };
                    return Err(log_failure("migration_plan", connection, entry.fail(err)));
                }
            };
            let shape = ModelShape::from_descriptor(&entry.model, timestamps);
            let delta = SchemaDelta::compute(stored.as_ref(), &shape);
            let plan = MigrationPlan::from_delta(&entry.model, shape, &delta);
            entry.transition(MigrationState::DeltaComputed)?;

            if let Err(err) = plan.check_preconditions(connection, hooks).await {
                return Err(log_failure("migration_plan", connection, entry.fail(err)));
            }
            entry.steps = plan.steps.clone();
            entry.plan = Some(plan);
        }

        info!(
            "event=migration_plan module=migration status=ok connection={} models={} pending={} duration_ms={}",
            connection,
            self.models.len(),
            self.models.iter().filter(|entry| !entry.steps.is_empty()).count(),
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Applies planned steps model by model, stopping at the first failure.
    pub async fn apply(&mut self, hooks: &dyn MigrationHooks) -> MigrationResult<()> {
        let connection = self.connection.as_str();
        for entry in &mut self.models {
            let Some(plan) = entry.plan.take() else {
                continue;
            };
            if plan.is_empty() {
                entry.transition(MigrationState::Migrated)?;
                continue;
            }

            let started_at = Instant::now();
            entry.transition(MigrationState::Applying)?;
            if let Err(source) = hooks.apply(&plan).await {
                let err = MigrationError::Connector {
                    uid: entry.uid.clone(),
                    connection: connection.to_string(),
                    source,
                };
                return Err(log_failure("migration_apply", connection, entry.fail(err)));
            }
            entry.transition(MigrationState::Migrated)?;
            info!(
                "event=migration_apply module=migration status=ok connection={} uid={} steps={} duration_ms={}",
                connection,
                entry.uid,
                plan.steps.len(),
                started_at.elapsed().as_millis()
            );
        }
        Ok(())
    }
}

fn log_failure(event: &str, connection: &str, err: MigrationError) -> MigrationError {
    error!(
        "event={} module=migration status=error connection={} uid={} error={}",
        event,
        connection,
        err.uid(),
        err
    );
    err
}
