//! Migration steps derived from a schema delta.

use crate::connector::ConnectorError;
use crate::migration::delta::{SchemaDelta, Toggle};
use crate::migration::shape::ModelShape;
use crate::migration::{MigrationError, MigrationHooks, MigrationResult};
use crate::model::descriptor::ModelDescriptor;
use serde::Serialize;
use serde_json::Value;

/// One storage transformation. Connectors apply steps in plan order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum MigrationStep {
    CreateCollection,
    /// Move stored rows from `from` to the plan's collection.
    RenameCollection { from: String },
    /// Delete drafts, then strip the publication timestamp from every row.
    DisablePublication,
    /// Stamp every row lacking a publication timestamp with its `created_at` value.
    EnablePublication { created_at: String },
    DropAttribute { name: String },
    /// Remove stored values whose relation target changed.
    ClearAttribute { name: String },
    /// Backfill `default` into rows lacking the attribute.
    AddAttribute {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
    /// Type or nullability change with no data rewrite.
    AlterAttribute { name: String },
    DropUnique { name: String },
    EnableUnique { name: String },
}

/// Read-only check run before any connector applies anything.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Precondition {
    /// Every relevant row already holds a value.
    NoMissingValues { attribute: String },
    /// No relevant row would be left without a value.
    NoRows { attribute: String },
    /// No relevant row exists, since every stored value of `attribute` is cleared.
    NoStoredRows { attribute: String },
    /// The rename target holds no rows of its own.
    EmptyTarget { from: String },
    /// Values of `attribute` are pairwise distinct.
    NoDuplicates { attribute: String },
    /// At most one relevant row exists, so one backfilled default stays unique.
    AtMostOneRow { attribute: String },
}

/// Steps for one model plus the shape to persist once they succeed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationPlan {
    pub uid: String,
    pub collection: String,
    /// Collection holding the rows before the plan runs.
    pub source_collection: String,
    pub shape: ModelShape,
    pub steps: Vec<MigrationStep>,
    #[serde(skip)]
    checks: Vec<Precondition>,
    /// Drafts are deleted by this plan and do not count in checks.
    #[serde(skip)]
    published_only: bool,
}

impl MigrationPlan {
    pub fn from_delta(model: &ModelDescriptor, shape: ModelShape, delta: &SchemaDelta) -> Self {
        let mut plan = Self {
            uid: model.uid.clone(),
            collection: shape.collection_name.clone(),
            source_collection: delta
                .renamed_from
                .clone()
                .unwrap_or_else(|| shape.collection_name.clone()),
            shape,
            steps: Vec::new(),
            checks: Vec::new(),
            published_only: delta.draft_and_publish == Some(Toggle::Disabled),
        };
        if delta.created {
            plan.steps.push(MigrationStep::CreateCollection);
            return plan;
        }

        if let Some(from) = &delta.renamed_from {
            plan.steps.push(MigrationStep::RenameCollection { from: from.clone() });
            plan.checks.push(Precondition::EmptyTarget { from: from.clone() });
        }
        match delta.draft_and_publish {
            Some(Toggle::Disabled) => plan.steps.push(MigrationStep::DisablePublication),
            Some(Toggle::Enabled) => plan.steps.push(MigrationStep::EnablePublication {
                created_at: plan.shape.timestamps.created_at.clone(),
            }),
            None => {}
        }
        for name in &delta.removed {
            plan.steps.push(MigrationStep::DropAttribute { name: name.clone() });
        }

        let mut alters = Vec::new();
        let mut unique_steps = Vec::new();
        for change in &delta.changed {
            let name = change.name.clone();
            if change.target_changed() {
                plan.steps.push(MigrationStep::ClearAttribute { name: name.clone() });
                if change.current.required {
                    plan.checks.push(Precondition::NoStoredRows {
                        attribute: name.clone(),
                    });
                }
            } else if change.required_tightened() {
                plan.checks.push(Precondition::NoMissingValues {
                    attribute: name.clone(),
                });
            }
            if change.type_changed() || change.previous.required != change.current.required {
                alters.push(MigrationStep::AlterAttribute { name: name.clone() });
            }
            if change.unique_disabled() {
                unique_steps.push(MigrationStep::DropUnique { name: name.clone() });
            }
            if change.unique_enabled() {
                plan.checks.push(Precondition::NoDuplicates {
                    attribute: name.clone(),
                });
                unique_steps.push(MigrationStep::EnableUnique { name });
            }
        }

        for name in &delta.added {
            let (required, unique, default) = model
                .attribute(name)
                .map(|spec| (spec.required, spec.unique, spec.default.clone()))
                .unwrap_or((false, false, None));
            match (&default, required, unique) {
                (None, true, _) => plan.checks.push(Precondition::NoRows {
                    attribute: name.clone(),
                }),
                (Some(_), _, true) => plan.checks.push(Precondition::AtMostOneRow {
                    attribute: name.clone(),
                }),
                _ => {}
            }
            plan.steps.push(MigrationStep::AddAttribute {
                name: name.clone(),
                default,
            });
            if unique {
                unique_steps.push(MigrationStep::EnableUnique { name: name.clone() });
            }
        }

        plan.steps.extend(alters);
        plan.steps.extend(unique_steps);
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Runs every read-only precondition against the rows as currently stored.
    pub async fn check_preconditions(
        &self,
        connection: &str,
        hooks: &dyn MigrationHooks,
    ) -> MigrationResult<()> {
        let collection = self.source_collection.as_str();
        for check in &self.checks {
            match check {
                Precondition::NoMissingValues { attribute } => {
                    let rows = self
                        .wrap(connection, hooks.count_missing(collection, attribute, self.published_only).await)?;
                    if rows > 0 {
                        return Err(MigrationError::RequiredAttributeHasNulls {
                            uid: self.uid.clone(),
                            attribute: attribute.clone(),
                            rows,
                        });
                    }
                }
                Precondition::NoRows { attribute } => {
                    let rows = self
                        .wrap(connection, hooks.count_missing(collection, attribute, self.published_only).await)?;
                    if rows > 0 {
                        return Err(MigrationError::RequiredAttributeWithoutDefault {
                            uid: self.uid.clone(),
                            attribute: attribute.clone(),
                            rows,
                        });
                    }
                }
                Precondition::NoStoredRows { attribute } => {
                    let rows = self
                        .wrap(connection, hooks.count_rows(collection, self.published_only).await)?;
                    if rows > 0 {
                        return Err(MigrationError::RequiredRelationRetargeted {
                            uid: self.uid.clone(),
                            attribute: attribute.clone(),
                            rows,
                        });
                    }
                }
                Precondition::EmptyTarget { from } => {
                    let rows = self.wrap(connection, hooks.count_rows(&self.collection, false).await)?;
                    if rows > 0 {
                        return Err(MigrationError::RenameTargetNotEmpty {
                            uid: self.uid.clone(),
                            from: from.clone(),
                            collection: self.collection.clone(),
                            rows,
                        });
                    }
                }
                Precondition::NoDuplicates { attribute } => {
                    let duplicates = self.wrap(
                        connection,
                        hooks
                            .count_duplicates(collection, attribute, self.published_only)
                            .await,
                    )?;
                    if duplicates > 0 {
                        return Err(MigrationError::UniqueAttributeHasDuplicates {
                            uid: self.uid.clone(),
                            attribute: attribute.clone(),
                            duplicates,
                        });
                    }
                }
                Precondition::AtMostOneRow { attribute } => {
                    let rows = self
                        .wrap(connection, hooks.count_missing(collection, attribute, self.published_only).await)?;
                    if rows > 1 {
                        return Err(MigrationError::UniqueAttributeHasDuplicates {
                            uid: self.uid.clone(),
                            attribute: attribute.clone(),
                            duplicates: rows - 1,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn wrap<T>(&self, connection: &str, result: Result<T, ConnectorError>) -> MigrationResult<T> {
        result.map_err(|source| MigrationError::Connector {
            uid: self.uid.clone(),
            connection: connection.to_string(),
            source,
        })
    }
}
