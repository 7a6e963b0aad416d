use super::query::{index_unique, load_documents};
use super::{json_path, SqliteConnector};
use crate::connector::{unique_key, ConnectorResult, now_timestamp};
use crate::migration::{MigrationHooks, MigrationPlan, MigrationStep, ModelShape};
use crate::model::constants::PUBLISHED_AT_ATTRIBUTE;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

const MISSING: &str = "COALESCE(json_type(body, ?2), 'null') = 'null'";
const PUBLISHED_FILTER: &str =
    "(?3 = 0 OR COALESCE(json_type(body, '$.\"published_at\"'), 'null') != 'null')";

#[async_trait]
impl MigrationHooks for SqliteConnector {
    async fn stored_shape(&self, uid: &str) -> ConnectorResult<Option<ModelShape>> {
        let uid = uid.to_string();
        self.handle
            .run(move |conn| {
                let raw = conn
                    .query_row(
                        "SELECT shape FROM model_shapes WHERE uid = ?1;",
                        [uid.as_str()],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(raw
                    .map(|raw| serde_json::from_str::<ModelShape>(&raw))
                    .transpose()?)
            })
            .await
    }

    async fn count_rows(&self, collection: &str, published_only: bool) -> ConnectorResult<u64> {
        let collection = collection.to_string();
        self.handle
            .run(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM content_documents
                     WHERE collection = ?1
                       AND (?2 = 0 OR COALESCE(json_type(body, '$.\"published_at\"'), 'null') != 'null');",
                    params![collection, published_only],
                    |row| row.get(0),
                )?;
                Ok(count.max(0) as u64)
            })
            .await
    }

    async fn count_missing(
        &self,
        collection: &str,
        attribute: &str,
        published_only: bool,
    ) -> ConnectorResult<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM content_documents
             WHERE collection = ?1 AND {MISSING} AND {PUBLISHED_FILTER};"
        );
        let (collection, path) = (collection.to_string(), json_path(attribute));
        self.handle
            .run(move |conn| {
                let count: i64 = conn.query_row(
                    &sql,
                    params![collection, path, published_only],
                    |row| row.get(0),
                )?;
                Ok(count.max(0) as u64)
            })
            .await
    }

    async fn count_duplicates(
        &self,
        collection: &str,
        attribute: &str,
        published_only: bool,
    ) -> ConnectorResult<u64> {
        let sql = format!(
            "SELECT COALESCE(SUM(n - 1), 0) FROM (
               SELECT COUNT(*) AS n FROM content_documents
               WHERE collection = ?1 AND NOT {MISSING} AND {PUBLISHED_FILTER}
               GROUP BY json_type(body, ?2), json_extract(body, ?2)
             );"
        );
        let (collection, path) = (collection.to_string(), json_path(attribute));
        self.handle
            .run(move |conn| {
                let count: i64 = conn.query_row(
                    &sql,
                    params![collection, path, published_only],
                    |row| row.get(0),
                )?;
                Ok(count.max(0) as u64)
            })
            .await
    }

    async fn apply(&self, plan: &MigrationPlan) -> ConnectorResult<()> {
        let plan = plan.clone();
        self.handle
            .run(move |conn| {
                let tx = conn.transaction()?;
                for step in &plan.steps {
                    apply_step(&tx, &plan.collection, step)?;
                }
                tx.execute(
                    "INSERT INTO model_shapes (uid, collection, shape, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(uid) DO UPDATE SET
                       collection = excluded.collection,
                       shape = excluded.shape,
                       updated_at = excluded.updated_at;",
                    params![
                        plan.uid,
                        plan.collection,
                        serde_json::to_string(&plan.shape)?,
                        now_timestamp()
                    ],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }
}

fn apply_step(conn: &Connection, collection: &str, step: &MigrationStep) -> ConnectorResult<()> {
    let published_at = json_path(PUBLISHED_AT_ATTRIBUTE);
    match step {
        MigrationStep::CreateCollection
        | MigrationStep::AlterAttribute { .. }
        | MigrationStep::AddAttribute { default: None, .. } => {}
        MigrationStep::RenameCollection { from } => {
            conn.execute(
                "UPDATE content_documents SET collection = ?1 WHERE collection = ?2;",
                params![collection, from],
            )?;
            conn.execute(
                "UPDATE content_unique_values SET collection = ?1 WHERE collection = ?2;",
                params![collection, from],
            )?;
        }
        MigrationStep::DisablePublication => {
            conn.execute(
                &format!("DELETE FROM content_documents WHERE collection = ?1 AND {MISSING};"),
                params![collection, published_at],
            )?;
            conn.execute(
                "UPDATE content_documents SET body = json_remove(body, ?2) WHERE collection = ?1;",
                params![collection, published_at],
            )?;
        }
        MigrationStep::EnablePublication { created_at } => {
            conn.execute(
                &format!(
                    "UPDATE content_documents SET body = json_set(body, ?2, json_extract(body, ?3))
                     WHERE collection = ?1 AND {MISSING};"
                ),
                params![collection, published_at, json_path(created_at)],
            )?;
        }
        MigrationStep::DropAttribute { name } | MigrationStep::ClearAttribute { name } => {
            conn.execute(
                "UPDATE content_documents SET body = json_remove(body, ?2) WHERE collection = ?1;",
                params![collection, json_path(name)],
            )?;
            release_unique(conn, collection, name)?;
        }
        MigrationStep::AddAttribute {
            name,
            default: Some(default),
        } => {
            conn.execute(
                &format!(
                    "UPDATE content_documents SET body = json_set(body, ?2, json(?3))
                     WHERE collection = ?1 AND {MISSING};"
                ),
                params![collection, json_path(name), serde_json::to_string(default)?],
            )?;
        }
        MigrationStep::DropUnique { name } => release_unique(conn, collection, name)?,
        MigrationStep::EnableUnique { name } => {
            release_unique(conn, collection, name)?;
            for entry in load_documents(conn, collection)? {
                let Some(id) = entry.get("id").and_then(serde_json::Value::as_i64) else {
                    continue;
                };
                if let Some(key) = entry.get(name.as_str()).and_then(unique_key) {
                    index_unique(conn, collection, name, &key, id)?;
                }
            }
        }
    }
    Ok(())
}

fn release_unique(conn: &Connection, collection: &str, attribute: &str) -> ConnectorResult<()> {
    conn.execute(
        "DELETE FROM content_unique_values WHERE collection = ?1 AND attribute = ?2;",
        params![collection, attribute],
    )?;
    Ok(())
}
