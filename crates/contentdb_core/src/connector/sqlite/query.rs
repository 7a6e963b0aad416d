use super::SqliteHandle;
use crate::connector::{now_timestamp, unique_key, ConnectorError, ConnectorResult, TimestampNames};
use crate::model::constants::ID_ATTRIBUTE;
use crate::model::descriptor::ModelDescriptor;
use crate::query::{ConnectorQuery, Entry, Filter};
use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde_json::Value;
use std::sync::Arc;

/// Query capability of one model over a SQLite connection.
pub struct SqliteQuery {
    handle: SqliteHandle,
    model: Arc<ModelDescriptor>,
    timestamps: TimestampNames,
}

impl SqliteQuery {
    pub(crate) fn new(
        handle: SqliteHandle,
        model: Arc<ModelDescriptor>,
        timestamps: TimestampNames,
    ) -> Self {
        Self {
            handle,
            model,
            timestamps,
        }
    }
}

#[async_trait]
impl ConnectorQuery for SqliteQuery {
    async fn find(&self, filter: &Filter) -> ConnectorResult<Vec<Entry>> {
        let collection = self.model.collection_name.clone();
        let rows = self
            .handle
            .run(move |conn| load_documents(conn, &collection))
            .await?;
        Ok(filter.apply(rows))
    }

    async fn find_one(&self, id: i64) -> ConnectorResult<Option<Entry>> {
        let collection = self.model.collection_name.clone();
        self.handle
            .run(move |conn| load_document(conn, &collection, id))
            .await
    }

    async fn count(&self, filter: &Filter) -> ConnectorResult<u64> {
        Ok(self.find(filter).await?.len() as u64)
    }

    async fn create(&self, values: Entry) -> ConnectorResult<Entry> {
        let model = Arc::clone(&self.model);
        let timestamps = self.timestamps;
        self.handle
            .run(move |conn| {
                let collection = model.collection_name.as_str();
                let now = Value::String(now_timestamp());
                let mut body = values;
                body.remove(ID_ATTRIBUTE);
                body.insert(timestamps.created_at.to_string(), now.clone());
                body.insert(timestamps.updated_at.to_string(), now);

                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO content_documents (collection, body) VALUES (?1, ?2);",
                    params![collection, serde_json::to_string(&body)?],
                )?;
                let id = tx.last_insert_rowid();
                for attribute in model.unique_attributes() {
                    if let Some(key) = body.get(&attribute).and_then(unique_key) {
                        index_unique(&tx, collection, &attribute, &key, id)?;
                    }
                }
                tx.commit()?;
                Ok(with_id(id, body))
            })
            .await
    }

    async fn update(&self, id: i64, values: Entry) -> ConnectorResult<Option<Entry>> {
        let model = Arc::clone(&self.model);
        let timestamps = self.timestamps;
        self.handle
            .run(move |conn| {
                let collection = model.collection_name.as_str();
                let tx = conn.transaction()?;
                let Some(mut body) = load_document(&tx, collection, id)? else {
                    return Ok(None);
                };
                body.remove(ID_ATTRIBUTE);
                for (name, value) in values {
                    if name != ID_ATTRIBUTE {
                        body.insert(name, value);
                    }
                }
                body.insert(
                    timestamps.updated_at.to_string(),
                    Value::String(now_timestamp()),
                );

                tx.execute(
                    "UPDATE content_documents SET body = ?1 WHERE id = ?2;",
                    params![serde_json::to_string(&body)?, id],
                )?;
                for attribute in model.unique_attributes() {
                    tx.execute(
                        "DELETE FROM content_unique_values WHERE document_id = ?1 AND attribute = ?2;",
                        params![id, attribute],
                    )?;
                    if let Some(key) = body.get(&attribute).and_then(unique_key) {
                        index_unique(&tx, collection, &attribute, &key, id)?;
                    }
                }
                tx.commit()?;
                Ok(Some(with_id(id, body)))
            })
            .await
    }

    async fn delete(&self, id: i64) -> ConnectorResult<Option<Entry>> {
        let collection = self.model.collection_name.clone();
        self.handle
            .run(move |conn| {
                let tx = conn.transaction()?;
                let Some(entry) = load_document(&tx, &collection, id)? else {
                    return Ok(None);
                };
                tx.execute("DELETE FROM content_documents WHERE id = ?1;", [id])?;
                tx.commit()?;
                Ok(Some(entry))
            })
            .await
    }
}

/// Rows of `collection` in id order.
pub(super) fn load_documents(conn: &Connection, collection: &str) -> ConnectorResult<Vec<Entry>> {
    let mut stmt = conn.prepare(
        "SELECT id, body FROM content_documents WHERE collection = ?1 ORDER BY id ASC;",
    )?;
    let rows = stmt.query_map([collection], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, body) = row?;
        entries.push(decode_document(collection, id, &body)?);
    }
    Ok(entries)
}

fn load_document(conn: &Connection, collection: &str, id: i64) -> ConnectorResult<Option<Entry>> {
    let body = conn
        .query_row(
            "SELECT body FROM content_documents WHERE id = ?1 AND collection = ?2;",
            params![id, collection],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    body.map(|body| decode_document(collection, id, &body))
        .transpose()
}

fn decode_document(collection: &str, id: i64, body: &str) -> ConnectorResult<Entry> {
    match serde_json::from_str::<Value>(body)? {
        Value::Object(body) => Ok(with_id(id, body)),
        _ => Err(ConnectorError::CorruptDocument {
            collection: collection.to_string(),
            id,
        }),
    }
}

fn with_id(id: i64, body: Entry) -> Entry {
    let mut entry = Entry::new();
    entry.insert(ID_ATTRIBUTE.to_string(), Value::from(id));
    entry.extend(body);
    entry
}

/// Claims `key` for `document_id`; an existing claim is a unique violation.
pub(super) fn index_unique(
    conn: &Connection,
    collection: &str,
    attribute: &str,
    key: &str,
    document_id: i64,
) -> ConnectorResult<()> {
    let inserted = conn.execute(
        "INSERT INTO content_unique_values (collection, attribute, value, document_id)
         VALUES (?1, ?2, ?3, ?4);",
        params![collection, attribute, key, document_id],
    );
    match inserted {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == ErrorCode::ConstraintViolation =>
        {
            Err(ConnectorError::UniqueViolation {
                collection: collection.to_string(),
                attribute: attribute.to_string(),
            })
        }
        Err(err) => Err(err.into()),
    }
}
