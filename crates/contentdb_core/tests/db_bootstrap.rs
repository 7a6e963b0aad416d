use contentdb_core::db::migrations::latest_version;
use contentdb_core::db::{open_db, open_db_in_memory, DbError, DEFAULT_BUSY_TIMEOUT};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "content_documents");
    assert_table_exists(&conn, "content_unique_values");
    assert_table_exists(&conn, "model_shapes");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("content.db");

    let conn_first = open_db(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    conn_first
        .execute(
            "INSERT INTO content_documents (collection, body) VALUES ('dog', '{}');",
            [],
        )
        .unwrap();
    drop(conn_first);

    let conn_second = open_db(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    let rows: i64 = conn_second
        .query_row("SELECT COUNT(*) FROM content_documents;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn documents_must_be_valid_json() {
    let conn = open_db_in_memory().unwrap();
    let err = conn
        .execute(
            "INSERT INTO content_documents (collection, body) VALUES ('dog', 'not json');",
            [],
        )
        .unwrap_err();
    assert!(err.to_string().contains("CHECK"));
}

#[test]
fn deleting_a_document_releases_its_unique_values() {
    let conn = open_db_in_memory().unwrap();
    conn.execute_batch(
        "INSERT INTO content_documents (collection, body) VALUES ('dog', '{\"code\":\"a\"}');
         INSERT INTO content_unique_values (collection, attribute, value, document_id)
         VALUES ('dog', 'code', '\"a\"', last_insert_rowid());
         DELETE FROM content_documents;",
    )
    .unwrap();

    let claims: i64 = conn
        .query_row("SELECT COUNT(*) FROM content_unique_values;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(claims, 0);
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path, DEFAULT_BUSY_TIMEOUT).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
