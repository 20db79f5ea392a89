use geosite_core::db::migrations::latest_version;
use geosite_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "projects");
    assert_table_exists(&conn, "sites");
    assert_table_exists(&conn, "site_analytics");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("geosite.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "sites");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
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

#[test]
fn foreign_keys_refuse_orphaned_sites() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO projects (uuid, owner_uuid, name) VALUES ('p-1', 'o-1', 'Project');",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO sites (uuid, project_uuid, name, geometry) VALUES ('s-1', 'p-1', 'Site', '{}');",
        [],
    )
    .unwrap();

    let orphan = conn.execute(
        "INSERT INTO sites (uuid, project_uuid, name, geometry) VALUES ('s-2', 'missing', 'Site', '{}');",
        [],
    );
    assert!(orphan.is_err());

    let premature = conn.execute("DELETE FROM projects WHERE uuid = 'p-1';", []);
    assert!(premature.is_err());
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
