use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "centralizer.sqlite3";

pub fn open_db(workspace: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(busy_timeout)?;
    // WAL keeps readers on the last committed snapshot while a centralization holds the
    // write lock.
    conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get::<_, String>(0))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    // Collaborator tables. The roster and gradebook own these rows; the engines only read.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS management_periods(
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            active INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS actors(
            id TEXT PRIMARY KEY,
            role TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS classroom_offerings(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            level TEXT NOT NULL,
            grade INTEGER NOT NULL,
            section TEXT NOT NULL,
            subject_code TEXT NOT NULL,
            period_id TEXT NOT NULL,
            FOREIGN KEY(period_id) REFERENCES management_periods(id)
        )",
        [],
    )?;
    // Older workspaces were created before offerings tracked their teacher.
    ensure_offerings_teacher_id(conn)?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            FOREIGN KEY(classroom_id) REFERENCES classroom_offerings(id),
            UNIQUE(classroom_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_classroom ON enrollments(classroom_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS classroom_final_scores(
            enrollment_id TEXT NOT NULL,
            term INTEGER NOT NULL,
            score REAL NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(enrollment_id, term),
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS expected_subject_sets(
            level TEXT NOT NULL,
            grade INTEGER NOT NULL,
            version INTEGER NOT NULL,
            subjects_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY(level, grade, version)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS centralized_records(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            level TEXT NOT NULL,
            grade INTEGER NOT NULL,
            section TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject_code TEXT NOT NULL,
            term INTEGER NOT NULL,
            score REAL NOT NULL,
            attributed_to TEXT NOT NULL,
            period_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(school_id, level, grade, section, student_id, subject_code, term)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_centralized_records_slice
         ON centralized_records(school_id, level, grade, section, term, subject_code)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS centralized_records_archive(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            level TEXT NOT NULL,
            grade INTEGER NOT NULL,
            section TEXT NOT NULL,
            student_id TEXT NOT NULL,
            subject_code TEXT NOT NULL,
            term INTEGER NOT NULL,
            score REAL NOT NULL,
            attributed_to TEXT NOT NULL,
            period_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            archived_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_centralized_records_archive_period
         ON centralized_records_archive(period_id)",
        [],
    )?;

    Ok(())
}

fn ensure_offerings_teacher_id(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "classroom_offerings", "teacher_id")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE classroom_offerings ADD COLUMN teacher_id TEXT",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("first init");
        init_schema(&conn).expect("second init");
        assert!(table_has_column(&conn, "classroom_offerings", "teacher_id").expect("pragma"));
    }

    #[test]
    fn ledger_key_is_unique_at_the_storage_layer() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("init");
        let insert = "INSERT INTO centralized_records(
                id, school_id, level, grade, section, student_id, subject_code, term,
                score, attributed_to, period_id, created_at, updated_at)
             VALUES(?, 'S', 'primary', 3, 'A', 'st1', 'MAT', 1, 80, 't1', 'p', 'x', 'x')";
        conn.execute(insert, ["r1"]).expect("first insert");
        assert!(conn.execute(insert, ["r2"]).is_err());
    }

    #[test]
    fn settings_round_trip_and_overwrite() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("init");
        assert!(settings_get_json(&conn, "k").expect("get").is_none());
        settings_set_json(&conn, "k", &json!({ "a": 1 })).expect("set");
        settings_set_json(&conn, "k", &json!({ "a": 2 })).expect("set again");
        assert_eq!(
            settings_get_json(&conn, "k").expect("get"),
            Some(json!({ "a": 2 }))
        );
    }
}
