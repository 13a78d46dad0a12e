use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("routines.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // Two sidecars may share a workspace; wait briefly rather than fail on a held lock.
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS routines(
            id TEXT PRIMARY KEY,
            name TEXT,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS periods(
            routine_id TEXT NOT NULL,
            day TEXT NOT NULL,
            period TEXT NOT NULL,
            subject_code TEXT NOT NULL,
            subject_name TEXT NOT NULL,
            teacher_id TEXT,
            teacher_name TEXT NOT NULL,
            room TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(routine_id, day, period),
            FOREIGN KEY(routine_id) REFERENCES routines(id)
        )",
        [],
    )?;
    ensure_periods_updated_at(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_periods_slot_teacher ON periods(day, period, teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_changes(
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            routine_id TEXT NOT NULL,
            day TEXT NOT NULL,
            period TEXT NOT NULL,
            changed_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            code TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            subject_code TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(subject_code) REFERENCES subjects(code)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_subject ON teachers(subject_code)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parameters(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_periods_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "periods", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE periods ADD COLUMN updated_at TEXT", [])?;
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

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineRow {
    pub id: String,
    pub name: Option<String>,
    pub created_at: Option<String>,
}

pub fn routines_list(conn: &Connection) -> anyhow::Result<Vec<RoutineRow>> {
    let mut stmt = conn.prepare("SELECT id, name, created_at FROM routines ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(RoutineRow {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn routine_exists(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM routines WHERE id = ?", [id], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Create-or-merge: an existing routine keeps its name and creation time.
pub fn routine_create(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let inserted = conn.execute(
        "INSERT INTO routines(id, name, created_at) VALUES(?, NULL, ?)
         ON CONFLICT(id) DO NOTHING",
        (id, now_rfc3339()),
    )?;
    Ok(inserted > 0)
}

pub fn routine_set_name(conn: &Connection, id: &str, name: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO routines(id, name, created_at) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        (id, name, now_rfc3339()),
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    pub code: String,
    pub name: String,
    pub teacher_count: i64,
}

pub fn subjects_list(conn: &Connection) -> anyhow::Result<Vec<SubjectRow>> {
    let mut stmt = conn.prepare(
        "SELECT
           s.code,
           s.name,
           (SELECT COUNT(*) FROM teachers t WHERE t.subject_code = s.code) AS teacher_count
         FROM subjects s
         ORDER BY s.code",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(SubjectRow {
                code: row.get(0)?,
                name: row.get(1)?,
                teacher_count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn subject_name(conn: &Connection, code: &str) -> anyhow::Result<Option<String>> {
    Ok(conn
        .query_row("SELECT name FROM subjects WHERE code = ?", [code], |r| {
            r.get(0)
        })
        .optional()?)
}

pub fn subject_upsert(conn: &Connection, code: &str, name: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO subjects(code, name) VALUES(?, ?)
         ON CONFLICT(code) DO UPDATE SET name = excluded.name",
        (code, name),
    )?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherRow {
    pub id: String,
    pub subject_code: String,
    pub name: String,
}

pub fn teacher_add(conn: &Connection, subject_code: &str, name: &str) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, subject_code, name) VALUES(?, ?, ?)",
        (&id, subject_code, name),
    )?;
    Ok(id)
}

pub fn teachers_for_subject(conn: &Connection, subject_code: &str) -> anyhow::Result<Vec<TeacherRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, subject_code, name FROM teachers WHERE subject_code = ? ORDER BY name, id",
    )?;
    let rows = stmt
        .query_map([subject_code], teacher_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn teachers_all(conn: &Connection) -> anyhow::Result<Vec<TeacherRow>> {
    let mut stmt =
        conn.prepare("SELECT id, subject_code, name FROM teachers ORDER BY name, subject_code, id")?;
    let rows = stmt
        .query_map([], teacher_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn teacher_in_subject(
    conn: &Connection,
    subject_code: &str,
    teacher_id: &str,
) -> anyhow::Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT name FROM teachers WHERE subject_code = ? AND id = ?",
            (subject_code, teacher_id),
            |r| r.get(0),
        )
        .optional()?)
}

fn teacher_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TeacherRow> {
    Ok(TeacherRow {
        id: row.get(0)?,
        subject_code: row.get(1)?,
        name: row.get(2)?,
    })
}

pub fn parameter_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM parameters WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn parameter_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<String> {
    let updated_at = now_rfc3339();
    conn.execute(
        "INSERT INTO parameters(key, value_json, updated_at) VALUES(?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET
           value_json = excluded.value_json,
           updated_at = excluded.updated_at",
        (key, serde_json::to_string(value)?, &updated_at),
    )?;
    Ok(updated_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory db");
        init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn routine_create_is_merge_and_keeps_name() {
        let conn = conn();
        assert!(routine_create(&conn, "IT1").expect("create"));
        routine_set_name(&conn, "IT1", "IT Year 1").expect("rename");
        assert!(!routine_create(&conn, "IT1").expect("create again"));
        let rows = routines_list(&conn).expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name.as_deref(), Some("IT Year 1"));
        assert!(rows[0].created_at.is_some());
    }

    #[test]
    fn subjects_report_teacher_counts() {
        let conn = conn();
        subject_upsert(&conn, "CS101", "Programming").expect("subject");
        subject_upsert(&conn, "MA101", "Calculus").expect("subject");
        let t = teacher_add(&conn, "CS101", "Ada").expect("teacher");
        teacher_add(&conn, "CS101", "Alan").expect("teacher");

        let subjects = subjects_list(&conn).expect("list");
        assert_eq!(subjects[0].code, "CS101");
        assert_eq!(subjects[0].teacher_count, 2);
        assert_eq!(subjects[1].teacher_count, 0);
        assert_eq!(
            teacher_in_subject(&conn, "CS101", &t).expect("lookup").as_deref(),
            Some("Ada")
        );
        assert_eq!(teacher_in_subject(&conn, "MA101", &t).expect("lookup"), None);
    }

    #[test]
    fn parameters_overwrite_in_place() {
        let conn = conn();
        parameter_set_json(&conn, "preventConsecLab", &json!(true)).expect("set");
        parameter_set_json(&conn, "preventConsecLab", &json!(false)).expect("set");
        assert_eq!(
            parameter_get_json(&conn, "preventConsecLab").expect("get"),
            Some(json!(false))
        );
        assert_eq!(parameter_get_json(&conn, "workHours").expect("get"), None);
    }
}
