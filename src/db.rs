use crate::ingest::record::{NewMark, NewStudent, NewSubject};
use crate::ingest::schema::{EntityKind, DATE_FORMAT};
use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;

pub const DB_FILE: &str = "tracker.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("open {}", db_path.to_string_lossy()))?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Creates every table if absent. Safe to run on each open.
pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL CHECK(length(trim(name)) >= 2),
            class TEXT NOT NULL CHECK(class IN ('10', '11', '12')),
            section TEXT NOT NULL CHECK(section IN ('A', 'B', 'C')),
            dob TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE
                CHECK(length(trim(name)) BETWEEN 2 AND 50),
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            marks_obtained INTEGER NOT NULL CHECK(marks_obtained >= 0),
            max_marks INTEGER NOT NULL CHECK(max_marks > 0),
            assessment_date TEXT NOT NULL,
            assessment_type TEXT NOT NULL,
            created_at TEXT NOT NULL,
            CHECK(marks_obtained <= max_marks),
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(subject_id) REFERENCES subjects(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_subject ON marks(subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_runs(
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_sha256 TEXT NOT NULL,
            format TEXT NOT NULL,
            total INTEGER NOT NULL,
            succeeded INTEGER NOT NULL,
            failed INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            summary_json TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_import_runs_finished ON import_runs(finished_at)",
        [],
    )?;

    Ok(())
}

pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("settings value for {}", key))?,
        )),
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

fn table_name(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Students => "students",
        EntityKind::Subjects => "subjects",
        EntityKind::Marks => "marks",
    }
}

pub fn entity_exists(conn: &Connection, kind: EntityKind, id: i64) -> rusqlite::Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table_name(kind));
    Ok(conn
        .query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()?
        .is_some())
}

pub fn insert_student(
    conn: &Connection,
    s: &NewStudent,
    created_at: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO students(name, class, section, dob, created_at) VALUES(?, ?, ?, ?, ?)",
        (
            &s.name,
            &s.class,
            &s.section,
            s.dob.map(|d| d.format(DATE_FORMAT).to_string()),
            created_at,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_subject(
    conn: &Connection,
    s: &NewSubject,
    created_at: &str,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO subjects(name, created_at) VALUES(?, ?)",
        (&s.name, created_at),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_mark(conn: &Connection, m: &NewMark, created_at: &str) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO marks(
            student_id, subject_id, marks_obtained, max_marks,
            assessment_date, assessment_type, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            m.student_id,
            m.subject_id,
            m.marks_obtained,
            m.max_marks,
            m.assessment_date.format(DATE_FORMAT).to_string(),
            &m.assessment_type,
            created_at,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: i64,
    pub name: String,
    pub class: String,
    pub section: String,
    pub dob: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkRow {
    pub id: i64,
    pub student_id: i64,
    pub student_name: String,
    pub subject_id: i64,
    pub subject_name: String,
    pub marks_obtained: i64,
    pub max_marks: i64,
    pub assessment_date: String,
    pub assessment_type: String,
    pub created_at: String,
}

pub fn list_students(conn: &Connection) -> rusqlite::Result<Vec<StudentRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, class, section, dob, created_at FROM students ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                name: r.get(1)?,
                class: r.get(2)?,
                section: r.get(3)?,
                dob: r.get(4)?,
                created_at: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_subjects(conn: &Connection) -> rusqlite::Result<Vec<SubjectRow>> {
    let mut stmt = conn.prepare("SELECT id, name, created_at FROM subjects ORDER BY id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(SubjectRow {
                id: r.get(0)?,
                name: r.get(1)?,
                created_at: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_marks(conn: &Connection) -> rusqlite::Result<Vec<MarkRow>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.student_id, st.name, m.subject_id, su.name,
                m.marks_obtained, m.max_marks, m.assessment_date, m.assessment_type, m.created_at
         FROM marks m
         JOIN students st ON st.id = m.student_id
         JOIN subjects su ON su.id = m.subject_id
         ORDER BY m.id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(MarkRow {
                id: r.get(0)?,
                student_id: r.get(1)?,
                student_name: r.get(2)?,
                subject_id: r.get(3)?,
                subject_name: r.get(4)?,
                marks_obtained: r.get(5)?,
                max_marks: r.get(6)?,
                assessment_date: r.get(7)?,
                assessment_type: r.get(8)?,
                created_at: r.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn count_rows(conn: &Connection, kind: EntityKind) -> rusqlite::Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table_name(kind));
    conn.query_row(&sql, [], |r| r.get(0))
}

/// Total obtained over total possible across all marks, as a percentage.
/// `None` without marks.
pub fn average_mark_percentage(conn: &Connection) -> rusqlite::Result<Option<f64>> {
    conn.query_row(
        "SELECT CAST(SUM(marks_obtained) AS REAL) * 100.0 / SUM(max_marks) FROM marks",
        [],
        |r| r.get(0),
    )
}

/// Deletes every student, subject and mark and restarts id assignment at 1.
pub fn clear_all(conn: &Connection) -> anyhow::Result<()> {
    // Rolls back on drop if any delete fails.
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "DELETE FROM marks;
         DELETE FROM students;
         DELETE FROM subjects;
         DELETE FROM sqlite_sequence WHERE name IN ('marks', 'students', 'subjects');",
    )
    .context("clear workspace data")?;
    tx.commit()?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRunRow {
    pub id: String,
    pub kind: String,
    pub file_name: String,
    pub file_sha256: String,
    pub format: String,
    pub total: i64,
    pub succeeded: i64,
    pub failed: i64,
    pub started_at: String,
    pub finished_at: String,
    pub summary: serde_json::Value,
}

pub fn insert_import_run(conn: &Connection, run: &ImportRunRow) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO import_runs(
            id, kind, file_name, file_sha256, format, total, succeeded, failed,
            started_at, finished_at, summary_json
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            run.id,
            run.kind,
            run.file_name,
            run.file_sha256,
            run.format,
            run.total,
            run.succeeded,
            run.failed,
            run.started_at,
            run.finished_at,
            serde_json::to_string(&run.summary)?,
        ],
    )?;
    Ok(())
}

pub fn list_import_runs(conn: &Connection, limit: i64) -> anyhow::Result<Vec<ImportRunRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, file_name, file_sha256, format, total, succeeded, failed,
                started_at, finished_at, summary_json
         FROM import_runs
         ORDER BY finished_at DESC, rowid DESC
         LIMIT ?",
    )?;
    let raw = stmt
        .query_map([limit], |r| {
            Ok((
                ImportRunRow {
                    id: r.get(0)?,
                    kind: r.get(1)?,
                    file_name: r.get(2)?,
                    file_sha256: r.get(3)?,
                    format: r.get(4)?,
                    total: r.get(5)?,
                    succeeded: r.get(6)?,
                    failed: r.get(7)?,
                    started_at: r.get(8)?,
                    finished_at: r.get(9)?,
                    summary: serde_json::Value::Null,
                },
                r.get::<_, String>(10)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(raw.len());
    for (mut run, summary_json) in raw {
        run.summary = match serde_json::from_str(&summary_json) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(import_id = %run.id, error = %e, "import summary unreadable");
                serde_json::Value::Null
            }
        };
        out.push(run);
    }
    Ok(out)
}
