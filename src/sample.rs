//! Downloadable import templates and the built-in demonstration roster.

use crate::db;
use crate::ingest::record::{NewMark, NewStudent, NewSubject};
use crate::ingest::schema::{schema_for, EntityKind, DATE_FORMAT};
use anyhow::Context;
use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;

const TEMPLATE_STUDENTS: &[[&str; 4]] = &[
    ["John Doe", "10", "A", "2008-05-15"],
    ["Jane Smith", "11", "B", "2007-03-20"],
    ["Mike Johnson", "12", "C", "2006-11-10"],
    ["Sarah Wilson", "10", "A", "2008-08-25"],
    ["David Brown", "11", "B", "2007-12-05"],
];

const TEMPLATE_SUBJECTS: &[&str] = &[
    "Mathematics",
    "Physics",
    "Chemistry",
    "Biology",
    "English",
    "History",
    "Geography",
];

// student, subject, obtained, max, date, type
const TEMPLATE_MARKS: &[(i64, i64, i64, i64, &str, &str)] = &[
    (1, 1, 85, 100, "2024-01-15", "Final"),
    (1, 2, 78, 100, "2024-01-16", "Final"),
    (1, 3, 92, 100, "2024-01-17", "Final"),
    (2, 1, 88, 100, "2024-01-15", "Final"),
    (2, 2, 75, 100, "2024-01-16", "Final"),
    (2, 4, 82, 100, "2024-01-18", "Final"),
    (3, 2, 90, 100, "2024-01-16", "Final"),
    (3, 3, 85, 100, "2024-01-17", "Final"),
    (3, 5, 79, 100, "2024-01-19", "Final"),
];

pub const SAMPLE_STUDENTS: &[(&str, &str, &str, &str)] = &[
    ("Aarav Sharma", "10", "A", "2008-05-20"),
    ("Priya Patel", "10", "A", "2008-03-15"),
    ("Rohit Kumar", "10", "B", "2008-07-10"),
    ("Sneha Singh", "10", "B", "2008-01-25"),
    ("Vikram Rao", "11", "A", "2007-11-05"),
    ("Anita Desai", "11", "A", "2007-09-30"),
    ("Kiran Reddy", "11", "B", "2007-12-18"),
    ("Meera Joshi", "12", "A", "2006-08-22"),
    ("Arjun Nair", "12", "A", "2006-04-14"),
    ("Deepika Gupta", "12", "B", "2006-06-08"),
];

pub const SAMPLE_SUBJECTS: &[&str] = &[
    "Mathematics",
    "Physics",
    "Chemistry",
    "Biology",
    "English",
    "History",
    "Geography",
    "Computer Science",
];

const SAMPLE_MARKS_PER_STUDENT: usize = 5;
const SAMPLE_ASSESSMENT_TYPES: &[&str] = &["Quiz", "Assignment", "Midterm", "Final"];

fn template_records(kind: EntityKind) -> Vec<Vec<String>> {
    match kind {
        EntityKind::Students => TEMPLATE_STUDENTS
            .iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect(),
        EntityKind::Subjects => TEMPLATE_SUBJECTS.iter().map(|s| vec![s.to_string()]).collect(),
        EntityKind::Marks => TEMPLATE_MARKS
            .iter()
            .map(|(st, su, ob, mx, date, ty)| {
                vec![
                    st.to_string(),
                    su.to_string(),
                    ob.to_string(),
                    mx.to_string(),
                    date.to_string(),
                    ty.to_string(),
                ]
            })
            .collect(),
    }
}

/// Sample file for `kind` with every schema column as header. Returns bytes and row count.
pub fn template_csv(kind: EntityKind, delimiter: u8) -> anyhow::Result<(Vec<u8>, usize)> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    wtr.write_record(schema_for(kind).columns.iter().map(|c| c.name))?;
    let records = template_records(kind);
    for rec in &records {
        wtr.write_record(rec)?;
    }
    let bytes = wtr.into_inner().context("flush template")?;
    Ok((bytes, records.len()))
}

pub fn write_template(kind: EntityKind, delimiter: u8, out_path: &Path) -> anyhow::Result<usize> {
    let (bytes, rows) = template_csv(kind, delimiter)?;
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out_path, bytes)
        .with_context(|| format!("write {}", out_path.to_string_lossy()))?;
    Ok(rows)
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedCounts {
    pub students: usize,
    pub subjects: usize,
    pub marks: usize,
}

/// True if any of the demonstration students is on the roster.
pub fn sample_present(conn: &Connection) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM students WHERE name = ? LIMIT 1")?;
    for (name, ..) in SAMPLE_STUDENTS {
        if stmt.exists([*name])? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Inserts the demonstration roster. Marks are derived from the student and subject
/// positions so repeated seeding gives the same scores; dates fall in the 30 days
/// before `today`.
pub fn seed_sample(conn: &Connection, today: NaiveDate) -> anyhow::Result<SeedCounts> {
    let tx = conn.unchecked_transaction()?;
    let created_at = db::now_timestamp();
    let mut counts = SeedCounts::default();

    let mut student_ids = Vec::with_capacity(SAMPLE_STUDENTS.len());
    for (name, class, section, dob) in SAMPLE_STUDENTS {
        let id = db::insert_student(
            &tx,
            &NewStudent {
                name: name.to_string(),
                class: class.to_string(),
                section: section.to_string(),
                dob: NaiveDate::parse_from_str(dob, DATE_FORMAT).ok(),
            },
            &created_at,
        )?;
        student_ids.push(id);
        counts.students += 1;
    }

    let mut subject_ids = Vec::with_capacity(SAMPLE_SUBJECTS.len());
    for name in SAMPLE_SUBJECTS {
        let id = db::insert_subject(
            &tx,
            &NewSubject {
                name: name.to_string(),
            },
            &created_at,
        )
        .with_context(|| format!("seed subject {}", name))?;
        subject_ids.push(id);
        counts.subjects += 1;
    }

    for (s, student_id) in student_ids.iter().enumerate() {
        for (j, subject_id) in subject_ids.iter().take(SAMPLE_MARKS_PER_STUDENT).enumerate() {
            let days_back = ((s * 3 + j * 5) % 30 + 1) as i64;
            db::insert_mark(
                &tx,
                &NewMark {
                    student_id: *student_id,
                    subject_id: *subject_id,
                    marks_obtained: (45 + (s * 7 + j * 13) % 51) as i64,
                    max_marks: 100,
                    assessment_date: today - Duration::days(days_back),
                    assessment_type: SAMPLE_ASSESSMENT_TYPES[(s + j) % SAMPLE_ASSESSMENT_TYPES.len()]
                        .to_string(),
                },
                &created_at,
            )?;
            counts.marks += 1;
        }
    }

    tx.commit()?;
    tracing::info!(
        students = counts.students,
        subjects = counts.subjects,
        marks = counts.marks,
        "sample data seeded"
    );
    Ok(counts)
}
