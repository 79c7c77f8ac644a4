use crate::ingest::error::ImportError;
use crate::ingest::report::{ImportReport, RejectStage};
use crate::ingest::schema::{schema_for, EntityKind};
use crate::ingest::store::{RecordStore, ReferenceLookup};
use crate::ingest::table::Table;
use crate::ingest::validate::{validate_row, Reason, ReasonCode, Verdict};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, info_span, warn};

/// Fails when the table header lacks any required column of `kind`.
pub fn ensure_columns(table: &Table, kind: EntityKind) -> Result<(), ImportError> {
    let missing = schema_for(kind).missing_columns(|key| table.has_column(key));
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ImportError::MissingColumns { kind, missing })
    }
}

/// Validates and persists each row in file order. A rejected row never stops the run
/// and rows written before a failure stay written.
pub fn run_import<S>(
    store: &S,
    table: &Table,
    kind: EntityKind,
    today: NaiveDate,
) -> Result<ImportReport, ImportError>
where
    S: RecordStore + ?Sized,
{
    let span = info_span!("import", kind = kind.as_str(), rows = table.len());
    let _guard = span.enter();

    ensure_columns(table, kind)?;

    let mut report = ImportReport::new(kind);
    for row in &table.rows {
        match validate_row(row, kind, store, today) {
            Verdict::Valid(record) => match store.create(&record) {
                Ok(id) => {
                    debug!(row = row.line, id, "row persisted");
                    report.record_persisted(row.line, id);
                }
                Err(e) => {
                    warn!(row = row.line, error = %e, "store rejected row");
                    report.record_rejected(
                        row.line,
                        RejectStage::Persistence,
                        vec![Reason::new(ReasonCode::StoreRejected, None, e.to_string())],
                    );
                }
            },
            Verdict::Invalid(reasons) => {
                debug!(row = row.line, reasons = reasons.len(), "row rejected");
                report.record_rejected(row.line, RejectStage::Validation, reasons);
            }
        }
    }

    info!(
        total = report.total(),
        succeeded = report.succeeded(),
        failed = report.failed(),
        "import finished"
    );
    Ok(report)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRow {
    pub row: usize,
    pub valid: bool,
    pub reasons: Vec<Reason>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewReport {
    pub kind: EntityKind,
    pub rows_total: usize,
    pub valid: usize,
    pub invalid: usize,
    /// Required columns absent from the header; rows are not checked when non-empty.
    pub missing_columns: Vec<&'static str>,
    /// Header columns the schema does not know about. They are ignored on import.
    pub extra_columns: Vec<String>,
    pub rows: Vec<PreviewRow>,
}

impl PreviewReport {
    pub fn is_importable(&self) -> bool {
        self.missing_columns.is_empty()
    }
}

/// Dry run of [`run_import`]: same checks, nothing written.
pub fn preview_import<L>(
    lookup: &L,
    table: &Table,
    kind: EntityKind,
    today: NaiveDate,
) -> PreviewReport
where
    L: ReferenceLookup + ?Sized,
{
    let schema = schema_for(kind);
    let missing_columns = schema.missing_columns(|key| table.has_column(key));
    let extra_columns = table
        .columns
        .iter()
        .filter(|c| schema.column(c).is_none())
        .cloned()
        .collect::<Vec<_>>();

    let mut preview = PreviewReport {
        kind,
        rows_total: table.len(),
        valid: 0,
        invalid: 0,
        missing_columns,
        extra_columns,
        rows: Vec::new(),
    };
    if !preview.is_importable() {
        return preview;
    }

    for row in &table.rows {
        let reasons = match validate_row(row, kind, lookup, today) {
            Verdict::Valid(_) => Vec::new(),
            Verdict::Invalid(reasons) => reasons,
        };
        let valid = reasons.is_empty();
        if valid {
            preview.valid += 1;
        } else {
            preview.invalid += 1;
        }
        preview.rows.push(PreviewRow {
            row: row.line,
            valid,
            reasons,
        });
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::ingest::error::StoreError;
    use crate::ingest::record::NewRecord;
    use crate::ingest::report::RowStatus;
    use crate::ingest::store::SqliteStore;
    use crate::ingest::table::{read_table, ReadOptions, TableFormat};
    use rusqlite::Connection;
    use std::cell::Cell;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).expect("date")
    }

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open memory db");
        db::init_schema(&conn).expect("schema");
        conn
    }

    fn csv(text: &str) -> Table {
        read_table(text.as_bytes(), TableFormat::Delimited, &ReadOptions::default())
            .expect("read csv")
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .expect("count")
    }

    #[test]
    fn valid_rows_persist_and_invalid_rows_write_nothing() {
        let conn = conn();
        let store = SqliteStore::new(&conn);
        let table = csv("Name,Class,Section,DOB\nAarav,10,A,2008-05-15\nBad,13,A,\n");
        let report = run_import(&store, &table, EntityKind::Students, today()).expect("import");
        assert_eq!((report.total(), report.succeeded(), report.failed()), (2, 1, 1));
        assert_eq!(count(&conn, "students"), 1);

        let failure = report.failures().next().expect("one failure");
        assert_eq!(failure.row, 3);
        match &failure.status {
            RowStatus::Rejected { stage, reasons } => {
                assert_eq!(*stage, RejectStage::Validation);
                assert_eq!(reasons[0].column, Some("Class"));
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn missing_required_column_aborts_before_any_row() {
        let conn = conn();
        let store = SqliteStore::new(&conn);
        let table = csv("Name,Class\nAarav,10\n");
        let e = run_import(&store, &table, EntityKind::Students, today()).expect_err("missing");
        match e {
            ImportError::MissingColumns { kind, missing } => {
                assert_eq!(kind, EntityKind::Students);
                assert_eq!(missing, vec!["Section"]);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(count(&conn, "students"), 0);
    }

    #[test]
    fn reimport_duplicates_students_and_marks_but_rejects_subjects() {
        let conn = conn();
        let store = SqliteStore::new(&conn);
        let students = csv("Name,Class,Section\nAarav,10,A\nPriya,11,B\n");
        let subjects = csv("Subject Name\nMathematics\nPhysics\n");
        let marks = csv(
            "Student ID,Subject ID,Marks Obtained,Max Marks\n\
             1,1,85,100\n\
             2,2,40,50\n",
        );

        for _ in 0..2 {
            let r = run_import(&store, &students, EntityKind::Students, today()).expect("students");
            assert_eq!(r.succeeded(), 2);
        }
        assert_eq!(count(&conn, "students"), 4);

        let first = run_import(&store, &subjects, EntityKind::Subjects, today()).expect("first");
        assert_eq!(first.succeeded(), 2);
        let second = run_import(&store, &subjects, EntityKind::Subjects, today()).expect("second");
        assert_eq!((second.succeeded(), second.failed()), (0, 2));
        assert!(second.failures().all(|o| matches!(
            o.status,
            RowStatus::Rejected {
                stage: RejectStage::Persistence,
                ..
            }
        )));
        assert_eq!(second.error_lines()[0], "Row 2: Subject 'Mathematics' already exists");
        assert_eq!(count(&conn, "subjects"), 2);

        for _ in 0..2 {
            let r = run_import(&store, &marks, EntityKind::Marks, today()).expect("marks");
            assert_eq!((r.succeeded(), r.failed()), (2, 0));
        }
        assert_eq!(count(&conn, "marks"), 4);
    }

    #[test]
    fn marks_reference_checks_run_against_the_store() {
        let conn = conn();
        let store = SqliteStore::new(&conn);
        run_import(&store, &csv("Name,Class,Section\nAarav,10,A\n"), EntityKind::Students, today())
            .expect("students");
        run_import(&store, &csv("Subject Name\nMathematics\n"), EntityKind::Subjects, today())
            .expect("subjects");

        let marks = csv(
            "Student ID,Subject ID,Marks Obtained,Max Marks,Assessment Date,Assessment Type\n\
             1,1,85,100,2024-01-15,Final\n\
             999,1,50,100,,\n\
             1,1,-5,100,,\n",
        );
        let report = run_import(&store, &marks, EntityKind::Marks, today()).expect("marks");
        assert_eq!(report.succeeded(), 1);
        assert_eq!(
            report.error_lines(),
            vec![
                "Row 3: Student ID 999 does not exist",
                "Row 4: Marks Obtained cannot be negative (got -5)",
            ]
        );
        assert_eq!(count(&conn, "marks"), 1);
    }

    struct FlakyStore {
        calls: Cell<i64>,
    }

    impl ReferenceLookup for FlakyStore {
        fn exists(&self, _kind: EntityKind, _id: i64) -> Result<bool, StoreError> {
            Ok(true)
        }
    }

    impl RecordStore for FlakyStore {
        fn create(&self, _record: &NewRecord) -> Result<i64, StoreError> {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            if n == 2 {
                Err(StoreError::Constraint("disk full".into()))
            } else {
                Ok(n)
            }
        }
    }

    #[test]
    fn store_failure_is_recorded_and_the_run_continues() {
        let store = FlakyStore {
            calls: Cell::new(0),
        };
        let table = csv("Subject Name\nArt\nMusic\nDrama\n");
        let report = run_import(&store, &table, EntityKind::Subjects, today()).expect("import");
        assert_eq!((report.succeeded(), report.failed()), (2, 1));
        assert_eq!(store.calls.get(), 3);
        let rows = report
            .outcomes()
            .iter()
            .map(|o| (o.row, o.is_persisted()))
            .collect::<Vec<_>>();
        assert_eq!(rows, vec![(2, true), (3, false), (4, true)]);
    }

    #[test]
    fn preview_reports_structure_and_verdicts_without_writing() {
        let conn = conn();
        let store = SqliteStore::new(&conn);
        let table = csv("Name,Class,Section,Nickname\nAarav,10,A,Aaru\nBad,13,A,\n");
        let preview = preview_import(&store, &table, EntityKind::Students, today());
        assert!(preview.is_importable());
        assert_eq!(preview.extra_columns, vec!["nickname"]);
        assert_eq!((preview.rows_total, preview.valid, preview.invalid), (2, 1, 1));
        assert!(!preview.rows[1].valid);
        assert_eq!(count(&conn, "students"), 0);

        let broken = preview_import(&store, &csv("Subject\nArt\n"), EntityKind::Subjects, today());
        assert_eq!(broken.missing_columns, vec!["Subject Name"]);
        assert!(broken.rows.is_empty());
    }
}
