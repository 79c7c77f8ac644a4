use crate::db;
use crate::ingest::table::CellValue;
use crate::ingest::{validate_row, EntityKind, RecordStore, Row, SqliteStore, StoreError, Verdict};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::HandlerErr;
use crate::ipc::types::{AppState, Request};
use chrono::Local;
use rusqlite::Connection;
use serde_json::{json, Value};

type ParamMap = &'static [(&'static str, &'static [&'static str])];

// Schema column name and the request params that may carry it, in column order.
const STUDENT_PARAMS: ParamMap = &[
    ("Name", &["name"]),
    ("Class", &["class"]),
    ("Section", &["section"]),
    ("DOB", &["dob"]),
];
const SUBJECT_PARAMS: ParamMap = &[("Subject Name", &["name", "subjectName"])];
const MARK_PARAMS: ParamMap = &[
    ("Student ID", &["studentId"]),
    ("Subject ID", &["subjectId"]),
    ("Marks Obtained", &["marksObtained"]),
    ("Max Marks", &["maxMarks"]),
    ("Assessment Date", &["assessmentDate"]),
    ("Assessment Type", &["assessmentType"]),
];

fn param_names(kind: EntityKind) -> ParamMap {
    match kind {
        EntityKind::Students => STUDENT_PARAMS,
        EntityKind::Subjects => SUBJECT_PARAMS,
        EntityKind::Marks => MARK_PARAMS,
    }
}

fn json_cell(v: &Value) -> CellValue {
    match v {
        Value::Null => CellValue::Empty,
        Value::Bool(b) => CellValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => CellValue::Int(i),
            None => n.as_f64().map(CellValue::Float).unwrap_or(CellValue::Empty),
        },
        Value::String(s) if s.trim().is_empty() => CellValue::Empty,
        Value::String(s) => CellValue::Text(s.clone()),
        other => CellValue::Text(other.to_string()),
    }
}

/// Builds a one-row table row from request params so single-record creation runs
/// through the import validator unchanged.
fn row_from_params(kind: EntityKind, params: &Value) -> Row {
    let mut row = Row::new(1);
    for (column, keys) in param_names(kind) {
        let value = keys
            .iter()
            .find_map(|k| params.get(*k))
            .map(json_cell)
            .unwrap_or(CellValue::Empty);
        row.insert(column, value);
    }
    row
}

fn create_record(conn: &Connection, kind: EntityKind, params: &Value) -> Result<Value, HandlerErr> {
    let row = row_from_params(kind, params);
    let store = SqliteStore::new(conn);
    let record = match validate_row(&row, kind, &store, Local::now().date_naive()) {
        Verdict::Valid(record) => record,
        Verdict::Invalid(reasons) => {
            let message = reasons
                .iter()
                .map(|r| r.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(HandlerErr::new("validation_failed", message)
                .with_details(json!({ "reasons": reasons })));
        }
    };
    let id = store.create(&record).map_err(|e| match e {
        StoreError::Duplicate(msg) => HandlerErr::new("duplicate", msg),
        other => HandlerErr::new("db_insert_failed", other.to_string()),
    })?;
    tracing::debug!(kind = kind.as_str(), id, "record created");
    Ok(json!({ "id": id, "record": record }))
}

fn list_records(conn: &Connection, kind: EntityKind) -> Result<Value, HandlerErr> {
    let listed = match kind {
        EntityKind::Students => db::list_students(conn).map(|rows| json!({ "students": rows })),
        EntityKind::Subjects => db::list_subjects(conn).map(|rows| json!({ "subjects": rows })),
        EntityKind::Marks => db::list_marks(conn).map(|rows| json!({ "marks": rows })),
    };
    listed.map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (entity, action) = req.method.split_once('.')?;
    let kind = match entity {
        "students" => EntityKind::Students,
        "subjects" => EntityKind::Subjects,
        "marks" => EntityKind::Marks,
        _ => return None,
    };
    if action != "create" && action != "list" {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = if action == "create" {
        create_record(conn, kind, &req.params)
    } else {
        list_records(conn, kind)
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::schema_for;

    #[test]
    fn params_map_onto_every_schema_column() {
        for kind in EntityKind::ALL {
            let names = param_names(kind).iter().map(|(c, _)| *c).collect::<Vec<_>>();
            let schema = schema_for(kind)
                .columns
                .iter()
                .map(|c| c.name)
                .collect::<Vec<_>>();
            assert_eq!(names, schema);
        }
    }

    #[test]
    fn absent_params_become_empty_cells() {
        let row = row_from_params(EntityKind::Marks, &json!({ "studentId": 3, "maxMarks": 100.0 }));
        assert_eq!(row.get("student id"), Some(&CellValue::Int(3)));
        assert_eq!(row.get("max marks"), Some(&CellValue::Float(100.0)));
        assert_eq!(row.get("marks obtained"), Some(&CellValue::Empty));
    }

    #[test]
    fn subject_name_accepts_either_param_spelling() {
        let a = row_from_params(EntityKind::Subjects, &json!({ "name": "Art" }));
        let b = row_from_params(EntityKind::Subjects, &json!({ "subjectName": "Art" }));
        assert_eq!(a.get("subject name"), b.get("subject name"));
    }
}
