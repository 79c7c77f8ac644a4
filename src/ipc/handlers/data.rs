use crate::backup;
use crate::db;
use crate::ingest::EntityKind;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_kind, get_path, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::sample;
use chrono::Local;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

fn letter_grade(percentage: f64) -> &'static str {
    match percentage {
        p if p >= 90.0 => "A+",
        p if p >= 80.0 => "A",
        p if p >= 70.0 => "B+",
        p if p >= 60.0 => "B",
        p if p >= 50.0 => "C+",
        p if p >= 40.0 => "C",
        _ => "F",
    }
}

fn query_err(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

fn handle_summary(conn: &Connection) -> Result<Value, HandlerErr> {
    let mut counts = Map::new();
    for kind in EntityKind::ALL {
        counts.insert(
            kind.as_str().to_string(),
            json!(db::count_rows(conn, kind).map_err(query_err)?),
        );
    }
    let average = db::average_mark_percentage(conn)
        .map_err(query_err)?
        .map(|p| (p * 100.0).round() / 100.0)
        .unwrap_or(0.0);

    let mut grades = Map::new();
    for m in db::list_marks(conn).map_err(query_err)? {
        let pct = m.marks_obtained as f64 * 100.0 / m.max_marks as f64;
        let slot = grades
            .entry(letter_grade(pct).to_string())
            .or_insert(json!(0));
        *slot = json!(slot.as_u64().unwrap_or(0) + 1);
    }

    Ok(json!({
        "counts": counts,
        "averagePercentage": average,
        "gradeDistribution": grades,
        "isSampleData": sample::sample_present(conn).map_err(query_err)?,
    }))
}

fn handle_reset(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let with_sample = match req.params.get("sample") {
        None | Some(Value::Null) => false,
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::new("bad_params", "sample must be boolean"))?,
    };
    db::clear_all(conn).map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tracing::info!(with_sample, "workspace data cleared");
    let seeded = if with_sample {
        let counts = sample::seed_sample(conn, Local::now().date_naive())
            .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
        Some(counts)
    } else {
        None
    };
    Ok(json!({ "ok": true, "seeded": seeded }))
}

fn io_failed(e: anyhow::Error, path: &std::path::Path) -> HandlerErr {
    HandlerErr::new("io_failed", format!("{e:#}"))
        .with_details(json!({ "path": path.to_string_lossy() }))
}

fn handle_export_csv(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let kind = get_kind(&req.params)?;
    let out_path = get_path(&req.params, "outPath")?;
    let rows = backup::export_entity_csv(conn, kind, &out_path).map_err(|e| io_failed(e, &out_path))?;
    Ok(json!({
        "kind": kind,
        "path": out_path.to_string_lossy(),
        "rows": rows,
    }))
}

fn rows_json(rows: &[(EntityKind, usize)]) -> Value {
    let mut out = Map::new();
    for (kind, n) in rows {
        out.insert(kind.as_str().to_string(), json!(n));
    }
    Value::Object(out)
}

fn handle_export_archive(conn: &Connection, req: &Request) -> Result<Value, HandlerErr> {
    let out_path = get_path(&req.params, "outPath")?;
    let summary =
        backup::export_csv_archive(conn, &out_path).map_err(|e| io_failed(e, &out_path))?;
    Ok(json!({
        "ok": true,
        "path": out_path.to_string_lossy(),
        "archiveFormat": summary.archive_format,
        "entryCount": summary.entry_count,
        "rows": rows_json(&summary.rows),
    }))
}

fn handle_verify_archive(req: &Request) -> Result<Value, HandlerErr> {
    let in_path = get_path(&req.params, "inPath")?;
    if !in_path.is_file() {
        return Err(HandlerErr::new("not_found", "archive file not found")
            .with_details(json!({ "path": in_path.to_string_lossy() })));
    }
    let summary = backup::verify_csv_archive(&in_path).map_err(|e| {
        HandlerErr::new("bad_archive", format!("{e:#}"))
            .with_details(json!({ "path": in_path.to_string_lossy() }))
    })?;
    Ok(json!({
        "ok": true,
        "archiveFormat": summary.archive_format,
        "entryCount": summary.entry_count,
        "rows": rows_json(&summary.rows),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let method = req.method.as_str();
    if method == "backup.verifyArchive" {
        return Some(match handle_verify_archive(req) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        });
    }
    if !matches!(
        method,
        "data.summary" | "data.reset" | "data.exportCsv" | "backup.exportArchive"
    ) {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match method {
        "data.summary" => handle_summary(conn),
        "data.reset" => handle_reset(conn, req),
        "data.exportCsv" => handle_export_csv(conn, req),
        _ => handle_export_archive(conn, req),
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
