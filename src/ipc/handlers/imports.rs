use crate::backup::sha256_hex;
use crate::db::{self, ImportRunRow};
use crate::ingest::schema::{ColumnDefault, ColumnSpec};
use crate::ingest::{
    preview_import, read_table, run_import, schema_for, ImportError, ReadOptions, SqliteStore,
    Table, TableFormat,
};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::{load_import_settings, ImportSettings};
use crate::ipc::helpers::{get_kind, get_path, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::sample;
use chrono::Local;
use rusqlite::Connection;
use serde_json::json;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 200;

struct LoadedFile {
    path: PathBuf,
    file_name: String,
    format: TableFormat,
    sha256: String,
    table: Table,
}

fn settings_or_default(conn: &Connection) -> ImportSettings {
    load_import_settings(conn).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "import settings unreadable, using defaults");
        ImportSettings::default()
    })
}

fn requested_format(params: &serde_json::Value, path: &Path) -> Result<TableFormat, HandlerErr> {
    match params.get("format").and_then(|v| v.as_str()) {
        Some(raw) if !raw.trim().is_empty() => TableFormat::parse(raw).ok_or_else(|| {
            HandlerErr::new(
                "bad_params",
                format!("unknown format: {} (expected csv or excel)", raw),
            )
        }),
        _ => Ok(TableFormat::from_path(path)?),
    }
}

fn load_file(params: &serde_json::Value, settings: &ImportSettings) -> Result<LoadedFile, HandlerErr> {
    let path = get_path(params, "inPath")?;
    let format = requested_format(params, &path)?;
    let bytes = std::fs::read(&path).map_err(|e| {
        HandlerErr::from(ImportError::format(format!(
            "could not read file {}: {}",
            path.to_string_lossy(),
            e
        )))
        .with_details(json!({ "path": path.to_string_lossy() }))
    })?;
    let opts = ReadOptions {
        delimiter: settings.csv_delimiter,
    };
    let table = read_table(&bytes, format, &opts)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());
    Ok(LoadedFile {
        sha256: sha256_hex(&bytes),
        path,
        file_name,
        format,
        table,
    })
}

fn column_json(c: &ColumnSpec) -> serde_json::Value {
    let default = match c.default {
        ColumnDefault::None => serde_json::Value::Null,
        ColumnDefault::Today => json!("today"),
        ColumnDefault::Text(s) => json!(s),
    };
    json!({
        "name": c.name,
        "type": c.field_type,
        "required": c.required,
        "format": c.format,
        "default": default,
    })
}

fn handle_requirements(req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let kind = get_kind(&req.params)?;
    let schema = schema_for(kind);
    Ok(json!({
        "kind": kind,
        "description": schema.description,
        "requiredColumns": schema.required().map(|c| c.name).collect::<Vec<_>>(),
        "optionalColumns": schema.optional().map(|c| c.name).collect::<Vec<_>>(),
        "columns": schema.columns.iter().map(column_json).collect::<Vec<_>>(),
    }))
}

fn handle_template(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let kind = get_kind(&req.params)?;
    let out_path = get_path(&req.params, "outPath")?;
    let settings = settings_or_default(conn);
    let rows = sample::write_template(kind, settings.csv_delimiter, &out_path).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string())
            .with_details(json!({ "path": out_path.to_string_lossy() }))
    })?;
    Ok(json!({
        "kind": kind,
        "path": out_path.to_string_lossy(),
        "rows": rows,
    }))
}

fn handle_preview(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let kind = get_kind(&req.params)?;
    let settings = settings_or_default(conn);
    let file = load_file(&req.params, &settings)?;
    let store = SqliteStore::new(conn);
    let preview = preview_import(&store, &file.table, kind, Local::now().date_naive());
    let warnings = preview
        .extra_columns
        .iter()
        .map(|c| format!("Unrecognized column will be ignored: {}", c))
        .collect::<Vec<_>>();
    let errors = if preview.missing_columns.is_empty() {
        Vec::new()
    } else {
        vec![format!(
            "Missing required columns: {}",
            preview.missing_columns.join(", ")
        )]
    };
    Ok(json!({
        "path": file.path.to_string_lossy(),
        "fileName": file.file_name,
        "format": file.format.as_str(),
        "importable": preview.is_importable(),
        "errors": errors,
        "warnings": warnings,
        "preview": preview,
    }))
}

fn log_target(
    req: &Request,
    settings: &ImportSettings,
    import_id: &str,
    kind_name: &str,
) -> Option<PathBuf> {
    if let Some(p) = req
        .params
        .get("logPath")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
    {
        return Some(PathBuf::from(p.trim()));
    }
    if !settings.write_log_file {
        return None;
    }
    settings
        .log_dir
        .as_ref()
        .map(|dir| dir.join(format!("import_{}_{}.log", kind_name, import_id)))
}

fn handle_apply(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let kind = get_kind(&req.params)?;
    let settings = settings_or_default(conn);
    let started_at = db::now_timestamp();
    let file = load_file(&req.params, &settings)?;

    let store = SqliteStore::new(conn);
    let report = run_import(&store, &file.table, kind, Local::now().date_naive()).map_err(|e| {
        tracing::warn!(file = %file.file_name, error = %e, "import aborted");
        HandlerErr::from(e)
    })?;
    let finished_at = db::now_timestamp();
    let import_id = Uuid::new_v4().to_string();
    let log = report.render_log(&file.file_name, Local::now());

    let mut log_path = None;
    if let Some(target) = log_target(req, &settings, &import_id, kind.as_str()) {
        let written = target
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::write(&target, &log));
        match written {
            Ok(()) => log_path = Some(target.to_string_lossy().to_string()),
            Err(e) => {
                tracing::warn!(path = %target.to_string_lossy(), error = %e, "import log not written")
            }
        }
    }

    if settings.record_history {
        let run = ImportRunRow {
            id: import_id.clone(),
            kind: kind.as_str().to_string(),
            file_name: file.file_name.clone(),
            file_sha256: file.sha256.clone(),
            format: file.format.as_str().to_string(),
            total: report.total() as i64,
            succeeded: report.succeeded() as i64,
            failed: report.failed() as i64,
            started_at,
            finished_at,
            summary: report.snapshot(),
        };
        if let Err(e) = db::insert_import_run(conn, &run) {
            tracing::warn!(import_id = %import_id, error = %e, "import history not recorded");
        }
    }

    Ok(json!({
        "importId": import_id,
        "path": file.path.to_string_lossy(),
        "fileName": file.file_name,
        "fileSha256": file.sha256,
        "format": file.format.as_str(),
        "summary": report.summary_line(),
        "successRate": report.success_rate_percent(),
        "errors": report.error_lines(),
        "report": report,
        "log": log,
        "logPath": log_path,
    }))
}

fn handle_history(conn: &Connection, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let limit = match req.params.get("limit") {
        None | Some(serde_json::Value::Null) => DEFAULT_HISTORY_LIMIT,
        Some(v) => v
            .as_i64()
            .filter(|n| (1..=MAX_HISTORY_LIMIT).contains(n))
            .ok_or_else(|| {
                HandlerErr::new(
                    "bad_params",
                    format!("limit must be an integer in 1..={}", MAX_HISTORY_LIMIT),
                )
            })?,
    };
    let runs = db::list_import_runs(conn, limit)
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?;
    Ok(json!({ "runs": runs }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let method = req.method.as_str();
    if !matches!(
        method,
        "import.requirements" | "import.template" | "import.preview" | "import.apply" | "import.history"
    ) {
        return None;
    }
    if method == "import.requirements" {
        return Some(match handle_requirements(req) {
            Ok(v) => ok(&req.id, v),
            Err(e) => e.response(&req.id),
        });
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match method {
        "import.template" => handle_template(conn, req),
        "import.preview" => handle_preview(conn, req),
        "import.apply" => handle_apply(conn, req),
        _ => handle_history(conn, req),
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
