use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

#[derive(Clone, Copy)]
enum SetupSection {
    Import,
}

impl SetupSection {
    const ALL: [SetupSection; 1] = [SetupSection::Import];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "import" => Some(Self::Import),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Import => "import",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Import => "setup.import",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Import => json!({
            "csvDelimiter": ",",
            "recordHistory": true,
            "writeLogFile": false,
            "logDir": null
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_nullable_string_max(v: &Value, key: &str, max_len: usize) -> Result<Value, String> {
    if v.is_null() {
        return Ok(Value::Null);
    }
    let s = parse_string_max(v, key, max_len)?;
    if s.is_empty() {
        return Ok(Value::Null);
    }
    Ok(Value::String(s))
}

/// A single printable ASCII character other than the quote; `\t` is accepted for tab.
fn parse_delimiter(v: &Value, key: &str) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = if s == "\\t" { "\t" } else { s };
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c == '\t' || (c.is_ascii_graphic() && c != '"') => Ok(c.to_string()),
        _ => Err(format!(
            "{} must be a single ASCII character other than a quote",
            key
        )),
    }
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Import => match k.as_str() {
                "csvDelimiter" => {
                    obj.insert(k.clone(), Value::String(parse_delimiter(v, k)?));
                }
                "recordHistory" | "writeLogFile" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "logDir" => {
                    obj.insert(k.clone(), parse_nullable_string_max(v, k, 1024)?);
                }
                _ => return Err(format!("unknown import field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed saved values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                let _ = merge_section_patch(section, &mut current, &one);
            }
        }
    }
    Ok(current)
}

/// Import settings as the pipeline consumes them.
#[derive(Debug, Clone)]
pub struct ImportSettings {
    pub csv_delimiter: u8,
    pub record_history: bool,
    pub write_log_file: bool,
    pub log_dir: Option<PathBuf>,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            csv_delimiter: b',',
            record_history: true,
            write_log_file: false,
            log_dir: None,
        }
    }
}

pub fn load_import_settings(conn: &rusqlite::Connection) -> anyhow::Result<ImportSettings> {
    let v = load_section(conn, SetupSection::Import)?;
    let defaults = ImportSettings::default();
    Ok(ImportSettings {
        csv_delimiter: v
            .get("csvDelimiter")
            .and_then(|d| d.as_str())
            .and_then(|d| d.bytes().next())
            .unwrap_or(defaults.csv_delimiter),
        record_history: v
            .get("recordHistory")
            .and_then(|b| b.as_bool())
            .unwrap_or(defaults.record_history),
        write_log_file: v
            .get("writeLogFile")
            .and_then(|b| b.as_bool())
            .unwrap_or(defaults.write_log_file),
        log_dir: v.get("logDir").and_then(|d| d.as_str()).map(PathBuf::from),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::debug!(section = section.name(), "settings updated");
    ok(&req.id, json!({ "ok": true, section.name(): current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
