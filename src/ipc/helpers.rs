use crate::ingest::{EntityKind, ImportError};
use crate::ipc::error::err;
use serde_json::json;
use std::path::PathBuf;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<ImportError> for HandlerErr {
    fn from(e: ImportError) -> Self {
        let details = match &e {
            ImportError::MissingColumns { kind, missing } => {
                Some(json!({ "kind": kind, "missing": missing }))
            }
            ImportError::Format(_) => None,
        };
        Self {
            code: e.code(),
            message: e.to_string(),
            details,
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_path(params: &serde_json::Value, key: &str) -> Result<PathBuf, HandlerErr> {
    get_required_str(params, key).map(PathBuf::from)
}

pub fn get_kind(params: &serde_json::Value) -> Result<EntityKind, HandlerErr> {
    let raw = get_required_str(params, "kind")?;
    EntityKind::parse(&raw).ok_or_else(|| {
        HandlerErr::new(
            "bad_params",
            format!("unknown kind: {} (expected students, subjects or marks)", raw),
        )
    })
}
