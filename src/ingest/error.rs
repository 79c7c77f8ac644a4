use crate::ingest::schema::EntityKind;
use thiserror::Error;

/// File-level failures. Either one means no row of the file was touched.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("{0}")]
    Format(String),

    #[error("Missing required columns for {kind}: {}", .missing.join(", "))]
    MissingColumns {
        kind: EntityKind,
        missing: Vec<&'static str>,
    },
}

impl ImportError {
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Format(_) => "format_error",
            Self::MissingColumns { .. } => "missing_columns",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Duplicate(String),

    #[error("record rejected by store: {0}")]
    Constraint(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}
