//! Bulk import pipeline: read a table, validate each row, persist the valid ones.

pub mod error;
pub mod processor;
pub mod record;
pub mod report;
pub mod schema;
pub mod store;
pub mod table;
pub mod validate;

pub use error::{ImportError, StoreError};
pub use processor::{preview_import, run_import};
pub use schema::{schema_for, EntityKind};
pub use store::{RecordStore, SqliteStore};
pub use table::{read_table, ReadOptions, Row, Table, TableFormat};
pub use validate::{validate_row, Verdict};
