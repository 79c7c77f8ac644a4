use crate::db;
use crate::ingest::error::StoreError;
use crate::ingest::record::NewRecord;
use crate::ingest::schema::EntityKind;
use rusqlite::{Connection, ErrorCode};

/// Read-only existence checks. This is all the validator may see of the store.
pub trait ReferenceLookup {
    fn exists(&self, kind: EntityKind, id: i64) -> Result<bool, StoreError>;
}

pub trait RecordStore: ReferenceLookup {
    /// Persists one record and returns the store-assigned id.
    fn create(&self, record: &NewRecord) -> Result<i64, StoreError>;
}

pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl ReferenceLookup for SqliteStore<'_> {
    fn exists(&self, kind: EntityKind, id: i64) -> Result<bool, StoreError> {
        Ok(db::entity_exists(self.conn, kind, id)?)
    }
}

impl RecordStore for SqliteStore<'_> {
    fn create(&self, record: &NewRecord) -> Result<i64, StoreError> {
        let created_at = db::now_timestamp();
        let res = match record {
            NewRecord::Student(s) => db::insert_student(self.conn, s, &created_at),
            NewRecord::Subject(s) => db::insert_subject(self.conn, s, &created_at),
            NewRecord::Mark(m) => db::insert_mark(self.conn, m, &created_at),
        };
        res.map_err(|e| classify(e, record))
    }
}

fn classify(e: rusqlite::Error, record: &NewRecord) -> StoreError {
    let Some((code, extended)) = e.sqlite_error().map(|f| (f.code, f.extended_code)) else {
        return StoreError::Sqlite(e);
    };
    if code != ErrorCode::ConstraintViolation {
        return StoreError::Sqlite(e);
    }
    if extended == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
        if let NewRecord::Subject(s) = record {
            return StoreError::Duplicate(format!("Subject '{}' already exists", s.name));
        }
    }
    StoreError::Constraint(e.to_string())
}
