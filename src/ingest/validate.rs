//! Row validation.
//!
//! Checks run in a fixed order so the most basic problem is reported first:
//! column presence, per-field coercion, per-field value rules, cross-field
//! consistency, and finally reference existence. Reference lookups only happen
//! for rows that passed everything else.

use crate::ingest::record::{NewMark, NewRecord, NewStudent, NewSubject};
use crate::ingest::schema::{
    col, schema_for, ColumnDefault, ColumnSpec, EntityKind, FieldType, ValueRule, DATE_FORMAT,
};
use crate::ingest::store::ReferenceLookup;
use crate::ingest::table::{CellValue, Row};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    MissingColumn,
    Required,
    TypeMismatch,
    NotAllowed,
    OutOfRange,
    Length,
    Inconsistent,
    UnknownReference,
    LookupFailed,
    StoreRejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reason {
    pub code: ReasonCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<&'static str>,
    pub message: String,
}

impl Reason {
    pub fn new(code: ReasonCode, column: Option<&'static str>, message: impl Into<String>) -> Self {
        Self {
            code,
            column,
            message: message.into(),
        }
    }

    fn field(code: ReasonCode, spec: &ColumnSpec, message: String) -> Self {
        Self::new(code, Some(spec.name), message)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Valid(NewRecord),
    Invalid(Vec<Reason>),
}

#[derive(Debug, Clone, PartialEq)]
enum Coerced {
    Text(String),
    Int(i64),
    Date(NaiveDate),
}

pub fn validate_row<L>(row: &Row, kind: EntityKind, lookup: &L, today: NaiveDate) -> Verdict
where
    L: ReferenceLookup + ?Sized,
{
    let schema = schema_for(kind);

    let missing = schema.missing_columns(|key| row.has_column(key));
    if !missing.is_empty() {
        return Verdict::Invalid(vec![Reason::new(
            ReasonCode::MissingColumn,
            None,
            format!("Missing required columns: {}", missing.join(", ")),
        )]);
    }

    let mut reasons = Vec::new();
    let mut values: HashMap<&'static str, Coerced> = HashMap::new();

    for spec in schema.columns {
        match coerce(spec, row.get(spec.key), today) {
            Ok(Some(v)) => {
                values.insert(spec.key, v);
            }
            Ok(None) => {}
            Err(reason) => reasons.push(reason),
        }
    }

    for spec in schema.columns {
        if let Some(reason) = values.get(spec.key).and_then(|v| check_rule(spec, v)) {
            reasons.push(reason);
        }
    }

    if kind == EntityKind::Marks {
        if let (Some(Coerced::Int(obtained)), Some(Coerced::Int(max))) =
            (values.get(col::MARKS_OBTAINED), values.get(col::MAX_MARKS))
        {
            if obtained > max {
                reasons.push(Reason::new(
                    ReasonCode::Inconsistent,
                    Some("Marks Obtained"),
                    format!(
                        "Marks Obtained cannot exceed Max Marks ({} > {})",
                        obtained, max
                    ),
                ));
            }
        }
    }

    if kind == EntityKind::Marks && reasons.is_empty() {
        for (key, target) in [
            (col::STUDENT_ID, EntityKind::Students),
            (col::SUBJECT_ID, EntityKind::Subjects),
        ] {
            if let (Some(Coerced::Int(id)), Some(spec)) = (values.get(key), schema.column(key)) {
                if let Some(reason) = check_reference(lookup, spec, target, *id) {
                    reasons.push(reason);
                }
            }
        }
    }

    if !reasons.is_empty() {
        return Verdict::Invalid(reasons);
    }
    match build_record(kind, &mut values) {
        Some(record) => Verdict::Valid(record),
        None => Verdict::Invalid(vec![Reason::new(
            ReasonCode::Required,
            None,
            "row is missing a required value",
        )]),
    }
}

fn coerce(
    spec: &ColumnSpec,
    cell: Option<&CellValue>,
    today: NaiveDate,
) -> Result<Option<Coerced>, Reason> {
    let cell = match cell {
        Some(c) if !c.is_empty() => c,
        _ => {
            if spec.required {
                return Err(Reason::field(
                    ReasonCode::Required,
                    spec,
                    format!("{} is required", spec.name),
                ));
            }
            return Ok(match spec.default {
                ColumnDefault::None => None,
                ColumnDefault::Today => Some(Coerced::Date(today)),
                ColumnDefault::Text(s) => Some(Coerced::Text(s.to_string())),
            });
        }
    };

    match spec.field_type {
        FieldType::Text => Ok(Some(Coerced::Text(cell.display()))),
        FieldType::Integer => coerce_int(cell).map(|v| Some(Coerced::Int(v))).ok_or_else(|| {
            Reason::field(
                ReasonCode::TypeMismatch,
                spec,
                format!("{} must be a whole number (got '{}')", spec.name, cell.display()),
            )
        }),
        FieldType::Date => coerce_date(cell).map(|d| Some(Coerced::Date(d))).ok_or_else(|| {
            Reason::field(
                ReasonCode::TypeMismatch,
                spec,
                format!(
                    "{} must be a date in YYYY-MM-DD format (got '{}')",
                    spec.name,
                    cell.display()
                ),
            )
        }),
    }
}

fn whole_float(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

fn coerce_int(cell: &CellValue) -> Option<i64> {
    match cell {
        CellValue::Int(v) => Some(*v),
        CellValue::Float(v) => whole_float(*v),
        CellValue::Text(s) => {
            let t = s.trim();
            t.parse::<i64>()
                .ok()
                .or_else(|| t.parse::<f64>().ok().and_then(whole_float))
        }
        _ => None,
    }
}

/// Accepts spreadsheet date cells or text shaped exactly like `YYYY-MM-DD`.
fn coerce_date(cell: &CellValue) -> Option<NaiveDate> {
    match cell {
        CellValue::Date(d) => Some(*d),
        CellValue::Text(s) => {
            let t = s.trim();
            let b = t.as_bytes();
            let shaped = b.len() == 10
                && b.iter().enumerate().all(|(i, c)| match i {
                    4 | 7 => *c == b'-',
                    _ => c.is_ascii_digit(),
                });
            if !shaped {
                return None;
            }
            NaiveDate::parse_from_str(t, DATE_FORMAT).ok()
        }
        _ => None,
    }
}

fn check_rule(spec: &ColumnSpec, value: &Coerced) -> Option<Reason> {
    match (spec.rule, value) {
        (ValueRule::OneOf(allowed), Coerced::Text(s)) if !allowed.contains(&s.as_str()) => {
            Some(Reason::field(
                ReasonCode::NotAllowed,
                spec,
                format!(
                    "{} must be one of {} (got '{}')",
                    spec.name,
                    allowed.join(", "),
                    s
                ),
            ))
        }
        (ValueRule::Length { min, max }, Coerced::Text(s)) => {
            let n = s.chars().count();
            let too_long = max.is_some_and(|m| n > m);
            if n >= min && !too_long {
                return None;
            }
            let message = match max {
                Some(m) => format!(
                    "{} must be between {} and {} characters (got {})",
                    spec.name, min, m, n
                ),
                None => format!("{} must be at least {} characters long", spec.name, min),
            };
            Some(Reason::field(ReasonCode::Length, spec, message))
        }
        (ValueRule::AtLeast(min), Coerced::Int(v)) if *v < min => {
            let message = if min == 0 {
                format!("{} cannot be negative (got {})", spec.name, v)
            } else {
                format!("{} must be greater than {} (got {})", spec.name, min - 1, v)
            };
            Some(Reason::field(ReasonCode::OutOfRange, spec, message))
        }
        _ => None,
    }
}

fn check_reference<L>(lookup: &L, spec: &ColumnSpec, target: EntityKind, id: i64) -> Option<Reason>
where
    L: ReferenceLookup + ?Sized,
{
    match lookup.exists(target, id) {
        Ok(true) => None,
        Ok(false) => Some(Reason::field(
            ReasonCode::UnknownReference,
            spec,
            format!("{} {} does not exist", spec.name, id),
        )),
        Err(e) => Some(Reason::field(
            ReasonCode::LookupFailed,
            spec,
            format!("could not verify {} {}: {}", spec.name, id, e),
        )),
    }
}

fn take_text(values: &mut HashMap<&'static str, Coerced>, key: &str) -> Option<String> {
    match values.remove(key) {
        Some(Coerced::Text(s)) => Some(s),
        _ => None,
    }
}

fn take_int(values: &mut HashMap<&'static str, Coerced>, key: &str) -> Option<i64> {
    match values.remove(key) {
        Some(Coerced::Int(v)) => Some(v),
        _ => None,
    }
}

fn take_date(values: &mut HashMap<&'static str, Coerced>, key: &str) -> Option<NaiveDate> {
    match values.remove(key) {
        Some(Coerced::Date(d)) => Some(d),
        _ => None,
    }
}

fn build_record(kind: EntityKind, values: &mut HashMap<&'static str, Coerced>) -> Option<NewRecord> {
    let record = match kind {
        EntityKind::Students => NewRecord::Student(NewStudent {
            name: take_text(values, col::NAME)?,
            class: take_text(values, col::CLASS)?,
            section: take_text(values, col::SECTION)?,
            dob: take_date(values, col::DOB),
        }),
        EntityKind::Subjects => NewRecord::Subject(NewSubject {
            name: take_text(values, col::SUBJECT_NAME)?,
        }),
        EntityKind::Marks => NewRecord::Mark(NewMark {
            student_id: take_int(values, col::STUDENT_ID)?,
            subject_id: take_int(values, col::SUBJECT_ID)?,
            marks_obtained: take_int(values, col::MARKS_OBTAINED)?,
            max_marks: take_int(values, col::MAX_MARKS)?,
            assessment_date: take_date(values, col::ASSESSMENT_DATE)?,
            assessment_type: take_text(values, col::ASSESSMENT_TYPE)?,
        }),
    };
    Some(record)
}
