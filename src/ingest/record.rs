use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStudent {
    pub name: String,
    pub class: String,
    pub section: String,
    pub dob: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubject {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMark {
    pub student_id: i64,
    pub subject_id: i64,
    pub marks_obtained: i64,
    pub max_marks: i64,
    pub assessment_date: NaiveDate,
    pub assessment_type: String,
}

/// A fully coerced row, ready to hand to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NewRecord {
    Student(NewStudent),
    Subject(NewSubject),
    Mark(NewMark),
}
