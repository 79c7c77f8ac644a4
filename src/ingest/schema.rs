use serde::Serialize;
use std::fmt;

pub const CLASSES: &[&str] = &["10", "11", "12"];
pub const SECTIONS: &[&str] = &["A", "B", "C"];
pub const DEFAULT_ASSESSMENT_TYPE: &str = "Assignment";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Normalized column keys, as produced by the table reader.
pub mod col {
    pub const NAME: &str = "name";
    pub const CLASS: &str = "class";
    pub const SECTION: &str = "section";
    pub const DOB: &str = "dob";
    pub const SUBJECT_NAME: &str = "subject name";
    pub const STUDENT_ID: &str = "student id";
    pub const SUBJECT_ID: &str = "subject id";
    pub const MARKS_OBTAINED: &str = "marks obtained";
    pub const MAX_MARKS: &str = "max marks";
    pub const ASSESSMENT_DATE: &str = "assessment date";
    pub const ASSESSMENT_TYPE: &str = "assessment type";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Students,
    Subjects,
    Marks,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Students, EntityKind::Subjects, EntityKind::Marks];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "students" | "student" => Some(Self::Students),
            "subjects" | "subject" => Some(Self::Subjects),
            "marks" | "mark" => Some(Self::Marks),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Students => "students",
            Self::Subjects => "subjects",
            Self::Marks => "marks",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Students => "Students",
            Self::Subjects => "Subjects",
            Self::Marks => "Marks",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    Date,
}

/// Value substituted when an optional column is absent or blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnDefault {
    None,
    Today,
    Text(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRule {
    Any,
    OneOf(&'static [&'static str]),
    /// Character count of the trimmed text.
    Length { min: usize, max: Option<usize> },
    /// Inclusive lower bound for integers.
    AtLeast(i64),
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    /// Header as shown to operators and written in templates.
    pub name: &'static str,
    pub key: &'static str,
    pub field_type: FieldType,
    pub required: bool,
    pub default: ColumnDefault,
    pub rule: ValueRule,
    pub format: &'static str,
}

#[derive(Debug)]
pub struct EntitySchema {
    pub kind: EntityKind,
    pub description: &'static str,
    pub columns: &'static [ColumnSpec],
}

impl EntitySchema {
    pub fn required(&self) -> impl Iterator<Item = &ColumnSpec> + '_ {
        self.columns.iter().filter(|c| c.required)
    }

    pub fn optional(&self) -> impl Iterator<Item = &ColumnSpec> + '_ {
        self.columns.iter().filter(|c| !c.required)
    }

    pub fn column(&self, key: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.key == key)
    }

    /// Display names of required columns for which `present` answers false.
    pub fn missing_columns(&self, present: impl Fn(&str) -> bool) -> Vec<&'static str> {
        self.required()
            .filter(|c| !present(c.key))
            .map(|c| c.name)
            .collect()
    }
}

const STUDENT_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec {
        name: "Name",
        key: col::NAME,
        field_type: FieldType::Text,
        required: true,
        default: ColumnDefault::None,
        rule: ValueRule::Length { min: 2, max: None },
        format: "Text, at least 2 characters (required)",
    },
    ColumnSpec {
        name: "Class",
        key: col::CLASS,
        field_type: FieldType::Text,
        required: true,
        default: ColumnDefault::None,
        rule: ValueRule::OneOf(CLASSES),
        format: "10, 11, or 12 (required)",
    },
    ColumnSpec {
        name: "Section",
        key: col::SECTION,
        field_type: FieldType::Text,
        required: true,
        default: ColumnDefault::None,
        rule: ValueRule::OneOf(SECTIONS),
        format: "A, B, or C (required)",
    },
    ColumnSpec {
        name: "DOB",
        key: col::DOB,
        field_type: FieldType::Date,
        required: false,
        default: ColumnDefault::None,
        rule: ValueRule::Any,
        format: "YYYY-MM-DD format (optional)",
    },
];

const SUBJECT_COLUMNS: &[ColumnSpec] = &[ColumnSpec {
    name: "Subject Name",
    key: col::SUBJECT_NAME,
    field_type: FieldType::Text,
    required: true,
    default: ColumnDefault::None,
    rule: ValueRule::Length {
        min: 2,
        max: Some(50),
    },
    format: "Text, 2-50 characters, unique (required)",
}];

const MARK_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec {
        name: "Student ID",
        key: col::STUDENT_ID,
        field_type: FieldType::Integer,
        required: true,
        default: ColumnDefault::None,
        rule: ValueRule::Any,
        format: "Number (must exist in system)",
    },
    ColumnSpec {
        name: "Subject ID",
        key: col::SUBJECT_ID,
        field_type: FieldType::Integer,
        required: true,
        default: ColumnDefault::None,
        rule: ValueRule::Any,
        format: "Number (must exist in system)",
    },
    ColumnSpec {
        name: "Marks Obtained",
        key: col::MARKS_OBTAINED,
        field_type: FieldType::Integer,
        required: true,
        default: ColumnDefault::None,
        rule: ValueRule::AtLeast(0),
        format: "Whole number, 0 or more, not above Max Marks",
    },
    ColumnSpec {
        name: "Max Marks",
        key: col::MAX_MARKS,
        field_type: FieldType::Integer,
        required: true,
        default: ColumnDefault::None,
        rule: ValueRule::AtLeast(1),
        format: "Whole number greater than 0",
    },
    ColumnSpec {
        name: "Assessment Date",
        key: col::ASSESSMENT_DATE,
        field_type: FieldType::Date,
        required: false,
        default: ColumnDefault::Today,
        rule: ValueRule::Any,
        format: "YYYY-MM-DD format (optional, defaults to today)",
    },
    ColumnSpec {
        name: "Assessment Type",
        key: col::ASSESSMENT_TYPE,
        field_type: FieldType::Text,
        required: false,
        default: ColumnDefault::Text(DEFAULT_ASSESSMENT_TYPE),
        rule: ValueRule::Any,
        format: "Text (optional, e.g. \"Final\", \"Midterm\"; defaults to \"Assignment\")",
    },
];

static STUDENTS: EntitySchema = EntitySchema {
    kind: EntityKind::Students,
    description: "Student information including name, class, section, and optional date of birth",
    columns: STUDENT_COLUMNS,
};

static SUBJECTS: EntitySchema = EntitySchema {
    kind: EntityKind::Subjects,
    description: "Subject names for the curriculum",
    columns: SUBJECT_COLUMNS,
};

static MARKS: EntitySchema = EntitySchema {
    kind: EntityKind::Marks,
    description: "Student marks for different subjects",
    columns: MARK_COLUMNS,
};

pub fn schema_for(kind: EntityKind) -> &'static EntitySchema {
    match kind {
        EntityKind::Students => &STUDENTS,
        EntityKind::Subjects => &SUBJECTS,
        EntityKind::Marks => &MARKS,
    }
}
