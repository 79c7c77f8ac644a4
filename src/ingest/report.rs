use crate::ingest::schema::EntityKind;
use crate::ingest::validate::Reason;
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectStage {
    Validation,
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RowStatus {
    Persisted {
        id: i64,
    },
    Rejected {
        stage: RejectStage,
        reasons: Vec<Reason>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowOutcome {
    pub row: usize,
    #[serde(flatten)]
    pub status: RowStatus,
}

impl RowOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self.status, RowStatus::Persisted { .. })
    }

    /// All reason messages joined for one-line display.
    pub fn message(&self) -> String {
        match &self.status {
            RowStatus::Persisted { .. } => String::new(),
            RowStatus::Rejected { reasons, .. } => reasons
                .iter()
                .map(|r| r.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

/// Per-file outcome. `total == succeeded + failed` holds after every update.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    kind: EntityKind,
    total: usize,
    succeeded: usize,
    failed: usize,
    outcomes: Vec<RowOutcome>,
}

impl ImportReport {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            total: 0,
            succeeded: 0,
            failed: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn record_persisted(&mut self, row: usize, id: i64) {
        self.total += 1;
        self.succeeded += 1;
        self.outcomes.push(RowOutcome {
            row,
            status: RowStatus::Persisted { id },
        });
    }

    pub fn record_rejected(&mut self, row: usize, stage: RejectStage, reasons: Vec<Reason>) {
        self.total += 1;
        self.failed += 1;
        self.outcomes.push(RowOutcome {
            row,
            status: RowStatus::Rejected { stage, reasons },
        });
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn outcomes(&self) -> &[RowOutcome] {
        &self.outcomes
    }

    pub fn failures(&self) -> impl Iterator<Item = &RowOutcome> + '_ {
        self.outcomes().iter().filter(|o| !o.is_persisted())
    }

    pub fn success_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.total as f64
        }
    }

    pub fn success_rate_percent(&self) -> f64 {
        (self.success_ratio() * 1000.0).round() / 10.0
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Successfully imported {} out of {} records ({:.1}% success rate)",
            self.succeeded,
            self.total,
            self.success_rate_percent()
        )
    }

    pub fn error_lines(&self) -> Vec<String> {
        self.failures()
            .map(|o| format!("Row {}: {}", o.row, o.message()))
            .collect()
    }

    /// Compact JSON kept in import history.
    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "kind": self.kind,
            "total": self.total,
            "succeeded": self.succeeded,
            "failed": self.failed,
            "successRate": self.success_rate_percent(),
            "errors": self.error_lines(),
        })
    }

    /// Plain-text log suitable for writing next to the source file.
    pub fn render_log(&self, file_name: &str, at: DateTime<Local>) -> String {
        let mut out = String::new();
        out.push_str(&format!("Import Log - {}\n", at.format("%Y-%m-%d %H:%M:%S")));
        out.push_str(&format!("{}\n\n", "=".repeat(50)));
        out.push_str(&format!("File: {}\n", file_name));
        out.push_str(&format!("Data Type: {}\n", self.kind.label()));
        out.push_str(&format!("Total Records: {}\n", self.total));
        out.push_str(&format!("Successful: {}\n", self.succeeded));
        out.push_str(&format!("Failed: {}\n", self.failed));
        out.push_str(&format!("Success Rate: {:.1}%\n", self.success_rate_percent()));
        let errors = self.error_lines();
        if !errors.is_empty() {
            out.push_str("\nErrors:\n");
            out.push_str(&format!("{}\n", "-".repeat(20)));
            for line in errors {
                out.push_str(&line);
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::validate::ReasonCode;
    use chrono::TimeZone;

    fn reason(msg: &str) -> Reason {
        Reason::new(ReasonCode::NotAllowed, Some("Class"), msg)
    }

    #[test]
    fn empty_report_has_zero_rate() {
        let r = ImportReport::new(EntityKind::Subjects);
        assert_eq!(r.total(), 0);
        assert_eq!(r.success_ratio(), 0.0);
        assert_eq!(
            r.summary_line(),
            "Successfully imported 0 out of 0 records (0.0% success rate)"
        );
    }

    #[test]
    fn counters_and_rate_track_outcomes() {
        let mut r = ImportReport::new(EntityKind::Students);
        r.record_persisted(2, 1);
        r.record_rejected(3, RejectStage::Validation, vec![reason("bad class"), reason("bad section")]);
        r.record_persisted(4, 2);
        assert_eq!((r.total(), r.succeeded(), r.failed()), (3, 2, 1));
        assert_eq!(r.success_rate_percent(), 66.7);
        assert_eq!(r.error_lines(), vec!["Row 3: bad class; bad section"]);
        assert_eq!(r.failures().count(), 1);
    }

    #[test]
    fn outcomes_serialize_with_flat_status() {
        let mut r = ImportReport::new(EntityKind::Marks);
        r.record_persisted(2, 7);
        r.record_rejected(3, RejectStage::Persistence, vec![reason("nope")]);
        let v = serde_json::to_value(&r).expect("serialize");
        assert_eq!(v["kind"], "marks");
        assert_eq!(v["outcomes"][0]["row"], 2);
        assert_eq!(v["outcomes"][0]["status"], "persisted");
        assert_eq!(v["outcomes"][0]["id"], 7);
        assert_eq!(v["outcomes"][1]["stage"], "persistence");
        assert_eq!(v["outcomes"][1]["reasons"][0]["code"], "not_allowed");
    }

    #[test]
    fn log_lists_errors_only_when_present() {
        let at = Local
            .with_ymd_and_hms(2024, 3, 1, 9, 30, 0)
            .single()
            .expect("local time");
        let mut r = ImportReport::new(EntityKind::Subjects);
        r.record_persisted(2, 1);
        let clean = r.render_log("subjects.csv", at);
        assert!(clean.starts_with("Import Log - 2024-03-01 09:30:00\n"));
        assert!(clean.contains("Data Type: Subjects\n"));
        assert!(!clean.contains("Errors:"));

        r.record_rejected(3, RejectStage::Persistence, vec![reason("Subject 'Art' already exists")]);
        let log = r.render_log("subjects.csv", at);
        assert!(log.contains("Success Rate: 50.0%\n"));
        assert!(log.contains("Row 3: Subject 'Art' already exists\n"));
    }
}
