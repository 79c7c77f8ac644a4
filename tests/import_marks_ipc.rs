use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_trackerd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn trackerd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn seed_students_and_subjects(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) {
    let students = workspace.join("students.csv");
    std::fs::write(
        &students,
        "Name,Class,Section\nAsha Rao,10,A\nBen Thomas,11,B\nChitra Iyer,12,C\n",
    )
    .expect("write students");
    let subjects = workspace.join("subjects.csv");
    std::fs::write(&subjects, "Subject Name\nMathematics\nPhysics\n").expect("write subjects");

    for (id, kind, path) in [("s1", "students", &students), ("s2", "subjects", &subjects)] {
        let applied = request_ok(
            stdin,
            reader,
            id,
            "import.apply",
            json!({ "kind": kind, "inPath": path.to_string_lossy() }),
        );
        assert_eq!(applied["report"]["failed"].as_u64(), Some(0), "{}", kind);
    }
}

#[test]
fn marks_import_checks_ranges_and_references() {
    let workspace = temp_dir("trackerd-marks-import");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_students_and_subjects(&mut stdin, &mut reader, &workspace);

    let input = workspace.join("marks.csv");
    std::fs::write(
        &input,
        "Student ID,Subject ID,Marks Obtained,Max Marks,Assessment Date,Assessment Type\n\
         1,1,85,100,2024-03-01,Midterm\n\
         2,2,101,100,2024-03-01,Final\n\
         3,1,-5,100,2024-03-01,Quiz\n\
         999,1,40,50,2024-03-01,Quiz\n\
         1,2,0,0,2024-03-01,Quiz\n\
         2,1,abc,100,01/03/2024,Quiz\n\
         3,2,50,50,2024-03-02,Final\n",
    )
    .expect("write marks");

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.apply",
        json!({ "kind": "marks", "inPath": input.to_string_lossy() }),
    );
    assert_eq!(
        applied["summary"].as_str(),
        Some("Successfully imported 2 out of 7 records (28.6% success rate)")
    );
    let errors = applied["errors"].as_array().expect("errors");
    assert_eq!(
        errors[0].as_str(),
        Some("Row 3: Marks Obtained cannot exceed Max Marks (101 > 100)")
    );
    assert_eq!(
        errors[1].as_str(),
        Some("Row 4: Marks Obtained cannot be negative (got -5)")
    );
    assert_eq!(errors[2].as_str(), Some("Row 5: Student ID 999 does not exist"));
    assert_eq!(
        errors[3].as_str(),
        Some("Row 6: Max Marks must be greater than 0 (got 0)")
    );
    let row7 = errors[4].as_str().expect("row 7");
    assert!(
        row7.contains("Marks Obtained must be a whole number (got 'abc')"),
        "{}",
        row7
    );
    assert!(
        row7.contains("Assessment Date must be a date in YYYY-MM-DD format (got '01/03/2024')"),
        "{}",
        row7
    );

    let listed = request_ok(&mut stdin, &mut reader, "2", "marks.list", json!({}));
    let marks = listed["marks"].as_array().expect("marks");
    assert_eq!(marks.len(), 2);
    assert_eq!(marks[0]["studentName"].as_str(), Some("Asha Rao"));
    assert_eq!(marks[0]["subjectName"].as_str(), Some("Mathematics"));
    assert_eq!(marks[0]["marksObtained"].as_i64(), Some(85));
    assert_eq!(marks[0]["assessmentType"].as_str(), Some("Midterm"));
    // Equal to max is allowed.
    assert_eq!(marks[1]["marksObtained"].as_i64(), Some(50));
    assert_eq!(marks[1]["maxMarks"].as_i64(), Some(50));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn optional_mark_columns_fall_back_to_defaults() {
    let workspace = temp_dir("trackerd-marks-defaults");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_students_and_subjects(&mut stdin, &mut reader, &workspace);

    let input = workspace.join("marks.csv");
    std::fs::write(
        &input,
        "Student ID,Subject ID,Marks Obtained,Max Marks,Assessment Date\n\
         1,1,70,100,\n\
         2,1,35.0,50,2024-02-29\n",
    )
    .expect("write marks");

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.apply",
        json!({ "kind": "marks", "inPath": input.to_string_lossy() }),
    );
    assert_eq!(applied["report"]["succeeded"].as_u64(), Some(2));

    let listed = request_ok(&mut stdin, &mut reader, "2", "marks.list", json!({}));
    let marks = listed["marks"].as_array().expect("marks");
    let today = chrono::Local::now().date_naive().format("%Y-%m-%d").to_string();
    assert_eq!(marks[0]["assessmentDate"].as_str(), Some(today.as_str()));
    assert_eq!(marks[0]["assessmentType"].as_str(), Some("Assignment"));
    assert_eq!(marks[1]["marksObtained"].as_i64(), Some(35));
    assert_eq!(marks[1]["assessmentDate"].as_str(), Some("2024-02-29"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn marks_for_unknown_subject_are_rejected_before_insert() {
    let workspace = temp_dir("trackerd-marks-unknown-subject");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_students_and_subjects(&mut stdin, &mut reader, &workspace);

    let input = workspace.join("marks.csv");
    std::fs::write(
        &input,
        "Student ID,Subject ID,Marks Obtained,Max Marks\n1,7,10,20\n",
    )
    .expect("write marks");

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.preview",
        json!({ "kind": "marks", "inPath": input.to_string_lossy() }),
    );
    let rows = preview["preview"]["rows"].as_array().expect("rows");
    assert_eq!(rows[0]["valid"].as_bool(), Some(false));
    assert_eq!(rows[0]["reasons"][0]["code"].as_str(), Some("unknown_reference"));
    assert_eq!(
        rows[0]["reasons"][0]["message"].as_str(),
        Some("Subject ID 7 does not exist")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reimporting_the_same_marks_file_adds_the_rows_again() {
    let workspace = temp_dir("trackerd-marks-reimport");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_students_and_subjects(&mut stdin, &mut reader, &workspace);

    let input = workspace.join("marks.csv");
    std::fs::write(
        &input,
        "Student ID,Subject ID,Marks Obtained,Max Marks,Assessment Date,Assessment Type\n\
         1,1,72,100,2024-04-02,Quiz\n\
         3,2,18,20,2024-04-02,Quiz\n",
    )
    .expect("write marks");

    for id in ["1", "2"] {
        let applied = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "import.apply",
            json!({ "kind": "marks", "inPath": input.to_string_lossy() }),
        );
        assert_eq!(
            applied["summary"].as_str(),
            Some("Successfully imported 2 out of 2 records (100.0% success rate)")
        );
    }

    let listed = request_ok(&mut stdin, &mut reader, "3", "marks.list", json!({}));
    let marks = listed["marks"].as_array().expect("marks");
    assert_eq!(marks.len(), 4);
    assert_eq!(marks[0]["marksObtained"], marks[2]["marksObtained"]);
    assert_ne!(marks[0]["id"], marks[2]["id"]);

    let summary = request_ok(&mut stdin, &mut reader, "4", "data.summary", json!({}));
    assert_eq!(summary["counts"]["marks"].as_u64(), Some(4));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
