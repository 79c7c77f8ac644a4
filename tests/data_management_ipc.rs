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

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn summary_reflects_stored_marks() {
    let workspace = temp_dir("trackerd-data-summary");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let empty = request_ok(&mut stdin, &mut reader, "1", "data.summary", json!({}));
    assert_eq!(empty["counts"], json!({ "students": 0, "subjects": 0, "marks": 0 }));
    assert_eq!(empty["averagePercentage"].as_f64(), Some(0.0));
    assert_eq!(empty["isSampleData"].as_bool(), Some(false));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "name": "Priya Das", "class": "10", "section": "A" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "subjects.create",
        json!({ "name": "Hindi" }),
    );
    for (i, (got, max)) in [(45, 50), (30, 50)].into_iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("m{}", i),
            "marks.create",
            json!({ "studentId": 1, "subjectId": 1, "marksObtained": got, "maxMarks": max }),
        );
    }

    let summary = request_ok(&mut stdin, &mut reader, "4", "data.summary", json!({}));
    assert_eq!(summary["counts"]["marks"].as_u64(), Some(2));
    assert_eq!(summary["averagePercentage"].as_f64(), Some(75.0));
    assert_eq!(summary["gradeDistribution"], json!({ "A+": 1, "B": 1 }));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reset_clears_data_and_can_seed_sample_records() {
    let workspace = temp_dir("trackerd-data-reset");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let seeded = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "data.reset",
        json!({ "sample": true }),
    );
    assert_eq!(
        seeded["seeded"],
        json!({ "students": 10, "subjects": 8, "marks": 50 })
    );

    let summary = request_ok(&mut stdin, &mut reader, "2", "data.summary", json!({}));
    assert_eq!(summary["isSampleData"].as_bool(), Some(true));
    assert_eq!(summary["counts"]["students"].as_u64(), Some(10));

    let students = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    assert_eq!(students["students"][0]["id"].as_i64(), Some(1));
    assert_eq!(students["students"][0]["name"].as_str(), Some("Aarav Sharma"));

    let cleared = request_ok(&mut stdin, &mut reader, "4", "data.reset", json!({}));
    assert!(cleared["seeded"].is_null());
    let summary = request_ok(&mut stdin, &mut reader, "5", "data.summary", json!({}));
    assert_eq!(summary["counts"], json!({ "students": 0, "subjects": 0, "marks": 0 }));

    // Ids restart after a reset.
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.create",
        json!({ "name": "Ravi Gupta", "class": "11", "section": "B" }),
    );
    assert_eq!(created["id"].as_i64(), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn exports_write_csv_files_and_a_verifiable_archive() {
    let workspace = temp_dir("trackerd-data-export");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "data.reset",
        json!({ "sample": true }),
    );

    let out = workspace.join("exports").join("subjects.csv");
    std::fs::create_dir_all(out.parent().expect("parent")).expect("mkdir");
    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "data.exportCsv",
        json!({ "kind": "subjects", "outPath": out.to_string_lossy() }),
    );
    assert_eq!(exported["rows"].as_u64(), Some(8));
    let text = std::fs::read_to_string(&out).expect("read export");
    assert_eq!(text.lines().next(), Some("ID,Subject Name,Created"));
    assert_eq!(text.lines().count(), 9);

    // An exported students file imports back into an empty workspace.
    let students_out = workspace.join("students_export.csv");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "data.exportCsv",
        json!({ "kind": "students", "outPath": students_out.to_string_lossy() }),
    );

    let archive = workspace.join("backup.zip");
    let packed = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "backup.exportArchive",
        json!({ "outPath": archive.to_string_lossy() }),
    );
    assert_eq!(packed["archiveFormat"].as_str(), Some("tracker-csv-archive-v1"));
    assert_eq!(packed["entryCount"].as_u64(), Some(4));
    assert_eq!(
        packed["rows"],
        json!({ "students": 10, "subjects": 8, "marks": 50 })
    );

    let verified = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "backup.verifyArchive",
        json!({ "inPath": archive.to_string_lossy() }),
    );
    assert_eq!(verified["rows"], packed["rows"]);

    let not_zip = request(
        &mut stdin,
        &mut reader,
        "6",
        "backup.verifyArchive",
        json!({ "inPath": out.to_string_lossy() }),
    );
    assert_eq!(error_code(&not_zip), Some("bad_archive"));
    let gone = request(
        &mut stdin,
        &mut reader,
        "7",
        "backup.verifyArchive",
        json!({ "inPath": workspace.join("missing.zip").to_string_lossy() }),
    );
    assert_eq!(error_code(&gone), Some("not_found"));

    let _ = request_ok(&mut stdin, &mut reader, "8", "data.reset", json!({}));
    let reimported = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "import.apply",
        json!({ "kind": "students", "inPath": students_out.to_string_lossy() }),
    );
    assert_eq!(
        reimported["summary"].as_str(),
        Some("Successfully imported 10 out of 10 records (100.0% success rate)")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
