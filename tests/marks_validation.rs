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
    let exe = env!("CARGO_BIN_EXE_schoolreportd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoolreportd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn raw_request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = raw_request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected failure, got {}",
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("missing code")
}

fn mark_row_count(workspace: &PathBuf, student_id: &str) -> i64 {
    let conn = rusqlite::Connection::open(workspace.join("school.sqlite3")).expect("open db");
    conn.query_row(
        "SELECT COUNT(*) FROM marks WHERE student_id = ?",
        [student_id],
        |r| r.get(0),
    )
    .expect("count marks")
}

fn setup_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    form_level: i64,
) -> String {
    let _ = request(
        stdin,
        reader,
        "setup-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request(
        stdin,
        reader,
        "setup-student",
        "students.create",
        json!({
            "firstName": "Mary",
            "lastName": "Gondwe",
            "formLevel": form_level
        }),
    );
    created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

#[test]
fn out_of_range_mark_is_rejected_and_nothing_written() {
    let workspace = temp_dir("schoolreport-marks-range");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = setup_student(&mut stdin, &mut reader, &workspace, 1);

    let resp = raw_request(
        &mut stdin,
        &mut reader,
        "1",
        "marks.save",
        json!({
            "studentId": student_id,
            "term": "Term 1",
            "academicYear": "2024-2025",
            "marks": { "Mathematics": 105 }
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");
    assert_eq!(mark_row_count(&workspace, &student_id), 0);

    let resp = raw_request(
        &mut stdin,
        &mut reader,
        "2",
        "marks.save",
        json!({
            "studentId": student_id,
            "term": "Term 1",
            "academicYear": "2024-2025",
            "marks": { "Mathematics": -3 }
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");
    assert_eq!(mark_row_count(&workspace, &student_id), 0);

    // The valid resubmission goes through and shows up on the report.
    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "marks.save",
        json!({
            "studentId": student_id,
            "term": "Term 1",
            "academicYear": "2024-2025",
            "marks": { "Mathematics": 78 }
        }),
    );
    let report = request(
        &mut stdin,
        &mut reader,
        "4",
        "reports.progressModel",
        json!({
            "studentId": student_id,
            "term": "Term 1",
            "academicYear": "2024-2025"
        }),
    );
    let maths_row = report
        .get("rows")
        .and_then(|v| v.as_array())
        .expect("rows")
        .iter()
        .find(|r| r.get("subject").and_then(|v| v.as_str()) == Some("Mathematics"))
        .expect("Mathematics row");
    assert_eq!(maths_row.get("mark").and_then(|v| v.as_i64()), Some(78));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn non_numeric_mark_is_rejected() {
    let workspace = temp_dir("schoolreport-marks-nonnum");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = setup_student(&mut stdin, &mut reader, &workspace, 2);

    let resp = raw_request(
        &mut stdin,
        &mut reader,
        "1",
        "marks.save",
        json!({
            "studentId": student_id,
            "term": "Term 1",
            "academicYear": "2024-2025",
            "marks": { "English": "eighty" }
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    // Numeric strings from the entry form are accepted.
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "marks.save",
        json!({
            "studentId": student_id,
            "term": "Term 1",
            "academicYear": "2024-2025",
            "marks": { "English": " 80 " }
        }),
    );
    assert_eq!(mark_row_count(&workspace, &student_id), 1);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn mixed_batch_writes_nothing() {
    let workspace = temp_dir("schoolreport-marks-batch");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = setup_student(&mut stdin, &mut reader, &workspace, 3);

    let resp = raw_request(
        &mut stdin,
        &mut reader,
        "1",
        "marks.save",
        json!({
            "studentId": student_id,
            "term": "Term 2",
            "academicYear": "2024-2025",
            "marks": {
                "English": 66,
                "Biology": 71,
                "Chemistry": 101
            }
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");
    assert_eq!(mark_row_count(&workspace, &student_id), 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_student_and_subject_are_rejected() {
    let workspace = temp_dir("schoolreport-marks-refs");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = setup_student(&mut stdin, &mut reader, &workspace, 1);

    let resp = raw_request(
        &mut stdin,
        &mut reader,
        "1",
        "marks.save",
        json!({
            "studentId": "missing-student",
            "term": "Term 1",
            "academicYear": "2024-2025",
            "marks": { "English": 50 }
        }),
    );
    assert_eq!(error_code(&resp), "not_found");

    let resp = raw_request(
        &mut stdin,
        &mut reader,
        "2",
        "marks.save",
        json!({
            "studentId": student_id,
            "term": "Term 1",
            "academicYear": "2024-2025",
            "marks": { "Astronomy": 50 }
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn withdrawn_student_cannot_receive_marks() {
    let workspace = temp_dir("schoolreport-marks-withdrawn");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = setup_student(&mut stdin, &mut reader, &workspace, 4);

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "students.update",
        json!({
            "studentId": student_id,
            "patch": { "status": "withdrawn" }
        }),
    );
    let resp = raw_request(
        &mut stdin,
        &mut reader,
        "2",
        "marks.save",
        json!({
            "studentId": student_id,
            "term": "Term 1",
            "academicYear": "2024-2025",
            "marks": { "English": 55 }
        }),
    );
    assert_eq!(error_code(&resp), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
