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

fn request(
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn repeated_report_generation_is_identical() {
    let workspace = temp_dir("schoolreport-determinism");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "firstName": "Limbani", "lastName": "Chirwa", "formLevel": 4 }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "marks.save",
        json!({
            "studentId": student_id,
            "term": "Term 1",
            "academicYear": "2024-2025",
            "marks": {
                "English": 68, "Mathematics": 81, "Physics": 74,
                "Chemistry": 59, "Biology": 62, "Geography": 55,
                "History": 49, "Chichewa": 77
            }
        }),
    );

    let params = json!({
        "studentId": student_id,
        "term": "Term 1",
        "academicYear": "2024-2025"
    });
    let first = request(
        &mut stdin,
        &mut reader,
        "4",
        "reports.progressModel",
        params.clone(),
    );
    let second = request(
        &mut stdin,
        &mut reader,
        "5",
        "reports.progressModel",
        params.clone(),
    );
    assert_eq!(first, second, "report model changed between identical calls");

    let pdf_a = workspace.join("report-a.pdf");
    let pdf_b = workspace.join("report-b.pdf");
    for (id, path) in [("6", &pdf_a), ("7", &pdf_b)] {
        let mut p = params.clone();
        p["outPath"] = json!(path.to_string_lossy());
        let _ = request(&mut stdin, &mut reader, id, "reports.exportPdf", p);
    }
    let bytes_a = std::fs::read(&pdf_a).expect("read pdf a");
    let bytes_b = std::fs::read(&pdf_b).expect("read pdf b");
    assert_eq!(bytes_a, bytes_b, "pdf bytes changed between identical calls");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
