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

fn seed_form_one(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> (String, String) {
    let _ = request(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let strong = request(
        stdin,
        reader,
        "seed-a",
        "students.create",
        json!({ "firstName": "Esnart", "lastName": "Mhango", "formLevel": 1 }),
    )
    .get("studentId")
    .and_then(|v| v.as_str())
    .expect("studentId")
    .to_string();
    let weak = request(
        stdin,
        reader,
        "seed-b",
        "students.create",
        json!({ "firstName": "Fatsani", "lastName": "Zulu", "formLevel": 1 }),
    )
    .get("studentId")
    .and_then(|v| v.as_str())
    .expect("studentId")
    .to_string();

    // Strong in sciences, weak overall; the weak student leads in Chichewa.
    let _ = request(
        stdin,
        reader,
        "seed-m1",
        "marks.save",
        json!({
            "studentId": strong,
            "term": "Term 1",
            "academicYear": "2024-2025",
            "marks": {
                "English": 80, "Mathematics": 90, "Physics": 85,
                "Chichewa": 50
            }
        }),
    );
    let _ = request(
        stdin,
        reader,
        "seed-m2",
        "marks.save",
        json!({
            "studentId": weak,
            "term": "Term 1",
            "academicYear": "2024-2025",
            "marks": {
                "English": 45, "Mathematics": 40, "Physics": 35,
                "Chichewa": 75
            }
        }),
    );
    (strong, weak)
}

#[test]
fn rankings_order_by_average_descending() {
    let workspace = temp_dir("schoolreport-rankings");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (strong, weak) = seed_form_one(&mut stdin, &mut reader, &workspace);

    let result = request(
        &mut stdin,
        &mut reader,
        "1",
        "analytics.rankings",
        json!({
            "formLevel": 1,
            "term": "Term 1",
            "academicYear": "2024-2025"
        }),
    );
    let rankings = result
        .get("rankings")
        .and_then(|v| v.as_array())
        .expect("rankings");
    assert_eq!(rankings.len(), 2);
    assert_eq!(
        rankings[0].get("studentId").and_then(|v| v.as_str()),
        Some(strong.as_str())
    );
    assert_eq!(rankings[0].get("position").and_then(|v| v.as_i64()), Some(1));
    // (80+90+85+50)/4 = 76.25 -> 76.3 rounded, grade B on the truncated mean.
    assert_eq!(
        rankings[0].get("average").and_then(|v| v.as_f64()),
        Some(76.3)
    );
    assert_eq!(rankings[0].get("grade").and_then(|v| v.as_str()), Some("B"));
    assert_eq!(
        rankings[1].get("studentId").and_then(|v| v.as_str()),
        Some(weak.as_str())
    );
    assert_eq!(
        rankings[1].get("overallStatus").and_then(|v| v.as_str()),
        Some("FAIL")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn top_performers_respect_department_filter() {
    let workspace = temp_dir("schoolreport-top");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let (strong, weak) = seed_form_one(&mut stdin, &mut reader, &workspace);

    let sciences = request(
        &mut stdin,
        &mut reader,
        "1",
        "analytics.topPerformers",
        json!({
            "category": "sciences",
            "formLevel": 1,
            "term": "Term 1",
            "academicYear": "2024-2025"
        }),
    );
    let performers = sciences
        .get("performers")
        .and_then(|v| v.as_array())
        .expect("performers");
    assert_eq!(
        performers[0].get("studentId").and_then(|v| v.as_str()),
        Some(strong.as_str())
    );
    // Sciences average for the leader: (90+85)/2 = 87.5 -> 87.5.
    assert_eq!(
        performers[0].get("average").and_then(|v| v.as_f64()),
        Some(87.5)
    );

    // The weak student still tops a single-subject board.
    let leaders = request(
        &mut stdin,
        &mut reader,
        "2",
        "analytics.subjectLeaders",
        json!({
            "subject": "Chichewa",
            "term": "Term 1",
            "academicYear": "2024-2025"
        }),
    );
    let leaders = leaders
        .get("leaders")
        .and_then(|v| v.as_array())
        .expect("leaders");
    assert_eq!(
        leaders[0].get("studentId").and_then(|v| v.as_str()),
        Some(weak.as_str())
    );
    assert_eq!(leaders[0].get("mark").and_then(|v| v.as_i64()), Some(75));

    let bad = {
        let payload = json!({
            "id": "3",
            "method": "analytics.topPerformers",
            "params": {
                "category": "arts",
                "formLevel": 1,
                "term": "Term 1",
                "academicYear": "2024-2025"
            }
        });
        writeln!(stdin, "{}", payload).expect("write request");
        stdin.flush().expect("flush request");
        let mut line = String::new();
        reader.read_line(&mut line).expect("read response line");
        serde_json::from_str::<serde_json::Value>(line.trim()).expect("parse response json")
    };
    assert_eq!(bad.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        bad.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
