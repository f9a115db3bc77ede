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
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("missing code")
}

#[test]
fn account_lifecycle_and_login() {
    let workspace = temp_dir("schoolreport-auth");
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
        "accounts.create",
        json!({ "username": "headteacher", "password": "chatsalira", "role": "admin" }),
    );
    assert!(created.get("accountId").and_then(|v| v.as_str()).is_some());

    let dup = raw_request(
        &mut stdin,
        &mut reader,
        "3",
        "accounts.create",
        json!({ "username": "headteacher", "password": "other" }),
    );
    assert_eq!(error_code(&dup), "conflict");

    let login = request(
        &mut stdin,
        &mut reader,
        "4",
        "auth.login",
        json!({ "username": "headteacher", "password": "chatsalira" }),
    );
    assert_eq!(login.get("role").and_then(|v| v.as_str()), Some("admin"));

    let denied = raw_request(
        &mut stdin,
        &mut reader,
        "5",
        "auth.login",
        json!({ "username": "headteacher", "password": "wrong" }),
    );
    assert_eq!(error_code(&denied), "unauthorized");

    // The stored hash is SHA-256, never the raw password.
    let conn = rusqlite::Connection::open(workspace.join("school.sqlite3")).expect("open db");
    let (hash, last_login): (String, Option<String>) = conn
        .query_row(
            "SELECT password_hash, last_login FROM accounts WHERE username = 'headteacher'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("account row");
    assert_eq!(hash.len(), 64);
    assert_ne!(hash, "chatsalira");
    assert!(last_login.is_some(), "successful login stamps last_login");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn auth_requires_a_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = raw_request(
        &mut stdin,
        &mut reader,
        "1",
        "auth.login",
        json!({ "username": "anyone", "password": "anything" }),
    );
    assert_eq!(error_code(&resp), "no_workspace");

    drop(stdin);
    let _ = child.wait();
}
