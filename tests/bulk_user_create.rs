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
    let exe = env!("CARGO_BIN_EXE_coursetrackd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn coursetrackd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
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
fn bad_row_is_logged_and_does_not_abort_the_rest() {
    let workspace = temp_dir("coursetrack-bulk-users");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Row 2 has an empty password.
    let text = "kid1@example.com,pw1,student\nkid2@example.com,,student\nteach@example.com,pw3,teacher";
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.bulkCreate",
        json!({ "text": text }),
    );

    assert_eq!(result.get("created").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(result.get("failed").and_then(|v| v.as_u64()), Some(1));

    let log = result.get("log").and_then(|v| v.as_array()).expect("log");
    assert_eq!(log.len(), 3);
    let errors: Vec<&serde_json::Value> = log
        .iter()
        .filter(|entry| entry.get("ok").and_then(|v| v.as_bool()) == Some(false))
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].get("row").and_then(|v| v.as_u64()), Some(2));
    assert!(errors[0]
        .get("error")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .contains("missing password"));

    // Rows 1 and 3 really exist.
    let users = request_ok(&mut stdin, &mut reader, "3", "users.list", json!({}));
    let emails: Vec<&str> = users
        .get("users")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|u| u.get("email").and_then(|v| v.as_str()))
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(emails, vec!["kid1@example.com", "teach@example.com"]);
}

#[test]
fn duplicate_email_fails_its_row_only() {
    let workspace = temp_dir("coursetrack-bulk-dup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let text = "kid@example.com,pw,student\nkid@example.com,pw,student\nother@example.com,pw,student";
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.bulkCreate",
        json!({ "text": text }),
    );
    assert_eq!(result.get("created").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(result.get("failed").and_then(|v| v.as_u64()), Some(1));

    let log = result.get("log").and_then(|v| v.as_array()).expect("log");
    assert!(log[1]
        .get("error")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .contains("already registered"));
}

#[test]
fn bulk_rows_can_place_students_in_classes() {
    let workspace = temp_dir("coursetrack-bulk-class");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "email": "t@example.com", "password": "pw", "role": "teacher" }),
    );
    let teacher_id = teacher.get("uid").and_then(|v| v.as_str()).expect("uid");
    let class = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "8D", "teacherId": teacher_id }),
    );
    let class_id = class
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId");

    let text = format!(
        "kid1@example.com,pw,student,{}\nkid2@example.com,pw,student",
        class_id
    );
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "users.bulkCreate",
        json!({ "text": text }),
    );
    assert_eq!(result.get("created").and_then(|v| v.as_u64()), Some(2));

    let users = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "users.list",
        json!({ "role": "student" }),
    );
    let rows = users.get("users").and_then(|v| v.as_array()).expect("rows");
    let kid1 = rows
        .iter()
        .find(|u| u.get("email").and_then(|v| v.as_str()) == Some("kid1@example.com"))
        .expect("kid1");
    assert_eq!(kid1.get("classId").and_then(|v| v.as_str()), Some(class_id));
    let kid2 = rows
        .iter()
        .find(|u| u.get("email").and_then(|v| v.as_str()) == Some("kid2@example.com"))
        .expect("kid2");
    assert!(kid2.get("classId").map(|v| v.is_null()).unwrap_or(true));
}
