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
    serde_json::from_str(line.trim()).expect("parse response json")
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

#[test]
fn export_then_import_round_trips_the_workspace() {
    let workspace_a = temp_dir("coursetrack-bundle-a");
    let workspace_b = temp_dir("coursetrack-bundle-b");
    let bundle_path = temp_dir("coursetrack-bundle-out").join("backup.ctws");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace_a.to_string_lossy() }),
    );
    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.create",
        json!({ "email": "t@example.com", "password": "pw", "role": "teacher" }),
    );
    let teacher_id = teacher
        .get("uid")
        .and_then(|v| v.as_str())
        .expect("uid")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "8D", "teacherId": teacher_id }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.export",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("coursetrack-workspace-v1")
    );
    let exported_sha = exported
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .expect("checksum")
        .to_string();

    // Restore into a fresh workspace.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.select",
        json!({ "path": workspace_b.to_string_lossy() }),
    );
    let classes = request_ok(&mut stdin, &mut reader, "6", "classes.list", json!({}));
    assert_eq!(classes["classes"].as_array().map(|a| a.len()), Some(0));

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "workspace.import",
        json!({ "inPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        imported.get("dbSha256").and_then(|v| v.as_str()),
        Some(exported_sha.as_str())
    );

    let classes = request_ok(&mut stdin, &mut reader, "8", "classes.list", json!({}));
    let rows = classes["classes"].as_array().cloned().expect("classes");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("name").and_then(|v| v.as_str()), Some("8D"));

    // The identity table came along too: sign-in works in the restored copy.
    let signed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "auth.signIn",
        json!({ "email": "t@example.com", "password": "pw" }),
    );
    assert_eq!(signed.get("role").and_then(|v| v.as_str()), Some("teacher"));
}

#[test]
fn import_rejects_garbage_and_keeps_the_workspace_usable() {
    let workspace = temp_dir("coursetrack-bundle-bad");
    let junk_path = temp_dir("coursetrack-bundle-junk").join("junk.ctws");
    std::fs::write(&junk_path, b"this is not a zip archive").expect("write junk");

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
    let teacher_id = teacher
        .get("uid")
        .and_then(|v| v.as_str())
        .expect("uid")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "8D", "teacherId": teacher_id }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.import",
        json!({ "inPath": junk_path.to_string_lossy() }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp["error"].get("code").and_then(|v| v.as_str()),
        Some("import_failed")
    );

    // The original data survived the failed import.
    let classes = request_ok(&mut stdin, &mut reader, "5", "classes.list", json!({}));
    assert_eq!(classes["classes"].as_array().map(|a| a.len()), Some(1));
}
