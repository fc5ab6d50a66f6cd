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

/// Seeds one student directly assigned to one 120-second video and leaves
/// the viewer open in the playing state. Returns the student uid.
fn seed_playing_viewer(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let teacher = request_ok(
        stdin,
        reader,
        "s2",
        "users.create",
        json!({ "email": "teach@example.com", "password": "pw", "role": "teacher" }),
    );
    let teacher_id = teacher.get("uid").and_then(|v| v.as_str()).expect("uid").to_string();
    let student = request_ok(
        stdin,
        reader,
        "s3",
        "users.create",
        json!({ "email": "kid@example.com", "password": "pw", "role": "student" }),
    );
    let student_id = student.get("uid").and_then(|v| v.as_str()).expect("uid").to_string();

    let course = request_ok(
        stdin,
        reader,
        "s4",
        "courses.create",
        json!({ "title": "Mathematics", "teacherId": teacher_id }),
    );
    let course_id = course
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();
    let _ = request_ok(
        stdin,
        reader,
        "s5",
        "courses.addTopic",
        json!({ "courseId": course_id, "topicName": "Intro" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s6",
        "courses.addVideo",
        json!({ "courseId": course_id, "topicName": "Intro", "title": "Sets", "videoId": "v1" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s7",
        "assignments.create",
        json!({
            "content": { "type": "video", "id": "v1" },
            "targets": [{ "type": "student", "id": student_id }]
        }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s8",
        "viewer.open",
        json!({ "studentId": student_id, "videoId": "v1" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "s9",
        "viewer.event",
        json!({ "event": "playing" }),
    );
    student_id
}

#[test]
fn out_of_order_samples_never_regress_stored_progress() {
    let workspace = temp_dir("coursetrack-monotonic");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = seed_playing_viewer(&mut stdin, &mut reader, &workspace);

    // Duplicate-tab style interleaving: samples arrive out of order.
    let expectations = [
        (45.0, 45, 37),
        (30.0, 45, 37),
        (45.0, 45, 37),
        (10.0, 45, 37),
        (60.0, 60, 50),
    ];
    for (i, (position, want_watch, want_pct)) in expectations.iter().enumerate() {
        let sample = request_ok(
            &mut stdin,
            &mut reader,
            &format!("m{}", i),
            "viewer.sample",
            json!({ "positionSeconds": position, "durationSeconds": 120.0 }),
        );
        assert_eq!(
            sample.get("recorded").and_then(|v| v.as_bool()),
            Some(true),
            "sample {} not recorded",
            i
        );
        assert_eq!(
            sample.get("watchTime").and_then(|v| v.as_u64()),
            Some(*want_watch),
            "watchTime after sample {}",
            i
        );
        assert_eq!(
            sample.get("completionPercentage").and_then(|v| v.as_u64()),
            Some(*want_pct),
            "completionPercentage after sample {}",
            i
        );
    }

    // Paused players do not record samples at all.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "viewer.event",
        json!({ "event": "paused" }),
    );
    let dropped = request_ok(
        &mut stdin,
        &mut reader,
        "p2",
        "viewer.sample",
        json!({ "positionSeconds": 90.0, "durationSeconds": 120.0 }),
    );
    assert_eq!(dropped.get("recorded").and_then(|v| v.as_bool()), Some(false));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "p3",
        "viewer.event",
        json!({ "event": "playing" }),
    );
    let resumed = request_ok(
        &mut stdin,
        &mut reader,
        "p4",
        "viewer.sample",
        json!({ "positionSeconds": 5.0, "durationSeconds": 120.0 }),
    );
    // Recorded, but the rewound position cannot regress anything.
    assert_eq!(resumed.get("recorded").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(resumed.get("watchTime").and_then(|v| v.as_u64()), Some(60));

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "p5",
        "reports.student",
        json!({ "studentId": student_id }),
    );
    let row = view["courses"][0]["topics"][0]["videos"][0].clone();
    assert_eq!(row.get("completionPercentage").and_then(|v| v.as_u64()), Some(50));
}

#[test]
fn repeated_ended_events_each_count_exactly_once() {
    let workspace = temp_dir("coursetrack-watchcount");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let student_id = seed_playing_viewer(&mut stdin, &mut reader, &workspace);

    for (i, expected) in [1u64, 2, 3].iter().enumerate() {
        // Replay between end events; a retried end event still counts once.
        if i > 0 {
            let _ = request_ok(
                &mut stdin,
                &mut reader,
                &format!("r{}", i),
                "viewer.event",
                json!({ "event": "playing" }),
            );
        }
        let ended = request_ok(
            &mut stdin,
            &mut reader,
            &format!("e{}", i),
            "viewer.event",
            json!({ "event": "ended", "positionSeconds": 118.0 }),
        );
        let progress = ended.get("progress").expect("completion payload");
        assert_eq!(
            progress.get("watchCount").and_then(|v| v.as_u64()),
            Some(*expected)
        );
        assert_eq!(
            progress.get("completionPercentage").and_then(|v| v.as_u64()),
            Some(100)
        );
    }

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "final",
        "reports.student",
        json!({ "studentId": student_id }),
    );
    let row = view["courses"][0]["topics"][0]["videos"][0].clone();
    assert_eq!(row.get("watchCount").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(
        row.get("completionPercentage").and_then(|v| v.as_u64()),
        Some(100)
    );
}
