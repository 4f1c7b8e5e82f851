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
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
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
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn result_str(resp: &serde_json::Value, key: &str) -> String {
    resp.get("result")
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing result.{}", key))
        .to_string()
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("campusd-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request(&mut stdin, &mut reader, "1", "health", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let teacher = request(
        &mut stdin,
        &mut reader,
        "3",
        "teachers.create",
        json!({ "lastName": "Smoke", "firstName": "Teacher" }),
    );
    let teacher_id = result_str(&teacher, "teacherId");
    let _ = request(&mut stdin, &mut reader, "4", "teachers.list", json!({}));

    let course = request(
        &mut stdin,
        &mut reader,
        "5",
        "courses.create",
        json!({
            "name": "Smoke Course",
            "code": "SMK101",
            "cycle": 1,
            "teacherId": teacher_id
        }),
    );
    let course_id = result_str(&course, "courseId");
    let _ = request(&mut stdin, &mut reader, "6", "courses.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "6b",
        "courses.update",
        json!({ "courseId": course_id, "patch": { "cycle": 2 } }),
    );

    let student = request(
        &mut stdin,
        &mut reader,
        "7",
        "students.create",
        json!({ "lastName": "Smoke", "firstName": "Student", "code": "S001" }),
    );
    let student_id = result_str(&student, "studentId");
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "students.list",
        json!({ "query": "smo" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "8b",
        "students.update",
        json!({
            "studentId": student_id,
            "patch": { "firstName": "Updated" }
        }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "enrollments.add",
        json!({ "courseId": course_id, "studentId": student_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "enrollments.list",
        json!({ "courseId": course_id }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "11",
        "scores.set",
        json!({
            "courseId": course_id,
            "studentId": student_id,
            "category": "evaluations",
            "slot": 0,
            "value": 14.0
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "scores.get",
        json!({ "courseId": course_id, "studentId": student_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "13",
        "scores.bulkSet",
        json!({
            "courseId": course_id,
            "studentId": student_id,
            "edits": [
                { "category": "practices", "slot": 0, "value": 12.0 },
                { "category": "partials", "slot": 1, "value": 11.0 }
            ]
        }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "weights.get",
        json!({ "courseId": course_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "15",
        "weights.set",
        json!({
            "courseId": course_id,
            "evaluations": 0.4,
            "practices": 0.3,
            "partials": 0.3
        }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "16",
        "grades.studentFinal",
        json!({ "courseId": course_id, "studentId": student_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "17",
        "grades.courseSummary",
        json!({ "courseId": course_id }),
    );

    let _ = request(
        &mut stdin,
        &mut reader,
        "18",
        "enrollments.remove",
        json!({ "courseId": course_id, "studentId": student_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "19",
        "students.delete",
        json!({ "studentId": student_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "20",
        "courses.delete",
        json!({ "courseId": course_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "21",
        "teachers.delete",
        json!({ "teacherId": teacher_id }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
