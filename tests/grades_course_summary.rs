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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn expect_ok(resp: &serde_json::Value) -> &serde_json::Value {
    assert_eq!(
        resp.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "expected ok response, got {}",
        resp
    );
    resp.get("result").expect("result")
}

struct Harness {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Harness {
    fn start(workspace: &PathBuf) -> Harness {
        let (child, stdin, reader) = spawn_sidecar();
        let mut h = Harness {
            child,
            stdin,
            reader,
            next_id: 0,
        };
        let resp = h.call(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        expect_ok(&resp);
        h
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        request(&mut self.stdin, &mut self.reader, &id, method, params)
    }

    fn create_enrolled_student(&mut self, course_id: &str, last: &str, first: &str) -> String {
        let resp = self.call(
            "students.create",
            json!({ "lastName": last, "firstName": first }),
        );
        let student_id = expect_ok(&resp)
            .get("studentId")
            .and_then(|v| v.as_str())
            .expect("studentId")
            .to_string();
        let resp = self.call(
            "enrollments.add",
            json!({ "courseId": course_id, "studentId": student_id }),
        );
        expect_ok(&resp);
        student_id
    }

    fn set_slots(&mut self, course_id: &str, student_id: &str, category: &str, values: &[f64]) {
        let edits: Vec<serde_json::Value> = values
            .iter()
            .enumerate()
            .map(|(slot, v)| json!({ "category": category, "slot": slot, "value": v }))
            .collect();
        let resp = self.call(
            "scores.bulkSet",
            json!({
                "courseId": course_id,
                "studentId": student_id,
                "edits": edits
            }),
        );
        let result = expect_ok(&resp);
        assert_eq!(
            result.get("updated").and_then(|v| v.as_u64()),
            Some(values.len() as u64),
            "all edits should apply: {}",
            result
        );
    }

    fn shutdown(mut self, workspace: PathBuf) {
        drop(self.stdin);
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(workspace);
    }
}

fn standing_for<'a>(
    per_student: &'a [serde_json::Value],
    student_id: &str,
) -> &'a serde_json::Value {
    per_student
        .iter()
        .find(|row| row.get("studentId").and_then(|v| v.as_str()) == Some(student_id))
        .unwrap_or_else(|| panic!("missing standing for {}", student_id))
}

#[test]
fn course_summary_mixes_statuses_and_aggregates() {
    let workspace = temp_dir("campusd-course-summary");
    let mut h = Harness::start(&workspace);

    let resp = h.call(
        "courses.create",
        json!({ "name": "Algorithms", "code": "CS201", "cycle": 3 }),
    );
    let course_id = expect_ok(&resp)
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();

    let alva = h.create_enrolled_student(&course_id, "Alva", "Maria");
    let bravo = h.create_enrolled_student(&course_id, "Bravo", "Jose");
    let cruz = h.create_enrolled_student(&course_id, "Cruz", "Ana");
    let diaz = h.create_enrolled_student(&course_id, "Diaz", "Luis");

    // Alva: fully graded, comfortably approved.
    h.set_slots(&course_id, &alva, "evaluations", &[16.0, 18.0, 14.0]);
    h.set_slots(&course_id, &alva, "practices", &[12.0, 15.0]);
    h.set_slots(&course_id, &alva, "partials", &[10.0, 11.0]);

    // Bravo: evaluations only, a stored 0 reads as not-entered.
    h.set_slots(&course_id, &bravo, "evaluations", &[15.0, 0.0]);

    // Cruz: evaluations only, failing running average.
    h.set_slots(&course_id, &cruz, "evaluations", &[8.0, 9.0]);

    // Diaz: nothing entered at all.

    let resp = h.call("grades.courseSummary", json!({ "courseId": course_id }));
    let model = expect_ok(&resp).clone();

    assert_eq!(
        model
            .get("course")
            .and_then(|c| c.get("code"))
            .and_then(|v| v.as_str()),
        Some("CS201")
    );
    assert_eq!(model.get("defaultWeights").and_then(|v| v.as_bool()), Some(true));

    let per_student = model
        .get("perStudent")
        .and_then(|v| v.as_array())
        .expect("perStudent")
        .clone();
    assert_eq!(per_student.len(), 4);

    let row = standing_for(&per_student, &alva);
    assert_eq!(row.get("evaluationsAvg").and_then(|v| v.as_f64()), Some(16.0));
    assert_eq!(row.get("practicesAvg").and_then(|v| v.as_f64()), Some(13.5));
    assert_eq!(row.get("partialsAvg").and_then(|v| v.as_f64()), Some(10.5));
    assert_eq!(row.get("finalScore").and_then(|v| v.as_f64()), Some(13.31));
    assert_eq!(row.get("status").and_then(|v| v.as_str()), Some("APPROVED"));

    let row = standing_for(&per_student, &bravo);
    assert_eq!(row.get("evaluationsAvg").and_then(|v| v.as_f64()), Some(15.0));
    assert_eq!(row.get("practicesAvg").and_then(|v| v.as_f64()), None);
    assert_eq!(row.get("finalScore").and_then(|v| v.as_f64()), Some(15.0));
    assert_eq!(row.get("status").and_then(|v| v.as_str()), Some("APPROVED"));

    let row = standing_for(&per_student, &cruz);
    assert_eq!(row.get("finalScore").and_then(|v| v.as_f64()), Some(8.5));
    assert_eq!(row.get("status").and_then(|v| v.as_str()), Some("DISAPPROVED"));

    let row = standing_for(&per_student, &diaz);
    assert!(row.get("finalScore").map(|v| v.is_null()).unwrap_or(true));
    assert_eq!(row.get("status").and_then(|v| v.as_str()), Some("NO_GRADE"));

    let cohort = model.get("cohort").expect("cohort");
    assert_eq!(cohort.get("total").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(cohort.get("approved").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(cohort.get("disapproved").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        cohort.get("approvalPercentage").and_then(|v| v.as_f64()),
        Some(50.0)
    );

    h.shutdown(workspace);
}

#[test]
fn withdrawn_students_render_but_stay_out_of_cohort_counts() {
    let workspace = temp_dir("campusd-withdrawn-cohort");
    let mut h = Harness::start(&workspace);

    let resp = h.call(
        "courses.create",
        json!({ "name": "Physics", "code": "PH101", "cycle": 1 }),
    );
    let course_id = expect_ok(&resp)
        .get("courseId")
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();

    let active = h.create_enrolled_student(&course_id, "Rojas", "Elena");
    let withdrawn = h.create_enrolled_student(&course_id, "Soto", "Pedro");

    h.set_slots(&course_id, &active, "evaluations", &[14.0]);
    h.set_slots(&course_id, &withdrawn, "evaluations", &[19.0]);

    let resp = h.call(
        "students.update",
        json!({ "studentId": withdrawn, "patch": { "active": false } }),
    );
    expect_ok(&resp);

    let resp = h.call("grades.courseSummary", json!({ "courseId": course_id }));
    let model = expect_ok(&resp).clone();

    let per_student = model
        .get("perStudent")
        .and_then(|v| v.as_array())
        .expect("perStudent")
        .clone();
    assert_eq!(per_student.len(), 2);

    let row = standing_for(&per_student, &withdrawn);
    assert_eq!(row.get("active").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(row.get("finalScore").and_then(|v| v.as_f64()), Some(19.0));

    let cohort = model.get("cohort").expect("cohort");
    assert_eq!(cohort.get("total").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(cohort.get("approved").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        cohort.get("approvalPercentage").and_then(|v| v.as_f64()),
        Some(100.0)
    );

    h.shutdown(workspace);
}

#[test]
fn summary_for_missing_course_is_not_found() {
    let workspace = temp_dir("campusd-summary-missing");
    let mut h = Harness::start(&workspace);

    let resp = h.call("grades.courseSummary", json!({ "courseId": "nope" }));
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("not_found")
    );

    h.shutdown(workspace);
}
